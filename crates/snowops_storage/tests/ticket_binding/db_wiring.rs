#![forbid(unsafe_code)]

#[path = "../common/mod.rs"]
mod common;

use chrono::Duration;
use rust_decimal::Decimal;
use snowops_kernel_contracts::ticket::{AssignmentId, TicketAssignmentRow};
use snowops_kernel_contracts::{ContractId, OrganizationId, TicketId, UserId};
use snowops_storage::repo::{BindOutcome, ContractTablesRepo, TicketBindingRepo, TicketTablesRepo};
use snowops_storage::StorageError;

use common::{at, backends, contractor_contract, ctx, ticket, trip};

#[test]
fn at_bind_db_01_rebind_same_is_noop_other_conflicts() {
    for (name, repo) in backends() {
        let kgu = OrganizationId::generate();
        let a = contractor_contract(kgu, OrganizationId::generate(), 100, at(2023, 12, 1));
        let b = contractor_contract(kgu, OrganizationId::generate(), 100, at(2023, 12, 2));
        repo.insert_contract_row(&ctx(), a.clone()).unwrap();
        repo.insert_contract_row(&ctx(), b.clone()).unwrap();
        let t = ticket(None, at(2024, 2, 1));
        repo.insert_ticket_row(&ctx(), t.clone()).unwrap();

        assert_eq!(repo.ticket_contract_ref(&ctx(), t.id).unwrap(), None, "{name}");
        assert_eq!(
            repo.bind_ticket_contract(&ctx(), t.id, a.id).unwrap(),
            BindOutcome::Bound,
            "{name}"
        );
        assert_eq!(
            repo.bind_ticket_contract(&ctx(), t.id, a.id).unwrap(),
            BindOutcome::AlreadyBound,
            "{name}"
        );
        assert_eq!(
            repo.bind_ticket_contract(&ctx(), t.id, b.id),
            Err(StorageError::TicketAlreadyBound {
                ticket_id: t.id,
                contract_id: a.id,
            }),
            "{name}"
        );
        assert_eq!(repo.ticket_contract_ref(&ctx(), t.id).unwrap(), Some(a.id), "{name}");
    }
}

#[test]
fn at_bind_db_02_unknown_ticket_and_unknown_contract() {
    for (name, repo) in backends() {
        let missing = TicketId::generate();
        assert!(
            matches!(
                repo.ticket_contract_ref(&ctx(), missing),
                Err(StorageError::NotFound {
                    table: "tickets",
                    ..
                })
            ),
            "{name}"
        );
        assert!(
            matches!(
                repo.bind_ticket_contract(&ctx(), missing, ContractId::generate()),
                Err(StorageError::NotFound {
                    table: "tickets",
                    ..
                })
            ),
            "{name}"
        );

        let t = ticket(None, at(2024, 2, 1));
        repo.insert_ticket_row(&ctx(), t.clone()).unwrap();
        assert!(
            matches!(
                repo.bind_ticket_contract(&ctx(), t.id, ContractId::generate()),
                Err(StorageError::ForeignKeyViolation { .. })
            ),
            "{name}"
        );
        assert_eq!(repo.ticket_contract_ref(&ctx(), t.id).unwrap(), None, "{name}");
    }
}

#[test]
fn at_bind_db_03_contract_scoped_ticket_and_trip_views() {
    for (name, repo) in backends() {
        let c = contractor_contract(
            OrganizationId::generate(),
            OrganizationId::generate(),
            100,
            at(2023, 12, 1),
        );
        repo.insert_contract_row(&ctx(), c.clone()).unwrap();
        let early = ticket(Some(c.id), at(2024, 2, 1));
        let late = ticket(Some(c.id), at(2024, 2, 5));
        let stranger = ticket(None, at(2024, 2, 9));
        for t in [&early, &late, &stranger] {
            repo.insert_ticket_row(&ctx(), t.clone()).unwrap();
        }
        let t1 = trip(early.id, at(2024, 2, 1) + Duration::hours(1), Some(12));
        let t2 = trip(early.id, at(2024, 2, 1) + Duration::hours(3), None);
        let t3 = trip(late.id, at(2024, 2, 5) + Duration::hours(1), Some(8));
        let t4 = trip(stranger.id, at(2024, 2, 9), Some(30));
        for t in [&t1, &t2, &t3, &t4] {
            repo.insert_trip_row(&ctx(), t.clone()).unwrap();
        }
        for active in [true, false] {
            repo.insert_assignment_row(
                &ctx(),
                TicketAssignmentRow {
                    id: AssignmentId::generate(),
                    ticket_id: early.id,
                    driver_id: UserId::generate(),
                    is_active: active,
                },
            )
            .unwrap();
        }

        let tickets = repo.contract_ticket_rows(&ctx(), c.id).unwrap();
        assert_eq!(
            tickets.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![late.id, early.id],
            "{name}"
        );
        assert_eq!(tickets[1].trip_count, 2, "{name}");
        assert_eq!(tickets[1].total_volume_m3, Decimal::from(12), "{name}");
        assert_eq!(tickets[1].active_assignments, 1, "{name}");
        assert_eq!(tickets[0].trip_count, 1, "{name}");
        assert_eq!(tickets[0].active_assignments, 0, "{name}");

        let trips = repo.contract_trip_rows(&ctx(), c.id).unwrap();
        assert_eq!(trips, vec![t3, t2, t1], "{name}");
    }
}

#[test]
fn at_bind_db_04_concurrent_binds_admit_one_contract() {
    for (name, repo) in backends() {
        let kgu = OrganizationId::generate();
        let contracts: Vec<_> = (0..6)
            .map(|i| contractor_contract(kgu, OrganizationId::generate(), 100, at(2023, 12, 1 + i)))
            .collect();
        for c in &contracts {
            repo.insert_contract_row(&ctx(), c.clone()).unwrap();
        }
        let t = ticket(None, at(2024, 2, 1));
        repo.insert_ticket_row(&ctx(), t.clone()).unwrap();
        let ticket_id = t.id;
        let repo = repo.as_ref();

        let outcomes: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = contracts
                .iter()
                .map(|c| {
                    let contract_id = c.id;
                    s.spawn(move || repo.bind_ticket_contract(&ctx(), ticket_id, contract_id))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, Ok(BindOutcome::Bound)))
                .count(),
            1,
            "{name}"
        );
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, Err(StorageError::TicketAlreadyBound { .. })))
                .count(),
            5,
            "{name}"
        );
        let winner = repo.ticket_contract_ref(&ctx(), t.id).unwrap();
        assert!(contracts.iter().any(|c| Some(c.id) == winner), "{name}");
    }
}
