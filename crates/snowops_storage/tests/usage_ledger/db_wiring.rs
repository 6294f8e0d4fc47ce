#![forbid(unsafe_code)]

#[path = "../common/mod.rs"]
mod common;

use rust_decimal::Decimal;
use snowops_kernel_contracts::contract::TripUsageRecord;
use snowops_kernel_contracts::{ContractViolation, OrganizationId, TicketId, TripId};
use snowops_storage::repo::{ContractTablesRepo, UsageLedgerRepo};
use snowops_storage::StorageError;

use common::{at, backends, contractor_contract, ctx, usage};

#[test]
fn at_usage_db_01_trips_accumulate_additively() {
    for (name, repo) in backends() {
        let c = contractor_contract(
            OrganizationId::generate(),
            OrganizationId::generate(),
            100,
            at(2023, 12, 1),
        );
        repo.insert_contract_row(&ctx(), c.clone()).unwrap();
        let ticket_id = TicketId::generate();

        let first = repo
            .append_trip_usage_row(&ctx(), usage(&c, ticket_id, 10))
            .unwrap();
        assert_eq!(first.total_volume_m3, Decimal::from(10), "{name}");
        let second = repo
            .append_trip_usage_row(&ctx(), usage(&c, ticket_id, 15))
            .unwrap();
        assert_eq!(second.total_volume_m3, Decimal::from(25), "{name}");
        assert_eq!(second.total_cost, Decimal::from(2500), "{name}");
        assert_eq!(second.updated_at, at(2024, 2, 1), "{name}");

        let stored = repo.usage_row(&ctx(), c.id).unwrap().unwrap();
        assert_eq!(stored, second, "{name}");
        assert_eq!(repo.trip_usage_rows(&ctx(), c.id).unwrap().len(), 2, "{name}");
    }
}

#[test]
fn at_usage_db_02_duplicate_trip_counted_once() {
    for (name, repo) in backends() {
        let c = contractor_contract(
            OrganizationId::generate(),
            OrganizationId::generate(),
            100,
            at(2023, 12, 1),
        );
        repo.insert_contract_row(&ctx(), c.clone()).unwrap();
        let row = usage(&c, TicketId::generate(), 10);
        repo.append_trip_usage_row(&ctx(), row.clone()).unwrap();

        let replay = TripUsageRecord::v1(
            row.trip_id,
            row.ticket_id,
            c.id,
            Decimal::from(99),
            c.price_per_m3,
            at(2024, 2, 2),
        )
        .unwrap();
        assert!(
            matches!(
                repo.append_trip_usage_row(&ctx(), replay),
                Err(StorageError::DuplicateKey {
                    table: "trip_usage_log",
                    ..
                })
            ),
            "{name}"
        );
        let u = repo.usage_row(&ctx(), c.id).unwrap().unwrap();
        assert_eq!(u.total_volume_m3, Decimal::from(10), "{name}");
        assert_eq!(u.total_cost, Decimal::from(1000), "{name}");
        assert_eq!(repo.trip_usage_rows(&ctx(), c.id).unwrap(), vec![row], "{name}");
    }
}

#[test]
fn at_usage_db_03_unknown_contract_rejected_without_writes() {
    for (name, repo) in backends() {
        let ghost = contractor_contract(
            OrganizationId::generate(),
            OrganizationId::generate(),
            100,
            at(2023, 12, 1),
        );
        assert!(
            matches!(
                repo.append_trip_usage_row(&ctx(), usage(&ghost, TicketId::generate(), 3)),
                Err(StorageError::ForeignKeyViolation { .. })
            ),
            "{name}"
        );
        assert!(repo.usage_row(&ctx(), ghost.id).unwrap().is_none(), "{name}");
    }
}

#[test]
fn at_usage_db_04_ledger_rows_are_append_only() {
    for (name, repo) in backends() {
        let c = contractor_contract(
            OrganizationId::generate(),
            OrganizationId::generate(),
            100,
            at(2023, 12, 1),
        );
        repo.insert_contract_row(&ctx(), c.clone()).unwrap();
        let row = usage(&c, TicketId::generate(), 4);
        repo.append_trip_usage_row(&ctx(), row.clone()).unwrap();

        assert_eq!(
            repo.attempt_overwrite_trip_usage_row(&ctx(), row.trip_id),
            Err(StorageError::AppendOnlyViolation {
                table: "trip_usage_log"
            }),
            "{name}"
        );
        assert!(
            matches!(
                repo.attempt_overwrite_trip_usage_row(&ctx(), TripId::generate()),
                Err(StorageError::NotFound { .. })
            ),
            "{name}"
        );
    }
}

#[test]
fn at_usage_db_05_concurrent_trips_sum_exactly() {
    for (name, repo) in backends() {
        let c = contractor_contract(
            OrganizationId::generate(),
            OrganizationId::generate(),
            100,
            at(2023, 12, 1),
        );
        repo.insert_contract_row(&ctx(), c.clone()).unwrap();
        let repo = repo.as_ref();
        let ticket_id = TicketId::generate();

        std::thread::scope(|s| {
            for worker in 0..8_i64 {
                let c = &c;
                s.spawn(move || {
                    for i in 0..5_i64 {
                        let volume = if (worker + i) % 2 == 0 { 10 } else { 15 };
                        repo.append_trip_usage_row(&ctx(), usage(c, ticket_id, volume))
                            .unwrap();
                    }
                });
            }
        });

        let rows = repo.trip_usage_rows(&ctx(), c.id).unwrap();
        let expected: Decimal = rows.iter().map(|r| r.recorded_volume_m3).sum();
        let u = repo.usage_row(&ctx(), c.id).unwrap().unwrap();
        assert_eq!(rows.len(), 40, "{name}");
        assert_eq!(u.total_volume_m3, expected, "{name}");
        assert_eq!(u.total_volume_m3, Decimal::from(20 * 10 + 20 * 15), "{name}");
        assert_eq!(u.total_cost, expected * Decimal::from(100), "{name}");
    }
}

#[test]
fn at_usage_db_06_concurrent_replays_of_one_trip_succeed_once() {
    for (name, repo) in backends() {
        let c = contractor_contract(
            OrganizationId::generate(),
            OrganizationId::generate(),
            100,
            at(2023, 12, 1),
        );
        repo.insert_contract_row(&ctx(), c.clone()).unwrap();
        let row = usage(&c, TicketId::generate(), 7);
        let repo = repo.as_ref();

        let outcomes: Vec<Result<_, StorageError>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..6)
                .map(|_| {
                    let row = row.clone();
                    s.spawn(move || repo.append_trip_usage_row(&ctx(), row))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1, "{name}");
        assert!(outcomes.iter().all(|o| matches!(
            o,
            Ok(_) | Err(StorageError::DuplicateKey { .. })
        )));
        let u = repo.usage_row(&ctx(), c.id).unwrap().unwrap();
        assert_eq!(u.total_volume_m3, Decimal::from(7), "{name}");
        assert_eq!(u.total_cost, Decimal::from(700), "{name}");
    }
}

#[test]
fn at_usage_db_07_total_overflow_rejected_and_store_stays_usable() {
    for (name, repo) in backends() {
        let c = contractor_contract(
            OrganizationId::generate(),
            OrganizationId::generate(),
            1,
            at(2023, 12, 1),
        );
        repo.insert_contract_row(&ctx(), c.clone()).unwrap();
        let ticket_id = TicketId::generate();
        let big = 600_000_000_000_000_i64;
        repo.append_trip_usage_row(&ctx(), usage(&c, ticket_id, big))
            .unwrap();

        let rejected = usage(&c, ticket_id, big);
        assert!(
            matches!(
                repo.append_trip_usage_row(&ctx(), rejected.clone()),
                Err(StorageError::ContractViolation(ContractViolation::InvalidValue {
                    field: "contract_usage.total_volume_m3",
                    ..
                }))
            ),
            "{name}"
        );
        let u = repo.usage_row(&ctx(), c.id).unwrap().unwrap();
        assert_eq!(u.total_volume_m3, Decimal::from(big), "{name}");
        assert_eq!(repo.trip_usage_rows(&ctx(), c.id).unwrap().len(), 1, "{name}");

        let after = repo
            .append_trip_usage_row(&ctx(), usage(&c, ticket_id, 5))
            .unwrap();
        assert_eq!(after.total_volume_m3, Decimal::from(big + 5), "{name}");
        assert!(repo.contract_row(&ctx(), c.id).is_ok(), "{name}");
        assert!(repo
            .trip_usage_rows(&ctx(), c.id)
            .unwrap()
            .iter()
            .all(|r| r.trip_id != rejected.trip_id));
    }
}
