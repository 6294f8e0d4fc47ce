#![forbid(unsafe_code)]

#[path = "../common/mod.rs"]
mod common;

use rust_decimal::Decimal;
use snowops_kernel_contracts::filter::{ContractListFilter, ContractQuery};
use snowops_kernel_contracts::rollup::ContractStatus;
use snowops_kernel_contracts::ticket::{AppealId, AppealRow, AssignmentId, TicketAssignmentRow};
use snowops_kernel_contracts::{ContractId, OrganizationId, RegionId, UserId};
use snowops_storage::repo::{ContractTablesRepo, TicketTablesRepo, UsageLedgerRepo};
use snowops_storage::{CallContext, StorageError};

use common::{at, backends, contractor_contract, ctx, landfill_contract, ticket, trip, usage};

#[test]
fn at_contract_db_01_insert_creates_zero_usage_row() {
    for (name, repo) in backends() {
        let c = contractor_contract(
            OrganizationId::generate(),
            OrganizationId::generate(),
            100,
            at(2023, 12, 1),
        );
        repo.insert_contract_row(&ctx(), c.clone()).unwrap();

        let stored = repo.contract_row(&ctx(), c.id).unwrap();
        assert_eq!(stored.record, c, "{name}");
        let u = stored.usage.expect("usage row created with the contract");
        assert_eq!(u.total_volume_m3, Decimal::ZERO, "{name}");
        assert_eq!(u.total_cost, Decimal::ZERO, "{name}");
    }
}

#[test]
fn at_contract_db_02_duplicate_contract_id_rejected() {
    for (name, repo) in backends() {
        let c = contractor_contract(
            OrganizationId::generate(),
            OrganizationId::generate(),
            100,
            at(2023, 12, 1),
        );
        repo.insert_contract_row(&ctx(), c.clone()).unwrap();
        assert!(
            matches!(
                repo.insert_contract_row(&ctx(), c),
                Err(StorageError::DuplicateKey {
                    table: "contracts",
                    ..
                })
            ),
            "{name}"
        );
    }
}

#[test]
fn at_contract_db_03_landfill_regions_attached_on_enriched_reads() {
    for (name, repo) in backends() {
        let mut regions = vec![RegionId::generate(), RegionId::generate()];
        regions.sort();
        let c = landfill_contract(OrganizationId::generate(), OrganizationId::generate(), &regions);
        repo.insert_contract_row(&ctx(), c.clone()).unwrap();

        let stored = repo.contract_row(&ctx(), c.id).unwrap();
        assert_eq!(stored.record.region_ids, regions, "{name}");

        let q = ContractQuery::new(ContractListFilter::default(), false, at(2024, 2, 1));
        let bare = repo.contract_rows(&ctx(), &q).unwrap();
        assert!(bare[0].record.region_ids.is_empty(), "{name}");
        assert!(bare[0].usage.is_none(), "{name}");

        let q = ContractQuery::new(ContractListFilter::default(), true, at(2024, 2, 1));
        let rich = repo.contract_rows(&ctx(), &q).unwrap();
        assert_eq!(rich[0].record.region_ids, regions, "{name}");
        assert!(rich[0].usage.is_some(), "{name}");
    }
}

#[test]
fn at_contract_db_04_list_newest_first_and_filtered() {
    for (name, repo) in backends() {
        let kgu = OrganizationId::generate();
        let contractor = OrganizationId::generate();
        let older = contractor_contract(kgu, contractor, 100, at(2023, 10, 1));
        let newer = contractor_contract(kgu, contractor, 100, at(2023, 11, 1));
        let other = contractor_contract(kgu, OrganizationId::generate(), 100, at(2023, 12, 1));
        let mut archived = contractor_contract(kgu, contractor, 100, at(2023, 9, 1));
        archived.is_active = false;
        for c in [&older, &newer, &other, &archived] {
            repo.insert_contract_row(&ctx(), c.clone()).unwrap();
        }

        let by_contractor = ContractListFilter {
            contractor_id: Some(contractor),
            ..ContractListFilter::default()
        };
        let ids: Vec<ContractId> = repo
            .contract_rows(&ctx(), &ContractQuery::new(by_contractor.clone(), false, at(2024, 6, 1)))
            .unwrap()
            .into_iter()
            .map(|s| s.record.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id, archived.id], "{name}");

        let only_active = ContractListFilter {
            only_active: true,
            ..by_contractor.clone()
        };
        let rows = repo
            .contract_rows(&ctx(), &ContractQuery::new(only_active, false, at(2024, 6, 1)))
            .unwrap();
        assert_eq!(rows.len(), 2, "{name}");

        let archived_only = ContractListFilter {
            only_active: true,
            status: Some(ContractStatus::Archived),
            ..by_contractor.clone()
        };
        let rows = repo
            .contract_rows(&ctx(), &ContractQuery::new(archived_only, false, at(2024, 6, 1)))
            .unwrap();
        assert_eq!(rows.len(), 1, "{name}");
        assert_eq!(rows[0].record.id, archived.id, "{name}");

        let expired = ContractListFilter {
            status: Some(ContractStatus::Expired),
            ..by_contractor.clone()
        };
        assert!(repo
            .contract_rows(&ctx(), &ContractQuery::new(expired.clone(), false, at(2024, 6, 1)))
            .unwrap()
            .is_empty());
        assert_eq!(
            repo.contract_rows(&ctx(), &ContractQuery::new(expired, false, at(2025, 6, 1)))
                .unwrap()
                .len(),
            2,
            "{name}"
        );

        let window = ContractListFilter {
            end_from: Some(at(2024, 12, 31)),
            end_to: Some(at(2024, 12, 31)),
            created_by_org: Some(kgu),
            ..ContractListFilter::default()
        };
        assert_eq!(
            repo.contract_rows(&ctx(), &ContractQuery::new(window, false, at(2024, 6, 1)))
                .unwrap()
                .len(),
            4,
            "{name}"
        );
    }
}

#[test]
fn at_contract_db_05_unforced_delete_blocked_by_tickets_forced_cascades() {
    for (name, repo) in backends() {
        let regions = [RegionId::generate()];
        let c = landfill_contract(OrganizationId::generate(), OrganizationId::generate(), &regions);
        repo.insert_contract_row(&ctx(), c.clone()).unwrap();
        let t = ticket(Some(c.id), at(2024, 2, 1));
        repo.insert_ticket_row(&ctx(), t.clone()).unwrap();
        repo.insert_trip_row(&ctx(), trip(t.id, at(2024, 2, 1), Some(12)))
            .unwrap();
        repo.insert_trip_row(&ctx(), trip(t.id, at(2024, 2, 2), None))
            .unwrap();
        repo.insert_assignment_row(
            &ctx(),
            TicketAssignmentRow {
                id: AssignmentId::generate(),
                ticket_id: t.id,
                driver_id: UserId::generate(),
                is_active: true,
            },
        )
        .unwrap();
        repo.insert_appeal_row(
            &ctx(),
            AppealRow {
                id: AppealId::generate(),
                ticket_id: t.id,
                created_at: at(2024, 2, 3),
            },
        )
        .unwrap();
        repo.append_trip_usage_row(&ctx(), usage(&c, t.id, 12))
            .unwrap();

        let counts = repo.dependency_counts(&ctx(), c.id).unwrap();
        assert_eq!(counts.tickets_count, 1, "{name}");
        assert_eq!(counts.trips_count, 2, "{name}");
        assert_eq!(counts.assignments_count, 1, "{name}");
        assert_eq!(counts.appeals_count, 1, "{name}");
        assert_eq!(counts.usage_log_count, 1, "{name}");
        assert_eq!(counts.polygons_count, 1, "{name}");

        assert!(
            matches!(
                repo.delete_contract_row(&ctx(), c.id, false),
                Err(StorageError::BlockedByDependents { .. })
            ),
            "{name}"
        );
        assert!(repo.contract_row(&ctx(), c.id).is_ok(), "{name}");

        let removed = repo.delete_contract_row(&ctx(), c.id, true).unwrap();
        assert_eq!(removed, counts, "{name}");
        assert!(matches!(
            repo.contract_row(&ctx(), c.id),
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            repo.ticket_row(&ctx(), t.id),
            Err(StorageError::NotFound { .. })
        ));
        assert!(repo.usage_row(&ctx(), c.id).unwrap().is_none(), "{name}");
        assert!(repo.trip_usage_rows(&ctx(), c.id).unwrap().is_empty(), "{name}");
    }
}

#[test]
fn at_contract_db_06_usage_history_alone_does_not_block_delete() {
    for (name, repo) in backends() {
        let c = contractor_contract(
            OrganizationId::generate(),
            OrganizationId::generate(),
            100,
            at(2023, 12, 1),
        );
        repo.insert_contract_row(&ctx(), c.clone()).unwrap();
        let unbound = ticket(None, at(2024, 2, 1));
        repo.insert_ticket_row(&ctx(), unbound.clone()).unwrap();
        repo.append_trip_usage_row(&ctx(), usage(&c, unbound.id, 5))
            .unwrap();

        let counts = repo.dependency_counts(&ctx(), c.id).unwrap();
        assert!(!counts.blocks_unforced_delete(), "{name}");
        repo.delete_contract_row(&ctx(), c.id, false).unwrap();
        assert!(repo.ticket_row(&ctx(), unbound.id).is_ok(), "{name}");
    }
}

#[test]
fn at_contract_db_07_missing_contract_is_not_found() {
    for (name, repo) in backends() {
        let id = ContractId::generate();
        for r in [
            repo.contract_row(&ctx(), id).map(|_| ()),
            repo.dependency_counts(&ctx(), id).map(|_| ()),
            repo.delete_contract_row(&ctx(), id, true).map(|_| ()),
        ] {
            assert!(
                matches!(
                    r,
                    Err(StorageError::NotFound {
                        table: "contracts",
                        ..
                    })
                ),
                "{name}"
            );
        }
    }
}

#[test]
fn at_contract_db_08_cancelled_call_writes_nothing() {
    for (name, repo) in backends() {
        let c = contractor_contract(
            OrganizationId::generate(),
            OrganizationId::generate(),
            100,
            at(2023, 12, 1),
        );
        let dead = CallContext::background();
        dead.cancel();
        assert!(
            matches!(
                repo.insert_contract_row(&dead, c.clone()),
                Err(StorageError::Cancelled { .. })
            ),
            "{name}"
        );
        assert!(matches!(
            repo.contract_row(&ctx(), c.id),
            Err(StorageError::NotFound { .. })
        ));
    }
}
