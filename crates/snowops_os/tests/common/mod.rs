#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use snowops_kernel_contracts::access::{Principal, UserRole};
use snowops_kernel_contracts::contract::{ContractKind, WorkType};
use snowops_kernel_contracts::ticket::{CleaningAreaId, TicketRow, TripRow};
use snowops_kernel_contracts::{ContractId, OrganizationId, RegionId, TicketId, TripId, UserId};
use snowops_os::{ContractService, CreateContractInput, FixedClock};
use snowops_storage::repo::{ContractRepo, TicketTablesRepo};
use snowops_storage::{CallContext, ContractStore, SqliteContractStore};

pub trait TestRepo: ContractRepo + TicketTablesRepo {}

impl<T: ContractRepo + TicketTablesRepo> TestRepo for T {}

/// A service over one backend plus the two privileged principals most tests need.
pub struct Harness<R> {
    pub svc: ContractService<R, FixedClock>,
    pub authority: Principal,
    pub oversight: Principal,
}

fn harness<R: TestRepo>(repo: R) -> Harness<R> {
    Harness {
        svc: ContractService::new(repo, FixedClock::new(at(2024, 2, 1))),
        authority: principal(UserRole::KguZkhAdmin, OrganizationId::generate()),
        oversight: principal(UserRole::AkimatAdmin, OrganizationId::generate()),
    }
}

pub fn memory() -> Harness<ContractStore> {
    harness(ContractStore::new_in_memory())
}

pub fn sqlite() -> Harness<SqliteContractStore> {
    harness(SqliteContractStore::in_memory().unwrap())
}

pub fn ctx() -> CallContext {
    CallContext::background()
}

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

pub fn principal(role: UserRole, org: OrganizationId) -> Principal {
    Principal::new(UserId::generate(), org, role)
}

/// Road contract for 2024: price 100, budget 1000, minimal volume 500.
pub fn roads(contractor: OrganizationId) -> CreateContractInput {
    CreateContractInput {
        contract_type: ContractKind::ContractorService,
        contractor_id: Some(contractor),
        landfill_id: None,
        name: "Roads 2024".to_string(),
        work_type: Some(WorkType::Road),
        price_per_m3: Decimal::from(100),
        budget_total: Decimal::from(1_000),
        minimal_volume_m3: Decimal::from(500),
        start_at: at(2024, 1, 1),
        end_at: at(2024, 12, 31),
        is_active: None,
        region_ids: Vec::new(),
    }
}

pub fn landfill(landfill: OrganizationId, regions: &[RegionId]) -> CreateContractInput {
    CreateContractInput {
        contract_type: ContractKind::LandfillService,
        contractor_id: None,
        landfill_id: Some(landfill),
        name: "North landfill".to_string(),
        work_type: None,
        price_per_m3: Decimal::new(255, 1),
        budget_total: Decimal::from(50_000),
        minimal_volume_m3: Decimal::from(2_000),
        start_at: at(2024, 1, 1),
        end_at: at(2024, 3, 31),
        is_active: Some(true),
        region_ids: regions.to_vec(),
    }
}

pub fn create<R: TestRepo>(h: &Harness<R>, input: CreateContractInput) -> ContractId {
    h.svc
        .create(&ctx(), &h.authority, input)
        .unwrap()
        .contract
        .id
}

/// Seeds a ticket row the way the external scheduler would.
pub fn seed_ticket<R: TestRepo>(h: &Harness<R>, contract_id: Option<ContractId>) -> TicketId {
    let start = at(2024, 2, 1);
    let row = TicketRow::v1(
        TicketId::generate(),
        contract_id,
        CleaningAreaId::generate(),
        start,
        start + Duration::hours(8),
        "PLANNED",
    )
    .unwrap();
    let id = row.id;
    h.svc.repo().insert_ticket_row(&ctx(), row).unwrap();
    id
}

pub fn seed_trip<R: TestRepo>(h: &Harness<R>, ticket_id: TicketId, volume: i64) -> TripRow {
    let entry_at = at(2024, 2, 1) + Duration::hours(2);
    let row = TripRow {
        id: TripId::generate(),
        ticket_id: Some(ticket_id),
        driver_id: None,
        vehicle_id: None,
        entry_at,
        exit_at: Some(entry_at + Duration::minutes(20)),
        status: "COMPLETED".to_string(),
        detected_volume_entry: Some(Decimal::from(volume)),
        detected_volume_exit: None,
    };
    h.svc.repo().insert_trip_row(&ctx(), row.clone()).unwrap();
    row
}
