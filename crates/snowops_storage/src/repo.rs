#![forbid(unsafe_code)]

use snowops_kernel_contracts::contract::{ContractRecord, ContractUsageRecord, TripUsageRecord};
use snowops_kernel_contracts::filter::ContractQuery;
use snowops_kernel_contracts::ticket::{
    AppealRow, ContractTicketSummary, DependencyCounts, TicketAssignmentRow, TicketRow, TripRow,
};
use snowops_kernel_contracts::{ContractId, TicketId, TripId};

use crate::{CallContext, StorageError};

/// A contract row as read back, with its usage row when one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContract {
    pub record: ContractRecord,
    pub usage: Option<ContractUsageRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    /// The ticket already pointed at this contract; nothing was written.
    AlreadyBound,
}

/// Typed repository interface for `contracts`, `contract_usage` and
/// `contract_polygons`.
pub trait ContractTablesRepo {
    /// Inserts the contract, its zero usage row and its region associations as
    /// one unit.
    fn insert_contract_row(
        &self,
        ctx: &CallContext,
        record: ContractRecord,
    ) -> Result<(), StorageError>;

    /// Always enriched with usage and regions.
    fn contract_row(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<StoredContract, StorageError>;

    /// Newest first. Usage and regions are attached only when the query asks.
    fn contract_rows(
        &self,
        ctx: &CallContext,
        query: &ContractQuery,
    ) -> Result<Vec<StoredContract>, StorageError>;

    fn dependency_counts(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<DependencyCounts, StorageError>;

    /// Unforced deletes fail with `BlockedByDependents` while tickets are bound.
    /// Forced deletes remove the bound tickets first. Returns the counts that
    /// were removed.
    fn delete_contract_row(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
        force: bool,
    ) -> Result<DependencyCounts, StorageError>;
}

/// Typed repository interface for `trip_usage_log` and the usage rollup.
pub trait UsageLedgerRepo {
    /// Appends the ledger row and adds it into the contract's usage in one
    /// transaction. Returns the usage totals after the addition.
    fn append_trip_usage_row(
        &self,
        ctx: &CallContext,
        row: TripUsageRecord,
    ) -> Result<ContractUsageRecord, StorageError>;

    fn usage_row(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<Option<ContractUsageRecord>, StorageError>;

    /// Oldest first.
    fn trip_usage_rows(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<Vec<TripUsageRecord>, StorageError>;

    /// Exists only to check the append-only rule: any attempt to rewrite a
    /// recorded trip fails with `AppendOnlyViolation` (`NotFound` when the trip
    /// was never recorded). No service operation calls it.
    fn attempt_overwrite_trip_usage_row(
        &self,
        ctx: &CallContext,
        trip_id: TripId,
    ) -> Result<(), StorageError>;
}

/// Typed repository interface for the ticket's contract reference and the
/// contract-scoped ticket/trip read models.
pub trait TicketBindingRepo {
    /// `NotFound` for an unknown ticket, `Ok(None)` for an unbound one.
    fn ticket_contract_ref(
        &self,
        ctx: &CallContext,
        ticket_id: TicketId,
    ) -> Result<Option<ContractId>, StorageError>;

    /// Check-and-set under the ticket's write lock.
    fn bind_ticket_contract(
        &self,
        ctx: &CallContext,
        ticket_id: TicketId,
        contract_id: ContractId,
    ) -> Result<BindOutcome, StorageError>;

    fn contract_ticket_rows(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<Vec<ContractTicketSummary>, StorageError>;

    fn contract_trip_rows(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<Vec<TripRow>, StorageError>;
}

/// Writes into the collaborator-owned ticket tables. The scheduler owns these
/// rows; the store only needs them to exist for binding and read models.
pub trait TicketTablesRepo {
    fn insert_ticket_row(&self, ctx: &CallContext, row: TicketRow) -> Result<(), StorageError>;
    fn insert_trip_row(&self, ctx: &CallContext, row: TripRow) -> Result<(), StorageError>;
    fn insert_assignment_row(
        &self,
        ctx: &CallContext,
        row: TicketAssignmentRow,
    ) -> Result<(), StorageError>;
    fn insert_appeal_row(&self, ctx: &CallContext, row: AppealRow) -> Result<(), StorageError>;
    fn ticket_row(&self, ctx: &CallContext, ticket_id: TicketId) -> Result<TicketRow, StorageError>;
}

/// Everything the contract service needs from a backend.
pub trait ContractRepo:
    ContractTablesRepo + UsageLedgerRepo + TicketBindingRepo + Send + Sync
{
}

impl<T> ContractRepo for T where
    T: ContractTablesRepo + UsageLedgerRepo + TicketBindingRepo + Send + Sync
{
}
