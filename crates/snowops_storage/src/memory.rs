#![forbid(unsafe_code)]

//! In-memory table store.
//!
//! Every table sits behind one lock. Each operation validates and checks
//! references first, re-checks its [`CallContext`], and only then writes, so a
//! refused or abandoned call leaves every table untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use rust_decimal::Decimal;
use snowops_kernel_contracts::contract::{ContractRecord, ContractUsageRecord, TripUsageRecord};
use snowops_kernel_contracts::filter::ContractQuery;
use snowops_kernel_contracts::ticket::{
    AppealId, AppealRow, AssignmentId, ContractTicketSummary, DependencyCounts,
    TicketAssignmentRow, TicketRow, TripRow,
};
use snowops_kernel_contracts::{
    ContractId, ContractViolation, RegionId, TicketId, TripId, Validate,
};

use crate::repo::{
    BindOutcome, ContractTablesRepo, StoredContract, TicketBindingRepo, TicketTablesRepo,
    UsageLedgerRepo,
};
use crate::{CallContext, StorageError};

#[derive(Debug, Default)]
struct Tables {
    contracts: BTreeMap<ContractId, ContractRecord>,
    contract_usage: BTreeMap<ContractId, ContractUsageRecord>,
    trip_usage_log: BTreeMap<TripId, TripUsageRecord>,
    contract_polygons: BTreeSet<(ContractId, RegionId)>,
    tickets: BTreeMap<TicketId, TicketRow>,
    trips: BTreeMap<TripId, TripRow>,
    ticket_assignments: BTreeMap<AssignmentId, TicketAssignmentRow>,
    appeals: BTreeMap<AppealId, AppealRow>,
}

impl Tables {
    fn contract(&self, contract_id: ContractId) -> Result<&ContractRecord, StorageError> {
        self.contracts
            .get(&contract_id)
            .ok_or_else(|| StorageError::not_found("contracts", contract_id))
    }

    fn regions_of(&self, contract_id: ContractId) -> Vec<RegionId> {
        self.contract_polygons
            .iter()
            .filter(|(c, _)| *c == contract_id)
            .map(|(_, r)| *r)
            .collect()
    }

    fn stored(&self, record: &ContractRecord, enrich: bool) -> StoredContract {
        let mut record = record.clone();
        if !enrich {
            return StoredContract {
                record,
                usage: None,
            };
        }
        if record.is_landfill() {
            record.region_ids = self.regions_of(record.id);
        }
        StoredContract {
            usage: self.contract_usage.get(&record.id).cloned(),
            record,
        }
    }

    fn bound_ticket_ids(&self, contract_id: ContractId) -> BTreeSet<TicketId> {
        self.tickets
            .values()
            .filter(|t| t.contract_id == Some(contract_id))
            .map(|t| t.id)
            .collect()
    }

    fn counts(&self, contract_id: ContractId) -> DependencyCounts {
        let tickets = self.bound_ticket_ids(contract_id);
        let under = |t: &TicketId| tickets.contains(t);
        DependencyCounts {
            tickets_count: tickets.len() as u64,
            trips_count: self
                .trips
                .values()
                .filter(|t| t.ticket_id.as_ref().is_some_and(under))
                .count() as u64,
            assignments_count: self
                .ticket_assignments
                .values()
                .filter(|a| under(&a.ticket_id))
                .count() as u64,
            appeals_count: self
                .appeals
                .values()
                .filter(|a| under(&a.ticket_id))
                .count() as u64,
            usage_log_count: self
                .trip_usage_log
                .values()
                .filter(|r| r.contract_id == contract_id)
                .count() as u64,
            polygons_count: self
                .contract_polygons
                .iter()
                .filter(|(c, _)| *c == contract_id)
                .count() as u64,
        }
    }

    fn remove_ticket(&mut self, ticket_id: TicketId) {
        self.tickets.remove(&ticket_id);
        self.trips.retain(|_, t| t.ticket_id != Some(ticket_id));
        self.ticket_assignments
            .retain(|_, a| a.ticket_id != ticket_id);
        self.appeals.retain(|_, a| a.ticket_id != ticket_id);
    }

    fn ensure_ticket(&self, table: &'static str, ticket_id: TicketId) -> Result<(), StorageError> {
        if self.tickets.contains_key(&ticket_id) {
            Ok(())
        } else {
            Err(StorageError::ForeignKeyViolation {
                table,
                key: ticket_id.to_string(),
            })
        }
    }
}

#[derive(Debug, Default)]
pub struct ContractStore {
    tables: Mutex<Tables>,
}

impl ContractStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables.lock().map_err(|_| StorageError::Backend {
            detail: "contract store lock poisoned".to_string(),
        })
    }
}

impl ContractTablesRepo for ContractStore {
    fn insert_contract_row(
        &self,
        ctx: &CallContext,
        mut record: ContractRecord,
    ) -> Result<(), StorageError> {
        ctx.ensure_live()?;
        record.validate()?;
        let mut t = self.lock()?;
        if t.contracts.contains_key(&record.id) {
            return Err(StorageError::DuplicateKey {
                table: "contracts",
                key: record.id.to_string(),
            });
        }
        ctx.ensure_live()?;

        let regions = std::mem::take(&mut record.region_ids);
        let id = record.id;
        let created_at = record.created_at;
        t.contracts.insert(id, record);
        t.contract_usage
            .entry(id)
            .or_insert_with(|| ContractUsageRecord::zero(id, created_at));
        for r in regions {
            t.contract_polygons.insert((id, r));
        }
        Ok(())
    }

    fn contract_row(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<StoredContract, StorageError> {
        ctx.ensure_live()?;
        let t = self.lock()?;
        let record = t.contract(contract_id)?;
        Ok(t.stored(record, true))
    }

    fn contract_rows(
        &self,
        ctx: &CallContext,
        query: &ContractQuery,
    ) -> Result<Vec<StoredContract>, StorageError> {
        ctx.ensure_live()?;
        let t = self.lock()?;
        let mut rows: Vec<&ContractRecord> =
            t.contracts.values().filter(|c| query.matches(c)).collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .map(|c| t.stored(c, query.include_usage))
            .collect())
    }

    fn dependency_counts(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<DependencyCounts, StorageError> {
        ctx.ensure_live()?;
        let t = self.lock()?;
        t.contract(contract_id)?;
        Ok(t.counts(contract_id))
    }

    fn delete_contract_row(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
        force: bool,
    ) -> Result<DependencyCounts, StorageError> {
        ctx.ensure_live()?;
        let mut t = self.lock()?;
        t.contract(contract_id)?;
        let counts = t.counts(contract_id);
        if !force && counts.blocks_unforced_delete() {
            return Err(StorageError::BlockedByDependents {
                contract_id,
                counts,
            });
        }
        ctx.ensure_live()?;

        for ticket_id in t.bound_ticket_ids(contract_id) {
            t.remove_ticket(ticket_id);
        }
        t.contracts.remove(&contract_id);
        t.contract_usage.remove(&contract_id);
        t.trip_usage_log.retain(|_, r| r.contract_id != contract_id);
        t.contract_polygons.retain(|(c, _)| *c != contract_id);
        Ok(counts)
    }
}

impl UsageLedgerRepo for ContractStore {
    fn append_trip_usage_row(
        &self,
        ctx: &CallContext,
        row: TripUsageRecord,
    ) -> Result<ContractUsageRecord, StorageError> {
        ctx.ensure_live()?;
        row.validate()?;
        let mut t = self.lock()?;
        if !t.contracts.contains_key(&row.contract_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "trip_usage_log",
                key: row.contract_id.to_string(),
            });
        }
        if t.trip_usage_log.contains_key(&row.trip_id) {
            return Err(StorageError::DuplicateKey {
                table: "trip_usage_log",
                key: row.trip_id.to_string(),
            });
        }
        let mut after = t
            .contract_usage
            .get(&row.contract_id)
            .cloned()
            .unwrap_or_else(|| ContractUsageRecord::zero(row.contract_id, row.created_at));
        after.add_trip(&row)?;
        ctx.ensure_live()?;

        t.contract_usage.insert(row.contract_id, after.clone());
        t.trip_usage_log.insert(row.trip_id, row);
        Ok(after)
    }

    fn usage_row(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<Option<ContractUsageRecord>, StorageError> {
        ctx.ensure_live()?;
        Ok(self.lock()?.contract_usage.get(&contract_id).cloned())
    }

    fn trip_usage_rows(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<Vec<TripUsageRecord>, StorageError> {
        ctx.ensure_live()?;
        let t = self.lock()?;
        let mut rows: Vec<TripUsageRecord> = t
            .trip_usage_log
            .values()
            .filter(|r| r.contract_id == contract_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.trip_id.cmp(&b.trip_id)));
        Ok(rows)
    }

    fn attempt_overwrite_trip_usage_row(
        &self,
        ctx: &CallContext,
        trip_id: TripId,
    ) -> Result<(), StorageError> {
        ctx.ensure_live()?;
        if !self.lock()?.trip_usage_log.contains_key(&trip_id) {
            return Err(StorageError::not_found("trip_usage_log", trip_id));
        }
        Err(StorageError::AppendOnlyViolation {
            table: "trip_usage_log",
        })
    }
}

impl TicketBindingRepo for ContractStore {
    fn ticket_contract_ref(
        &self,
        ctx: &CallContext,
        ticket_id: TicketId,
    ) -> Result<Option<ContractId>, StorageError> {
        ctx.ensure_live()?;
        self.lock()?
            .tickets
            .get(&ticket_id)
            .map(|t| t.contract_id)
            .ok_or_else(|| StorageError::not_found("tickets", ticket_id))
    }

    fn bind_ticket_contract(
        &self,
        ctx: &CallContext,
        ticket_id: TicketId,
        contract_id: ContractId,
    ) -> Result<BindOutcome, StorageError> {
        ctx.ensure_live()?;
        let mut t = self.lock()?;
        let current = t
            .tickets
            .get(&ticket_id)
            .ok_or_else(|| StorageError::not_found("tickets", ticket_id))?
            .contract_id;
        match current {
            Some(bound) if bound == contract_id => return Ok(BindOutcome::AlreadyBound),
            Some(bound) => {
                return Err(StorageError::TicketAlreadyBound {
                    ticket_id,
                    contract_id: bound,
                })
            }
            None => {}
        }
        if !t.contracts.contains_key(&contract_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "tickets",
                key: contract_id.to_string(),
            });
        }
        ctx.ensure_live()?;

        if let Some(ticket) = t.tickets.get_mut(&ticket_id) {
            ticket.contract_id = Some(contract_id);
        }
        Ok(BindOutcome::Bound)
    }

    fn contract_ticket_rows(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<Vec<ContractTicketSummary>, StorageError> {
        ctx.ensure_live()?;
        let t = self.lock()?;
        let mut rows = t
            .tickets
            .values()
            .filter(|ticket| ticket.contract_id == Some(contract_id))
            .map(|ticket| -> Result<ContractTicketSummary, StorageError> {
                let trips: Vec<&TripRow> = t
                    .trips
                    .values()
                    .filter(|trip| trip.ticket_id == Some(ticket.id))
                    .collect();
                let total_volume_m3 = trips
                    .iter()
                    .filter_map(|trip| trip.detected_volume_entry)
                    .try_fold(Decimal::ZERO, |sum, v| sum.checked_add(v))
                    .ok_or(ContractViolation::InvalidValue {
                        field: "contract_ticket.total_volume_m3",
                        reason: "sum of detected volumes overflows",
                    })?;
                Ok(ContractTicketSummary {
                    id: ticket.id,
                    cleaning_area_id: ticket.cleaning_area_id,
                    planned_start_at: ticket.planned_start_at,
                    planned_end_at: ticket.planned_end_at,
                    status: ticket.status.clone(),
                    trip_count: trips.len() as u64,
                    total_volume_m3,
                    active_assignments: t
                        .ticket_assignments
                        .values()
                        .filter(|a| a.ticket_id == ticket.id && a.is_active)
                        .count() as u64,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.sort_by(|a, b| {
            b.planned_start_at
                .cmp(&a.planned_start_at)
                .then(b.id.cmp(&a.id))
        });
        Ok(rows)
    }

    fn contract_trip_rows(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<Vec<TripRow>, StorageError> {
        ctx.ensure_live()?;
        let t = self.lock()?;
        let tickets = t.bound_ticket_ids(contract_id);
        let mut rows: Vec<TripRow> = t
            .trips
            .values()
            .filter(|trip| trip.ticket_id.is_some_and(|id| tickets.contains(&id)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.entry_at.cmp(&a.entry_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }
}

impl TicketTablesRepo for ContractStore {
    fn insert_ticket_row(&self, ctx: &CallContext, row: TicketRow) -> Result<(), StorageError> {
        ctx.ensure_live()?;
        row.validate()?;
        let mut t = self.lock()?;
        if t.tickets.contains_key(&row.id) {
            return Err(StorageError::DuplicateKey {
                table: "tickets",
                key: row.id.to_string(),
            });
        }
        if let Some(contract_id) = row.contract_id {
            if !t.contracts.contains_key(&contract_id) {
                return Err(StorageError::ForeignKeyViolation {
                    table: "tickets",
                    key: contract_id.to_string(),
                });
            }
        }
        t.tickets.insert(row.id, row);
        Ok(())
    }

    fn insert_trip_row(&self, ctx: &CallContext, row: TripRow) -> Result<(), StorageError> {
        ctx.ensure_live()?;
        row.validate()?;
        let mut t = self.lock()?;
        if t.trips.contains_key(&row.id) {
            return Err(StorageError::DuplicateKey {
                table: "trips",
                key: row.id.to_string(),
            });
        }
        if let Some(ticket_id) = row.ticket_id {
            t.ensure_ticket("trips", ticket_id)?;
        }
        t.trips.insert(row.id, row);
        Ok(())
    }

    fn insert_assignment_row(
        &self,
        ctx: &CallContext,
        row: TicketAssignmentRow,
    ) -> Result<(), StorageError> {
        ctx.ensure_live()?;
        let mut t = self.lock()?;
        if t.ticket_assignments.contains_key(&row.id) {
            return Err(StorageError::DuplicateKey {
                table: "ticket_assignments",
                key: row.id.to_string(),
            });
        }
        t.ensure_ticket("ticket_assignments", row.ticket_id)?;
        t.ticket_assignments.insert(row.id, row);
        Ok(())
    }

    fn insert_appeal_row(&self, ctx: &CallContext, row: AppealRow) -> Result<(), StorageError> {
        ctx.ensure_live()?;
        let mut t = self.lock()?;
        if t.appeals.contains_key(&row.id) {
            return Err(StorageError::DuplicateKey {
                table: "appeals",
                key: row.id.to_string(),
            });
        }
        t.ensure_ticket("appeals", row.ticket_id)?;
        t.appeals.insert(row.id, row);
        Ok(())
    }

    fn ticket_row(&self, ctx: &CallContext, ticket_id: TicketId) -> Result<TicketRow, StorageError> {
        ctx.ensure_live()?;
        self.lock()?
            .tickets
            .get(&ticket_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("tickets", ticket_id))
    }
}
