#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use snowops_kernel_contracts::access::{self, AccessDenied, Principal};
use snowops_kernel_contracts::contract::{
    ContractDraft, ContractKind, ContractRecord, ContractTerms, ContractUsageRecord,
    TripUsageRecord, WorkType,
};
use snowops_kernel_contracts::filter::{ContractListFilter, ContractQuery};
use snowops_kernel_contracts::rollup::ContractView;
use snowops_kernel_contracts::ticket::{
    ContractTicketSummary, DeletionImpact, DependencyCounts, TripRow,
};
use snowops_kernel_contracts::{
    ContractId, ContractViolation, OrganizationId, RegionId, TicketId, TripId,
};
use snowops_storage::repo::{BindOutcome, ContractRepo, StoredContract};
use snowops_storage::CallContext;

use crate::clock::Clock;
use crate::error::ServiceError;

/// Loose creation request as a presentation layer would hand it over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateContractInput {
    pub contract_type: ContractKind,
    #[serde(default)]
    pub contractor_id: Option<OrganizationId>,
    #[serde(default)]
    pub landfill_id: Option<OrganizationId>,
    pub name: String,
    #[serde(default)]
    pub work_type: Option<WorkType>,
    pub price_per_m3: Decimal,
    pub budget_total: Decimal,
    pub minimal_volume_m3: Decimal,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub region_ids: Vec<RegionId>,
}

impl CreateContractInput {
    fn into_draft(self) -> Result<ContractDraft, ContractViolation> {
        let terms = ContractTerms::from_parts(
            self.contract_type,
            self.contractor_id,
            self.landfill_id,
            self.work_type,
            self.region_ids,
        )?;
        ContractDraft::v1(
            terms,
            &self.name,
            self.price_per_m3,
            self.budget_total,
            self.minimal_volume_m3,
            self.start_at,
            self.end_at,
            self.is_active,
        )
    }
}

/// Ledger entry written for one trip plus the contract totals right after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedTrip {
    pub entry: TripUsageRecord,
    pub usage: ContractUsageRecord,
}

fn denied(principal: &Principal, err: AccessDenied) -> ServiceError {
    warn!(
        role = principal.role.as_str(),
        organization_id = %principal.organization_id,
        error = %err,
        "contract access denied"
    );
    ServiceError::PermissionDenied(err)
}

fn conflict_logged(err: ServiceError, what: &'static str) -> ServiceError {
    if let ServiceError::Conflict { reason } = &err {
        warn!(reason = %reason, "{what} rejected");
    }
    err
}

/// Entry points for contract operations. Every call checks policy before it
/// touches the store and derives rollups at read time from the injected clock.
pub struct ContractService<R, C> {
    repo: R,
    clock: C,
}

impl<R, C> ContractService<R, C>
where
    R: ContractRepo,
    C: Clock,
{
    pub fn new(repo: R, clock: C) -> Self {
        Self { repo, clock }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn view(&self, stored: StoredContract) -> ContractView {
        ContractView::build(stored.record, stored.usage, self.clock.now())
    }

    /// Fetches a contract and checks the caller may see it.
    fn readable(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        contract_id: ContractId,
    ) -> Result<StoredContract, ServiceError> {
        let stored = self.repo.contract_row(ctx, contract_id)?;
        access::ensure_read(principal, &stored.record).map_err(|e| denied(principal, e))?;
        Ok(stored)
    }

    pub fn list(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        filter: ContractListFilter,
    ) -> Result<Vec<ContractView>, ServiceError> {
        let filter =
            access::scope_list_filter(principal, filter).map_err(|e| denied(principal, e))?;
        let now = self.clock.now();
        let rows = self
            .repo
            .contract_rows(ctx, &ContractQuery::new(filter, true, now))?;
        debug!(
            role = principal.role.as_str(),
            count = rows.len(),
            "contracts listed"
        );
        Ok(rows
            .into_iter()
            .map(|s| ContractView::build(s.record, s.usage, now))
            .collect())
    }

    pub fn get(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        contract_id: ContractId,
    ) -> Result<ContractView, ServiceError> {
        let stored = self.readable(ctx, principal, contract_id)?;
        debug!(contract_id = %contract_id, "contract read");
        Ok(self.view(stored))
    }

    pub fn create(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        input: CreateContractInput,
    ) -> Result<ContractView, ServiceError> {
        access::ensure_create(principal).map_err(|e| denied(principal, e))?;
        let draft = input.into_draft()?;
        let now = self.clock.now();
        let record = ContractRecord::from_draft_v1(
            ContractId::generate(),
            principal.organization_id,
            now,
            draft,
        )?;
        self.repo.insert_contract_row(ctx, record.clone())?;
        info!(
            contract_id = %record.id,
            contract_type = record.contract_type.as_str(),
            created_by_org = %record.created_by_org,
            "contract created"
        );
        let usage = ContractUsageRecord::zero(record.id, now);
        Ok(ContractView::build(record, Some(usage), now))
    }

    /// Removes a contract. Unforced deletes are refused while tickets are bound.
    pub fn delete(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        contract_id: ContractId,
        force: bool,
    ) -> Result<DependencyCounts, ServiceError> {
        access::ensure_delete(principal).map_err(|e| denied(principal, e))?;
        let removed = self
            .repo
            .delete_contract_row(ctx, contract_id, force)
            .map_err(|e| conflict_logged(e.into(), "contract delete"))?;
        info!(
            contract_id = %contract_id,
            force,
            tickets = removed.tickets_count,
            usage_log = removed.usage_log_count,
            "contract deleted"
        );
        Ok(removed)
    }

    pub fn get_deletion_impact(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        contract_id: ContractId,
    ) -> Result<DeletionImpact, ServiceError> {
        access::ensure_delete(principal).map_err(|e| denied(principal, e))?;
        let stored = self.repo.contract_row(ctx, contract_id)?;
        let counts = self.repo.dependency_counts(ctx, contract_id)?;
        debug!(contract_id = %contract_id, tickets = counts.tickets_count, "deletion impact computed");
        Ok(DeletionImpact::new(contract_id, stored.record.name, counts))
    }

    pub fn bind_ticket_to_contract(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        ticket_id: TicketId,
        contract_id: ContractId,
    ) -> Result<BindOutcome, ServiceError> {
        if !principal.has(access::Capability::BindTicket) {
            return Err(denied(
                principal,
                AccessDenied {
                    operation: "bind tickets",
                    role: principal.role,
                },
            ));
        }
        let stored = self.repo.contract_row(ctx, contract_id)?;
        access::ensure_bind(principal, &stored.record).map_err(|e| denied(principal, e))?;
        let outcome = self
            .repo
            .bind_ticket_contract(ctx, ticket_id, contract_id)
            .map_err(|e| conflict_logged(e.into(), "ticket bind"))?;
        info!(
            ticket_id = %ticket_id,
            contract_id = %contract_id,
            outcome = ?outcome,
            "ticket bound"
        );
        Ok(outcome)
    }

    /// Records one trip against the contract its ticket is bound to. A trip is
    /// counted at most once; a replay fails with a conflict.
    pub fn record_trip_usage(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        trip_id: TripId,
        ticket_id: TicketId,
        volume_m3: Decimal,
    ) -> Result<RecordedTrip, ServiceError> {
        access::ensure_record_usage(principal).map_err(|e| denied(principal, e))?;
        if volume_m3 <= Decimal::ZERO {
            return Err(ContractViolation::NotPositive {
                field: "trip_usage.recorded_volume_m3",
                got: volume_m3,
            }
            .into());
        }
        let contract_id = self.repo.ticket_contract_ref(ctx, ticket_id)?.ok_or(
            ContractViolation::InvalidValue {
                field: "ticket.contract_id",
                reason: "ticket is not bound to a contract",
            },
        )?;
        let contract = self.repo.contract_row(ctx, contract_id)?.record;
        let entry = TripUsageRecord::v1(
            trip_id,
            ticket_id,
            contract.id,
            volume_m3,
            contract.price_per_m3,
            self.clock.now(),
        )?;
        let usage = self
            .repo
            .append_trip_usage_row(ctx, entry.clone())
            .map_err(|e| conflict_logged(e.into(), "trip usage"))?;
        info!(
            trip_id = %trip_id,
            ticket_id = %ticket_id,
            contract_id = %contract.id,
            volume_m3 = %entry.recorded_volume_m3,
            cost = %entry.recorded_cost,
            "trip usage recorded"
        );
        Ok(RecordedTrip { entry, usage })
    }

    pub fn list_tickets_for_contract(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        contract_id: ContractId,
    ) -> Result<Vec<ContractTicketSummary>, ServiceError> {
        self.readable(ctx, principal, contract_id)?;
        let rows = self.repo.contract_ticket_rows(ctx, contract_id)?;
        debug!(contract_id = %contract_id, count = rows.len(), "contract tickets listed");
        Ok(rows)
    }

    pub fn list_trips_for_contract(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        contract_id: ContractId,
    ) -> Result<Vec<TripRow>, ServiceError> {
        self.readable(ctx, principal, contract_id)?;
        let rows = self.repo.contract_trip_rows(ctx, contract_id)?;
        debug!(contract_id = %contract_id, count = rows.len(), "contract trips listed");
        Ok(rows)
    }
}
