#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contract::{ContractKind, ContractRecord, WorkType};
use crate::rollup::{derive_status, ContractStatus};
use crate::OrganizationId;

/// Caller-facing list filter. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractListFilter {
    pub contractor_id: Option<OrganizationId>,
    pub landfill_id: Option<OrganizationId>,
    pub contract_type: Option<ContractKind>,
    pub created_by_org: Option<OrganizationId>,
    pub work_type: Option<WorkType>,
    /// Ignored when `status` is set.
    pub only_active: bool,
    pub status: Option<ContractStatus>,
    pub start_from: Option<DateTime<Utc>>,
    pub start_to: Option<DateTime<Utc>>,
    pub end_from: Option<DateTime<Utc>>,
    pub end_to: Option<DateTime<Utc>>,
}

/// Store-level query: a scoped filter, the clock reading used for status
/// filtering, and whether rows should be enriched with usage and regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractQuery {
    pub filter: ContractListFilter,
    pub include_usage: bool,
    pub now: DateTime<Utc>,
}

impl ContractQuery {
    pub fn new(mut filter: ContractListFilter, include_usage: bool, now: DateTime<Utc>) -> Self {
        if filter.status.is_some() {
            filter.only_active = false;
        }
        Self {
            filter,
            include_usage,
            now,
        }
    }

    pub fn matches(&self, c: &ContractRecord) -> bool {
        let f = &self.filter;
        if f.contractor_id.is_some() && c.contractor_id != f.contractor_id {
            return false;
        }
        if f.landfill_id.is_some() && c.landfill_id != f.landfill_id {
            return false;
        }
        if let Some(kind) = f.contract_type {
            if c.contract_type != kind {
                return false;
            }
        }
        if let Some(org) = f.created_by_org {
            if c.created_by_org != org {
                return false;
            }
        }
        if f.work_type.is_some() && c.work_type != f.work_type {
            return false;
        }
        if f.only_active && !c.is_active {
            return false;
        }
        if let Some(status) = f.status {
            if derive_status(c.is_active, c.start_at, c.end_at, self.now) != status {
                return false;
            }
        }
        within(c.start_at, f.start_from, f.start_to) && within(c.end_at, f.end_from, f.end_to)
    }
}

fn within(v: DateTime<Utc>, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
    from.map_or(true, |f| v >= f) && to.map_or(true, |t| v <= t)
}
