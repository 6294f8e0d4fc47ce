#![forbid(unsafe_code)]

//! Read-time derivation of lifecycle status and financial/volume rollups.
//!
//! Nothing here is persisted: a [`ContractView`] is rebuilt on every read from
//! the stored row, its usage totals and the caller's clock.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::contract::{ContractRecord, ContractUsageRecord};
use crate::ContractViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Planned,
    Active,
    Expired,
    Archived,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractStatus::Planned => "PLANNED",
            ContractStatus::Active => "ACTIVE",
            ContractStatus::Expired => "EXPIRED",
            ContractStatus::Archived => "ARCHIVED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ContractViolation> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PLANNED" => Ok(ContractStatus::Planned),
            "ACTIVE" => Ok(ContractStatus::Active),
            "EXPIRED" => Ok(ContractStatus::Expired),
            "ARCHIVED" => Ok(ContractStatus::Archived),
            _ => Err(ContractViolation::InvalidValue {
                field: "status",
                reason: "must be PLANNED, ACTIVE, EXPIRED or ARCHIVED",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractResult {
    None,
    Success,
    Fail,
}

/// First match wins: archived, planned, expired, active.
pub fn derive_status(
    is_active: bool,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ContractStatus {
    if !is_active {
        return ContractStatus::Archived;
    }
    if now < start_at {
        return ContractStatus::Planned;
    }
    if now > end_at {
        return ContractStatus::Expired;
    }
    ContractStatus::Active
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRollup {
    pub status: ContractStatus,
    pub payable_amount: Decimal,
    pub budget_exceeded: bool,
    /// `None` only when the minimal volume is zero, which creation forbids.
    pub volume_progress: Option<Decimal>,
    pub result: ContractResult,
}

/// Budget and volume are judged independently: an over-budget contract that
/// met its volume still reports `SUCCESS`.
pub fn derive_rollup(
    contract: &ContractRecord,
    usage: Option<&ContractUsageRecord>,
    now: DateTime<Utc>,
) -> ContractRollup {
    let status = derive_status(contract.is_active, contract.start_at, contract.end_at, now);
    let (volume, cost) = usage
        .map(|u| (u.total_volume_m3, u.total_cost))
        .unwrap_or((Decimal::ZERO, Decimal::ZERO));

    let volume_progress = if contract.minimal_volume_m3 > Decimal::ZERO {
        volume.checked_div(contract.minimal_volume_m3)
    } else {
        None
    };

    let result = match status {
        ContractStatus::Expired if volume >= contract.minimal_volume_m3 => ContractResult::Success,
        ContractStatus::Expired => ContractResult::Fail,
        ContractStatus::Planned | ContractStatus::Active | ContractStatus::Archived => {
            ContractResult::None
        }
    };

    ContractRollup {
        status,
        payable_amount: cost.min(contract.budget_total),
        budget_exceeded: cost > contract.budget_total,
        volume_progress,
        result,
    }
}

/// A contract as returned to callers: stored row, usage (zero when absent) and
/// the derived rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractView {
    pub contract: ContractRecord,
    pub usage: ContractUsageRecord,
    pub rollup: ContractRollup,
}

impl ContractView {
    pub fn build(
        contract: ContractRecord,
        usage: Option<ContractUsageRecord>,
        now: DateTime<Utc>,
    ) -> Self {
        let rollup = derive_rollup(&contract, usage.as_ref(), now);
        let usage =
            usage.unwrap_or_else(|| ContractUsageRecord::zero(contract.id, contract.created_at));
        Self {
            contract,
            usage,
            rollup,
        }
    }
}
