#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::common::{amount_ceiling, validate_non_negative_amount, validate_positive_amount};
use crate::{
    ContractId, ContractViolation, OrganizationId, RegionId, SchemaVersion, TicketId, TripId,
    Validate,
};

pub const CONTRACT_SCHEMA_VERSION: SchemaVersion = SchemaVersion(1);
pub const CONTRACT_NAME_MAX_LEN: usize = 255;
/// Recorded trip cost is rounded to currency minor units.
pub const MONEY_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractKind {
    ContractorService,
    LandfillService,
}

impl ContractKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractKind::ContractorService => "CONTRACTOR_SERVICE",
            ContractKind::LandfillService => "LANDFILL_SERVICE",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ContractViolation> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CONTRACTOR_SERVICE" => Ok(ContractKind::ContractorService),
            "LANDFILL_SERVICE" => Ok(ContractKind::LandfillService),
            _ => Err(ContractViolation::InvalidValue {
                field: "contract_type",
                reason: "must be CONTRACTOR_SERVICE or LANDFILL_SERVICE",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkType {
    Road,
    Sidewalk,
    Yard,
}

impl WorkType {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkType::Road => "road",
            WorkType::Sidewalk => "sidewalk",
            WorkType::Yard => "yard",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ContractViolation> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "road" => Ok(WorkType::Road),
            "sidewalk" => Ok(WorkType::Sidewalk),
            "yard" => Ok(WorkType::Yard),
            _ => Err(ContractViolation::InvalidValue {
                field: "work_type",
                reason: "must be road, sidewalk or yard",
            }),
        }
    }
}

/// Kind-specific part of a contract. Each variant carries exactly the references
/// its kind requires; [`ContractRecord`] is the flattened storage shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "contract_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractTerms {
    ContractorService {
        contractor_id: OrganizationId,
        work_type: WorkType,
    },
    LandfillService {
        landfill_id: OrganizationId,
        contractor_id: Option<OrganizationId>,
        work_type: Option<WorkType>,
        region_ids: BTreeSet<RegionId>,
    },
}

impl ContractTerms {
    /// Builds terms from the loose optional fields a caller submits, rejecting
    /// combinations the kind does not allow.
    pub fn from_parts(
        kind: ContractKind,
        contractor_id: Option<OrganizationId>,
        landfill_id: Option<OrganizationId>,
        work_type: Option<WorkType>,
        region_ids: impl IntoIterator<Item = RegionId>,
    ) -> Result<Self, ContractViolation> {
        let region_ids: BTreeSet<RegionId> = region_ids.into_iter().collect();
        let terms = match kind {
            ContractKind::ContractorService => {
                if landfill_id.is_some() {
                    return Err(ContractViolation::InvalidValue {
                        field: "contract_terms.landfill_id",
                        reason: "must be absent for CONTRACTOR_SERVICE",
                    });
                }
                if !region_ids.is_empty() {
                    return Err(ContractViolation::InvalidValue {
                        field: "contract_terms.region_ids",
                        reason: "must be empty for CONTRACTOR_SERVICE",
                    });
                }
                ContractTerms::ContractorService {
                    contractor_id: contractor_id.ok_or(ContractViolation::InvalidValue {
                        field: "contract_terms.contractor_id",
                        reason: "required for CONTRACTOR_SERVICE",
                    })?,
                    work_type: work_type.ok_or(ContractViolation::InvalidValue {
                        field: "contract_terms.work_type",
                        reason: "required for CONTRACTOR_SERVICE",
                    })?,
                }
            }
            ContractKind::LandfillService => ContractTerms::LandfillService {
                landfill_id: landfill_id.ok_or(ContractViolation::InvalidValue {
                    field: "contract_terms.landfill_id",
                    reason: "required for LANDFILL_SERVICE",
                })?,
                contractor_id,
                work_type,
                region_ids,
            },
        };
        terms.validate()?;
        Ok(terms)
    }

    pub fn kind(&self) -> ContractKind {
        match self {
            ContractTerms::ContractorService { .. } => ContractKind::ContractorService,
            ContractTerms::LandfillService { .. } => ContractKind::LandfillService,
        }
    }

    pub fn contractor_id(&self) -> Option<OrganizationId> {
        match self {
            ContractTerms::ContractorService { contractor_id, .. } => Some(*contractor_id),
            ContractTerms::LandfillService { contractor_id, .. } => *contractor_id,
        }
    }

    pub fn landfill_id(&self) -> Option<OrganizationId> {
        match self {
            ContractTerms::ContractorService { .. } => None,
            ContractTerms::LandfillService { landfill_id, .. } => Some(*landfill_id),
        }
    }

    pub fn work_type(&self) -> Option<WorkType> {
        match self {
            ContractTerms::ContractorService { work_type, .. } => Some(*work_type),
            ContractTerms::LandfillService { work_type, .. } => *work_type,
        }
    }

    pub fn region_ids(&self) -> Vec<RegionId> {
        match self {
            ContractTerms::ContractorService { .. } => Vec::new(),
            ContractTerms::LandfillService { region_ids, .. } => {
                region_ids.iter().copied().collect()
            }
        }
    }
}

impl Validate for ContractTerms {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            ContractTerms::ContractorService { contractor_id, .. } => contractor_id.validate(),
            ContractTerms::LandfillService {
                landfill_id,
                contractor_id,
                region_ids,
                ..
            } => {
                landfill_id.validate()?;
                if let Some(c) = contractor_id {
                    c.validate()?;
                }
                if region_ids.is_empty() {
                    return Err(ContractViolation::InvalidValue {
                        field: "contract_terms.region_ids",
                        reason: "must name at least one region for LANDFILL_SERVICE",
                    });
                }
                for r in region_ids {
                    r.validate()?;
                }
                Ok(())
            }
        }
    }
}

/// Validated creation input. The creating organization and identity are
/// attached later by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDraft {
    pub schema_version: SchemaVersion,
    pub terms: ContractTerms,
    pub name: String,
    pub price_per_m3: Decimal,
    pub budget_total: Decimal,
    pub minimal_volume_m3: Decimal,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub is_active: bool,
}

impl ContractDraft {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        terms: ContractTerms,
        name: &str,
        price_per_m3: Decimal,
        budget_total: Decimal,
        minimal_volume_m3: Decimal,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        is_active: Option<bool>,
    ) -> Result<Self, ContractViolation> {
        let d = Self {
            schema_version: CONTRACT_SCHEMA_VERSION,
            terms,
            name: name.trim().to_string(),
            price_per_m3,
            budget_total,
            minimal_volume_m3,
            start_at,
            end_at,
            is_active: is_active.unwrap_or(true),
        };
        d.validate()?;
        Ok(d)
    }
}

impl Validate for ContractDraft {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != CONTRACT_SCHEMA_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "contract_draft.schema_version",
                reason: "must match CONTRACT_SCHEMA_VERSION",
            });
        }
        self.terms.validate()?;
        validate_name("contract_draft.name", &self.name)?;
        validate_commercials(
            self.price_per_m3,
            self.budget_total,
            self.minimal_volume_m3,
            self.start_at,
            self.end_at,
        )
    }
}

fn validate_name(field: &'static str, name: &str) -> Result<(), ContractViolation> {
    if name.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if name.chars().count() > CONTRACT_NAME_MAX_LEN {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be <= 255 chars",
        });
    }
    Ok(())
}

fn validate_commercials(
    price_per_m3: Decimal,
    budget_total: Decimal,
    minimal_volume_m3: Decimal,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> Result<(), ContractViolation> {
    validate_positive_amount("contract.price_per_m3", price_per_m3)?;
    validate_positive_amount("contract.budget_total", budget_total)?;
    validate_positive_amount("contract.minimal_volume_m3", minimal_volume_m3)?;
    if end_at <= start_at {
        return Err(ContractViolation::InvalidWindow {
            field: "contract.end_at",
            after: "contract.start_at",
        });
    }
    Ok(())
}

/// Normalized contract row: one shape for both kinds, optional references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub id: ContractId,
    pub contract_type: ContractKind,
    pub contractor_id: Option<OrganizationId>,
    pub landfill_id: Option<OrganizationId>,
    pub created_by_org: OrganizationId,
    pub name: String,
    pub work_type: Option<WorkType>,
    pub price_per_m3: Decimal,
    pub budget_total: Decimal,
    pub minimal_volume_m3: Decimal,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Populated only for landfill contracts, and only when the read enriches rows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub region_ids: Vec<RegionId>,
}

impl ContractRecord {
    pub fn from_draft_v1(
        id: ContractId,
        created_by_org: OrganizationId,
        created_at: DateTime<Utc>,
        draft: ContractDraft,
    ) -> Result<Self, ContractViolation> {
        draft.validate()?;
        let r = Self {
            id,
            contract_type: draft.terms.kind(),
            contractor_id: draft.terms.contractor_id(),
            landfill_id: draft.terms.landfill_id(),
            created_by_org,
            name: draft.name,
            work_type: draft.terms.work_type(),
            price_per_m3: draft.price_per_m3,
            budget_total: draft.budget_total,
            minimal_volume_m3: draft.minimal_volume_m3,
            start_at: draft.start_at,
            end_at: draft.end_at,
            is_active: draft.is_active,
            created_at,
            region_ids: draft.terms.region_ids(),
        };
        r.validate()?;
        Ok(r)
    }

    pub fn is_landfill(&self) -> bool {
        self.contract_type == ContractKind::LandfillService
    }
}

impl Validate for ContractRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        self.created_by_org.validate()?;
        match self.contract_type {
            ContractKind::ContractorService => {
                if self.contractor_id.is_none() {
                    return Err(ContractViolation::InvalidValue {
                        field: "contract_record.contractor_id",
                        reason: "required for CONTRACTOR_SERVICE",
                    });
                }
                if self.landfill_id.is_some() || !self.region_ids.is_empty() {
                    return Err(ContractViolation::InvalidValue {
                        field: "contract_record.landfill_id",
                        reason: "must be absent for CONTRACTOR_SERVICE",
                    });
                }
            }
            ContractKind::LandfillService => {
                if self.landfill_id.is_none() {
                    return Err(ContractViolation::InvalidValue {
                        field: "contract_record.landfill_id",
                        reason: "required for LANDFILL_SERVICE",
                    });
                }
            }
        }
        validate_name("contract_record.name", &self.name)?;
        validate_commercials(
            self.price_per_m3,
            self.budget_total,
            self.minimal_volume_m3,
            self.start_at,
            self.end_at,
        )
    }
}

/// Running totals for one contract. Only ever grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractUsageRecord {
    pub contract_id: ContractId,
    pub total_volume_m3: Decimal,
    pub total_cost: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl ContractUsageRecord {
    pub fn zero(contract_id: ContractId, at: DateTime<Utc>) -> Self {
        Self {
            contract_id,
            total_volume_m3: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            updated_at: at,
        }
    }

    /// Adds one trip. On overflow the totals are left as they were.
    pub fn add_trip(&mut self, trip: &TripUsageRecord) -> Result<(), ContractViolation> {
        let total_volume_m3 = checked_total(
            "contract_usage.total_volume_m3",
            self.total_volume_m3,
            trip.recorded_volume_m3,
        )?;
        let total_cost =
            checked_total("contract_usage.total_cost", self.total_cost, trip.recorded_cost)?;
        self.total_volume_m3 = total_volume_m3;
        self.total_cost = total_cost;
        self.updated_at = trip.created_at;
        Ok(())
    }
}

fn checked_total(
    field: &'static str,
    total: Decimal,
    add: Decimal,
) -> Result<Decimal, ContractViolation> {
    total
        .checked_add(add)
        .filter(|sum| *sum <= amount_ceiling())
        .ok_or(ContractViolation::InvalidValue {
            field,
            reason: "total would exceed the storable amount range",
        })
}

impl Validate for ContractUsageRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.contract_id.validate()?;
        validate_non_negative_amount("contract_usage.total_volume_m3", self.total_volume_m3)?;
        validate_non_negative_amount("contract_usage.total_cost", self.total_cost)
    }
}

/// Append-only ledger entry; `trip_id` is the at-most-once key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripUsageRecord {
    pub trip_id: TripId,
    pub ticket_id: TicketId,
    pub contract_id: ContractId,
    pub recorded_volume_m3: Decimal,
    pub recorded_cost: Decimal,
    pub created_at: DateTime<Utc>,
}

impl TripUsageRecord {
    /// Prices the trip with the contract's current unit price.
    pub fn v1(
        trip_id: TripId,
        ticket_id: TicketId,
        contract_id: ContractId,
        recorded_volume_m3: Decimal,
        price_per_m3: Decimal,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ContractViolation> {
        validate_positive_amount("trip_usage.recorded_volume_m3", recorded_volume_m3)?;
        validate_positive_amount("trip_usage.price_per_m3", price_per_m3)?;
        let r = Self {
            trip_id,
            ticket_id,
            contract_id,
            recorded_volume_m3,
            recorded_cost: trip_cost(recorded_volume_m3, price_per_m3)?,
            created_at,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for TripUsageRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.trip_id.validate()?;
        self.ticket_id.validate()?;
        self.contract_id.validate()?;
        validate_positive_amount("trip_usage.recorded_volume_m3", self.recorded_volume_m3)?;
        validate_non_negative_amount("trip_usage.recorded_cost", self.recorded_cost)
    }
}

pub fn trip_cost(
    volume_m3: Decimal,
    price_per_m3: Decimal,
) -> Result<Decimal, ContractViolation> {
    volume_m3
        .checked_mul(price_per_m3)
        .map(|cost| {
            cost.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
        })
        .ok_or(ContractViolation::InvalidValue {
            field: "trip_usage.recorded_cost",
            reason: "volume times unit price overflows",
        })
}
