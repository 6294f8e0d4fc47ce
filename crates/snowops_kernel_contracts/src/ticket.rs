#![forbid(unsafe_code)]

//! Rows owned by the external ticket scheduler, the contract-scoped read models
//! built over them, and the cascading-delete impact of a contract.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::uuid_id;
use crate::{ContractId, ContractViolation, TicketId, TripId, UserId, Validate};

uuid_id!(CleaningAreaId, "cleaning_area_id");
uuid_id!(AssignmentId, "assignment_id");
uuid_id!(AppealId, "appeal_id");
uuid_id!(VehicleId, "vehicle_id");

pub const TICKET_STATUS_MAX_LEN: usize = 32;

fn validate_status(field: &'static str, status: &str) -> Result<(), ContractViolation> {
    if status.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if status.len() > TICKET_STATUS_MAX_LEN {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be <= 32 chars",
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRow {
    pub id: TicketId,
    pub contract_id: Option<ContractId>,
    pub cleaning_area_id: CleaningAreaId,
    pub planned_start_at: DateTime<Utc>,
    pub planned_end_at: DateTime<Utc>,
    pub status: String,
}

impl TicketRow {
    pub fn v1(
        id: TicketId,
        contract_id: Option<ContractId>,
        cleaning_area_id: CleaningAreaId,
        planned_start_at: DateTime<Utc>,
        planned_end_at: DateTime<Utc>,
        status: &str,
    ) -> Result<Self, ContractViolation> {
        let t = Self {
            id,
            contract_id,
            cleaning_area_id,
            planned_start_at,
            planned_end_at,
            status: status.trim().to_string(),
        };
        t.validate()?;
        Ok(t)
    }
}

impl Validate for TicketRow {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        self.cleaning_area_id.validate()?;
        if self.planned_end_at < self.planned_start_at {
            return Err(ContractViolation::InvalidWindow {
                field: "ticket.planned_end_at",
                after: "ticket.planned_start_at",
            });
        }
        validate_status("ticket.status", &self.status)
    }
}

/// One physical hauling event as detected upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripRow {
    pub id: TripId,
    pub ticket_id: Option<TicketId>,
    pub driver_id: Option<UserId>,
    pub vehicle_id: Option<VehicleId>,
    pub entry_at: DateTime<Utc>,
    pub exit_at: Option<DateTime<Utc>>,
    pub status: String,
    pub detected_volume_entry: Option<Decimal>,
    pub detected_volume_exit: Option<Decimal>,
}

impl Validate for TripRow {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        if let Some(exit) = self.exit_at {
            if exit < self.entry_at {
                return Err(ContractViolation::InvalidWindow {
                    field: "trip.exit_at",
                    after: "trip.entry_at",
                });
            }
        }
        validate_status("trip.status", &self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketAssignmentRow {
    pub id: AssignmentId,
    pub ticket_id: TicketId,
    pub driver_id: UserId,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppealRow {
    pub id: AppealId,
    pub ticket_id: TicketId,
    pub created_at: DateTime<Utc>,
}

/// A ticket bound to a contract, with its trip and assignment aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTicketSummary {
    pub id: TicketId,
    pub cleaning_area_id: CleaningAreaId,
    pub planned_start_at: DateTime<Utc>,
    pub planned_end_at: DateTime<Utc>,
    pub status: String,
    pub trip_count: u64,
    /// Sum of detected entry volumes; trips without a reading count as zero.
    pub total_volume_m3: Decimal,
    pub active_assignments: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCounts {
    pub tickets_count: u64,
    pub trips_count: u64,
    pub assignments_count: u64,
    pub appeals_count: u64,
    pub usage_log_count: u64,
    pub polygons_count: u64,
}

impl DependencyCounts {
    /// Only bound tickets block an unforced delete.
    pub fn blocks_unforced_delete(&self) -> bool {
        self.tickets_count > 0
    }

    pub fn will_be_deleted(&self) -> WillBeDeleted {
        WillBeDeleted {
            tickets: self.tickets_count > 0,
            trips: self.trips_count > 0,
            assignments: self.assignments_count > 0,
            appeals: self.appeals_count > 0,
            usage_log: self.usage_log_count > 0,
            polygons: self.polygons_count > 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WillBeDeleted {
    pub tickets: bool,
    pub trips: bool,
    pub assignments: bool,
    pub appeals: bool,
    pub usage_log: bool,
    pub polygons: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionImpact {
    pub contract_id: ContractId,
    pub contract_name: String,
    pub dependencies: DependencyCounts,
    pub will_be_deleted: WillBeDeleted,
}

impl DeletionImpact {
    pub fn new(contract_id: ContractId, contract_name: String, dependencies: DependencyCounts) -> Self {
        Self {
            contract_id,
            contract_name,
            will_be_deleted: dependencies.will_be_deleted(),
            dependencies,
        }
    }
}
