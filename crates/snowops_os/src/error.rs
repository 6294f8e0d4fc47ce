#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use snowops_kernel_contracts::access::AccessDenied;
use snowops_kernel_contracts::ContractViolation;
use snowops_storage::StorageError;

/// Stable, caller-facing error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    InvalidInput,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("permission denied: {0}")]
    PermissionDenied(#[from] AccessDenied),
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ContractViolation),
    #[error("conflict: {reason}")]
    Conflict { reason: String },
    #[error("internal error: {detail}")]
    Internal { detail: String },
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::NotFound { .. } => ErrorKind::NotFound,
            ServiceError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            ServiceError::InvalidInput(_) => ErrorKind::InvalidInput,
            ServiceError::Conflict { .. } => ErrorKind::Conflict,
            ServiceError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether repeating the whole call can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Internal)
    }
}

fn entity_of(table: &'static str) -> &'static str {
    match table {
        "tickets" => "ticket",
        "trips" => "trip",
        "trip_usage_log" => "trip usage",
        _ => "contract",
    }
}

/// Foreign keys from ticket children point at tickets; every other one points at a contract.
fn referenced_entity(table: &'static str) -> &'static str {
    match table {
        "trips" | "ticket_assignments" | "appeals" => "ticket",
        _ => "contract",
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { table, key } => ServiceError::NotFound {
                entity: entity_of(table),
                id: key,
            },
            StorageError::ForeignKeyViolation { table, key } => ServiceError::NotFound {
                entity: referenced_entity(table),
                id: key,
            },
            StorageError::DuplicateKey { table, key } => ServiceError::Conflict {
                reason: match table {
                    "trip_usage_log" => format!("trip {key} is already recorded"),
                    _ => format!("{table} already holds {key}"),
                },
            },
            err @ (StorageError::TicketAlreadyBound { .. }
            | StorageError::BlockedByDependents { .. }
            | StorageError::AppendOnlyViolation { .. }) => ServiceError::Conflict {
                reason: err.to_string(),
            },
            StorageError::ContractViolation(v) => ServiceError::InvalidInput(v),
            StorageError::CheckViolation { table } => {
                ServiceError::InvalidInput(ContractViolation::InvalidValue {
                    field: table,
                    reason: "row rejected by a check constraint",
                })
            }
            err @ (StorageError::Cancelled { .. } | StorageError::Backend { .. }) => {
                ServiceError::Internal {
                    detail: err.to_string(),
                }
            }
        }
    }
}
