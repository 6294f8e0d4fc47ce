#![forbid(unsafe_code)]

use snowops_kernel_contracts::ticket::DependencyCounts;
use snowops_kernel_contracts::{ContractId, ContractViolation, TicketId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("{table}: referenced row {key} does not exist")]
    ForeignKeyViolation { table: &'static str, key: String },
    #[error("{table}: duplicate key {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("{table} is append-only")]
    AppendOnlyViolation { table: &'static str },
    #[error("{table}: no row for {key}")]
    NotFound { table: &'static str, key: String },
    #[error("ticket {ticket_id} is already bound to contract {contract_id}")]
    TicketAlreadyBound {
        ticket_id: TicketId,
        contract_id: ContractId,
    },
    #[error("contract {contract_id} still has {} bound tickets", .counts.tickets_count)]
    BlockedByDependents {
        contract_id: ContractId,
        counts: DependencyCounts,
    },
    #[error("{table}: check constraint failed")]
    CheckViolation { table: &'static str },
    #[error("call abandoned: {reason}")]
    Cancelled { reason: &'static str },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
    #[error("storage backend: {detail}")]
    Backend { detail: String },
}

impl StorageError {
    pub(crate) fn not_found(table: &'static str, key: impl ToString) -> Self {
        StorageError::NotFound {
            table,
            key: key.to_string(),
        }
    }
}
