#![forbid(unsafe_code)]

pub mod access;
pub mod common;
pub mod contract;
pub mod filter;
pub mod rollup;
pub mod ticket;

pub use common::{
    ContractId, ContractViolation, OrganizationId, RegionId, SchemaVersion, TicketId, TripId,
    UserId, Validate,
};
