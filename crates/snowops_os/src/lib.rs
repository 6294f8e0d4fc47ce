#![forbid(unsafe_code)]

pub mod clock;
pub mod contract_service;
pub mod error;

pub use clock::{Clock, FixedClock, SystemClock};
pub use contract_service::{ContractService, CreateContractInput, RecordedTrip};
pub use error::{ErrorKind, ServiceError};
