#![forbid(unsafe_code)]

use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion(pub u32);

/// Amounts (volumes, prices, budgets) carry at most this many fractional digits.
pub const AMOUNT_MAX_SCALE: u32 = 4;

/// Largest amount either store can hold: `i64::MAX` units of 10^-4.
pub fn amount_ceiling() -> Decimal {
    Decimal::new(i64::MAX, AMOUNT_MAX_SCALE)
}

fn check_ceiling(field: &'static str, value: Decimal) -> Result<(), ContractViolation> {
    if value > amount_ceiling() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "exceeds the storable amount range",
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContractViolation {
    #[error("{field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    #[error("{field}: must be > 0 (got {got})")]
    NotPositive { field: &'static str, got: Decimal },
    #[error("{field}: must be after {after}")]
    InvalidWindow {
        field: &'static str,
        after: &'static str,
    },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

pub(crate) fn validate_positive_amount(
    field: &'static str,
    value: Decimal,
) -> Result<(), ContractViolation> {
    if value <= Decimal::ZERO {
        return Err(ContractViolation::NotPositive { field, got: value });
    }
    if value.scale() > AMOUNT_MAX_SCALE {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must have at most 4 fractional digits",
        });
    }
    check_ceiling(field, value)
}

pub(crate) fn validate_non_negative_amount(
    field: &'static str,
    value: Decimal,
) -> Result<(), ContractViolation> {
    if value < Decimal::ZERO {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be >= 0",
        });
    }
    check_ceiling(field, value)
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            pub fn new(v: uuid::Uuid) -> Result<Self, $crate::common::ContractViolation> {
                let id = Self(v);
                $crate::common::Validate::validate(&id)?;
                Ok(id)
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl $crate::common::Validate for $name {
            fn validate(&self) -> Result<(), $crate::common::ContractViolation> {
                if self.0.is_nil() {
                    return Err($crate::common::ContractViolation::InvalidValue {
                        field: $field,
                        reason: "must not be nil",
                    });
                }
                Ok(())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::common::ContractViolation;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let v = uuid::Uuid::parse_str(s.trim()).map_err(|_| {
                    $crate::common::ContractViolation::InvalidValue {
                        field: $field,
                        reason: "must be a UUID",
                    }
                })?;
                Self::new(v)
            }
        }
    };
}

pub(crate) use uuid_id;

uuid_id!(ContractId, "contract_id");
uuid_id!(
    /// Any organization: authority, oversight body, contractor or landfill operator.
    OrganizationId,
    "organization_id"
);
uuid_id!(UserId, "user_id");
uuid_id!(TicketId, "ticket_id");
uuid_id!(TripId, "trip_id");
uuid_id!(
    /// Geographic region (polygon) served by a landfill contract.
    RegionId,
    "region_id"
);
