#![forbid(unsafe_code)]

//! Role grants over contracts.
//!
//! Every check is a pure function of the caller's [`Principal`] and, where the
//! rule is organization-scoped, the contract row. An unrecognized role holds no
//! grants, so every operation is refused with [`AccessDenied`] rather than
//! yielding an empty result.

use serde::{Deserialize, Serialize};

use crate::contract::ContractRecord;
use crate::filter::ContractListFilter;
use crate::{OrganizationId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    /// Oversight body (akimat): reads everything, may record usage.
    AkimatAdmin,
    /// Contract authority (KGU ZKH): creates, binds, records, deletes.
    KguZkhAdmin,
    ContractorAdmin,
    LandfillAdmin,
    TooAdmin,
    Driver,
    Unrecognized,
}

impl UserRole {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AKIMAT_ADMIN" => UserRole::AkimatAdmin,
            "KGU_ZKH_ADMIN" => UserRole::KguZkhAdmin,
            "CONTRACTOR_ADMIN" => UserRole::ContractorAdmin,
            "LANDFILL_ADMIN" => UserRole::LandfillAdmin,
            "TOO_ADMIN" => UserRole::TooAdmin,
            "DRIVER" => UserRole::Driver,
            _ => UserRole::Unrecognized,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::AkimatAdmin => "AKIMAT_ADMIN",
            UserRole::KguZkhAdmin => "KGU_ZKH_ADMIN",
            UserRole::ContractorAdmin => "CONTRACTOR_ADMIN",
            UserRole::LandfillAdmin => "LANDFILL_ADMIN",
            UserRole::TooAdmin => "TOO_ADMIN",
            UserRole::Driver => "DRIVER",
            UserRole::Unrecognized => "UNRECOGNIZED",
        }
    }

    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            UserRole::KguZkhAdmin => &[
                Capability::CreateContract,
                Capability::ReadAll,
                Capability::BindTicket,
                Capability::RecordUsage,
                Capability::DeleteContract,
            ],
            UserRole::AkimatAdmin => &[Capability::ReadAll, Capability::RecordUsage],
            UserRole::ContractorAdmin | UserRole::LandfillAdmin => &[Capability::ReadOwnOnly],
            UserRole::TooAdmin | UserRole::Driver | UserRole::Unrecognized => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    CreateContract,
    ReadAll,
    ReadOwnOnly,
    BindTicket,
    RecordUsage,
    DeleteContract,
}

/// Authenticated caller, attached to every operation by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    pub role: UserRole,
}

impl Principal {
    pub fn new(user_id: UserId, organization_id: OrganizationId, role: UserRole) -> Self {
        Self {
            user_id,
            organization_id,
            role,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.role.capabilities().contains(&capability)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{} may not {operation}", .role.as_str())]
pub struct AccessDenied {
    pub operation: &'static str,
    pub role: UserRole,
}

/// Which contracts a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadScope {
    All,
    NamedContractor(OrganizationId),
    NamedLandfill(OrganizationId),
}

impl ReadScope {
    pub fn admits(&self, contract: &ContractRecord) -> bool {
        match self {
            ReadScope::All => true,
            ReadScope::NamedContractor(org) => contract.contractor_id == Some(*org),
            ReadScope::NamedLandfill(org) => contract.landfill_id == Some(*org),
        }
    }
}

fn deny(operation: &'static str, principal: &Principal) -> AccessDenied {
    AccessDenied {
        operation,
        role: principal.role,
    }
}

fn require(
    principal: &Principal,
    capability: Capability,
    operation: &'static str,
) -> Result<(), AccessDenied> {
    if principal.has(capability) {
        Ok(())
    } else {
        Err(deny(operation, principal))
    }
}

pub fn read_scope(principal: &Principal) -> Result<ReadScope, AccessDenied> {
    if principal.has(Capability::ReadAll) {
        return Ok(ReadScope::All);
    }
    if principal.has(Capability::ReadOwnOnly) {
        match principal.role {
            UserRole::ContractorAdmin => {
                return Ok(ReadScope::NamedContractor(principal.organization_id))
            }
            UserRole::LandfillAdmin => {
                return Ok(ReadScope::NamedLandfill(principal.organization_id))
            }
            _ => {}
        }
    }
    Err(deny("read contracts", principal))
}

/// Narrows a requested list filter to the caller's scope. Scoped callers are
/// pinned to their own organization whatever they asked for.
pub fn scope_list_filter(
    principal: &Principal,
    mut requested: ContractListFilter,
) -> Result<ContractListFilter, AccessDenied> {
    match read_scope(principal)? {
        ReadScope::All => {}
        ReadScope::NamedContractor(org) => {
            requested.contractor_id = Some(org);
        }
        ReadScope::NamedLandfill(org) => {
            requested.landfill_id = Some(org);
        }
    }
    Ok(requested)
}

pub fn ensure_read(principal: &Principal, contract: &ContractRecord) -> Result<(), AccessDenied> {
    if read_scope(principal)?.admits(contract) {
        Ok(())
    } else {
        Err(deny("read this contract", principal))
    }
}

pub fn ensure_create(principal: &Principal) -> Result<(), AccessDenied> {
    require(principal, Capability::CreateContract, "create contracts")
}

/// Binding is limited to contracts the caller's own organization created.
pub fn ensure_bind(principal: &Principal, contract: &ContractRecord) -> Result<(), AccessDenied> {
    require(principal, Capability::BindTicket, "bind tickets")?;
    if contract.created_by_org != principal.organization_id {
        return Err(deny("bind tickets to another organization's contract", principal));
    }
    Ok(())
}

pub fn ensure_record_usage(principal: &Principal) -> Result<(), AccessDenied> {
    require(principal, Capability::RecordUsage, "record trip usage")
}

pub fn ensure_delete(principal: &Principal) -> Result<(), AccessDenied> {
    require(principal, Capability::DeleteContract, "delete contracts")
}
