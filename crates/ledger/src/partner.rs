use serde::{Deserialize, Serialize};

use keel_core::{PartnerId, TenantId};

/// Partner kind.
///
/// Every kind behaves as a debit-normal ledger account. The sign of the
/// projected balance is overloaded per kind: for customer-side partners
/// positive means "owed to us"; for supplier-side partners positive
/// means an advance and negative an outstanding payable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerKind {
    Customer,
    Supplier,
    SubSupplier,
    Vendor,
    ClearingAgent,
    FreightForwarder,
    CommissionAgent,
}

impl PartnerKind {
    /// Customer-side partners owe us; everyone else is supplier-side.
    pub fn customer_side(&self) -> bool {
        matches!(self, PartnerKind::Customer)
    }
}

/// Contact information for a partner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// A trading partner (customer, supplier, agent, ...).
///
/// Its id doubles as a ledger account id in entries referencing it
/// (`AccountRef::Partner`). Like `Account`, it carries no balance field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    pub id: PartnerId,
    /// Natural key within a tenant, e.g. "CUST-007".
    pub code: String,
    pub name: String,
    pub kind: PartnerKind,
    pub default_currency: Option<String>,
    pub contact: ContactInfo,
    pub tenant_id: TenantId,
}

impl Partner {
    pub fn new(
        tenant_id: TenantId,
        code: impl Into<String>,
        name: impl Into<String>,
        kind: PartnerKind,
    ) -> Self {
        Self {
            id: PartnerId::new(),
            code: code.into(),
            name: name.into(),
            kind,
            default_currency: None,
            contact: ContactInfo::default(),
            tenant_id,
        }
    }

    /// Re-originate this partner in another tenant with a fresh id and
    /// no entry history (projected balance starts at zero).
    pub fn copy_to_tenant(&self, target: TenantId) -> Partner {
        Partner {
            id: PartnerId::new(),
            code: self.code.clone(),
            name: self.name.clone(),
            kind: self.kind,
            default_currency: self.default_currency.clone(),
            contact: self.contact.clone(),
            tenant_id: target,
        }
    }
}
