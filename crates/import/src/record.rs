use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use keel_ledger::{AccountKind, ContactInfo, PartnerKind};

/// Share of records that must classify as the other entity kind before
/// the whole batch is treated as a kind mismatch and aborted.
pub const KIND_MISMATCH_THRESHOLD: f64 = 0.8;

/// What a batch of raw records claims to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Account,
    Partner,
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EntityKind::Account => f.write_str("account"),
            EntityKind::Partner => f.write_str("partner"),
        }
    }
}

impl EntityKind {
    pub fn other(&self) -> EntityKind {
        match self {
            EntityKind::Account => EntityKind::Partner,
            EntityKind::Partner => EntityKind::Account,
        }
    }
}

/// One externally supplied record, as loose JSON fields.
pub type RawRecord = serde_json::Map<String, JsonValue>;

/// A validated account row.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    /// Signed functional-currency amount; positive debits the account.
    pub opening_balance: Option<f64>,
}

/// A validated partner row.
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerRecord {
    pub code: String,
    pub name: String,
    pub kind: PartnerKind,
    pub default_currency: Option<String>,
    pub contact: ContactInfo,
    /// Signed functional-currency amount; positive debits the partner.
    pub opening_balance: Option<f64>,
}

/// Outcome of the schema step: a strongly typed record.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedRecord {
    Account(AccountRecord),
    Partner(PartnerRecord),
}

impl TypedRecord {
    pub fn code(&self) -> &str {
        match self {
            TypedRecord::Account(r) => &r.code,
            TypedRecord::Partner(r) => &r.code,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TypedRecord::Account(r) => &r.name,
            TypedRecord::Partner(r) => &r.name,
        }
    }

    pub fn opening_balance(&self) -> Option<f64> {
        match self {
            TypedRecord::Account(r) => r.opening_balance,
            TypedRecord::Partner(r) => r.opening_balance,
        }
    }
}

fn required_str(raw: &RawRecord, field: &str, errors: &mut Vec<String>) -> Option<String> {
    match raw.get(field) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(JsonValue::String(_)) => {
            errors.push(format!("{field} must not be empty"));
            None
        }
        Some(_) => {
            errors.push(format!("{field} must be a string"));
            None
        }
        None => {
            errors.push(format!("{field} is required"));
            None
        }
    }
}

fn optional_str(raw: &RawRecord, field: &str, errors: &mut Vec<String>) -> Option<String> {
    match raw.get(field) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(JsonValue::String(_)) | Some(JsonValue::Null) | None => None,
        Some(_) => {
            errors.push(format!("{field} must be a string"));
            None
        }
    }
}

/// Optional numeric field. A present-but-non-numeric value is an error;
/// it is never silently coerced to 0. Absent means "no value", not 0.
fn optional_number(raw: &RawRecord, field: &str, errors: &mut Vec<String>) -> Option<f64> {
    match raw.get(field) {
        Some(JsonValue::Number(n)) => match n.as_f64() {
            Some(v) if v.is_finite() => Some(v),
            _ => {
                errors.push(format!("{field} is not a representable number"));
                None
            }
        },
        Some(JsonValue::Null) | None => None,
        Some(other) => {
            errors.push(format!("{field} must be a number, got {other}"));
            None
        }
    }
}

fn parse_kind<T: serde::de::DeserializeOwned>(
    raw: &RawRecord,
    entity: EntityKind,
    errors: &mut Vec<String>,
) -> Option<T> {
    match raw.get("kind") {
        Some(value @ JsonValue::String(s)) => match serde_json::from_value::<T>(value.clone()) {
            Ok(kind) => Some(kind),
            Err(_) => {
                errors.push(format!("kind '{s}' is not a valid {entity} kind"));
                None
            }
        },
        Some(_) => {
            errors.push("kind must be a string".to_string());
            None
        }
        None => {
            errors.push("kind is required".to_string());
            None
        }
    }
}

/// Validate one raw record against the declared entity kind's schema.
///
/// Returns the typed record, or the full list of per-field problems.
pub fn validate_record(kind: EntityKind, raw: &RawRecord) -> Result<TypedRecord, Vec<String>> {
    let mut errors = Vec::new();

    let code = required_str(raw, "code", &mut errors);
    let name = required_str(raw, "name", &mut errors);
    let opening_balance = optional_number(raw, "opening_balance", &mut errors);

    let typed = match kind {
        EntityKind::Account => {
            let parsed = parse_kind::<AccountKind>(raw, kind, &mut errors);
            match (code, name, parsed) {
                (Some(code), Some(name), Some(account_kind)) => Some(TypedRecord::Account(AccountRecord {
                    code,
                    name,
                    kind: account_kind,
                    opening_balance,
                })),
                _ => None,
            }
        }
        EntityKind::Partner => {
            let parsed = parse_kind::<PartnerKind>(raw, kind, &mut errors);
            let default_currency = optional_str(raw, "default_currency", &mut errors);
            let contact = ContactInfo {
                email: optional_str(raw, "email", &mut errors),
                phone: optional_str(raw, "phone", &mut errors),
                address: optional_str(raw, "address", &mut errors),
            };
            match (code, name, parsed) {
                (Some(code), Some(name), Some(partner_kind)) => Some(TypedRecord::Partner(PartnerRecord {
                    code,
                    name,
                    kind: partner_kind,
                    default_currency,
                    contact,
                    opening_balance,
                })),
                _ => None,
            }
        }
    };

    match typed {
        Some(record) if errors.is_empty() => Ok(record),
        _ => Err(errors),
    }
}

fn classifies_as(kind: EntityKind, raw: &RawRecord) -> bool {
    let Some(value) = raw.get("kind") else {
        return false;
    };
    match kind {
        EntityKind::Account => serde_json::from_value::<AccountKind>(value.clone()).is_ok(),
        EntityKind::Partner => serde_json::from_value::<PartnerKind>(value.clone()).is_ok(),
    }
}

/// Whole-batch heuristic: does this batch look like it was exported for
/// the other entity kind? Returns the offending share when it crosses
/// `KIND_MISMATCH_THRESHOLD`.
pub fn detect_kind_mismatch(declared: EntityKind, records: &[RawRecord]) -> Option<f64> {
    if records.is_empty() {
        return None;
    }
    let other = declared.other();
    let misfits = records
        .iter()
        .filter(|r| classifies_as(other, r) && !classifies_as(declared, r))
        .count();
    let share = misfits as f64 / records.len() as f64;
    (share >= KIND_MISMATCH_THRESHOLD).then_some(share)
}
