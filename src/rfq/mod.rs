//! RFQ document model and ordered snapshots.
//!
//! Documents arrive from the marketplace as loosely-typed JSON: statuses in
//! any case, balances as numbers or strings, settlement steps as an open map
//! of step name to step data. Everything is normalised here on ingest so the
//! differ and the coordinator only ever see one shape.

pub mod display;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::warn;

pub const STEP_ACCEPTED_QUOTE: &str = "accepted_quote";
pub const STEP_ESCROW_PAYMENT: &str = "escrow_payment";
pub const STEP_EXIT_PROPOSAL: &str = "exit_proposal";
pub const STEP_WITHDRAWAL_RECIPIENT_SETTLEMENT: &str = "withdrawal_recipient_settlement";
pub const STEP_ESCROW_RELEASED: &str = "escrow_released";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RfqStatus {
    Active,
    Finished,
    Rejected,
    Expired,
    Failed,
}

impl RfqStatus {
    pub const ALL: [RfqStatus; 5] = [
        RfqStatus::Active,
        RfqStatus::Finished,
        RfqStatus::Rejected,
        RfqStatus::Expired,
        RfqStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RfqStatus::Active => "active",
            RfqStatus::Finished => "finished",
            RfqStatus::Rejected => "rejected",
            RfqStatus::Expired => "expired",
            RfqStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RfqStatus::Active)
    }
}

impl std::fmt::Display for RfqStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown RFQ status '{0}'")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for RfqStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(RfqStatus::Active),
            "finished" => Ok(RfqStatus::Finished),
            "rejected" => Ok(RfqStatus::Rejected),
            "expired" => Ok(RfqStatus::Expired),
            "failed" => Ok(RfqStatus::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

impl Serialize for RfqStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RfqStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One validator offered in an RFQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorRef {
    #[serde(deserialize_with = "de_u64_flexible")]
    pub validator_index: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestQuote {
    pub quote: Decimal,
    pub quote_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementStep {
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl SettlementStep {
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowVault {
    pub vault_address: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfqDocument {
    pub id: String,
    pub status: RfqStatus,
    #[serde(default, deserialize_with = "de_null_as_default")]
    pub validators: Vec<ValidatorRef>,
    #[serde(default, deserialize_with = "de_null_as_default")]
    pub total_balance: Decimal,
    #[serde(default, deserialize_with = "de_best_quote")]
    pub best_quote: Option<BestQuote>,
    /// Step name to step data. Ordered by name.
    #[serde(default, deserialize_with = "de_null_as_default")]
    pub settlement_steps: BTreeMap<String, SettlementStep>,
    #[serde(default)]
    pub unique_escrow_vault: Option<EscrowVault>,
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    pub estimated_all_validators_exited_at: Option<String>,
}

impl RfqDocument {
    pub fn is_active(&self) -> bool {
        self.status == RfqStatus::Active
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.settlement_steps.contains_key(name)
    }

    pub fn step(&self, name: &str) -> Option<&SettlementStep> {
        self.settlement_steps.get(name)
    }

    pub fn quote_id(&self) -> Option<&str> {
        self.best_quote.as_ref().and_then(|q| q.quote_id.as_deref())
    }

    pub fn vault_address(&self) -> Option<&str> {
        self.unique_escrow_vault
            .as_ref()
            .map(|v| v.vault_address.as_str())
            .filter(|a| !a.is_empty())
    }
}

// ─── Deserialisation helpers ────────────────────────────────────────────────

fn de_null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn de_opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn de_u64_flexible<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid index {n}"))),
        serde_json::Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected validator index, got {other}"
        ))),
    }
}

#[derive(Deserialize)]
struct RawBestQuote {
    #[serde(default)]
    quote: Option<Decimal>,
    #[serde(default)]
    quote_id: Option<String>,
}

/// A `best_quote` object without an amount is the same as no quote.
fn de_best_quote<'de, D>(deserializer: D) -> Result<Option<BestQuote>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawBestQuote>::deserialize(deserializer)?;
    Ok(raw.and_then(|r| {
        r.quote.map(|quote| BestQuote {
            quote,
            quote_id: r.quote_id.filter(|id| !id.is_empty()),
        })
    }))
}

// ─── Snapshot ───────────────────────────────────────────────────────────────

/// Documents captured at one poll tick, active ones first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    documents: Vec<RfqDocument>,
}

impl Snapshot {
    /// Orders documents active-first, keeping store order within each group.
    /// Repeated ids keep their first occurrence.
    pub fn from_documents(documents: Vec<RfqDocument>) -> Self {
        let mut seen = HashSet::with_capacity(documents.len());
        let mut unique = Vec::with_capacity(documents.len());
        for doc in documents {
            if seen.insert(doc.id.clone()) {
                unique.push(doc);
            } else {
                warn!(rfq = %doc.id, "duplicate RFQ id in store response, keeping first");
            }
        }
        // sort_by_key is stable
        unique.sort_by_key(|d| !d.is_active());
        Self { documents: unique }
    }

    pub fn documents(&self) -> &[RfqDocument] {
        &self.documents
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RfqDocument> {
        self.documents.iter()
    }

    pub fn active(&self) -> impl Iterator<Item = &RfqDocument> {
        self.documents.iter().filter(|d| d.is_active())
    }

    pub fn get(&self, id: &str) -> Option<&RfqDocument> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Lifecycle regressions between `previous` and this snapshot.
    pub fn regressions(&self, previous: &Snapshot) -> Vec<Regression> {
        let before: HashMap<&str, &RfqDocument> =
            previous.iter().map(|d| (d.id.as_str(), d)).collect();
        let mut out = Vec::new();

        for doc in &self.documents {
            let Some(old) = before.get(doc.id.as_str()) else {
                continue;
            };
            if old.status.is_terminal() && doc.is_active() {
                out.push(Regression::Reactivated {
                    rfq_id: doc.id.clone(),
                    from: old.status,
                });
            }
            let removed: Vec<String> = old
                .settlement_steps
                .keys()
                .filter(|k| !doc.settlement_steps.contains_key(*k))
                .cloned()
                .collect();
            if !removed.is_empty() {
                out.push(Regression::StepsRemoved {
                    rfq_id: doc.id.clone(),
                    steps: removed,
                });
            }
        }
        out
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a RfqDocument;
    type IntoIter = std::slice::Iter<'a, RfqDocument>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

/// A document moved backwards in its lifecycle between two polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Regression {
    Reactivated { rfq_id: String, from: RfqStatus },
    StepsRemoved { rfq_id: String, steps: Vec<String> },
}

impl std::fmt::Display for Regression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regression::Reactivated { rfq_id, from } => {
                write!(f, "Reactivated(rfq={}, from={})", rfq_id, from)
            }
            Regression::StepsRemoved { rfq_id, steps } => {
                write!(f, "StepsRemoved(rfq={}, steps={})", rfq_id, steps.join(","))
            }
        }
    }
}

// ─── Status filter ──────────────────────────────────────────────────────────

/// Which statuses a listing shows. Defaults to all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFilter {
    statuses: HashSet<RfqStatus>,
}

impl Default for StatusFilter {
    fn default() -> Self {
        Self {
            statuses: RfqStatus::ALL.into_iter().collect(),
        }
    }
}

impl StatusFilter {
    pub fn only(statuses: impl IntoIterator<Item = RfqStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }

    pub fn toggle(&mut self, status: RfqStatus) {
        if !self.statuses.remove(&status) {
            self.statuses.insert(status);
        }
    }

    pub fn contains(&self, status: RfqStatus) -> bool {
        self.statuses.contains(&status)
    }

    pub fn apply<'a>(&self, snapshot: &'a Snapshot) -> Vec<&'a RfqDocument> {
        snapshot
            .iter()
            .filter(|d| self.statuses.contains(&d.status))
            .collect()
    }
}
