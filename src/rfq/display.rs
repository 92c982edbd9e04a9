//! Human-readable rendering of RFQ documents: step names, explorer links,
//! escrow status. Used by the notification messages and the binaries.

use super::{RfqDocument, SettlementStep};
use crate::config::Server;
use chrono::{DateTime, NaiveDate, Utc};

/// "withdrawal_recipient_settlement" -> "Withdrawal recipient settlement".
pub fn humanize_step_name(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A 32-byte 0x-prefixed hex string, i.e. something that looks like a tx hash.
pub fn is_tx_hash(value: &str) -> bool {
    value.len() == 66
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Block explorer links for the configured environment.
#[derive(Debug, Clone, Copy)]
pub struct Explorer {
    server: Server,
}

impl Explorer {
    pub fn new(server: Server) -> Self {
        Self { server }
    }

    fn etherscan(&self) -> &'static str {
        if self.server.is_production() {
            "https://etherscan.io"
        } else {
            "https://holesky.etherscan.io"
        }
    }

    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.etherscan(), tx_hash)
    }

    pub fn address_url(&self, address: &str) -> String {
        format!("{}/address/{}", self.etherscan(), address)
    }

    pub fn validator_url(&self, validator_index: u64) -> String {
        if self.server.is_production() {
            format!("https://beaconcha.in/validator/{}", validator_index)
        } else {
            format!("https://holesky.beaconcha.in/validator/{}", validator_index)
        }
    }
}

/// One `key: value` line of a settlement step, with tx hashes linked.
fn render_field(explorer: &Explorer, key: &str, value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) if is_tx_hash(s) => {
            format!("{}: {} ({})", key, s, explorer.tx_url(s))
        }
        serde_json::Value::String(s) => format!("{}: {}", key, s),
        serde_json::Value::Null => format!("{}: ", key),
        other => format!("{}: {}", key, other),
    }
}

fn render_step(explorer: &Explorer, name: &str, step: &SettlementStep) -> Vec<String> {
    let mut lines = vec![humanize_step_name(name)];
    if let Some(ts) = &step.timestamp {
        lines.push(format!("  timestamp: {}", ts));
    }
    for (key, value) in &step.fields {
        lines.push(format!("  {}", render_field(explorer, key, value)));
    }
    lines
}

/// All settlement steps, sorted by name, as printable lines.
pub fn settlement_lines(explorer: &Explorer, doc: &RfqDocument) -> Vec<String> {
    doc.settlement_steps
        .iter()
        .flat_map(|(name, step)| render_step(explorer, name, step))
        .collect()
}

pub fn escrow_summary(doc: &RfqDocument) -> String {
    match doc.vault_address() {
        Some(address) => address.to_string(),
        None if doc.is_active() => "Escrow vault is created when a quote is accepted".to_string(),
        None => "N/A".to_string(),
    }
}

pub fn best_quote_summary(doc: &RfqDocument) -> String {
    match &doc.best_quote {
        Some(q) => q.quote.to_string(),
        None => "No quote yet".to_string(),
    }
}

/// Date part of `estimated_all_validators_exited_at`, or "N/A".
pub fn estimated_exit_date(doc: &RfqDocument) -> String {
    let Some(raw) = doc.estimated_all_validators_exited_at.as_deref() else {
        return "N/A".to_string();
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc).date_naive().to_string();
    }
    if let Ok(millis) = raw.parse::<i64>() {
        if let Some(dt) = DateTime::<Utc>::from_timestamp_millis(millis) {
            return dt.date_naive().to_string();
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.to_string();
    }
    raw.to_string()
}

/// Comma separated validator indices.
pub fn validator_list(doc: &RfqDocument) -> String {
    doc.validators
        .iter()
        .map(|v| v.validator_index.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
