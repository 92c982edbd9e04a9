//! Account-level marketplace resources: the seller's validators, the linked
//! payout wallets an RFQ pays into, and the account's smart contract.
//!
//!   GET    /validators            → [ValidatorInfo]
//!   GET    /linkedWallets         → [LinkedWallet]
//!   POST   /linkedWallets         → 201 (400 "Wallet already exists")
//!   DELETE /linkedWallets/{id}    → 204
//!   GET    /account               → { smartContracts: [{ address }] }

use crate::store::{decode_list, MarketplaceClient, StoreError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

const VALIDATORS_PATH: &str = "/validators";
const LINKED_WALLETS_PATH: &str = "/linkedWallets";
const ACCOUNT_PATH: &str = "/account";

const GWEI_PER_ETH: u64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExitEstimate {
    #[serde(default)]
    pub estimated_exit_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ValidatorInfo {
    #[serde(default)]
    pub validator_index: Option<u64>,
    #[serde(default)]
    pub validator_public_key: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// In gwei.
    #[serde(default)]
    pub balance: Option<Decimal>,
    #[serde(default)]
    pub exit_estimate: Option<ExitEstimate>,
}

impl ValidatorInfo {
    pub fn balance_eth(&self) -> Option<Decimal> {
        self.balance.map(|gwei| gwei / Decimal::from(GWEI_PER_ETH))
    }

    pub fn is_active(&self) -> bool {
        self.status
            .as_deref()
            .map_or(false, |s| s.eq_ignore_ascii_case("active"))
    }

    pub fn estimated_exit_time(&self) -> Option<DateTime<Utc>> {
        self.exit_estimate.as_ref()?.estimated_exit_time
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedWallet {
    pub id: String,
    #[serde(default)]
    pub wallet_name: Option<String>,
    pub wallet_address: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLinkedWalletRequest {
    pub wallet_name: String,
    pub wallet_address: String,
    pub asset: &'static str,
}

impl AddLinkedWalletRequest {
    pub fn eth(wallet_name: impl Into<String>, wallet_address: impl Into<String>) -> Self {
        Self {
            wallet_name: wallet_name.into(),
            wallet_address: wallet_address.into(),
            asset: "ETH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SmartContract {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub smart_contracts: Vec<SmartContract>,
}

impl AccountInfo {
    /// The account's first smart contract, the one settlement links point at.
    pub fn contract_address(&self) -> Option<&str> {
        self.smart_contracts
            .first()
            .map(|c| c.address.as_str())
            .filter(|a| !a.is_empty())
    }
}

/// Accepts the account object bare or wrapped as `{ user }`.
pub fn decode_account(body: serde_json::Value) -> Result<AccountInfo, StoreError> {
    let inner = match body {
        serde_json::Value::Object(mut map) if map.contains_key("user") => {
            map.remove("user").unwrap_or_default()
        }
        other => other,
    };
    serde_json::from_value(inner).map_err(|e| StoreError::Decode(e.to_string()))
}

impl MarketplaceClient {
    pub async fn list_validators(&self) -> Result<Vec<ValidatorInfo>, StoreError> {
        let body = self.get(VALIDATORS_PATH, &[]).await?;
        decode_list(body, "validators")
    }

    pub async fn list_wallets(&self) -> Result<Vec<LinkedWallet>, StoreError> {
        let body = self.get(LINKED_WALLETS_PATH, &[]).await?;
        decode_list(body, "wallets")
    }

    pub async fn register_wallet(&self, request: &AddLinkedWalletRequest) -> Result<(), StoreError> {
        let body = serde_json::to_value(request).map_err(|e| StoreError::Decode(e.to_string()))?;
        self.post(LINKED_WALLETS_PATH, &body).await?;
        info!(address = %request.wallet_address, "linked wallet registered");
        Ok(())
    }

    pub async fn remove_wallet(&self, wallet_id: &str) -> Result<(), StoreError> {
        let path = format!("{LINKED_WALLETS_PATH}/{wallet_id}");
        self.delete(&path).await?;
        info!(wallet = %wallet_id, "linked wallet removed");
        Ok(())
    }

    pub async fn account(&self) -> Result<AccountInfo, StoreError> {
        let body = self.get(ACCOUNT_PATH, &[]).await?;
        decode_account(body)
    }
}
