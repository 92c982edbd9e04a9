//! Wallet / chain seam for settlement transactions.
//!
//! The settlement coordinator only needs two calls from a wallet:
//! - `write_contract`: sign and broadcast a call, returning its hash
//! - `wait_for_receipt`: block until the call is mined (success or revert)
//!
//! `AlloyWallet` implements both over an HTTP JSON-RPC endpoint with a local
//! signer. Tests and other front-ends plug in their own `Wallet`.

pub mod abi;
pub mod wallet;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use thiserror::Error;

pub use wallet::AlloyWallet;

/// A fully encoded contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub address: Address,
    pub function_name: &'static str,
    pub calldata: Bytes,
    pub value: Option<U256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Error, Debug, Clone)]
pub enum WalletError {
    #[error("user rejected the request")]
    UserRejected,
    #[error("gas estimation failed: {0}")]
    Estimation(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("wallet configuration error: {0}")]
    Config(String),
}

#[async_trait]
pub trait Wallet: Send + Sync {
    async fn write_contract(&self, call: &ContractCall) -> Result<TxHash, WalletError>;

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<ReceiptStatus, WalletError>;
}
