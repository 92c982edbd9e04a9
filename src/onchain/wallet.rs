//! Alloy-backed wallet: local private key signer over HTTP JSON-RPC.

use crate::onchain::{ContractCall, ReceiptStatus, Wallet, WalletError};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, TxHash};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct AlloyWallet {
    provider: DynProvider,
    address: Address,
    receipt_poll: Duration,
}

impl AlloyWallet {
    pub fn connect(
        rpc_url: &str,
        private_key: &str,
        receipt_poll: Duration,
    ) -> Result<Self, WalletError> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|e| WalletError::Config(format!("invalid wallet key: {e}")))?;
        let address = signer.address();
        let url = rpc_url
            .parse()
            .map_err(|e| WalletError::Config(format!("invalid rpc url {rpc_url}: {e}")))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        info!(address = %address, "wallet connected");
        Ok(Self {
            provider,
            address,
            receipt_poll,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

/// Only a JSON-RPC error response is a node refusing the call; transport
/// failures stay `Rpc`.
fn estimation_error(e: TransportError) -> WalletError {
    if e.as_error_resp().is_some() {
        WalletError::Estimation(e.to_string())
    } else {
        WalletError::Rpc(e.to_string())
    }
}

#[async_trait]
impl Wallet for AlloyWallet {
    async fn write_contract(&self, call: &ContractCall) -> Result<TxHash, WalletError> {
        let mut tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(call.address)
            .with_input(call.calldata.clone());
        if let Some(value) = call.value {
            tx = tx.with_value(value);
        }

        // Estimate explicitly so allow-list reverts surface as their own error.
        let gas = self
            .provider
            .estimate_gas(tx.clone())
            .await
            .map_err(estimation_error)?;
        debug!(function = call.function_name, gas, "gas estimated");

        let pending = self
            .provider
            .send_transaction(tx.with_gas_limit(gas))
            .await
            .map_err(|e| WalletError::Rpc(e.to_string()))?;
        let tx_hash = *pending.tx_hash();

        info!(
            function = call.function_name,
            to = %call.address,
            tx = %tx_hash,
            "transaction broadcast"
        );
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<ReceiptStatus, WalletError> {
        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    let status = if receipt.status() {
                        ReceiptStatus::Success
                    } else {
                        ReceiptStatus::Reverted
                    };
                    debug!(tx = %tx_hash, ?status, block = ?receipt.block_number, "receipt");
                    return Ok(status);
                }
                Ok(None) => {}
                // Transient RPC errors while waiting; the caller bounds the wait.
                Err(e) => warn!(tx = %tx_hash, error = %e, "receipt lookup failed"),
            }
            tokio::time::sleep(self.receipt_poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::{classify_wallet_error, SettlementError, TxState};
    use alloy::rpc::json_rpc::ErrorPayload;
    use alloy::transports::TransportErrorKind;

    const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_error_response_is_estimation() {
        let payload: ErrorPayload =
            serde_json::from_str(r#"{"code":3,"message":"execution reverted"}"#).unwrap();
        let err = estimation_error(TransportError::ErrorResp(payload));
        assert!(matches!(err, WalletError::Estimation(ref m) if m.contains("execution reverted")));
    }

    #[test]
    fn test_transport_failure_is_rpc() {
        let err = estimation_error(TransportErrorKind::custom_str("connection refused"));
        assert!(matches!(err, WalletError::Rpc(ref m) if m.contains("connection refused")));
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_instead_of_rejecting() {
        let wallet =
            AlloyWallet::connect("http://127.0.0.1:1", ANVIL_KEY, Duration::from_millis(10)).unwrap();
        let call = ContractCall {
            address: Address::repeat_byte(0xaa),
            function_name: "collectRewards",
            calldata: crate::onchain::abi::collect_rewards_calldata(),
            value: None,
        };

        let err = wallet.write_contract(&call).await.unwrap_err();
        assert!(matches!(err, WalletError::Rpc(_)), "got {err:?}");

        let settled = classify_wallet_error(err);
        assert!(matches!(settled, SettlementError::Wallet(_)), "got {settled:?}");
        assert_eq!(settled.terminal_state(), TxState::Failed);
    }
}
