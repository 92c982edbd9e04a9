//! Escrow vault bindings.
//!
//! Only the three seller-side entry points are bound; calldata is encoded
//! here and handed to the wallet as raw bytes.

use alloy::primitives::{Bytes, B256};
use alloy::sol;
use alloy::sol_types::SolCall;

sol! {
    interface IEscrowVault {
        function deposit() external payable;
        function acceptExit(bytes32 proposalId) external;
        function collectRewards() external;
    }
}

pub fn deposit_calldata() -> Bytes {
    IEscrowVault::depositCall {}.abi_encode().into()
}

pub fn accept_exit_calldata(proposal_id: B256) -> Bytes {
    IEscrowVault::acceptExitCall {
        proposalId: proposal_id,
    }
    .abi_encode()
    .into()
}

pub fn collect_rewards_calldata() -> Bytes {
    IEscrowVault::collectRewardsCall {}.abi_encode().into()
}
