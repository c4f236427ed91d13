//! Estimate, price, sign, send and confirm a single transaction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, TransactionReceipt, U256, U64};
use tracing::{debug, error, info};

use crate::catalog::ErrorRegistry;
use crate::error::{DeployError, Result};
use crate::fees::FeeStrategy;
use crate::network::{NetworkClient, RpcFailure};

/// Transaction as produced by a flow, before gas and fees are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    /// `None` creates a contract.
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
}

impl UnsignedTx {
    pub fn call(to: Address, data: Bytes) -> Self {
        Self {
            to: Some(to),
            data,
            value: U256::zero(),
        }
    }

    pub fn create(data: Bytes) -> Self {
        Self {
            to: None,
            data,
            value: U256::zero(),
        }
    }
}

/// Gas limit sent with a transaction: the estimate plus 20%, truncated.
pub fn gas_limit_with_margin(estimate: U256) -> U256 {
    estimate * 12 / 10
}

/// Total gas used by every confirmed transaction of the run.
#[derive(Debug, Clone, Default)]
pub struct GasTally(Arc<AtomicU64>);

impl GasTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saturates at `u64::MAX` rather than wrapping.
    pub fn add(&self, gas_used: U256) {
        let gas_used = if gas_used > U256::from(u64::MAX) {
            u64::MAX
        } else {
            gas_used.as_u64()
        };
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |total| {
                Some(total.saturating_add(gas_used))
            });
    }

    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Sends transactions to one sub-chain.
#[derive(Debug, Clone)]
pub struct TransactionSubmitter {
    client: NetworkClient,
    fees: FeeStrategy,
    errors: Arc<ErrorRegistry>,
    gas: GasTally,
}

impl TransactionSubmitter {
    pub fn new(
        client: NetworkClient,
        fees: FeeStrategy,
        errors: Arc<ErrorRegistry>,
        gas: GasTally,
    ) -> Self {
        Self {
            client,
            fees,
            errors,
            gas,
        }
    }

    pub fn client(&self) -> &NetworkClient {
        &self.client
    }

    /// Submit `unsigned` signed by `signer` and wait for a successful receipt.
    ///
    /// Fails before broadcasting when estimation fails or the network fee is above
    /// the ceiling. Nothing is retried.
    pub async fn submit(
        &self,
        signer: &LocalWallet,
        unsigned: UnsignedTx,
    ) -> Result<TransactionReceipt> {
        let mut tx = self.fees.envelope();
        tx.set_from(signer.address());
        if let Some(to) = unsigned.to {
            tx.set_to(to);
        }
        tx.set_data(unsigned.data);
        tx.set_value(unsigned.value);
        tx.set_chain_id(signer.chain_id());

        let estimate = match self.client.rpc().estimate_gas(&tx).await {
            Ok(estimate) => estimate,
            Err(failure) => {
                error!("Failed to estimate gas for transaction: {}", failure);
                self.log_revert(&failure);
                return Err(DeployError::EstimationFailed(failure.message));
            }
        };
        debug!("Gas estimation to send transaction: {}.", estimate);
        tx.set_gas(gas_limit_with_margin(estimate));

        let fee_data = self
            .client
            .rpc()
            .fee_data()
            .await
            .map_err(|e| DeployError::FeeDataUnavailable(e.message))?;
        let profile = self.fees.profile(&fee_data)?;
        profile.apply(&mut tx);
        debug!("Fee profile: {:?}", profile);

        let receipt = match self.client.rpc().send_and_wait(signer, tx).await {
            Ok(receipt) => receipt,
            Err(failure) => {
                error!("Failed to submit transaction: {}", failure);
                self.log_revert(&failure);
                return Err(DeployError::SubmissionFailed(failure.message));
            }
        };

        if receipt.status != Some(U64::from(1)) {
            error!("transaction reverted. receipt: {:?}", receipt);
            return Err(DeployError::TransactionReverted(Box::new(receipt)));
        }

        let gas_used = receipt.gas_used.unwrap_or_default();
        self.gas.add(gas_used);
        info!(
            "Transaction confirmed. Gas used: {}. Gas price: {}",
            gas_used,
            receipt
                .effective_gas_price
                .unwrap_or_else(|| profile.max_price())
        );
        info!("================================================================");

        Ok(receipt)
    }

    fn log_revert(&self, failure: &RpcFailure) {
        let Some(data) = &failure.revert_data else {
            return;
        };
        match self.errors.decode(data) {
            Ok(decoded) => {
                error!("Error Name: {}", decoded.name);
                error!("Error arg: {:?}", decoded.args);
            }
            Err(e) => error!("Fail to decode: {}", e),
        }
    }
}
