//! Node connectivity: one client per sub-chain, created lazily and reused for the
//! lifetime of the process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::middleware::signer::SignerMiddlewareError;
use ethers::prelude::*;
use ethers::providers::{ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::EssentialConfig;
use crate::error::{DeployError, Result};

/// A failed node interaction, with the revert payload when the node returned one.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RpcFailure {
    pub message: String,
    pub revert_data: Option<Bytes>,
}

impl RpcFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            revert_data: None,
        }
    }

    pub fn reverted(message: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            message: message.into(),
            revert_data: Some(data.into()),
        }
    }
}

pub type RpcResult<T> = std::result::Result<T, RpcFailure>;

impl From<RpcFailure> for DeployError {
    fn from(err: RpcFailure) -> Self {
        DeployError::Rpc(err.message)
    }
}

/// Fee quotes as reported by the node; absent fields were not available.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeData {
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

/// Transport seam between the pipeline and a node.
///
/// Every call is awaited to completion; implementations must not retry and must
/// not impose their own timeouts.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> RpcResult<u64>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> RpcResult<U256>;

    async fn fee_data(&self) -> RpcResult<FeeData>;

    /// Sign with `wallet`, broadcast, and wait until the transaction is mined.
    async fn send_and_wait(
        &self,
        wallet: &LocalWallet,
        tx: TypedTransaction,
    ) -> RpcResult<TransactionReceipt>;

    async fn call(&self, tx: &TypedTransaction) -> RpcResult<Bytes>;

    async fn storage_at(&self, address: Address, slot: H256) -> RpcResult<H256>;

    async fn transaction_count(&self, address: Address) -> RpcResult<u64>;

    /// Force the next nonce of `address` (development nodes only).
    async fn set_nonce(&self, address: Address, nonce: u64) -> RpcResult<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON-RPC TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

/// [`ChainRpc`] over an HTTP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct EthersRpc {
    provider: Provider<Http>,
}

impl EthersRpc {
    pub fn connect(rpc_url: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| DeployError::Rpc(format!("invalid rpc url {rpc_url}: {e}")))?;
        Ok(Self { provider })
    }
}

fn provider_failure(err: ProviderError) -> RpcFailure {
    let revert_data = RpcError::as_error_response(&err).and_then(|resp| resp.as_revert_data());
    RpcFailure {
        message: err.to_string(),
        revert_data,
    }
}

fn signer_failure(err: SignerMiddlewareError<Provider<Http>, LocalWallet>) -> RpcFailure {
    match err {
        SignerMiddlewareError::MiddlewareError(inner) => provider_failure(inner),
        other => RpcFailure::new(other.to_string()),
    }
}

#[async_trait]
impl ChainRpc for EthersRpc {
    async fn block_number(&self) -> RpcResult<u64> {
        let block = self.provider.get_block_number().await.map_err(provider_failure)?;
        Ok(block.as_u64())
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> RpcResult<U256> {
        self.provider
            .estimate_gas(tx, None)
            .await
            .map_err(provider_failure)
    }

    async fn fee_data(&self) -> RpcResult<FeeData> {
        let gas_price = self.provider.get_gas_price().await.map_err(provider_failure)?;
        // Pre-London networks have no base fee; leave the 1559 fields empty there.
        let (max_fee_per_gas, max_priority_fee_per_gas) =
            match self.provider.estimate_eip1559_fees(None).await {
                Ok((max_fee, priority)) => (Some(max_fee), Some(priority)),
                Err(e) => {
                    debug!("eip1559 fee estimation unavailable: {}", e);
                    (None, None)
                }
            };

        Ok(FeeData {
            gas_price: Some(gas_price),
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    async fn send_and_wait(
        &self,
        wallet: &LocalWallet,
        tx: TypedTransaction,
    ) -> RpcResult<TransactionReceipt> {
        let client = SignerMiddleware::new(self.provider.clone(), wallet.clone());
        let pending = client.send_transaction(tx, None).await.map_err(signer_failure)?;
        debug!("Transaction response: {:?}", pending.tx_hash());

        pending
            .await
            .map_err(provider_failure)?
            .ok_or_else(|| RpcFailure::new("transaction dropped before it was mined"))
    }

    async fn call(&self, tx: &TypedTransaction) -> RpcResult<Bytes> {
        self.provider.call(tx, None).await.map_err(provider_failure)
    }

    async fn storage_at(&self, address: Address, slot: H256) -> RpcResult<H256> {
        self.provider
            .get_storage_at(address, slot, None)
            .await
            .map_err(provider_failure)
    }

    async fn transaction_count(&self, address: Address) -> RpcResult<u64> {
        let count = self
            .provider
            .get_transaction_count(address, None)
            .await
            .map_err(provider_failure)?;
        Ok(count.as_u64())
    }

    async fn set_nonce(&self, address: Address, nonce: u64) -> RpcResult<()> {
        self.provider
            .request::<_, serde_json::Value>("anvil_setNonce", (address, U256::from(nonce)))
            .await
            .map_err(provider_failure)?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLIENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection to one sub-chain.
#[derive(Clone)]
pub struct NetworkClient {
    logic_chain_id: u32,
    rpc: Arc<dyn ChainRpc>,
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("logic_chain_id", &self.logic_chain_id)
            .finish()
    }
}

impl NetworkClient {
    pub fn new(logic_chain_id: u32, rpc: Arc<dyn ChainRpc>) -> Self {
        Self { logic_chain_id, rpc }
    }

    pub fn logic_chain_id(&self) -> u32 {
        self.logic_chain_id
    }

    /// The underlying transport, for callers that need revert payloads.
    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    pub async fn block_number(&self) -> Result<u64> {
        Ok(self.rpc.block_number().await?)
    }

    /// Execute a read-only call against `to`.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        Ok(self.rpc.call(&tx).await?)
    }

    pub async fn storage_at(&self, address: Address, slot: H256) -> Result<H256> {
        Ok(self.rpc.storage_at(address, slot).await?)
    }

    pub async fn transaction_count(&self, address: Address) -> Result<u64> {
        Ok(self.rpc.transaction_count(address).await?)
    }

    /// Force the next nonce of `address` and confirm the node took it.
    pub async fn force_nonce(&self, address: Address, nonce: u64) -> Result<()> {
        self.rpc.set_nonce(address, nonce).await?;
        let actual = self.rpc.transaction_count(address).await?;
        if actual != nonce {
            return Err(DeployError::NonceMismatch {
                expected: nonce,
                actual,
            });
        }
        info!("Set nonce of {:?} to {}", address, nonce);
        Ok(())
    }
}

type RpcFactory = Box<dyn Fn(&EssentialConfig) -> Result<Arc<dyn ChainRpc>> + Send + Sync>;

/// Memoized clients keyed by logic chain id.
pub struct NetworkRegistry {
    factory: RpcFactory,
    clients: Mutex<HashMap<u32, NetworkClient>>,
}

impl NetworkRegistry {
    /// Registry connecting to each sub-chain's `NODE_RPC_URL`.
    pub fn http() -> Self {
        Self::with_factory(|config| {
            let rpc = EthersRpc::connect(&config.node_rpc_url)?;
            Ok(Arc::new(rpc) as Arc<dyn ChainRpc>)
        })
    }

    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn(&EssentialConfig) -> Result<Arc<dyn ChainRpc>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Client for `config`'s sub-chain, created on first use.
    pub async fn client(&self, config: &EssentialConfig) -> Result<NetworkClient> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&config.logic_chain_id) {
            return Ok(client.clone());
        }

        debug!(
            "connecting to logic chain {} at {}",
            config.logic_chain_id, config.node_rpc_url
        );
        let client = NetworkClient::new(config.logic_chain_id, (self.factory)(config)?);
        clients.insert(config.logic_chain_id, client.clone());
        Ok(client)
    }
}

impl std::fmt::Debug for NetworkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_failure_maps_to_rpc_error() {
        let err: DeployError = RpcFailure::reverted("execution reverted", vec![1u8, 2, 3]).into();
        assert!(matches!(err, DeployError::Rpc(msg) if msg == "execution reverted"));
    }

    #[test]
    fn test_connect_rejects_bad_url() {
        assert!(matches!(
            EthersRpc::connect("not a url"),
            Err(DeployError::Rpc(_))
        ));
        assert!(EthersRpc::connect("http://127.0.0.1:8545").is_ok());
    }
}
