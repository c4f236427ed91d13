//! Process-wide state of a run, created once and passed to every flow.

use std::sync::Arc;

use ethers::types::Address;
use tracing::warn;

use crate::catalog::{ContractCatalog, ErrorRegistry};
use crate::config::{ConfigStore, EssentialConfig, SubChainConfig};
use crate::contracts::{ContractInvoker, OwnerContract, PortalContract, ProxyAdminContract, VaultContract};
use crate::error::Result;
use crate::fees::FeeStrategy;
use crate::names;
use crate::network::{NetworkClient, NetworkRegistry};
use crate::router::ExecutionRouter;
use crate::submitter::{GasTally, TransactionSubmitter};

#[derive(Debug)]
pub struct DeployContext {
    pub store: ConfigStore,
    pub catalog: ContractCatalog,
    pub errors: Arc<ErrorRegistry>,
    pub networks: NetworkRegistry,
    pub gas: GasTally,
}

impl DeployContext {
    pub fn new(store: ConfigStore, catalog: ContractCatalog, networks: NetworkRegistry) -> Self {
        // Revert decoding is best effort: without the vault ABIs only builtin errors decode.
        let errors = ErrorRegistry::from_catalog(&catalog).unwrap_or_else(|e| {
            warn!("revert decoding limited to builtin errors: {}", e);
            ErrorRegistry::with_builtins()
        });

        Self {
            store,
            catalog,
            errors: Arc::new(errors),
            networks,
            gas: GasTally::new(),
        }
    }

    pub fn sub_chain(&self, index: usize) -> Result<&SubChainConfig> {
        self.store.config().sub_chain(index)
    }

    pub fn essential(&self, index: usize) -> Result<&EssentialConfig> {
        Ok(&self.sub_chain(index)?.essential)
    }

    /// Apply `update` to sub-chain `index` and persist the whole store.
    pub fn record<F>(&mut self, index: usize, update: F) -> Result<()>
    where
        F: FnOnce(&mut SubChainConfig),
    {
        update(self.store.config_mut().sub_chain_mut(index)?);
        self.store.save()
    }

    pub async fn client(&self, index: usize) -> Result<NetworkClient> {
        let essential = self.essential(index)?;
        self.networks.client(essential).await
    }

    pub async fn submitter(&self, index: usize) -> Result<TransactionSubmitter> {
        let fees = FeeStrategy::from_config(self.essential(index)?)?;
        Ok(TransactionSubmitter::new(
            self.client(index).await?,
            fees,
            self.errors.clone(),
            self.gas.clone(),
        ))
    }

    /// Router through the owner contract of sub-chain `index`.
    pub async fn router(&self, index: usize) -> Result<ExecutionRouter> {
        let owner = self.owner(index).await?;
        ExecutionRouter::new(self.submitter(index).await?, owner, self.essential(index)?)
    }

    pub async fn invoker(&self, index: usize, name: &str, address: Address) -> Result<ContractInvoker> {
        Ok(ContractInvoker::new(
            name,
            address,
            self.catalog.abi(name)?,
            self.client(index).await?,
        ))
    }

    pub async fn owner(&self, index: usize) -> Result<OwnerContract> {
        let address = self.essential(index)?.addresses.owner()?;
        Ok(OwnerContract::new(self.invoker(index, names::OWNER, address).await?))
    }

    pub async fn vault(&self, index: usize) -> Result<VaultContract> {
        let address = self.essential(index)?.addresses.vault_proxy()?;
        Ok(VaultContract::new(self.invoker(index, names::VAULT, address).await?))
    }

    pub async fn portal(&self, index: usize) -> Result<PortalContract> {
        let address = self.essential(index)?.addresses.portal_proxy()?;
        Ok(PortalContract::new(self.invoker(index, names::PORTAL, address).await?))
    }

    pub async fn proxy_admin(&self, index: usize, address: Address) -> Result<ProxyAdminContract> {
        Ok(ProxyAdminContract::new(
            self.invoker(index, names::PROXY_ADMIN, address).await?,
        ))
    }
}
