//! The resumable deployment of one sub-chain.
//!
//! Steps run in a fixed order. A step whose output is already recorded in the
//! config store is skipped, and every step persists the store as soon as it
//! succeeds, so re-running after a failure picks up at the failed step.

use std::fmt;

use ethers::abi::{encode, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;
use tracing::info;

use crate::config::{require, EssentialConfig, TokenInfo};
use crate::context::DeployContext;
use crate::contracts::{proxy_admin_of, PreCommitCheckpoint, VaultConfiguration};
use crate::error::{DeployError, Result};
use crate::names;
use crate::release::CircuitRelease;
use crate::router::TxOrigin;
use crate::submitter::{TransactionSubmitter, UnsignedTx};
use crate::DEFAULT_ADMIN_ROLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    OwnerContract,
    Implementations,
    VaultProxy,
    PortalImplementation,
    PortalProxy,
    SnarkVerifier,
    UpdateVerifiers,
    RegisterOperators,
    RegisterExitManagers,
    ConfigureVault,
    ConfigurePortal,
    GrantAdminRole,
    RenounceDeployerRole,
}

impl DeployStep {
    pub const ALL: [DeployStep; 13] = [
        DeployStep::OwnerContract,
        DeployStep::Implementations,
        DeployStep::VaultProxy,
        DeployStep::PortalImplementation,
        DeployStep::PortalProxy,
        DeployStep::SnarkVerifier,
        DeployStep::UpdateVerifiers,
        DeployStep::RegisterOperators,
        DeployStep::RegisterExitManagers,
        DeployStep::ConfigureVault,
        DeployStep::ConfigurePortal,
        DeployStep::GrantAdminRole,
        DeployStep::RenounceDeployerRole,
    ];

    pub fn number(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0) + 1
    }

    /// Steps that consume the circuit release.
    pub fn needs_release(self) -> bool {
        matches!(self, DeployStep::SnarkVerifier | DeployStep::UpdateVerifiers)
    }

    /// Marker recorded in `COMPLETED_STEPS`.
    pub fn marker(self) -> &'static str {
        match self {
            DeployStep::OwnerContract => "OWNER_CONTRACT",
            DeployStep::Implementations => "IMPLEMENTATIONS",
            DeployStep::VaultProxy => "VAULT_PROXY",
            DeployStep::PortalImplementation => "PORTAL_IMPLEMENTATION",
            DeployStep::PortalProxy => "PORTAL_PROXY",
            DeployStep::SnarkVerifier => "SNARK_VERIFIER",
            DeployStep::UpdateVerifiers => "UPDATE_VERIFIERS",
            DeployStep::RegisterOperators => "REGISTER_OPERATORS",
            DeployStep::RegisterExitManagers => "REGISTER_EXIT_MANAGERS",
            DeployStep::ConfigureVault => "CONFIGURE_VAULT",
            DeployStep::ConfigurePortal => "CONFIGURE_PORTAL",
            DeployStep::GrantAdminRole => "GRANT_ADMIN_ROLE",
            DeployStep::RenounceDeployerRole => "RENOUNCE_DEPLOYER_ROLE",
        }
    }

    /// Whether the step's output is already recorded. Deployment steps are judged
    /// by their addresses, wiring steps by their marker.
    pub fn is_done(self, config: &EssentialConfig) -> bool {
        let book = &config.addresses;
        match self {
            DeployStep::OwnerContract => book.owner_contract_address.is_some(),
            DeployStep::Implementations => names::IMPLEMENTATIONS
                .iter()
                .all(|name| book.implementation(name).is_some()),
            DeployStep::VaultProxy => {
                book.vault_proxy_contract_address.is_some()
                    && book.vault_proxy_admin_contract_address.is_some()
            }
            DeployStep::PortalImplementation => {
                book.layer_zero_portal_impl_contract_address.is_some()
            }
            DeployStep::PortalProxy => {
                book.layer_zero_portal_proxy_contract_address.is_some()
                    && book.layer_zero_portal_proxy_admin_contract_address.is_some()
            }
            DeployStep::SnarkVerifier => book.snark_verifier_contract_address.is_some(),
            _ => config.step_completed(self.marker()),
        }
    }
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = match self {
            DeployStep::OwnerContract => "Deploy VesselOwner Contract",
            DeployStep::Implementations => "Deploy Vault Implementations",
            DeployStep::VaultProxy => "Deploy Vault Proxy",
            DeployStep::PortalImplementation => "Deploy LayerZeroPortal Implementation",
            DeployStep::PortalProxy => "Deploy LayerZeroPortal Proxy",
            DeployStep::SnarkVerifier => "Deploy SnarkVerifier",
            DeployStep::UpdateVerifiers => "Update Vault Verifiers",
            DeployStep::RegisterOperators => "Register Operators",
            DeployStep::RegisterExitManagers => "Register Exit Managers",
            DeployStep::ConfigureVault => "Configure Vault",
            DeployStep::ConfigurePortal => "Configure LzPortal",
            DeployStep::GrantAdminRole => "Grant VesselOwner DefaultAdminRole to Admin",
            DeployStep::RenounceDeployerRole => "Renounce VesselOwner DefaultAdminRole of Deployer",
        };
        f.write_str(title)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEPLOYMENT PRIMITIVES
// ═══════════════════════════════════════════════════════════════════════════════

/// Create a contract from `bytecode` followed by the ABI-encoded constructor `args`.
pub async fn deploy_bytecode(
    submitter: &TransactionSubmitter,
    deployer: &LocalWallet,
    bytecode: &Bytes,
    args: &[Token],
) -> Result<Address> {
    let mut data = bytecode.to_vec();
    data.extend(encode(args));

    let receipt = submitter
        .submit(deployer, UnsignedTx::create(data.into()))
        .await?;
    receipt
        .contract_address
        .ok_or(DeployError::DeploymentAddressMissing(receipt.transaction_hash))
}

/// Deploy the catalog contract `name` on sub-chain `index`.
pub async fn deploy_contract(
    ctx: &DeployContext,
    index: usize,
    name: &str,
    args: &[Token],
) -> Result<Address> {
    let artifact = ctx.catalog.artifact(name)?;
    let submitter = ctx.submitter(index).await?;
    let deployer = ctx.essential(index)?.deployer_wallet()?;

    info!("Sending transaction to deploy {} contract.", name);
    let address = deploy_bytecode(&submitter, &deployer, artifact.creation_code()?, args).await?;
    info!("{} contract deployed at {:?}", name, address);
    Ok(address)
}

/// Deploy a transparent proxy in front of `implementation`, initialized through
/// `initializer(address)` with the owner contract.
pub async fn deploy_proxy(
    ctx: &DeployContext,
    index: usize,
    implementation: Address,
    owner: Address,
    initializer: &str,
) -> Result<Address> {
    let mut init_data = id(format!("{initializer}(address)")).to_vec();
    init_data.extend(encode(&[Token::Address(owner)]));

    deploy_contract(
        ctx,
        index,
        names::TRANSPARENT_PROXY,
        &[
            Token::Address(implementation),
            Token::Address(owner),
            Token::Bytes(init_data),
        ],
    )
    .await
}

/// Deploy raw verifier bytecode from a circuit release.
pub async fn deploy_verifier(ctx: &DeployContext, index: usize, release: &CircuitRelease) -> Result<Address> {
    let submitter = ctx.submitter(index).await?;
    let deployer = ctx.essential(index)?.deployer_wallet()?;

    info!("Sending transaction to deploy SnarkVerifier bytecode");
    let address = deploy_bytecode(&submitter, &deployer, &release.unified_bytecode, &[]).await?;
    info!("SnarkVerifier bytecode deployed at {:?}", address);
    Ok(address)
}

/// Test ERC20 with `10^30` whole units minted to the deployer.
pub async fn deploy_token(ctx: &DeployContext, index: usize, token: &TokenInfo) -> Result<Address> {
    let deployer = ctx.essential(index)?.deployer_wallet()?;
    let supply = U256::exp10(30 + token.decimals as usize);
    deploy_contract(
        ctx,
        index,
        names::TOKEN,
        &[
            Token::Address(deployer.address()),
            Token::Uint(supply),
            Token::Uint(U256::from(token.decimals)),
            Token::String(token.symbol.clone()),
            Token::String(token.symbol.clone()),
        ],
    )
    .await
}

/// Deploy the vault implementation and the five logic contracts, persisting each
/// address as it lands. With `redeploy` every contract is deployed again.
pub async fn deploy_implementations(ctx: &mut DeployContext, index: usize, redeploy: bool) -> Result<()> {
    for name in names::IMPLEMENTATIONS {
        if !redeploy && ctx.essential(index)?.addresses.implementation(name).is_some() {
            info!("{} implementation already deployed, skipped", name);
            continue;
        }
        let address = deploy_contract(ctx, index, name, &[]).await?;
        ctx.record(index, |c| {
            if let Some(entry) = c.essential.addresses.implementation_mut(name) {
                *entry = Some(address);
            }
        })?;
    }
    Ok(())
}

/// Force the deployer's next nonce before any deployment transaction.
pub async fn set_deployer_nonce(ctx: &DeployContext, index: usize, nonce: u64) -> Result<()> {
    let deployer = ctx.essential(index)?.deployer_wallet()?;
    ctx.client(index).await?.force_nonce(deployer.address(), nonce).await
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════════

pub struct DeploymentOrchestrator<'a> {
    ctx: &'a mut DeployContext,
    index: usize,
}

impl<'a> DeploymentOrchestrator<'a> {
    pub fn new(ctx: &'a mut DeployContext, index: usize) -> Self {
        Self { ctx, index }
    }

    fn essential(&self) -> Result<EssentialConfig> {
        Ok(self.ctx.essential(self.index)?.clone())
    }

    /// Steps not yet recorded as done, in execution order.
    pub fn pending_steps(&self) -> Result<Vec<DeployStep>> {
        let essential = self.ctx.essential(self.index)?;
        Ok(DeployStep::ALL
            .into_iter()
            .filter(|step| !step.is_done(essential))
            .collect())
    }

    /// Whether a pending step still needs the circuit release.
    pub fn needs_release(&self) -> Result<bool> {
        Ok(self.pending_steps()?.into_iter().any(DeployStep::needs_release))
    }

    /// Run every pending step. `release` may be omitted once the verifier steps are done.
    pub async fn run(&mut self, release: Option<&CircuitRelease>) -> Result<()> {
        let essential = self.essential()?;
        info!("========= Deploy ALL Contracts =========");
        info!("Chain ID: {}", essential.chain_id);
        info!("Node RPC: {}", essential.node_rpc_url);
        info!(
            "Current Block: {}",
            self.ctx.client(self.index).await?.block_number().await?
        );

        for step in DeployStep::ALL {
            if step.is_done(self.ctx.essential(self.index)?) {
                info!("========= Step {}: {} (done, skipped) =========", step.number(), step);
                continue;
            }
            info!("========= Step {}: {} =========", step.number(), step);
            self.execute(step, release).await?;
        }
        Ok(())
    }

    async fn execute(&mut self, step: DeployStep, release: Option<&CircuitRelease>) -> Result<()> {
        let index = self.index;
        let release = || {
            release.ok_or_else(|| DeployError::Release(format!("{step} needs the circuit release")))
        };
        match step {
            DeployStep::OwnerContract => {
                let owner = deploy_contract(self.ctx, index, names::OWNER, &[]).await?;
                self.ctx.record(index, |c| {
                    c.essential.addresses.owner_contract_address = Some(owner)
                })
            }
            DeployStep::Implementations => deploy_implementations(self.ctx, index, false).await,
            DeployStep::VaultProxy => self.deploy_vault_proxy().await,
            DeployStep::PortalImplementation => {
                let essential = self.essential()?;
                let endpoint = require(
                    essential.layer_zero_endpoint_address,
                    "LAYER_ZERO_ENDPOINT_ADDRESS",
                )?;
                let portal_impl =
                    deploy_contract(self.ctx, index, names::PORTAL, &[Token::Address(endpoint)])
                        .await?;
                self.ctx.record(index, |c| {
                    c.essential.addresses.layer_zero_portal_impl_contract_address = Some(portal_impl)
                })
            }
            DeployStep::PortalProxy => self.deploy_portal_proxy().await,
            DeployStep::SnarkVerifier => {
                let verifier = deploy_verifier(self.ctx, index, release()?).await?;
                self.ctx.record(index, |c| {
                    c.essential.addresses.snark_verifier_contract_address = Some(verifier)
                })
            }
            DeployStep::UpdateVerifiers => {
                let verifier = require(
                    self.essential()?.addresses.snark_verifier_contract_address,
                    "SNARK_VERIFIER_CONTRACT_ADDRESS",
                )?;
                update_verifiers(self.ctx, index, TxOrigin::Deployer, verifier, &release()?.version)
                    .await?;
                self.complete(step)
            }
            DeployStep::RegisterOperators => {
                let vault = self.ctx.vault(index).await?;
                let router = self.ctx.router(index).await?;
                for operator in self.essential()?.operator_addresses {
                    if vault.is_operator(operator).await? {
                        info!("Operator {:?} already registered, skipped", operator);
                        continue;
                    }
                    info!("Send transaction to add operator {:?}", operator);
                    let data = vault.encode_register_operator(operator)?;
                    router
                        .route_execution(TxOrigin::Deployer, vault.address(), data)
                        .await?;
                }
                self.complete(step)
            }
            DeployStep::RegisterExitManagers => {
                let vault = self.ctx.vault(index).await?;
                let router = self.ctx.router(index).await?;
                for exit_manager in self.essential()?.exit_manager_addresses {
                    if vault.is_exit_manager(exit_manager).await? {
                        info!("Exit manager {:?} already registered, skipped", exit_manager);
                        continue;
                    }
                    info!("Send transaction to add exit manager {:?}", exit_manager);
                    let data = vault.encode_register_exit_manager(exit_manager)?;
                    router
                        .route_execution(TxOrigin::Deployer, vault.address(), data)
                        .await?;
                }
                self.complete(step)
            }
            DeployStep::ConfigureVault => {
                self.configure_vault().await?;
                self.complete(step)
            }
            DeployStep::ConfigurePortal => {
                let eid_list = self.ctx.store.config().eid_list();
                let vault = self.essential()?.addresses.vault_proxy()?;
                let portal = self.ctx.portal(index).await?;
                let router = self.ctx.router(index).await?;
                info!("Send transaction to configure lzPortal");
                info!("Vault proxy address: {:?}", vault);
                info!("EidList: {:?}", eid_list);
                let data = portal.encode_configure_all(vault, &eid_list)?;
                router
                    .route_execution(TxOrigin::Deployer, portal.address(), data)
                    .await?;
                self.complete(step)
            }
            DeployStep::GrantAdminRole => {
                self.grant_admin_role().await?;
                self.complete(step)
            }
            DeployStep::RenounceDeployerRole => {
                self.renounce_deployer_role().await?;
                self.complete(step)
            }
        }
    }

    fn complete(&mut self, step: DeployStep) -> Result<()> {
        self.ctx
            .record(self.index, |c| c.essential.mark_step_completed(step.marker()))
    }

    async fn deploy_vault_proxy(&mut self) -> Result<()> {
        let index = self.index;
        let book = self.essential()?.addresses;
        let owner = book.owner()?;
        let implementation = require(book.vault_impl_contract_address, "VAULT_IMPL_CONTRACT_ADDRESS")?;

        let proxy = match book.vault_proxy_contract_address {
            Some(proxy) => proxy,
            None => {
                let proxy = deploy_proxy(self.ctx, index, implementation, owner, "initialize_v2").await?;
                self.ctx.record(index, |c| {
                    c.essential.addresses.vault_proxy_contract_address = Some(proxy)
                })?;
                proxy
            }
        };

        let proxy_admin = proxy_admin_of(&self.ctx.client(index).await?, proxy).await?;
        info!("Vault proxy admin at {:?}", proxy_admin);
        self.ctx.record(index, |c| {
            c.essential.addresses.vault_proxy_admin_contract_address = Some(proxy_admin)
        })
    }

    async fn deploy_portal_proxy(&mut self) -> Result<()> {
        let index = self.index;
        let book = self.essential()?.addresses;
        let owner = book.owner()?;
        let implementation = require(
            book.layer_zero_portal_impl_contract_address,
            "LAYER_ZERO_PORTAL_IMPL_CONTRACT_ADDRESS",
        )?;

        let proxy = match book.layer_zero_portal_proxy_contract_address {
            Some(proxy) => proxy,
            None => {
                let proxy = deploy_proxy(self.ctx, index, implementation, owner, "initialize").await?;
                self.ctx.record(index, |c| {
                    c.essential.addresses.layer_zero_portal_proxy_contract_address = Some(proxy)
                })?;
                proxy
            }
        };

        let proxy_admin = proxy_admin_of(&self.ctx.client(index).await?, proxy).await?;
        info!("LzPortal proxy admin at {:?}", proxy_admin);
        self.ctx.record(index, |c| {
            c.essential.addresses.layer_zero_portal_proxy_admin_contract_address = Some(proxy_admin)
        })
    }

    async fn configure_vault(&self) -> Result<()> {
        let index = self.index;
        let essential = self.essential()?;
        let book = &essential.addresses;
        let logic = |name: &'static str, field: &'static str| require(book.implementation(name), field);

        let configuration = VaultConfiguration {
            weth: require(book.weth_contract_address, "WETH_CONTRACT_ADDRESS")?,
            user_api_logic: logic(names::USER_API_LOGIC, "USER_API_LOGIC_CONTRACT_ADDRESS")?,
            manager_api_logic: logic(names::MANAGER_API_LOGIC, "MANAGER_API_LOGIC_CONTRACT_ADDRESS")?,
            message_queue_logic: logic(
                names::MESSAGE_QUEUE_LOGIC,
                "MESSAGE_QUEUE_LOGIC_CONTRACT_ADDRESS",
            )?,
            token_manager_logic: logic(
                names::TOKEN_MANAGER_LOGIC,
                "TOKEN_MANAGER_LOGIC_CONTRACT_ADDRESS",
            )?,
            multi_chain_logic: logic(names::MULTI_CHAIN_LOGIC, "MULTI_CHAIN_LOGIC_CONTRACT_ADDRESS")?,
            portal: book.portal_proxy()?,
            logic_chain_id: essential.logic_chain_id,
            primary_logic_chain_id: essential.primary_logic_chain_id,
            chain_cnt: self.ctx.store.config().sub_chain_cnt,
            checkpoints: essential
                .pre_commit_checkpoint
                .iter()
                .map(PreCommitCheckpoint::seed)
                .collect(),
        };

        let vault = self.ctx.vault(index).await?;
        let router = self.ctx.router(index).await?;
        info!("Send transaction to configure vault");
        info!("Vault contract address: {:?}", vault.address());
        let data = vault.encode_configure_all(&configuration)?;
        router
            .route_execution(TxOrigin::Deployer, vault.address(), data)
            .await?;
        Ok(())
    }

    async fn grant_admin_role(&self) -> Result<()> {
        let essential = self.essential()?;
        let admin = require(essential.admin_address, "ADMIN_ADDRESS")?;
        let router = self.ctx.router(self.index).await?;
        let owner = router.owner();

        info!("Send transaction to grant role");
        info!("Owner contract: {:?}", owner.address());
        info!("Target address: {:?}", admin);
        let data = owner.encode_grant_role(DEFAULT_ADMIN_ROLE, admin)?;
        router.route_owner_call(TxOrigin::Deployer, data).await?;

        if !owner.has_role(DEFAULT_ADMIN_ROLE, admin).await? {
            return Err(DeployError::RoleHandoffRefused(format!(
                "grant to {admin:?} not observed on-chain"
            )));
        }
        Ok(())
    }

    /// Renounce only once the admin provably holds the role, so the owner contract
    /// never ends up without an admin.
    async fn renounce_deployer_role(&self) -> Result<()> {
        let essential = self.essential()?;
        let admin = require(essential.admin_address, "ADMIN_ADDRESS")?;
        let router = self.ctx.router(self.index).await?;
        let owner = router.owner();
        let deployer = router.deployer().address();

        if admin == deployer {
            return Err(DeployError::RoleHandoffRefused(
                "admin address equals deployer address".into(),
            ));
        }
        if !owner.has_role(DEFAULT_ADMIN_ROLE, admin).await? {
            return Err(DeployError::RoleHandoffRefused(format!(
                "admin {admin:?} does not hold the default admin role"
            )));
        }

        info!("Send transaction to renounce role");
        info!("Owner contract: {:?}", owner.address());
        info!("Deployer address: {:?}", deployer);
        let data = owner.encode_renounce_role(DEFAULT_ADMIN_ROLE, deployer)?;
        router.route_owner_call(TxOrigin::Deployer, data).await?;
        Ok(())
    }
}

/// `Vault.updateAll(verifier, version)` through the owner contract.
pub async fn update_verifiers(
    ctx: &DeployContext,
    index: usize,
    origin: TxOrigin,
    verifier: Address,
    circuit_version: &str,
) -> Result<()> {
    let vault = ctx.vault(index).await?;
    let router = ctx.router(index).await?;
    info!("Send transaction to update new circuit version");
    info!("Vault contract address: {:?}", vault.address());
    info!("Snark verifier address: {:?}", verifier);
    info!("Circuit version: {}", circuit_version);
    let data = vault.encode_update_all(verifier, circuit_version)?;
    router.route_execution(origin, vault.address(), data).await?;
    Ok(())
}
