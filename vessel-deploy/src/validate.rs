//! Read-only comparison of a sub-chain's declared configuration against what is
//! deployed, followed by flipping the `configured` flags once everything matches.

use ethers::types::{Address, H256, U256};
use tracing::info;

use crate::config::{require, DeploymentConfig, EssentialConfig};
use crate::context::DeployContext;
use crate::contracts::{
    proxy_admin_of, verify_hash_chain, PortalContract, PreCommitCheckpoint, VaultContract,
};
use crate::encoding::address_to_bytes32;
use crate::error::{DeployError, Result};
use crate::names;
use crate::router::{ExecutionOutcome, TxOrigin};

const VAULT_CONFIGURATION: &str = "Validate Vault Configurations";
const VAULT_PROXY: &str = "Validate Vault Proxy";
const PORTAL_CONFIGURATION: &str = "Validate LZPortal Configurations";
const EID_MAPPING: &str = "Eid and LogicChainId mapping";
const PEER_TOPOLOGY: &str = "Peer by EID";
const PORTAL_PROXY: &str = "Validate LZPortal Proxy";

fn expect_eq<T>(step: &'static str, field: impl Into<String>, expected: T, observed: T) -> Result<()>
where
    T: PartialEq + std::fmt::Debug,
{
    let field = field.into();
    if expected != observed {
        return Err(DeployError::violation(
            step,
            field,
            format!("{expected:?}"),
            format!("{observed:?}"),
        ));
    }
    info!("{} passes validation", field);
    Ok(())
}

/// Validates one sub-chain. Stops at the first violation.
pub struct ConsistencyValidator<'a> {
    ctx: &'a DeployContext,
    index: usize,
}

impl<'a> ConsistencyValidator<'a> {
    pub fn new(ctx: &'a DeployContext, index: usize) -> Self {
        Self { ctx, index }
    }

    fn config(&self) -> &DeploymentConfig {
        self.ctx.store.config()
    }

    fn essential(&self) -> Result<&EssentialConfig> {
        self.ctx.essential(self.index)
    }

    /// Run every check in order.
    pub async fn validate(&self) -> Result<()> {
        let essential = self.essential()?;
        info!("========= Validate Deployment and Configuration =========");
        info!("Chain ID: {}", essential.chain_id);
        info!("Node RPC: {}", essential.node_rpc_url);
        info!("Vault address: {:?}", essential.addresses.vault_proxy()?);

        let vault = self.ctx.vault(self.index).await?;
        let portal = self.ctx.portal(self.index).await?;

        info!("========= Step 1: {} =========", VAULT_CONFIGURATION);
        self.check_vault_identity(&vault).await?;
        self.check_roles(&vault).await?;
        self.check_vault_wiring(&vault).await?;
        self.check_checkpoints(&vault).await?;

        info!("========= Step 2: {} =========", VAULT_PROXY);
        self.check_proxy(
            VAULT_PROXY,
            "VAULT_PROXY_ADMIN_CONTRACT_ADDRESS",
            essential.addresses.vault_proxy()?,
            essential.addresses.vault_proxy_admin_contract_address,
        )
        .await?;

        info!("========= Step 3: {} =========", PORTAL_CONFIGURATION);
        expect_eq(
            PORTAL_CONFIGURATION,
            "SUB_CHAIN_CNT",
            self.config().sub_chain_cnt,
            portal.chain_cnt().await?,
        )?;
        expect_eq(
            PORTAL_CONFIGURATION,
            "Vault address",
            essential.addresses.vault_proxy()?,
            portal.vault_contract().await?,
        )?;
        self.check_eid_mapping(&portal).await?;
        self.check_peers(&portal).await?;

        info!("========= Step 4: {} =========", PORTAL_PROXY);
        self.check_proxy(
            PORTAL_PROXY,
            "LAYER_ZERO_PORTAL_PROXY_ADMIN_CONTRACT_ADDRESS",
            essential.addresses.portal_proxy()?,
            essential.addresses.layer_zero_portal_proxy_admin_contract_address,
        )
        .await
    }

    async fn check_vault_identity(&self, vault: &VaultContract) -> Result<()> {
        let essential = self.essential()?;
        expect_eq(
            VAULT_CONFIGURATION,
            "SUB_CHAIN_CNT",
            self.config().sub_chain_cnt,
            vault.chain_cnt().await?,
        )?;
        expect_eq(
            VAULT_CONFIGURATION,
            "LOGIC_CHAIN_ID",
            essential.logic_chain_id,
            vault.logic_chain_id().await?,
        )?;
        expect_eq(
            VAULT_CONFIGURATION,
            "PRIMARY_LOGIC_CHAIN_ID",
            essential.primary_logic_chain_id,
            vault.primary_logic_chain_id().await?,
        )
    }

    async fn check_roles(&self, vault: &VaultContract) -> Result<()> {
        let essential = self.essential()?;
        for operator in &essential.operator_addresses {
            if !vault.is_operator(*operator).await? {
                return Err(DeployError::violation(
                    VAULT_CONFIGURATION,
                    format!("OPERATOR_ADDRESSES {operator:?}"),
                    "registered",
                    "not registered",
                ));
            }
        }
        info!("OPERATOR_ADDRESSES passes validation");

        for exit_manager in &essential.exit_manager_addresses {
            if !vault.is_exit_manager(*exit_manager).await? {
                return Err(DeployError::violation(
                    VAULT_CONFIGURATION,
                    format!("EXIT_MANAGER_ADDRESSES {exit_manager:?}"),
                    "registered",
                    "not registered",
                ));
            }
        }
        info!("EXIT_MANAGER_ADDRESSES passes validation");
        Ok(())
    }

    async fn check_vault_wiring(&self, vault: &VaultContract) -> Result<()> {
        let essential = self.essential()?;
        let book = &essential.addresses;

        let observed = vault.circuit_version().await?;
        if essential.release_tag != observed {
            return Err(DeployError::violation(
                VAULT_CONFIGURATION,
                "Circuit version",
                &essential.release_tag,
                observed,
            ));
        }
        info!("Circuit version passes validation");

        expect_eq(
            VAULT_CONFIGURATION,
            "WETH_CONTRACT_ADDRESS",
            require(book.weth_contract_address, "WETH_CONTRACT_ADDRESS")?,
            vault.weth_address().await?,
        )?;

        let logic_checks: [(&str, &'static str, Address); 5] = [
            (
                names::MANAGER_API_LOGIC,
                "MANAGER_API_LOGIC_CONTRACT_ADDRESS",
                vault.manager_api_logic_address().await?,
            ),
            (
                names::MESSAGE_QUEUE_LOGIC,
                "MESSAGE_QUEUE_LOGIC_CONTRACT_ADDRESS",
                vault.message_queue_logic_address().await?,
            ),
            (
                names::MULTI_CHAIN_LOGIC,
                "MULTI_CHAIN_LOGIC_CONTRACT_ADDRESS",
                vault.multi_chain_logic_address().await?,
            ),
            (
                names::TOKEN_MANAGER_LOGIC,
                "TOKEN_MANAGER_LOGIC_CONTRACT_ADDRESS",
                vault.token_manager_logic_address().await?,
            ),
            (
                names::USER_API_LOGIC,
                "USER_API_LOGIC_CONTRACT_ADDRESS",
                vault.user_api_logic_address().await?,
            ),
        ];
        for (name, field, observed) in logic_checks {
            let expected = require(book.implementation(name), field)?;
            expect_eq(VAULT_CONFIGURATION, field, expected, observed)?;
        }

        expect_eq(
            VAULT_CONFIGURATION,
            "Vault admin",
            book.owner()?,
            vault.admin().await?,
        )?;
        expect_eq(
            VAULT_CONFIGURATION,
            "L0 portal",
            book.portal_proxy()?,
            vault.cross_chain_portal_contract().await?,
        )
    }

    async fn check_checkpoints(&self, vault: &VaultContract) -> Result<()> {
        let essential = self.essential()?;
        for seed in &essential.pre_commit_checkpoint {
            let actual = vault.pre_commit_checkpoint(seed.logic_chain_id).await?;
            let field = |name: &str| format!("PRE_COMMIT_CHECKPOINT[{}].{name}", seed.logic_chain_id);
            // The on-chain cursor must pick up the chain where the seed left it.
            let linked =
                verify_hash_chain(&[PreCommitCheckpoint::seed(seed), actual.clone()]).is_ok();

            let mismatch = if actual.logic_chain_id != seed.logic_chain_id {
                Some((field("logicChainId"), seed.logic_chain_id.to_string(), actual.logic_chain_id.to_string()))
            } else if !actual.l1_message_cnt.is_zero() {
                Some((field("l1MessageCnt"), "0".to_string(), actual.l1_message_cnt.to_string()))
            } else if !linked {
                Some((
                    field("l1LastCommitHash"),
                    format!("{:?}", seed.l1_last_commit_hash),
                    format!("{:?}", actual.l1_last_commit_hash),
                ))
            } else if actual.l1_next_commit_hash != seed.l1_last_commit_hash {
                Some((
                    field("l1NextCommitHash"),
                    format!("{:?}", seed.l1_last_commit_hash),
                    format!("{:?}", actual.l1_next_commit_hash),
                ))
            } else if actual.l2_last_commit_hash != seed.l2_last_commit_hash {
                Some((
                    field("l2LastCommitHash"),
                    format!("{:?}", seed.l2_last_commit_hash),
                    format!("{:?}", actual.l2_last_commit_hash),
                ))
            } else {
                None
            };

            if let Some((field, expected, observed)) = mismatch {
                return Err(DeployError::violation(VAULT_CONFIGURATION, field, expected, observed));
            }
        }
        info!("PRE_COMMIT_CHECKPOINT passes validation");

        let confirmation = vault.post_commit_confirmation().await?;
        expect_eq(
            VAULT_CONFIGURATION,
            "POST_COMMIT_CONFIRMATION.l1MessageCnt",
            U256::zero(),
            confirmation.l1_message_cnt,
        )?;
        expect_eq(
            VAULT_CONFIGURATION,
            "POST_COMMIT_CONFIRMATION.l1NextCommitHash",
            vault.l1_commit_hash().await?,
            confirmation.l1_next_commit_hash,
        )?;
        expect_eq(
            VAULT_CONFIGURATION,
            "POST_COMMIT_CONFIRMATION.l2NextCommitHash",
            vault.l2_commit_hash().await?,
            confirmation.l2_next_commit_hash,
        )
    }

    /// `proxy`'s admin slot holds `declared_admin`, and that proxy admin is owned
    /// by the owner contract.
    async fn check_proxy(
        &self,
        step: &'static str,
        field: &'static str,
        proxy: Address,
        declared_admin: Option<Address>,
    ) -> Result<()> {
        let client = self.ctx.client(self.index).await?;
        let declared_admin = require(declared_admin, field)?;
        expect_eq(step, field, declared_admin, proxy_admin_of(&client, proxy).await?)?;

        let proxy_admin = self.ctx.proxy_admin(self.index, declared_admin).await?;
        expect_eq(
            step,
            format!("{field} owner"),
            self.essential()?.addresses.owner()?,
            proxy_admin.owner().await?,
        )
    }

    async fn check_eid_mapping(&self, portal: &PortalContract) -> Result<()> {
        for (logic_chain_id, eid) in self.config().eid_list().into_iter().enumerate() {
            let logic_chain_id = logic_chain_id as u32;
            expect_eq(
                EID_MAPPING,
                format!("logicChainIdToEid({logic_chain_id})"),
                eid,
                portal.logic_chain_id_to_eid(logic_chain_id).await?,
            )?;
            expect_eq(
                EID_MAPPING,
                format!("eidToLogicChainId({eid})"),
                logic_chain_id,
                portal.eid_to_logic_chain_id(eid).await?,
            )?;
        }
        info!("{} passes validation", EID_MAPPING);
        Ok(())
    }

    /// Star topology: the primary portal is bound to every subsidiary portal, a
    /// subsidiary portal only to the primary.
    async fn check_peers(&self, portal: &PortalContract) -> Result<()> {
        let essential = self.essential()?;
        for peer in &self.config().sub_chain_configs {
            let peer = &peer.essential;
            let eid = peer.layer_zero_endpoint_eid;
            let expected = if essential.is_primary() != peer.is_primary() {
                address_to_bytes32(peer.addresses.portal_proxy()?)
            } else {
                H256::zero()
            };
            expect_eq(
                PEER_TOPOLOGY,
                format!("peers({eid})"),
                expected,
                portal.peer(eid).await?,
            )?;
        }
        Ok(())
    }

    /// Mark the vault and the portal as configured, through the admin.
    pub async fn finalize(&self) -> Result<Vec<ExecutionOutcome>> {
        info!("========= Step 5: Enable Vault and LzPortal as Configured =========");
        let vault = self.ctx.vault(self.index).await?;
        let portal = self.ctx.portal(self.index).await?;
        let router = self.ctx.router(self.index).await?;

        info!("Send transaction to set vault configured");
        let vault_outcome = router
            .route_execution(TxOrigin::Admin, vault.address(), vault.encode_set_configured(true)?)
            .await?;
        info!("Send transaction to set lzPortal configured");
        let portal_outcome = router
            .route_execution(TxOrigin::Admin, portal.address(), portal.encode_set_configured(true)?)
            .await?;
        Ok(vec![vault_outcome, portal_outcome])
    }
}
