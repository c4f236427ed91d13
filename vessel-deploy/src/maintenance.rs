//! Operator flows run after the initial deployment.

use ethers::types::{Address, Bytes, H256, U256};
use tracing::info;

use crate::config::{require, EssentialConfig};
use crate::context::DeployContext;
use crate::contracts::{implementation_of, proxy_admin_of};
use crate::deploy::{deploy_contract, deploy_implementations, deploy_token, deploy_verifier, update_verifiers};
use crate::error::{DeployError, Result};
use crate::names;
use crate::release::CircuitRelease;
use crate::router::{ExecutionOutcome, TxOrigin};

fn banner(ctx: &DeployContext, index: usize, title: &str) -> Result<()> {
    let essential = ctx.essential(index)?;
    info!("========= {} =========", title);
    info!("Chain ID: {}", essential.chain_id);
    info!("Node RPC: {}", essential.node_rpc_url);
    match essential.addresses.vault_proxy_contract_address {
        Some(vault) => info!("Vault address: {:?}", vault),
        None => info!("Vault address: not deployed"),
    }
    Ok(())
}

/// Portals a sub-chain must bind, as `(eid, portal)`. The primary binds every
/// subsidiary, a subsidiary binds only the primary.
pub fn peer_targets(configs: &[&EssentialConfig], own: &EssentialConfig) -> Result<Vec<(u32, Address)>> {
    configs
        .iter()
        .filter(|peer| peer.is_primary() != own.is_primary())
        .map(|peer| Ok((peer.layer_zero_endpoint_eid, peer.addresses.portal_proxy()?)))
        .collect()
}

/// Bind this sub-chain's portal to its peers.
pub async fn configure_portal_peers(ctx: &DeployContext, index: usize) -> Result<Vec<ExecutionOutcome>> {
    banner(ctx, index, "Configure LayerZeroPortal")?;
    let essential = ctx.essential(index)?;
    let portal = ctx.portal(index).await?;
    let router = ctx.router(index).await?;
    info!("LZ Portal address: {:?}", portal.address());

    info!("========= Step 1: Set Peers for LZ Portal =========");
    if essential.is_primary() {
        info!("This chain is PRIMARY chain. Set peers to all affiliated chain portals.");
    } else {
        info!("This chain is SUBSIDIARY chain. Set peer to primary chain portal.");
    }

    let configs: Vec<&EssentialConfig> = ctx
        .store
        .config()
        .sub_chain_configs
        .iter()
        .map(|c| &c.essential)
        .collect();

    let mut outcomes = Vec::new();
    for (eid, peer) in peer_targets(&configs, essential)? {
        info!("Send transaction to set peer");
        info!("Peer eid: {}", eid);
        info!("Peer address: {:?}", peer);
        let data = portal.encode_set_peer(eid, peer)?;
        outcomes.push(
            router
                .route_execution(TxOrigin::Admin, portal.address(), data)
                .await?,
        );
    }
    Ok(outcomes)
}

/// Deploy the verifier of `release` and point the vault at it. Refused when the
/// vault already runs that circuit version.
pub async fn update_verifier(
    ctx: &mut DeployContext,
    index: usize,
    release: &CircuitRelease,
) -> Result<ExecutionOutcome> {
    banner(ctx, index, "Update Snark Verifier")?;
    let current = ctx.vault(index).await?.circuit_version().await?;
    if current == release.version {
        return Err(DeployError::Release(format!(
            "on-chain circuit version equals release version {current}"
        )));
    }
    info!("Current circuit version: {}", current);
    info!("New circuit version to upgrade: {}", release.version);

    info!("========= Step 2: Deploy bytecode of all verifiers =========");
    let verifier = deploy_verifier(ctx, index, release).await?;
    ctx.record(index, |c| {
        c.essential.addresses.snark_verifier_contract_address = Some(verifier)
    })?;

    info!("========= Step 3: Update vault with new version =========");
    let vault = ctx.vault(index).await?;
    let router = ctx.router(index).await?;
    let data = vault.encode_update_all(verifier, &release.version)?;
    let outcome = router
        .route_execution(TxOrigin::Admin, vault.address(), data)
        .await?;
    if outcome.receipt().is_some() {
        ctx.record(index, |c| c.essential.release_tag = release.version.clone())?;
    }
    Ok(outcome)
}

/// Redeploy the vault implementation and logic contracts, then upgrade the vault
/// proxy through its proxy admin.
pub async fn upgrade_vault_impl(ctx: &mut DeployContext, index: usize) -> Result<ExecutionOutcome> {
    banner(ctx, index, "Update Vault Implementation")?;

    info!("========= Step 1: Deploy New Vault Implementations =========");
    deploy_implementations(ctx, index, true).await?;

    info!("========= Step 2: Upgrade Vault proxy implementation =========");
    let book = ctx.essential(index)?.addresses.clone();
    let proxy = book.vault_proxy()?;
    let implementation = require(book.vault_impl_contract_address, "VAULT_IMPL_CONTRACT_ADDRESS")?;
    let proxy_admin = match book.vault_proxy_admin_contract_address {
        Some(admin) => admin,
        None => proxy_admin_of(&ctx.client(index).await?, proxy).await?,
    };

    let proxy_admin = ctx.proxy_admin(index, proxy_admin).await?;
    let router = ctx.router(index).await?;
    info!("Send transaction to upgrade proxy implementation");
    info!("Proxy address: {:?}", proxy);
    info!("New implementation address: {:?}", implementation);
    let data = proxy_admin.encode_upgrade_and_call(proxy, implementation, Bytes::new())?;
    router
        .route_execution(TxOrigin::Admin, proxy_admin.address(), data)
        .await
}

pub async fn register_operator(ctx: &DeployContext, index: usize, operator: Address) -> Result<ExecutionOutcome> {
    banner(ctx, index, "Register Operator")?;
    let vault = ctx.vault(index).await?;
    let router = ctx.router(index).await?;
    info!("Send transaction to add operator {:?}", operator);
    let data = vault.encode_register_operator(operator)?;
    router
        .route_execution(TxOrigin::Admin, vault.address(), data)
        .await
}

pub async fn register_exit_manager(
    ctx: &DeployContext,
    index: usize,
    exit_manager: Address,
) -> Result<ExecutionOutcome> {
    banner(ctx, index, "Register Exit Manager")?;
    let vault = ctx.vault(index).await?;
    let router = ctx.router(index).await?;
    info!("Send transaction to add exit manager {:?}", exit_manager);
    let data = vault.encode_register_exit_manager(exit_manager)?;
    router
        .route_execution(TxOrigin::Admin, vault.address(), data)
        .await
}

/// Deploy a WETH contract for test networks and record it.
pub async fn deploy_weth(ctx: &mut DeployContext, index: usize) -> Result<Address> {
    banner(ctx, index, "Deploy WETH Token contract")?;
    let weth = deploy_contract(ctx, index, names::WETH, &[]).await?;
    ctx.record(index, |c| c.essential.addresses.weth_contract_address = Some(weth))?;
    Ok(weth)
}

/// Deploy every test token of the sub-chain and record their addresses.
pub async fn deploy_tokens(ctx: &mut DeployContext, index: usize) -> Result<Vec<Address>> {
    banner(ctx, index, "Deploy Test Tokens")?;
    let tokens = ctx.sub_chain(index)?.test.tokens.clone();

    let mut addresses = Vec::with_capacity(tokens.len());
    for (position, token) in tokens.iter().enumerate() {
        let address = deploy_token(ctx, index, token).await?;
        ctx.record(index, |c| {
            if let Some(entry) = c.test.tokens.get_mut(position) {
                entry.address = Some(address);
            }
        })?;
        info!("ERC20 Token {} is deployed to: {:?}.", token.symbol, address);
        addresses.push(address);
    }
    Ok(addresses)
}

/// Register each test token as a vault asset and activate it.
pub async fn register_tokens(ctx: &DeployContext, index: usize) -> Result<Vec<ExecutionOutcome>> {
    banner(ctx, index, "Register And Activate Token")?;
    let vault = ctx.vault(index).await?;
    let router = ctx.router(index).await?;

    let mut outcomes = Vec::new();
    for token in &ctx.sub_chain(index)?.test.tokens {
        let address = token.address.ok_or(DeployError::MissingAddress("TEST.TOKENS.ADDRESS"))?;
        info!("Send transaction to register token");
        info!("TokenAddress: {:?}", address);
        info!("AssetId: {}", token.id);
        let data = vault.encode_register_new_asset(
            address,
            token.id,
            token.limit_digit,
            token.precision_digit,
            token.decimals,
        )?;
        outcomes.push(router.route_execution(TxOrigin::Admin, vault.address(), data).await?);

        info!("Send transaction to activate asset {}", token.id);
        let data = vault.encode_set_asset_active(token.id)?;
        outcomes.push(router.route_execution(TxOrigin::Admin, vault.address(), data).await?);
    }
    Ok(outcomes)
}

/// Snapshot of a deployed vault, for debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultInspection {
    pub proxy_admin: Address,
    pub implementation: Address,
    pub admin: Address,
    pub circuit_version: String,
    pub weth: Address,
    pub l1_commit_index: U256,
    pub l1_commit_hash: H256,
    pub l2_commit_hash: H256,
}

pub async fn inspect(ctx: &DeployContext, index: usize) -> Result<VaultInspection> {
    banner(ctx, index, "Inspect Vault")?;
    let client = ctx.client(index).await?;
    let vault = ctx.vault(index).await?;

    let inspection = VaultInspection {
        proxy_admin: proxy_admin_of(&client, vault.address()).await?,
        implementation: implementation_of(&client, vault.address()).await?,
        admin: vault.admin().await?,
        circuit_version: vault.circuit_version().await?,
        weth: vault.weth_address().await?,
        l1_commit_index: vault.l1_commit_index().await?,
        l1_commit_hash: vault.l1_commit_hash().await?,
        l2_commit_hash: vault.l2_commit_hash().await?,
    };
    info!("Proxy admin: {:?}", inspection.proxy_admin);
    info!("Implementation: {:?}", inspection.implementation);
    info!("Admin: {:?}", inspection.admin);
    info!("Circuit version: {}", inspection.circuit_version);
    info!("WETH: {:?}", inspection.weth);
    info!(
        "L1 to L2 queue: index {} hash {:?}",
        inspection.l1_commit_index, inspection.l1_commit_hash
    );
    info!("L2 to L1 queue hash: {:?}", inspection.l2_commit_hash);
    Ok(inspection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AddressBook;

    fn essential(logic_chain_id: u32, eid: u32, portal: u8) -> EssentialConfig {
        serde_json::from_value(serde_json::json!({
            "NODE_RPC_URL": "http://127.0.0.1:8545",
            "CHAIN_ID": 31337,
            "LOGIC_CHAIN_ID": logic_chain_id,
            "PRIMARY_LOGIC_CHAIN_ID": 0,
            "DEPLOYER_SK": "",
            "ADMIN_SK": "",
            "ADMIN_ADDRESS": "",
            "MAX_FEE_PER_GAS": 100,
            "MAX_PRIORITY_FEE_PER_GAS": 1,
            "ENABLE_1559": false,
            "ENABLE_MULTISIG_ADMIN": false,
            "RELEASE_TAG": "v3.0.0",
            "LAYER_ZERO_ENDPOINT_ADDRESS": "",
            "LAYER_ZERO_ENDPOINT_EID": eid,
            "LAYER_ZERO_PORTAL_PROXY_CONTRACT_ADDRESS": format!("{:?}", Address::repeat_byte(portal)),
        }))
        .unwrap()
    }

    #[test]
    fn test_primary_binds_every_subsidiary() {
        let chains = [essential(0, 100, 0xa0), essential(1, 101, 0xa1), essential(2, 102, 0xa2)];
        let refs: Vec<_> = chains.iter().collect();
        let targets = peer_targets(&refs, &chains[0]).unwrap();
        assert_eq!(
            targets,
            vec![(101, Address::repeat_byte(0xa1)), (102, Address::repeat_byte(0xa2))]
        );
    }

    #[test]
    fn test_subsidiary_binds_only_primary() {
        let chains = [essential(0, 100, 0xa0), essential(1, 101, 0xa1), essential(2, 102, 0xa2)];
        let refs: Vec<_> = chains.iter().collect();
        assert_eq!(
            peer_targets(&refs, &chains[2]).unwrap(),
            vec![(100, Address::repeat_byte(0xa0))]
        );
    }

    #[test]
    fn test_missing_peer_portal_is_reported() {
        let mut chains = [essential(0, 100, 0xa0), essential(1, 101, 0xa1)];
        chains[0].addresses = AddressBook::default();
        let refs: Vec<_> = chains.iter().collect();
        assert!(matches!(
            peer_targets(&refs, &chains[1]),
            Err(DeployError::MissingAddress("LAYER_ZERO_PORTAL_PROXY_CONTRACT_ADDRESS"))
        ));
    }
}
