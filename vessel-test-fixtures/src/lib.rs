//! Test fixtures for the deployment toolkit: a fake multi-chain network, a
//! contract catalog matching it, and ready-to-use configurations.

use std::path::Path;
use std::sync::Arc;

use ethers::types::{Address, H256};
use serde_json::json;
use vessel_deploy::network::{ChainRpc, NetworkRegistry};
use vessel_deploy::release::CircuitRelease;
use vessel_deploy::{ConfigStore, DeployContext, DeployError, DeploymentConfig};

pub mod abi;
pub mod chain;

pub use abi::{fixture_catalog, write_artifacts, SNARK_VERIFIER};
pub use chain::{ContractKind, FakeChain, PortalState, SentTx, VaultState};

pub const DEPLOYER_SK: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";
pub const ADMIN_SK: &str = "0x0000000000000000000000000000000000000000000000000000000000000002";
/// Address of [`DEPLOYER_SK`].
pub const DEPLOYER_ADDRESS: &str = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf";
/// Address of [`ADMIN_SK`].
pub const ADMIN_ADDRESS: &str = "0x2B5AD5c4795c026514f8317c7a215E218DcCD6cF";

pub const RELEASE_TAG: &str = "v3.0.0";
pub const BASE_EID: u32 = 30101;
pub const BASE_CHAIN_ID: u64 = 31337;

pub fn deployer_address() -> Address {
    DEPLOYER_ADDRESS.parse().unwrap_or_default()
}

pub fn admin_address() -> Address {
    ADMIN_ADDRESS.parse().unwrap_or_default()
}

pub fn weth_address() -> Address {
    Address::repeat_byte(0xee)
}

pub fn operator_address() -> Address {
    Address::repeat_byte(0x0a)
}

pub fn exit_manager_address() -> Address {
    Address::repeat_byte(0x0b)
}

/// Declared L1 and L2 last-commit hashes for peer chain `logic_chain_id`.
pub fn checkpoint_hashes(logic_chain_id: u32) -> (H256, H256) {
    (
        H256::repeat_byte(0x10 + logic_chain_id as u8),
        H256::repeat_byte(0x20 + logic_chain_id as u8),
    )
}

/// Config of sub-chain `logic_chain_id` in a set of `chain_count`, primary 0.
pub fn sub_chain_json(logic_chain_id: u32, chain_count: u32) -> serde_json::Value {
    let checkpoints: Vec<_> = (0..chain_count)
        .filter(|peer| *peer != logic_chain_id)
        .map(|peer| {
            let (l1, l2) = checkpoint_hashes(peer);
            json!({
                "LOGIC_CHAIN_ID": peer,
                "L1_LAST_COMMIT_HASH": format!("{l1:?}"),
                "L2_LAST_COMMIT_HASH": format!("{l2:?}"),
            })
        })
        .collect();

    json!({
        "ESSENTIAL": {
            "NODE_RPC_URL": format!("http://127.0.0.1:{}", 8545 + logic_chain_id),
            "CHAIN_ID": BASE_CHAIN_ID + logic_chain_id as u64,
            "LOGIC_CHAIN_ID": logic_chain_id,
            "PRIMARY_LOGIC_CHAIN_ID": 0,
            "DEPLOYER_SK": DEPLOYER_SK,
            "ADMIN_SK": ADMIN_SK,
            "ADMIN_ADDRESS": ADMIN_ADDRESS,
            "MAX_FEE_PER_GAS": 100,
            "MAX_PRIORITY_FEE_PER_GAS": 1,
            "ENABLE_1559": logic_chain_id == 0,
            "ENABLE_MULTISIG_ADMIN": false,
            "OPERATOR_ADDRESSES": [format!("{:?}", operator_address())],
            "EXIT_MANAGER_ADDRESSES": [format!("{:?}", exit_manager_address())],
            "GITHUB_TOKEN": "",
            "RELEASE_TAG": RELEASE_TAG,
            "PRE_COMMIT_CHECKPOINT": checkpoints,
            "LAYER_ZERO_ENDPOINT_ADDRESS": format!("{:?}", Address::repeat_byte(0x1a)),
            "LAYER_ZERO_ENDPOINT_EID": BASE_EID + logic_chain_id,
            "WETH_CONTRACT_ADDRESS": format!("{:?}", weth_address()),
        },
        "TEST": {
            "TOKENS": [
                {
                    "ID": 1,
                    "SYMBOL": "USDT",
                    "ADDRESS": "",
                    "DECIMALS": 6,
                    "LIMIT_DIGIT": 8,
                    "PRECISION_DIGIT": 2
                }
            ]
        }
    })
}

/// A consistent set of `chain_count` sub-chains with nothing deployed yet.
pub fn fixture_config(chain_count: u32) -> DeploymentConfig {
    let value = json!({
        "SUB_CHAIN_CNT": chain_count,
        "SUB_CHAIN_CONFIGS": (0..chain_count)
            .map(|i| sub_chain_json(i, chain_count))
            .collect::<Vec<_>>(),
    });
    serde_json::from_value(value).unwrap_or_else(|e| panic!("fixture config is malformed: {e}"))
}

/// Registry resolving logic chain `i` to `chains[i]`.
pub fn fake_registry(chains: Vec<Arc<FakeChain>>) -> NetworkRegistry {
    NetworkRegistry::with_factory(move |config| {
        chains
            .get(config.logic_chain_id as usize)
            .cloned()
            .map(|chain| chain as Arc<dyn ChainRpc>)
            .ok_or_else(|| {
                DeployError::Rpc(format!("no fake chain for logic chain {}", config.logic_chain_id))
            })
    })
}

/// Release whose verifier bytecode the fake chain recognizes.
pub fn fixture_release(version: &str) -> CircuitRelease {
    CircuitRelease {
        version: version.to_string(),
        unified_bytecode: abi::bytecode(SNARK_VERIFIER),
    }
}

/// A fake deployment environment rooted at `dir`.
pub struct FixtureEnv {
    pub ctx: DeployContext,
    pub chains: Vec<Arc<FakeChain>>,
}

impl FixtureEnv {
    /// Store `config` under `dir` and connect every sub-chain to its own fake chain.
    pub fn new(dir: &Path, config: DeploymentConfig) -> anyhow::Result<Self> {
        let chains: Vec<_> = config
            .sub_chain_configs
            .iter()
            .map(|c| FakeChain::new(c.essential.chain_id))
            .collect();
        let store = ConfigStore::create(ConfigStore::path_for(dir, "test"), config)?;
        let ctx = DeployContext::new(store, fixture_catalog(), fake_registry(chains.clone()));
        Ok(Self { ctx, chains })
    }

    /// Environment of `chain_count` fresh sub-chains.
    pub fn with_chains(dir: &Path, chain_count: u32) -> anyhow::Result<Self> {
        Self::new(dir, fixture_config(chain_count))
    }

    pub fn chain(&self, index: usize) -> &Arc<FakeChain> {
        &self.chains[index]
    }

    /// Reload the context from disk over the same fake chains, as a re-run would.
    pub fn reload(self) -> anyhow::Result<Self> {
        let path = self.ctx.store.path().to_path_buf();
        let store = ConfigStore::load(path)?;
        let ctx = DeployContext::new(store, fixture_catalog(), fake_registry(self.chains.clone()));
        Ok(Self {
            ctx,
            chains: self.chains,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;

    #[test]
    fn test_fixture_config_is_consistent() {
        let config = fixture_config(3);
        config.validate().unwrap();
        assert_eq!(config.eid_list(), vec![30101, 30102, 30103]);
        let essential = &config.sub_chain_configs[1].essential;
        assert_eq!(essential.pre_commit_checkpoint.len(), 2);
        assert_eq!(essential.deployer_wallet().unwrap().address(), deployer_address());
        assert_eq!(essential.admin_wallet().unwrap().address(), admin_address());
    }
}
