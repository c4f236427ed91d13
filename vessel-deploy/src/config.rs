//! Deployment configuration and its on-disk store.
//!
//! The store is a single JSON document, `.config.<NODE_ENV>.json`, holding one
//! [`SubChainConfig`] per participating network. Every load first copies the file
//! into `config-backup/`, and every save overwrites the whole file.

use std::fs;
use std::path::{Path, PathBuf};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DeployError, Result};
use crate::names;

/// Environment variable selecting the config file.
pub const NODE_ENV_VAR: &str = "NODE_ENV";

/// Config environment used when `NODE_ENV` is unset.
pub const DEFAULT_NODE_ENV: &str = "local";

/// Directory, relative to the config file, receiving timestamped backups.
pub const BACKUP_DIR: &str = "config-backup";

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// The whole deployment set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DeploymentConfig {
    pub sub_chain_cnt: u32,
    pub sub_chain_configs: Vec<SubChainConfig>,
}

/// One participating network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SubChainConfig {
    pub essential: EssentialConfig,
    #[serde(default)]
    pub test: TestConfig,
}

/// Seed for a peer chain's pre-commit checkpoint, written by `configureAll`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CheckpointSeed {
    pub logic_chain_id: u32,
    pub l1_last_commit_hash: H256,
    pub l2_last_commit_hash: H256,
}

/// Identity, secrets, policy and the address book of a sub-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct EssentialConfig {
    pub node_rpc_url: String,
    pub chain_id: u64,
    pub logic_chain_id: u32,
    pub primary_logic_chain_id: u32,

    pub deployer_sk: String,
    pub admin_sk: String,
    #[serde(with = "opt_address")]
    pub admin_address: Option<Address>,

    /// Ceiling for the network fee, in gwei.
    pub max_fee_per_gas: f64,
    /// Priority fee attached to 1559 transactions, in gwei.
    pub max_priority_fee_per_gas: f64,
    #[serde(rename = "ENABLE_1559")]
    pub enable_1559: bool,
    pub enable_multisig_admin: bool,

    #[serde(default)]
    pub operator_addresses: Vec<Address>,
    #[serde(default)]
    pub exit_manager_addresses: Vec<Address>,

    #[serde(default)]
    pub github_token: String,
    pub release_tag: String,

    #[serde(default)]
    pub pre_commit_checkpoint: Vec<CheckpointSeed>,

    #[serde(with = "opt_address")]
    pub layer_zero_endpoint_address: Option<Address>,
    pub layer_zero_endpoint_eid: u32,

    #[serde(flatten)]
    pub addresses: AddressBook,

    /// Wiring steps already carried out by the orchestrator.
    #[serde(default)]
    pub completed_steps: Vec<String>,
}

/// Addresses of every deployed contract; `None` (an empty string on disk) until
/// the corresponding step has run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AddressBook {
    #[serde(default, with = "opt_address")]
    pub weth_contract_address: Option<Address>,
    #[serde(default, with = "opt_address")]
    pub owner_contract_address: Option<Address>,

    #[serde(default, with = "opt_address")]
    pub vault_proxy_contract_address: Option<Address>,
    #[serde(default, with = "opt_address")]
    pub vault_proxy_admin_contract_address: Option<Address>,
    #[serde(default, with = "opt_address")]
    pub vault_impl_contract_address: Option<Address>,
    #[serde(default, with = "opt_address")]
    pub manager_api_logic_contract_address: Option<Address>,
    #[serde(default, with = "opt_address")]
    pub message_queue_logic_contract_address: Option<Address>,
    #[serde(default, with = "opt_address")]
    pub multi_chain_logic_contract_address: Option<Address>,
    #[serde(default, with = "opt_address")]
    pub token_manager_logic_contract_address: Option<Address>,
    #[serde(default, with = "opt_address")]
    pub user_api_logic_contract_address: Option<Address>,

    #[serde(default, with = "opt_address")]
    pub layer_zero_portal_proxy_contract_address: Option<Address>,
    #[serde(default, with = "opt_address")]
    pub layer_zero_portal_proxy_admin_contract_address: Option<Address>,
    #[serde(default, with = "opt_address")]
    pub layer_zero_portal_impl_contract_address: Option<Address>,

    #[serde(default, with = "opt_address")]
    pub snark_verifier_contract_address: Option<Address>,
}

/// Test-only section: tokens deployed and registered on test networks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TestConfig {
    #[serde(default)]
    pub tokens: Vec<TokenInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TokenInfo {
    pub id: u32,
    pub symbol: String,
    #[serde(default, with = "opt_address")]
    pub address: Option<Address>,
    pub decimals: u8,
    pub limit_digit: u8,
    pub precision_digit: u8,
}

impl EssentialConfig {
    /// Whether this sub-chain is the hub of the star topology.
    pub fn is_primary(&self) -> bool {
        self.logic_chain_id == self.primary_logic_chain_id
    }

    pub fn step_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }

    pub fn mark_step_completed(&mut self, step: &str) {
        if !self.step_completed(step) {
            self.completed_steps.push(step.to_string());
        }
    }

    /// Wallet deploying contracts and holding the owner role until handoff.
    pub fn deployer_wallet(&self) -> Result<LocalWallet> {
        parse_wallet(&self.deployer_sk, self.chain_id, "DEPLOYER_SK")
    }

    /// Wallet signing admin-origin transactions when multisig is disabled.
    pub fn admin_wallet(&self) -> Result<LocalWallet> {
        parse_wallet(&self.admin_sk, self.chain_id, "ADMIN_SK")
    }
}

fn parse_wallet(secret: &str, chain_id: u64, field: &'static str) -> Result<LocalWallet> {
    secret
        .parse::<LocalWallet>()
        .map(|wallet| wallet.with_chain_id(chain_id))
        .map_err(|_| DeployError::InvalidKey(field))
}

impl AddressBook {
    /// Owner contract address, or [`DeployError::MissingAddress`].
    pub fn owner(&self) -> Result<Address> {
        require(self.owner_contract_address, "OWNER_CONTRACT_ADDRESS")
    }

    pub fn vault_proxy(&self) -> Result<Address> {
        require(self.vault_proxy_contract_address, "VAULT_PROXY_CONTRACT_ADDRESS")
    }

    pub fn portal_proxy(&self) -> Result<Address> {
        require(
            self.layer_zero_portal_proxy_contract_address,
            "LAYER_ZERO_PORTAL_PROXY_CONTRACT_ADDRESS",
        )
    }

    /// Entry holding the implementation address of `contract`, one of
    /// [`names::IMPLEMENTATIONS`].
    pub fn implementation_mut(&mut self, contract: &str) -> Option<&mut Option<Address>> {
        let entry = match contract {
            names::VAULT => &mut self.vault_impl_contract_address,
            names::MANAGER_API_LOGIC => &mut self.manager_api_logic_contract_address,
            names::MESSAGE_QUEUE_LOGIC => &mut self.message_queue_logic_contract_address,
            names::MULTI_CHAIN_LOGIC => &mut self.multi_chain_logic_contract_address,
            names::TOKEN_MANAGER_LOGIC => &mut self.token_manager_logic_contract_address,
            names::USER_API_LOGIC => &mut self.user_api_logic_contract_address,
            _ => return None,
        };
        Some(entry)
    }

    pub fn implementation(&self, contract: &str) -> Option<Address> {
        match contract {
            names::VAULT => self.vault_impl_contract_address,
            names::MANAGER_API_LOGIC => self.manager_api_logic_contract_address,
            names::MESSAGE_QUEUE_LOGIC => self.message_queue_logic_contract_address,
            names::MULTI_CHAIN_LOGIC => self.multi_chain_logic_contract_address,
            names::TOKEN_MANAGER_LOGIC => self.token_manager_logic_contract_address,
            names::USER_API_LOGIC => self.user_api_logic_contract_address,
            _ => None,
        }
    }
}

/// Unwrap an address-book entry or name the missing field.
pub fn require(value: Option<Address>, field: &'static str) -> Result<Address> {
    value.ok_or(DeployError::MissingAddress(field))
}

impl DeploymentConfig {
    /// Check the self-consistency rules that need no network access.
    pub fn validate(&self) -> Result<()> {
        let sub_chain_cnt = self.sub_chain_cnt as usize;
        if self.sub_chain_configs.len() != sub_chain_cnt {
            return Err(DeployError::ConfigInconsistent(format!(
                "SUB_CHAIN_CNT {} does not match {} SUB_CHAIN_CONFIGS",
                sub_chain_cnt,
                self.sub_chain_configs.len()
            )));
        }

        let Some(first) = self.sub_chain_configs.first() else {
            return Err(DeployError::ConfigInconsistent(
                "SUB_CHAIN_CONFIGS is empty".into(),
            ));
        };
        let primary = first.essential.primary_logic_chain_id;
        if primary as usize >= sub_chain_cnt {
            return Err(DeployError::ConfigInconsistent(format!(
                "PRIMARY_LOGIC_CHAIN_ID {primary} out of range"
            )));
        }

        for (index, sub_chain) in self.sub_chain_configs.iter().enumerate() {
            if sub_chain.essential.primary_logic_chain_id != primary {
                return Err(DeployError::ConfigInconsistent(format!(
                    "PRIMARY_LOGIC_CHAIN_ID of chain {index} invalid"
                )));
            }
            if sub_chain.essential.logic_chain_id as usize != index {
                return Err(DeployError::ConfigInconsistent(format!(
                    "LOGIC_CHAIN_ID of chain {index} invalid"
                )));
            }
        }

        Ok(())
    }

    /// The sub-chain at `index`.
    pub fn sub_chain(&self, index: usize) -> Result<&SubChainConfig> {
        self.sub_chain_configs.get(index).ok_or_else(|| {
            DeployError::ConfigInconsistent(format!("no sub-chain config at index {index}"))
        })
    }

    pub fn sub_chain_mut(&mut self, index: usize) -> Result<&mut SubChainConfig> {
        self.sub_chain_configs.get_mut(index).ok_or_else(|| {
            DeployError::ConfigInconsistent(format!("no sub-chain config at index {index}"))
        })
    }

    /// Bridge endpoint ids in logic-chain order.
    pub fn eid_list(&self) -> Vec<u32> {
        self.sub_chain_configs
            .iter()
            .map(|c| c.essential.layer_zero_endpoint_eid)
            .collect()
    }
}

/// Convert a gwei amount from the config into wei.
pub fn gwei_to_wei(gwei: f64) -> Result<U256> {
    ethers::utils::parse_units(gwei.to_string(), "gwei")
        .map(Into::into)
        .map_err(|e| DeployError::ConfigInconsistent(format!("invalid gwei amount {gwei}: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// File-backed owner of the [`DeploymentConfig`] for the duration of a run.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: DeploymentConfig,
}

impl ConfigStore {
    /// Path of the config file for `node_env` inside `dir`.
    pub fn path_for(dir: &Path, node_env: &str) -> PathBuf {
        dir.join(format!(".config.{node_env}.json"))
    }

    /// Back up, load and validate the config file at `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(DeployError::ConfigMissing(path));
        }

        let backup = backup_config(&path)?;
        info!("Backup created for {} at {}", path.display(), backup.display());

        let data = fs::read_to_string(&path)?;
        let config: DeploymentConfig = serde_json::from_str(&data)?;
        info!("load config from {}", path.display());
        config.validate()?;

        Ok(Self { path, config })
    }

    /// Wrap an in-memory config that will be written to `path` on save.
    pub fn create(path: impl Into<PathBuf>, config: DeploymentConfig) -> Result<Self> {
        config.validate()?;
        let store = Self {
            path: path.into(),
            config,
        };
        store.save()?;
        Ok(store)
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DeploymentConfig {
        &mut self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the whole file with the current in-memory config.
    pub fn save(&self) -> Result<()> {
        let data = serde_json::to_string_pretty(&self.config)?;
        fs::write(&self.path, data)?;
        debug!("config written to {}", self.path.display());
        Ok(())
    }
}

fn backup_config(path: &Path) -> Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let backup_dir = parent.join(BACKUP_DIR);
    fs::create_dir_all(&backup_dir)?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
    let backup_path = backup_dir.join(format!("{stem}-{timestamp}.json"));
    fs::copy(path, &backup_path)?;
    Ok(backup_path)
}

/// Serde adapter mapping `""` to `None` so unset addresses stay readable on disk.
mod opt_address {
    use ethers::types::Address;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Address>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(address) => s.serialize_str(&format!("{address:?}")),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Address>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.is_empty() {
            return Ok(None);
        }
        crate::encoding::parse_address(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "SUB_CHAIN_CNT": 2,
            "SUB_CHAIN_CONFIGS": [
                sample_sub_chain(0, 30101),
                sample_sub_chain(1, 30102),
            ]
        })
    }

    fn sample_sub_chain(logic_chain_id: u32, eid: u32) -> serde_json::Value {
        serde_json::json!({
            "ESSENTIAL": {
                "NODE_RPC_URL": "http://127.0.0.1:8545",
                "CHAIN_ID": 31337,
                "LOGIC_CHAIN_ID": logic_chain_id,
                "PRIMARY_LOGIC_CHAIN_ID": 0,
                "DEPLOYER_SK": "0x01",
                "ADMIN_SK": "0x02",
                "ADMIN_ADDRESS": "0x2B5AD5c4795c026514f8317c7a215E218DcCD6cF",
                "MAX_FEE_PER_GAS": 100,
                "MAX_PRIORITY_FEE_PER_GAS": 1.5,
                "ENABLE_1559": true,
                "ENABLE_MULTISIG_ADMIN": false,
                "OPERATOR_ADDRESSES": [],
                "EXIT_MANAGER_ADDRESSES": [],
                "RELEASE_TAG": "v3.0.0",
                "WETH_CONTRACT_ADDRESS": "",
                "OWNER_CONTRACT_ADDRESS": "",
                "LAYER_ZERO_ENDPOINT_ADDRESS": "0x1a44076050125825900e736c501f859c50fE728c",
                "LAYER_ZERO_ENDPOINT_EID": eid,
                "PRE_COMMIT_CHECKPOINT": []
            },
            "TEST": { "TOKENS": [] }
        })
    }

    #[test]
    fn test_parse_and_validate() {
        let config: DeploymentConfig = serde_json::from_value(sample_json()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.eid_list(), vec![30101, 30102]);
        assert!(config.sub_chain_configs[0].essential.is_primary());
        assert!(!config.sub_chain_configs[1].essential.is_primary());
        assert_eq!(config.sub_chain_configs[0].essential.addresses, AddressBook::default());
    }

    #[test]
    fn test_chain_count_mismatch_is_inconsistent() {
        let mut config: DeploymentConfig = serde_json::from_value(sample_json()).unwrap();
        config.sub_chain_cnt = 3;
        assert!(matches!(
            config.validate(),
            Err(DeployError::ConfigInconsistent(_))
        ));
    }

    #[test]
    fn test_logic_chain_id_must_match_index() {
        let mut config: DeploymentConfig = serde_json::from_value(sample_json()).unwrap();
        config.sub_chain_configs[1].essential.logic_chain_id = 5;
        assert!(matches!(
            config.validate(),
            Err(DeployError::ConfigInconsistent(msg)) if msg.contains("LOGIC_CHAIN_ID of chain 1")
        ));
    }

    #[test]
    fn test_primary_must_be_shared() {
        let mut config: DeploymentConfig = serde_json::from_value(sample_json()).unwrap();
        config.sub_chain_configs[1].essential.primary_logic_chain_id = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_address_roundtrips_as_empty_string() {
        let config: DeploymentConfig = serde_json::from_value(sample_json()).unwrap();
        let value = serde_json::to_value(&config).unwrap();
        let essential = &value["SUB_CHAIN_CONFIGS"][0]["ESSENTIAL"];
        assert_eq!(essential["OWNER_CONTRACT_ADDRESS"], "");
        assert_eq!(essential["ENABLE_1559"], true);
    }

    #[test]
    fn test_truncated_address_is_rejected() {
        let mut value = sample_json();
        value["SUB_CHAIN_CONFIGS"][0]["ESSENTIAL"]["OWNER_CONTRACT_ADDRESS"] = "0x1234".into();
        let err = serde_json::from_value::<DeploymentConfig>(value).unwrap_err();
        assert!(err.to_string().contains("invalid address 0x1234"));
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = ConfigStore::path_for(dir.path(), "nope");
        assert!(matches!(
            ConfigStore::load(&path),
            Err(DeployError::ConfigMissing(_))
        ));
    }

    #[test]
    fn test_load_creates_backup_and_save_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = ConfigStore::path_for(dir.path(), "local");
        fs::write(&path, sample_json().to_string()).unwrap();

        let mut store = ConfigStore::load(&path).unwrap();
        let backups: Vec<_> = fs::read_dir(dir.path().join(BACKUP_DIR)).unwrap().collect();
        assert_eq!(backups.len(), 1);

        let owner = Address::repeat_byte(0x11);
        store.config_mut().sub_chain_configs[0]
            .essential
            .addresses
            .owner_contract_address = Some(owner);
        store.save().unwrap();

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(
            reloaded.config().sub_chain_configs[0].essential.addresses.owner().unwrap(),
            owner
        );
    }

    #[test]
    fn test_wallets_from_keys() {
        let mut config: DeploymentConfig = serde_json::from_value(sample_json()).unwrap();
        let essential = &mut config.sub_chain_configs[0].essential;
        assert!(matches!(
            essential.deployer_wallet(),
            Err(DeployError::InvalidKey("DEPLOYER_SK"))
        ));

        essential.deployer_sk =
            "0x0000000000000000000000000000000000000000000000000000000000000001".into();
        let wallet = essential.deployer_wallet().unwrap();
        assert_eq!(wallet.chain_id(), 31337);
        assert_eq!(
            wallet.address(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_implementation_entries() {
        let mut book = AddressBook::default();
        for (i, name) in names::IMPLEMENTATIONS.iter().enumerate() {
            *book.implementation_mut(name).unwrap() = Some(Address::repeat_byte(i as u8 + 1));
        }
        assert_eq!(book.vault_impl_contract_address, Some(Address::repeat_byte(1)));
        assert_eq!(
            book.implementation(names::USER_API_LOGIC),
            Some(Address::repeat_byte(6))
        );
        assert!(book.implementation_mut(names::PORTAL).is_none());
    }

    #[test]
    fn test_gwei_to_wei() {
        assert_eq!(gwei_to_wei(1.0).unwrap(), U256::from(1_000_000_000u64));
        assert_eq!(gwei_to_wei(1.5).unwrap(), U256::from(1_500_000_000u64));
    }
}
