//! Typed access to the deployed contracts.
//!
//! [`ContractInvoker`] binds an address and ABI to a [`NetworkClient`]; the typed
//! wrappers below name every call the flows need, so ABI function names appear
//! only in this module.

use std::sync::Arc;

use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes, H256, U256};
use tracing::debug;

use crate::config::CheckpointSeed;
use crate::encoding::{address_to_bytes32, bytes32_to_address};
use crate::error::{DeployError, Result};
use crate::network::NetworkClient;
use crate::{DEFAULT_ADMIN_ROLE, PROXY_ADMIN_SLOT, PROXY_IMPLEMENTATION_SLOT};

/// A contract at a known address on one sub-chain.
#[derive(Debug, Clone)]
pub struct ContractInvoker {
    name: String,
    address: Address,
    abi: Arc<Abi>,
    client: NetworkClient,
}

impl ContractInvoker {
    pub fn new(name: impl Into<String>, address: Address, abi: Arc<Abi>, client: NetworkClient) -> Self {
        Self {
            name: name.into(),
            address,
            abi,
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn client(&self) -> &NetworkClient {
        &self.client
    }

    /// Calldata for `function(args)`.
    pub fn encode_call(&self, function: &str, args: &[Token]) -> Result<Bytes> {
        let function = self.abi.function(function)?;
        Ok(function.encode_input(args)?.into())
    }

    /// Run a view call and decode its outputs.
    pub async fn read(&self, function: &str, args: &[Token]) -> Result<Vec<Token>> {
        let function = self.abi.function(function)?;
        let data = function.encode_input(args)?;
        let output = self.client.call(self.address, data.into()).await?;
        debug!("{}.{} -> 0x{}", self.name, function.name, hex::encode(&output));
        Ok(function.decode_output(&output)?)
    }

    async fn read_one(&self, function: &str, args: &[Token]) -> Result<Token> {
        self.read(function, args)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DeployError::Abi(format!("{}.{function} returned nothing", self.name)))
    }

    async fn read_address(&self, function: &str, args: &[Token]) -> Result<Address> {
        let token = self.read_one(function, args).await?;
        token_address(token, function)
    }

    async fn read_u32(&self, function: &str, args: &[Token]) -> Result<u32> {
        let token = self.read_one(function, args).await?;
        token_u32(token, function)
    }

    async fn read_bool(&self, function: &str, args: &[Token]) -> Result<bool> {
        let token = self.read_one(function, args).await?;
        token
            .into_bool()
            .ok_or_else(|| DeployError::Abi(format!("{function} did not return a bool")))
    }

    async fn read_word(&self, function: &str, args: &[Token]) -> Result<H256> {
        let token = self.read_one(function, args).await?;
        token_word(token, function)
    }

    /// Outputs of a struct getter, whether returned flat or as a single tuple.
    async fn read_struct(&self, function: &str, args: &[Token]) -> Result<Vec<Token>> {
        let mut tokens = self.read(function, args).await?;
        if tokens.len() == 1 {
            if let Some(Token::Tuple(fields)) = tokens.first().cloned() {
                tokens = fields;
            }
        }
        Ok(tokens)
    }
}

fn token_address(token: Token, what: &str) -> Result<Address> {
    token
        .into_address()
        .ok_or_else(|| DeployError::Abi(format!("{what} is not an address")))
}

fn token_uint(token: Token, what: &str) -> Result<U256> {
    token
        .into_uint()
        .ok_or_else(|| DeployError::Abi(format!("{what} is not an integer")))
}

fn token_u32(token: Token, what: &str) -> Result<u32> {
    let value = token_uint(token, what)?;
    if value > U256::from(u32::MAX) {
        return Err(DeployError::Abi(format!("{what} overflows uint32: {value}")));
    }
    Ok(value.low_u32())
}

fn token_word(token: Token, what: &str) -> Result<H256> {
    let bytes = token
        .into_fixed_bytes()
        .ok_or_else(|| DeployError::Abi(format!("{what} is not bytes32")))?;
    if bytes.len() != 32 {
        return Err(DeployError::InvalidBytes32(format!("0x{}", hex::encode(bytes))));
    }
    Ok(H256::from_slice(&bytes))
}

fn word_token(word: H256) -> Token {
    Token::FixedBytes(word.as_bytes().to_vec())
}

fn u32_token(value: u32) -> Token {
    Token::Uint(U256::from(value))
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKPOINTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Progress a vault has committed for a peer chain before the next cross-chain commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreCommitCheckpoint {
    pub logic_chain_id: u32,
    pub l1_message_cnt: U256,
    pub l1_last_commit_hash: H256,
    pub l1_next_commit_hash: H256,
    pub l2_last_commit_hash: H256,
}

impl PreCommitCheckpoint {
    /// Fresh checkpoint written at configuration time: no pending messages and the
    /// L1 cursor sitting on the last commit.
    pub fn seed(seed: &CheckpointSeed) -> Self {
        Self {
            logic_chain_id: seed.logic_chain_id,
            l1_message_cnt: U256::zero(),
            l1_last_commit_hash: seed.l1_last_commit_hash,
            l1_next_commit_hash: seed.l1_last_commit_hash,
            l2_last_commit_hash: seed.l2_last_commit_hash,
        }
    }

    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            u32_token(self.logic_chain_id),
            Token::Uint(self.l1_message_cnt),
            word_token(self.l1_last_commit_hash),
            word_token(self.l1_next_commit_hash),
            word_token(self.l2_last_commit_hash),
        ])
    }

    pub fn from_tokens(tokens: Vec<Token>) -> Result<Self> {
        let [id, cnt, l1_last, l1_next, l2_last]: [Token; 5] = tokens
            .try_into()
            .map_err(|t: Vec<Token>| DeployError::Abi(format!("checkpoint has {} fields", t.len())))?;
        Ok(Self {
            logic_chain_id: token_u32(id, "logicChainId")?,
            l1_message_cnt: token_uint(cnt, "l1MessageCnt")?,
            l1_last_commit_hash: token_word(l1_last, "l1LastCommitHash")?,
            l1_next_commit_hash: token_word(l1_next, "l1NextCommitHash")?,
            l2_last_commit_hash: token_word(l2_last, "l2LastCommitHash")?,
        })
    }
}

/// Cursors the vault confirmed after its own last commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCommitConfirmation {
    pub logic_chain_id: u32,
    pub l1_message_cnt: U256,
    pub l1_next_commit_hash: H256,
    pub l2_next_commit_hash: H256,
}

impl PostCommitConfirmation {
    pub fn from_tokens(tokens: Vec<Token>) -> Result<Self> {
        let [id, cnt, l1_next, l2_next]: [Token; 4] = tokens
            .try_into()
            .map_err(|t: Vec<Token>| DeployError::Abi(format!("confirmation has {} fields", t.len())))?;
        Ok(Self {
            logic_chain_id: token_u32(id, "logicChainId")?,
            l1_message_cnt: token_uint(cnt, "l1MessageCnt")?,
            l1_next_commit_hash: token_word(l1_next, "l1NextCommitHash")?,
            l2_next_commit_hash: token_word(l2_next, "l2NextCommitHash")?,
        })
    }
}

/// Check that consecutive commits link up: the `next` L1 hash of each commit is the
/// `last` L1 hash consumed by the one after it.
pub fn verify_hash_chain(commits: &[PreCommitCheckpoint]) -> Result<()> {
    for (index, pair) in commits.windows(2).enumerate() {
        if pair[0].l1_next_commit_hash != pair[1].l1_last_commit_hash {
            return Err(DeployError::violation(
                "Hash chain",
                format!("l1LastCommitHash of commit {}", index + 1),
                format!("{:?}", pair[0].l1_next_commit_hash),
                format!("{:?}", pair[1].l1_last_commit_hash),
            ));
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// VAULT
// ═══════════════════════════════════════════════════════════════════════════════

/// Arguments of `Vault.configureAll`.
#[derive(Debug, Clone)]
pub struct VaultConfiguration {
    pub weth: Address,
    pub user_api_logic: Address,
    pub manager_api_logic: Address,
    pub message_queue_logic: Address,
    pub token_manager_logic: Address,
    pub multi_chain_logic: Address,
    pub portal: Address,
    pub logic_chain_id: u32,
    pub primary_logic_chain_id: u32,
    pub chain_cnt: u32,
    pub checkpoints: Vec<PreCommitCheckpoint>,
}

#[derive(Debug, Clone)]
pub struct VaultContract(ContractInvoker);

impl VaultContract {
    pub fn new(invoker: ContractInvoker) -> Self {
        Self(invoker)
    }

    pub fn address(&self) -> Address {
        self.0.address()
    }

    pub async fn chain_cnt(&self) -> Result<u32> {
        self.0.read_u32("chainCnt", &[]).await
    }

    pub async fn logic_chain_id(&self) -> Result<u32> {
        self.0.read_u32("logicChainId", &[]).await
    }

    pub async fn primary_logic_chain_id(&self) -> Result<u32> {
        self.0.read_u32("primaryLogicChainId", &[]).await
    }

    pub async fn is_operator(&self, account: Address) -> Result<bool> {
        self.0.read_bool("operators", &[Token::Address(account)]).await
    }

    pub async fn is_exit_manager(&self, account: Address) -> Result<bool> {
        self.0.read_bool("exitManagers", &[Token::Address(account)]).await
    }

    pub async fn circuit_version(&self) -> Result<String> {
        self.0
            .read_one("circuitVersion", &[])
            .await?
            .into_string()
            .ok_or_else(|| DeployError::Abi("circuitVersion is not a string".into()))
    }

    pub async fn admin(&self) -> Result<Address> {
        self.0.read_address("admin", &[]).await
    }

    pub async fn weth_address(&self) -> Result<Address> {
        self.0.read_address("wethAddress", &[]).await
    }

    pub async fn user_api_logic_address(&self) -> Result<Address> {
        self.0.read_address("userApiLogicAddress", &[]).await
    }

    pub async fn manager_api_logic_address(&self) -> Result<Address> {
        self.0.read_address("managerApiLogicAddress", &[]).await
    }

    pub async fn message_queue_logic_address(&self) -> Result<Address> {
        self.0.read_address("messageQueueLogicAddress", &[]).await
    }

    pub async fn token_manager_logic_address(&self) -> Result<Address> {
        self.0.read_address("tokenManagerLogicAddress", &[]).await
    }

    pub async fn multi_chain_logic_address(&self) -> Result<Address> {
        self.0.read_address("multiChainLogicAddress", &[]).await
    }

    pub async fn cross_chain_portal_contract(&self) -> Result<Address> {
        self.0.read_address("crossChainPortalContract", &[]).await
    }

    pub async fn pre_commit_checkpoint(&self, logic_chain_id: u32) -> Result<PreCommitCheckpoint> {
        let tokens = self
            .0
            .read_struct("preCommitCheckpointList", &[u32_token(logic_chain_id)])
            .await?;
        PreCommitCheckpoint::from_tokens(tokens)
    }

    pub async fn post_commit_confirmation(&self) -> Result<PostCommitConfirmation> {
        let tokens = self.0.read_struct("postCommitConfirmation", &[]).await?;
        PostCommitConfirmation::from_tokens(tokens)
    }

    pub async fn l1_commit_index(&self) -> Result<U256> {
        let token = self.0.read_one("l1ToL2MessageQueueCommitIndex", &[]).await?;
        token_uint(token, "l1ToL2MessageQueueCommitIndex")
    }

    /// Inbound queue hash at the committed index.
    pub async fn l1_commit_hash(&self) -> Result<H256> {
        let index = self.l1_commit_index().await?;
        self.0
            .read_word("l1ToL2MessageQueueHash", &[Token::Uint(index)])
            .await
    }

    pub async fn l2_commit_hash(&self) -> Result<H256> {
        self.0.read_word("l2ToL1MessageQueueCommitHash", &[]).await
    }

    pub async fn configured(&self) -> Result<bool> {
        self.0.read_bool("configured", &[]).await
    }

    pub fn encode_update_all(&self, verifier: Address, circuit_version: &str) -> Result<Bytes> {
        self.0.encode_call(
            "updateAll",
            &[Token::Address(verifier), Token::String(circuit_version.to_string())],
        )
    }

    pub fn encode_register_operator(&self, operator: Address) -> Result<Bytes> {
        self.0.encode_call("registerOperator", &[Token::Address(operator)])
    }

    pub fn encode_register_exit_manager(&self, exit_manager: Address) -> Result<Bytes> {
        self.0
            .encode_call("registerExitManager", &[Token::Address(exit_manager)])
    }

    pub fn encode_configure_all(&self, config: &VaultConfiguration) -> Result<Bytes> {
        self.0.encode_call(
            "configureAll",
            &[
                Token::Address(config.weth),
                Token::Address(config.user_api_logic),
                Token::Address(config.manager_api_logic),
                Token::Address(config.message_queue_logic),
                Token::Address(config.token_manager_logic),
                Token::Address(config.multi_chain_logic),
                Token::Address(config.portal),
                u32_token(config.logic_chain_id),
                u32_token(config.primary_logic_chain_id),
                u32_token(config.chain_cnt),
                Token::Array(config.checkpoints.iter().map(|c| c.to_token()).collect()),
            ],
        )
    }

    pub fn encode_set_configured(&self, configured: bool) -> Result<Bytes> {
        self.0.encode_call("setConfigured", &[Token::Bool(configured)])
    }

    pub fn encode_register_new_asset(
        &self,
        token: Address,
        asset_id: u32,
        limit_digit: u8,
        precision_digit: u8,
        decimals: u8,
    ) -> Result<Bytes> {
        self.0.encode_call(
            "registerNewAsset",
            &[
                Token::Address(token),
                u32_token(asset_id),
                Token::Uint(U256::from(limit_digit)),
                Token::Uint(U256::from(precision_digit)),
                Token::Uint(U256::from(decimals)),
            ],
        )
    }

    pub fn encode_set_asset_active(&self, asset_id: u32) -> Result<Bytes> {
        self.0.encode_call("setAssetActive", &[u32_token(asset_id)])
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PORTAL
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct PortalContract(ContractInvoker);

impl PortalContract {
    pub fn new(invoker: ContractInvoker) -> Self {
        Self(invoker)
    }

    pub fn address(&self) -> Address {
        self.0.address()
    }

    pub async fn chain_cnt(&self) -> Result<u32> {
        self.0.read_u32("chainCnt", &[]).await
    }

    pub async fn vault_contract(&self) -> Result<Address> {
        self.0.read_address("vaultContract", &[]).await
    }

    pub async fn logic_chain_id_to_eid(&self, logic_chain_id: u32) -> Result<u32> {
        self.0
            .read_u32("logicChainIdToEid", &[u32_token(logic_chain_id)])
            .await
    }

    pub async fn eid_to_logic_chain_id(&self, eid: u32) -> Result<u32> {
        self.0.read_u32("eidToLogicChainId", &[u32_token(eid)]).await
    }

    /// Remote portal bound at `eid`, as the raw bytes32 peer word.
    pub async fn peer(&self, eid: u32) -> Result<H256> {
        self.0.read_word("peers", &[u32_token(eid)]).await
    }

    pub async fn configured(&self) -> Result<bool> {
        self.0.read_bool("configured", &[]).await
    }

    pub fn encode_configure_all(&self, vault: Address, eid_list: &[u32]) -> Result<Bytes> {
        self.0.encode_call(
            "configureAll",
            &[
                Token::Address(vault),
                Token::Array(eid_list.iter().copied().map(u32_token).collect()),
            ],
        )
    }

    pub fn encode_set_peer(&self, eid: u32, peer: Address) -> Result<Bytes> {
        self.0
            .encode_call("setPeer", &[u32_token(eid), word_token(address_to_bytes32(peer))])
    }

    pub fn encode_set_configured(&self, configured: bool) -> Result<Bytes> {
        self.0.encode_call("setConfigured", &[Token::Bool(configured)])
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OWNER AND PROXY ADMIN
// ═══════════════════════════════════════════════════════════════════════════════

/// The access-controlled owner every privileged vault and portal call goes through.
#[derive(Debug, Clone)]
pub struct OwnerContract(ContractInvoker);

impl OwnerContract {
    pub fn new(invoker: ContractInvoker) -> Self {
        Self(invoker)
    }

    pub fn address(&self) -> Address {
        self.0.address()
    }

    /// `execute(target, 0, data, DEFAULT_ADMIN_ROLE)`.
    pub fn encode_execute(&self, target: Address, data: Bytes) -> Result<Bytes> {
        self.0.encode_call(
            "execute",
            &[
                Token::Address(target),
                Token::Uint(U256::zero()),
                Token::Bytes(data.to_vec()),
                word_token(DEFAULT_ADMIN_ROLE),
            ],
        )
    }

    pub fn encode_grant_role(&self, role: H256, account: Address) -> Result<Bytes> {
        self.0
            .encode_call("grantRole", &[word_token(role), Token::Address(account)])
    }

    pub fn encode_renounce_role(&self, role: H256, account: Address) -> Result<Bytes> {
        self.0
            .encode_call("renounceRole", &[word_token(role), Token::Address(account)])
    }

    pub async fn has_role(&self, role: H256, account: Address) -> Result<bool> {
        self.0
            .read_bool("hasRole", &[word_token(role), Token::Address(account)])
            .await
    }
}

#[derive(Debug, Clone)]
pub struct ProxyAdminContract(ContractInvoker);

impl ProxyAdminContract {
    pub fn new(invoker: ContractInvoker) -> Self {
        Self(invoker)
    }

    pub fn address(&self) -> Address {
        self.0.address()
    }

    pub async fn owner(&self) -> Result<Address> {
        self.0.read_address("owner", &[]).await
    }

    pub fn encode_upgrade_and_call(
        &self,
        proxy: Address,
        implementation: Address,
        data: Bytes,
    ) -> Result<Bytes> {
        self.0.encode_call(
            "upgradeAndCall",
            &[
                Token::Address(proxy),
                Token::Address(implementation),
                Token::Bytes(data.to_vec()),
            ],
        )
    }
}

/// Proxy admin recorded in the EIP-1967 admin slot of `proxy`.
pub async fn proxy_admin_of(client: &NetworkClient, proxy: Address) -> Result<Address> {
    let word = client.storage_at(proxy, PROXY_ADMIN_SLOT).await?;
    bytes32_to_address(word)
}

/// Implementation recorded in the EIP-1967 implementation slot of `proxy`.
pub async fn implementation_of(client: &NetworkClient, proxy: Address) -> Result<Address> {
    let word = client.storage_at(proxy, PROXY_IMPLEMENTATION_SLOT).await?;
    bytes32_to_address(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(id: u32, last: u8, next: u8) -> PreCommitCheckpoint {
        PreCommitCheckpoint {
            logic_chain_id: id,
            l1_message_cnt: U256::zero(),
            l1_last_commit_hash: H256::repeat_byte(last),
            l1_next_commit_hash: H256::repeat_byte(next),
            l2_last_commit_hash: H256::zero(),
        }
    }

    #[test]
    fn test_seed_starts_with_empty_queue() {
        let seed = CheckpointSeed {
            logic_chain_id: 1,
            l1_last_commit_hash: H256::repeat_byte(0xaa),
            l2_last_commit_hash: H256::repeat_byte(0xbb),
        };
        let cp = PreCommitCheckpoint::seed(&seed);
        assert_eq!(cp.l1_message_cnt, U256::zero());
        assert_eq!(cp.l1_next_commit_hash, cp.l1_last_commit_hash);
        assert_eq!(cp.l2_last_commit_hash, H256::repeat_byte(0xbb));
    }

    #[test]
    fn test_checkpoint_token_shape() {
        let cp = checkpoint(2, 1, 2);
        let Token::Tuple(fields) = cp.to_token() else {
            panic!("checkpoint must encode as a tuple");
        };
        assert_eq!(PreCommitCheckpoint::from_tokens(fields).unwrap(), cp);
        assert!(PreCommitCheckpoint::from_tokens(vec![Token::Bool(true)]).is_err());
    }

    #[test]
    fn test_hash_chain_accepts_linked_commits() {
        let commits = vec![checkpoint(0, 1, 2), checkpoint(0, 2, 3), checkpoint(0, 3, 4)];
        assert!(verify_hash_chain(&commits).is_ok());
        assert!(verify_hash_chain(&[]).is_ok());
    }

    #[test]
    fn test_hash_chain_rejects_one_byte_mismatch() {
        let mut broken = checkpoint(0, 2, 3);
        let mut bytes = broken.l1_last_commit_hash.to_fixed_bytes();
        bytes[31] ^= 0x01;
        broken.l1_last_commit_hash = H256::from(bytes);

        let err = verify_hash_chain(&[checkpoint(0, 1, 2), broken]).unwrap_err();
        assert!(matches!(
            err,
            DeployError::ConsistencyViolation { field, .. } if field == "l1LastCommitHash of commit 1"
        ));
    }

    #[test]
    fn test_word_token_rejects_short_bytes() {
        assert!(matches!(
            token_word(Token::FixedBytes(vec![0u8; 20]), "peer"),
            Err(DeployError::InvalidBytes32(_))
        ));
    }

    #[test]
    fn test_u32_overflow_rejected() {
        assert!(token_u32(Token::Uint(U256::from(u64::MAX)), "eid").is_err());
        assert_eq!(token_u32(Token::Uint(U256::from(30101)), "eid").unwrap(), 30101);
    }
}
