//! In-memory chain emulating the contracts the deployment flows talk to.
//!
//! Contracts are recognized by their fixture creation bytecode. The owner, vault,
//! portal, transparent proxy and proxy admin carry real state and access control;
//! everything else is deployed as an inert account. Transactions are executed on
//! a copy of the state first, so estimation and `eth_call` never mutate it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ethers::abi::{self, Abi, ParamType, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, NameOrAddress, TransactionReceipt, H256, U256, U64};
use ethers::utils::{get_contract_address, id, keccak256};
use vessel_deploy::encoding::address_to_bytes32;
use vessel_deploy::network::{ChainRpc, FeeData, RpcFailure, RpcResult};
use vessel_deploy::{names, DEFAULT_ADMIN_ROLE, PROXY_ADMIN_SLOT, PROXY_IMPLEMENTATION_SLOT};

use crate::abi::{abi, bytecode, CONTRACTS, SNARK_VERIFIER};

/// Gas estimate returned for every transaction.
pub const GAS_ESTIMATE: u64 = 100_000;
/// Gas reported as used by every mined transaction.
pub const GAS_USED: u64 = 60_000;

// ═══════════════════════════════════════════════════════════════════════════════
// CONTRACT STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    Owner,
    Vault,
    Portal,
    Proxy,
    ProxyAdmin,
    Inert,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultState {
    pub admin: Address,
    pub initialized: bool,
    pub chain_cnt: u32,
    pub logic_chain_id: u32,
    pub primary_logic_chain_id: u32,
    pub operators: HashSet<Address>,
    pub exit_managers: HashSet<Address>,
    pub verifier: Address,
    pub circuit_version: String,
    pub weth: Address,
    pub user_api_logic: Address,
    pub manager_api_logic: Address,
    pub message_queue_logic: Address,
    pub token_manager_logic: Address,
    pub multi_chain_logic: Address,
    pub portal: Address,
    /// `(logicChainId, l1MessageCnt, l1Last, l1Next, l2Last)` per peer chain.
    pub checkpoints: HashMap<u32, (u32, U256, H256, H256, H256)>,
    /// `(logicChainId, l1MessageCnt, l1Next, l2Next)`.
    pub post_commit: (u32, U256, H256, H256),
    pub l1_queue_hash: H256,
    pub l2_queue_hash: H256,
    pub assets: HashMap<u32, (Address, bool)>,
    pub configured: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalState {
    pub admin: Address,
    pub initialized: bool,
    pub vault: Address,
    pub chain_cnt: u32,
    pub logic_chain_id_to_eid: HashMap<u32, u32>,
    pub eid_to_logic_chain_id: HashMap<u32, u32>,
    pub peers: HashMap<u32, H256>,
    pub configured: bool,
}

#[derive(Debug, Clone)]
enum Logic {
    Vault(VaultState),
    Portal(PortalState),
    Inert,
}

#[derive(Debug, Clone)]
enum Account {
    Owner { admins: HashSet<Address> },
    Implementation(ContractKind),
    Proxy { implementation: Address, admin: Address, logic: Logic },
    ProxyAdmin { owner: Address },
    Inert(String),
}

/// Revert payload of a failed execution.
#[derive(Debug, Clone)]
struct Revert(Vec<u8>);

impl Revert {
    fn message(msg: &str) -> Self {
        let mut data = id("Error(string)").to_vec();
        data.extend(abi::encode(&[Token::String(msg.to_string())]));
        Revert(data)
    }

    fn custom(signature: &str, args: &[Token]) -> Self {
        let mut data = id(signature).to_vec();
        data.extend(abi::encode(args));
        Revert(data)
    }

    fn unauthorized(caller: Address) -> Self {
        Revert::custom("Unauthorized(address)", &[Token::Address(caller)])
    }
}

type Exec<T> = std::result::Result<T, Revert>;

struct Outcome {
    output: Vec<u8>,
    created: Option<Address>,
}

fn decode_call(abi: &Abi, data: &[u8]) -> Exec<(String, Vec<Token>)> {
    if data.len() < 4 {
        return Err(Revert::message("missing selector"));
    }
    let function = abi
        .functions()
        .find(|f| f.short_signature() == data[..4])
        .ok_or_else(|| Revert::message("unknown selector"))?;
    let args = function
        .decode_input(&data[4..])
        .map_err(|e| Revert::message(&format!("bad calldata: {e}")))?;
    Ok((function.name.clone(), args))
}

fn arg_address(args: &[Token], i: usize) -> Exec<Address> {
    args.get(i)
        .cloned()
        .and_then(Token::into_address)
        .ok_or_else(|| Revert::message("expected address argument"))
}

fn arg_uint(args: &[Token], i: usize) -> Exec<U256> {
    args.get(i)
        .cloned()
        .and_then(Token::into_uint)
        .ok_or_else(|| Revert::message("expected integer argument"))
}

fn arg_u32(args: &[Token], i: usize) -> Exec<u32> {
    Ok(arg_uint(args, i)?.low_u32())
}

fn arg_word(args: &[Token], i: usize) -> Exec<H256> {
    args.get(i)
        .cloned()
        .and_then(Token::into_fixed_bytes)
        .filter(|b| b.len() == 32)
        .map(|b| H256::from_slice(&b))
        .ok_or_else(|| Revert::message("expected bytes32 argument"))
}

fn arg_bool(args: &[Token], i: usize) -> Exec<bool> {
    args.get(i)
        .cloned()
        .and_then(Token::into_bool)
        .ok_or_else(|| Revert::message("expected bool argument"))
}

fn arg_bytes(args: &[Token], i: usize) -> Exec<Vec<u8>> {
    args.get(i)
        .cloned()
        .and_then(Token::into_bytes)
        .ok_or_else(|| Revert::message("expected bytes argument"))
}

fn word(value: H256) -> Token {
    Token::FixedBytes(value.as_bytes().to_vec())
}

fn uint(value: impl Into<U256>) -> Token {
    Token::Uint(value.into())
}

fn out(tokens: &[Token]) -> Exec<Vec<u8>> {
    Ok(abi::encode(tokens))
}

fn vault_call(state: &mut VaultState, sender: Address, data: &[u8]) -> Exec<Vec<u8>> {
    let (name, args) = decode_call(abi(names::VAULT), data)?;
    let admin_only = !matches!(
        name.as_str(),
        "initialize_v2"
            | "chainCnt"
            | "logicChainId"
            | "primaryLogicChainId"
            | "operators"
            | "exitManagers"
            | "circuitVersion"
            | "admin"
            | "wethAddress"
            | "userApiLogicAddress"
            | "managerApiLogicAddress"
            | "messageQueueLogicAddress"
            | "tokenManagerLogicAddress"
            | "multiChainLogicAddress"
            | "crossChainPortalContract"
            | "preCommitCheckpointList"
            | "postCommitConfirmation"
            | "l1ToL2MessageQueueCommitIndex"
            | "l1ToL2MessageQueueHash"
            | "l2ToL1MessageQueueCommitHash"
            | "configured"
    );
    if admin_only && sender != state.admin {
        return Err(Revert::unauthorized(sender));
    }

    match name.as_str() {
        "initialize_v2" => {
            if state.initialized {
                return Err(Revert::message("Initializable: contract is already initialized"));
            }
            state.initialized = true;
            state.admin = arg_address(&args, 0)?;
            state.l1_queue_hash = H256::from(keccak256(b"l1ToL2MessageQueue"));
            state.l2_queue_hash = H256::from(keccak256(b"l2ToL1MessageQueue"));
            out(&[])
        }
        "chainCnt" => out(&[uint(state.chain_cnt)]),
        "logicChainId" => out(&[uint(state.logic_chain_id)]),
        "primaryLogicChainId" => out(&[uint(state.primary_logic_chain_id)]),
        "operators" => out(&[Token::Bool(state.operators.contains(&arg_address(&args, 0)?))]),
        "exitManagers" => out(&[Token::Bool(
            state.exit_managers.contains(&arg_address(&args, 0)?),
        )]),
        "circuitVersion" => out(&[Token::String(state.circuit_version.clone())]),
        "admin" => out(&[Token::Address(state.admin)]),
        "wethAddress" => out(&[Token::Address(state.weth)]),
        "userApiLogicAddress" => out(&[Token::Address(state.user_api_logic)]),
        "managerApiLogicAddress" => out(&[Token::Address(state.manager_api_logic)]),
        "messageQueueLogicAddress" => out(&[Token::Address(state.message_queue_logic)]),
        "tokenManagerLogicAddress" => out(&[Token::Address(state.token_manager_logic)]),
        "multiChainLogicAddress" => out(&[Token::Address(state.multi_chain_logic)]),
        "crossChainPortalContract" => out(&[Token::Address(state.portal)]),
        "preCommitCheckpointList" => {
            let (id, cnt, l1_last, l1_next, l2_last) = state
                .checkpoints
                .get(&arg_u32(&args, 0)?)
                .copied()
                .unwrap_or_default();
            out(&[uint(id), uint(cnt), word(l1_last), word(l1_next), word(l2_last)])
        }
        "postCommitConfirmation" => {
            let (id, cnt, l1_next, l2_next) = state.post_commit;
            out(&[uint(id), uint(cnt), word(l1_next), word(l2_next)])
        }
        "l1ToL2MessageQueueCommitIndex" => out(&[uint(0u64)]),
        "l1ToL2MessageQueueHash" => {
            let hash = if arg_uint(&args, 0)?.is_zero() {
                state.l1_queue_hash
            } else {
                H256::zero()
            };
            out(&[word(hash)])
        }
        "l2ToL1MessageQueueCommitHash" => out(&[word(state.l2_queue_hash)]),
        "configured" => out(&[Token::Bool(state.configured)]),
        "updateAll" => {
            state.verifier = arg_address(&args, 0)?;
            state.circuit_version = args
                .get(1)
                .cloned()
                .and_then(Token::into_string)
                .ok_or_else(|| Revert::message("expected string argument"))?;
            out(&[])
        }
        "registerOperator" => {
            state.operators.insert(arg_address(&args, 0)?);
            out(&[])
        }
        "registerExitManager" => {
            state.exit_managers.insert(arg_address(&args, 0)?);
            out(&[])
        }
        "configureAll" => {
            state.weth = arg_address(&args, 0)?;
            state.user_api_logic = arg_address(&args, 1)?;
            state.manager_api_logic = arg_address(&args, 2)?;
            state.message_queue_logic = arg_address(&args, 3)?;
            state.token_manager_logic = arg_address(&args, 4)?;
            state.multi_chain_logic = arg_address(&args, 5)?;
            state.portal = arg_address(&args, 6)?;
            state.logic_chain_id = arg_u32(&args, 7)?;
            state.primary_logic_chain_id = arg_u32(&args, 8)?;
            state.chain_cnt = arg_u32(&args, 9)?;
            let checkpoints = args
                .get(10)
                .cloned()
                .and_then(Token::into_array)
                .ok_or_else(|| Revert::message("expected checkpoint array"))?;
            for checkpoint in checkpoints {
                let fields = checkpoint
                    .into_tuple()
                    .ok_or_else(|| Revert::message("expected checkpoint tuple"))?;
                let id = arg_u32(&fields, 0)?;
                state.checkpoints.insert(
                    id,
                    (
                        id,
                        arg_uint(&fields, 1)?,
                        arg_word(&fields, 2)?,
                        arg_word(&fields, 3)?,
                        arg_word(&fields, 4)?,
                    ),
                );
            }
            state.post_commit = (
                state.logic_chain_id,
                U256::zero(),
                state.l1_queue_hash,
                state.l2_queue_hash,
            );
            out(&[])
        }
        "setConfigured" => {
            state.configured = arg_bool(&args, 0)?;
            out(&[])
        }
        "registerNewAsset" => {
            state
                .assets
                .insert(arg_u32(&args, 1)?, (arg_address(&args, 0)?, false));
            out(&[])
        }
        "setAssetActive" => {
            let asset_id = arg_u32(&args, 0)?;
            match state.assets.get_mut(&asset_id) {
                Some(asset) => asset.1 = true,
                None => {
                    return Err(Revert::custom(
                        "AssetNotRegistered(uint32)",
                        &[uint(asset_id)],
                    ))
                }
            }
            out(&[])
        }
        other => Err(Revert::message(&format!("vault: unhandled {other}"))),
    }
}

fn portal_call(state: &mut PortalState, sender: Address, data: &[u8]) -> Exec<Vec<u8>> {
    let (name, args) = decode_call(abi(names::PORTAL), data)?;
    if matches!(name.as_str(), "configureAll" | "setPeer" | "setConfigured") && sender != state.admin {
        return Err(Revert::unauthorized(sender));
    }

    match name.as_str() {
        "initialize" => {
            if state.initialized {
                return Err(Revert::message("Initializable: contract is already initialized"));
            }
            state.initialized = true;
            state.admin = arg_address(&args, 0)?;
            out(&[])
        }
        "chainCnt" => out(&[uint(state.chain_cnt)]),
        "vaultContract" => out(&[Token::Address(state.vault)]),
        "logicChainIdToEid" => {
            let eid = state
                .logic_chain_id_to_eid
                .get(&arg_u32(&args, 0)?)
                .copied()
                .unwrap_or_default();
            out(&[uint(eid)])
        }
        "eidToLogicChainId" => {
            let logic_chain_id = state
                .eid_to_logic_chain_id
                .get(&arg_u32(&args, 0)?)
                .copied()
                .unwrap_or_default();
            out(&[uint(logic_chain_id)])
        }
        "peers" => {
            let peer = state
                .peers
                .get(&arg_u32(&args, 0)?)
                .copied()
                .unwrap_or_default();
            out(&[word(peer)])
        }
        "configured" => out(&[Token::Bool(state.configured)]),
        "configureAll" => {
            state.vault = arg_address(&args, 0)?;
            let eids = args
                .get(1)
                .cloned()
                .and_then(Token::into_array)
                .ok_or_else(|| Revert::message("expected eid array"))?;
            state.chain_cnt = eids.len() as u32;
            for (logic_chain_id, eid) in eids.into_iter().enumerate() {
                let eid = eid
                    .into_uint()
                    .ok_or_else(|| Revert::message("expected eid"))?
                    .low_u32();
                state.logic_chain_id_to_eid.insert(logic_chain_id as u32, eid);
                state.eid_to_logic_chain_id.insert(eid, logic_chain_id as u32);
            }
            out(&[])
        }
        "setPeer" => {
            state.peers.insert(arg_u32(&args, 0)?, arg_word(&args, 1)?);
            out(&[])
        }
        "setConfigured" => {
            state.configured = arg_bool(&args, 0)?;
            out(&[])
        }
        other => Err(Revert::message(&format!("portal: unhandled {other}"))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORLD
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
struct World {
    accounts: HashMap<Address, Account>,
    nonces: HashMap<Address, u64>,
    refuse_role_grants: bool,
}

impl World {
    fn nonce(&self, address: Address) -> u64 {
        self.nonces.get(&address).copied().unwrap_or_default()
    }

    fn bump_nonce(&mut self, address: Address) {
        *self.nonces.entry(address).or_default() += 1;
    }

    fn execute(&mut self, sender: Address, to: Option<Address>, data: &[u8]) -> Exec<Outcome> {
        match to {
            Some(to) => Ok(Outcome {
                output: self.call(sender, to, data)?,
                created: None,
            }),
            None => {
                let address = get_contract_address(sender, self.nonce(sender));
                self.create(sender, address, data)?;
                Ok(Outcome {
                    output: Vec::new(),
                    created: Some(address),
                })
            }
        }
    }

    fn create(&mut self, sender: Address, address: Address, data: &[u8]) -> Exec<()> {
        let known = CONTRACTS
            .iter()
            .copied()
            .chain(std::iter::once(SNARK_VERIFIER))
            .map(|name| (name, bytecode(name)))
            .find(|(_, code)| data.starts_with(code));

        let account = match known {
            Some((name, code)) => {
                let args = &data[code.len()..];
                match name {
                    names::OWNER => Account::Owner {
                        admins: HashSet::from([sender]),
                    },
                    names::VAULT => Account::Implementation(ContractKind::Vault),
                    names::PORTAL => {
                        abi::decode(&[ParamType::Address], args)
                            .map_err(|_| Revert::message("portal: missing endpoint"))?;
                        Account::Implementation(ContractKind::Portal)
                    }
                    names::TRANSPARENT_PROXY => {
                        return self.create_proxy(sender, address, args);
                    }
                    other => Account::Inert(other.to_string()),
                }
            }
            None => Account::Inert("unknown".to_string()),
        };
        self.accounts.insert(address, account);
        Ok(())
    }

    fn create_proxy(&mut self, sender: Address, address: Address, args: &[u8]) -> Exec<()> {
        let tokens = abi::decode(&[ParamType::Address, ParamType::Address, ParamType::Bytes], args)
            .map_err(|_| Revert::message("proxy: bad constructor arguments"))?;
        let implementation = arg_address(&tokens, 0)?;
        let initial_owner = arg_address(&tokens, 1)?;
        let init = arg_bytes(&tokens, 2)?;

        let logic = match self.accounts.get(&implementation) {
            Some(Account::Implementation(ContractKind::Vault)) => Logic::Vault(VaultState::default()),
            Some(Account::Implementation(ContractKind::Portal)) => Logic::Portal(PortalState::default()),
            Some(_) => Logic::Inert,
            None => return Err(Revert::message("ERC1967InvalidImplementation")),
        };

        // The proxy deploys its own admin as its first creation.
        let admin = get_contract_address(address, 1u64);
        self.accounts.insert(admin, Account::ProxyAdmin { owner: initial_owner });
        self.accounts.insert(
            address,
            Account::Proxy {
                implementation,
                admin,
                logic,
            },
        );
        if !init.is_empty() {
            self.call(sender, address, &init)?;
        }
        Ok(())
    }

    fn call(&mut self, sender: Address, to: Address, data: &[u8]) -> Exec<Vec<u8>> {
        let refuse_grants = self.refuse_role_grants;
        let Some(account) = self.accounts.get_mut(&to) else {
            return Ok(Vec::new());
        };

        match account {
            Account::Owner { admins } => {
                let (name, args) = decode_call(abi(names::OWNER), data)?;
                let role_denied = || {
                    Revert::custom(
                        "AccessControlUnauthorizedAccount(address,bytes32)",
                        &[Token::Address(sender), word(DEFAULT_ADMIN_ROLE)],
                    )
                };
                match name.as_str() {
                    "hasRole" => out(&[Token::Bool(
                        arg_word(&args, 0)? == DEFAULT_ADMIN_ROLE
                            && admins.contains(&arg_address(&args, 1)?),
                    )]),
                    "grantRole" => {
                        if !admins.contains(&sender) {
                            return Err(role_denied());
                        }
                        if !refuse_grants {
                            admins.insert(arg_address(&args, 1)?);
                        }
                        out(&[])
                    }
                    "renounceRole" => {
                        if arg_address(&args, 1)? != sender {
                            return Err(Revert::message("AccessControlBadConfirmation"));
                        }
                        admins.remove(&sender);
                        out(&[])
                    }
                    "execute" => {
                        if !admins.contains(&sender) {
                            return Err(role_denied());
                        }
                        let target = arg_address(&args, 0)?;
                        let inner = arg_bytes(&args, 2)?;
                        let result = self.call(to, target, &inner)?;
                        out(&[Token::Bytes(result)])
                    }
                    other => Err(Revert::message(&format!("owner: unhandled {other}"))),
                }
            }
            Account::Proxy { logic, .. } => match logic {
                Logic::Vault(state) => vault_call(state, sender, data),
                Logic::Portal(state) => portal_call(state, sender, data),
                Logic::Inert => Ok(Vec::new()),
            },
            Account::ProxyAdmin { owner } => {
                let owner = *owner;
                let (name, args) = decode_call(abi(names::PROXY_ADMIN), data)?;
                match name.as_str() {
                    "owner" => out(&[Token::Address(owner)]),
                    "upgradeAndCall" => {
                        if sender != owner {
                            return Err(Revert::custom(
                                "OwnableUnauthorizedAccount(address)",
                                &[Token::Address(sender)],
                            ));
                        }
                        let proxy = arg_address(&args, 0)?;
                        let new_implementation = arg_address(&args, 1)?;
                        if !self.accounts.contains_key(&new_implementation) {
                            return Err(Revert::message("ERC1967InvalidImplementation"));
                        }
                        match self.accounts.get_mut(&proxy) {
                            Some(Account::Proxy { implementation, admin, .. }) if *admin == to => {
                                *implementation = new_implementation;
                                out(&[])
                            }
                            _ => Err(Revert::message("not a proxy managed by this admin")),
                        }
                    }
                    other => Err(Revert::message(&format!("proxy admin: unhandled {other}"))),
                }
            }
            Account::Implementation(_) | Account::Inert(_) => Ok(Vec::new()),
        }
    }

    fn storage(&self, address: Address, slot: H256) -> H256 {
        match self.accounts.get(&address) {
            Some(Account::Proxy { implementation, admin, .. }) => {
                if slot == PROXY_ADMIN_SLOT {
                    address_to_bytes32(*admin)
                } else if slot == PROXY_IMPLEMENTATION_SLOT {
                    address_to_bytes32(*implementation)
                } else {
                    H256::zero()
                }
            }
            _ => H256::zero(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAKE CHAIN
// ═══════════════════════════════════════════════════════════════════════════════

/// A transaction the chain mined.
#[derive(Debug, Clone)]
pub struct SentTx {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub created: Option<Address>,
    pub success: bool,
}

impl SentTx {
    /// Whether the transaction calls `signature` on its target.
    pub fn calls(&self, signature: &str) -> bool {
        self.data.starts_with(&id(signature))
    }
}

#[derive(Debug)]
struct Inner {
    world: World,
    block: u64,
    fee_data: FeeData,
    estimates: usize,
    fail_estimate_at: Option<usize>,
    revert_next_send: bool,
    sent: Vec<SentTx>,
}

/// Fake node for one sub-chain.
#[derive(Debug)]
pub struct FakeChain {
    chain_id: u64,
    inner: Mutex<Inner>,
}

impl FakeChain {
    pub fn new(chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            inner: Mutex::new(Inner {
                world: World::default(),
                block: 1,
                fee_data: FeeData {
                    gas_price: Some(U256::exp10(9)),
                    max_fee_per_gas: Some(U256::exp10(9) * 2),
                    max_priority_fee_per_gas: Some(U256::exp10(9)),
                },
                estimates: 0,
                fail_estimate_at: None,
                revert_next_send: false,
                sent: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn set_fee_data(&self, fee_data: FeeData) {
        self.lock().fee_data = fee_data;
    }

    /// Fail the gas estimation of the `n`-th transaction from now (0 is the next one).
    pub fn fail_estimate_in(&self, n: usize) {
        let mut inner = self.lock();
        inner.fail_estimate_at = Some(inner.estimates + n);
    }

    pub fn clear_faults(&self) {
        let mut inner = self.lock();
        inner.fail_estimate_at = None;
        inner.revert_next_send = false;
        inner.world.refuse_role_grants = false;
    }

    /// Mine the next transaction with a failed status.
    pub fn revert_next_send(&self) {
        self.lock().revert_next_send = true;
    }

    /// Make the owner contract accept `grantRole` without granting anything.
    pub fn refuse_role_grants(&self) {
        self.lock().world.refuse_role_grants = true;
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    pub fn deployments(&self) -> Vec<Address> {
        self.lock().sent.iter().filter_map(|tx| tx.created).collect()
    }

    /// Kind of the contract at `address`, if any.
    pub fn kind_of(&self, address: Address) -> Option<ContractKind> {
        self.lock().world.accounts.get(&address).map(|account| match account {
            Account::Owner { .. } => ContractKind::Owner,
            Account::Implementation(kind) => *kind,
            Account::Proxy { .. } => ContractKind::Proxy,
            Account::ProxyAdmin { .. } => ContractKind::ProxyAdmin,
            Account::Inert(_) => ContractKind::Inert,
        })
    }

    /// Mutate the vault behind `proxy` directly, bypassing access control.
    pub fn tamper_vault<F: FnOnce(&mut VaultState)>(&self, proxy: Address, f: F) -> bool {
        match self.lock().world.accounts.get_mut(&proxy) {
            Some(Account::Proxy { logic: Logic::Vault(state), .. }) => {
                f(state);
                true
            }
            _ => false,
        }
    }

    /// Mutate the portal behind `proxy` directly, bypassing access control.
    pub fn tamper_portal<F: FnOnce(&mut PortalState)>(&self, proxy: Address, f: F) -> bool {
        match self.lock().world.accounts.get_mut(&proxy) {
            Some(Account::Proxy { logic: Logic::Portal(state), .. }) => {
                f(state);
                true
            }
            _ => false,
        }
    }

    pub fn vault_state(&self, proxy: Address) -> Option<VaultState> {
        match self.lock().world.accounts.get(&proxy) {
            Some(Account::Proxy { logic: Logic::Vault(state), .. }) => Some(state.clone()),
            _ => None,
        }
    }

    pub fn portal_state(&self, proxy: Address) -> Option<PortalState> {
        match self.lock().world.accounts.get(&proxy) {
            Some(Account::Proxy { logic: Logic::Portal(state), .. }) => Some(state.clone()),
            _ => None,
        }
    }

    pub fn owner_admins(&self, owner: Address) -> HashSet<Address> {
        match self.lock().world.accounts.get(&owner) {
            Some(Account::Owner { admins }) => admins.clone(),
            _ => HashSet::new(),
        }
    }
}

fn parts(tx: &TypedTransaction) -> (Address, Option<Address>, Bytes) {
    let from = tx.from().copied().unwrap_or_default();
    let to = match tx.to() {
        Some(NameOrAddress::Address(address)) => Some(*address),
        _ => None,
    };
    (from, to, tx.data().cloned().unwrap_or_default())
}

fn revert_failure(revert: Revert) -> RpcFailure {
    RpcFailure::reverted("execution reverted", revert.0)
}

#[async_trait]
impl ChainRpc for FakeChain {
    async fn block_number(&self) -> RpcResult<u64> {
        Ok(self.lock().block)
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> RpcResult<U256> {
        let mut inner = self.lock();
        let index = inner.estimates;
        inner.estimates += 1;
        if inner.fail_estimate_at == Some(index) {
            inner.fail_estimate_at = None;
            return Err(revert_failure(Revert::message("injected estimation failure")));
        }

        let (from, to, data) = parts(tx);
        let mut scratch = inner.world.clone();
        scratch.execute(from, to, &data).map_err(revert_failure)?;
        Ok(U256::from(GAS_ESTIMATE))
    }

    async fn fee_data(&self) -> RpcResult<FeeData> {
        Ok(self.lock().fee_data.clone())
    }

    async fn send_and_wait(
        &self,
        wallet: &LocalWallet,
        tx: TypedTransaction,
    ) -> RpcResult<TransactionReceipt> {
        let mut inner = self.lock();
        let from = wallet.address();
        let (_, to, data) = parts(&tx);
        let nonce = inner.world.nonce(from);

        let mut scratch = inner.world.clone();
        let result = if std::mem::take(&mut inner.revert_next_send) {
            Err(Revert::message("injected revert"))
        } else {
            scratch.execute(from, to, &data)
        };
        let (success, created) = match result {
            Ok(outcome) => {
                inner.world = scratch;
                (true, outcome.created)
            }
            Err(_) => (false, None),
        };
        inner.world.bump_nonce(from);
        inner.block += 1;

        let mut preimage = from.as_bytes().to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        let receipt = TransactionReceipt {
            transaction_hash: H256::from(keccak256(preimage)),
            block_number: Some(U64::from(inner.block)),
            from,
            to,
            contract_address: created,
            gas_used: Some(U256::from(GAS_USED)),
            cumulative_gas_used: U256::from(GAS_USED),
            status: Some(U64::from(u64::from(success))),
            effective_gas_price: inner.fee_data.gas_price,
            ..Default::default()
        };
        inner.sent.push(SentTx {
            from,
            to,
            data,
            created,
            success,
        });
        Ok(receipt)
    }

    async fn call(&self, tx: &TypedTransaction) -> RpcResult<Bytes> {
        let inner = self.lock();
        let (from, to, data) = parts(tx);
        let mut scratch = inner.world.clone();
        let outcome = scratch.execute(from, to, &data).map_err(revert_failure)?;
        Ok(outcome.output.into())
    }

    async fn storage_at(&self, address: Address, slot: H256) -> RpcResult<H256> {
        Ok(self.lock().world.storage(address, slot))
    }

    async fn transaction_count(&self, address: Address) -> RpcResult<u64> {
        Ok(self.lock().world.nonce(address))
    }

    async fn set_nonce(&self, address: Address, nonce: u64) -> RpcResult<()> {
        self.lock().world.nonces.insert(address, nonce);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_addresses_follow_sender_nonce() {
        let mut world = World::default();
        let sender = Address::repeat_byte(7);
        let outcome = world.execute(sender, None, &bytecode(names::OWNER)).unwrap();
        assert_eq!(outcome.created, Some(get_contract_address(sender, 0u64)));
    }

    #[test]
    fn test_owner_execute_requires_role() {
        let mut world = World::default();
        let deployer = Address::repeat_byte(7);
        let owner = world
            .execute(deployer, None, &bytecode(names::OWNER))
            .unwrap()
            .created
            .unwrap();
        let data = abi(names::OWNER)
            .function("execute")
            .unwrap()
            .encode_input(&[
                Token::Address(Address::repeat_byte(9)),
                uint(0u64),
                Token::Bytes(vec![]),
                word(DEFAULT_ADMIN_ROLE),
            ])
            .unwrap();
        assert!(world.call(deployer, owner, &data).is_ok());
        assert!(world.call(Address::repeat_byte(8), owner, &data).is_err());
    }
}
