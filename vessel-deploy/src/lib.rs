//! vessel-deploy
//!
//! Deployment orchestration and cross-chain consistency validation for Vessel
//! vault deployments. A deployment spans several EVM networks ("sub-chains"):
//! each one gets an owner contract, an upgradeable vault with five logic
//! implementations, a LayerZero portal and a SNARK verifier. Portals are wired
//! in a star topology around a single primary sub-chain.
//!
//! The crate is split the way a run flows:
//! - [`network`] and [`contracts`] talk to nodes,
//! - [`fees`], [`submitter`] and [`router`] get transactions mined,
//! - [`deploy`] and [`validate`] drive the multi-step flows,
//! - [`maintenance`] holds the smaller operator flows built on the same pieces.

use ethers::types::H256;

pub mod catalog;
pub mod config;
pub mod context;
pub mod contracts;
pub mod deploy;
pub mod encoding;
pub mod error;
pub mod fees;
pub mod maintenance;
pub mod network;
pub mod release;
pub mod router;
pub mod submitter;
pub mod validate;

pub use catalog::{ContractArtifact, ContractCatalog, DecodedError, ErrorRegistry};
pub use config::{ConfigStore, DeploymentConfig, EssentialConfig, SubChainConfig, TokenInfo};
pub use context::DeployContext;
pub use deploy::{DeployStep, DeploymentOrchestrator};
pub use error::{DeployError, Result};
pub use network::{ChainRpc, EthersRpc, FeeData, NetworkClient, NetworkRegistry, RpcFailure};
pub use router::{ExecutionOutcome, ExecutionPlan, ExecutionRouter, ProposalArtifact, TxOrigin};
pub use submitter::{GasTally, TransactionSubmitter, UnsignedTx};
pub use validate::ConsistencyValidator;

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// `DEFAULT_ADMIN_ROLE` of the owner contract's access control.
pub const DEFAULT_ADMIN_ROLE: H256 = H256([0u8; 32]);

/// EIP-1967 admin slot of a transparent proxy,
/// `0xb53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103`.
pub const PROXY_ADMIN_SLOT: H256 = H256([
    0xb5, 0x31, 0x27, 0x68, 0x4a, 0x56, 0x8b, 0x31, 0x73, 0xae, 0x13, 0xb9, 0xf8, 0xa6, 0x01, 0x6e,
    0x24, 0x3e, 0x63, 0xb6, 0xe8, 0xee, 0x11, 0x78, 0xd6, 0xa7, 0x17, 0x85, 0x0b, 0x5d, 0x61, 0x03,
]);

/// EIP-1967 implementation slot of a transparent proxy,
/// `0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc`.
pub const PROXY_IMPLEMENTATION_SLOT: H256 = H256([
    0x36, 0x08, 0x94, 0xa1, 0x3b, 0xa1, 0xa3, 0x21, 0x06, 0x67, 0xc8, 0x28, 0x49, 0x2d, 0xb9, 0x8d,
    0xca, 0x3e, 0x20, 0x76, 0xcc, 0x37, 0x35, 0xa9, 0x20, 0xa3, 0xca, 0x50, 0x5d, 0x38, 0x2b, 0xbc,
]);

/// Catalog names of the deployed contracts.
pub mod names {
    pub const OWNER: &str = "VesselOwner";
    pub const VAULT: &str = "Vault";
    pub const MANAGER_API_LOGIC: &str = "ManagerApiLogic";
    pub const MESSAGE_QUEUE_LOGIC: &str = "MessageQueueLogic";
    pub const MULTI_CHAIN_LOGIC: &str = "MultiChainLogic";
    pub const TOKEN_MANAGER_LOGIC: &str = "TokenManagerLogic";
    pub const USER_API_LOGIC: &str = "UserApiLogic";
    pub const TRANSPARENT_PROXY: &str = "TransparentUpgradeableProxy";
    pub const PROXY_ADMIN: &str = "ProxyAdmin";
    pub const PORTAL: &str = "LayerZeroPortal";
    pub const WETH: &str = "WETH";
    pub const TOKEN: &str = "Token";

    /// Vault implementation and logic contracts, in deployment order.
    pub const IMPLEMENTATIONS: [&str; 6] = [
        VAULT,
        MANAGER_API_LOGIC,
        MESSAGE_QUEUE_LOGIC,
        MULTI_CHAIN_LOGIC,
        TOKEN_MANAGER_LOGIC,
        USER_API_LOGIC,
    ];

    /// Contracts whose custom errors can surface from a vault call.
    pub const ERROR_SOURCES: [&str; 6] = IMPLEMENTATIONS;
}
