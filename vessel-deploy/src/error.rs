//! Error types for the deployment toolkit.

use std::path::PathBuf;

use ethers::types::{TransactionReceipt, H256, U256};
use thiserror::Error;

/// Every failure surfaced by the deployment pipeline.
///
/// All variants are fatal to the current run. Nothing is retried and nothing is
/// rolled back; re-running against the persisted address book resumes the work.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The declared configuration contradicts itself.
    #[error("configuration inconsistent: {0}")]
    ConfigInconsistent(String),

    #[error("config file {0} does not exist")]
    ConfigMissing(PathBuf),

    /// Gas estimation was rejected by the node.
    #[error("gas estimation failed: {0}")]
    EstimationFailed(String),

    #[error("current fee exceeds max price accepted: {observed} > {ceiling}")]
    FeeCeilingExceeded { observed: U256, ceiling: U256 },

    #[error("failed to get fee data: {0}")]
    FeeDataUnavailable(String),

    /// Broadcasting or waiting for the transaction failed.
    #[error("transaction submission failed: {0}")]
    SubmissionFailed(String),

    #[error("transaction {} reverted", .0.transaction_hash)]
    TransactionReverted(Box<TransactionReceipt>),

    #[error("deployment transaction {0:?} returned no contract address")]
    DeploymentAddressMissing(H256),

    /// Declared configuration and on-chain state disagree.
    #[error("[{step}] {field} not consistent with on-chain value: expected {expected}, observed {observed}")]
    ConsistencyViolation {
        step: &'static str,
        field: String,
        expected: String,
        observed: String,
    },

    /// Best effort only; logged while the original error propagates.
    #[error("failed to decode revert data: {0}")]
    RevertDecodeFailed(String),

    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("invalid bytes32 {0}")]
    InvalidBytes32(String),

    /// A step ran before the address it depends on was recorded.
    #[error("{0} is not set in the address book")]
    MissingAddress(&'static str),

    #[error("role handoff refused: {0}")]
    RoleHandoffRefused(String),

    #[error("contract catalog entry {name}: {reason}")]
    CatalogEntry { name: String, reason: String },

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("abi error: {0}")]
    Abi(String),

    #[error("invalid signing key for {0}")]
    InvalidKey(&'static str),

    #[error("circuit release error: {0}")]
    Release(String),

    #[error("failed to set nonce to {expected}, actual {actual}")]
    NonceMismatch { expected: u64, actual: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ethers::abi::Error> for DeployError {
    fn from(err: ethers::abi::Error) -> Self {
        DeployError::Abi(err.to_string())
    }
}

impl DeployError {
    /// Builds a [`DeployError::ConsistencyViolation`].
    pub fn violation(
        step: &'static str,
        field: impl Into<String>,
        expected: impl ToString,
        observed: impl ToString,
    ) -> Self {
        DeployError::ConsistencyViolation {
            step,
            field: field.into(),
            expected: expected.to_string(),
            observed: observed.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
