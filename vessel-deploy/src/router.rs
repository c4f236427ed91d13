//! Routing of privileged calls through the owner contract.
//!
//! Every privileged vault/portal/proxy-admin call is wrapped in
//! `owner.execute(target, 0, data, DEFAULT_ADMIN_ROLE)`. Who signs it depends on the
//! origin: the deployer always signs directly, the admin signs directly unless the
//! sub-chain is administered by a multisig, in which case the wrapped call is
//! emitted as a proposal for the co-signers.

use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, TransactionReceipt, U256};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::EssentialConfig;
use crate::contracts::OwnerContract;
use crate::error::{DeployError, Result};
use crate::submitter::{TransactionSubmitter, UnsignedTx};

/// Logical originator of a privileged call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOrigin {
    Deployer,
    Admin,
}

/// Key that signs a directly submitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Deployer,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPlan {
    DirectSubmit(Identity),
    ProposeForApproval,
}

/// Owner-contract call handed to multisig co-signers instead of being sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposalArtifact {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Executed(Box<TransactionReceipt>),
    Proposed(ProposalArtifact),
}

impl ExecutionOutcome {
    pub fn receipt(&self) -> Option<&TransactionReceipt> {
        match self {
            ExecutionOutcome::Executed(receipt) => Some(receipt.as_ref()),
            ExecutionOutcome::Proposed(_) => None,
        }
    }

    pub fn is_proposal(&self) -> bool {
        matches!(self, ExecutionOutcome::Proposed(_))
    }
}

/// Plan for `origin` under the given multisig setting.
pub fn plan_for(origin: TxOrigin, multisig_admin: bool) -> ExecutionPlan {
    match origin {
        TxOrigin::Deployer => ExecutionPlan::DirectSubmit(Identity::Deployer),
        TxOrigin::Admin if multisig_admin => ExecutionPlan::ProposeForApproval,
        TxOrigin::Admin => ExecutionPlan::DirectSubmit(Identity::Admin),
    }
}

pub struct ExecutionRouter {
    submitter: TransactionSubmitter,
    owner: OwnerContract,
    multisig_admin: bool,
    deployer: LocalWallet,
    admin: Option<LocalWallet>,
}

impl std::fmt::Debug for ExecutionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRouter")
            .field("owner", &self.owner.address())
            .field("multisig_admin", &self.multisig_admin)
            .finish_non_exhaustive()
    }
}

impl ExecutionRouter {
    /// Build a router for one sub-chain. An unusable admin key only fails the
    /// calls that need the admin to sign.
    pub fn new(
        submitter: TransactionSubmitter,
        owner: OwnerContract,
        config: &EssentialConfig,
    ) -> Result<Self> {
        let admin = if config.enable_multisig_admin {
            None
        } else {
            config.admin_wallet().ok()
        };

        Ok(Self {
            submitter,
            owner,
            multisig_admin: config.enable_multisig_admin,
            deployer: config.deployer_wallet()?,
            admin,
        })
    }

    pub fn plan(&self, origin: TxOrigin) -> ExecutionPlan {
        plan_for(origin, self.multisig_admin)
    }

    pub fn owner(&self) -> &OwnerContract {
        &self.owner
    }

    pub fn submitter(&self) -> &TransactionSubmitter {
        &self.submitter
    }

    pub fn deployer(&self) -> &LocalWallet {
        &self.deployer
    }

    /// Execute `data` on `target` through the owner contract.
    pub async fn route_execution(
        &self,
        origin: TxOrigin,
        target: Address,
        data: Bytes,
    ) -> Result<ExecutionOutcome> {
        let payload = self.owner.encode_execute(target, data)?;
        self.dispatch(origin, payload).await
    }

    /// Call the owner contract itself, e.g. to manage its roles.
    pub async fn route_owner_call(&self, origin: TxOrigin, data: Bytes) -> Result<ExecutionOutcome> {
        self.dispatch(origin, data).await
    }

    async fn dispatch(&self, origin: TxOrigin, payload: Bytes) -> Result<ExecutionOutcome> {
        match self.plan(origin) {
            ExecutionPlan::DirectSubmit(identity) => {
                let signer = self.wallet(identity)?;
                let receipt = self
                    .submitter
                    .submit(signer, UnsignedTx::call(self.owner.address(), payload))
                    .await?;
                Ok(ExecutionOutcome::Executed(Box::new(receipt)))
            }
            ExecutionPlan::ProposeForApproval => {
                let artifact = ProposalArtifact {
                    to: self.owner.address(),
                    data: payload,
                    value: U256::zero(),
                };
                warn!("================================================================");
                warn!("SAFE transaction created, propose in SAFE UI using admin wallet");
                info!("to: {:?}", artifact.to);
                info!("data: {}", artifact.data);
                info!("value: {}", artifact.value);
                warn!("================================================================");
                Ok(ExecutionOutcome::Proposed(artifact))
            }
        }
    }

    fn wallet(&self, identity: Identity) -> Result<&LocalWallet> {
        match identity {
            Identity::Deployer => Ok(&self.deployer),
            Identity::Admin => self.admin.as_ref().ok_or(DeployError::InvalidKey("ADMIN_SK")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployer_always_direct() {
        assert_eq!(
            plan_for(TxOrigin::Deployer, true),
            ExecutionPlan::DirectSubmit(Identity::Deployer)
        );
        assert_eq!(
            plan_for(TxOrigin::Deployer, false),
            ExecutionPlan::DirectSubmit(Identity::Deployer)
        );
    }

    #[test]
    fn test_admin_plan_follows_multisig_flag() {
        assert_eq!(
            plan_for(TxOrigin::Admin, true),
            ExecutionPlan::ProposeForApproval
        );
        assert_eq!(
            plan_for(TxOrigin::Admin, false),
            ExecutionPlan::DirectSubmit(Identity::Admin)
        );
    }

    #[test]
    fn test_proposal_serializes_as_to_data_value() {
        let artifact = ProposalArtifact {
            to: Address::repeat_byte(0x11),
            data: Bytes::from(vec![0xab, 0xcd]),
            value: U256::zero(),
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["to"], "0x1111111111111111111111111111111111111111");
        assert_eq!(json["data"], "0xabcd");
        assert_eq!(json["value"], "0x0");
    }
}
