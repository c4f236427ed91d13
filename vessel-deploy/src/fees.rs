//! Fee selection under a configured price ceiling.

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Eip1559TransactionRequest, TransactionRequest, U256};

use crate::config::{gwei_to_wei, EssentialConfig};
use crate::error::{DeployError, Result};
use crate::network::FeeData;

/// Fee policy of one sub-chain, already converted to wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeStrategy {
    pub enable_1559: bool,
    pub ceiling: U256,
    pub priority_fee: U256,
}

/// Fees ready to be attached to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeProfile {
    Legacy {
        gas_price: U256,
    },
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl FeeStrategy {
    pub fn from_config(config: &EssentialConfig) -> Result<Self> {
        Ok(Self {
            enable_1559: config.enable_1559,
            ceiling: gwei_to_wei(config.max_fee_per_gas)?,
            priority_fee: gwei_to_wei(config.max_priority_fee_per_gas)?,
        })
    }

    /// Pick the fee profile for the current network quote.
    ///
    /// The network max fee (or gas price) is used as-is; exceeding the ceiling is
    /// an error rather than a clamp.
    pub fn profile(&self, fee_data: &FeeData) -> Result<FeeProfile> {
        if self.enable_1559 {
            let max_fee_per_gas = fee_data.max_fee_per_gas.ok_or_else(|| {
                DeployError::FeeDataUnavailable("network reported no max fee per gas".into())
            })?;
            self.check_ceiling(max_fee_per_gas)?;
            Ok(FeeProfile::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas: self.priority_fee,
            })
        } else {
            let gas_price = fee_data.gas_price.ok_or_else(|| {
                DeployError::FeeDataUnavailable("network reported no gas price".into())
            })?;
            self.check_ceiling(gas_price)?;
            Ok(FeeProfile::Legacy { gas_price })
        }
    }

    /// Empty transaction envelope of the configured fee model.
    pub fn envelope(&self) -> TypedTransaction {
        if self.enable_1559 {
            TypedTransaction::Eip1559(Eip1559TransactionRequest::new())
        } else {
            TypedTransaction::Legacy(TransactionRequest::new())
        }
    }

    fn check_ceiling(&self, observed: U256) -> Result<()> {
        if observed > self.ceiling {
            return Err(DeployError::FeeCeilingExceeded {
                observed,
                ceiling: self.ceiling,
            });
        }
        Ok(())
    }
}

impl FeeProfile {
    pub fn apply(&self, tx: &mut TypedTransaction) {
        match (self, tx) {
            (FeeProfile::Legacy { gas_price }, tx) => {
                tx.set_gas_price(*gas_price);
            }
            (
                FeeProfile::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                },
                TypedTransaction::Eip1559(inner),
            ) => {
                inner.max_fee_per_gas = Some(*max_fee_per_gas);
                inner.max_priority_fee_per_gas = Some(*max_priority_fee_per_gas);
            }
            (FeeProfile::Eip1559 { max_fee_per_gas, .. }, tx) => {
                tx.set_gas_price(*max_fee_per_gas);
            }
        }
    }

    /// The highest price per gas this profile may pay.
    pub fn max_price(&self) -> U256 {
        match self {
            FeeProfile::Legacy { gas_price } => *gas_price,
            FeeProfile::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::exp10(9)
    }

    fn strategy(enable_1559: bool) -> FeeStrategy {
        FeeStrategy {
            enable_1559,
            ceiling: gwei(100),
            priority_fee: gwei(2),
        }
    }

    fn quote(price: u64) -> FeeData {
        FeeData {
            gas_price: Some(gwei(price)),
            max_fee_per_gas: Some(gwei(price)),
            max_priority_fee_per_gas: Some(gwei(1)),
        }
    }

    #[test]
    fn test_1559_uses_network_max_fee_and_configured_priority() {
        let profile = strategy(true).profile(&quote(40)).unwrap();
        assert_eq!(
            profile,
            FeeProfile::Eip1559 {
                max_fee_per_gas: gwei(40),
                max_priority_fee_per_gas: gwei(2),
            }
        );
    }

    #[test]
    fn test_legacy_uses_gas_price() {
        let profile = strategy(false).profile(&quote(40)).unwrap();
        assert_eq!(profile, FeeProfile::Legacy { gas_price: gwei(40) });
    }

    #[test]
    fn test_ceiling_is_inclusive() {
        assert!(strategy(true).profile(&quote(100)).is_ok());
        let err = strategy(true).profile(&quote(101)).unwrap_err();
        assert!(matches!(
            err,
            DeployError::FeeCeilingExceeded { observed, ceiling }
                if observed == gwei(101) && ceiling == gwei(100)
        ));
        assert!(matches!(
            strategy(false).profile(&quote(101)),
            Err(DeployError::FeeCeilingExceeded { .. })
        ));
    }

    #[test]
    fn test_missing_fee_data_is_unavailable() {
        let data = FeeData {
            gas_price: Some(gwei(1)),
            ..Default::default()
        };
        assert!(matches!(
            strategy(true).profile(&data),
            Err(DeployError::FeeDataUnavailable(_))
        ));
        assert!(matches!(
            strategy(false).profile(&FeeData::default()),
            Err(DeployError::FeeDataUnavailable(_))
        ));
    }

    #[test]
    fn test_apply_sets_envelope_fields() {
        let profile = strategy(true).profile(&quote(40)).unwrap();
        let mut tx = strategy(true).envelope();
        profile.apply(&mut tx);
        match tx {
            TypedTransaction::Eip1559(inner) => {
                assert_eq!(inner.max_fee_per_gas, Some(gwei(40)));
                assert_eq!(inner.max_priority_fee_per_gas, Some(gwei(2)));
            }
            other => panic!("unexpected envelope {other:?}"),
        }

        let legacy = strategy(false).profile(&quote(30)).unwrap();
        let mut tx = strategy(false).envelope();
        legacy.apply(&mut tx);
        assert_eq!(tx.gas_price(), Some(gwei(30)));
    }
}
