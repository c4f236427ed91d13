use std::sync::Arc;

use ethers::abi::Token;
use ethers::signers::LocalWallet;
use ethers::types::{Address, U256};
use vessel_deploy::deploy::deploy_bytecode;
use vessel_deploy::fees::FeeStrategy;
use vessel_deploy::{
    names, DeployError, ErrorRegistry, FeeData, GasTally, NetworkClient, TransactionSubmitter,
    UnsignedTx,
};
use vessel_test_fixtures::abi::bytecode;
use vessel_test_fixtures::chain::GAS_USED;
use vessel_test_fixtures::{fixture_catalog, fixture_config, FakeChain};

fn gwei(n: u64) -> U256 {
    U256::from(n) * U256::exp10(9)
}

/// Submitter for sub-chain `index` of the two-chain fixture (chain 0 uses 1559,
/// chain 1 legacy pricing).
fn submitter_with_gas(
    index: usize,
    gas: GasTally,
) -> (TransactionSubmitter, Arc<FakeChain>, LocalWallet) {
    let config = fixture_config(2);
    let essential = &config.sub_chain_configs[index].essential;
    let chain = FakeChain::new(essential.chain_id);
    let client = NetworkClient::new(essential.logic_chain_id, chain.clone());
    let errors = ErrorRegistry::from_catalog(&fixture_catalog()).unwrap();
    let submitter = TransactionSubmitter::new(
        client,
        FeeStrategy::from_config(essential).unwrap(),
        Arc::new(errors),
        gas,
    );
    (submitter, chain, essential.deployer_wallet().unwrap())
}

fn submitter(index: usize) -> (TransactionSubmitter, Arc<FakeChain>, LocalWallet) {
    submitter_with_gas(index, GasTally::new())
}

#[tokio::test]
async fn deployment_returns_created_address_and_counts_gas() {
    let gas = GasTally::new();
    let (submitter, chain, deployer) = submitter_with_gas(0, gas.clone());

    let owner = deploy_bytecode(&submitter, &deployer, &bytecode(names::OWNER), &[])
        .await
        .unwrap();
    let weth = deploy_bytecode(&submitter, &deployer, &bytecode(names::WETH), &[])
        .await
        .unwrap();

    assert_eq!(chain.deployments(), vec![owner, weth]);
    assert_eq!(gas.total(), 2 * GAS_USED);
}

#[tokio::test]
async fn constructor_arguments_follow_bytecode() {
    let (submitter, chain, deployer) = submitter(1);
    let endpoint = Address::repeat_byte(0x1a);
    deploy_bytecode(
        &submitter,
        &deployer,
        &bytecode(names::PORTAL),
        &[Token::Address(endpoint)],
    )
    .await
    .unwrap();

    let sent = chain.sent();
    let data = &sent[0].data;
    assert!(data.starts_with(&bytecode(names::PORTAL)));
    assert_eq!(&data[data.len() - 20..], endpoint.as_bytes());
}

#[tokio::test]
async fn estimation_failure_is_fatal_and_nothing_is_sent() {
    let (submitter, chain, deployer) = submitter(0);
    chain.fail_estimate_in(0);

    let err = submitter
        .submit(&deployer, UnsignedTx::create(bytecode(names::OWNER)))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::EstimationFailed(_)));
    assert_eq!(chain.sent_count(), 0);
}

#[tokio::test]
async fn fee_above_ceiling_is_refused_before_sending() {
    let (submitter, chain, deployer) = submitter(0);
    chain.set_fee_data(FeeData {
        gas_price: Some(gwei(50)),
        max_fee_per_gas: Some(gwei(150)),
        max_priority_fee_per_gas: Some(gwei(1)),
    });

    let err = submitter
        .submit(&deployer, UnsignedTx::create(bytecode(names::OWNER)))
        .await
        .unwrap_err();
    match err {
        DeployError::FeeCeilingExceeded { observed, ceiling } => {
            assert_eq!(observed, gwei(150));
            assert_eq!(ceiling, gwei(100));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(chain.sent_count(), 0);
}

#[tokio::test]
async fn fee_equal_to_ceiling_is_accepted() {
    let (submitter, chain, deployer) = submitter(1);
    chain.set_fee_data(FeeData {
        gas_price: Some(gwei(100)),
        ..Default::default()
    });

    let receipt = submitter
        .submit(&deployer, UnsignedTx::create(bytecode(names::OWNER)))
        .await
        .unwrap();
    assert_eq!(receipt.effective_gas_price, Some(gwei(100)));
}

#[tokio::test]
async fn missing_fee_quote_is_reported() {
    let (submitter, chain, deployer) = submitter(0);
    chain.set_fee_data(FeeData {
        gas_price: Some(gwei(1)),
        ..Default::default()
    });

    let err = submitter
        .submit(&deployer, UnsignedTx::create(bytecode(names::OWNER)))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::FeeDataUnavailable(_)));
    assert_eq!(chain.sent_count(), 0);
}

#[tokio::test]
async fn reverted_receipt_is_an_error() {
    let (submitter, chain, deployer) = submitter(0);
    chain.revert_next_send();

    let err = submitter
        .submit(&deployer, UnsignedTx::create(bytecode(names::OWNER)))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::TransactionReverted(_)));
    assert_eq!(chain.sent_count(), 1);
    assert!(!chain.sent()[0].success);
}

#[tokio::test]
async fn unauthorized_call_fails_estimation() {
    let (submitter, chain, deployer) = submitter(0);
    let owner = deploy_bytecode(&submitter, &deployer, &bytecode(names::OWNER), &[])
        .await
        .unwrap();

    let abi = vessel_test_fixtures::abi::abi(names::OWNER);
    let data = abi
        .function("grantRole")
        .unwrap()
        .encode_input(&[
            Token::FixedBytes(vec![0u8; 32]),
            Token::Address(Address::repeat_byte(3)),
        ])
        .unwrap();
    let stranger = "0x0000000000000000000000000000000000000000000000000000000000000009"
        .parse::<LocalWallet>()
        .unwrap();

    let err = submitter
        .submit(&stranger, UnsignedTx::call(owner, data.into()))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::EstimationFailed(_)));
    // Only the owner deployment reached the chain.
    assert_eq!(chain.sent_count(), 1);
}
