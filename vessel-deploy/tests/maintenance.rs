use vessel_deploy::maintenance::{
    deploy_tokens, deploy_weth, inspect, register_operator, register_tokens, update_verifier,
    upgrade_vault_impl,
};
use vessel_deploy::{names, ConsistencyValidator, DeployError, DeploymentOrchestrator};
use vessel_test_fixtures::{fixture_release, FixtureEnv, RELEASE_TAG};

use ethers::types::{Address, U256};

async fn deployed(dir: &std::path::Path) -> FixtureEnv {
    let mut env = FixtureEnv::with_chains(dir, 1).unwrap();
    DeploymentOrchestrator::new(&mut env.ctx, 0)
        .run(Some(&fixture_release(RELEASE_TAG)))
        .await
        .unwrap();
    env
}

#[tokio::test]
async fn update_verifier_refuses_current_version() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = deployed(dir.path()).await;
    let sent = env.chain(0).sent_count();

    let err = update_verifier(&mut env.ctx, 0, &fixture_release(RELEASE_TAG))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Release(_)));
    assert_eq!(env.chain(0).sent_count(), sent);
}

#[tokio::test]
async fn update_verifier_switches_vault_to_new_release() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = deployed(dir.path()).await;
    let old_verifier = env
        .ctx
        .essential(0)
        .unwrap()
        .addresses
        .snark_verifier_contract_address
        .unwrap();

    let outcome = update_verifier(&mut env.ctx, 0, &fixture_release("v3.1.0"))
        .await
        .unwrap();
    assert!(outcome.receipt().is_some());

    let essential = env.ctx.essential(0).unwrap();
    let new_verifier = essential.addresses.snark_verifier_contract_address.unwrap();
    assert_ne!(new_verifier, old_verifier);
    assert_eq!(essential.release_tag, "v3.1.0");

    let vault = env
        .chain(0)
        .vault_state(essential.addresses.vault_proxy().unwrap())
        .unwrap();
    assert_eq!(vault.verifier, new_verifier);
    assert_eq!(vault.circuit_version, "v3.1.0");

    ConsistencyValidator::new(&env.ctx, 0)
        .validate()
        .await
        .unwrap();
}

#[tokio::test]
async fn upgrade_points_proxy_at_fresh_implementation() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = deployed(dir.path()).await;
    let before = inspect(&env.ctx, 0).await.unwrap();

    upgrade_vault_impl(&mut env.ctx, 0).await.unwrap();

    let book = env.ctx.essential(0).unwrap().addresses.clone();
    let after = inspect(&env.ctx, 0).await.unwrap();
    assert_ne!(after.implementation, before.implementation);
    assert_eq!(Some(after.implementation), book.vault_impl_contract_address);
    assert_eq!(after.proxy_admin, before.proxy_admin);
    for name in names::IMPLEMENTATIONS {
        assert!(book.implementation(name).is_some());
    }

    // New logic addresses are not wired into the vault until it is reconfigured.
    let err = ConsistencyValidator::new(&env.ctx, 0)
        .validate()
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::ConsistencyViolation { .. }));
}

#[tokio::test]
async fn tokens_are_deployed_registered_and_activated() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = deployed(dir.path()).await;

    let err = register_tokens(&env.ctx, 0).await.unwrap_err();
    assert!(matches!(err, DeployError::MissingAddress("TEST.TOKENS.ADDRESS")));

    let addresses = deploy_tokens(&mut env.ctx, 0).await.unwrap();
    assert_eq!(addresses.len(), 1);
    let token = env.ctx.sub_chain(0).unwrap().test.tokens[0].clone();
    assert_eq!(token.address, Some(addresses[0]));

    let outcomes = register_tokens(&env.ctx, 0).await.unwrap();
    assert_eq!(outcomes.len(), 2);

    let vault = env
        .chain(0)
        .vault_state(env.ctx.essential(0).unwrap().addresses.vault_proxy().unwrap())
        .unwrap();
    assert_eq!(vault.assets.get(&token.id), Some(&(addresses[0], true)));
}

#[tokio::test]
async fn weth_deployment_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = FixtureEnv::with_chains(dir.path(), 1).unwrap();

    let weth = deploy_weth(&mut env.ctx, 0).await.unwrap();
    assert_eq!(env.chain(0).deployments(), vec![weth]);

    let env = env.reload().unwrap();
    assert_eq!(
        env.ctx.essential(0).unwrap().addresses.weth_contract_address,
        Some(weth)
    );
}

#[tokio::test]
async fn operator_registration_goes_through_admin() {
    let dir = tempfile::tempdir().unwrap();
    let env = deployed(dir.path()).await;
    let operator = Address::repeat_byte(0x42);

    let outcome = register_operator(&env.ctx, 0, operator).await.unwrap();
    let receipt = outcome.receipt().unwrap();
    assert_eq!(receipt.from, vessel_test_fixtures::admin_address());

    let vault = env
        .chain(0)
        .vault_state(env.ctx.essential(0).unwrap().addresses.vault_proxy().unwrap())
        .unwrap();
    assert!(vault.operators.contains(&operator));
}

#[tokio::test]
async fn inspection_reports_vault_state() {
    let dir = tempfile::tempdir().unwrap();
    let env = deployed(dir.path()).await;
    let book = env.ctx.essential(0).unwrap().addresses.clone();

    let inspection = inspect(&env.ctx, 0).await.unwrap();
    assert_eq!(inspection.admin, book.owner().unwrap());
    assert_eq!(Some(inspection.proxy_admin), book.vault_proxy_admin_contract_address);
    assert_eq!(Some(inspection.implementation), book.vault_impl_contract_address);
    assert_eq!(inspection.circuit_version, RELEASE_TAG);
    assert_eq!(Some(inspection.weth), book.weth_contract_address);
    assert_eq!(inspection.l1_commit_index, U256::zero());
}
