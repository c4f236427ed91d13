use ethers::types::H256;
use vessel_deploy::encoding::address_to_bytes32;
use vessel_deploy::maintenance::configure_portal_peers;
use vessel_deploy::{ConsistencyValidator, DeployError, DeploymentOrchestrator};
use vessel_test_fixtures::{fixture_config, fixture_release, FixtureEnv, RELEASE_TAG};

async fn deploy_all(env: &mut FixtureEnv) {
    let release = fixture_release(RELEASE_TAG);
    for index in 0..env.chains.len() {
        DeploymentOrchestrator::new(&mut env.ctx, index)
            .run(Some(&release))
            .await
            .unwrap();
    }
}

async fn deploy_and_bind(env: &mut FixtureEnv) {
    deploy_all(env).await;
    for index in 0..env.chains.len() {
        configure_portal_peers(&env.ctx, index).await.unwrap();
    }
}

fn violation(err: DeployError) -> (&'static str, String) {
    match err {
        DeployError::ConsistencyViolation { step, field, .. } => (step, field),
        other => panic!("expected a consistency violation, got {other:?}"),
    }
}

#[tokio::test]
async fn two_chains_deploy_bind_validate_and_finalize() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = FixtureEnv::with_chains(dir.path(), 2).unwrap();
    deploy_and_bind(&mut env).await;

    for index in 0..2 {
        ConsistencyValidator::new(&env.ctx, index)
            .validate()
            .await
            .unwrap();
        let outcomes = ConsistencyValidator::new(&env.ctx, index)
            .finalize()
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|outcome| outcome.receipt().is_some()));

        let book = &env.ctx.essential(index).unwrap().addresses;
        let chain = env.chain(index);
        assert!(chain.vault_state(book.vault_proxy().unwrap()).unwrap().configured);
        assert!(chain.portal_state(book.portal_proxy().unwrap()).unwrap().configured);
    }

    // Star topology: each side points at the other.
    let primary_portal = env.ctx.essential(0).unwrap().addresses.portal_proxy().unwrap();
    let subsidiary_portal = env.ctx.essential(1).unwrap().addresses.portal_proxy().unwrap();
    let primary = env.chain(0).portal_state(primary_portal).unwrap();
    let subsidiary = env.chain(1).portal_state(subsidiary_portal).unwrap();
    assert_eq!(primary.peers.get(&30102), Some(&address_to_bytes32(subsidiary_portal)));
    assert_eq!(subsidiary.peers.get(&30101), Some(&address_to_bytes32(primary_portal)));
    assert_eq!(primary.peers.len(), 1);
    assert_eq!(subsidiary.peers.len(), 1);
}

#[tokio::test]
async fn single_chain_validates_without_peers() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = FixtureEnv::with_chains(dir.path(), 1).unwrap();
    deploy_all(&mut env).await;

    assert!(configure_portal_peers(&env.ctx, 0).await.unwrap().is_empty());
    ConsistencyValidator::new(&env.ctx, 0)
        .validate()
        .await
        .unwrap();
}

#[tokio::test]
async fn unbound_peers_fail_validation() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = FixtureEnv::with_chains(dir.path(), 2).unwrap();
    deploy_all(&mut env).await;

    let err = ConsistencyValidator::new(&env.ctx, 1)
        .validate()
        .await
        .unwrap_err();
    let (step, field) = violation(err);
    assert_eq!(step, "Peer by EID");
    assert_eq!(field, "peers(30101)");
}

#[tokio::test]
async fn wrong_eid_mapping_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = FixtureEnv::with_chains(dir.path(), 2).unwrap();
    deploy_and_bind(&mut env).await;

    let portal = env.ctx.essential(0).unwrap().addresses.portal_proxy().unwrap();
    assert!(env.chain(0).tamper_portal(portal, |state| {
        state.logic_chain_id_to_eid.insert(1, 30109);
    }));

    let err = ConsistencyValidator::new(&env.ctx, 0)
        .validate()
        .await
        .unwrap_err();
    let (step, field) = violation(err);
    assert_eq!(step, "Eid and LogicChainId mapping");
    assert_eq!(field, "logicChainIdToEid(1)");

    // The other chain is unaffected.
    ConsistencyValidator::new(&env.ctx, 1)
        .validate()
        .await
        .unwrap();
}

#[tokio::test]
async fn wrong_declared_eid_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = FixtureEnv::with_chains(dir.path(), 2).unwrap();
    deploy_and_bind(&mut env).await;

    env.ctx
        .record(1, |c| c.essential.layer_zero_endpoint_eid = 30109)
        .unwrap();

    let err = ConsistencyValidator::new(&env.ctx, 0)
        .validate()
        .await
        .unwrap_err();
    match err {
        DeployError::ConsistencyViolation {
            step,
            field,
            expected,
            observed,
        } => {
            assert_eq!(step, "Eid and LogicChainId mapping");
            assert_eq!(field, "logicChainIdToEid(1)");
            assert_eq!(expected, "30109");
            assert_eq!(observed, "30102");
        }
        other => panic!("expected a consistency violation, got {other:?}"),
    }
}

#[tokio::test]
async fn one_byte_checkpoint_difference_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = FixtureEnv::with_chains(dir.path(), 2).unwrap();
    deploy_and_bind(&mut env).await;

    let vault = env.ctx.essential(1).unwrap().addresses.vault_proxy().unwrap();
    assert!(env.chain(1).tamper_vault(vault, |state| {
        if let Some(checkpoint) = state.checkpoints.get_mut(&0) {
            let mut bytes = checkpoint.4.to_fixed_bytes();
            bytes[31] ^= 0x01;
            checkpoint.4 = H256::from(bytes);
        }
    }));

    let err = ConsistencyValidator::new(&env.ctx, 1)
        .validate()
        .await
        .unwrap_err();
    let (step, field) = violation(err);
    assert_eq!(step, "Validate Vault Configurations");
    assert_eq!(field, "PRE_COMMIT_CHECKPOINT[0].l2LastCommitHash");
}

#[tokio::test]
async fn checkpoint_not_continuing_its_seed_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = FixtureEnv::with_chains(dir.path(), 2).unwrap();
    deploy_and_bind(&mut env).await;

    let vault = env.ctx.essential(0).unwrap().addresses.vault_proxy().unwrap();
    assert!(env.chain(0).tamper_vault(vault, |state| {
        if let Some(checkpoint) = state.checkpoints.get_mut(&1) {
            let mut bytes = checkpoint.2.to_fixed_bytes();
            bytes[0] ^= 0x80;
            checkpoint.2 = H256::from(bytes);
        }
    }));

    let err = ConsistencyValidator::new(&env.ctx, 0)
        .validate()
        .await
        .unwrap_err();
    let (step, field) = violation(err);
    assert_eq!(step, "Validate Vault Configurations");
    assert_eq!(field, "PRE_COMMIT_CHECKPOINT[1].l1LastCommitHash");
}

#[tokio::test]
async fn subsidiary_to_subsidiary_peer_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = FixtureEnv::with_chains(dir.path(), 3).unwrap();
    deploy_and_bind(&mut env).await;

    for index in 0..3 {
        ConsistencyValidator::new(&env.ctx, index)
            .validate()
            .await
            .unwrap();
    }

    let portal = env.ctx.essential(1).unwrap().addresses.portal_proxy().unwrap();
    let stray = address_to_bytes32(env.ctx.essential(2).unwrap().addresses.portal_proxy().unwrap());
    assert!(env.chain(1).tamper_portal(portal, |state| {
        state.peers.insert(30103, stray);
    }));

    let err = ConsistencyValidator::new(&env.ctx, 1)
        .validate()
        .await
        .unwrap_err();
    let (step, field) = violation(err);
    assert_eq!(step, "Peer by EID");
    assert_eq!(field, "peers(30103)");
}

#[tokio::test]
async fn foreign_proxy_admin_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = FixtureEnv::with_chains(dir.path(), 1).unwrap();
    deploy_all(&mut env).await;

    env.ctx
        .record(0, |c| {
            c.essential.addresses.layer_zero_portal_proxy_admin_contract_address =
                c.essential.addresses.vault_proxy_admin_contract_address
        })
        .unwrap();

    let err = ConsistencyValidator::new(&env.ctx, 0)
        .validate()
        .await
        .unwrap_err();
    let (step, field) = violation(err);
    assert_eq!(step, "Validate LZPortal Proxy");
    assert_eq!(field, "LAYER_ZERO_PORTAL_PROXY_ADMIN_CONTRACT_ADDRESS");
}

#[tokio::test]
async fn multisig_admin_calls_become_proposals() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fixture_config(2);
    for sub_chain in &mut config.sub_chain_configs {
        sub_chain.essential.enable_multisig_admin = true;
    }
    let mut env = FixtureEnv::new(dir.path(), config).unwrap();

    // Deployer-origin calls are still sent directly.
    deploy_all(&mut env).await;
    let sent_before: Vec<usize> = env.chains.iter().map(|c| c.sent_count()).collect();

    let owner = env.ctx.essential(0).unwrap().addresses.owner().unwrap();
    let outcomes = configure_portal_peers(&env.ctx, 0).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes.iter().all(|outcome| outcome.is_proposal()));
    match &outcomes[0] {
        vessel_deploy::ExecutionOutcome::Proposed(artifact) => {
            assert_eq!(artifact.to, owner);
            assert!(artifact.value.is_zero());
        }
        other => panic!("expected a proposal, got {other:?}"),
    }

    let finalized = ConsistencyValidator::new(&env.ctx, 1)
        .finalize()
        .await
        .unwrap();
    assert!(finalized.iter().all(|outcome| outcome.is_proposal()));

    let sent_after: Vec<usize> = env.chains.iter().map(|c| c.sent_count()).collect();
    assert_eq!(sent_before, sent_after);
    let vault = env.ctx.essential(1).unwrap().addresses.vault_proxy().unwrap();
    assert!(!env.chain(1).vault_state(vault).unwrap().configured);
}
