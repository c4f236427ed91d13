//! Minimal ABIs for the contracts the deployment flows touch, and the catalog built
//! from them.
//!
//! Each contract gets a distinct creation bytecode (`0x60806040 || name || 0x00`) so
//! [`crate::FakeChain`] can tell deployments apart by prefix.

use std::collections::HashMap;

use ethers::abi::Abi;
use ethers::types::Bytes;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use vessel_deploy::catalog::{ContractArtifact, ContractCatalog};
use vessel_deploy::names;

/// Name under which the SNARK verifier bytecode is known to the fake chain.
pub const SNARK_VERIFIER: &str = "SnarkVerifier";

fn param(name: &str, ty: &str) -> Value {
    json!({ "name": name, "type": ty, "internalType": ty })
}

fn checkpoint_components() -> Vec<Value> {
    vec![
        param("logicChainId", "uint32"),
        param("l1MessageCnt", "uint256"),
        param("l1LastCommitHash", "bytes32"),
        param("l1NextCommitHash", "bytes32"),
        param("l2LastCommitHash", "bytes32"),
    ]
}

fn function(name: &str, inputs: Vec<Value>, outputs: Vec<Value>, mutability: &str) -> Value {
    json!({
        "type": "function",
        "name": name,
        "inputs": inputs,
        "outputs": outputs,
        "stateMutability": mutability,
    })
}

fn view(name: &str, inputs: Vec<Value>, output: &str) -> Value {
    function(name, inputs, vec![param("", output)], "view")
}

fn write(name: &str, inputs: Vec<Value>) -> Value {
    function(name, inputs, vec![], "nonpayable")
}

fn error(name: &str, inputs: Vec<Value>) -> Value {
    json!({ "type": "error", "name": name, "inputs": inputs })
}

fn constructor(inputs: Vec<Value>) -> Value {
    json!({ "type": "constructor", "inputs": inputs, "stateMutability": "nonpayable" })
}

fn owner_abi() -> Value {
    json!([
        constructor(vec![]),
        function(
            "execute",
            vec![
                param("target", "address"),
                param("value", "uint256"),
                param("data", "bytes"),
                param("role", "bytes32"),
            ],
            vec![param("", "bytes")],
            "payable",
        ),
        write("grantRole", vec![param("role", "bytes32"), param("account", "address")]),
        write(
            "renounceRole",
            vec![param("role", "bytes32"), param("callerConfirmation", "address")],
        ),
        view(
            "hasRole",
            vec![param("role", "bytes32"), param("account", "address")],
            "bool",
        ),
        error(
            "AccessControlUnauthorizedAccount",
            vec![param("account", "address"), param("neededRole", "bytes32")],
        ),
    ])
}

fn vault_abi() -> Value {
    let address_views = [
        "admin",
        "wethAddress",
        "userApiLogicAddress",
        "managerApiLogicAddress",
        "messageQueueLogicAddress",
        "tokenManagerLogicAddress",
        "multiChainLogicAddress",
        "crossChainPortalContract",
    ];

    let mut items = vec![
        write("initialize_v2", vec![param("admin", "address")]),
        view("chainCnt", vec![], "uint32"),
        view("logicChainId", vec![], "uint32"),
        view("primaryLogicChainId", vec![], "uint32"),
        view("operators", vec![param("", "address")], "bool"),
        view("exitManagers", vec![param("", "address")], "bool"),
        view("circuitVersion", vec![], "string"),
        function(
            "preCommitCheckpointList",
            vec![param("", "uint32")],
            checkpoint_components(),
            "view",
        ),
        function(
            "postCommitConfirmation",
            vec![],
            vec![
                param("logicChainId", "uint32"),
                param("l1MessageCnt", "uint256"),
                param("l1NextCommitHash", "bytes32"),
                param("l2NextCommitHash", "bytes32"),
            ],
            "view",
        ),
        view("l1ToL2MessageQueueCommitIndex", vec![], "uint256"),
        view("l1ToL2MessageQueueHash", vec![param("", "uint256")], "bytes32"),
        view("l2ToL1MessageQueueCommitHash", vec![], "bytes32"),
        view("configured", vec![], "bool"),
        write(
            "updateAll",
            vec![param("verifier", "address"), param("version", "string")],
        ),
        write("registerOperator", vec![param("operator", "address")]),
        write("registerExitManager", vec![param("exitManager", "address")]),
        write(
            "configureAll",
            vec![
                param("weth", "address"),
                param("userApiLogic", "address"),
                param("managerApiLogic", "address"),
                param("messageQueueLogic", "address"),
                param("tokenManagerLogic", "address"),
                param("multiChainLogic", "address"),
                param("portal", "address"),
                param("logicChainId", "uint32"),
                param("primaryLogicChainId", "uint32"),
                param("chainCnt", "uint32"),
                json!({
                    "name": "checkpoints",
                    "type": "tuple[]",
                    "internalType": "struct PreCommitCheckpoint[]",
                    "components": checkpoint_components(),
                }),
            ],
        ),
        write("setConfigured", vec![param("configured", "bool")]),
        write(
            "registerNewAsset",
            vec![
                param("token", "address"),
                param("assetId", "uint32"),
                param("limitDigit", "uint8"),
                param("precisionDigit", "uint8"),
                param("decimals", "uint8"),
            ],
        ),
        write("setAssetActive", vec![param("assetId", "uint32")]),
        error("Unauthorized", vec![param("caller", "address")]),
        error("AssetNotRegistered", vec![param("assetId", "uint32")]),
    ];
    items.extend(address_views.iter().map(|name| view(name, vec![], "address")));
    Value::Array(items)
}

fn logic_abi(error_name: &str) -> Value {
    json!([error(error_name, vec![param("code", "uint256")])])
}

fn portal_abi() -> Value {
    json!([
        constructor(vec![param("endpoint", "address")]),
        write("initialize", vec![param("admin", "address")]),
        view("chainCnt", vec![], "uint32"),
        view("vaultContract", vec![], "address"),
        view("logicChainIdToEid", vec![param("", "uint32")], "uint32"),
        view("eidToLogicChainId", vec![param("", "uint32")], "uint32"),
        view("peers", vec![param("eid", "uint32")], "bytes32"),
        view("configured", vec![], "bool"),
        write(
            "configureAll",
            vec![param("vault", "address"), param("eidList", "uint32[]")],
        ),
        write("setPeer", vec![param("eid", "uint32"), param("peer", "bytes32")]),
        write("setConfigured", vec![param("configured", "bool")]),
    ])
}

fn proxy_abi() -> Value {
    json!([constructor(vec![
        param("logic", "address"),
        param("initialOwner", "address"),
        param("data", "bytes"),
    ])])
}

fn proxy_admin_abi() -> Value {
    json!([
        view("owner", vec![], "address"),
        function(
            "upgradeAndCall",
            vec![
                param("proxy", "address"),
                param("implementation", "address"),
                param("data", "bytes"),
            ],
            vec![],
            "payable",
        ),
        error("OwnableUnauthorizedAccount", vec![param("account", "address")]),
    ])
}

fn token_abi() -> Value {
    json!([constructor(vec![
        param("owner", "address"),
        param("supply", "uint256"),
        param("decimals", "uint8"),
        param("name", "string"),
        param("symbol", "string"),
    ])])
}

fn abi_json(name: &str) -> Value {
    match name {
        names::OWNER => owner_abi(),
        names::VAULT => vault_abi(),
        names::MANAGER_API_LOGIC => logic_abi("ManagerApiFailure"),
        names::MESSAGE_QUEUE_LOGIC => logic_abi("MessageQueueFailure"),
        names::MULTI_CHAIN_LOGIC => logic_abi("MultiChainFailure"),
        names::TOKEN_MANAGER_LOGIC => logic_abi("TokenManagerFailure"),
        names::USER_API_LOGIC => logic_abi("UserApiFailure"),
        names::TRANSPARENT_PROXY => proxy_abi(),
        names::PROXY_ADMIN => proxy_admin_abi(),
        names::PORTAL => portal_abi(),
        names::TOKEN => token_abi(),
        _ => json!([]),
    }
}

/// Every contract the catalog knows about.
pub const CONTRACTS: [&str; 12] = [
    names::OWNER,
    names::VAULT,
    names::MANAGER_API_LOGIC,
    names::MESSAGE_QUEUE_LOGIC,
    names::MULTI_CHAIN_LOGIC,
    names::TOKEN_MANAGER_LOGIC,
    names::USER_API_LOGIC,
    names::TRANSPARENT_PROXY,
    names::PROXY_ADMIN,
    names::PORTAL,
    names::WETH,
    names::TOKEN,
];

static ABIS: Lazy<HashMap<&'static str, Abi>> = Lazy::new(|| {
    CONTRACTS
        .iter()
        .map(|name| {
            let abi: Abi = serde_json::from_value(abi_json(name))
                .unwrap_or_else(|e| panic!("fixture abi for {name} is malformed: {e}"));
            (*name, abi)
        })
        .collect()
});

/// Fixture ABI of `name`.
pub fn abi(name: &str) -> &'static Abi {
    ABIS.get(name)
        .unwrap_or_else(|| panic!("no fixture abi for {name}"))
}

/// Creation bytecode the fake chain recognizes as `name`.
pub fn bytecode(name: &str) -> Bytes {
    let mut code = vec![0x60, 0x80, 0x60, 0x40];
    code.extend_from_slice(name.as_bytes());
    code.push(0x00);
    code.into()
}

/// Compiler output document for `name`, as read from an artifacts directory.
pub fn artifact_json(name: &str) -> String {
    json!({
        "abi": abi_json(name),
        "bytecode": { "object": format!("{}", bytecode(name)) },
    })
    .to_string()
}

/// Catalog preloaded with every fixture contract.
pub fn fixture_catalog() -> ContractCatalog {
    ContractCatalog::from_artifacts(CONTRACTS.iter().map(|name| {
        ContractArtifact::from_json(name, &artifact_json(name))
            .unwrap_or_else(|e| panic!("fixture artifact {name}: {e}"))
    }))
}

/// Write the fixture artifacts in the `<Name>.sol/<Name>.json` layout under `dir`.
pub fn write_artifacts(dir: &std::path::Path) -> anyhow::Result<()> {
    for name in CONTRACTS {
        let contract_dir = dir.join(format!("{name}.sol"));
        std::fs::create_dir_all(&contract_dir)?;
        std::fs::write(contract_dir.join(format!("{name}.json")), artifact_json(name))?;
    }
    Ok(())
}
