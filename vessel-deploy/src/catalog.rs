//! Compiled contract artifacts and the revert-data decoder built from them.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use ethers::abi::ethabi::AbiError;
use ethers::abi::{Abi, Param, ParamType, Token};
use ethers::types::Bytes;
use serde::Deserialize;
use tracing::debug;

use crate::error::{DeployError, Result};
use crate::names;

/// ABI and creation bytecode of one compiled contract.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    pub abi: Arc<Abi>,
    pub bytecode: Bytes,
}

#[derive(Deserialize)]
struct RawArtifact {
    abi: Abi,
    #[serde(default)]
    bytecode: Option<RawBytecode>,
}

#[derive(Deserialize)]
struct RawBytecode {
    object: String,
}

impl ContractArtifact {
    /// Parse a compiler output document (`{ "abi": [...], "bytecode": { "object": "0x.." } }`).
    pub fn from_json(name: &str, json: &str) -> Result<Self> {
        let raw: RawArtifact = serde_json::from_str(json).map_err(|e| DeployError::CatalogEntry {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let bytecode = match raw.bytecode {
            Some(code) => {
                let hex = crate::encoding::maybe_remove_0x_prefix(&code.object);
                hex::decode(hex).map_err(|e| DeployError::CatalogEntry {
                    name: name.to_string(),
                    reason: format!("bytecode is not hex: {e}"),
                })?
            }
            None => Vec::new(),
        };

        Ok(Self {
            name: name.to_string(),
            abi: Arc::new(raw.abi),
            bytecode: bytecode.into(),
        })
    }

    /// Creation bytecode, refusing artifacts without one (interfaces, abstract contracts).
    pub fn creation_code(&self) -> Result<&Bytes> {
        if self.bytecode.is_empty() {
            return Err(DeployError::CatalogEntry {
                name: self.name.clone(),
                reason: "artifact has no bytecode".into(),
            });
        }
        Ok(&self.bytecode)
    }
}

/// Lookup of contract artifacts by name.
///
/// Artifacts are read from `<dir>/<Name>.sol/<Name>.json`; preloaded artifacts take
/// precedence, which lets tests run without a compiler output directory.
#[derive(Debug, Clone, Default)]
pub struct ContractCatalog {
    dir: Option<PathBuf>,
    preloaded: HashMap<String, Arc<ContractArtifact>>,
}

impl ContractCatalog {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            preloaded: HashMap::new(),
        }
    }

    pub fn from_artifacts(artifacts: impl IntoIterator<Item = ContractArtifact>) -> Self {
        Self {
            dir: None,
            preloaded: artifacts
                .into_iter()
                .map(|a| (a.name.clone(), Arc::new(a)))
                .collect(),
        }
    }

    pub fn artifact(&self, name: &str) -> Result<Arc<ContractArtifact>> {
        if let Some(artifact) = self.preloaded.get(name) {
            return Ok(artifact.clone());
        }

        let Some(dir) = &self.dir else {
            return Err(DeployError::CatalogEntry {
                name: name.to_string(),
                reason: "not in catalog".into(),
            });
        };

        let path = dir.join(format!("{name}.sol")).join(format!("{name}.json"));
        debug!("loading contract metadata from {}", path.display());
        let json = fs::read_to_string(&path).map_err(|e| DeployError::CatalogEntry {
            name: name.to_string(),
            reason: format!("{}: {e}", path.display()),
        })?;
        ContractArtifact::from_json(name, &json).map(Arc::new)
    }

    pub fn abi(&self, name: &str) -> Result<Arc<Abi>> {
        Ok(self.artifact(name)?.abi.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REVERT DECODING
// ═══════════════════════════════════════════════════════════════════════════════

/// A revert payload matched against a known error.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedError {
    pub contract: String,
    pub name: String,
    pub args: Vec<Token>,
}

impl fmt::Display for DecodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|t| t.to_string()).collect();
        write!(f, "{}.{}({})", self.contract, self.name, args.join(", "))
    }
}

/// Selector index over the custom errors of the vault and its logic contracts.
#[derive(Debug, Clone, Default)]
pub struct ErrorRegistry {
    by_selector: HashMap<[u8; 4], (String, AbiError)>,
}

impl ErrorRegistry {
    /// Index the errors of every vault-side contract plus the builtin `Error` and `Panic`.
    pub fn from_catalog(catalog: &ContractCatalog) -> Result<Self> {
        let mut registry = Self::with_builtins();
        for name in names::ERROR_SOURCES {
            let abi = catalog.abi(name)?;
            registry.register_abi(name, &abi);
        }
        debug!("error registry holds {} selectors", registry.len());
        Ok(registry)
    }

    /// Registry that only knows `Error(string)` and `Panic(uint256)`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register("builtin", builtin_error("Error", ParamType::String));
        registry.register("builtin", builtin_error("Panic", ParamType::Uint(256)));
        registry
    }

    pub fn register_abi(&mut self, contract: &str, abi: &Abi) {
        for error in abi.errors() {
            self.register(contract, error.clone());
        }
    }

    fn register(&mut self, contract: &str, error: AbiError) {
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&error.signature().as_bytes()[..4]);
        // The same error declared by several logic contracts keeps its first source.
        self.by_selector
            .entry(selector)
            .or_insert_with(|| (contract.to_string(), error));
    }

    pub fn len(&self) -> usize {
        self.by_selector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_selector.is_empty()
    }

    /// Match `data` against the known selectors and decode the arguments.
    pub fn decode(&self, data: &[u8]) -> Result<DecodedError> {
        if data.len() < 4 {
            return Err(DeployError::RevertDecodeFailed(format!(
                "revert data too short: 0x{}",
                hex::encode(data)
            )));
        }

        let mut selector = [0u8; 4];
        selector.copy_from_slice(&data[..4]);
        let (contract, error) = self.by_selector.get(&selector).ok_or_else(|| {
            DeployError::RevertDecodeFailed(format!("unknown selector 0x{}", hex::encode(selector)))
        })?;

        let args = error
            .decode(&data[4..])
            .map_err(|e| DeployError::RevertDecodeFailed(format!("{}: {e}", error.name)))?;

        Ok(DecodedError {
            contract: contract.clone(),
            name: error.name.clone(),
            args,
        })
    }
}

fn builtin_error(name: &str, kind: ParamType) -> AbiError {
    AbiError {
        name: name.to_string(),
        inputs: vec![Param {
            name: String::new(),
            kind,
            internal_type: None,
        }],
    }
}
