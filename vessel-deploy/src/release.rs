//! Circuit releases: the verifier bytecode matching a circuit version tag.

use std::path::Path;

use ethers::types::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info};

use crate::encoding::{maybe_add_0x_prefix, maybe_remove_0x_prefix};
use crate::error::{DeployError, Result};

pub const GITHUB_API: &str = "https://api.github.com";
pub const CIRCUIT_REPO: &str = "Meshee-Team/meex-circuits";

/// Release asset holding the unified SNARK verifier bytecode.
pub const VERIFIER_ASSET: &str = "vessel.hex";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitRelease {
    pub version: String,
    pub unified_bytecode: Bytes,
}

impl CircuitRelease {
    /// Release assembled from a local hex file instead of GitHub.
    pub fn from_file(version: &str, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self {
            version: version.to_string(),
            unified_bytecode: parse_bytecode(&text)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

pub fn select_asset<'a>(assets: &'a [ReleaseAsset], name: &str) -> Option<&'a ReleaseAsset> {
    assets.iter().find(|asset| asset.name == name)
}

/// Hex text (with or without `0x`, surrounding whitespace ignored) to bytes.
pub fn parse_bytecode(text: &str) -> Result<Bytes> {
    let normalized = maybe_add_0x_prefix(text.trim());
    hex::decode(maybe_remove_0x_prefix(&normalized))
        .map(Bytes::from)
        .map_err(|e| DeployError::Release(format!("verifier bytecode is not hex: {e}")))
}

/// Client for the GitHub releases API of the circuit repository.
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    http: reqwest::Client,
    api_base: String,
    repo: String,
    token: String,
}

impl ReleaseClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_endpoint(GITHUB_API, CIRCUIT_REPO, token)
    }

    pub fn with_endpoint(
        api_base: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            repo: repo.into(),
            token: token.into(),
        }
    }

    /// Fetch the release tagged `tag` and its verifier bytecode.
    pub async fn download(&self, tag: &str) -> Result<CircuitRelease> {
        info!("Inspect release with tag {}.", tag);
        let url = format!("{}/repos/{}/releases/tags/{}", self.api_base, self.repo, tag);
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, "application/vnd.github.v3+json")
            .header(USER_AGENT, "vessel-tools")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DeployError::Release(format!("fetching release info: {e}")))?;
        let release: ReleaseInfo = response
            .json()
            .await
            .map_err(|e| DeployError::Release(format!("parsing release info: {e}")))?;
        debug!("Release {} has {} assets", tag, release.assets.len());

        let asset = select_asset(&release.assets, VERIFIER_ASSET).ok_or_else(|| {
            DeployError::Release(format!("release {tag} has no {VERIFIER_ASSET} asset"))
        })?;
        let text = self.download_asset(asset.id).await?;

        Ok(CircuitRelease {
            version: tag.to_string(),
            unified_bytecode: parse_bytecode(&text)?,
        })
    }

    async fn download_asset(&self, asset_id: u64) -> Result<String> {
        info!("Download release asset {}", asset_id);
        let url = format!("{}/repos/{}/releases/assets/{}", self.api_base, self.repo, asset_id);
        self.http
            .get(&url)
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, "application/octet-stream")
            .header(USER_AGENT, "vessel-tools")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DeployError::Release(format!("downloading asset {asset_id}: {e}")))?
            .text()
            .await
            .map_err(|e| DeployError::Release(format!("reading asset {asset_id}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_asset_by_name() {
        let assets = vec![
            ReleaseAsset { id: 1, name: "vessel.params".into() },
            ReleaseAsset { id: 2, name: VERIFIER_ASSET.into() },
        ];
        assert_eq!(select_asset(&assets, VERIFIER_ASSET).map(|a| a.id), Some(2));
        assert!(select_asset(&assets, "missing").is_none());
    }

    #[test]
    fn test_release_info_parses_github_shape() {
        let info: ReleaseInfo = serde_json::from_str(
            r#"{"tag_name": "v3.0.0", "assets": [{"id": 42, "name": "vessel.hex", "size": 10}]}"#,
        )
        .unwrap();
        assert_eq!(info.assets[0].id, 42);
    }

    #[test]
    fn test_parse_bytecode_normalizes_prefix() {
        assert_eq!(parse_bytecode("6080\n").unwrap().to_vec(), vec![0x60, 0x80]);
        assert_eq!(parse_bytecode("0x6080").unwrap().to_vec(), vec![0x60, 0x80]);
        assert!(matches!(parse_bytecode("0xzz"), Err(DeployError::Release(_))));
    }

    #[test]
    fn test_release_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vessel.hex");
        std::fs::write(&path, "0x60806040").unwrap();
        let release = CircuitRelease::from_file("v3.0.0", &path).unwrap();
        assert_eq!(release.version, "v3.0.0");
        assert_eq!(release.unified_bytecode.len(), 4);
    }
}
