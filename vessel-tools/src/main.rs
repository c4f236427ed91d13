use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::types::Address;
use tracing::{error, info};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};
use vessel_deploy::{
    config::{DEFAULT_NODE_ENV, NODE_ENV_VAR},
    deploy::set_deployer_nonce,
    maintenance,
    release::{CircuitRelease, ReleaseClient},
    ConfigStore, ConsistencyValidator, ContractCatalog, DeployContext, DeploymentOrchestrator,
    ExecutionOutcome, NetworkRegistry,
};

const DEFAULT_ABI_DIR: &str = "../abi";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILTER: &str = "vessel_deploy=debug,vessel_tools=info";

#[derive(Parser)]
#[command(
    name = "vessel-tools",
    about = "Deploy, validate and maintain Vessel vaults across sub-chains"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Config environment; selects `.config.<env>.json`. Falls back to NODE_ENV.
    #[arg(long, global = true)]
    env: Option<String>,
    /// Directory holding the config file.
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,
    /// Directory of compiled contract artifacts.
    #[arg(long, global = true, default_value = DEFAULT_ABI_DIR)]
    abi_dir: PathBuf,
    /// Index of the sub-chain to operate on.
    #[arg(long, global = true, default_value_t = 0)]
    chain: usize,
    /// Force the deployer nonce before anything is sent.
    #[arg(long, global = true)]
    nonce: Option<u64>,
    /// Read the verifier bytecode from a local hex file instead of the release.
    #[arg(long, global = true)]
    verifier_bytecode: Option<PathBuf>,
    /// Directory receiving combined.log and error.log.
    #[arg(long, global = true, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy and wire every contract of the sub-chain, resuming where a previous run stopped.
    Deploy,
    /// Set portal peers following the star topology.
    ConfigurePortal,
    /// Check the deployment against the config, then mark vault and portal configured.
    Validate,
    /// Deploy the verifier of RELEASE_TAG and switch the vault to it.
    UpdateVerifier,
    /// Redeploy the vault implementations and upgrade the vault proxy.
    UpgradeVaultImpl,
    RegisterOperator(AddressArgs),
    RegisterExitManager(AddressArgs),
    /// Deploy a WETH contract (test networks).
    DeployWeth,
    /// Deploy the test tokens listed under TEST.TOKENS.
    DeployTokens,
    /// Register and activate the test tokens as vault assets.
    RegisterTokens,
    /// Only force the deployer nonce given with --nonce.
    SetNonce,
    /// Print proxy slots and vault state.
    Inspect,
}

#[derive(Args)]
struct AddressArgs {
    #[arg(long)]
    address: Address,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(err) = init_tracing(&cli.global.log_dir) {
        eprintln!("failed to initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;
    let combined = open_log(log_dir, "combined.log")?;
    let errors = open_log(log_dir, "error.log")?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Mutex::new(combined)),
        )
        .with(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Mutex::new(errors))
                .with_filter(LevelFilter::ERROR),
        )
        .try_init()?;
    Ok(())
}

fn open_log(dir: &Path, name: &str) -> Result<File> {
    let path = dir.join(name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn open_context(args: &GlobalArgs) -> Result<DeployContext> {
    let node_env = args
        .env
        .clone()
        .or_else(|| std::env::var(NODE_ENV_VAR).ok())
        .unwrap_or_else(|| DEFAULT_NODE_ENV.to_string());
    let path = ConfigStore::path_for(&args.config_dir, &node_env);
    let store = ConfigStore::load(&path)
        .with_context(|| format!("failed to load config {}", path.display()))?;

    Ok(DeployContext::new(
        store,
        ContractCatalog::from_dir(&args.abi_dir),
        NetworkRegistry::http(),
    ))
}

/// Verifier bytecode for the sub-chain's RELEASE_TAG.
async fn load_release(ctx: &DeployContext, args: &GlobalArgs) -> Result<CircuitRelease> {
    let essential = ctx.essential(args.chain)?;
    match &args.verifier_bytecode {
        Some(path) => CircuitRelease::from_file(&essential.release_tag, path)
            .with_context(|| format!("failed to read verifier bytecode {}", path.display())),
        None => ReleaseClient::new(essential.github_token.clone())
            .download(&essential.release_tag)
            .await
            .with_context(|| format!("failed to download release {}", essential.release_tag)),
    }
}

/// Print proposals so they can be handed to the multisig co-signers.
fn report(outcomes: &[ExecutionOutcome]) -> Result<()> {
    for outcome in outcomes {
        if let ExecutionOutcome::Proposed(artifact) = outcome {
            println!("{}", serde_json::to_string_pretty(artifact)?);
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let args = cli.global;
    let index = args.chain;
    let mut ctx = open_context(&args)?;

    match args.nonce {
        Some(nonce) => set_deployer_nonce(&ctx, index, nonce)
            .await
            .with_context(|| format!("failed to set deployer nonce to {nonce}"))?,
        None if matches!(cli.command, Commands::SetNonce) => bail!("set-nonce requires --nonce"),
        None => {}
    }

    match cli.command {
        Commands::Deploy => {
            let release = if DeploymentOrchestrator::new(&mut ctx, index).needs_release()? {
                Some(load_release(&ctx, &args).await?)
            } else {
                info!("Verifier steps already done, release not loaded");
                None
            };
            DeploymentOrchestrator::new(&mut ctx, index)
                .run(release.as_ref())
                .await
                .context("deployment failed")?;
        }
        Commands::ConfigurePortal => {
            let outcomes = maintenance::configure_portal_peers(&ctx, index)
                .await
                .context("failed to configure portal peers")?;
            report(&outcomes)?;
        }
        Commands::Validate => {
            let validator = ConsistencyValidator::new(&ctx, index);
            validator.validate().await.context("validation failed")?;
            let outcomes = validator
                .finalize()
                .await
                .context("failed to mark contracts configured")?;
            report(&outcomes)?;
        }
        Commands::UpdateVerifier => {
            let release = load_release(&ctx, &args).await?;
            let outcome = maintenance::update_verifier(&mut ctx, index, &release)
                .await
                .context("failed to update verifier")?;
            report(&[outcome])?;
        }
        Commands::UpgradeVaultImpl => {
            let outcome = maintenance::upgrade_vault_impl(&mut ctx, index)
                .await
                .context("failed to upgrade vault implementation")?;
            report(&[outcome])?;
        }
        Commands::RegisterOperator(AddressArgs { address }) => {
            let outcome = maintenance::register_operator(&ctx, index, address)
                .await
                .context("failed to register operator")?;
            report(&[outcome])?;
        }
        Commands::RegisterExitManager(AddressArgs { address }) => {
            let outcome = maintenance::register_exit_manager(&ctx, index, address)
                .await
                .context("failed to register exit manager")?;
            report(&[outcome])?;
        }
        Commands::DeployWeth => {
            maintenance::deploy_weth(&mut ctx, index)
                .await
                .context("failed to deploy WETH")?;
        }
        Commands::DeployTokens => {
            maintenance::deploy_tokens(&mut ctx, index)
                .await
                .context("failed to deploy test tokens")?;
        }
        Commands::RegisterTokens => {
            let outcomes = maintenance::register_tokens(&ctx, index)
                .await
                .context("failed to register test tokens")?;
            report(&outcomes)?;
        }
        Commands::SetNonce => {}
        Commands::Inspect => {
            maintenance::inspect(&ctx, index)
                .await
                .context("failed to inspect vault")?;
        }
    }

    info!("Flow finishes successfully");
    info!("Total gas used: {}", ctx.gas.total());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vessel-tools",
            "register-operator",
            "--address",
            "0x2B5AD5c4795c026514f8317c7a215E218DcCD6cF",
            "--chain",
            "2",
            "--env",
            "testnet",
        ])
        .unwrap();
        assert_eq!(cli.global.chain, 2);
        assert_eq!(cli.global.env.as_deref(), Some("testnet"));
        assert_eq!(cli.global.abi_dir, PathBuf::from(DEFAULT_ABI_DIR));
        assert!(matches!(cli.command, Commands::RegisterOperator(_)));
    }

    #[test]
    fn test_register_operator_requires_address() {
        assert!(Cli::try_parse_from(["vessel-tools", "register-operator"]).is_err());
        assert!(Cli::try_parse_from([
            "vessel-tools",
            "register-operator",
            "--address",
            "not-an-address"
        ])
        .is_err());
    }

    #[test]
    fn test_open_context_reports_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "vessel-tools",
            "inspect",
            "--env",
            "missing",
            "--config-dir",
            dir.path().to_str().unwrap(),
        ])
        .unwrap();
        let err = open_context(&cli.global).unwrap_err();
        assert!(format!("{err:#}").contains(".config.missing.json"));
    }
}
