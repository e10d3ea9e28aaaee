// ABOUTME: Pentra CLI entrypoint: scan a target or validate configuration
// ABOUTME: Wires the sandbox, recon, analysis, and storage layers from the environment

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pentra_pipeline::{PentestPipeline, PullRequestClient, SqliExploiter, VulnAnalyzer};
use pentra_recon::{host_of, ReconOrchestrator};
use pentra_sandbox::{
    CommandExecutor, E2bProvider, SandboxConfig, SandboxLeaseManager, SandboxProvider,
    ToolProvisioner, ToolSet,
};
use pentra_storage::RunStore;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pentra")]
#[command(about = "Autonomous pentest pipeline: recon, analyze, exploit, patch")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full pentest against a target URL
    Scan {
        /// Target base URL, e.g. http://10.0.0.5:8080
        #[arg(long)]
        url: String,

        /// Resolved IP, stored alongside the target
        #[arg(long)]
        ip: Option<String>,

        /// Friendly target name; defaults to the URL's host
        #[arg(long)]
        name: Option<String>,

        /// SQLite database path
        #[arg(long, default_value = "pentra.db")]
        db: PathBuf,
    },
    /// Check credentials and configuration without touching any target
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scan { url, ip, name, db } => scan(url, ip, name, db).await,
        Commands::Validate => validate(),
    }
}

async fn scan(
    url: String,
    ip: Option<String>,
    name: Option<String>,
    db: PathBuf,
) -> anyhow::Result<()> {
    let config = SandboxConfig::from_env().context("sandbox configuration")?;

    let provider: Arc<dyn SandboxProvider> = Arc::new(
        E2bProvider::new(config.api_key.clone(), config.api_url.clone())
            .context("sandbox provider")?,
    );
    let provisioner = Arc::new(ToolProvisioner::new(provider.clone(), ToolSet::default()));
    let lease = Arc::new(SandboxLeaseManager::new(
        provider.clone(),
        provisioner.clone(),
        config.clone(),
    ));
    let executor = Arc::new(CommandExecutor::new(
        lease.clone(),
        provider,
        provisioner,
        config.retry.clone(),
    ));

    let orchestrator = ReconOrchestrator::new(executor.clone()).context("recon orchestrator")?;
    let analyzer = VulnAnalyzer::new(
        env::var("OPENAI_API_KEY").unwrap_or_default(),
        env::var("OPENAI_API_URL").ok(),
        env::var("OPENAI_MODEL").ok(),
    )
    .context("vulnerability analyzer (set OPENAI_API_KEY)")?;
    let exploiter = SqliExploiter::new(executor);
    let pr_client = pr_client_from_env()?;

    let pool = pentra_storage::connect(&db).await.context("database")?;
    let store = RunStore::new(pool);

    let target_name = match name {
        Some(name) => name,
        None => host_of(&url).context("target url")?,
    };
    let target = store
        .create_target(&target_name, &url, ip.as_deref())
        .await?;

    let pipeline = PentestPipeline::new(store, orchestrator, analyzer, exploiter, pr_client);
    let summary = pipeline.run(&target).await?;

    let lease_info = lease.info().await;

    // Final teardown so the sandbox does not idle until its keepalive.
    lease.close().await;

    println!("Run #{} finished: {}", summary.run_id, summary.status.as_str());
    if lease_info.degraded {
        println!("  warning:   sandbox was missing critical tools; results may be incomplete");
    }
    println!("  findings:  {}", summary.findings);
    println!("  exploited: {}", summary.exploited);
    for url in &summary.pr_urls {
        println!("  patch PR:  {}", url);
    }

    if summary.status == pentra_models::RunStatus::Failed {
        bail!("run failed, see logs");
    }
    Ok(())
}

/// Patching is optional: it needs both GITHUB_TOKEN and GITHUB_REPO
/// (owner/repo). With neither set the pipeline skips the patch phase.
fn pr_client_from_env() -> anyhow::Result<Option<PullRequestClient>> {
    let token = env::var("GITHUB_TOKEN").ok();
    let repo = env::var("GITHUB_REPO").ok();
    match (token, repo) {
        (Some(token), Some(repo)) => {
            let (owner, name) = repo
                .split_once('/')
                .context("GITHUB_REPO must be owner/repo")?;
            let client =
                PullRequestClient::new(token, owner.to_string(), name.to_string(), None)
                    .context("github client")?;
            Ok(Some(client))
        }
        (None, None) => Ok(None),
        _ => bail!("set both GITHUB_TOKEN and GITHUB_REPO, or neither"),
    }
}

/// Fail-fast configuration check, run before pointing the tool at anything.
fn validate() -> anyhow::Result<()> {
    let mut ok = true;

    match SandboxConfig::from_env() {
        Ok(config) => {
            println!("✓ E2B_API_KEY set (template: {})", config.template);
        }
        Err(e) => {
            println!("✗ sandbox: {}", e);
            ok = false;
        }
    }

    match env::var("OPENAI_API_KEY") {
        Ok(key) if !pentra_sandbox::config::is_placeholder(&key) => {
            println!("✓ OPENAI_API_KEY set");
        }
        Ok(_) => {
            println!("✗ OPENAI_API_KEY looks like a placeholder");
            ok = false;
        }
        Err(_) => {
            println!("✗ OPENAI_API_KEY not set");
            ok = false;
        }
    }

    match pr_client_from_env() {
        Ok(Some(_)) => println!("✓ GitHub patching configured"),
        Ok(None) => println!("- GitHub patching disabled (GITHUB_TOKEN/GITHUB_REPO unset)"),
        Err(e) => {
            println!("✗ github: {}", e);
            ok = false;
        }
    }

    if !ok {
        bail!("configuration is incomplete");
    }
    println!("Configuration looks good.");
    Ok(())
}
