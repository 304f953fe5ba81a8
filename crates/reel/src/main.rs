use anyhow::Context;
use clap::Parser;
use reel_e::{LaunchOptions, WebDriverSession};
use reel_engine::config::ConfigLoader;
use reel_engine::formatter::format_run;
use reel_engine::learner::{FileLearningStore, LearningStore};
use reel_engine::{RunStatus, run_workflow};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reel", version, about = "Turn a still image into a generated video clip")]
struct Args {
    /// Config file (default: ./reel.yaml, then ~/.reel/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Generation page to open
    #[arg(long)]
    url: Option<String>,

    /// Image to upload
    #[arg(long)]
    asset: Option<PathBuf>,

    /// Motion description submitted with the image
    #[arg(long)]
    instruction: Option<String>,

    /// External WebDriver URL (chromedriver auto-launches if not provided)
    #[arg(long)]
    webdriver_url: Option<String>,

    /// Port for the auto-launched chromedriver
    #[arg(long)]
    port: Option<u16>,

    /// Run Chrome without a window
    #[arg(long)]
    headless: bool,

    /// Browser profile directory (default: ~/.reel/profile)
    #[arg(long)]
    profile_dir: Option<PathBuf>,

    /// Where the browser saves the downloaded clip
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Learning store directory (default: ~/.reel/learned)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn default_profile_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".reel")
        .join("profile")
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the run summary.
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = ConfigLoader::load(args.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    if let Some(url) = args.url {
        config.url = url;
    }
    if let Some(asset) = args.asset {
        config.asset_path = asset;
    }
    if let Some(instruction) = args.instruction {
        config.instruction = instruction;
    }
    if let Some(dir) = args.download_dir {
        config.download_dir = Some(dir);
    }
    if let Some(dir) = args.store_dir {
        config.store_dir = Some(dir);
    }

    let store = FileLearningStore::new(
        config
            .store_dir
            .clone()
            .unwrap_or_else(FileLearningStore::default_path),
    );
    if config.hints.is_none() {
        match store.load_hints().await {
            Ok(Some(hints)) => {
                info!(
                    "Loaded hints from {} prior run(s) in {}",
                    hints.runs_observed,
                    store.root().display()
                );
                config.hints = Some(hints);
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable learning hints: {}", e),
        }
    }

    if let Some(dir) = &config.download_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create download dir {}", dir.display()))?;
    }

    let session = WebDriverSession::new(LaunchOptions {
        webdriver_url: args.webdriver_url,
        port: args.port,
        headless: args.headless,
        profile_dir: Some(args.profile_dir.unwrap_or_else(default_profile_dir)),
        download_dir: config.download_dir.clone(),
    });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run...");
            on_signal.cancel();
        }
    });

    let outcome = run_workflow(session, &store, &config, cancel).await;
    if let Some(e) = &outcome.persist_error {
        warn!("Run record was not persisted: {}", e);
    }

    println!(
        "{}",
        format_run(&outcome.record, outcome.persisted_to.as_deref())
    );

    Ok(match outcome.record.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Shortfall => ExitCode::from(2),
        RunStatus::Failed | RunStatus::Cancelled => ExitCode::FAILURE,
    })
}
