mod config;
mod driver;
mod error;
mod orchestrator;
mod provider;
mod session;

use clap::Parser;
use tracing::{info, warn};

use bp_core::Prompt;

use crate::config::AppConfig;
use crate::driver::webdriver::WebDriverForm;
use crate::orchestrator::{CancelToken, MetadataDefaults, Orchestrator, Outcome};
use crate::provider::diffusion::DiffusionProvider;
use crate::provider::openai::DallEProvider;
use crate::provider::{ImageProvider, ProviderChain};
use crate::session::{Credentials, UploadSession};

/// Generate print-ready designs from prompts and publish them to the
/// marketplace.
#[derive(Parser, Debug)]
#[command(name = "bubblepress", version, about)]
struct Cli {
    /// Prompts to generate; one design batch per prompt.
    #[arg(required = true)]
    prompts: Vec<String>,

    /// Image variants to request per prompt.
    #[arg(long, default_value_t = 1)]
    variants: u32,

    /// Comma-separated tags applied to every design.
    #[arg(long)]
    tags: Option<String>,

    /// Description applied to every design; defaults to the prompt text.
    #[arg(long)]
    description: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    let mut providers: Vec<Box<dyn ImageProvider>> = Vec::new();
    if let Some(key) = config.openai_api_key.clone() {
        providers.push(Box::new(DallEProvider::new(key)));
    }
    if let Some(base_url) = config.sd_base_url.clone() {
        providers.push(Box::new(DiffusionProvider::new(base_url)));
    }
    let chain = ProviderChain::new(providers);
    info!(providers = chain.len(), canvas = ?config.canvas, "pipeline configured");

    let browser = WebDriverForm::connect(&config.webdriver_url).await?;
    let session = UploadSession::new(
        browser,
        Credentials {
            email: config.marketplace_email.clone(),
            password: config.marketplace_password.clone(),
        },
    );

    let defaults = MetadataDefaults {
        description: cli.description,
        tags: cli
            .tags
            .as_deref()
            .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default(),
    };
    let mut orchestrator =
        Orchestrator::new(chain, session, config.canvas).with_metadata_defaults(defaults);

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, finishing the current design");
                cancel.cancel();
            }
        });
    }

    let prompts: Vec<Prompt> = cli
        .prompts
        .iter()
        .map(|p| Prompt::new(p.clone(), cli.variants))
        .collect();

    let results = orchestrator.run(&prompts, &cancel).await;

    if let Err(err) = orchestrator.close().await {
        warn!(%err, "failed to close the browser session");
    }

    let published = results
        .iter()
        .filter(|r| matches!(r.outcome, Outcome::Published { .. }))
        .count();
    info!(
        total = results.len(),
        published,
        failed = results.len() - published,
        "run finished"
    );

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
