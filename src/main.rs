use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use juniper::config::{Cli, Commands};
use juniper::provider::InferenceProvider;
use juniper::{diagnostics, AppState, OllamaClient, Session, SessionStore, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = cli.common.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    diagnostics::init(&data_dir);

    let provider: Arc<dyn InferenceProvider> =
        Arc::new(OllamaClient::new(cli.common.ollama_host()));

    match cli.command {
        Commands::Web { addr } => {
            let storage = Storage::new(&data_dir).context("opening conversation storage")?;
            let mut session = Session::open(SessionStore::new(storage));
            if cli.common.model.is_some() && session.state().model() != cli.common.model() {
                session
                    .set_model(&cli.common.model())
                    .context("saving model preference")?;
            }
            juniper::run_web(AppState::new(provider, session), addr).await?;
        }
        Commands::Bot {
            token,
            guild_id,
            chunk_limit,
        } => {
            let config = cli.common.bot_config(token, guild_id, chunk_limit);
            juniper::bot::run(provider, config)
                .await
                .context("Discord client stopped")?;
        }
    }
    Ok(())
}
