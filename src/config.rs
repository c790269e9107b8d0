//! Startup configuration: command line, environment, and `.env`. Read once, never reloaded.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::bot::BotConfig;
use crate::ollama::DEFAULT_HOST;
use crate::relay::DEFAULT_CHUNK_LIMIT;
use crate::session::DEFAULT_MODEL;

const APP_DIR_NAME: &str = "Juniper";

#[derive(Debug, Parser)]
#[command(name = "juniper")]
#[command(about = "Chat with a local Ollama server from the browser or Discord")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Ollama base URL. Falls back to OLLAMA_ENDPOINT when OLLAMA_HOST is unset.
    #[arg(long, env = "OLLAMA_HOST", global = true)]
    pub ollama_host: Option<String>,

    /// Directory for the conversation database and logs.
    #[arg(long, env = "JUNIPER_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Starting model for the web UI (replaces the saved preference) and the bot's default.
    #[arg(long, env = "JUNIPER_MODEL", global = true)]
    pub model: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Serve the browser chat UI")]
    Web {
        #[arg(long, env = "JUNIPER_HTTP_ADDR", default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },
    #[command(about = "Run the Discord /query bot")]
    Bot {
        #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
        token: String,

        /// Register the command in this guild only; registers globally when unset.
        #[arg(long, env = "DISCORD_GUILD_ID")]
        guild_id: Option<u64>,

        #[arg(long, default_value_t = DEFAULT_CHUNK_LIMIT)]
        chunk_limit: usize,
    },
}

impl CommonArgs {
    pub fn ollama_host(&self) -> String {
        self.ollama_host
            .clone()
            .or_else(|| std::env::var("OLLAMA_ENDPOINT").ok())
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn model(&self) -> String {
        self.model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn bot_config(&self, token: String, guild_id: Option<u64>, chunk_limit: usize) -> BotConfig {
        BotConfig {
            token,
            guild_id,
            default_model: self.model(),
            chunk_limit: chunk_limit.max(1),
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .map(|p| p.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}
