//! Discord surface: registers `/query`, acknowledges each invocation right away,
//! then relays the model's answer as the deferred reply plus follow-ups.

use async_trait::async_trait;
use serenity::all::{
    Command, CommandInteraction, CommandOptionType, Context, CreateCommand, CreateCommandOption,
    CreateInteractionResponseFollowup, EditInteractionResponse, EventHandler, GatewayIntents,
    GuildId, Interaction, Ready,
};
use serenity::Client;
use std::sync::Arc;

use crate::diagnostics::{self, Level};
use crate::provider::InferenceProvider;
use crate::relay::{relay_query, report_relay_failure, RelayError, ReplyChannel};

pub const COMMAND_NAME: &str = "query";

pub struct BotConfig {
    pub token: String,
    pub guild_id: Option<u64>,
    pub default_model: String,
    pub chunk_limit: usize,
}

pub fn query_command() -> CreateCommand {
    CreateCommand::new(COMMAND_NAME)
        .description("Send a query to Ollama")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "prompt", "The prompt to send")
                .required(true),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "model", "The model to use")
                .required(false),
        )
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_str())
}

/// A deferred interaction: the first reply edits the placeholder, the rest are follow-ups.
struct InteractionReply<'a> {
    ctx: &'a Context,
    command: &'a CommandInteraction,
}

#[async_trait]
impl<'a> ReplyChannel for InteractionReply<'a> {
    async fn reply(&self, content: &str) -> Result<(), RelayError> {
        self.command
            .edit_response(self.ctx, EditInteractionResponse::new().content(content))
            .await
            .map(|_| ())
            .map_err(|e| RelayError::Transport(e.to_string()))
    }

    async fn follow_up(&self, content: &str) -> Result<(), RelayError> {
        self.command
            .create_followup(
                self.ctx,
                CreateInteractionResponseFollowup::new().content(content),
            )
            .await
            .map(|_| ())
            .map_err(|e| RelayError::Transport(e.to_string()))
    }
}

pub struct Handler {
    provider: Arc<dyn InferenceProvider>,
    guild_id: Option<GuildId>,
    default_model: String,
    chunk_limit: usize,
}

impl Handler {
    pub fn new(provider: Arc<dyn InferenceProvider>, config: &BotConfig) -> Self {
        Self {
            provider,
            guild_id: config.guild_id.map(GuildId::new),
            default_model: config.default_model.clone(),
            chunk_limit: config.chunk_limit,
        }
    }

    async fn handle_query(&self, ctx: &Context, command: &CommandInteraction) {
        let prompt = string_option(command, "prompt").unwrap_or_default();
        let model = string_option(command, "model")
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str());
        diagnostics::log(
            Level::Info,
            "query received",
            Some(serde_json::json!({
                "user": command.user.name,
                "model": model,
                "prompt_chars": prompt.chars().count(),
            })),
        );

        // Inference routinely outlasts the 3 second acknowledgement window.
        if let Err(e) = command.defer(ctx).await {
            diagnostics::log(
                Level::Error,
                "failed to acknowledge interaction",
                Some(serde_json::json!({ "error": e.to_string() })),
            );
            return;
        }

        let channel = InteractionReply { ctx, command };
        if let Err(e) = relay_query(
            self.provider.as_ref(),
            &channel,
            model,
            prompt,
            self.chunk_limit,
        )
        .await
        {
            report_relay_failure(&channel, &e).await;
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        diagnostics::log(Level::Info, &format!("Logged in as {}", ready.user.name), None);
        let registered = match self.guild_id {
            Some(guild_id) => guild_id
                .set_commands(&ctx.http, vec![query_command()])
                .await
                .map(|_| ()),
            None => Command::create_global_command(&ctx, query_command())
                .await
                .map(|_| ()),
        };
        match registered {
            Ok(()) => diagnostics::log(
                Level::Info,
                "command registered",
                Some(serde_json::json!({
                    "command": COMMAND_NAME,
                    "guild_id": self.guild_id.map(|g| g.get()),
                })),
            ),
            Err(e) => diagnostics::log(
                Level::Error,
                "command registration failed",
                Some(serde_json::json!({ "error": e.to_string() })),
            ),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        if command.data.name != COMMAND_NAME {
            return;
        }
        self.handle_query(&ctx, &command).await;
    }
}

/// Connect to the gateway and serve `/query` until the connection ends.
pub async fn run(
    provider: Arc<dyn InferenceProvider>,
    config: BotConfig,
) -> Result<(), serenity::Error> {
    let handler = Handler::new(provider, &config);
    let mut client = Client::builder(&config.token, GatewayIntents::GUILDS)
        .event_handler(handler)
        .await?;
    diagnostics::log(Level::Info, "Started", None);
    client.start().await
}
