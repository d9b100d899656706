//! Random-fact responder.
//!
//! Joins the shared chat channel and answers the `!randomfact` command by
//! posting a fact into chat; also serves direct `RequestRandomFact`
//! messages from other extensions. Facts come from a public HTTP API, so a
//! failed fetch just skips that one response.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use casthub_core::ExtensionConfig;
use casthub_protocol::ExtensionPacket;
use casthub_runtime::{ChannelMode, Context, Extension, Result};

const WIDGET_TEMPLATE: &str = include_str!("../assets/randomfact_settings.html");

/// Chat channel owned by the chat-bridge extension.
const CHAT_CHANNEL: &str = "TWITCH_CHAT";

/// Chat command that triggers a fact reply.
const CHAT_COMMAND: &str = "!randomfact";

const DEFAULT_API_BASE: &str = "https://uselessfacts.jsph.pl";

/// Answers chat commands and direct requests with a random fact.
#[derive(Default)]
pub struct RandomFact;

impl RandomFact {
    pub fn new() -> Self {
        Self
    }

    async fn fetch_fact(&self, ctx: &Context<'_>) -> Result<String> {
        let base = ctx
            .config
            .text("apibase")
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        let url = format!("{base}/api/v2/facts/random?language=en");
        let body = ctx.http.get_json(&url, &[]).await?;
        Ok(extract_fact(&body).unwrap_or_default())
    }
}

/// Pulls the fact text out of the API response.
fn extract_fact(body: &Value) -> Option<String> {
    body.get("text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl Extension for RandomFact {
    fn name(&self) -> &str {
        "randomfact"
    }

    fn default_config(&self) -> ExtensionConfig {
        ExtensionConfig::new(0.1, "randomfact", "RANDOMFACT_CHANNEL")
            .with("apibase", DEFAULT_API_BASE)
    }

    fn widget_template(&self) -> &str {
        WIDGET_TEMPLATE
    }

    fn subscriptions(&self) -> Vec<(String, ChannelMode)> {
        vec![(CHAT_CHANNEL.to_string(), ChannelMode::Join)]
    }

    async fn on_channel_data(
        &mut self,
        ctx: &mut Context<'_>,
        channel: &str,
        packet: &ExtensionPacket,
    ) -> Result<()> {
        if channel != CHAT_CHANNEL || packet.kind != "ChatMessage" {
            return Ok(());
        }
        let message = packet.data.get("message").and_then(Value::as_str);
        if message != Some(CHAT_COMMAND) {
            return Ok(());
        }

        let fact = self.fetch_fact(ctx).await?;
        if fact.is_empty() {
            warn!("Fact API returned no text");
            return Ok(());
        }
        // Reply into chat through the chat-bridge extension
        ctx.send_extension_message(
            "SendChatMessage",
            json!({
                "account": "bot",
                "message": fact,
            }),
            "twitchchat",
        )
    }

    async fn on_extension_message(
        &mut self,
        ctx: &mut Context<'_>,
        packet: &ExtensionPacket,
    ) -> Result<()> {
        if packet.kind != "RequestRandomFact" {
            return Ok(());
        }
        let fact = self.fetch_fact(ctx).await?;
        ctx.send_extension_message("RandomFact", Value::String(fact), &packet.from)
    }
}
