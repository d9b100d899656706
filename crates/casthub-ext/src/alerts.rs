//! Alert feed forwarder.
//!
//! Polls an external alert feed (donations, follows, subscriptions) with a
//! bearer token and republishes alerts it has not seen before onto the
//! alerts channel. Without a token or while disabled the extension sits
//! inert, and its heartbeat reports `connected: false` so dashboards can
//! tell the feed is dark.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use casthub_core::ExtensionConfig;
use casthub_runtime::{ChannelMode, Context, Extension, Result, TaskFire};

const WIDGET_TEMPLATE: &str = include_str!("../assets/alerts_settings.html");

const ALERTS_CHANNEL: &str = "ALERTS_CHANNEL";

const DEFAULT_API_BASE: &str = "https://api.alertfeed.example.com";

const POLL_TASK: &str = "poll-alerts";

/// Republishes new alerts from an external feed.
pub struct Alerts {
    enabled: bool,
    connected: bool,
    last_alert_id: Option<i64>,
}

impl Alerts {
    pub fn new() -> Self {
        Self {
            enabled: false,
            connected: false,
            last_alert_id: None,
        }
    }

    /// Arms or disarms the poll to match the current config and token.
    fn sync_poll(&mut self, ctx: &mut Context<'_>) {
        self.enabled = ctx.config.is_on("enabled");
        let has_token = ctx.credential("token").is_some();
        if self.enabled && has_token {
            let poll_ms = ctx.config.number("pollms").unwrap_or(15_000.0) as u64;
            ctx.schedule_repeating(POLL_TASK, Duration::from_millis(poll_ms));
            info!(poll_ms, "Alert polling armed");
        } else {
            if self.enabled && !has_token {
                warn!("Alerts enabled but no token credential stored");
            }
            ctx.cancel_task(POLL_TASK);
            self.connected = false;
        }
    }

    async fn poll(&mut self, ctx: &Context<'_>) -> Result<()> {
        let Some(token) = ctx.credential("token") else {
            return Ok(());
        };
        let base = ctx
            .config
            .text("apibase")
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        let url = format!("{base}/alerts");
        let auth = format!("Bearer {token}");

        let feed = match ctx.http.get_json(&url, &[("Authorization", &auth)]).await {
            Ok(feed) => feed,
            Err(e) => {
                self.connected = false;
                return Err(e);
            }
        };
        self.connected = true;

        let (fresh, newest) = new_alerts(&feed, self.last_alert_id);
        // First poll establishes the cursor without replaying history
        if self.last_alert_id.is_some() {
            for alert in fresh {
                ctx.send_channel_data("Alert", alert)?;
            }
        }
        if newest.is_some() {
            self.last_alert_id = newest;
        }
        Ok(())
    }
}

impl Default for Alerts {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a feed into alerts newer than `after`, plus the newest id seen.
fn new_alerts(feed: &Value, after: Option<i64>) -> (Vec<Value>, Option<i64>) {
    let mut fresh = Vec::new();
    let mut newest = after;
    let Some(alerts) = feed.get("alerts").and_then(Value::as_array) else {
        return (fresh, newest);
    };
    for alert in alerts {
        let Some(id) = alert.get("id").and_then(Value::as_i64) else {
            continue;
        };
        if after.map_or(true, |seen| id > seen) {
            fresh.push(alert.clone());
        }
        if newest.map_or(true, |n| id > n) {
            newest = Some(id);
        }
    }
    (fresh, newest)
}

#[async_trait]
impl Extension for Alerts {
    fn name(&self) -> &str {
        "alerts"
    }

    fn default_config(&self) -> ExtensionConfig {
        ExtensionConfig::new(0.1, "alerts", ALERTS_CHANNEL)
            .with("enabled", "off")
            .with("apibase", DEFAULT_API_BASE)
            .with("pollms", 15_000.0)
    }

    fn widget_template(&self) -> &str {
        WIDGET_TEMPLATE
    }

    fn subscriptions(&self) -> Vec<(String, ChannelMode)> {
        vec![(ALERTS_CHANNEL.to_string(), ChannelMode::Create)]
    }

    fn wants_credentials(&self) -> bool {
        true
    }

    /// Disabled extensions always report disconnected, even if the last
    /// poll succeeded.
    fn connected(&self) -> bool {
        self.enabled && self.connected
    }

    async fn on_config_resolved(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        self.sync_poll(ctx);
        Ok(())
    }

    async fn on_credentials(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        self.sync_poll(ctx);
        Ok(())
    }

    async fn on_settings_changed(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        self.sync_poll(ctx);
        Ok(())
    }

    async fn on_task(&mut self, ctx: &mut Context<'_>, fire: &TaskFire) -> Result<()> {
        if fire.name == POLL_TASK {
            self.poll(ctx).await
        } else {
            Ok(())
        }
    }
}
