//! The extension trait and its runtime-facing context.
//!
//! An extension body is pure application logic: it declares its identity,
//! default config, widget template, and channel memberships, and reacts to
//! callbacks. Everything stateful (socket, scheduler, resolved config,
//! credentials) is borrowed through [`Context`] for the duration of one
//! callback, so extensions never hold connection state across a reconnect.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use casthub_core::ExtensionConfig;
use casthub_protocol::{ExtensionPacket, ServerPacket};

use crate::channels::ChannelMode;
use crate::error::Result;
use crate::http::PollClient;
use crate::scheduler::{Scheduler, TaskFire};
use crate::session::Session;

// ============================================================================
// Context
// ============================================================================

/// Runtime facilities lent to an extension for one callback.
pub struct Context<'a> {
    pub session: &'a Session,
    pub scheduler: &'a mut Scheduler,
    pub config: &'a ExtensionConfig,
    pub credentials: Option<&'a BTreeMap<String, String>>,
    pub http: &'a PollClient,
}

impl Context<'_> {
    /// The extension's identifier.
    pub fn name(&self) -> &str {
        &self.config.extension_name
    }

    /// The extension's own broadcast channel.
    pub fn channel(&self) -> &str {
        &self.config.channel_name
    }

    /// Looks up a credential by name.
    pub fn credential(&self, name: &str) -> Option<&str> {
        self.credentials
            .and_then(|creds| creds.get(name))
            .map(String::as_str)
    }

    /// Queues a raw packet onto the session.
    pub fn send(&self, packet: ServerPacket) -> Result<()> {
        self.session.send(packet)
    }

    /// Broadcasts an application message on the extension's own channel.
    pub fn send_channel_data(&self, kind: &str, data: Value) -> Result<()> {
        let payload = ExtensionPacket::for_channel(kind, self.name(), data, self.channel());
        let packet = ServerPacket::channel_data(self.name(), &payload, self.channel())?;
        self.session.send(packet)
    }

    /// Broadcasts an application message on an arbitrary channel the
    /// extension has joined.
    pub fn send_channel_data_on(&self, kind: &str, data: Value, channel: &str) -> Result<()> {
        let payload = ExtensionPacket::for_channel(kind, self.name(), data, channel);
        let packet = ServerPacket::channel_data(self.name(), &payload, channel)?;
        self.session.send(packet)
    }

    /// Sends an application message to one named recipient.
    pub fn send_extension_message(&self, kind: &str, data: Value, dest: &str) -> Result<()> {
        let payload = ExtensionPacket::for_recipient(kind, self.name(), data, dest);
        let packet = ServerPacket::extension_message(self.name(), &payload, dest)?;
        self.session.send(packet)
    }

    /// Arms a repeating task under `name`, replacing any existing one.
    pub fn schedule_repeating(&mut self, name: &str, interval: Duration) {
        self.scheduler.schedule_repeating(name, interval);
    }

    /// Arms a one-shot task under `name`, replacing any existing one.
    pub fn schedule_once(&mut self, name: &str, delay: Duration) {
        self.scheduler.schedule_once(name, delay);
    }

    /// Arms a per-second countdown under `name`, replacing any existing one.
    pub fn start_countdown(&mut self, name: &str, remaining: i64) {
        self.scheduler.start_countdown(name, remaining);
    }

    /// Cancels a task by name. Idempotent.
    pub fn cancel_task(&mut self, name: &str) {
        self.scheduler.cancel(name);
    }

    /// Returns true if a task is currently armed under `name`.
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.scheduler.is_scheduled(name)
    }
}

// ============================================================================
// Extension Trait
// ============================================================================

/// One hosted extension body.
///
/// Declarative methods describe the extension to the runtime; the async
/// callbacks run on the runtime loop, one at a time, and may use the
/// [`Context`] freely. A callback returning an error is logged by the
/// runtime and changes nothing about scheduling or the connection.
#[async_trait]
pub trait Extension: Send + 'static {
    /// Stable extension identifier (also the config's `extensionname`).
    fn name(&self) -> &str;

    /// Compiled-in default config, the reconciliation baseline.
    fn default_config(&self) -> ExtensionConfig;

    /// Settings-widget HTML template with substitution placeholders.
    fn widget_template(&self) -> &str;

    /// Channels to create or join once connected.
    fn subscriptions(&self) -> Vec<(String, ChannelMode)>;

    /// Whether the runtime should request credentials on connect.
    fn wants_credentials(&self) -> bool {
        false
    }

    /// Reported in heartbeats; override for extensions whose usefulness
    /// depends on an upstream service being reachable.
    fn connected(&self) -> bool {
        true
    }

    /// Config reconciled (startup or reconnect). Arm polls here.
    async fn on_config_resolved(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Credentials arrived.
    async fn on_credentials(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Settings changed through the widget.
    async fn on_settings_changed(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    /// A broadcast arrived on a joined channel.
    async fn on_channel_data(
        &mut self,
        _ctx: &mut Context<'_>,
        _channel: &str,
        _packet: &ExtensionPacket,
    ) -> Result<()> {
        Ok(())
    }

    /// A directly-addressed application message arrived.
    async fn on_extension_message(
        &mut self,
        _ctx: &mut Context<'_>,
        _packet: &ExtensionPacket,
    ) -> Result<()> {
        Ok(())
    }

    /// A scheduled task fired.
    async fn on_task(&mut self, _ctx: &mut Context<'_>, _fire: &TaskFire) -> Result<()> {
        Ok(())
    }
}
