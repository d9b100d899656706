//! The extension runtime: one extension, one hub, one loop.
//!
//! This module provides the `ExtensionRuntime` which handles:
//! - Connecting to the hub with exponential backoff
//! - Startup traffic (config, credentials, channel requests)
//! - Routing inbound packets through the dispatcher and applying effects
//! - Routing scheduler fires to heartbeats, channel retries, and the
//!   extension's own tasks
//! - Reconnecting from scratch after a disconnect
//!
//! **Panic-Free Policy:** This module follows the project's panic-free
//! guidelines. No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`,
//! or `todo!()`.

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use casthub_core::render_settings_widget;
use casthub_protocol::{ExtensionPacket, ServerPacket};

use crate::channels::ChannelMode;
use crate::dispatch::{dispatch, Effect, ExtensionState, Phase};
use crate::error::{Result, RuntimeError};
use crate::extension::{Context, Extension};
use crate::http::PollClient;
use crate::scheduler::{Scheduler, TaskFire};
use crate::session::{Session, SessionEvent};

/// Scheduler name of the heartbeat task.
const HEARTBEAT_TASK: &str = "heartbeat";

/// Scheduler name prefix for channel retry tasks.
const CHANNEL_RETRY_PREFIX: &str = "channel-retry:";

// ============================================================================
// Configuration
// ============================================================================

/// Connection and timing configuration for the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Hub hostname or address.
    pub host: String,

    /// Hub TCP port.
    pub port: u16,

    /// Interval between heartbeat broadcasts on the extension's channel.
    pub heartbeat_interval: Duration,

    /// Fixed delay before retrying a rejected channel request.
    pub channel_retry_delay: Duration,

    /// Initial delay before the first reconnect attempt.
    pub reconnect_initial_delay: Duration,

    /// Maximum delay between reconnect attempts.
    pub reconnect_max_delay: Duration,

    /// Multiplier for reconnect backoff.
    pub reconnect_multiplier: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3000,
            heartbeat_interval: Duration::from_millis(5000),
            channel_retry_delay: Duration::from_millis(5000),
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_multiplier: 2.0,
        }
    }
}

// ============================================================================
// Extension Runtime
// ============================================================================

/// Hosts one extension against the hub.
///
/// # Connection Lifecycle
///
/// 1. Connect with exponential backoff
/// 2. Send `RequestConfig` (and `RequestCredentials` if wanted), then the
///    channel requests, in that order
/// 3. Dispatch inbound packets and scheduler fires until disconnect
/// 4. On disconnect, drop all connection-scoped tasks and start over
pub struct ExtensionRuntime<E: Extension> {
    extension: E,
    config: RuntimeConfig,
    state: ExtensionState,
    scheduler: Scheduler,
    fire_rx: mpsc::UnboundedReceiver<TaskFire>,
    http: PollClient,
    cancel_token: CancellationToken,
    owns_channel: bool,
}

impl<E: Extension> ExtensionRuntime<E> {
    /// Creates a runtime for the given extension.
    pub fn new(extension: E, config: RuntimeConfig, cancel_token: CancellationToken) -> Result<Self> {
        let state = ExtensionState::new(extension.default_config());
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let owns_channel = extension
            .subscriptions()
            .iter()
            .any(|(_, mode)| *mode == ChannelMode::Create);
        Ok(Self {
            extension,
            config,
            state,
            scheduler: Scheduler::new(fire_tx),
            fire_rx,
            http: PollClient::new()?,
            cancel_token,
            owns_channel,
        })
    }

    /// Main loop: connect, serve, reconnect. Returns once cancelled.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            extension = %self.extension.name(),
            host = %self.config.host,
            port = self.config.port,
            "Extension runtime starting"
        );

        loop {
            if self.cancel_token.is_cancelled() {
                info!("Extension runtime shutting down (cancelled)");
                return Ok(());
            }

            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let session = match self.connect_with_retry(event_tx).await {
                Ok(session) => session,
                Err(RuntimeError::Cancelled) => {
                    info!("Extension runtime shutting down (cancelled)");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = self.on_connected(&session) {
                warn!(error = %e, "Startup traffic failed, reconnecting");
            } else {
                self.serve(&session, event_rx).await;
            }
            session.close();
            self.on_disconnected();
        }
    }

    /// Attempts to connect with exponential backoff until successful
    /// or cancelled.
    async fn connect_with_retry(
        &self,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Session> {
        let mut delay = self.config.reconnect_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);
            match Session::connect(&self.config.host, self.config.port, event_tx.clone()).await {
                Ok(session) => {
                    debug!(attempt, "Connection successful");
                    return Ok(session);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Connection attempt failed");
                    if attempt == 1 {
                        warn!(
                            host = %self.config.host,
                            port = self.config.port,
                            "Hub unreachable, will retry"
                        );
                    }
                }
            }

            tokio::select! {
                _ = sleep(delay) => {
                    let next_ms =
                        (delay.as_millis() as f64 * self.config.reconnect_multiplier) as u64;
                    delay = Duration::from_millis(next_ms).min(self.config.reconnect_max_delay);
                }
                _ = self.cancel_token.cancelled() => {
                    return Err(RuntimeError::Cancelled);
                }
            }
        }
    }

    /// Sends the startup traffic for a fresh connection.
    ///
    /// Order matters and the session preserves it: config first, then
    /// credentials, then the channel requests.
    fn on_connected(&mut self, session: &Session) -> Result<()> {
        let name = self.extension.name().to_string();
        session.send(ServerPacket::request_config(&name))?;
        if self.extension.wants_credentials() {
            session.send(ServerPacket::request_credentials(&name))?;
        }
        for (channel, mode) in self.extension.subscriptions() {
            let request = self.state.channels.ensure(&channel, mode);
            session.send(request)?;
        }
        self.state.phase = Phase::Connected;
        Ok(())
    }

    /// Drops every scheduled task and queued fire, and resets phase.
    ///
    /// Extension polls re-arm when the next connection's config resolves,
    /// so nothing fires into the reconnect backoff and the fresh `serve`
    /// loop never replays a backlog against unestablished channels.
    fn on_disconnected(&mut self) {
        self.scheduler.cancel_all();
        while self.fire_rx.try_recv().is_ok() {}
        self.state.phase = Phase::Disconnected;
        warn!(extension = %self.extension.name(), "Disconnected from hub");
    }

    /// Serves one connection until it drops or the runtime is cancelled.
    async fn serve(
        &mut self,
        session: &Session,
        mut event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(SessionEvent::Packet(packet)) => {
                            self.handle_packet(session, packet).await;
                        }
                        Some(SessionEvent::Disconnected { reason }) => {
                            warn!(reason = %reason, "Session ended");
                            return;
                        }
                        None => return,
                    }
                }
                fire = self.fire_rx.recv() => {
                    let Some(fire) = fire else { return };
                    self.handle_fire(session, fire).await;
                }
                _ = self.cancel_token.cancelled() => {
                    debug!("Serve loop cancelled");
                    return;
                }
            }
        }
    }

    /// Runs one inbound packet through the dispatcher and applies the
    /// resulting effects in order.
    async fn handle_packet(&mut self, session: &Session, packet: ServerPacket) {
        let effects = dispatch(&mut self.state, &packet);
        for effect in effects {
            self.apply_effect(session, effect).await;
        }
    }

    async fn apply_effect(&mut self, session: &Session, effect: Effect) {
        match effect {
            Effect::Send(packet) => {
                if let Err(e) = session.send(packet) {
                    warn!(error = %e, "Failed to queue packet");
                }
            }

            Effect::ScheduleChannelRetry { channel } => {
                let task = format!("{CHANNEL_RETRY_PREFIX}{channel}");
                self.scheduler
                    .schedule_once(&task, self.config.channel_retry_delay);
            }

            Effect::ConfigResolved { outcome } => {
                debug!(outcome = ?outcome, "Applying resolved config");
                if self.owns_channel {
                    self.scheduler
                        .schedule_repeating(HEARTBEAT_TASK, self.config.heartbeat_interval);
                }
                let mut ctx = Context {
                    session,
                    scheduler: &mut self.scheduler,
                    config: &self.state.config,
                    credentials: self.state.credentials.as_ref(),
                    http: &self.http,
                };
                if let Err(e) = self.extension.on_config_resolved(&mut ctx).await {
                    warn!(error = %e, "on_config_resolved failed");
                }
            }

            Effect::SettingsChanged => {
                let mut ctx = Context {
                    session,
                    scheduler: &mut self.scheduler,
                    config: &self.state.config,
                    credentials: self.state.credentials.as_ref(),
                    http: &self.http,
                };
                if let Err(e) = self.extension.on_settings_changed(&mut ctx).await {
                    warn!(error = %e, "on_settings_changed failed");
                }
            }

            Effect::SendWidget { dest } => self.send_widget(session, &dest),

            Effect::CredentialsReady => {
                let mut ctx = Context {
                    session,
                    scheduler: &mut self.scheduler,
                    config: &self.state.config,
                    credentials: self.state.credentials.as_ref(),
                    http: &self.http,
                };
                if let Err(e) = self.extension.on_credentials(&mut ctx).await {
                    warn!(error = %e, "on_credentials failed");
                }
            }

            Effect::DeliverChannelData { channel, packet } => {
                let mut ctx = Context {
                    session,
                    scheduler: &mut self.scheduler,
                    config: &self.state.config,
                    credentials: self.state.credentials.as_ref(),
                    http: &self.http,
                };
                if let Err(e) = self
                    .extension
                    .on_channel_data(&mut ctx, &channel, &packet)
                    .await
                {
                    warn!(error = %e, channel = %channel, "on_channel_data failed");
                }
            }

            Effect::DeliverExtensionMessage { packet } => {
                let mut ctx = Context {
                    session,
                    scheduler: &mut self.scheduler,
                    config: &self.state.config,
                    credentials: self.state.credentials.as_ref(),
                    http: &self.http,
                };
                if let Err(e) = self.extension.on_extension_message(&mut ctx, &packet).await {
                    warn!(error = %e, "on_extension_message failed");
                }
            }
        }
    }

    /// Renders the settings widget and sends it to `dest`.
    fn send_widget(&self, session: &Session, dest: &str) {
        let html = render_settings_widget(self.extension.widget_template(), &self.state.config);
        let name = self.state.extension_name();
        let payload = ExtensionPacket::for_recipient(
            "SettingsWidgetSmallCode",
            name,
            json!({
                "extensionname": name,
                "code": html,
            }),
            dest,
        );
        match ServerPacket::extension_message(name, &payload, dest) {
            Ok(packet) => {
                if let Err(e) = session.send(packet) {
                    warn!(error = %e, "Failed to queue widget");
                }
            }
            Err(e) => error!(error = %e, "Failed to build widget packet"),
        }
    }

    /// Routes one scheduler fire.
    ///
    /// Stale fires (cancelled or re-armed handles) are dropped here; an
    /// extension callback failure is logged and leaves the task armed.
    async fn handle_fire(&mut self, session: &Session, fire: TaskFire) {
        if !self.scheduler.accepts(&fire) {
            debug!(task = %fire.name, "Dropping stale fire");
            return;
        }
        if fire.terminal {
            self.scheduler.complete(&fire);
        }

        if fire.name == HEARTBEAT_TASK {
            self.send_heartbeat(session);
            return;
        }

        if let Some(channel) = fire.name.strip_prefix(CHANNEL_RETRY_PREFIX) {
            if let Some(request) = self.state.channels.retry_packet(channel) {
                debug!(channel = %channel, "Retrying channel request");
                if let Err(e) = session.send(request) {
                    warn!(error = %e, "Failed to queue channel retry");
                }
            }
            return;
        }

        let mut ctx = Context {
            session,
            scheduler: &mut self.scheduler,
            config: &self.state.config,
            credentials: self.state.credentials.as_ref(),
            http: &self.http,
        };
        if let Err(e) = self.extension.on_task(&mut ctx, &fire).await {
            warn!(error = %e, task = %fire.name, "Task callback failed");
        }
    }

    /// Broadcasts liveness on the extension's own channel.
    fn send_heartbeat(&self, session: &Session) {
        let name = self.state.extension_name();
        let channel = &self.state.config.channel_name;
        let payload = ExtensionPacket::for_channel(
            "HeartBeat",
            name,
            json!({
                "connected": self.extension.connected(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
            channel,
        );
        match ServerPacket::channel_data(name, &payload, channel) {
            Ok(packet) => {
                if let Err(e) = session.send(packet) {
                    warn!(error = %e, "Failed to queue heartbeat");
                }
            }
            Err(e) => error!(error = %e, "Failed to build heartbeat packet"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
