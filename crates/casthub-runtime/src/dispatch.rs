//! Packet dispatch: hub traffic to runtime effects.
//!
//! `dispatch` is deliberately pure over `ExtensionState`: it mutates the
//! state and returns the side effects the runtime must perform, but never
//! touches the socket or the scheduler itself. That keeps the protocol
//! behavior testable without a live hub.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use casthub_core::{apply_overlay, reconcile, reset_toggles, ExtensionConfig, ReconcileOutcome};
use casthub_protocol::{ExtensionPacket, PacketType, ServerPacket};

use crate::channels::ChannelSet;

// ============================================================================
// State
// ============================================================================

/// Lifecycle phase of the hosted extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// No live session.
    Disconnected,
    /// Session up; config and channels still pending.
    Connected,
    /// Config reconciled and persisted; extension may start work.
    ConfigResolved,
}

/// Everything the dispatcher needs to know about the hosted extension.
pub struct ExtensionState {
    /// Compiled-in default config (the reconciliation baseline).
    pub default_config: ExtensionConfig,

    /// Currently resolved config.
    pub config: ExtensionConfig,

    /// Credentials received from the hub, if requested.
    pub credentials: Option<BTreeMap<String, String>>,

    /// Desired channel memberships.
    pub channels: ChannelSet,

    /// Current lifecycle phase.
    pub phase: Phase,
}

impl ExtensionState {
    /// Creates pre-connection state from the extension's defaults.
    pub fn new(default_config: ExtensionConfig) -> Self {
        let channels = ChannelSet::new(&default_config.extension_name);
        Self {
            config: default_config.clone(),
            default_config,
            credentials: None,
            channels,
            phase: Phase::Disconnected,
        }
    }

    /// The extension's identifier.
    pub fn extension_name(&self) -> &str {
        &self.default_config.extension_name
    }

    /// Looks up a credential by name.
    pub fn credential(&self, name: &str) -> Option<&str> {
        self.credentials
            .as_ref()
            .and_then(|creds| creds.get(name))
            .map(String::as_str)
    }
}

// ============================================================================
// Effects
// ============================================================================

/// Side effects the runtime must perform after dispatching a packet.
#[derive(Debug)]
pub enum Effect {
    /// Queue a packet onto the session.
    Send(ServerPacket),

    /// Arm a one-shot retry for a rejected channel request.
    ScheduleChannelRetry { channel: String },

    /// Config reconciliation finished; extension work may start.
    ConfigResolved { outcome: ReconcileOutcome },

    /// Settings changed through the widget; extension must re-read them.
    SettingsChanged,

    /// Render the settings widget and send it to `dest` (blank = broadcast).
    SendWidget { dest: String },

    /// Credentials arrived from the hub.
    CredentialsReady,

    /// Hand a channel broadcast to the extension.
    DeliverChannelData {
        channel: String,
        packet: ExtensionPacket,
    },

    /// Hand a directly-addressed message to the extension.
    DeliverExtensionMessage { packet: ExtensionPacket },
}

// ============================================================================
// Dispatch
// ============================================================================

/// Translates one inbound packet into state changes and effects.
pub fn dispatch(state: &mut ExtensionState, packet: &ServerPacket) -> Vec<Effect> {
    match packet.kind {
        PacketType::ChannelCreated | PacketType::ChannelJoined => {
            if let Some(channel) = packet.channel_name() {
                state.channels.on_established(channel);
            }
            Vec::new()
        }

        PacketType::UnknownChannel => {
            let Some(channel) = packet.channel_name() else {
                warn!("UnknownChannel without a channel name");
                return Vec::new();
            };
            if state.channels.on_unknown(channel) {
                vec![Effect::ScheduleChannelRetry {
                    channel: channel.to_string(),
                }]
            } else {
                Vec::new()
            }
        }

        PacketType::ChannelLeft => {
            let Some(channel) = packet.channel_name() else {
                return Vec::new();
            };
            match state.channels.on_left(channel) {
                Some(rejoin) => vec![Effect::Send(rejoin)],
                None => Vec::new(),
            }
        }

        PacketType::ConfigFile => handle_config_file(state, packet),

        PacketType::CredentialsFile => handle_credentials_file(state, packet),

        PacketType::ChannelData => {
            let payload = match packet.extension_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Undecodable ChannelData payload");
                    return Vec::new();
                }
            };
            let channel = packet
                .source_channel
                .clone()
                .or_else(|| payload.source_channel.clone())
                .unwrap_or_default();
            vec![Effect::DeliverChannelData {
                channel,
                packet: payload,
            }]
        }

        PacketType::ExtensionMessage => handle_extension_message(state, packet),

        PacketType::InvalidMessage => {
            error!(data = %packet.data, "Hub rejected a packet as invalid");
            Vec::new()
        }

        PacketType::LoggingLevel => Vec::new(),

        // Request-side types are never expected inbound
        other => {
            debug!(packet_type = ?other, "Ignoring unexpected inbound packet");
            Vec::new()
        }
    }
}

/// Reconciles a `ConfigFile` against the defaults and re-persists.
///
/// An empty payload (first run) bootstraps the defaults; a version skew
/// resets to them wholesale. Either way exactly one `SaveConfig` goes back.
fn handle_config_file(state: &mut ExtensionState, packet: &ServerPacket) -> Vec<Effect> {
    // Config files are addressed; ignore one meant for somebody else
    if let Some(dest) = packet.dest.as_deref() {
        if dest != state.extension_name() {
            return Vec::new();
        }
    }

    let received = parse_stored_config(&packet.data);
    let (resolved, outcome) = reconcile(&state.default_config, received.as_ref());
    info!(outcome = ?outcome, "Config resolved");

    state.config = resolved;
    state.phase = Phase::ConfigResolved;

    let mut effects = Vec::with_capacity(2);
    match serde_json::to_value(&state.config) {
        Ok(config_value) => {
            effects.push(Effect::Send(ServerPacket::save_config(
                state.extension_name(),
                config_value,
            )));
        }
        Err(e) => error!(error = %e, "Failed to serialize config for persistence"),
    }
    effects.push(Effect::ConfigResolved { outcome });
    effects
}

/// Parses the stored config out of a `ConfigFile` payload.
///
/// Empty payloads mean "nothing stored"; a malformed blob is treated the
/// same way rather than wedging startup.
fn parse_stored_config(data: &Value) -> Option<ExtensionConfig> {
    let empty = match data {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        return None;
    }
    match serde_json::from_value::<ExtensionConfig>(data.clone()) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(error = %e, "Stored config unreadable, falling back to defaults");
            None
        }
    }
}

fn handle_credentials_file(state: &mut ExtensionState, packet: &ServerPacket) -> Vec<Effect> {
    let mut credentials = BTreeMap::new();
    if let Value::Object(map) = &packet.data {
        for (key, value) in map {
            if let Value::String(s) = value {
                credentials.insert(key.clone(), s.clone());
            }
        }
    }
    if credentials.is_empty() {
        warn!("No credentials stored for this extension");
    }
    state.credentials = Some(credentials);
    vec![Effect::CredentialsReady]
}

/// Handles the settings-widget subprotocol nested in `ExtensionMessage`.
fn handle_extension_message(state: &mut ExtensionState, packet: &ServerPacket) -> Vec<Effect> {
    let payload = match packet.extension_payload() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Undecodable ExtensionMessage payload");
            return Vec::new();
        }
    };

    match payload.kind.as_str() {
        // Admin page wants our widget; reply directly to the requester
        "RequestSettingsWidgetSmallCode" => vec![Effect::SendWidget {
            dest: payload.from.clone(),
        }],

        "SettingsWidgetSmallData" => {
            let Some(data) = payload.data.as_object() else {
                warn!("SettingsWidgetSmallData without an object payload");
                return Vec::new();
            };
            // Submissions for every extension fan out; only ours applies
            if data.get("extensionname").and_then(Value::as_str) != Some(state.extension_name()) {
                return Vec::new();
            }

            // The form omits unchecked checkboxes, so every toggle goes
            // off first; checked ones come back through the overlay
            reset_toggles(&mut state.config);
            let applied = apply_overlay(&mut state.config, data);
            info!(applied, "Settings updated from widget");

            let mut effects = Vec::with_capacity(3);
            match serde_json::to_value(&state.config) {
                Ok(config_value) => {
                    effects.push(Effect::Send(ServerPacket::save_config(
                        state.extension_name(),
                        config_value,
                    )));
                }
                Err(e) => error!(error = %e, "Failed to serialize config for persistence"),
            }
            effects.push(Effect::SettingsChanged);
            // Blank dest: rebroadcast the refreshed widget to all viewers
            effects.push(Effect::SendWidget {
                dest: String::new(),
            });
            effects
        }

        // Another extension's widget code passing by
        "SettingsWidgetSmallCode" => Vec::new(),

        _ => vec![Effect::DeliverExtensionMessage { packet: payload }],
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelMode;
    use serde_json::json;

    fn state() -> ExtensionState {
        let default = ExtensionConfig::new(0.1, "timers", "TIMERS_CHANNEL")
            .with("enabled", "off")
            .with("Timeout", "600");
        let mut state = ExtensionState::new(default);
        state.channels.ensure("TIMERS_CHANNEL", ChannelMode::Create);
        state.phase = Phase::Connected;
        state
    }

    fn config_file(data: Value) -> ServerPacket {
        ServerPacket {
            kind: PacketType::ConfigFile,
            from: "hub".to_string(),
            data,
            source_channel: None,
            dest: Some("timers".to_string()),
        }
    }

    #[test]
    fn test_empty_config_file_bootstraps_and_saves_once() {
        let mut state = state();
        let effects = dispatch(&mut state, &config_file(Value::String(String::new())));

        let saves: Vec<_> = effects
            .iter()
            .filter(|e| matches!(e, Effect::Send(p) if p.kind == PacketType::SaveConfig))
            .collect();
        assert_eq!(saves.len(), 1);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::ConfigResolved {
                outcome: ReconcileOutcome::Bootstrapped
            }
        )));
        assert_eq!(state.config, state.default_config);
        assert_eq!(state.phase, Phase::ConfigResolved);
    }

    #[test]
    fn test_version_skew_resets_config() {
        let mut state = state();
        let stored = json!({
            "__version__": 0.2,
            "extensionname": "timers",
            "channel": "TIMERS_CHANNEL",
            "enabled": "on"
        });
        let effects = dispatch(&mut state, &config_file(stored));

        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::ConfigResolved {
                outcome: ReconcileOutcome::Reset { .. }
            }
        )));
        // Defaults win wholesale
        assert!(!state.config.is_on("enabled"));
    }

    #[test]
    fn test_matching_config_adopted() {
        let mut state = state();
        let stored = json!({
            "__version__": 0.1,
            "extensionname": "timers",
            "channel": "TIMERS_CHANNEL",
            "enabled": "on",
            "Timeout": "300"
        });
        let effects = dispatch(&mut state, &config_file(stored));

        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::ConfigResolved {
                outcome: ReconcileOutcome::Adopted
            }
        )));
        assert!(state.config.is_on("enabled"));
        assert_eq!(state.config.text("Timeout"), Some("300"));
    }

    #[test]
    fn test_config_file_for_other_extension_ignored() {
        let mut state = state();
        let mut packet = config_file(Value::String(String::new()));
        packet.dest = Some("somebody-else".to_string());

        let effects = dispatch(&mut state, &packet);
        assert!(effects.is_empty());
        assert_eq!(state.phase, Phase::Connected);
    }

    #[test]
    fn test_unknown_channel_schedules_one_retry() {
        let mut state = state();
        let packet = ServerPacket::with_data(
            PacketType::UnknownChannel,
            "hub",
            Value::String("TIMERS_CHANNEL".to_string()),
        );
        let effects = dispatch(&mut state, &packet);

        assert_eq!(effects.len(), 1);
        assert!(matches!(
            &effects[0],
            Effect::ScheduleChannelRetry { channel } if channel == "TIMERS_CHANNEL"
        ));
    }

    #[test]
    fn test_unknown_foreign_channel_no_retry() {
        let mut state = state();
        let packet = ServerPacket::with_data(
            PacketType::UnknownChannel,
            "hub",
            Value::String("NOT_OURS".to_string()),
        );
        assert!(dispatch(&mut state, &packet).is_empty());
    }

    #[test]
    fn test_channel_left_rejoins() {
        let mut state = state();
        state.channels.on_established("TIMERS_CHANNEL");

        let packet = ServerPacket::with_data(
            PacketType::ChannelLeft,
            "hub",
            Value::String("TIMERS_CHANNEL".to_string()),
        );
        let effects = dispatch(&mut state, &packet);
        assert!(matches!(
            &effects[0],
            Effect::Send(p) if p.kind == PacketType::CreateChannel
        ));
    }

    #[test]
    fn test_widget_request_replies_to_requester() {
        let mut state = state();
        let payload = ExtensionPacket::for_recipient(
            "RequestSettingsWidgetSmallCode",
            "adminpage",
            Value::Null,
            "timers",
        );
        let packet = ServerPacket::extension_message("adminpage", &payload, "timers").unwrap();

        let effects = dispatch(&mut state, &packet);
        assert!(matches!(
            &effects[0],
            Effect::SendWidget { dest } if dest == "adminpage"
        ));
    }

    #[test]
    fn test_widget_submission_applies_and_rebroadcasts() {
        let mut state = state();
        let payload = ExtensionPacket::for_recipient(
            "SettingsWidgetSmallData",
            "adminpage",
            json!({
                "extensionname": "timers",
                "enabled": "on",
                "Timeout": "120"
            }),
            "timers",
        );
        let packet = ServerPacket::extension_message("adminpage", &payload, "timers").unwrap();

        let effects = dispatch(&mut state, &packet);
        assert!(state.config.is_on("enabled"));
        assert_eq!(state.config.text("Timeout"), Some("120"));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Send(p) if p.kind == PacketType::SaveConfig)));
        assert!(effects.iter().any(|e| matches!(e, Effect::SettingsChanged)));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::SendWidget { dest } if dest.is_empty())));
    }

    #[test]
    fn test_widget_submission_without_checkbox_switches_it_off() {
        let mut state = state();
        state.config.set("enabled", "on");

        // An unchecked box never appears in the submitted data
        let payload = ExtensionPacket::for_recipient(
            "SettingsWidgetSmallData",
            "adminpage",
            json!({"extensionname": "timers", "Timeout": "300"}),
            "timers",
        );
        let packet = ServerPacket::extension_message("adminpage", &payload, "timers").unwrap();

        let effects = dispatch(&mut state, &packet);
        assert!(!state.config.is_on("enabled"));
        assert_eq!(state.config.text("Timeout"), Some("300"));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Send(p) if p.kind == PacketType::SaveConfig)));
    }

    #[test]
    fn test_widget_submission_for_other_extension_ignored() {
        let mut state = state();
        let payload = ExtensionPacket::for_recipient(
            "SettingsWidgetSmallData",
            "adminpage",
            json!({"extensionname": "songlist", "enabled": "on"}),
            "songlist",
        );
        let packet = ServerPacket::extension_message("adminpage", &payload, "songlist").unwrap();

        assert!(dispatch(&mut state, &packet).is_empty());
        assert!(!state.config.is_on("enabled"));
    }

    #[test]
    fn test_channel_data_delivered_to_extension() {
        let mut state = state();
        let payload = ExtensionPacket::for_channel(
            "ChatMessage",
            "twitchchat",
            json!({"message": "!randomfact"}),
            "TWITCH_CHAT",
        );
        let packet = ServerPacket::channel_data("twitchchat", &payload, "TWITCH_CHAT").unwrap();

        let effects = dispatch(&mut state, &packet);
        assert!(matches!(
            &effects[0],
            Effect::DeliverChannelData { channel, packet }
                if channel == "TWITCH_CHAT" && packet.kind == "ChatMessage"
        ));
    }

    #[test]
    fn test_credentials_file_stores_string_values() {
        let mut state = state();
        let packet = ServerPacket::with_data(
            PacketType::CredentialsFile,
            "hub",
            json!({"username": "streamer", "clientId": "abc", "count": 3}),
        );
        let effects = dispatch(&mut state, &packet);

        assert!(matches!(&effects[0], Effect::CredentialsReady));
        assert_eq!(state.credential("username"), Some("streamer"));
        assert_eq!(state.credential("clientId"), Some("abc"));
        // Non-string values are dropped
        assert_eq!(state.credential("count"), None);
    }

    #[test]
    fn test_invalid_message_produces_no_effects() {
        let mut state = state();
        let packet = ServerPacket::with_data(
            PacketType::InvalidMessage,
            "hub",
            Value::String("bad packet".to_string()),
        );
        assert!(dispatch(&mut state, &packet).is_empty());
    }
}
