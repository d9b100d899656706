//! Packet envelopes for broker traffic.
//!
//! A [`ServerPacket`] is the outer envelope the broker understands. Its
//! `type` fully determines the required shape of `data`; dispatchers must
//! match on the type before inspecting the payload. An [`ExtensionPacket`]
//! is the application-level payload nested inside `ExtensionMessage` and
//! `ChannelData` envelopes - its `type` is an open string namespace owned
//! by the extensions, not by this crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Packet types understood by the broker and the extension runtime.
///
/// Exhaustive for the core protocol; application message kinds live in
/// [`ExtensionPacket::kind`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    /// Request a named channel be created, owned by the sender
    CreateChannel,
    /// Request to receive `ChannelData` on a named channel
    JoinChannel,
    /// Acknowledgment: channel created, subscription established
    ChannelCreated,
    /// Acknowledgment: channel joined, subscription established
    ChannelJoined,
    /// Channel subscription revoked; must re-join
    ChannelLeft,
    /// Named channel does not exist yet; retry after delay
    UnknownChannel,
    /// Fetch persisted config for the sender
    RequestConfig,
    /// Carries persisted config (or empty data on first run)
    ConfigFile,
    /// Persist current resolved config
    SaveConfig,
    /// Fetch secret values needed to reach third-party services
    RequestCredentials,
    /// Carries credentials (or empty data when none stored)
    CredentialsFile,
    /// Payload routed to all subscribers of a channel
    ChannelData,
    /// Payload routed to one named recipient extension
    ExtensionMessage,
    /// Broker rejected a malformed packet; data carries an error string
    InvalidMessage,
    /// Informational; no state change required
    LoggingLevel,
}

/// Errors raised when decoding nested payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed packet payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Envelope sent to and received from the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerPacket {
    /// Determines the required shape of `data`.
    #[serde(rename = "type")]
    pub kind: PacketType,

    /// Origin extension identifier.
    pub from: String,

    /// Payload; shape depends on `kind`.
    #[serde(default)]
    pub data: Value,

    /// Channel the payload is destined for republishing on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_channel: Option<String>,

    /// Direct recipient identifier or channel name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
}

impl ServerPacket {
    /// Creates a packet with no payload.
    pub fn new(kind: PacketType, from: &str) -> Self {
        Self {
            kind,
            from: from.to_string(),
            data: Value::Null,
            source_channel: None,
            dest: None,
        }
    }

    /// Creates a packet with a payload.
    pub fn with_data(kind: PacketType, from: &str, data: Value) -> Self {
        Self {
            kind,
            from: from.to_string(),
            data,
            source_channel: None,
            dest: None,
        }
    }

    /// Creates a `CreateChannel` request; `data` names the channel.
    pub fn create_channel(from: &str, channel: &str) -> Self {
        Self::with_data(PacketType::CreateChannel, from, Value::String(channel.to_string()))
    }

    /// Creates a `JoinChannel` request; `data` names the channel.
    pub fn join_channel(from: &str, channel: &str) -> Self {
        Self::with_data(PacketType::JoinChannel, from, Value::String(channel.to_string()))
    }

    /// Creates a `RequestConfig` packet.
    pub fn request_config(from: &str) -> Self {
        Self::new(PacketType::RequestConfig, from)
    }

    /// Creates a `RequestCredentials` packet.
    pub fn request_credentials(from: &str) -> Self {
        Self::new(PacketType::RequestCredentials, from)
    }

    /// Creates a `SaveConfig` packet carrying the resolved config.
    pub fn save_config(from: &str, config: Value) -> Self {
        Self::with_data(PacketType::SaveConfig, from, config)
    }

    /// Creates a `ChannelData` packet routed to all subscribers of `channel`.
    pub fn channel_data(from: &str, payload: &ExtensionPacket, channel: &str) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind: PacketType::ChannelData,
            from: from.to_string(),
            data: serde_json::to_value(payload)?,
            source_channel: Some(channel.to_string()),
            dest: None,
        })
    }

    /// Creates an `ExtensionMessage` packet routed to one recipient.
    ///
    /// A blank `dest` means "everyone currently displaying this" for
    /// widget rebroadcasts; the broker fans it out.
    pub fn extension_message(from: &str, payload: &ExtensionPacket, dest: &str) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind: PacketType::ExtensionMessage,
            from: from.to_string(),
            data: serde_json::to_value(payload)?,
            source_channel: None,
            dest: Some(dest.to_string()),
        })
    }

    /// Decodes the nested [`ExtensionPacket`] from `data`.
    ///
    /// Only meaningful for `ExtensionMessage` and `ChannelData` envelopes.
    pub fn extension_payload(&self) -> Result<ExtensionPacket, ProtocolError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Returns the channel named by `data` for channel-ack packets
    /// (`ChannelCreated`, `ChannelJoined`, `ChannelLeft`, `UnknownChannel`).
    pub fn channel_name(&self) -> Option<&str> {
        self.data.as_str()
    }
}

/// Application-level message between extensions, nested inside a
/// `ServerPacket` of type `ExtensionMessage` or `ChannelData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionPacket {
    /// Application message kind - open namespace, not closed by the core.
    #[serde(rename = "type")]
    pub kind: String,

    /// Origin extension identifier.
    pub from: String,

    /// Opaque payload.
    #[serde(default)]
    pub data: Value,

    /// Channel the payload is destined for republishing on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_channel: Option<String>,

    /// Direct recipient identifier or channel name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
}

impl ExtensionPacket {
    /// Creates a payload destined for a channel.
    pub fn for_channel(kind: &str, from: &str, data: Value, channel: &str) -> Self {
        Self {
            kind: kind.to_string(),
            from: from.to_string(),
            data,
            source_channel: Some(channel.to_string()),
            dest: None,
        }
    }

    /// Creates a payload addressed to one recipient extension.
    pub fn for_recipient(kind: &str, from: &str, data: Value, dest: &str) -> Self {
        Self {
            kind: kind.to_string(),
            from: from.to_string(),
            data,
            source_channel: None,
            dest: Some(dest.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_packet_type_wire_names() {
        let json = serde_json::to_string(&PacketType::CreateChannel).unwrap();
        assert_eq!(json, "\"CreateChannel\"");
        let json = serde_json::to_string(&PacketType::UnknownChannel).unwrap();
        assert_eq!(json, "\"UnknownChannel\"");
    }

    #[test]
    fn test_join_channel_serialization() {
        let pkt = ServerPacket::join_channel("randomfact", "TWITCH_CHAT");
        let json = serde_json::to_string(&pkt).unwrap();
        assert!(json.contains("\"type\":\"JoinChannel\""));
        assert!(json.contains("\"from\":\"randomfact\""));
        assert!(json.contains("\"data\":\"TWITCH_CHAT\""));
        // Optional fields stay off the wire when unset
        assert!(!json.contains("source_channel"));
        assert!(!json.contains("dest"));
    }

    #[test]
    fn test_channel_name_from_ack() {
        let pkt: ServerPacket =
            serde_json::from_str(r#"{"type":"UnknownChannel","from":"hub","data":"TWITCH_CHAT"}"#)
                .unwrap();
        assert_eq!(pkt.kind, PacketType::UnknownChannel);
        assert_eq!(pkt.channel_name(), Some("TWITCH_CHAT"));
    }

    #[test]
    fn test_extension_message_roundtrip() {
        let payload = ExtensionPacket::for_recipient(
            "RandomFact",
            "randomfact",
            json!("Bananas are berries."),
            "webpage",
        );
        let pkt = ServerPacket::extension_message("randomfact", &payload, "webpage").unwrap();

        let json = serde_json::to_string(&pkt).unwrap();
        let parsed: ServerPacket = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, PacketType::ExtensionMessage);
        assert_eq!(parsed.dest.as_deref(), Some("webpage"));

        let nested = parsed.extension_payload().unwrap();
        assert_eq!(nested.kind, "RandomFact");
        assert_eq!(nested.data, json!("Bananas are berries."));
    }

    #[test]
    fn test_channel_data_carries_source_channel() {
        let payload = ExtensionPacket::for_channel(
            "HeartBeat",
            "songlist",
            json!({"connected": true}),
            "SONGLIST_CHANNEL",
        );
        let pkt = ServerPacket::channel_data("songlist", &payload, "SONGLIST_CHANNEL").unwrap();
        assert_eq!(pkt.source_channel.as_deref(), Some("SONGLIST_CHANNEL"));

        let nested = pkt.extension_payload().unwrap();
        assert_eq!(nested.source_channel.as_deref(), Some("SONGLIST_CHANNEL"));
    }

    #[test]
    fn test_missing_data_defaults_to_null() {
        let pkt: ServerPacket =
            serde_json::from_str(r#"{"type":"RequestConfig","from":"timers"}"#).unwrap();
        assert_eq!(pkt.data, Value::Null);
    }

    #[test]
    fn test_unknown_packet_type_rejected() {
        let result = serde_json::from_str::<ServerPacket>(
            r#"{"type":"NotAThing","from":"x","data":null}"#,
        );
        assert!(result.is_err());
    }
}
