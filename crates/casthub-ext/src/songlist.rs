//! StreamerSonglist bridge.
//!
//! Mirrors a streamer's song queue and full song list from the
//! StreamerSonglist API onto this extension's channel, and relays
//! queue-management requests (add, played, remove) from other extensions
//! back to the API. Polling only runs while the extension is enabled and
//! credentials are present; without either it sits inert.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use casthub_core::ExtensionConfig;
use casthub_protocol::ExtensionPacket;
use casthub_runtime::{ChannelMode, Context, Extension, Result, TaskFire};

const WIDGET_TEMPLATE: &str = include_str!("../assets/songlist_settings.html");

const SONGLIST_CHANNEL: &str = "SONGLIST_CHANNEL";

const DEFAULT_API_BASE: &str = "https://api.streamersonglist.com";

const QUEUE_POLL_TASK: &str = "poll-queue";
const LIST_POLL_TASK: &str = "poll-list";

/// Mirrors a StreamerSonglist queue onto the song list channel.
pub struct SongList {
    queue: Value,
    songlist: Value,
    current_song: String,
    connected: bool,
}

impl SongList {
    pub fn new() -> Self {
        Self {
            queue: Value::Null,
            songlist: Value::Null,
            current_song: String::new(),
            connected: false,
        }
    }

    fn api_base(config: &ExtensionConfig) -> String {
        config
            .text("apibase")
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string()
    }

    /// True once the user has enabled the bridge and credentials exist.
    fn ready(ctx: &Context<'_>) -> bool {
        ctx.config.is_on("enabled")
            && ctx.credential("username").is_some()
            && ctx.credential("clientId").is_some()
    }

    /// Arms or disarms both polls to match the current config and
    /// credentials, fetching immediately on enable.
    async fn sync_polls(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        if Self::ready(ctx) {
            let queue_ms = ctx.config.number("queuepollms").unwrap_or(180_000.0) as u64;
            let list_ms = ctx.config.number("listpollms").unwrap_or(300_000.0) as u64;
            ctx.schedule_repeating(QUEUE_POLL_TASK, Duration::from_millis(queue_ms));
            ctx.schedule_repeating(LIST_POLL_TASK, Duration::from_millis(list_ms));
            info!(queue_ms, list_ms, "Song list polling armed");
            self.fetch_queue(ctx).await?;
            self.fetch_list(ctx).await?;
        } else {
            ctx.cancel_task(QUEUE_POLL_TASK);
            ctx.cancel_task(LIST_POLL_TASK);
            self.connected = false;
        }
        Ok(())
    }

    async fn fetch_queue(&mut self, ctx: &Context<'_>) -> Result<()> {
        let Some(username) = ctx.credential("username") else {
            return Ok(());
        };
        let Some(client_id) = ctx.credential("clientId") else {
            return Ok(());
        };
        let url = format!("{}/v1/streamers/{username}/queue", Self::api_base(ctx.config));

        let queue = match ctx.http.get_json(&url, &[("Client-ID", client_id)]).await {
            Ok(queue) => queue,
            Err(e) => {
                self.connected = false;
                return Err(e);
            }
        };
        self.connected = true;
        self.queue = queue;

        self.announce_head_change(ctx)?;
        ctx.send_channel_data("SongQueue", self.queue.clone())
    }

    /// Broadcasts a head-of-queue change on the extension's own channel.
    fn announce_head_change(&mut self, ctx: &Context<'_>) -> Result<()> {
        let Some(title) = head_song_title(&self.queue) else {
            return Ok(());
        };
        if title == self.current_song {
            return Ok(());
        }
        self.current_song = title.to_string();
        if self.current_song.is_empty() {
            return Ok(());
        }
        ctx.send_channel_data(
            "CurrentSongChanged",
            json!({ "songName": self.current_song }),
        )
    }

    async fn fetch_list(&mut self, ctx: &Context<'_>) -> Result<()> {
        let Some(username) = ctx.credential("username") else {
            return Ok(());
        };
        let Some(client_id) = ctx.credential("clientId") else {
            return Ok(());
        };
        let url = format!("{}/v1/streamers/{username}/songs", Self::api_base(ctx.config));

        let songlist = match ctx.http.get_json(&url, &[("Client-ID", client_id)]).await {
            Ok(songlist) => songlist,
            Err(e) => {
                self.connected = false;
                return Err(e);
            }
        };
        self.connected = true;
        self.songlist = songlist;
        ctx.send_channel_data("SongList", self.songlist.clone())
    }

    fn bearer_headers(client_id: &str) -> [(String, String); 3] {
        [
            ("accept".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), format!("Bearer {client_id}")),
            ("origin".to_string(), "CastHub".to_string()),
        ]
    }

    async fn queue_request(&mut self, ctx: &Context<'_>, path: &str, delete: bool) -> Result<()> {
        let Some(streamer_id) = ctx.credential("streamerId") else {
            warn!("Queue request without a streamerId credential");
            return Ok(());
        };
        let Some(client_id) = ctx.credential("clientId") else {
            return Ok(());
        };
        let url = format!(
            "{}/v1/streamers/{streamer_id}/{path}",
            Self::api_base(ctx.config)
        );
        let headers = Self::bearer_headers(client_id);
        let header_refs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        let result = if delete {
            ctx.http.delete(&url, &header_refs).await
        } else {
            ctx.http
                .post_json(&url, &header_refs, &Value::Null)
                .await
                .map(|_| ())
        };
        if let Err(e) = result {
            self.connected = false;
            return Err(e);
        }
        self.fetch_queue(ctx).await
    }
}

impl Default for SongList {
    fn default() -> Self {
        Self::new()
    }
}

/// Title of the song at the head of the queue, if any.
fn head_song_title(queue: &Value) -> Option<&str> {
    queue
        .get("list")?
        .get(0)?
        .get("song")?
        .get("title")?
        .as_str()
}

/// Song/queue identifier from a request payload (number or string).
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Extension for SongList {
    fn name(&self) -> &str {
        "songlist"
    }

    fn default_config(&self) -> ExtensionConfig {
        ExtensionConfig::new(0.1, "songlist", SONGLIST_CHANNEL)
            .with("enabled", "off")
            .with("apibase", DEFAULT_API_BASE)
            .with("queuepollms", 180_000.0)
            .with("listpollms", 300_000.0)
    }

    fn widget_template(&self) -> &str {
        WIDGET_TEMPLATE
    }

    fn subscriptions(&self) -> Vec<(String, ChannelMode)> {
        vec![(SONGLIST_CHANNEL.to_string(), ChannelMode::Create)]
    }

    fn wants_credentials(&self) -> bool {
        true
    }

    fn connected(&self) -> bool {
        self.connected
    }

    async fn on_config_resolved(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        self.sync_polls(ctx).await
    }

    async fn on_credentials(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        self.sync_polls(ctx).await
    }

    async fn on_settings_changed(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        self.sync_polls(ctx).await
    }

    async fn on_task(&mut self, ctx: &mut Context<'_>, fire: &TaskFire) -> Result<()> {
        match fire.name.as_str() {
            QUEUE_POLL_TASK => self.fetch_queue(ctx).await,
            LIST_POLL_TASK => self.fetch_list(ctx).await,
            _ => Ok(()),
        }
    }

    async fn on_extension_message(
        &mut self,
        ctx: &mut Context<'_>,
        packet: &ExtensionPacket,
    ) -> Result<()> {
        match packet.kind.as_str() {
            "RequestQueue" => {
                ctx.send_extension_message("SongQueue", self.queue.clone(), &packet.from)
            }
            "RequestSonglist" => {
                ctx.send_extension_message("SongList", self.songlist.clone(), &packet.from)
            }
            "AddSongToQueue" => {
                let Some(song_id) = packet.data.get("songName").and_then(id_string) else {
                    warn!("AddSongToQueue without a song id");
                    return Ok(());
                };
                self.queue_request(ctx, &format!("queue/{song_id}/request"), false)
                    .await
            }
            "MarkSongAsPlayed" => {
                let Some(queue_id) = packet.data.get("songName").and_then(id_string) else {
                    warn!("MarkSongAsPlayed without a queue id");
                    return Ok(());
                };
                self.queue_request(ctx, &format!("queue/{queue_id}/played"), false)
                    .await
            }
            "RemoveSongFromQueue" => {
                let Some(queue_id) = id_string(&packet.data) else {
                    warn!("RemoveSongFromQueue without a queue id");
                    return Ok(());
                };
                self.queue_request(ctx, &format!("queue/{queue_id}"), true)
                    .await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casthub_protocol::{PacketType, ServerPacket};
    use casthub_runtime::{PollClient, Scheduler, Session};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_head_change_broadcast_on_own_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let session = Session::connect("127.0.0.1", port, event_tx).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);

        let (fire_tx, _fire_rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(fire_tx);
        let config = SongList::new().default_config();
        let http = PollClient::new().unwrap();
        let ctx = Context {
            session: &session,
            scheduler: &mut scheduler,
            config: &config,
            credentials: None,
            http: &http,
        };

        let mut ext = SongList::new();
        ext.queue = json!({"list": [{"song": {"title": "Wonderwall"}}]});
        ext.announce_head_change(&ctx).unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let packet: ServerPacket = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(packet.kind, PacketType::ChannelData);
        assert_eq!(packet.source_channel.as_deref(), Some(SONGLIST_CHANNEL));
        let payload = packet.extension_payload().unwrap();
        assert_eq!(payload.kind, "CurrentSongChanged");
        assert_eq!(payload.data["songName"], json!("Wonderwall"));

        // The same head produces no second broadcast
        ext.announce_head_change(&ctx).unwrap();
        assert_eq!(ext.current_song, "Wonderwall");
    }

    #[test]
    fn test_head_song_title() {
        let queue = json!({
            "list": [
                { "song": { "title": "Wonderwall" } },
                { "song": { "title": "Creep" } }
            ]
        });
        assert_eq!(head_song_title(&queue), Some("Wonderwall"));
        assert_eq!(head_song_title(&json!({"list": []})), None);
        assert_eq!(head_song_title(&Value::Null), None);
    }

    #[test]
    fn test_id_string() {
        assert_eq!(id_string(&json!(42)).as_deref(), Some("42"));
        assert_eq!(id_string(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(id_string(&json!("")), None);
        assert_eq!(id_string(&Value::Null), None);
    }

    #[test]
    fn test_default_config_disabled() {
        let config = SongList::new().default_config();
        assert!(!config.is_on("enabled"));
        assert_eq!(config.number("queuepollms"), Some(180_000.0));
        assert_eq!(config.number("listpollms"), Some(300_000.0));
    }

    #[test]
    fn test_owns_songlist_channel() {
        let subs = SongList::new().subscriptions();
        assert_eq!(
            subs,
            vec![(SONGLIST_CHANNEL.to_string(), ChannelMode::Create)]
        );
    }

    #[test]
    fn test_starts_disconnected() {
        let ext = SongList::new();
        assert!(!ext.connected());
        assert!(ext.wants_credentials());
    }
}
