//! Channel subscription bookkeeping.
//!
//! An extension owns at most one channel (created on its behalf) and may
//! join any number of channels owned by others. Joining a channel that
//! does not exist yet is rejected with `UnknownChannel`; the subscription
//! stays pending and the runtime retries after a fixed delay until the
//! owner shows up. Retries never stack: one rejection schedules exactly
//! one retry.

use std::collections::BTreeMap;

use tracing::{info, warn};

use casthub_protocol::ServerPacket;

/// Retry counts past this are logged loudly; the channel owner is
/// probably not installed at all.
const NOISY_RETRY_THRESHOLD: u32 = 12;

// ============================================================================
// Subscription State
// ============================================================================

/// Whether the extension owns a channel or joins someone else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// The extension asks the hub to create this channel for it.
    Create,
    /// The extension joins a channel another extension owns.
    Join,
}

/// One desired channel membership and its progress.
#[derive(Debug, Clone)]
pub struct ChannelSubscription {
    pub channel: String,
    pub mode: ChannelMode,
    pub established: bool,
    pub attempts: u32,
}

// ============================================================================
// Channel Set
// ============================================================================

/// All channel memberships one extension wants, keyed by channel name.
#[derive(Debug)]
pub struct ChannelSet {
    extension_name: String,
    subscriptions: BTreeMap<String, ChannelSubscription>,
}

impl ChannelSet {
    /// Creates an empty set for the named extension.
    pub fn new(extension_name: &str) -> Self {
        Self {
            extension_name: extension_name.to_string(),
            subscriptions: BTreeMap::new(),
        }
    }

    /// Registers a desired membership and returns the packet to send.
    ///
    /// Registering an already-known channel resets it to pending (used
    /// after a reconnect, where every membership must be re-established).
    pub fn ensure(&mut self, channel: &str, mode: ChannelMode) -> ServerPacket {
        self.subscriptions.insert(
            channel.to_string(),
            ChannelSubscription {
                channel: channel.to_string(),
                mode,
                established: false,
                attempts: 1,
            },
        );
        self.request_packet(channel, mode)
    }

    /// Marks a channel established after `ChannelCreated` / `ChannelJoined`.
    pub fn on_established(&mut self, channel: &str) {
        if let Some(sub) = self.subscriptions.get_mut(channel) {
            sub.established = true;
            info!(channel = %channel, attempts = sub.attempts, "Channel established");
        }
    }

    /// Records an `UnknownChannel` rejection.
    ///
    /// Returns true if the channel is one of ours and a retry should be
    /// scheduled.
    pub fn on_unknown(&mut self, channel: &str) -> bool {
        let Some(sub) = self.subscriptions.get_mut(channel) else {
            return false;
        };
        sub.established = false;
        sub.attempts = sub.attempts.saturating_add(1);
        if sub.attempts > NOISY_RETRY_THRESHOLD {
            warn!(
                channel = %channel,
                attempts = sub.attempts,
                "Channel still unknown, is its owner running?"
            );
        } else {
            info!(channel = %channel, attempts = sub.attempts, "Channel unknown, will retry");
        }
        true
    }

    /// Builds the retry packet for a pending channel.
    ///
    /// Returns `None` if the channel was established in the meantime, so a
    /// late retry timer cannot produce a duplicate join.
    pub fn retry_packet(&self, channel: &str) -> Option<ServerPacket> {
        let sub = self.subscriptions.get(channel)?;
        if sub.established {
            return None;
        }
        Some(self.request_packet(channel, sub.mode))
    }

    /// Handles `ChannelLeft`: the membership drops back to pending and the
    /// returned packet re-requests it immediately.
    pub fn on_left(&mut self, channel: &str) -> Option<ServerPacket> {
        let sub = self.subscriptions.get_mut(channel)?;
        sub.established = false;
        let mode = sub.mode;
        warn!(channel = %channel, "Dropped from channel, rejoining");
        Some(self.request_packet(channel, mode))
    }

    /// Resets every membership to pending and returns the packets to send,
    /// in registration order.
    pub fn reset_all(&mut self) -> Vec<ServerPacket> {
        let mut packets = Vec::with_capacity(self.subscriptions.len());
        for sub in self.subscriptions.values_mut() {
            sub.established = false;
            sub.attempts = 1;
        }
        for sub in self.subscriptions.values() {
            packets.push(self.request_packet(&sub.channel, sub.mode));
        }
        packets
    }

    /// True once every registered membership is established.
    pub fn all_established(&self) -> bool {
        self.subscriptions.values().all(|sub| sub.established)
    }

    /// Returns a membership by channel name.
    pub fn get(&self, channel: &str) -> Option<&ChannelSubscription> {
        self.subscriptions.get(channel)
    }

    fn request_packet(&self, channel: &str, mode: ChannelMode) -> ServerPacket {
        match mode {
            ChannelMode::Create => ServerPacket::create_channel(&self.extension_name, channel),
            ChannelMode::Join => ServerPacket::join_channel(&self.extension_name, channel),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
