//! CastHub Runtime - Hub connection and extension lifecycle
//!
//! This crate hosts one extension against a CastHub broker:
//! - `session`: newline-delimited JSON over TCP with ordered sends
//! - `channels`: channel creation/join bookkeeping with retry on rejection
//! - `dispatch`: pure packet-to-effect translation for the shared protocol
//! - `scheduler`: repeating, one-shot, and countdown task handles
//! - `extension`: the trait extension bodies implement, plus their `Context`
//! - `runtime`: the supervising loop that ties all of the above together
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

pub mod channels;
pub mod dispatch;
pub mod error;
pub mod extension;
pub mod http;
pub mod runtime;
pub mod scheduler;
pub mod session;

// Re-exports for convenience
pub use channels::{ChannelMode, ChannelSet};
pub use dispatch::{dispatch, Effect, ExtensionState, Phase};
pub use error::{Result, RuntimeError};
pub use extension::{Context, Extension};
pub use http::PollClient;
pub use runtime::{ExtensionRuntime, RuntimeConfig};
pub use scheduler::{Scheduler, TaskFire, TaskKind};
pub use session::{Session, SessionEvent};
