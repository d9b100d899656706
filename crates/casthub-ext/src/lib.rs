//! CastHub Extensions - Bundled extension bodies
//!
//! Each module is one extension built on `casthub-runtime`:
//! - `randomfact`: answers chat commands and direct requests with a fact
//!   from a public API
//! - `songlist`: mirrors a streamer's song queue and list from the
//!   StreamerSonglist API onto a channel
//! - `alerts`: polls an alert feed and republishes new alerts
//! - `timers`: named countdown timers broadcast per second and mirrored
//!   into overlay text files

pub mod alerts;
pub mod randomfact;
pub mod songlist;
pub mod timers;

pub use alerts::Alerts;
pub use randomfact::RandomFact;
pub use songlist::SongList;
pub use timers::Timers;
