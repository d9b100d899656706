//! CastHub Core - Shared domain types for extensions
//!
//! This crate provides the configuration model and the pure presentation
//! helpers shared by the runtime and the extension bodies.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, or `todo!()` outside tests.

pub mod config;
pub mod display;
pub mod error;
pub mod widget;

// Re-exports for convenience
pub use config::{
    apply_overlay, reconcile, reset_toggles, ExtensionConfig, ReconcileOutcome, SettingValue,
};
pub use display::{format_countdown, render_timer_line, CLEARED_DISPLAY};
pub use error::{ConfigError, ConfigResult};
pub use widget::render_settings_widget;
