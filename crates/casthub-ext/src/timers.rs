//! Named countdown timers.
//!
//! A timer is armed from the settings widget: name, overlay message, and a
//! second count. While it runs, each tick broadcasts the remaining seconds
//! on the timers channel and mirrors a `message M:SS` line into a text
//! file per timer, which streaming software displays as an overlay. The
//! final tick blanks the file so the overlay clears instead of freezing
//! at `0:00`.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use casthub_core::{render_timer_line, ConfigError, ConfigResult, ExtensionConfig};
use casthub_runtime::{ChannelMode, Context, Extension, Result, TaskFire};

const WIDGET_TEMPLATE: &str = include_str!("../assets/timers_settings.html");

const TIMERS_CHANNEL: &str = "TIMERS";

/// Scheduler name prefix for countdown tasks.
const TIMER_TASK_PREFIX: &str = "timer:";

struct TimerState {
    message: String,
}

/// Broadcasts per-second countdowns and mirrors them into overlay files.
pub struct Timers {
    output_dir: PathBuf,
    active: HashMap<String, TimerState>,
}

impl Timers {
    /// Creates the extension writing overlay files under `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            active: HashMap::new(),
        }
    }

    fn overlay_path(&self, timer_name: &str) -> PathBuf {
        self.output_dir.join(format!("{timer_name}.txt"))
    }

    fn write_overlay(&self, timer_name: &str, line: &str) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        fs::write(self.overlay_path(timer_name), line)?;
        Ok(())
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new("timerfiles")
    }
}

/// Validates a widget submission into (name, message, timeout seconds).
fn timer_request(config: &ExtensionConfig) -> ConfigResult<(String, String, i64)> {
    let name = config
        .text("TimerName")
        .ok_or_else(|| ConfigError::missing("TimerName"))?
        .to_string();
    let timeout = config
        .get("Timeout")
        .ok_or_else(|| ConfigError::missing("Timeout"))?
        .as_number()
        .ok_or_else(|| ConfigError::invalid("Timeout", "not a number"))? as i64;
    if timeout <= 0 {
        return Err(ConfigError::invalid(
            "Timeout",
            "countdown seconds must be positive",
        ));
    }
    let message = config.text("TimerMessage").unwrap_or_default().to_string();
    Ok((name, message, timeout))
}

#[async_trait]
impl Extension for Timers {
    fn name(&self) -> &str {
        "timers"
    }

    fn default_config(&self) -> ExtensionConfig {
        ExtensionConfig::new(0.1, "timers", TIMERS_CHANNEL)
            .with("TimerName", "StartCountdownTimer")
            .with("TimerMessage", "Starting in")
            .with("Timeout", "600")
    }

    fn widget_template(&self) -> &str {
        WIDGET_TEMPLATE
    }

    fn subscriptions(&self) -> Vec<(String, ChannelMode)> {
        vec![(TIMERS_CHANNEL.to_string(), ChannelMode::Create)]
    }

    /// Submitting the widget (re)arms the named timer. Re-arming a running
    /// timer restarts it from the new count.
    async fn on_settings_changed(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        let (name, message, timeout) = timer_request(ctx.config)?;
        info!(timer = %name, timeout, "Starting countdown");
        self.active.insert(name.clone(), TimerState { message });
        ctx.start_countdown(&format!("{TIMER_TASK_PREFIX}{name}"), timeout);
        Ok(())
    }

    async fn on_task(&mut self, ctx: &mut Context<'_>, fire: &TaskFire) -> Result<()> {
        let Some(timer_name) = fire.name.strip_prefix(TIMER_TASK_PREFIX) else {
            return Ok(());
        };
        let Some(remaining) = fire.remaining else {
            return Ok(());
        };

        ctx.send_channel_data(
            "Timer",
            json!({
                "timername": timer_name,
                "timerdata": remaining,
            }),
        )?;

        // The broadcast carries the pre-tick count; the overlay shows the
        // count after this tick, and a blank once the countdown is done
        let line = match self.active.get(timer_name) {
            Some(state) => render_timer_line(&state.message, remaining - 1),
            None => render_timer_line("", remaining - 1),
        };
        self.write_overlay(timer_name, &line)?;

        if fire.terminal {
            self.active.remove(timer_name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Timers::default().default_config();
        assert_eq!(config.text("TimerName"), Some("StartCountdownTimer"));
        assert_eq!(config.text("TimerMessage"), Some("Starting in"));
        assert_eq!(config.number("Timeout"), Some(600.0));
        assert_eq!(config.channel_name, TIMERS_CHANNEL);
    }

    #[test]
    fn test_timer_request_accepts_defaults() {
        let config = Timers::default().default_config();
        let (name, message, timeout) = timer_request(&config).unwrap();
        assert_eq!(name, "StartCountdownTimer");
        assert_eq!(message, "Starting in");
        assert_eq!(timeout, 600);
    }

    #[test]
    fn test_timer_request_rejects_bad_settings() {
        let mut zero = Timers::default().default_config();
        zero.set("Timeout", "0");
        assert!(matches!(
            timer_request(&zero),
            Err(ConfigError::InvalidSetting { .. })
        ));

        let mut garbled = Timers::default().default_config();
        garbled.set("Timeout", "soon");
        assert!(matches!(
            timer_request(&garbled),
            Err(ConfigError::InvalidSetting { .. })
        ));

        let mut nameless = Timers::default().default_config();
        nameless.settings.remove("TimerName");
        assert!(matches!(
            timer_request(&nameless),
            Err(ConfigError::MissingSetting { .. })
        ));
    }

    #[test]
    fn test_overlay_write_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let timers = Timers::new(dir.path());

        timers
            .write_overlay("StartCountdownTimer", &render_timer_line("Starting in", 599))
            .unwrap();
        let path = timers.overlay_path("StartCountdownTimer");
        assert_eq!(fs::read_to_string(&path).unwrap(), "Starting in 9:59");

        timers
            .write_overlay("StartCountdownTimer", &render_timer_line("Starting in", -1))
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), " ");
    }

    #[test]
    fn test_widget_template_has_placeholders() {
        assert!(WIDGET_TEMPLATE.contains("TimerNametext"));
        assert!(WIDGET_TEMPLATE.contains("TimerMessagetext"));
        assert!(WIDGET_TEMPLATE.contains("Timeouttext"));
    }
}
