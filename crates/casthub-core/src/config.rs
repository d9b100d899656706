//! Versioned extension configuration and reconciliation.
//!
//! The broker stores one config blob per extension and hands it back on
//! `ConfigFile`. Reconciliation against the compiled-in default is coarse
//! on purpose: a stored config whose `__version__` differs from the default
//! is discarded wholesale and replaced - there is no field-level migration,
//! so a forward-incompatible shape is never partially trusted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A single configuration value.
///
/// Settings are strings, numbers, or checkbox toggles. Toggles travel as
/// the literal strings `"on"` / `"off"`, matching what the settings widget
/// posts back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Number(f64),
    Text(String),
}

impl SettingValue {
    /// Returns true for the checkbox-on marker value.
    pub fn is_on(&self) -> bool {
        matches!(self, SettingValue::Text(s) if s == "on")
    }

    /// Returns the text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            SettingValue::Number(_) => None,
        }
    }

    /// Returns the numeric content, accepting numeric strings too.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            SettingValue::Text(s) => s.parse().ok(),
        }
    }

    /// Renders the value for placeholder substitution.
    pub fn display(&self) -> String {
        match self {
            SettingValue::Text(s) => s.clone(),
            SettingValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
        }
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        SettingValue::Text(s.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        SettingValue::Text(s)
    }
}

impl From<f64> for SettingValue {
    fn from(n: f64) -> Self {
        SettingValue::Number(n)
    }
}

/// Versioned configuration record for one extension.
///
/// The wire shape matches what the broker persists: a flat object with the
/// `__version__` marker, the extension identity, and the settings inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// Monotonic config-shape version; mismatch forces a reset.
    #[serde(rename = "__version__")]
    pub version: f64,

    /// Owning extension identifier.
    #[serde(rename = "extensionname")]
    pub extension_name: String,

    /// The extension's own broadcast channel.
    #[serde(rename = "channel")]
    pub channel_name: String,

    /// Arbitrary key/value settings.
    #[serde(flatten)]
    pub settings: BTreeMap<String, SettingValue>,
}

impl ExtensionConfig {
    /// Creates a config with no settings.
    pub fn new(version: f64, extension_name: &str, channel_name: &str) -> Self {
        Self {
            version,
            extension_name: extension_name.to_string(),
            channel_name: channel_name.to_string(),
            settings: BTreeMap::new(),
        }
    }

    /// Builder-style setting insertion.
    pub fn with(mut self, key: &str, value: impl Into<SettingValue>) -> Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }

    /// Returns a setting by key.
    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.settings.get(key)
    }

    /// Returns a text setting by key.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(SettingValue::as_text)
    }

    /// Returns a numeric setting by key (numeric strings accepted).
    pub fn number(&self, key: &str) -> Option<f64> {
        self.settings.get(key).and_then(SettingValue::as_number)
    }

    /// Returns true when a checkbox setting is switched on.
    pub fn is_on(&self, key: &str) -> bool {
        self.settings.get(key).is_some_and(SettingValue::is_on)
    }

    /// Inserts or replaces a setting.
    pub fn set(&mut self, key: &str, value: impl Into<SettingValue>) {
        self.settings.insert(key.to_string(), value.into());
    }
}

/// How a stored config was resolved against the compiled-in default.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Stored config matched the default's version and was adopted verbatim.
    Adopted,
    /// Stored version differed; defaults adopted wholesale.
    Reset { stored_version: f64 },
    /// No stored config existed; defaults adopted (first run).
    Bootstrapped,
}

/// Resolves a stored config against the compiled-in default.
///
/// The caller must always re-persist the returned config (one `SaveConfig`),
/// which both completes first-run bootstrapping and normalizes a reset.
/// The returned config is an owned deep copy - it never aliases `default`
/// or `received`.
pub fn reconcile(
    default: &ExtensionConfig,
    received: Option<&ExtensionConfig>,
) -> (ExtensionConfig, ReconcileOutcome) {
    match received {
        None => (default.clone(), ReconcileOutcome::Bootstrapped),
        Some(stored) if stored.version != default.version => {
            debug!(
                stored_version = stored.version,
                default_version = default.version,
                "config version skew, resetting to defaults"
            );
            (
                default.clone(),
                ReconcileOutcome::Reset {
                    stored_version: stored.version,
                },
            )
        }
        Some(stored) => (stored.clone(), ReconcileOutcome::Adopted),
    }
}

/// Switches every `"on"` toggle off.
///
/// Widget submissions omit unchecked checkboxes entirely, so an overlay on
/// its own can never turn a toggle off. Callers reset the toggles first,
/// then overlay whatever the submission carries.
pub fn reset_toggles(config: &mut ExtensionConfig) {
    for value in config.settings.values_mut() {
        if value.is_on() {
            *value = SettingValue::Text("off".to_string());
        }
    }
}

/// Applies a field-level overlay from a settings-widget submission.
///
/// Identity fields and the version marker are never overlaid; everything
/// else is copied in. Returns the number of settings applied.
pub fn apply_overlay(config: &mut ExtensionConfig, data: &serde_json::Map<String, Value>) -> usize {
    let mut applied = 0;
    for (key, value) in data {
        if key == "__version__" || key == "extensionname" || key == "channel" {
            continue;
        }
        let setting = match value {
            Value::String(s) => SettingValue::Text(s.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) => SettingValue::Number(f),
                None => continue,
            },
            _ => continue,
        };
        config.settings.insert(key.clone(), setting);
        applied += 1;
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn default_config() -> ExtensionConfig {
        ExtensionConfig::new(0.1, "songlist", "SONGLIST_CHANNEL")
            .with("enabled", "off")
            .with("cred1value", "")
    }

    #[test]
    fn test_wire_shape() {
        let config = default_config();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["__version__"], json!(0.1));
        assert_eq!(value["extensionname"], json!("songlist"));
        assert_eq!(value["channel"], json!("SONGLIST_CHANNEL"));
        assert_eq!(value["enabled"], json!("off"));
    }

    #[test]
    fn test_roundtrip_preserves_settings() {
        let config = default_config().with("pollMs", 180000.0);
        let value = serde_json::to_value(&config).unwrap();
        let parsed: ExtensionConfig = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.number("pollMs"), Some(180000.0));
    }

    #[test]
    fn test_version_mismatch_resets_to_default_bit_for_bit() {
        let default = default_config();
        let stored = ExtensionConfig::new(0.2, "songlist", "SONGLIST_CHANNEL")
            .with("enabled", "on")
            .with("extra", "kept-nowhere");

        let (resolved, outcome) = reconcile(&default, Some(&stored));
        assert_eq!(resolved, default);
        assert_eq!(outcome, ReconcileOutcome::Reset { stored_version: 0.2 });
    }

    #[test]
    fn test_version_match_adopts_stored_deep_copy() {
        let default = default_config();
        let stored = default_config().with("enabled", "on");

        let (resolved, outcome) = reconcile(&default, Some(&stored));
        assert_eq!(outcome, ReconcileOutcome::Adopted);
        assert_eq!(resolved, stored);
        // Deep copy: mutating the resolved config leaves the stored one alone
        let mut resolved = resolved;
        resolved.set("enabled", "off");
        assert!(stored.is_on("enabled"));
    }

    #[test]
    fn test_no_stored_config_bootstraps_defaults() {
        let default = default_config();
        let (resolved, outcome) = reconcile(&default, None);
        assert_eq!(resolved, default);
        assert_eq!(outcome, ReconcileOutcome::Bootstrapped);
    }

    #[test]
    fn test_matching_scenario_from_broker() {
        // Broker sends {version:0.1, enabled:"off"} while the default also
        // carries cred1value - the stored record wins verbatim.
        let default = ExtensionConfig::new(0.1, "alerts", "ALERTS_CHANNEL")
            .with("enabled", "off")
            .with("cred1value", "");
        let stored: ExtensionConfig = serde_json::from_value(json!({
            "__version__": 0.1,
            "extensionname": "alerts",
            "channel": "ALERTS_CHANNEL",
            "enabled": "off"
        }))
        .unwrap();

        let (resolved, outcome) = reconcile(&default, Some(&stored));
        assert_eq!(outcome, ReconcileOutcome::Adopted);
        assert_eq!(resolved, stored);
        assert!(resolved.get("cred1value").is_none());
    }

    #[test]
    fn test_overlay_applies_settings_only() {
        let mut config = default_config();
        let data = json!({
            "extensionname": "songlist",
            "channel": "HIJACKED",
            "__version__": 9.9,
            "enabled": "on",
            "pollMs": 5000,
            "ignored": null
        });
        let map = data.as_object().unwrap();

        let applied = apply_overlay(&mut config, map);
        assert_eq!(applied, 2);
        assert!(config.is_on("enabled"));
        assert_eq!(config.number("pollMs"), Some(5000.0));
        // Identity and version untouched
        assert_eq!(config.channel_name, "SONGLIST_CHANNEL");
        assert_eq!(config.version, 0.1);
    }

    #[test]
    fn test_reset_toggles_only_touches_on_values() {
        let mut config = default_config()
            .with("enabled", "on")
            .with("verbose", "off")
            .with("pollMs", 5000.0);

        reset_toggles(&mut config);
        assert!(!config.is_on("enabled"));
        assert_eq!(config.text("enabled"), Some("off"));
        assert_eq!(config.text("verbose"), Some("off"));
        assert_eq!(config.number("pollMs"), Some(5000.0));
        assert_eq!(config.text("cred1value"), Some(""));
    }

    #[test]
    fn test_setting_value_helpers() {
        assert!(SettingValue::from("on").is_on());
        assert!(!SettingValue::from("off").is_on());
        assert_eq!(SettingValue::from("600").as_number(), Some(600.0));
        assert_eq!(SettingValue::from(600.0).display(), "600");
        assert_eq!(SettingValue::from(0.5).display(), "0.5");
    }
}
