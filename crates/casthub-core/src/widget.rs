//! Settings-widget rendering.
//!
//! The broker's admin pages display a small HTML fragment per extension.
//! Rendering fills the current config values into named placeholders:
//! a checkbox setting with value `"on"` activates its `{key}checked`
//! marker, any other string or number substitutes into `{key}text`.
//! Substitution is deterministic for a given config.

use crate::config::ExtensionConfig;

/// Renders the widget template with the current config values.
///
/// Each placeholder is replaced at most once, matching how viewers embed
/// them. Identity fields (`extensionname`, `channel`) substitute like any
/// text setting.
pub fn render_settings_widget(template: &str, config: &ExtensionConfig) -> String {
    let mut rendered = template.to_string();

    rendered = rendered.replacen("extensionnametext", &config.extension_name, 1);
    rendered = rendered.replacen("channeltext", &config.channel_name, 1);

    for (key, value) in &config.settings {
        if value.is_on() {
            rendered = rendered.replacen(&format!("{key}checked"), "checked", 1);
        } else {
            rendered = rendered.replacen(&format!("{key}text"), &value.display(), 1);
        }
    }

    rendered
}
