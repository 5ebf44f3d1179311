use serde::{Deserialize, Serialize};

use meshdesk_common::{Error, Result};

/// Launcher shape of the embedded widget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetShape {
    #[default]
    Rounded,
    Square,
    Minimal,
    Professional,
    Modern,
    Classic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BubbleStyle {
    #[default]
    Modern,
    Classic,
    Minimal,
    Rounded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetSize {
    Small,
    #[default]
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetPosition {
    #[default]
    BottomRight,
    BottomLeft,
}

/// A widget configuration row. The display and behavior fields are exactly
/// what the embed script renders, so this struct is also the public widget
/// payload (it carries nothing sensitive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatWidget {
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub domain_id: String,
    pub name: String,
    pub shape: WidgetShape,
    pub bubble_style: BubbleStyle,
    pub size: WidgetSize,
    pub position: WidgetPosition,
    pub primary_color: String,
    pub agent_name: String,
    pub agent_avatar: Option<String>,
    pub welcome_message: String,
    pub offline_message: String,
    pub auto_open_delay_secs: i64,
    pub allow_file_uploads: bool,
    pub sound_enabled: bool,
    pub require_email: bool,
    pub ai_assist: bool,
    pub show_powered_by: bool,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Creation payload. Absent fields get server-side defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct NewWidget {
    pub name: String,
    pub domain_id: String,
    #[serde(default)]
    pub shape: WidgetShape,
    #[serde(default)]
    pub bubble_style: BubbleStyle,
    #[serde(default)]
    pub size: WidgetSize,
    #[serde(default)]
    pub position: WidgetPosition,
    #[serde(default = "default_primary_color")]
    pub primary_color: String,
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    #[serde(default)]
    pub agent_avatar: Option<String>,
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
    #[serde(default = "default_offline_message")]
    pub offline_message: String,
    #[serde(default)]
    pub auto_open_delay_secs: i64,
    #[serde(default)]
    pub allow_file_uploads: bool,
    #[serde(default = "default_true")]
    pub sound_enabled: bool,
    #[serde(default)]
    pub require_email: bool,
    #[serde(default)]
    pub ai_assist: bool,
    #[serde(default = "default_true")]
    pub show_powered_by: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Update payload; only provided fields change.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateWidget {
    pub name: Option<String>,
    pub shape: Option<WidgetShape>,
    pub bubble_style: Option<BubbleStyle>,
    pub size: Option<WidgetSize>,
    pub position: Option<WidgetPosition>,
    pub primary_color: Option<String>,
    pub agent_name: Option<String>,
    pub agent_avatar: Option<String>,
    pub welcome_message: Option<String>,
    pub offline_message: Option<String>,
    pub auto_open_delay_secs: Option<i64>,
    pub allow_file_uploads: Option<bool>,
    pub sound_enabled: Option<bool>,
    pub require_email: Option<bool>,
    pub ai_assist: Option<bool>,
    pub show_powered_by: Option<bool>,
    pub is_active: Option<bool>,
}

fn default_primary_color() -> String {
    "#4f46e5".into()
}

fn default_agent_name() -> String {
    "Support".into()
}

fn default_welcome_message() -> String {
    "Hi! How can we help?".into()
}

fn default_offline_message() -> String {
    "We're offline right now — leave a message and we'll get back to you.".into()
}

fn default_true() -> bool {
    true
}

/// Validate the fields that accept free-form input.
pub fn validate_appearance(primary_color: &str, auto_open_delay_secs: i64) -> Result<()> {
    let is_hex = primary_color.len() == 7
        && primary_color.starts_with('#')
        && primary_color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !is_hex {
        return Err(Error::invalid(format!(
            "primary_color must be a #rrggbb hex value, got {primary_color:?}"
        )));
    }
    if !(0..=30).contains(&auto_open_delay_secs) {
        return Err(Error::invalid("auto_open_delay_secs must be within 0-30"));
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_widget_applies_defaults() {
        let w: NewWidget =
            serde_json::from_str(r#"{"name":"Main site","domain_id":"d1"}"#).unwrap();
        assert_eq!(w.shape, WidgetShape::Rounded);
        assert_eq!(w.size, WidgetSize::Medium);
        assert_eq!(w.position, WidgetPosition::BottomRight);
        assert_eq!(w.primary_color, "#4f46e5");
        assert!(w.sound_enabled);
        assert!(!w.require_email);
        assert!(w.show_powered_by);
        assert!(w.is_active);
    }

    #[test]
    fn position_uses_kebab_case() {
        let w: NewWidget = serde_json::from_str(
            r#"{"name":"x","domain_id":"d","position":"bottom-left"}"#,
        )
        .unwrap();
        assert_eq!(w.position, WidgetPosition::BottomLeft);
    }

    #[test]
    fn appearance_validation() {
        assert!(validate_appearance("#aabbcc", 0).is_ok());
        assert!(validate_appearance("#AABB00", 30).is_ok());
        assert!(validate_appearance("red", 0).is_err());
        assert!(validate_appearance("#aabbc", 0).is_err());
        assert!(validate_appearance("#aabbcc", 31).is_err());
        assert!(validate_appearance("#aabbcc", -1).is_err());
    }
}
