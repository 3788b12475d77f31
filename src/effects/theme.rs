//! Colour themes and intensity levels for light effects

use serde::{Deserialize, Serialize};

/// Full intensity on the device's 0-1000 value scale
pub const MAX_LEVEL: u16 = 1000;

/// Dim phase of a pulse (~15% of scale)
pub const LOW_LEVEL: u16 = 150;

/// Bright phase of a pulse
pub const HIGH_LEVEL: u16 = MAX_LEVEL;

/// Level a device is left at once an animation's deadline passes (~65% of scale)
pub const STEADY_LEVEL: u16 = 650;

/// Named colour preset
///
/// Only hue and saturation differ between themes; intensity levels are shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    /// Cyan
    #[default]
    Battery,
    /// Green
    Success,
    /// Blue
    Default,
    /// Magenta
    Gaming,
}

impl Theme {
    /// Every theme, in the order exposed to clients
    pub const ALL: [Self; 4] = [Self::Battery, Self::Success, Self::Default, Self::Gaming];

    /// Parse a theme name, case-insensitively
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "battery" => Some(Self::Battery),
            "success" => Some(Self::Success),
            "default" => Some(Self::Default),
            "gaming" => Some(Self::Gaming),
            _ => None,
        }
    }

    /// Parse a theme name, falling back to `fallback` for unknown names
    #[must_use]
    pub fn resolve(name: &str, fallback: Self) -> Self {
        Self::parse(name).unwrap_or_else(|| {
            tracing::debug!(theme = name, fallback = %fallback, "unknown theme, using fallback");
            fallback
        })
    }

    /// Wire name of the theme
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Battery => "battery",
            Self::Success => "success",
            Self::Default => "default",
            Self::Gaming => "gaming",
        }
    }

    /// Hue in degrees (0-360)
    #[must_use]
    pub const fn hue(self) -> u16 {
        match self {
            Self::Battery => 180,
            Self::Success => 120,
            Self::Default => 210,
            Self::Gaming => 300,
        }
    }

    /// Saturation on the 0-1000 scale
    #[must_use]
    pub const fn saturation(self) -> u16 {
        match self {
            Self::Default => 900,
            Self::Battery | Self::Success | Self::Gaming => 1000,
        }
    }

    /// Colour for this theme at the given intensity
    #[must_use]
    pub const fn at(self, level: u16) -> Hsv {
        Hsv {
            h: self.hue(),
            s: self.saturation(),
            v: level,
        }
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Colour value as sent in `colour_data_v2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hsv {
    pub h: u16,
    pub s: u16,
    pub v: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_themes() {
        assert_eq!(Theme::parse("gaming"), Some(Theme::Gaming));
        assert_eq!(Theme::parse(" Success "), Some(Theme::Success));
        assert_eq!(Theme::parse("disco"), None);
    }

    #[test]
    fn unknown_theme_falls_back() {
        assert_eq!(Theme::resolve("disco", Theme::Default), Theme::Default);
        assert_eq!(Theme::resolve("disco", Theme::Battery), Theme::Battery);
        assert_eq!(Theme::resolve("battery", Theme::Default), Theme::Battery);
    }

    #[test]
    fn themes_share_levels() {
        for theme in Theme::ALL {
            assert_eq!(theme.at(LOW_LEVEL).v, 150);
            assert_eq!(theme.at(STEADY_LEVEL).v, 650);
        }
        assert_eq!(Theme::Gaming.at(HIGH_LEVEL), Hsv { h: 300, s: 1000, v: 1000 });
        assert_eq!(Theme::Default.at(HIGH_LEVEL).s, 900);
    }

    #[test]
    fn theme_serializes_as_name() {
        let json = serde_json::to_string(&Theme::Gaming).unwrap();
        assert_eq!(json, "\"gaming\"");
    }
}
