use serde::Serialize;
use tracing::warn;

use crate::types::DEFAULT_THEME;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub name: &'static str,
    pub background: [u8; 4],
    pub card: [u8; 4],
    pub card_winner: [u8; 4],
    pub card_empty: [u8; 4],
    pub name_text: [u8; 4],
    pub subtitle_text: [u8; 4],
    pub connector: [u8; 4],
    pub accent: [u8; 4],
    pub champion: [u8; 4],
    pub particle: [u8; 4],
}

pub static THEMES: [Theme; 4] = [
    Theme {
        name: "classic",
        background: [244, 241, 234, 255],
        card: [255, 255, 255, 255],
        card_winner: [214, 233, 214, 255],
        card_empty: [229, 226, 219, 255],
        name_text: [52, 58, 64, 255],
        subtitle_text: [134, 142, 150, 255],
        connector: [120, 120, 120, 255],
        accent: [25, 113, 194, 255],
        champion: [232, 190, 52, 255],
        particle: [232, 190, 52, 160],
    },
    Theme {
        name: "midnight",
        background: [16, 20, 36, 255],
        card: [34, 40, 64, 255],
        card_winner: [46, 84, 96, 255],
        card_empty: [26, 30, 48, 255],
        name_text: [220, 224, 240, 255],
        subtitle_text: [130, 138, 170, 255],
        connector: [86, 96, 140, 255],
        accent: [120, 160, 255, 255],
        champion: [255, 214, 102, 255],
        particle: [200, 210, 255, 140],
    },
    Theme {
        name: "neon",
        background: [10, 10, 14, 255],
        card: [28, 18, 40, 255],
        card_winner: [24, 64, 48, 255],
        card_empty: [20, 16, 26, 255],
        name_text: [0, 255, 200, 255],
        subtitle_text: [255, 0, 170, 255],
        connector: [255, 0, 170, 255],
        accent: [0, 200, 255, 255],
        champion: [255, 240, 0, 255],
        particle: [0, 255, 200, 170],
    },
    Theme {
        name: "sunset",
        background: [255, 236, 214, 255],
        card: [255, 250, 244, 255],
        card_winner: [255, 204, 170, 255],
        card_empty: [247, 222, 200, 255],
        name_text: [92, 40, 60, 255],
        subtitle_text: [170, 100, 110, 255],
        connector: [214, 120, 100, 255],
        accent: [240, 90, 80, 255],
        champion: [250, 160, 40, 255],
        particle: [240, 90, 80, 150],
    },
];

pub fn lookup_theme(name: &str) -> Option<&'static Theme> {
    let wanted = name.trim();
    THEMES.iter().find(|theme| theme.name.eq_ignore_ascii_case(wanted))
}

/// Resolve a theme by name, falling back to the default palette.
pub fn theme_or_default(name: &str) -> &'static Theme {
    lookup_theme(name).unwrap_or_else(|| {
        warn!("unknown theme \"{name}\", using {DEFAULT_THEME}");
        &THEMES[0]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup_theme("Midnight").unwrap().name, "midnight");
        assert_eq!(lookup_theme(" NEON ").unwrap().name, "neon");
        assert!(lookup_theme("plaid").is_none());
    }

    #[test]
    fn unknown_names_fall_back_to_default() {
        assert_eq!(theme_or_default("plaid").name, DEFAULT_THEME);
        assert_eq!(THEMES[0].name, DEFAULT_THEME);
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<&str> = THEMES.iter().map(|theme| theme.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), THEMES.len());
    }
}
