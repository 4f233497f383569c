//! Directive classification of chat content.
//!
//! Admin directives ride the ordinary chat stream, marked by a reserved
//! prefix at the start of the (trimmed) content. Anything else is plain
//! chat regardless of who sent it.

use serde::Deserialize;

use crate::error::{Result, StagecastError};

pub const THEME_ID: &str = "[THEME]";
pub const CAPTION_ID: &str = "[CAPTION]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    PlainChat,
    ThemeChange,
    Caption,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    PlainChat(String),
    ThemeChange(String),
    Caption(String),
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Directive::PlainChat(_) => DirectiveKind::PlainChat,
            Directive::ThemeChange(_) => DirectiveKind::ThemeChange,
            Directive::Caption(_) => DirectiveKind::Caption,
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            Directive::PlainChat(text) | Directive::ThemeChange(text) | Directive::Caption(text) => {
                text
            }
        }
    }

    pub fn into_payload(self) -> String {
        match self {
            Directive::PlainChat(text) | Directive::ThemeChange(text) | Directive::Caption(text) => {
                text
            }
        }
    }
}

/// Reserved prefixes. Must be non-empty, distinct, and neither may be a
/// prefix of the other, otherwise classification would depend on order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DirectivePrefixes {
    pub theme: String,
    pub caption: String,
}

impl Default for DirectivePrefixes {
    fn default() -> Self {
        Self {
            theme: THEME_ID.to_string(),
            caption: CAPTION_ID.to_string(),
        }
    }
}

impl DirectivePrefixes {
    pub fn new(theme: impl Into<String>, caption: impl Into<String>) -> Result<Self> {
        let prefixes = Self {
            theme: theme.into(),
            caption: caption.into(),
        };
        prefixes.validate()?;
        Ok(prefixes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.theme.trim().is_empty() || self.caption.trim().is_empty() {
            return Err(StagecastError::ConfigError(
                "Directive prefixes must not be empty".into(),
            ));
        }
        if self.theme.starts_with(&self.caption) || self.caption.starts_with(&self.theme) {
            return Err(StagecastError::ConfigError(format!(
                "Directive prefixes overlap: '{}' and '{}'",
                self.theme, self.caption
            )));
        }
        Ok(())
    }

    pub fn classify(&self, content: &str) -> Directive {
        let trimmed = content.trim();
        if let Some(rest) = trimmed.strip_prefix(self.theme.as_str()) {
            return Directive::ThemeChange(rest.trim().to_string());
        }
        if let Some(rest) = trimmed.strip_prefix(self.caption.as_str()) {
            return Directive::Caption(rest.trim().to_string());
        }
        Directive::PlainChat(content.to_string())
    }

    pub fn prefix_for(&self, kind: DirectiveKind) -> Option<&str> {
        match kind {
            DirectiveKind::PlainChat => None,
            DirectiveKind::ThemeChange => Some(&self.theme),
            DirectiveKind::Caption => Some(&self.caption),
        }
    }
}

/// Classifies with the default prefixes.
pub fn classify(content: &str) -> Directive {
    DirectivePrefixes::default().classify(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_payload_is_trimmed() {
        assert_eq!(classify("[CAPTION] Hello "), Directive::Caption("Hello".into()));
    }

    #[test]
    fn theme_with_leading_whitespace() {
        assert_eq!(
            classify("   [THEME]   Robots"),
            Directive::ThemeChange("Robots".into())
        );
    }

    #[test]
    fn plain_chat_keeps_original_content() {
        assert_eq!(classify("  hi there "), Directive::PlainChat("  hi there ".into()));
        assert_eq!(classify("say [THEME] later"), Directive::PlainChat("say [THEME] later".into()));
        assert_eq!(classify(""), Directive::PlainChat(String::new()));
    }

    #[test]
    fn reapplying_prefix_is_idempotent() {
        let prefixes = DirectivePrefixes::default();
        for content in ["[THEME]  Cats and dogs", "[CAPTION]x", "[CAPTION]", "plain"] {
            let first = prefixes.classify(content);
            let rebuilt = match prefixes.prefix_for(first.kind()) {
                Some(prefix) => format!("{prefix}{}", first.payload()),
                None => first.payload().to_string(),
            };
            assert_eq!(prefixes.classify(&rebuilt), first, "content: {content:?}");
        }
    }

    #[test]
    fn overlapping_prefixes_rejected() {
        assert!(DirectivePrefixes::new("!t", "!tc").is_err());
        assert!(DirectivePrefixes::new("!t", "!t").is_err());
        assert!(DirectivePrefixes::new("", "!c").is_err());
        assert!(DirectivePrefixes::new("!t", "!c").is_ok());
    }
}
