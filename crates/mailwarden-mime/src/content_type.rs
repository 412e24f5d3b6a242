//! Content type handling.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image").
    pub main_type: String,
    /// Subtype (e.g., "plain", "png").
    pub sub_type: String,
    /// Parameters (e.g., charset=utf-8, name=photo.png).
    pub parameters: HashMap<String, String>,
}

impl ContentType {
    /// Creates a content type. Type and subtype are lowercased.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into().to_lowercase(),
            sub_type: sub_type.into().to_lowercase(),
            parameters: HashMap::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .insert(key.into().to_lowercase(), value.into());
        self
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the name parameter (usually the attachment filename).
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.parameters.get("name").map(String::as_str)
    }

    /// Checks for a text type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type == "text"
    }

    /// Checks for `text/plain` specifically.
    #[must_use]
    pub fn is_text_plain(&self) -> bool {
        self.main_type == "text" && self.sub_type == "plain"
    }

    /// Checks for an `image/*` type.
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.main_type == "image"
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="value 2"`
    ///
    /// # Errors
    ///
    /// Returns an error if the `type/subtype` part is missing or empty.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');

        let type_str = parts
            .next()
            .ok_or_else(|| Error::InvalidContentType("empty content type".to_string()))?
            .trim();

        let (main_type, sub_type) = type_str
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(format!("missing subtype in {type_str:?}")))?;
        if main_type.trim().is_empty() || sub_type.trim().is_empty() {
            return Err(Error::InvalidContentType(format!(
                "empty type or subtype in {type_str:?}"
            )));
        }

        let mut content_type = Self::new(main_type.trim(), sub_type.trim());
        for param in parts {
            if let Some((key, value)) = param.trim().split_once('=') {
                content_type.parameters.insert(
                    key.trim().to_lowercase(),
                    value.trim().trim_matches('"').to_string(),
                );
            }
        }

        Ok(content_type)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)?;

        let mut params: Vec<_> = self.parameters.iter().collect();
        params.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (key, value) in params {
            if value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c)) {
                write!(f, "; {key}=\"{value}\"")?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lowercases() {
        let ct = ContentType::new("IMAGE", "PNG");
        assert_eq!(ct.main_type, "image");
        assert_eq!(ct.sub_type, "png");
        assert!(ct.is_image());
        assert!(!ct.is_text());
    }

    #[test]
    fn test_parse_with_charset() {
        let ct = ContentType::parse("text/plain; charset=utf-8").unwrap();
        assert!(ct.is_text_plain());
        assert_eq!(ct.charset(), Some("utf-8"));
    }

    #[test]
    fn test_parse_quoted_name() {
        let ct = ContentType::parse("image/jpeg; name=\"team photo.jpg\"").unwrap();
        assert!(ct.is_image());
        assert_eq!(ct.name(), Some("team photo.jpg"));
    }

    #[test]
    fn test_parse_rejects_missing_subtype() {
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("text/").is_err());
        assert!(ContentType::parse("/plain").is_err());
    }

    #[test]
    fn test_with_parameter() {
        let ct = ContentType::new("text", "plain").with_parameter("Charset", "iso-8859-1");
        assert_eq!(ct.charset(), Some("iso-8859-1"));
    }

    #[test]
    fn test_display_quotes_when_needed() {
        let ct = ContentType::new("image", "png").with_parameter("name", "team photo.png");
        assert_eq!(ct.to_string(), "image/png; name=\"team photo.png\"");

        let ct = ContentType::new("text", "plain").with_parameter("charset", "utf-8");
        assert_eq!(ct.to_string(), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_display_parse_round_trip() {
        let ct = ContentType::new("image", "jpeg").with_parameter("name", "a.jpg");
        let reparsed = ContentType::parse(&ct.to_string()).unwrap();
        assert_eq!(ct, reparsed);
    }
}
