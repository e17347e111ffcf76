//! `@meqa[Class:Property].Operation` annotation extraction
//!
//! Descriptions anywhere in the document may carry machine-readable hints
//! linking operations and parameters to definition classes. Only the first
//! hint in a description is honored.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Operation codes usable in the `.op` suffix besides the HTTP verbs.
pub const OP_READ: &str = "read";
pub const OP_WRITE: &str = "write";

/// Class codes recognized in response descriptions.
pub const CLASS_SUCCESS: &str = "success";
pub const CLASS_FAIL: &str = "fail";

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"@meqa\[[A-Za-z]*:?[A-Za-z]*\]\.?[A-Za-z]*").expect("annotation pattern")
    })
}

/// A parsed annotation. Any field may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Annotation {
    /// Name of a schema definition.
    pub class: String,
    /// Field within the class's object schema.
    pub property: String,
    /// Override for the HTTP method's semantic (`read`, `write`, a verb, ...).
    pub operation: String,
}

impl Annotation {
    /// Extract the first annotation from a description, if any.
    ///
    /// `@meqa[Pet:name].update` yields class `Pet`, property `name`,
    /// operation `update`. Either side of the colon may be empty; without a
    /// colon the whole bracket is the class.
    pub fn parse(desc: &str) -> Option<Self> {
        if desc.is_empty() {
            return None;
        }
        let found = tag_pattern().find(desc)?;
        let body = &found.as_str()["@meqa[".len()..];
        let right = body.find(']')?;
        let (class, property) = match body[..right].find(':') {
            Some(colon) => (&body[..colon], &body[colon + 1..right]),
            None => (&body[..right], ""),
        };
        let operation = if right + 1 == body.len() {
            ""
        } else {
            &body[right + 2..]
        };
        Some(Self {
            class: class.to_string(),
            property: property.to_string(),
            operation: operation.to_string(),
        })
    }

    pub fn class_only(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@meqa[{}:{}]", self.class, self.property)?;
        if !self.operation.is_empty() {
            write!(f, ".{}", self.operation)?;
        }
        Ok(())
    }
}
