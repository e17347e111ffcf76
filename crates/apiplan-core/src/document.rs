//! Swagger 2.0 document access
//!
//! The document is kept as raw `serde_json::Value` and navigated field by
//! field; only the subset the engine consumes is interpreted.

use std::fmt;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::Error;

/// Cap on followed `$ref` hops. Cycles degrade to a bare node instead of
/// recursing forever; plain nesting is finite and not counted.
pub const MAX_REF_DEPTH: usize = 8;

const REF_PREFIX: &str = "#/definitions/";

/// The seven HTTP methods a path item may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Head,
    Patch,
    Options,
}

impl Method {
    pub const ALL: [Method; 7] = [
        Method::Get,
        Method::Put,
        Method::Post,
        Method::Delete,
        Method::Head,
        Method::Patch,
        Method::Options,
    ];

    /// Case-insensitive parse; anything outside the seven methods is
    /// `Invalid`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "put" => Ok(Self::Put),
            "post" => Ok(Self::Post),
            "delete" => Ok(Self::Delete),
            "head" => Ok(Self::Head),
            "patch" => Ok(Self::Patch),
            "options" => Ok(Self::Options),
            other => Err(Error::invalid(format!("unknown method: {other}"))),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Post => "post",
            Self::Delete => "delete",
            Self::Head => "head",
            Self::Patch => "patch",
            Self::Options => "options",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed Swagger document.
pub struct Document {
    root: Value,
}

impl Document {
    pub fn from_value(root: Value) -> Result<Self, Error> {
        if !root.is_object() {
            return Err(Error::Parse("document root is not an object".into()));
        }
        Ok(Self { root })
    }

    /// Load from disk, picking JSON or YAML by extension, then falling back
    /// to content sniffing (a leading `{` means JSON).
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(path.to_path_buf(), e.to_string()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let root = match ext.as_str() {
            "yaml" | "yml" => from_yaml(&content)?,
            "json" => from_json(&content)?,
            _ => {
                if content.trim_start().starts_with('{') {
                    from_json(&content)?
                } else {
                    from_yaml(&content)?
                }
            }
        };
        Self::from_value(root)
    }

    /// Base endpoint of the described service. The scheme prefers `http`,
    /// then `https`, then the first declared scheme, defaulting to `http`.
    pub fn base_url(&self) -> String {
        let schemes: Vec<&str> = self
            .root
            .get("schemes")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let scheme = if schemes.is_empty() || schemes.contains(&"http") {
            "http"
        } else if schemes.contains(&"https") {
            "https"
        } else {
            schemes[0]
        };
        let host = self.root.get("host").and_then(Value::as_str).unwrap_or("");
        let base_path = self
            .root
            .get("basePath")
            .and_then(Value::as_str)
            .unwrap_or("");
        format!("{scheme}://{host}{base_path}")
    }

    pub fn path_item(&self, path: &str) -> Option<&Value> {
        self.root.get("paths")?.get(path)
    }

    pub fn operation(&self, path: &str, method: Method) -> Option<&Value> {
        self.path_item(path)?.get(method.as_str())
    }

    /// Definitions in name order.
    pub fn definitions(&self) -> Option<&Map<String, Value>> {
        self.root.get("definitions").and_then(Value::as_object)
    }

    pub fn definition(&self, name: &str) -> Option<&Value> {
        self.root.get("definitions")?.get(name)
    }

    /// Resolve a node's `$ref`, returning the referent's name and schema.
    /// `Ok(None)` when the node carries no `$ref`.
    pub fn ref_target<'a>(&self, schema: &'a Value) -> Result<Option<(&'a str, &Value)>, Error> {
        let Some(reference) = schema.get("$ref").and_then(Value::as_str) else {
            return Ok(None);
        };
        let name = reference
            .strip_prefix(REF_PREFIX)
            .ok_or_else(|| Error::invalid(format!("unsupported reference: {reference}")))?;
        let target = self
            .definition(name)
            .ok_or_else(|| Error::not_found(format!("definition {name} not in document")))?;
        Ok(Some((name, target)))
    }

    /// Deep copy of a schema with every `$ref` inlined and the boolean
    /// exclusive bounds rewritten to numeric form, ready for a validator.
    /// Depth-capped, so cycles degrade to the raw node.
    pub fn resolved(&self, schema: &Value) -> Value {
        self.resolved_inner(schema, 0)
    }

    fn resolved_inner(&self, schema: &Value, depth: usize) -> Value {
        if depth > MAX_REF_DEPTH {
            return schema.clone();
        }
        match schema {
            Value::Object(obj) => {
                if let Ok(Some((_, target))) = self.ref_target(schema) {
                    return self.resolved_inner(target, depth + 1);
                }
                let mut out: Map<String, Value> = obj
                    .iter()
                    .map(|(k, v)| (k.clone(), self.resolved_inner(v, depth)))
                    .collect();
                normalize_exclusive_bounds(&mut out);
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.resolved_inner(v, depth))
                    .collect(),
            ),
            _ => schema.clone(),
        }
    }

    /// Whether `instance` validates against `schema`.
    pub fn matches(&self, schema: &Value, instance: &Value) -> bool {
        let resolved = self.resolved(schema);
        match jsonschema::validator_for(&resolved) {
            Ok(validator) => validator.is_valid(instance),
            Err(_) => false,
        }
    }
}

/// Swagger expresses exclusivity as a boolean next to `minimum`/`maximum`;
/// validators expect the numeric form.
fn normalize_exclusive_bounds(schema: &mut Map<String, Value>) {
    for (bound, flag) in [
        ("minimum", "exclusiveMinimum"),
        ("maximum", "exclusiveMaximum"),
    ] {
        let Some(exclusive) = schema.get(flag).and_then(Value::as_bool) else {
            continue;
        };
        if exclusive {
            if let Some(limit) = schema.remove(bound) {
                schema.insert(flag.to_string(), limit);
                continue;
            }
        }
        schema.remove(flag);
    }
}

fn from_json(content: &str) -> Result<Value, Error> {
    serde_json::from_str(content).map_err(|e| Error::Parse(format!("invalid JSON: {e}")))
}

fn from_yaml(content: &str) -> Result<Value, Error> {
    serde_yml::from_str(content).map_err(|e| Error::Parse(format!("invalid YAML: {e}")))
}
