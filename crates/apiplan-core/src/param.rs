//! Request parameter model
//!
//! Swagger declares where a parameter travels via `in`. Each kind has
//! exactly one serialization rule, so the kinds are a closed variant rather
//! than strings compared at every call site.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Path,
    Query,
    Header,
    FormData,
    Body,
}

impl ParamKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(Self::Path),
            "query" => Some(Self::Query),
            "header" => Some(Self::Header),
            "formData" => Some(Self::FormData),
            "body" => Some(Self::Body),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::FormData => "formData",
            Self::Body => "body",
        }
    }

    /// Kinds that carry payload toward the server. Decides the write side
    /// of a comparison when an annotation names no operation.
    pub const fn is_write(self) -> bool {
        matches!(self, Self::FormData | Self::Body)
    }
}

/// One declared parameter of an operation.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
    pub schema: Value,
}

impl Parameter {
    /// Interpret a raw parameter node. Body parameters carry their schema
    /// verbatim; simple parameters are promoted to a standalone schema node
    /// so one generator handles both shapes.
    pub fn from_node(node: &Value) -> Option<Self> {
        let kind = ParamKind::parse(node.get("in")?.as_str()?)?;
        let name = node
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let description = node
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let required = node
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let schema = match kind {
            ParamKind::Body => node.get("schema").cloned().unwrap_or(Value::Null),
            _ => promote_simple(node),
        };
        Some(Self {
            name,
            kind,
            description,
            required,
            schema,
        })
    }
}

/// Validation keywords a simple (non-body) parameter carries directly.
const SIMPLE_KEYS: [&str; 15] = [
    "type",
    "format",
    "default",
    "enum",
    "pattern",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
    "multipleOf",
    "uniqueItems",
];

/// Copy a simple parameter's validations into a standalone schema node,
/// recursing into `items`.
pub fn promote_simple(node: &Value) -> Value {
    let mut schema = Map::new();
    let Some(obj) = node.as_object() else {
        return Value::Object(schema);
    };
    for key in SIMPLE_KEYS {
        if let Some(value) = obj.get(key) {
            schema.insert(key.to_string(), value.clone());
        }
    }
    if let Some(items) = obj.get("items") {
        schema.insert("items".to_string(), promote_simple(items));
    }
    Value::Object(schema)
}
