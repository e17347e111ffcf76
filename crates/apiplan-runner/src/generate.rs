//! Schema-directed value synthesis
//!
//! Walks a schema node (following `$ref`s, honoring annotations) and
//! produces a conforming value. A tag naming a class property reuses
//! shadow-store state before inventing anything fresh; that is what lets a
//! `GET /pets/{id}` test pick up an id a prior `POST /pets` created.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::rngs::SmallRng;
use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

use apiplan_core::annotation::Annotation;
use apiplan_core::document::MAX_REF_DEPTH;
use apiplan_core::{Error, MatchMode, Object, ParamKind, Parameter};

use crate::exec::{Comparison, Exec, Session};

impl Exec {
    /// Produce a value for one declared parameter.
    pub(crate) fn generate_parameter(
        &mut self,
        session: &mut Session,
        param: &Parameter,
    ) -> Result<Value, Error> {
        let tag = Annotation::parse(&param.description);
        if param.kind == ParamKind::Body {
            let schema = param.schema.clone();
            return self.generate_schema(session, &param.name, tag.as_ref(), &schema, 0);
        }
        let schema = param.schema.clone();
        if let Some(values) = schema.get("enum").and_then(Value::as_array) {
            if !values.is_empty() {
                return Ok(generate_enum(values, &mut session.rng));
            }
        }
        match schema.get("type").and_then(Value::as_str) {
            None => Err(Error::invalid("parameter doesn't have a type")),
            Some("object") => self.generate_object(session, "param_", tag.as_ref(), &schema, 0),
            Some("array") => self.generate_array(session, "param_", tag.as_ref(), &schema, 0),
            Some(_) => {
                let prefix = format!("{}_", param.name);
                let value = self.generate_by_type(session, &schema, &prefix, tag.as_ref())?;
                self.add_basic_comparison(&session.db, tag.as_ref(), param.kind, &value);
                Ok(value)
            }
        }
    }

    /// Generate a value for any schema node, following `$ref`s. A ref chain
    /// propagates the nearest annotation under the referent's class name;
    /// past the depth cap a cycle degrades to an empty object.
    pub(crate) fn generate_schema(
        &mut self,
        session: &mut Session,
        name: &str,
        tag: Option<&Annotation>,
        schema: &Value,
        depth: usize,
    ) -> Result<Value, Error> {
        if depth > MAX_REF_DEPTH {
            return Ok(json!({}));
        }
        let referred = {
            let doc = session.db.document();
            doc.ref_target(schema)?
                .map(|(ref_name, target)| (ref_name.to_string(), target.clone()))
        };
        if let Some((ref_name, target)) = referred {
            let derived = match tag {
                Some(tag) => Annotation {
                    class: ref_name,
                    property: tag.property.clone(),
                    operation: tag.operation.clone(),
                },
                None => Annotation::class_only(ref_name),
            };
            return self.generate_schema(session, name, Some(&derived), &target, depth + 1);
        }
        if let Some(values) = schema.get("enum").and_then(Value::as_array) {
            if !values.is_empty() {
                return Ok(generate_enum(values, &mut session.rng));
            }
        }
        match schema.get("type").and_then(Value::as_str) {
            None => Err(Error::invalid("parameter doesn't have a type")),
            Some("object") => self.generate_object(session, name, tag, schema, depth),
            Some("array") => self.generate_array(session, name, tag, schema, depth),
            Some(_) => self.generate_by_type(session, schema, name, tag),
        }
    }

    /// Build an object property by property, then register it with the
    /// comparison ledger under its effective class: the annotation's class
    /// when present, else whatever definition the field set matches.
    fn generate_object(
        &mut self,
        session: &mut Session,
        name: &str,
        parent_tag: Option<&Annotation>,
        schema: &Value,
        depth: usize,
    ) -> Result<Value, Error> {
        let mut obj = Object::new();
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (prop, prop_schema) in properties {
                let prop_tag = prop_schema
                    .get("description")
                    .and_then(Value::as_str)
                    .and_then(Annotation::parse);
                let tag = prop_tag.as_ref().or(parent_tag);
                let value =
                    self.generate_schema(session, &format!("{prop}_"), tag, prop_schema, depth)?;
                obj.insert(prop.clone(), value);
            }
        }

        let own_tag = schema
            .get("description")
            .and_then(Value::as_str)
            .and_then(Annotation::parse);
        let tag = own_tag.as_ref().or(parent_tag);
        let op = self.effective_op();
        let mut class = tag.map(|tag| tag.class.clone()).unwrap_or_default();
        if class.is_empty() {
            match session.db.find_matching_schema(&obj) {
                Some((matched, _)) => class = matched,
                None => {
                    debug!(object = name, "no known schema matches the generated object");
                    return Ok(Value::Object(obj));
                }
            }
        }
        self.add_object_comparison(&class, &op, obj.clone(), Some(schema.clone()));
        Ok(Value::Object(obj))
    }

    fn generate_array(
        &mut self,
        session: &mut Session,
        name: &str,
        parent_tag: Option<&Annotation>,
        schema: &Value,
        depth: usize,
    ) -> Result<Value, Error> {
        let min_items = schema
            .get("minItems")
            .and_then(Value::as_i64)
            .map(|v| v.max(0));
        let max_items = schema
            .get("maxItems")
            .and_then(Value::as_i64)
            .map(|v| v.max(0));
        let count = if min_items.is_some() || max_items.is_some() {
            let min = min_items.unwrap_or(0);
            let spread = (max_items.unwrap_or(0) - min).max(1);
            session.rng.gen_range(0..spread) + min
        } else {
            session.rng.gen_range(0..10)
        };

        let items = schema
            .get("items")
            .ok_or_else(|| Error::invalid("array schema has no items"))?;
        let item_schema = match items {
            Value::Array(list) => list
                .first()
                .ok_or_else(|| Error::invalid("array schema has no items"))?
                .clone(),
            other => other.clone(),
        };

        let own_tag = schema
            .get("description")
            .and_then(Value::as_str)
            .and_then(Annotation::parse);
        let tag = own_tag.as_ref().or(parent_tag);

        let unique = schema
            .get("uniqueItems")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for _ in 0..count {
            let entry = self.generate_schema(session, name, tag, &item_schema, depth)?;
            if unique {
                // Composite items dedup by their JSON encoding.
                if !seen.insert(entry.to_string()) {
                    continue;
                }
            }
            out.push(entry);
        }
        Ok(Value::Array(out))
    }

    /// Scalar synthesis. A tag naming a class property first tries values
    /// already captured this test, then live shadow-store objects, and only
    /// then falls back to a fresh sample.
    pub(crate) fn generate_by_type(
        &mut self,
        session: &mut Session,
        schema: &Value,
        prefix: &str,
        parent_tag: Option<&Annotation>,
    ) -> Result<Value, Error> {
        let own_tag = schema
            .get("description")
            .and_then(Value::as_str)
            .and_then(Annotation::parse);
        let tag = own_tag.as_ref().or(parent_tag);
        if let Some(tag) = tag {
            if !tag.property.is_empty() {
                if let Some(entries) = self.comparisons.get(&tag.class) {
                    for comparison in entries {
                        if let Some(old) = &comparison.old {
                            return Ok(old.get(&tag.property).cloned().unwrap_or(Value::Null));
                        }
                    }
                }
                let candidates = session.db.find(&tag.class, None, MatchMode::Always, 5);
                if !candidates.is_empty() {
                    let picked = candidates[session.rng.gen_range(0..candidates.len())].clone();
                    let value = picked.get(&tag.property).cloned().unwrap_or(Value::Null);
                    let schema = session.db.schema(&tag.class).cloned();
                    self.comparisons
                        .entry(tag.class.clone())
                        .or_default()
                        .push(Comparison {
                            old: Some(picked),
                            new: None,
                            schema,
                        });
                    return Ok(value);
                }
            }
        }

        match schema.get("type").and_then(Value::as_str) {
            Some("boolean") => Ok(Value::Bool(session.rng.gen_range(0..2) == 0)),
            Some("integer") => generate_integer(schema, &mut session.rng).map(Value::from),
            Some("number") => generate_number(schema, &mut session.rng).map(|n| json!(n)),
            Some("string") => {
                generate_string(schema, prefix, &mut session.rng).map(Value::String)
            }
            other => Err(Error::invalid(format!(
                "unrecognized type: {}",
                other.unwrap_or("")
            ))),
        }
    }

    /// The effective class of an object (or array-of-object) schema,
    /// together with the object schema itself. Primitives and enums yield
    /// nothing.
    pub(crate) fn schema_root_type(
        &self,
        session: &Session,
        schema: &Value,
        tag: Option<Annotation>,
        depth: usize,
    ) -> Result<(Option<Annotation>, Option<Value>), Error> {
        if depth > MAX_REF_DEPTH {
            return Ok((None, None));
        }
        let tag = schema
            .get("description")
            .and_then(Value::as_str)
            .and_then(Annotation::parse)
            .or(tag);
        let doc = session.db.document();
        match doc.ref_target(schema) {
            Err(err) => {
                debug!(%err, "reference resolution failed");
                return Ok((None, None));
            }
            Ok(Some((ref_name, target))) => {
                let tag = Some(tag.unwrap_or_else(|| Annotation::class_only(ref_name)));
                let target = target.clone();
                return self.schema_root_type(session, &target, tag, depth + 1);
            }
            Ok(None) => {}
        }
        if schema
            .get("enum")
            .and_then(Value::as_array)
            .is_some_and(|values| !values.is_empty())
        {
            return Ok((None, None));
        }
        let Some(kind) = schema.get("type").and_then(Value::as_str) else {
            return Ok((None, None));
        };
        match kind {
            "array" => {
                let Some(items) = schema.get("items") else {
                    return Ok((None, None));
                };
                let item_schema = match items {
                    Value::Array(list) => list.first().cloned(),
                    other => Some(other.clone()),
                };
                let Some(item_schema) = item_schema else {
                    return Ok((None, None));
                };
                self.schema_root_type(session, &item_schema, tag, depth)
            }
            "object" => Ok((tag, Some(schema.clone()))),
            _ => Ok((None, None)),
        }
    }
}

pub(crate) fn generate_enum(values: &[Value], rng: &mut SmallRng) -> Value {
    values[rng.gen_range(0..values.len())].clone()
}

/// Uniform sample honoring min/max and the exclusive flags (nudged by
/// 0.01). A degenerate range widens around whichever bound is present;
/// truly conflicting bounds are an error.
pub(crate) fn generate_number(schema: &Value, rng: &mut SmallRng) -> Result<f64, Error> {
    let minimum = schema.get("minimum").and_then(Value::as_f64);
    let maximum = schema.get("maximum").and_then(Value::as_f64);
    let exclusive_min = schema
        .get("exclusiveMinimum")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let exclusive_max = schema
        .get("exclusiveMaximum")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut lo = minimum.unwrap_or(0.0);
    if minimum.is_some() && exclusive_min {
        lo += 0.01;
    }
    let mut hi = maximum.unwrap_or(0.0);
    if maximum.is_some() && exclusive_max {
        hi -= 0.01;
    }

    if lo >= hi {
        match (minimum, maximum) {
            (None, None) => {
                lo = -1.0;
                hi = 1.0;
            }
            (Some(_), None) => hi = lo + lo.abs(),
            (None, Some(_)) => lo = hi - hi.abs(),
            (Some(min), Some(max)) => {
                return Err(Error::invalid(format!(
                    "minimum {min} conflicts with maximum {max}"
                )))
            }
        }
    }
    Ok(rng.gen_range(0.0..1.0) * (hi - lo) + lo)
}

/// Integers ride the number rule, truncate toward zero, and are bumped one
/// past an inclusive minimum they landed on. Unbounded schemas default to a
/// maximum of 10000.
pub(crate) fn generate_integer(schema: &Value, rng: &mut SmallRng) -> Result<i64, Error> {
    let minimum = schema.get("minimum").and_then(Value::as_f64);
    let maximum = schema.get("maximum").and_then(Value::as_f64);
    let bounded;
    let schema = if minimum.is_none() && maximum.is_none() {
        let mut copy = schema.as_object().cloned().unwrap_or_default();
        copy.insert("maximum".to_string(), json!(10000.0));
        bounded = Value::Object(copy);
        &bounded
    } else {
        schema
    };
    let sample = generate_number(schema, rng)?;
    let mut value = sample as i64;
    if let Some(min) = minimum {
        if value <= min as i64 {
            value += 1;
        }
    }
    Ok(value)
}

/// Strings follow the format first (`date`, `date-time`), then the pattern
/// (falling back to `<prefix>\d+`), then the encoding the format demands.
pub(crate) fn generate_string(
    schema: &Value,
    prefix: &str,
    rng: &mut SmallRng,
) -> Result<String, Error> {
    let format = schema.get("format").and_then(Value::as_str).unwrap_or("");
    if format == "date-time" {
        return Ok(random_recent_time(rng).to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    if format == "date" {
        return Ok(random_recent_time(rng).format("%Y-%m-%d").to_string());
    }

    let (pattern, length) = match schema.get("pattern").and_then(Value::as_str) {
        Some(pattern) if !pattern.is_empty() => (pattern.to_string(), pattern.len() * 2),
        _ => (format!("{prefix}\\d+"), prefix.len() + 5),
    };
    let sample = sample_pattern(&pattern, length as u32, rng)?;

    match format {
        "" | "password" => Ok(sample),
        "byte" => Ok(BASE64.encode(sample.as_bytes())),
        "binary" => Ok(hex::encode(sample.as_bytes())),
        other => Err(Error::invalid(format!("invalid format string: {other}"))),
    }
}

/// Uniform instant in the last 30 days.
fn random_recent_time(rng: &mut SmallRng) -> DateTime<Utc> {
    let window = Duration::days(30).num_seconds();
    Utc::now() - Duration::seconds(rng.gen_range(0..window))
}

/// Sample a string matching `pattern`. The HIR is built with unicode off so
/// classes like `\d` stay ASCII; `max_repeat` caps unbounded quantifiers.
fn sample_pattern(pattern: &str, max_repeat: u32, rng: &mut SmallRng) -> Result<String, Error> {
    let hir = regex_syntax::ParserBuilder::new()
        .unicode(false)
        .utf8(false)
        .build()
        .parse(strip_anchors(pattern))
        .map_err(|e| Error::invalid(e.to_string()))?;
    let sampler =
        rand_regex::Regex::with_hir(hir, max_repeat).map_err(|e| Error::invalid(e.to_string()))?;
    let bytes: Vec<u8> = rng.sample(&sampler);
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Anchors constrain matching, not generation; a leading `^` and an
/// unescaped trailing `$` are dropped before sampling.
fn strip_anchors(pattern: &str) -> &str {
    let pattern = pattern.strip_prefix('^').unwrap_or(pattern);
    match pattern.strip_suffix('$') {
        Some(rest) if !rest.ends_with('\\') => rest,
        _ => pattern,
    }
}
