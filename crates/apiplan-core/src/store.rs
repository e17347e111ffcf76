//! Shadow store: the in-memory model of server state
//!
//! One ordered collection of objects per definition class. The store is
//! mutated only while reconciling a successful test, so every later test
//! observes the net effect of each earlier one.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::document::Document;
use crate::error::Error;

/// A stored row: field name to value.
pub type Object = Map<String, Value>;

/// Row-matching policy for find/update/delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Match every row.
    Always,
    /// Match rows agreeing with every field of the key.
    AllFields,
}

impl MatchMode {
    fn matches(self, key: Option<&Object>, row: &Object) -> bool {
        match self {
            Self::Always => true,
            Self::AllFields => key.map_or(true, |key| {
                key.iter().all(|(name, value)| row.get(name) == Some(value))
            }),
        }
    }
}

/// Every field of `inner` present and equal in `outer`. Response rows are
/// compared as supersets of stored rows, since servers may attach computed
/// fields.
pub fn covers(outer: &Object, inner: &Object) -> bool {
    inner
        .iter()
        .all(|(name, value)| outer.get(name) == Some(value))
}

/// The shadow store, owning the document its classes are defined in.
pub struct Db {
    document: Document,
    tables: BTreeMap<String, Vec<Object>>,
}

impl Db {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            tables: BTreeMap::new(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Schema of a definition class, if declared.
    pub fn schema(&self, class: &str) -> Option<&Value> {
        self.document.definition(class)
    }

    /// Up to `limit` matching rows in insertion order; a negative limit is
    /// unbounded.
    pub fn find(&self, class: &str, key: Option<&Object>, mode: MatchMode, limit: i64) -> Vec<Object> {
        let Some(rows) = self.tables.get(class) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for row in rows {
            if limit >= 0 && out.len() as i64 >= limit {
                break;
            }
            if mode.matches(key, row) {
                out.push(row.clone());
            }
        }
        out
    }

    /// Validate `obj` against `schema` and append it under `class`.
    pub fn insert(&mut self, class: &str, schema: Option<&Value>, obj: Object) -> Result<(), Error> {
        match schema {
            Some(schema) => {
                if !self.document.matches(schema, &Value::Object(obj.clone())) {
                    return Err(Error::invalid(format!(
                        "object does not conform to the schema of {class}"
                    )));
                }
            }
            None => debug!(class, "inserting without a schema to validate against"),
        }
        self.tables.entry(class.to_string()).or_default().push(obj);
        Ok(())
    }

    /// Replace (`merge = false`) or field-merge (`merge = true`) up to
    /// `limit` matching rows. Returns the number of rows touched.
    pub fn update(
        &mut self,
        class: &str,
        key: Option<&Object>,
        mode: MatchMode,
        patch: &Object,
        limit: i64,
        merge: bool,
    ) -> usize {
        let Some(rows) = self.tables.get_mut(class) else {
            return 0;
        };
        let mut touched = 0usize;
        for row in rows.iter_mut() {
            if limit >= 0 && touched as i64 >= limit {
                break;
            }
            if !mode.matches(key, row) {
                continue;
            }
            if merge {
                for (name, value) in patch {
                    row.insert(name.clone(), value.clone());
                }
            } else {
                *row = patch.clone();
            }
            touched += 1;
        }
        touched
    }

    /// Remove up to `limit` matching rows in place. Returns the number
    /// removed.
    pub fn delete(&mut self, class: &str, key: Option<&Object>, mode: MatchMode, limit: i64) -> usize {
        let Some(rows) = self.tables.get_mut(class) else {
            return 0;
        };
        let mut removed = 0i64;
        rows.retain(|row| {
            if (limit < 0 || removed < limit) && mode.matches(key, row) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed as usize
    }

    /// First definition, in name order, whose required properties are all
    /// keys of `obj`.
    pub fn find_matching_schema(&self, obj: &Object) -> Option<(String, Value)> {
        for (name, schema) in self.document.definitions()? {
            let required = schema.get("required").and_then(Value::as_array);
            let all_present = required.map_or(true, |names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .all(|field| obj.contains_key(field))
            });
            if all_present {
                return Some((name.clone(), schema.clone()));
            }
        }
        None
    }
}
