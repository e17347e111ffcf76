//! Test execution
//!
//! A test is duplicated, merged with its parent, resolved against the
//! document, dispatched, validated and finally reconciled against the
//! shadow store. Ref tests skip straight back into the plan.

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use apiplan_core::annotation::{Annotation, CLASS_FAIL, OP_READ, OP_WRITE};
use apiplan_core::{covers, Db, Error, MatchMode, Method, Object, ParamKind, Parameter};

use crate::plan::Plan;
use crate::transport::{Request, Response, Transport};

/// Recognized key in a test's `expect` map.
pub const EXPECT_STATUS: &str = "status";

/// Execution context shared by every test of one plan run.
pub struct Session {
    pub db: Db,
    pub rng: SmallRng,
    pub base_url: String,
    pub headers: Vec<(String, String)>,
    pub transport: Box<dyn Transport>,
}

impl Session {
    /// A fixed `seed` makes the whole run reproducible; absent, the RNG
    /// draws from OS entropy.
    pub fn new(db: Db, transport: Box<dyn Transport>, seed: Option<u64>) -> Self {
        let base_url = db.document().base_url();
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            db,
            rng,
            base_url,
            headers: Vec::new(),
            transport,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }
}

/// One user-declared test, as written in the plan.
///
/// With `ref` set, the other fields are overrides handed to the referenced
/// test; otherwise `path` and `method` must resolve to an operation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestCase {
    pub name: String,
    pub path: String,
    pub method: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub expect: Map<String, Value>,
    pub query_params: Map<String, Value>,
    pub body_params: Option<Value>,
    pub form_params: Map<String, Value>,
    pub path_params: Map<String, Value>,
    pub header_params: Map<String, Value>,
}

impl TestCase {
    /// Run this test. `parent` is set when invoked through another test's
    /// ref; the copy taken here keeps the declared parameter maps pristine
    /// across runs.
    pub fn run(
        &self,
        plan: &Plan,
        session: &mut Session,
        parent: Option<&TestCase>,
    ) -> Result<Vec<Value>, Error> {
        let mut case = self.clone();
        case.method = case.method.to_ascii_lowercase();
        if let Some(parent) = parent {
            case.merge_parent(parent);
        }
        if !case.ref_name.is_empty() {
            return plan.run(&case.ref_name, session, Some(&case));
        }
        let mut exec = Exec::prepare(case, session)?;
        exec.resolve_parameters(session)?;
        let response = exec.dispatch(session)?;
        exec.process_result(session, &response)
    }

    /// Fill in parameters from the invoking test. The child wins on
    /// conflicts; bodies merge field-wise only when both are mappings.
    fn merge_parent(&mut self, parent: &TestCase) {
        merge_missing(&mut self.query_params, &parent.query_params);
        merge_missing(&mut self.path_params, &parent.path_params);
        merge_missing(&mut self.header_params, &parent.header_params);
        merge_missing(&mut self.form_params, &parent.form_params);

        let Some(parent_body) = &parent.body_params else {
            return;
        };
        match &mut self.body_params {
            None => self.body_params = Some(parent_body.clone()),
            Some(Value::Object(body)) if parent_body.is_object() => {
                if let Value::Object(parent_map) = parent_body {
                    merge_missing(body, parent_map);
                }
            }
            Some(body) => {
                if std::mem::discriminant(body) == std::mem::discriminant(parent_body) {
                    *body = parent_body.clone();
                } else {
                    debug!(test = %self.name, "parent body dropped: container kinds differ");
                }
            }
        }
    }

    fn params_mut(&mut self, kind: ParamKind) -> Option<&mut Map<String, Value>> {
        match kind {
            ParamKind::Path => Some(&mut self.path_params),
            ParamKind::Query => Some(&mut self.query_params),
            ParamKind::Header => Some(&mut self.header_params),
            ParamKind::FormData => Some(&mut self.form_params),
            ParamKind::Body => None,
        }
    }
}

fn merge_missing(child: &mut Map<String, Value>, parent: &Map<String, Value>) {
    for (name, value) in parent {
        child.entry(name.clone()).or_insert_with(|| value.clone());
    }
}

/// What one test intends for one class, paired with what the server should
/// reflect afterwards.
///
/// POST: `old` empty, `new` the created object. PUT/PATCH: `old` the
/// lookup key, `new` the update. GET: `old` the query key. DELETE: `old`
/// the lookup key.
#[derive(Debug, Clone, Default)]
pub(crate) struct Comparison {
    pub(crate) old: Option<Object>,
    pub(crate) new: Option<Object>,
    pub(crate) schema: Option<Value>,
}

impl Comparison {
    /// The side an operation fills: reads describe the lookup key, all
    /// other operations the new value.
    fn side_mut(&mut self, op: &str) -> &mut Object {
        if op == OP_READ {
            self.old.get_or_insert_with(Object::new)
        } else {
            self.new.get_or_insert_with(Object::new)
        }
    }
}

/// A test in flight: the merged case plus the resolved operation and the
/// per-test comparison ledger. Never reused across runs.
pub(crate) struct Exec {
    pub(crate) case: TestCase,
    pub(crate) method: Method,
    pub(crate) tag: Option<Annotation>,
    pub(crate) op: Value,
    pub(crate) params: Vec<Parameter>,
    pub(crate) comparisons: BTreeMap<String, Vec<Comparison>>,
}

impl Exec {
    /// Look the operation up and record its annotation. Parameters are
    /// collected from the path item and the operation.
    pub(crate) fn prepare(case: TestCase, session: &Session) -> Result<Self, Error> {
        let method = Method::parse(&case.method)?;
        let doc = session.db.document();
        let op = doc
            .operation(&case.path, method)
            .ok_or_else(|| {
                Error::not_found(format!("{} {} not in document", case.method, case.path))
            })?
            .clone();
        let tag = op
            .get("description")
            .and_then(Value::as_str)
            .and_then(Annotation::parse);
        let mut params = Vec::new();
        for source in [
            doc.path_item(&case.path).and_then(|item| item.get("parameters")),
            op.get("parameters"),
        ] {
            if let Some(list) = source.and_then(Value::as_array) {
                params.extend(list.iter().filter_map(Parameter::from_node));
            }
        }
        Ok(Self {
            case,
            method,
            tag,
            op,
            params,
            comparisons: BTreeMap::new(),
        })
    }

    /// Operation the comparisons run under: the test-level annotation's
    /// override when present, else the HTTP method.
    pub(crate) fn effective_op(&self) -> String {
        match &self.tag {
            Some(tag) if !tag.operation.is_empty() => tag.operation.clone(),
            _ => self.method.as_str().to_string(),
        }
    }

    /// Record a generated scalar under its annotation's class and
    /// property. Without both there is nothing to track.
    pub(crate) fn add_basic_comparison(
        &mut self,
        db: &Db,
        tag: Option<&Annotation>,
        kind: ParamKind,
        value: &Value,
    ) {
        let Some(tag) = tag else { return };
        if tag.class.is_empty() || tag.property.is_empty() {
            return;
        }
        let op = if !tag.operation.is_empty() {
            tag.operation.clone()
        } else if kind.is_write() {
            OP_WRITE.to_string()
        } else {
            OP_READ.to_string()
        };
        if let Some(last) = self
            .comparisons
            .get_mut(&tag.class)
            .and_then(|entries| entries.last_mut())
        {
            let side = last.side_mut(&op);
            if !side.contains_key(&tag.property) {
                side.insert(tag.property.clone(), value.clone());
                return;
            }
        }
        // Collision on the latest entry: a new object is being described.
        let mut comparison = Comparison {
            schema: db.schema(&tag.class).cloned(),
            ..Comparison::default()
        };
        comparison
            .side_mut(&op)
            .insert(tag.property.clone(), value.clone());
        self.comparisons
            .entry(tag.class.clone())
            .or_default()
            .push(comparison);
    }

    /// Record a fully generated object for reconciliation.
    pub(crate) fn add_object_comparison(
        &mut self,
        class: &str,
        op: &str,
        obj: Object,
        schema: Option<Value>,
    ) {
        if op == Method::Post.as_str() {
            self.comparisons
                .entry(class.to_string())
                .or_default()
                .push(Comparison {
                    old: None,
                    new: Some(obj),
                    schema,
                });
        } else if op == Method::Put.as_str() || op == Method::Patch.as_str() {
            let entries = self.comparisons.entry(class.to_string()).or_default();
            if let Some(last) = entries.last_mut() {
                if last.new.is_none() {
                    // The lookup key came first; this object is the update.
                    last.new = Some(obj);
                    return;
                }
            }
            // An update carrying its own key fields inside the new object.
            entries.push(Comparison {
                old: None,
                new: Some(obj),
                schema,
            });
        } else {
            warn!(class, op, "object generated for a non-writing operation");
        }
    }

    /// Fill every declared parameter: user-supplied values are kept,
    /// everything else is synthesized from the schema.
    pub(crate) fn resolve_parameters(&mut self, session: &mut Session) -> Result<(), Error> {
        let params = std::mem::take(&mut self.params);
        for param in &params {
            if param.kind == ParamKind::Body {
                if let Some(body) = self.case.body_params.clone() {
                    self.register_supplied_body(session, param, body)?;
                    continue;
                }
                let value = self.generate_parameter(session, param)?;
                self.case.body_params = Some(value);
            } else {
                let supplied = self
                    .case
                    .params_mut(param.kind)
                    .is_some_and(|map| map.contains_key(&param.name));
                if supplied {
                    continue;
                }
                let value = self.generate_parameter(session, param)?;
                if let Some(map) = self.case.params_mut(param.kind) {
                    map.insert(param.name.clone(), value);
                }
            }
        }
        self.params = params;
        Ok(())
    }

    /// A user-supplied body is registered rather than regenerated: each
    /// object in it becomes a comparison under the body's root class.
    fn register_supplied_body(
        &mut self,
        session: &mut Session,
        param: &Parameter,
        body: Value,
    ) -> Result<(), Error> {
        let param_tag = Annotation::parse(&param.description);
        let (root_tag, root_schema) =
            self.schema_root_type(session, &param.schema, param_tag, 0)?;
        let op = self.effective_op();
        if let (Some(tag), Some(schema)) = (root_tag, root_schema) {
            let entries = match body {
                Value::Array(items) => items,
                other => vec![other],
            };
            for entry in entries {
                if let Value::Object(obj) = entry {
                    self.add_object_comparison(&tag.class, &op, obj, Some(schema.clone()));
                }
            }
        }
        Ok(())
    }

    /// Build the URL, stringify the parameter maps and send.
    pub(crate) fn dispatch(&mut self, session: &mut Session) -> Result<Response, Error> {
        let mut path = self.case.path.clone();
        for (name, value) in &self.case.path_params {
            path = path.replace(&format!("{{{name}}}"), &stringify(value));
        }
        let mut headers = session.headers.clone();
        headers.extend(stringify_map(&self.case.header_params));
        let request = Request {
            method: self.method,
            url: format!("{}{}", session.base_url, path),
            query: stringify_map(&self.case.query_params),
            headers,
            form: stringify_map(&self.case.form_params),
            body: self.case.body_params.clone(),
        };
        debug!(test = %self.case.name, method = %self.method, url = %request.url, "dispatching");
        if let Some(body) = &request.body {
            debug!(%body, "request body");
        }
        session.transport.send(&request)
    }

    /// Validate the response against the declared schema, decide success,
    /// then fold the comparison ledger into the shadow store.
    pub(crate) fn process_result(
        &mut self,
        session: &mut Session,
        response: &Response,
    ) -> Result<Vec<Value>, Error> {
        let status = response.status;
        let responses = self.op.get("responses");
        let resp_spec = responses
            .and_then(|r| r.get(status.to_string()))
            .or_else(|| responses.and_then(|r| r.get("default")));
        let Some(resp_spec) = resp_spec else {
            return Ok(Vec::new());
        };

        let schema = resp_spec.get("schema").filter(|s| !s.is_null());
        let mut result_obj: Option<Value> = None;
        if let Some(schema) = schema {
            if !response.body.is_empty() {
                let decoded: Value = serde_json::from_slice(&response.body).map_err(|_| {
                    Error::server_response(format!(
                        "response body is not json: {}",
                        String::from_utf8_lossy(&response.body)
                    ))
                })?;
                if !session.db.document().matches(schema, &decoded) {
                    return Err(Error::server_response(format!(
                        "response does not match the declared schema: {decoded}"
                    )));
                }
                result_obj = Some(decoded);
            }
        }

        let mut success = (200..300).contains(&status);
        let resp_tag = resp_spec
            .get("description")
            .and_then(Value::as_str)
            .and_then(Annotation::parse);
        if resp_tag.is_some_and(|tag| tag.class == CLASS_FAIL) {
            success = false;
        }
        if let Some(expected) = self.case.expect.get(EXPECT_STATUS) {
            success = match expected {
                Value::String(s) if s == "fail" => !success,
                Value::Number(n) => n.as_i64() == Some(i64::from(status)),
                other => {
                    return Err(Error::invalid(format!(
                        "unrecognized expect.status: {other}"
                    )))
                }
            };
        }
        if !success {
            warn!(test = %self.case.name, status, "test failed");
            return Ok(Vec::new());
        }

        let result_array = match result_obj {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None => vec![Value::Null],
        };
        let comparisons = std::mem::take(&mut self.comparisons);
        for (class, entries) in &comparisons {
            for comparison in entries {
                self.process_one_comparison(session, class, comparison, &result_array)?;
            }
        }
        Ok(result_array)
    }

    fn process_one_comparison(
        &self,
        session: &mut Session,
        class: &str,
        comparison: &Comparison,
        result_array: &[Value],
    ) -> Result<(), Error> {
        let op = self.effective_op();
        match op.as_str() {
            "get" => {
                let mode = if comparison.old.is_none() {
                    MatchMode::Always
                } else {
                    MatchMode::AllFields
                };
                let stored = session.db.find(class, comparison.old.as_ref(), mode, -1);
                // The server and the shadow store answered the same query;
                // they must agree.
                if result_array.len() != stored.len() {
                    return Err(Error::http(format!(
                        "expecting {} entries, got {}",
                        stored.len(),
                        result_array.len()
                    )));
                }
                for entry in result_array {
                    let found = match entry.as_object() {
                        None => stored.is_empty(),
                        Some(entry_map) => stored.iter().any(|row| covers(entry_map, row)),
                    };
                    if !found {
                        return Err(Error::http(format!(
                            "returned entry not present in the shadow store: {entry}"
                        )));
                    }
                }
            }
            "delete" => {
                session
                    .db
                    .delete(class, comparison.old.as_ref(), MatchMode::AllFields, -1);
            }
            "post" => {
                session.db.insert(
                    class,
                    comparison.schema.as_ref(),
                    comparison.new.clone().unwrap_or_default(),
                )?;
            }
            "put" | "patch" => {
                let patch = comparison.new.clone().unwrap_or_default();
                let touched = session.db.update(
                    class,
                    comparison.old.as_ref(),
                    MatchMode::AllFields,
                    &patch,
                    1,
                    op == "patch",
                );
                if touched != 1 {
                    warn!(class, "no shadow entry found to update");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn stringify_map(map: &Map<String, Value>) -> Vec<(String, String)> {
    map.iter()
        .map(|(name, value)| (name.clone(), stringify(value)))
        .collect()
}
