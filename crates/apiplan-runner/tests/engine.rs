//! End-to-end engine scenarios over a scripted transport.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::{json, Value};

use apiplan_core::{Db, Document, Error, MatchMode};
use apiplan_runner::{Plan, Request, Response, Session, Transport};

#[derive(Default)]
struct ScriptState {
    queue: VecDeque<Response>,
    sent: Vec<Request>,
}

/// Transport answering from a queue while recording every request.
#[derive(Clone, Default)]
struct Scripted(Rc<RefCell<ScriptState>>);

impl Scripted {
    fn push(&self, status: u16, body: Value) {
        self.0.borrow_mut().queue.push_back(Response {
            status,
            body: serde_json::to_vec(&body).unwrap(),
        });
    }

    fn push_raw(&self, status: u16, body: &[u8]) {
        self.0.borrow_mut().queue.push_back(Response {
            status,
            body: body.to_vec(),
        });
    }

    fn sent(&self) -> Vec<Request> {
        self.0.borrow().sent.clone()
    }
}

impl Transport for Scripted {
    fn send(&mut self, request: &Request) -> Result<Response, Error> {
        self.0.borrow_mut().sent.push(request.clone());
        self.0
            .borrow_mut()
            .queue
            .pop_front()
            .ok_or_else(|| Error::http("no scripted response left"))
    }
}

fn petstore() -> Value {
    json!({
        "swagger": "2.0",
        "host": "petstore.example.com",
        "basePath": "/v2",
        "schemes": ["http"],
        "paths": {
            "/pets": {
                "get": {
                    "parameters": [
                        {"name": "limit", "in": "query", "type": "integer",
                         "minimum": 1, "maximum": 10}
                    ],
                    "responses": {
                        "200": {"description": "ok",
                                "schema": {"type": "array", "items": {"$ref": "#/definitions/Pet"}}}
                    }
                },
                "post": {
                    "parameters": [
                        {"name": "pet", "in": "body", "schema": {"$ref": "#/definitions/Pet"}}
                    ],
                    "responses": {
                        "200": {"description": "duplicate pet @meqa[fail]",
                                "schema": {"$ref": "#/definitions/Pet"}},
                        "201": {"description": "created",
                                "schema": {"$ref": "#/definitions/Pet"}},
                        "default": {"description": "error"}
                    }
                }
            },
            "/pets/{id}": {
                "get": {
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "type": "integer",
                         "description": "@meqa[Pet:id]"}
                    ],
                    "responses": {
                        "200": {"description": "ok",
                                "schema": {"type": "array", "items": {"$ref": "#/definitions/Pet"}}},
                        "default": {"description": "error"}
                    }
                },
                "patch": {
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "type": "integer",
                         "description": "@meqa[Pet:id]"},
                        {"name": "pet", "in": "body", "schema": {"$ref": "#/definitions/Pet"}}
                    ],
                    "responses": {
                        "200": {"description": "updated", "schema": {"$ref": "#/definitions/Pet"}}
                    }
                },
                "delete": {
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "type": "integer",
                         "description": "@meqa[Pet:id]"}
                    ],
                    "responses": {
                        "204": {"description": "deleted"}
                    }
                }
            }
        },
        "definitions": {
            "Pet": {
                "type": "object",
                "properties": {"id": {"type": "integer"}, "name": {"type": "string"}},
                "required": ["id", "name"]
            }
        }
    })
}

fn session(transport: &Scripted) -> Session {
    session_with_seed(transport, 7)
}

fn session_with_seed(transport: &Scripted, seed: u64) -> Session {
    let document = Document::from_value(petstore()).unwrap();
    Session::new(Db::new(document), Box::new(transport.clone()), Some(seed))
}

fn assert_all_ok(outcomes: &[apiplan_runner::Outcome]) {
    for outcome in outcomes {
        assert!(
            outcome.result.is_ok(),
            "{} failed: {:?}",
            outcome.name,
            outcome.result.as_ref().err()
        );
    }
}

#[test]
fn post_then_get_reuses_the_created_id() {
    let transport = Scripted::default();
    transport.push(201, json!({"name": "rex", "id": 7}));
    transport.push(200, json!([{"name": "rex", "id": 7}]));
    let mut session = session(&transport);

    let plan = Plan::parse(
        r#"
- name: create-pet
  path: /pets
  method: post
  bodyParams:
    name: rex
    id: 7
- name: fetch-pet
  path: /pets/{id}
  method: get
"#,
    )
    .unwrap();

    assert_all_ok(&plan.run_all(&mut session));

    let pets = session.db.find("Pet", None, MatchMode::Always, -1);
    assert_eq!(pets.len(), 1);
    assert_eq!(pets[0].get("id"), Some(&json!(7)));
    assert_eq!(pets[0].get("name"), Some(&json!("rex")));

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].url, "http://petstore.example.com/v2/pets");
    assert_eq!(sent[0].body, Some(json!({"name": "rex", "id": 7})));
    assert_eq!(
        sent[1].url, "http://petstore.example.com/v2/pets/7",
        "the path parameter must come from the object created before"
    );
}

#[test]
fn patch_merges_into_the_shadow_store() {
    let transport = Scripted::default();
    transport.push(201, json!({"name": "rex", "id": 7}));
    transport.push(200, json!({"name": "max", "id": 7}));
    let mut session = session(&transport);

    let plan = Plan::parse(
        r#"
- name: create-pet
  path: /pets
  method: post
  bodyParams:
    name: rex
    id: 7
- name: rename-pet
  path: /pets/{id}
  method: patch
  bodyParams:
    name: max
"#,
    )
    .unwrap();

    assert_all_ok(&plan.run_all(&mut session));

    let pets = session.db.find("Pet", None, MatchMode::Always, -1);
    assert_eq!(pets.len(), 1);
    assert_eq!(pets[0].get("name"), Some(&json!("max")));
    assert_eq!(pets[0].get("id"), Some(&json!(7)), "absent fields survive a patch");
}

#[test]
fn delete_empties_the_shadow_store() {
    let transport = Scripted::default();
    transport.push(201, json!({"name": "rex", "id": 7}));
    transport.push_raw(204, b"");
    transport.push(200, json!([]));
    let mut session = session(&transport);

    let plan = Plan::parse(
        r#"
- name: create-pet
  path: /pets
  method: post
  bodyParams:
    name: rex
    id: 7
- name: remove-pet
  path: /pets/{id}
  method: delete
- name: fetch-after-delete
  path: /pets/{id}
  method: get
"#,
    )
    .unwrap();

    assert_all_ok(&plan.run_all(&mut session));
    assert!(session.db.find("Pet", None, MatchMode::Always, -1).is_empty());

    let sent = transport.sent();
    assert_eq!(sent[1].url, "http://petstore.example.com/v2/pets/7");
}

#[test]
fn get_mismatch_is_an_http_error() {
    let transport = Scripted::default();
    transport.push(201, json!({"name": "rex", "id": 7}));
    transport.push(200, json!([{"name": "bob", "id": 8}]));
    let mut session = session(&transport);

    let plan = Plan::parse(
        r#"
- name: create-pet
  path: /pets
  method: post
  bodyParams:
    name: rex
    id: 7
- name: fetch-pet
  path: /pets/{id}
  method: get
"#,
    )
    .unwrap();

    assert!(plan.run("create-pet", &mut session, None).is_ok());
    let result = plan.run("fetch-pet", &mut session, None);
    assert!(matches!(result, Err(Error::Http(_))), "{result:?}");
}

#[test]
fn response_schema_violations_are_server_errors() {
    let transport = Scripted::default();
    transport.push(200, json!([{"id": "not-a-number"}]));
    let mut session = session(&transport);
    let plan = Plan::parse(
        r#"
- name: list-pets
  path: /pets
  method: get
"#,
    )
    .unwrap();

    let result = plan.run("list-pets", &mut session, None);
    assert!(matches!(result, Err(Error::ServerResponse(_))), "{result:?}");
}

#[test]
fn non_json_bodies_are_server_errors() {
    let transport = Scripted::default();
    transport.push_raw(200, b"<html>oops</html>");
    let mut session = session(&transport);
    let plan = Plan::parse(
        r#"
- name: list-pets
  path: /pets
  method: get
"#,
    )
    .unwrap();

    let result = plan.run("list-pets", &mut session, None);
    assert!(matches!(result, Err(Error::ServerResponse(_))), "{result:?}");
}

#[test]
fn generated_body_is_schema_conforming_and_stored() {
    let transport = Scripted::default();
    transport.push(201, json!({"name": "generated", "id": 1}));
    let mut session = session(&transport);
    let plan = Plan::parse(
        r#"
- name: create-pet
  path: /pets
  method: post
"#,
    )
    .unwrap();

    assert_all_ok(&plan.run_all(&mut session));

    let sent = transport.sent();
    let body = sent[0].body.as_ref().unwrap();
    assert!(body.get("id").is_some_and(Value::is_i64));
    assert!(body.get("name").is_some_and(Value::is_string));

    let pets = session.db.find("Pet", None, MatchMode::Always, -1);
    assert_eq!(pets.len(), 1);
    assert_eq!(&Value::Object(pets[0].clone()), body, "the generated object is what lands in the store");
}

#[test]
fn query_parameters_are_generated_and_stringified() {
    let transport = Scripted::default();
    transport.push(200, json!([]));
    let mut session = session(&transport);
    let plan = Plan::parse(
        r#"
- name: list-pets
  path: /pets
  method: get
"#,
    )
    .unwrap();

    assert_all_ok(&plan.run_all(&mut session));

    let sent = transport.sent();
    let (name, value) = &sent[0].query[0];
    assert_eq!(name, "limit");
    let limit: i64 = value.parse().unwrap();
    assert!((2..10).contains(&limit), "limit {limit}");
}

#[test]
fn ref_expansion_inherits_parent_parameters() {
    let transport = Scripted::default();
    transport.push(201, json!({"name": "rex", "id": 7}));
    let mut session = session(&transport);

    let plan = Plan::parse(
        r#"
- name: create-pet
  path: /pets
  method: post
- name: create-rex
  ref: create-pet
  bodyParams:
    name: rex
    id: 7
"#,
    )
    .unwrap();

    assert!(plan.run("create-rex", &mut session, None).is_ok());

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, Some(json!({"name": "rex", "id": 7})));
    let pets = session.db.find("Pet", None, MatchMode::Always, -1);
    assert_eq!(pets.len(), 1);
}

#[test]
fn expect_fail_inverts_the_verdict() {
    let transport = Scripted::default();
    transport.push(400, json!({"message": "bad"}));
    let mut session = session(&transport);
    let plan = Plan::parse(
        r#"
- name: create-broken
  path: /pets
  method: post
  bodyParams:
    name: rex
    id: 7
  expect:
    status: fail
"#,
    )
    .unwrap();

    assert!(plan.run("create-broken", &mut session, None).is_ok());
}

#[test]
fn expect_status_forces_equality() {
    let transport = Scripted::default();
    transport.push(400, json!({"message": "bad"}));
    let mut session = session(&transport);
    let plan = Plan::parse(
        r#"
- name: create-pet
  path: /pets
  method: post
  bodyParams:
    name: rex
    id: 7
  expect:
    status: 201
"#,
    )
    .unwrap();

    // A status mismatch is a failed test, not an error; nothing lands in
    // the store.
    assert!(plan.run("create-pet", &mut session, None).is_ok());
    assert!(session.db.find("Pet", None, MatchMode::Always, -1).is_empty());
}

#[test]
fn expect_status_rejects_unknown_strings() {
    let transport = Scripted::default();
    transport.push(201, json!({"name": "rex", "id": 7}));
    let mut session = session(&transport);
    let plan = Plan::parse(
        r#"
- name: create-pet
  path: /pets
  method: post
  bodyParams:
    name: rex
    id: 7
  expect:
    status: maybe
"#,
    )
    .unwrap();

    let result = plan.run("create-pet", &mut session, None);
    assert!(matches!(result, Err(Error::Invalid(_))), "{result:?}");
}

#[test]
fn fail_tagged_response_fails_a_success_status() {
    let transport = Scripted::default();
    // 200 on this operation is described as @meqa[fail].
    transport.push(200, json!({"name": "rex", "id": 7}));
    let mut session = session(&transport);
    let plan = Plan::parse(
        r#"
- name: create-duplicate
  path: /pets
  method: post
  bodyParams:
    name: rex
    id: 7
"#,
    )
    .unwrap();

    assert!(plan.run("create-duplicate", &mut session, None).is_ok());
    assert!(
        session.db.find("Pet", None, MatchMode::Always, -1).is_empty(),
        "a failed test must not touch the store"
    );
}

#[test]
fn unknown_paths_and_tests_are_not_found() {
    let transport = Scripted::default();
    let mut session = session(&transport);
    let plan = Plan::parse(
        r#"
- name: missing-path
  path: /stores
  method: get
"#,
    )
    .unwrap();

    assert!(matches!(
        plan.run("missing-path", &mut session, None),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        plan.run("no-such-test", &mut session, None),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn unknown_methods_are_invalid() {
    let transport = Scripted::default();
    let mut session = session(&transport);
    let plan = Plan::parse(
        r#"
- name: strange
  path: /pets
  method: brew
"#,
    )
    .unwrap();

    assert!(matches!(
        plan.run("strange", &mut session, None),
        Err(Error::Invalid(_))
    ));
}

#[test]
fn base_url_override_wins() {
    let transport = Scripted::default();
    transport.push(200, json!([]));
    let mut session = session(&transport).with_base_url("http://localhost:9999/v2");
    let plan = Plan::parse(
        r#"
- name: list-pets
  path: /pets
  method: get
"#,
    )
    .unwrap();

    assert_all_ok(&plan.run_all(&mut session));
    assert!(transport.sent()[0].url.starts_with("http://localhost:9999/v2/pets"));
}

#[test]
fn global_headers_ride_along_under_test_headers() {
    let transport = Scripted::default();
    transport.push(200, json!([]));
    let mut session = session(&transport)
        .with_headers(vec![("Authorization".into(), "Bearer abc".into())]);
    let plan = Plan::parse(
        r#"
- name: list-pets
  path: /pets
  method: get
"#,
    )
    .unwrap();

    assert_all_ok(&plan.run_all(&mut session));
    let sent = transport.sent();
    assert!(sent[0]
        .headers
        .iter()
        .any(|(name, value)| name == "Authorization" && value == "Bearer abc"));
}

#[test]
fn seeded_runs_are_deterministic() {
    let run = |seed: u64| {
        let transport = Scripted::default();
        transport.push(200, json!([]));
        let mut session = session_with_seed(&transport, seed);
        let plan = Plan::parse(
            r#"
- name: list-pets
  path: /pets
  method: get
"#,
        )
        .unwrap();
        assert_all_ok(&plan.run_all(&mut session));
        transport.sent()[0].query.clone()
    };

    assert_eq!(run(9), run(9), "the seed is the only source of variation");
}
