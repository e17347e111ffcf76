//! apiplan-runner: plan execution engine
//!
//! Synthesizes schema-conforming requests from a Swagger document and a
//! user-authored plan, dispatches them, validates the responses and keeps
//! the shadow store reconciled with what the server reports.

pub mod exec;
mod generate;
pub mod plan;
pub mod transport;

pub use exec::{Session, TestCase};
pub use plan::{Outcome, Plan};
pub use transport::{HttpTransport, Request, Response, Transport};
