//! Plan orchestration
//!
//! A plan is an ordered list of named tests. Tests run in declaration
//! order; one test erroring never stops the plan, and ref expansion
//! re-enters the plan by name.

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;

use apiplan_core::Error;

use crate::exec::{Session, TestCase};

pub struct Plan {
    tests: Vec<TestCase>,
}

/// Result of one top-level test.
pub struct Outcome {
    pub name: String,
    pub result: Result<Vec<Value>, Error>,
}

impl Plan {
    /// Parse a YAML sequence of tests. Names must be unique and non-empty;
    /// methods are normalized to lowercase.
    pub fn parse(content: &str) -> Result<Self, Error> {
        let tests: Vec<TestCase> =
            serde_yml::from_str(content).map_err(|e| Error::Parse(e.to_string()))?;
        Self::from_tests(tests)
    }

    pub fn from_tests(mut tests: Vec<TestCase>) -> Result<Self, Error> {
        let mut seen = HashSet::new();
        for test in &mut tests {
            test.method = test.method.to_ascii_lowercase();
            if test.name.is_empty() {
                return Err(Error::invalid("every test needs a name"));
            }
            if !seen.insert(test.name.clone()) {
                return Err(Error::invalid(format!("duplicate test name: {}", test.name)));
            }
        }
        Ok(Self { tests })
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    pub fn get(&self, name: &str) -> Option<&TestCase> {
        self.tests.iter().find(|test| test.name == name)
    }

    /// Run one test by name. Ref expansion re-enters here with the
    /// referring test as parent.
    pub fn run(
        &self,
        name: &str,
        session: &mut Session,
        parent: Option<&TestCase>,
    ) -> Result<Vec<Value>, Error> {
        let test = self
            .get(name)
            .ok_or_else(|| Error::not_found(format!("test {name} not in plan")))?;
        test.run(self, session, parent)
    }

    /// Run every test in order, collecting per-test outcomes.
    pub fn run_all(&self, session: &mut Session) -> Vec<Outcome> {
        self.tests
            .iter()
            .map(|test| Outcome {
                name: test.name.clone(),
                result: test.run(self, session, None),
            })
            .collect()
    }
}
