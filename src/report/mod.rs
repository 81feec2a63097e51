//! Result aggregation
//!
//! Suites and tests are tracked through scope guards returned by
//! [`ResultWriter::start_suite`] and [`ResultWriter::start_test`]; dropping a
//! guard closes its scope, so every exit path (including `?` and panics)
//! finalizes the node. Only one level of suites gets its own report node,
//! deeper suite names are folded into the names of the tests they contain.

mod writer;
mod xml;

use std::time::Duration;

pub use writer::{ResultWriter, SuiteScope, TestScope};
pub use xml::render;

/// Verdict of a single check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    /// Assertion mismatch; later checks still run
    Fail(String),
    /// The check could not be carried out at all
    Fatal(String),
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }
}

/// Cumulative counters shared by the root and suite nodes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub tests: u32,
    pub failures: u32,
    pub errors: u32,
}

/// Failure payload attached to a test node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Failure(String),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct TestNode {
    /// Dot-joined nested suite names followed by the test name
    pub name: String,
    pub time: Option<Duration>,
    pub verdicts: Vec<Verdict>,
}

impl TestNode {
    pub fn passed(&self) -> bool {
        self.verdicts.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SuiteNode {
    pub name: String,
    /// Local wall-clock time the suite was opened, ISO 8601
    pub timestamp: String,
    pub counts: Counts,
    pub time: Option<Duration>,
    pub tests: Vec<TestNode>,
}

/// Root of the report tree
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub counts: Counts,
    pub time: Option<Duration>,
    pub suites: Vec<SuiteNode>,
}

impl Report {
    /// Failures plus errors, the basis of the process exit status
    pub fn failed_test_count(&self) -> u32 {
        self.counts.failures + self.counts.errors
    }

    /// Names of every test that recorded a failure or error, as `suite: test`
    pub fn failed_tests(&self) -> Vec<String> {
        self.suites
            .iter()
            .flat_map(|suite| {
                suite
                    .tests
                    .iter()
                    .filter(|test| !test.passed())
                    .map(move |test| format!("{}: {}", suite.name, test.name))
            })
            .collect()
    }
}
