//! Hierarchical result writer

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{Counts, Outcome, Report, SuiteNode, TestNode, Verdict};
use crate::common::{Error, Result};

/// Collects suite and test results and writes the report on finish
#[derive(Debug)]
pub struct ResultWriter {
    path: Option<PathBuf>,
    report: Report,
    /// Index of the open first-level suite
    current_suite: Option<usize>,
    /// Names of suites opened below the first level
    suite_stack: Vec<String>,
    /// Index of the open test within the current suite
    current_test: Option<usize>,
    started: Instant,
    finished: bool,
}

impl ResultWriter {
    /// Create a writer reporting to `path`
    ///
    /// Any existing file at `path` is removed right away, so a stale report
    /// never survives an aborted run.
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = &path {
            if path.is_file() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(Self {
            path,
            report: Report::default(),
            current_suite: None,
            suite_stack: Vec::new(),
            current_test: None,
            started: Instant::now(),
            finished: false,
        })
    }

    /// Change or clear the report destination
    ///
    /// Clearing it suppresses the report file; used when the run is aborted.
    pub fn set_path(&mut self, path: Option<PathBuf>) {
        self.path = path;
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    /// Failures plus errors across the whole run
    pub fn failed_test_count(&self) -> u32 {
        self.report.failed_test_count()
    }

    /// Open a suite scope; closed when the returned guard drops
    pub fn start_suite(&mut self, name: &str) -> SuiteScope<'_> {
        self.open_suite(name);
        SuiteScope {
            writer: self,
            started: Instant::now(),
        }
    }

    /// Open a test scope; closed when the returned guard drops
    ///
    /// A test started outside of any suite gets a first-level suite of the
    /// same name, which closes together with the test.
    pub fn start_test(&mut self, name: &str) -> TestScope<'_> {
        let owns_suite = self.current_suite.is_none();
        if owns_suite {
            self.open_suite(name);
        }

        self.bump(|c| c.tests += 1);
        let full_name = self
            .suite_stack
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(name))
            .collect::<Vec<_>>()
            .join(".");

        self.current_test = self.suite_mut().map(|suite| {
            suite.tests.push(TestNode {
                name: full_name,
                time: None,
                verdicts: Vec::new(),
            });
            suite.tests.len() - 1
        });

        TestScope {
            writer: self,
            started: Instant::now(),
            owns_suite,
        }
    }

    /// Record an assertion failure against the open test
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.bump(|c| c.failures += 1);
        tracing::error!("Test '{}' failed: {}", self.current_test_name(), message);
        self.attach(Verdict::Failure(message));
    }

    /// Record a fatal error against the open test
    pub fn fatal(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.bump(|c| c.errors += 1);
        tracing::error!("Test '{}' failed: {}", self.current_test_name(), message);
        self.attach(Verdict::Error(message));
    }

    /// Record an outcome; returns true for a pass
    pub fn record(&mut self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Pass => true,
            Outcome::Fail(message) => {
                self.fail(message);
                false
            }
            Outcome::Fatal(message) => {
                self.fatal(message);
                false
            }
        }
    }

    /// Stamp the total time and write the report, once
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.report.time = Some(self.started.elapsed());

        let Some(path) = &self.path else {
            return Ok(());
        };

        let xml = super::render(&self.report)?;
        std::fs::write(path, xml).map_err(|e| Error::Report {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let counts = self.report.counts;
        tracing::info!(
            "Finished all tests (executed {} tests, {} failures, {} errors)",
            counts.tests,
            counts.failures,
            counts.errors
        );
        Ok(())
    }

    fn open_suite(&mut self, name: &str) {
        if self.current_suite.is_some() {
            self.suite_stack.push(name.to_string());
            return;
        }

        self.report.suites.push(SuiteNode {
            name: name.to_string(),
            timestamp: chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
            counts: Counts::default(),
            time: None,
            tests: Vec::new(),
        });
        self.current_suite = Some(self.report.suites.len() - 1);
        tracing::info!("Starting test {}", name);
    }

    fn end_suite(&mut self, started: Instant) {
        if self.suite_stack.pop().is_some() {
            return;
        }
        let Some(index) = self.current_suite.take() else {
            return;
        };

        let suite = &mut self.report.suites[index];
        suite.time = Some(started.elapsed());
        tracing::info!(
            "Finished test {} (executed {} tests, {} failures, {} errors)",
            suite.name,
            suite.counts.tests,
            suite.counts.failures,
            suite.counts.errors
        );
    }

    fn end_test(&mut self, started: Instant) {
        let Some(index) = self.current_test.take() else {
            return;
        };
        if let Some(suite) = self.suite_mut() {
            let test = &mut suite.tests[index];
            test.time = Some(started.elapsed());
            if test.passed() {
                tracing::debug!("Test '{}' succeeded", test.name);
            }
        }
    }

    fn suite_mut(&mut self) -> Option<&mut SuiteNode> {
        self.current_suite.map(|i| &mut self.report.suites[i])
    }

    fn current_test_mut(&mut self) -> Option<&mut TestNode> {
        let index = self.current_test?;
        self.suite_mut().map(|suite| &mut suite.tests[index])
    }

    fn current_test_name(&self) -> String {
        match (self.current_suite, self.current_test) {
            (Some(s), Some(t)) => self.report.suites[s].tests[t].name.clone(),
            _ => "<none>".to_string(),
        }
    }

    /// Increment a counter on the open suite and the root
    fn bump(&mut self, inc: impl Fn(&mut Counts)) {
        inc(&mut self.report.counts);
        if let Some(suite) = self.suite_mut() {
            inc(&mut suite.counts);
        }
    }

    fn attach(&mut self, verdict: Verdict) {
        match self.current_test_mut() {
            Some(test) => test.verdicts.push(verdict),
            None => tracing::warn!("Result recorded outside of a test: {:?}", verdict),
        }
    }
}

impl Drop for ResultWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::error!("{}", e);
        }
    }
}

/// Open suite; derefs to the writer so nested scopes can be started from it
pub struct SuiteScope<'a> {
    writer: &'a mut ResultWriter,
    started: Instant,
}

impl Deref for SuiteScope<'_> {
    type Target = ResultWriter;

    fn deref(&self) -> &ResultWriter {
        self.writer
    }
}

impl DerefMut for SuiteScope<'_> {
    fn deref_mut(&mut self) -> &mut ResultWriter {
        self.writer
    }
}

impl Drop for SuiteScope<'_> {
    fn drop(&mut self) {
        self.writer.end_suite(self.started);
    }
}

/// Open test; derefs to the writer for recording results
pub struct TestScope<'a> {
    writer: &'a mut ResultWriter,
    started: Instant,
    owns_suite: bool,
}

impl Deref for TestScope<'_> {
    type Target = ResultWriter;

    fn deref(&self) -> &ResultWriter {
        self.writer
    }
}

impl DerefMut for TestScope<'_> {
    fn deref_mut(&mut self) -> &mut ResultWriter {
        self.writer
    }
}

impl Drop for TestScope<'_> {
    fn drop(&mut self) {
        self.writer.end_test(self.started);
        if self.owns_suite {
            self.writer.end_suite(self.started);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sum(report: &Report) -> Counts {
        report.suites.iter().fold(Counts::default(), |acc, s| Counts {
            tests: acc.tests + s.counts.tests,
            failures: acc.failures + s.counts.failures,
            errors: acc.errors + s.counts.errors,
        })
    }

    #[test]
    fn test_nested_suites_are_flattened() {
        let mut rw = ResultWriter::new(None).unwrap();
        {
            let mut suite = rw.start_suite("dhcp");
            {
                let _t = suite.start_test("Setup");
            }
            {
                let mut nested = suite.start_suite("ipaddr4_eth0");
                let mut entry = nested.start_suite("Entry 0");
                let mut t = entry.start_test("local");
                t.fail("was '10.0.0.2', expected '10.0.0.1'");
            }
            let _t = suite.start_test("Teardown");
        }

        let report = rw.report();
        assert_eq!(report.suites.len(), 1);
        let names: Vec<_> = report.suites[0].tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Setup", "ipaddr4_eth0.Entry 0.local", "Teardown"]);
        assert!(report.suites[0].time.is_some());
        assert!(report.suites[0].tests.iter().all(|t| t.time.is_some()));
        assert_eq!(
            report.suites[0].tests[1].verdicts,
            vec![Verdict::Failure("was '10.0.0.2', expected '10.0.0.1'".into())]
        );
    }

    #[test]
    fn test_root_counts_are_sum_of_suites() {
        let mut rw = ResultWriter::new(None).unwrap();
        for (name, fails, fatals) in [("a", 2, 0), ("b", 0, 1), ("c", 0, 0)] {
            let mut suite = rw.start_suite(name);
            for i in 0..3 {
                let mut t = suite.start_test(&format!("t{i}"));
                if i < fails {
                    t.fail("mismatch");
                }
                if i < fatals {
                    t.fatal("broken");
                }
            }
        }

        let report = rw.report();
        assert_eq!(report.counts, sum(report));
        assert_eq!(report.counts.tests, 9);
        assert_eq!(rw.failed_test_count(), 3);
        assert_eq!(report.suites[1].counts.errors, 1);
        assert_eq!(report.failed_tests(), vec!["a: t0", "a: t1", "b: t0"]);
    }

    #[test]
    fn test_record_outcomes() {
        let mut rw = ResultWriter::new(None).unwrap();
        let mut suite = rw.start_suite("s");
        let mut t = suite.start_test("t");
        assert!(t.record(Outcome::Pass));
        assert!(!t.record(Outcome::Fail("f".into())));
        assert!(!t.record(Outcome::Fatal("e".into())));
        drop(t);
        drop(suite);
        assert_eq!(rw.report().counts.failures, 1);
        assert_eq!(rw.report().counts.errors, 1);
    }

    #[test]
    fn test_scope_closes_on_early_return() {
        fn check(rw: &mut ResultWriter) -> std::result::Result<(), String> {
            let mut suite = rw.start_suite("early");
            let mut t = suite.start_test("step");
            t.fatal("cannot continue");
            Err("bail".into())
        }

        let mut rw = ResultWriter::new(None).unwrap();
        assert!(check(&mut rw).is_err());
        // the next suite is a new first-level node, not nested
        let next = rw.start_suite("next");
        assert_eq!(next.report().suites.len(), 2);
        assert!(next.report().suites[0].time.is_some());
        assert!(next.report().suites[1].time.is_none());
    }

    #[test]
    fn test_test_outside_suite_gets_own_suite() {
        let mut rw = ResultWriter::new(None).unwrap();
        {
            let mut t = rw.start_test("Length Match");
            t.fatal("lengths differ");
        }
        let report = rw.report();
        assert_eq!(report.suites.len(), 1);
        assert_eq!(report.suites[0].name, "Length Match");
        assert_eq!(report.suites[0].counts.errors, 1);
        assert!(report.suites[0].time.is_some());
    }

    #[test]
    fn test_finish_writes_once_and_replaces_stale_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.xml");
        std::fs::write(&path, "stale").unwrap();

        let mut rw = ResultWriter::new(Some(path.clone())).unwrap();
        assert!(!path.exists());
        {
            let mut suite = rw.start_suite("s");
            let _t = suite.start_test("t");
        }
        rw.finish().unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        assert!(first.contains("<testsuites"));

        std::fs::remove_file(&path).unwrap();
        rw.finish().unwrap();
        drop(rw);
        assert!(!path.exists());
    }

    #[test]
    fn test_cleared_path_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.xml");
        let mut rw = ResultWriter::new(Some(path.clone())).unwrap();
        rw.set_path(None);
        drop(rw);
        assert!(!path.exists());
    }
}
