//! Structural comparison of expected fixtures against introspection output
//!
//! Both sides are JSON trees shaped like `ip -j` output. Entries are paired
//! by position and compared key by key, following directives embedded in
//! the expected tree:
//!
//! - `{"_exact": false, ...}` compares only the listed keys of a nested
//!   object instead of requiring the whole object to be equal.
//! - `{"_type": "array", "expected": [...], "not_expected": [...]}` checks
//!   membership in an actual list.
//! - A plain list is compared as a sorted multiset, unless it carries the
//!   legacy `"__COND__SUBSET"` marker, which turns it into a subset check.
//!   New fixtures should use the `_type: array` form.

use serde_json::{Map, Value};

use crate::report::{Outcome, ResultWriter};

/// Reserved prefix of legacy list condition markers
pub const CONDITION_PREFIX: &str = "__COND__";
/// Legacy marker selecting subset comparison
pub const CONDITION_SUBSET: &str = "__COND__SUBSET";

const EXACT_KEY: &str = "_exact";
const TYPE_KEY: &str = "_type";

/// How an expected value is to be checked
enum Expectation<'a> {
    /// `_type: array` descriptor
    Members {
        expected: Vec<Value>,
        not_expected: Vec<Value>,
    },
    /// Object with `_exact: false`, checked key by key
    Partial(&'a Map<String, Value>),
    /// Plain list, possibly carrying a legacy mode marker
    List(&'a [Value]),
    /// Anything else, checked for equality
    Equal(&'a Value),
}

impl<'a> Expectation<'a> {
    fn of(value: &'a Value) -> Self {
        match value {
            Value::Object(map) if map.get(TYPE_KEY).and_then(Value::as_str) == Some("array") => {
                Expectation::Members {
                    expected: map.get("expected").map(to_seq).unwrap_or_default(),
                    not_expected: map.get("not_expected").map(to_seq).unwrap_or_default(),
                }
            }
            Value::Object(map) if map.get(EXACT_KEY).and_then(Value::as_bool) == Some(false) => {
                Expectation::Partial(map)
            }
            Value::Array(list) => Expectation::List(list),
            other => Expectation::Equal(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListMode {
    Exact,
    Subset,
}

/// Compare `expected` against `actual`, recording one test per checked key
///
/// With `select`, each side must hold at most one element, and comparison
/// continues on that element's `select` field. Returns the number of
/// failures and errors recorded by this call.
pub fn compare(
    rw: &mut ResultWriter,
    expected: &Value,
    actual: &Value,
    select: Option<&str>,
) -> u32 {
    let mut expected = to_seq(expected);
    let mut actual = to_seq(actual);

    if let Some(key) = select {
        if expected.len() > 1 || actual.len() > 1 {
            let mut test = rw.start_test("Select");
            test.fatal(format!(
                "Expected only one element in lists, when select '{key}' is given"
            ));
            return 1;
        }
        match (select_field(&expected, key), select_field(&actual, key)) {
            (Ok(e), Ok(a)) => {
                expected = e;
                actual = a;
            }
            (Err(message), _) | (_, Err(message)) => {
                let mut test = rw.start_test("Select");
                test.fatal(message);
                return 1;
            }
        }
    }

    // `ip -j` sometimes emits empty records
    actual.retain(|v| !matches!(v, Value::Object(map) if map.is_empty()));

    {
        let mut test = rw.start_test("Length Match");
        if actual.len() != expected.len() {
            test.fatal(format!(
                "Top level list lengths differ (was {}, expected {})\nActual: {}\nExpected: {}",
                actual.len(),
                expected.len(),
                Value::Array(actual),
                Value::Array(expected)
            ));
            return 1;
        }
    }

    let mut errors = 0;
    for (i, (exp, act)) in expected.iter().zip(actual.iter()).enumerate() {
        let mut entry = rw.start_suite(&format!("Entry {i}"));
        match exp {
            Value::Object(map) => {
                for key in map.keys().filter(|k| k.as_str() != EXACT_KEY) {
                    let mut test = entry.start_test(key);
                    if !test.record(check_key(map, act, key)) {
                        errors += 1;
                    }
                }
            }
            other => {
                let mut test = entry.start_test("Value");
                if !test.record(check_value(other, act)) {
                    errors += 1;
                }
            }
        }
    }
    errors
}

/// Collapse a zero- or one-element list to its `key` field
fn select_field(list: &[Value], key: &str) -> Result<Vec<Value>, String> {
    match list.first() {
        None => Ok(Vec::new()),
        Some(element) => element
            .get(key)
            .map(to_seq)
            .ok_or_else(|| format!("key '{key}' is missing")),
    }
}

fn check_key(expected: &Map<String, Value>, actual: &Value, key: &str) -> Outcome {
    match (expected.get(key), actual.get(key)) {
        (Some(exp), Some(act)) => check_value(exp, act),
        _ => Outcome::Fail(format!("key '{key}' is missing")),
    }
}

fn check_value(expected: &Value, actual: &Value) -> Outcome {
    match Expectation::of(expected) {
        Expectation::Members {
            expected,
            not_expected,
        } => check_members(actual, &expected, &not_expected),
        Expectation::Partial(map) => check_partial(actual, map),
        Expectation::List(list) => check_list(actual, list),
        Expectation::Equal(value) => must_equal(actual, value),
    }
}

/// Keys of `expected` must match; extra keys in `actual` are ignored
fn check_partial(actual: &Value, expected: &Map<String, Value>) -> Outcome {
    expected
        .keys()
        .filter(|k| k.as_str() != EXACT_KEY)
        .map(|key| check_key(expected, actual, key))
        .find(|outcome| !outcome.is_pass())
        .unwrap_or(Outcome::Pass)
}

fn check_members(actual: &Value, expected: &[Value], not_expected: &[Value]) -> Outcome {
    let actual = sorted(to_seq(actual));
    let mut messages = Vec::new();

    if expected.iter().any(|e| !actual.contains(e)) {
        messages.push(format!(
            "was '{}' must contain all of '{}'",
            Value::from(actual.clone()),
            Value::from(sorted(expected.to_vec()))
        ));
    }
    if not_expected.iter().any(|e| actual.contains(e)) {
        messages.push(format!(
            "was '{}' must contain none of '{}'",
            Value::from(actual.clone()),
            Value::from(sorted(not_expected.to_vec()))
        ));
    }

    if messages.is_empty() {
        Outcome::Pass
    } else {
        Outcome::Fail(messages.join("\n"))
    }
}

fn check_list(actual: &Value, expected: &[Value]) -> Outcome {
    let (markers, expected): (Vec<&Value>, Vec<&Value>) = expected
        .iter()
        .partition(|v| v.as_str().is_some_and(|s| s.starts_with(CONDITION_PREFIX)));

    let mut mode = None;
    for marker in markers {
        match marker.as_str() {
            Some(CONDITION_SUBSET) if mode.is_none() => mode = Some(ListMode::Subset),
            Some(CONDITION_SUBSET) => {
                return Outcome::Fatal("FATAL: Multiple compare modes defined".to_string())
            }
            _ => return Outcome::Fatal(format!("FATAL: Unknown condition: {marker}")),
        }
    }

    let actual = sorted(to_seq(actual));
    let expected = sorted(expected.into_iter().cloned().collect());

    match mode.unwrap_or(ListMode::Exact) {
        ListMode::Exact if actual == expected => Outcome::Pass,
        ListMode::Exact => Outcome::Fail(format!(
            "was '{}', expected '{}'",
            Value::from(actual),
            Value::from(expected)
        )),
        ListMode::Subset => check_members(&Value::from(actual), &expected, &[]),
    }
}

fn must_equal(actual: &Value, expected: &Value) -> Outcome {
    let equal = match expected {
        Value::Object(map) if map.contains_key(EXACT_KEY) => {
            let mut stripped = map.clone();
            stripped.remove(EXACT_KEY);
            actual.as_object() == Some(&stripped)
        }
        _ => actual == expected,
    };
    if equal {
        Outcome::Pass
    } else {
        Outcome::Fail(format!("was '{}', expected '{}'", render(actual), render(expected)))
    }
}

/// Lists are taken as-is, any other value becomes a one-element list
fn to_seq(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(list) => list.clone(),
        other => vec![other.clone()],
    }
}

/// Order-insensitive canonical ordering of JSON values
fn sorted(mut values: Vec<Value>) -> Vec<Value> {
    values.sort_by_cached_key(Value::to_string);
    values
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Report, Verdict};
    use serde_json::json;

    fn run(expected: Value, actual: Value, select: Option<&str>) -> (u32, Report) {
        let mut rw = ResultWriter::new(None).unwrap();
        let count = {
            let mut suite = rw.start_suite("cmp");
            compare(&mut suite, &expected, &actual, select)
        };
        (count, rw.report().clone())
    }

    fn messages(report: &Report) -> Vec<(String, Verdict)> {
        report.suites[0]
            .tests
            .iter()
            .flat_map(|t| t.verdicts.iter().map(move |v| (t.name.clone(), v.clone())))
            .collect()
    }

    #[test]
    fn test_scalar_mismatch_reports_both_values() {
        let (count, report) = run(
            json!([{"ifname": "eth0", "mtu": 1500}]),
            json!([{"ifname": "eth0", "mtu": 1400}]),
            None,
        );
        assert_eq!(count, 1);
        assert_eq!(report.suites.len(), 1);
        assert_eq!(report.counts.failures, 1);

        let failed = messages(&report);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "Entry 0.mtu");
        let Verdict::Failure(msg) = &failed[0].1 else {
            panic!("expected failure verdict");
        };
        assert!(msg.contains("1400") && msg.contains("1500"));
    }

    #[test]
    fn test_single_object_is_promoted() {
        let (count, report) = run(json!({"a": "x"}), json!({"a": "x", "b": 1}), None);
        assert_eq!(count, 0);
        // Length Match + Entry 0.a
        assert_eq!(report.counts.tests, 2);
    }

    #[test]
    fn test_legacy_subset_marker() {
        let (count, _) = run(
            json!([{"servers": ["1.1.1.1", "__COND__SUBSET"]}]),
            json!([{"servers": ["1.1.1.1", "8.8.8.8"]}]),
            None,
        );
        assert_eq!(count, 0);
    }

    #[test]
    fn test_legacy_subset_missing_entry() {
        let (count, report) = run(
            json!([{"servers": ["9.9.9.9", "__COND__SUBSET"]}]),
            json!([{"servers": ["1.1.1.1", "8.8.8.8"]}]),
            None,
        );
        assert_eq!(count, 1);
        assert_eq!(report.counts.failures, 1);
    }

    #[test]
    fn test_exact_list_ignores_order() {
        let (count, _) = run(
            json!([{"flags": ["UP", "BROADCAST", "LOWER_UP"]}]),
            json!([{"flags": ["LOWER_UP", "UP", "BROADCAST"]}]),
            None,
        );
        assert_eq!(count, 0);

        let (count, _) = run(
            json!([{"flags": ["UP", "UP"]}]),
            json!([{"flags": ["UP"]}]),
            None,
        );
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unknown_and_duplicate_markers_are_fatal() {
        let (count, report) = run(
            json!([{"l": ["a", "__COND__SUPERSET"]}]),
            json!([{"l": ["a"]}]),
            None,
        );
        assert_eq!(count, 1);
        assert_eq!(report.counts.errors, 1);

        let (_, report) = run(
            json!([{"l": ["a", "__COND__SUBSET", "__COND__SUBSET"]}]),
            json!([{"l": ["a"]}]),
            None,
        );
        assert_eq!(report.counts.errors, 1);
        assert_eq!(report.counts.failures, 0);
    }

    #[test]
    fn test_member_descriptor() {
        let descriptor = json!({"_type": "array", "expected": ["a", "b"], "not_expected": ["z"]});
        let (count, _) = run(
            json!([{"l": descriptor.clone()}]),
            json!([{"l": ["b", "a", "a", "c"]}]),
            None,
        );
        assert_eq!(count, 0);

        let (count, report) = run(json!([{"l": descriptor}]), json!([{"l": ["z", "c"]}]), None);
        assert_eq!(count, 1);
        let failed = messages(&report);
        let Verdict::Failure(msg) = &failed[0].1 else {
            panic!("expected failure verdict");
        };
        assert!(msg.contains("must contain all of"));
        assert!(msg.contains("must contain none of"));
    }

    #[test]
    fn test_partial_object_ignores_extra_keys() {
        let (count, _) = run(
            json!([{"linkinfo": {"_exact": false, "info_kind": "veth"}}]),
            json!([{"linkinfo": {"info_kind": "veth", "info_data": {}}}]),
            None,
        );
        assert_eq!(count, 0);

        let (count, _) = run(
            json!([{"linkinfo": {"_exact": false, "info_kind": "bridge"}}]),
            json!([{"linkinfo": {"info_kind": "veth"}}]),
            None,
        );
        assert_eq!(count, 1);
    }

    #[test]
    fn test_exact_object_requires_equality() {
        let (count, _) = run(
            json!([{"linkinfo": {"info_kind": "veth"}}]),
            json!([{"linkinfo": {"info_kind": "veth", "info_data": {}}}]),
            None,
        );
        assert_eq!(count, 1);

        let (count, _) = run(
            json!([{"linkinfo": {"_exact": true, "info_kind": "veth"}}]),
            json!([{"linkinfo": {"info_kind": "veth"}}]),
            None,
        );
        assert_eq!(count, 0);

        let (count, _) = run(
            json!([{"linkinfo": {"_exact": true, "info_kind": "veth"}}]),
            json!([{"linkinfo": {"info_kind": "veth", "info_data": {}}}]),
            None,
        );
        assert_eq!(count, 1);
    }

    #[test]
    fn test_missing_key() {
        let (count, report) = run(json!([{"mtu": 1500}]), json!([{"ifname": "eth0"}]), None);
        assert_eq!(count, 1);
        let failed = messages(&report);
        assert_eq!(failed[0].1, Verdict::Failure("key 'mtu' is missing".into()));
    }

    #[test]
    fn test_length_mismatch_is_single_fatal() {
        let (count, report) = run(
            json!([{"a": 1}, {"a": 2}]),
            json!([{"a": 1}]),
            None,
        );
        assert_eq!(count, 1);
        assert_eq!(report.counts.tests, 1);
        assert_eq!(report.counts.errors, 1);
        assert_eq!(report.counts.failures, 0);
        assert_eq!(report.suites[0].tests[0].name, "Length Match");
    }

    #[test]
    fn test_empty_actual_records_are_dropped() {
        let (count, _) = run(json!([{"a": 1}]), json!([{}, {"a": 1}, {}]), None);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_select_descends_into_field() {
        let (count, report) = run(
            json!([{"addr_info": [{"local": "10.0.0.1", "prefixlen": 24}]}]),
            json!([{"ifname": "eth0", "addr_info": [
                {"local": "10.0.0.1", "prefixlen": 24, "scope": "global"}
            ]}]),
            Some("addr_info"),
        );
        assert_eq!(count, 0);
        let names: Vec<_> = report.suites[0].tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Length Match", "Entry 0.local", "Entry 0.prefixlen"]
        );
    }

    #[test]
    fn test_select_with_multiple_elements_is_fatal() {
        let (count, report) = run(
            json!([{"addr_info": []}]),
            json!([{"addr_info": []}, {"addr_info": []}]),
            Some("addr_info"),
        );
        assert_eq!(count, 1);
        assert_eq!(report.counts.tests, 1);
        assert_eq!(report.counts.errors, 1);
        assert_eq!(report.suites[0].tests[0].name, "Select");
    }
}
