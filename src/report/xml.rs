//! JUnit-style XML rendering of the report tree

use std::time::Duration;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::{Counts, Report, Verdict};
use crate::common::{Error, Result};

type XmlResult = std::result::Result<(), String>;

/// Render the report as an indented JUnit XML document
pub fn render(report: &Report) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    emit(&mut writer, report).map_err(|message| Error::Report {
        path: String::from("<render>"),
        message,
    })?;
    String::from_utf8(writer.into_inner()).map_err(|e| Error::Report {
        path: String::from("<render>"),
        message: e.to_string(),
    })
}

fn emit(writer: &mut Writer<Vec<u8>>, report: &Report) -> XmlResult {
    put(writer, Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut root = BytesStart::new("testsuites");
    push_counts(&mut root, &report.counts);
    root.push_attribute(("time", seconds(report.time).as_str()));
    put(writer, Event::Start(root))?;

    for suite in &report.suites {
        let mut node = BytesStart::new("testsuite");
        node.push_attribute(("name", suite.name.as_str()));
        push_counts(&mut node, &suite.counts);
        node.push_attribute(("timestamp", suite.timestamp.as_str()));
        node.push_attribute(("time", seconds(suite.time).as_str()));
        put(writer, Event::Start(node))?;

        for test in &suite.tests {
            let mut case = BytesStart::new("testcase");
            case.push_attribute(("name", test.name.as_str()));
            case.push_attribute(("time", seconds(test.time).as_str()));

            if test.verdicts.is_empty() {
                put(writer, Event::Empty(case))?;
                continue;
            }

            put(writer, Event::Start(case))?;
            for verdict in &test.verdicts {
                let (tag, message) = match verdict {
                    Verdict::Failure(m) => ("failure", m),
                    Verdict::Error(m) => ("error", m),
                };
                put(writer, Event::Start(BytesStart::new(tag)))?;
                put(writer, Event::Text(BytesText::new(message)))?;
                put(writer, Event::End(BytesEnd::new(tag)))?;
            }
            put(writer, Event::End(BytesEnd::new("testcase")))?;
        }

        put(writer, Event::End(BytesEnd::new("testsuite")))?;
    }

    put(writer, Event::End(BytesEnd::new("testsuites")))
}

fn put(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> XmlResult {
    writer.write_event(event).map_err(|e| e.to_string())
}

fn push_counts(node: &mut BytesStart<'_>, counts: &Counts) {
    node.push_attribute(("tests", counts.tests.to_string().as_str()));
    node.push_attribute(("failures", counts.failures.to_string().as_str()));
    node.push_attribute(("errors", counts.errors.to_string().as_str()));
}

fn seconds(time: Option<Duration>) -> String {
    format!("{:.2}", time.unwrap_or_default().as_secs_f64())
}
