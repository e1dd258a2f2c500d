//! JUnit XML report parsing.
//!
//! Every ecosystem supported by replayci is instrumented to emit JUnit XML,
//! which is the de facto interchange format for test results:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites>
//!   <testsuite name="tests" tests="3" failures="1" errors="0" skipped="1">
//!     <testcase classname="tests.test_math" name="test_add" time="0.100"/>
//!     <testcase classname="tests.test_math" name="test_sub" time="0.150">
//!       <failure message="assert 1 == 0" type="AssertionError">trace</failure>
//!       <system-out>captured</system-out>
//!     </testcase>
//!     <testcase classname="tests.test_math" name="test_mul" time="0.050">
//!       <skipped/>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! The parser is lenient: a report location that does not exist yields no
//! records, and a malformed file is skipped with a warning so the rest of a
//! report directory is still read.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};

use super::{OutcomeKind, TestCaseRecord, TestOutcome};

/// Errors raised while reading a single report file.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid XML attribute: {0}")]
    Attr(#[from] AttrError),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Parses every JUnit XML report found at `path`.
///
/// `path` may be a single report file or a directory, which is searched
/// recursively for `*.xml` files. Files are read in sorted path order and
/// their test cases are concatenated in document order. Missing paths and
/// unreadable files never fail the call.
pub fn parse_test_results(path: &Path) -> Vec<TestCaseRecord> {
    let files = report_files(path);
    debug!(
        "Found {} report file(s) under {}",
        files.len(),
        path.display()
    );

    let mut records = Vec::new();
    for file in files {
        match parse_junit_file(&file) {
            Ok(mut parsed) => records.append(&mut parsed),
            Err(e) => warn!("Skipping unreadable report {}: {}", file.display(), e),
        }
    }
    records
}

/// Parses a single JUnit XML file.
pub fn parse_junit_file(path: &Path) -> ReportResult<Vec<TestCaseRecord>> {
    let bytes = std::fs::read(path)?;
    parse_junit_str(&String::from_utf8_lossy(&bytes))
}

/// Which part of the current test case incoming text belongs to.
#[derive(Clone, Copy)]
enum Section {
    Outcome,
    SystemOut,
    SystemErr,
}

/// Parses JUnit XML content into test case records.
pub fn parse_junit_str(content: &str) -> ReportResult<Vec<TestCaseRecord>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<TestCaseRecord> = None;
    let mut section: Option<Section> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"testcase" => current = Some(testcase_from(&e)?),
                b"failure" | b"error" | b"skipped" => {
                    if let Some(record) = current.as_mut() {
                        record.outcomes.push(outcome_from(&e)?);
                        section = Some(Section::Outcome);
                    }
                }
                b"system-out" if current.is_some() => section = Some(Section::SystemOut),
                b"system-err" if current.is_some() => section = Some(Section::SystemErr),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"testcase" => records.push(testcase_from(&e)?),
                b"failure" | b"error" | b"skipped" => {
                    if let Some(record) = current.as_mut() {
                        record.outcomes.push(outcome_from(&e)?);
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if let (Some(record), Some(section)) = (current.as_mut(), section) {
                    append_text(record, section, &t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let (Some(record), Some(section)) = (current.as_mut(), section) {
                    append_text(record, section, &String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"testcase" => {
                    if let Some(record) = current.take() {
                        records.push(record);
                    }
                    section = None;
                }
                b"failure" | b"error" | b"skipped" | b"system-out" | b"system-err" => {
                    section = None;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(records)
}

fn append_text(record: &mut TestCaseRecord, section: Section, text: &str) {
    let target = match section {
        Section::Outcome => match record.outcomes.last_mut() {
            Some(outcome) => &mut outcome.text,
            None => return,
        },
        Section::SystemOut => &mut record.stdout,
        Section::SystemErr => &mut record.stderr,
    };
    target.push_str(text);
}

fn testcase_from(e: &BytesStart<'_>) -> ReportResult<TestCaseRecord> {
    let mut record = TestCaseRecord::new(
        attribute(e, b"classname")?.unwrap_or_default(),
        attribute(e, b"name")?.unwrap_or_default(),
    );
    record.duration = attribute(e, b"time")?
        .as_deref()
        .and_then(parse_seconds)
        .unwrap_or(Duration::ZERO);
    Ok(record)
}

/// Parses a `time` attribute. A lone `,` is taken as the decimal separator;
/// values that do not fit a [`Duration`] are ignored.
fn parse_seconds(value: &str) -> Option<Duration> {
    let value = value.trim();
    let seconds = if value.contains('.') {
        value.parse::<f64>().ok()?
    } else {
        value.replacen(',', ".", 1).parse::<f64>().ok()?
    };
    Duration::try_from_secs_f64(seconds).ok()
}

fn outcome_from(e: &BytesStart<'_>) -> ReportResult<TestOutcome> {
    let kind = match e.name().as_ref() {
        b"failure" => OutcomeKind::Failure,
        b"error" => OutcomeKind::Error,
        _ => OutcomeKind::Skipped,
    };
    Ok(TestOutcome::new(kind)
        .with_message(attribute(e, b"message")?.unwrap_or_default())
        .with_type(attribute(e, b"type")?.unwrap_or_default()))
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> ReportResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            let value: Cow<'_, str> = attr.unescape_value()?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn report_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    if !path.is_dir() {
        debug!("No report found at {}", path.display());
        return Vec::new();
    }

    let mut files = Vec::new();
    collect_xml_files(path, &mut files);
    files.sort();
    files
}

fn collect_xml_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read report directory {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_xml_files(&path, files);
        } else if path.extension().is_some_and(|ext| ext == "xml") {
            files.push(path);
        }
    }
}
