//! Parser for the device's append-only text log.
//!
//! The firmware writes one event per line, usually prefixed with its own
//! millisecond clock:
//!
//! ```text
//! 1200 TRL_RELEASED
//! 1201 TRL_START
//! 1201 TRLP RWSD 2
//! 5310 TRLR RESP 2
//! ERR this should never happen
//! ```
//!
//! [`parse`] turns the bytes received so far into an ordered list of records
//! tagged with the trial they belong to. It only looks at complete lines, so
//! re-parsing a longer byte stream always yields a superset of the records
//! seen before with identical content for the shared prefix. Lines that do
//! not follow the grammar are skipped and counted.

use core::str;

use winnow::ModalResult;
use winnow::Parser;
use winnow::ascii::{dec_int, dec_uint, space0, space1};
use winnow::combinator::{opt, preceded, terminated};
use winnow::token::{rest, take_while};

/// Event carried by a single log line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEvent {
    /// The device began a new trial.
    TrialStart,
    /// The device acknowledged a release command.
    TrialReleased,
    /// Parameter value latched for the current trial (`TRLP`).
    TrialParam { name: String, value: i64 },
    /// Result reported for the current trial (`TRLR`).
    TrialResult { name: String, value: i64 },
    /// Device-side error report (`ERR`).
    DeviceError(String),
    /// Any other tagged device event (`EV`, `ST_CHG`, `DBG`, ...).
    Other { tag: String, detail: String },
}

/// One parsed log line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    /// Device clock in milliseconds, when the line carried one.
    pub time_ms: Option<u64>,
    pub event: LogEvent,
}

/// Parsed line tagged with the trial it belongs to.
///
/// Records written before the first `TRL_START` are setup output from the
/// device and carry no trial index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub trial: Option<usize>,
    pub line: LogLine,
}

/// Result of parsing the full log.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedLog {
    pub records: Vec<LogRecord>,
    /// Complete lines that did not match the grammar.
    pub malformed_lines: usize,
}

impl ParsedLog {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of `TRL_START` lines seen so far.
    #[must_use]
    pub fn trials_started(&self) -> usize {
        self.records
            .last()
            .and_then(|record| record.trial)
            .map_or(0, |index| index + 1)
    }
}

/// Parses every complete line in `bytes`.
#[must_use]
pub fn parse(bytes: &[u8]) -> ParsedLog {
    let mut parsed = ParsedLog::default();
    let mut trial: Option<usize> = None;

    for raw in complete_lines(bytes) {
        let Ok(text) = str::from_utf8(raw) else {
            parsed.malformed_lines += 1;
            continue;
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        match parse_line(text) {
            Some(line) => {
                if line.event == LogEvent::TrialStart {
                    trial = Some(trial.map_or(0, |index| index + 1));
                }
                parsed.records.push(LogRecord { trial, line });
            }
            None => parsed.malformed_lines += 1,
        }
    }

    parsed
}

/// Parses a single line of device output without its terminator.
#[must_use]
pub fn parse_line(text: &str) -> Option<LogLine> {
    let mut input = text.trim();
    let line = log_line(&mut input).ok()?;
    input.trim().is_empty().then_some(line)
}

fn complete_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let end = bytes
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |index| index + 1);
    bytes[..end].split(|byte| *byte == b'\n')
}

fn log_line(input: &mut &str) -> ModalResult<LogLine> {
    let time_ms = opt(timestamp).parse_next(input)?;
    let tag = word.parse_next(input)?;

    let event = match tag {
        "TRL_START" => LogEvent::TrialStart,
        "TRL_RELEASED" => LogEvent::TrialReleased,
        "TRLP" => {
            let (name, value) = assignment.parse_next(input)?;
            LogEvent::TrialParam {
                name: name.to_string(),
                value,
            }
        }
        "TRLR" => {
            let (name, value) = assignment.parse_next(input)?;
            LogEvent::TrialResult {
                name: name.to_string(),
                value,
            }
        }
        "ERR" => LogEvent::DeviceError(trailing.parse_next(input)?),
        other => LogEvent::Other {
            tag: other.to_string(),
            detail: trailing.parse_next(input)?,
        },
    };

    Ok(LogLine { time_ms, event })
}

fn timestamp(input: &mut &str) -> ModalResult<u64> {
    terminated(dec_uint, space1).parse_next(input)
}

fn word<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    take_while(1.., |c: char| !c.is_ascii_whitespace()).parse_next(input)
}

fn assignment<'s>(input: &mut &'s str) -> ModalResult<(&'s str, i64)> {
    (preceded(space1, word), preceded(space1, dec_int)).parse_next(input)
}

fn trailing(input: &mut &str) -> ModalResult<String> {
    preceded(space0, rest)
        .map(|text: &str| text.trim_end().to_string())
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> LogEvent {
        parse_line(text).expect("line should parse").event
    }

    #[test]
    fn parses_timestamped_trial_lines() {
        assert_eq!(
            parse_line("1201 TRL_START"),
            Some(LogLine {
                time_ms: Some(1201),
                event: LogEvent::TrialStart,
            })
        );
        assert_eq!(
            event("1201 TRLP STPPOS 150"),
            LogEvent::TrialParam {
                name: "STPPOS".to_string(),
                value: 150,
            }
        );
        assert_eq!(
            event("5310 TRLR RESP -1"),
            LogEvent::TrialResult {
                name: "RESP".to_string(),
                value: -1,
            }
        );
    }

    #[test]
    fn accepts_untimed_device_errors() {
        let line = parse_line("ERR this should never happen").expect("parse");
        assert_eq!(line.time_ms, None);
        assert_eq!(
            line.event,
            LogEvent::DeviceError("this should never happen".to_string())
        );
    }

    #[test]
    fn preserves_unknown_tags() {
        assert_eq!(
            event("88 ST_CHG 2 3"),
            LogEvent::Other {
                tag: "ST_CHG".to_string(),
                detail: "2 3".to_string(),
            }
        );
    }

    #[test]
    fn rejects_malformed_assignments() {
        assert_eq!(parse_line("12 TRLP RWSD left"), None);
        assert_eq!(parse_line("12 TRLP RWSD"), None);
        assert_eq!(parse_line("12 TRL_START now"), None);
    }

    #[test]
    fn splits_records_by_trial() {
        let log = b"0 DBG boot\n\
            10 TRL_RELEASED\n\
            11 TRL_START\n\
            11 TRLP RWSD 1\n\
            90 TRLR RESP 1\n\
            91 TRL_RELEASED\n\
            92 TRL_START\n";
        let parsed = parse(log);

        let trials: Vec<_> = parsed.records.iter().map(|record| record.trial).collect();
        assert_eq!(
            trials,
            [None, None, Some(0), Some(0), Some(0), Some(0), Some(1)]
        );
        assert_eq!(parsed.trials_started(), 2);
        assert_eq!(parsed.malformed_lines, 0);
    }

    #[test]
    fn ignores_partial_final_line() {
        let parsed = parse(b"11 TRL_START\n11 TRLP RWS");
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.malformed_lines, 0);

        let longer = parse(b"11 TRL_START\n11 TRLP RWSD 2\n");
        assert_eq!(longer.records[0], parsed.records[0]);
        assert_eq!(longer.records.len(), 2);
    }

    #[test]
    fn counts_and_skips_malformed_lines() {
        let parsed = parse(b"11 TRL_START\r\n\xff\xfe\n\n12 TRLR RESP x\n13 TRLR RESP 2\n");
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.malformed_lines, 2);
    }

    #[test]
    fn empty_input_has_no_records() {
        let parsed = parse(b"");
        assert!(parsed.is_empty());
        assert_eq!(parsed.trials_started(), 0);
    }
}
