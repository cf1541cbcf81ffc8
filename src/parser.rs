use std::{
    fs::File,
    io::{BufRead, BufReader, ErrorKind, Lines},
    path::Path,
};

use tracing::debug;

use crate::{
    error::{Error, Result},
    event::{Event, Trace},
};

const FIELD_COUNT: usize = 5;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Streaming reader over a heap trace.
///
/// Each line has the form `seconds,nanoseconds,function,address,size`.
/// Timestamps are rebased onto the first event so the trace starts at `0.0`.
/// Blank lines are skipped; anything else that does not fit the format stops
/// the stream with [`Error::Parse`] naming the offending line.
pub struct TraceReader<R> {
    lines: Lines<R>,
    line_no: usize,
    origin: Option<(u64, u64)>,
    failed: bool,
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        TraceReader {
            lines: reader.lines(),
            line_no: 0,
            origin: None,
            failed: false,
        }
    }

    /// Absolute `(seconds, nanoseconds)` of the first event, once it has been read.
    pub fn origin(&self) -> Option<(u64, u64)> {
        self.origin
    }

    fn parse_line(&mut self, line: &str) -> Result<Event> {
        let line_no = self.line_no;
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != FIELD_COUNT {
            return Err(Error::parse(
                line_no,
                format!(
                    "expected {FIELD_COUNT} comma-separated fields, found {}",
                    fields.len()
                ),
            ));
        }

        let seconds = parse_decimal(line_no, "seconds", fields[0])?;
        let nanoseconds = parse_decimal(line_no, "nanoseconds", fields[1])?;
        if u128::from(nanoseconds) >= NANOS_PER_SEC {
            return Err(Error::parse(
                line_no,
                format!("nanoseconds {nanoseconds} out of range (must be below {NANOS_PER_SEC})"),
            ));
        }
        let function = fields[2];
        if function.is_empty() {
            return Err(Error::parse(line_no, "empty function name"));
        }
        let address = parse_address(line_no, fields[3])?;
        let size = match fields[4] {
            "" => None,
            size => Some(parse_decimal(line_no, "size", size)?),
        };

        let origin = *self.origin.get_or_insert((seconds, nanoseconds));
        let timestamp = relative_seconds(origin, (seconds, nanoseconds))
            .ok_or_else(|| Error::parse(line_no, "timestamp precedes the first event"))?;

        Ok(Event::new(timestamp, function, address, size).with_line(line_no))
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(match e.kind() {
                        ErrorKind::InvalidData => {
                            Error::parse(self.line_no, "line is not valid UTF-8")
                        }
                        _ => Error::Io(e),
                    }));
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let event = self.parse_line(&line);
            self.failed = event.is_err();
            return Some(event);
        }
    }
}

/// Parse a whole trace into memory.
pub fn parse_trace<R: BufRead>(reader: R) -> Result<Trace> {
    let mut reader = TraceReader::new(reader);
    let events = reader.by_ref().collect::<Result<Vec<_>>>()?;
    debug!(events = events.len(), "parsed heap trace");

    Ok(Trace {
        origin: reader.origin(),
        events,
    })
}

pub fn parse_trace_str(input: &str) -> Result<Trace> {
    parse_trace(input.as_bytes())
}

/// Open and parse the trace file at `path`.
pub fn read_trace<P: AsRef<Path>>(path: P) -> Result<Trace> {
    let file = File::open(path.as_ref())?;
    parse_trace(BufReader::new(file))
}

fn parse_decimal(line: usize, field: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|e| Error::parse(line, format!("invalid {field} `{value}`: {e}")))
}

fn parse_address(line: usize, value: &str) -> Result<u64> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::parse(line, format!("invalid address `{value}`: {e}")))
}

/// Seconds from `origin` to `at`, or `None` if `at` is earlier.
fn relative_seconds(origin: (u64, u64), at: (u64, u64)) -> Option<f64> {
    let to_nanos = |(s, ns): (u64, u64)| u128::from(s) * NANOS_PER_SEC + u128::from(ns);
    let elapsed = to_nanos(at).checked_sub(to_nanos(origin))?;
    Some(elapsed as f64 / NANOS_PER_SEC as f64)
}
