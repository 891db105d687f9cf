//! Tagged interchange (RIS) stream reader.
//!
//! # Responsibility
//! - Split a byte stream into raw tag/value records, one record at a time.
//!
//! # Invariants
//! - Values are passed through as text when valid UTF-8, otherwise as raw
//!   bytes so the normalizer can quarantine them.
//! - Untagged lines continue the previous value.
//! - `ER` closes a record; a trailing record without `ER` is still yielded.

use crate::import::normalizer::{RawRecord, RawValue};
use std::io::BufRead;

const END_TAG: &str = "ER";
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Lazy record iterator over a buffered reader.
pub struct RisReader<R> {
    reader: R,
    line: Vec<u8>,
    first_line: bool,
    finished: bool,
}

impl<R: BufRead> RisReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            first_line: true,
            finished: false,
        }
    }

    fn read_record(&mut self) -> std::io::Result<Option<RawRecord>> {
        let mut record = RawRecord::new();
        let mut current: Option<(String, Vec<u8>)> = None;

        loop {
            self.line.clear();
            let read = self.reader.read_until(b'\n', &mut self.line)?;
            if read == 0 {
                self.finished = true;
                flush_field(&mut record, current.take());
                return Ok((!record.is_empty()).then_some(record));
            }

            let mut line = trim_line_end(&self.line);
            if self.first_line {
                self.first_line = false;
                line = line.strip_prefix(UTF8_BOM).unwrap_or(line);
            }

            match split_tagged(line) {
                Some((tag, _)) if tag == END_TAG => {
                    flush_field(&mut record, current.take());
                    if record.is_empty() {
                        continue;
                    }
                    return Ok(Some(record));
                }
                Some((tag, value)) => {
                    flush_field(&mut record, current.take());
                    current = Some((tag, value.to_vec()));
                }
                None => {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    if let Some((_, value)) = current.as_mut() {
                        value.push(b'\n');
                        value.extend_from_slice(line);
                    }
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for RisReader<R> {
    type Item = std::io::Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

fn flush_field(record: &mut RawRecord, field: Option<(String, Vec<u8>)>) {
    let Some((tag, bytes)) = field else {
        return;
    };
    let value = match String::from_utf8(bytes) {
        Ok(text) => RawValue::Text(text),
        Err(err) => RawValue::Bytes(err.into_bytes()),
    };
    record.fields.push((tag, value));
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

/// Parses `XY  - value`; the value may be absent (`ER  -`).
fn split_tagged(line: &[u8]) -> Option<(String, &[u8])> {
    if line.len() < 5 || &line[2..5] != b"  -" {
        return None;
    }
    let tag = &line[..2];
    let valid_tag = tag[0].is_ascii_uppercase()
        && (tag[1].is_ascii_uppercase() || tag[1].is_ascii_digit());
    if !valid_tag {
        return None;
    }
    let rest = &line[5..];
    let value = rest.strip_prefix(b" ").unwrap_or(rest);
    Some((String::from_utf8_lossy(tag).into_owned(), value))
}
