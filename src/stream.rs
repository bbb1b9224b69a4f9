//! Record-stream decoding with per-element recovery.
//!
//! Every top-level element is handed to the schema decoder on its own. A
//! failing element is skipped using its own TLV length, so one bad record
//! never stalls the rest of the file.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::schema::{SchemaDecoder, SchemaError};
use crate::tlv::{iter_elements, Element};
use crate::value::FieldValue;

pub const UNCLASSIFIED: &str = "unclassified";

/// Failures of one category beyond this many are only counted.
const LOGGED_PER_CATEGORY: usize = 3;
const PROGRESS_EVERY: usize = 50;

/// Skip counts per failure category, in order of first occurrence.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SkipReport {
    counts: Vec<(String, usize)>,
    total: usize,
    last_category: Option<String>,
}

impl SkipReport {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn count(&self, category: &str) -> usize {
        self.counts
            .iter()
            .find(|(c, _)| c == category)
            .map_or(0, |(_, n)| *n)
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(c, n)| (c.as_str(), *n))
    }

    /// Counts one skipped element and decides whether it is worth a log line.
    pub fn record(&mut self, category: &str, offset: usize, err: &SchemaError) {
        let seen = match self.counts.iter_mut().find(|(c, _)| c == category) {
            Some((_, n)) => {
                *n += 1;
                *n
            }
            None => {
                self.counts.push((category.to_owned(), 1));
                1
            }
        };
        self.total += 1;

        let transition = self.last_category.as_deref().is_some_and(|last| last != category);
        if seen <= LOGGED_PER_CATEGORY || transition {
            warn!(offset, category, error = %err, "skipping record");
        } else if self.total % PROGRESS_EVERY == 0 {
            debug!(skipped = self.total, category, "still skipping records");
        }
        if self.last_category.as_deref() != Some(category) {
            self.last_category = Some(category.to_owned());
        }
    }

    /// The single category every failure fell into, if there is one.
    fn sole_category(&self) -> Option<(&str, usize)> {
        match self.counts.as_slice() {
            [(category, n)] => Some((category.as_str(), *n)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Decoded,
    Empty,
    /// Nothing decoded and every element failed the same way.
    LikelyWrongRecordType { category: String, failures: usize },
    NoUsableRecords { failures: usize },
}

impl Verdict {
    fn assess(decoded: usize, skips: &SkipReport) -> Self {
        if decoded > 0 {
            return Self::Decoded;
        }
        if skips.is_empty() {
            return Self::Empty;
        }
        match skips.sole_category() {
            Some((category, failures)) => Self::LikelyWrongRecordType {
                category: category.to_owned(),
                failures,
            },
            None => Self::NoUsableRecords {
                failures: skips.total(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamOptions<'a> {
    pub type_name: &'a str,
    /// Field or alternative names whose content is known to vary between
    /// vendor releases.
    pub unstable_branches: &'a [String],
    pub parallel: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    /// Offset of the element in the decoded buffer.
    pub offset: usize,
    pub value: FieldValue,
}

#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub records: Vec<StreamRecord>,
    pub skips: SkipReport,
    /// Where element iteration gave up before the end of the buffer.
    pub stopped_at: Option<usize>,
    pub verdict: Verdict,
}

/// Failure category: the error path from the outermost unstable branch it
/// passes through.
pub fn categorize(err: &SchemaError, unstable_branches: &[String]) -> String {
    err.path
        .iter()
        .find(|p| unstable_branches.contains(p))
        .and_then(|branch| err.path_from(branch))
        .unwrap_or_else(|| UNCLASSIFIED.to_owned())
}

pub fn decode_stream<D>(decoder: &D, buf: &[u8], opts: &StreamOptions<'_>) -> StreamOutcome
where
    D: SchemaDecoder + ?Sized,
{
    let mut iter = iter_elements(buf);
    let elements: Vec<Element<'_>> = iter.by_ref().collect();
    let stopped_at = iter.stopped_at();
    if let Some(at) = stopped_at {
        warn!(offset = at, remaining = buf.len() - at, "no readable element boundary, stream stops here");
    }

    let decode_one = |el: &Element<'_>| decoder.decode(opts.type_name, el.bytes);
    let results: Vec<Result<FieldValue, SchemaError>> = if opts.parallel {
        elements.par_iter().map(decode_one).collect()
    } else {
        elements.iter().map(decode_one).collect()
    };

    let mut records = Vec::with_capacity(elements.len());
    let mut skips = SkipReport::default();
    for (el, result) in elements.iter().zip(results) {
        match result {
            Ok(value) => {
                debug!(offset = el.offset, len = el.bytes.len(), "decoded record");
                records.push(StreamRecord {
                    offset: el.offset,
                    value,
                });
            }
            Err(err) => {
                let category = categorize(&err, opts.unstable_branches);
                skips.record(&category, el.offset, &err);
            }
        }
    }

    let verdict = Verdict::assess(records.len(), &skips);
    StreamOutcome {
        records,
        skips,
        stopped_at,
        verdict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaErrorKind;

    /// Accepts `30 01 xx` with any xx except 0xEE.
    struct ByteDecoder;

    impl SchemaDecoder for ByteDecoder {
        fn decode(&self, _type_name: &str, bytes: &[u8]) -> Result<FieldValue, SchemaError> {
            match bytes {
                [0x30, 0x01, 0xEE] => Err(SchemaError::new(SchemaErrorKind::MissingField {
                    field: "subscriberIMSI".into(),
                })
                .within("subscriberIMSI")
                .within("groupCallRecord")),
                [0x30, 0x01, 0xDD] => Err(SchemaError::new(SchemaErrorKind::Truncated { offset: 2 })),
                [0x30, 0x01, b] => Ok(FieldValue::Int(i64::from(*b))),
                _ => Err(SchemaError::new(SchemaErrorKind::Truncated { offset: 0 })),
            }
        }

        fn field_names(&self) -> Vec<String> {
            Vec::new()
        }

        fn knows_type(&self, _type_name: &str) -> bool {
            true
        }
    }

    fn opts(branches: &[String], parallel: bool) -> StreamOptions<'_> {
        StreamOptions {
            type_name: "CallEventRecord",
            unstable_branches: branches,
            parallel,
        }
    }

    #[test]
    fn failed_element_is_skipped_and_counted() {
        let branches = vec!["groupCallRecord".to_owned()];
        let buf = [0x30, 0x01, 0x01, 0x30, 0x01, 0xEE, 0x30, 0x01, 0x03];
        for parallel in [false, true] {
            let out = decode_stream(&ByteDecoder, &buf, &opts(&branches, parallel));
            let offsets: Vec<usize> = out.records.iter().map(|r| r.offset).collect();
            assert_eq!(offsets, [0, 6]);
            assert_eq!(out.skips.count("groupCallRecord/subscriberIMSI"), 1);
            assert_eq!(out.skips.total(), 1);
            assert_eq!(out.verdict, Verdict::Decoded);
            assert_eq!(out.stopped_at, None);
        }
    }

    #[test]
    fn unreadable_length_keeps_earlier_records() {
        let buf = [0x30, 0x01, 0x01, 0x30, 0x7F, 0x00];
        let out = decode_stream(&ByteDecoder, &buf, &opts(&[], false));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.stopped_at, Some(3));
    }

    #[test]
    fn uniform_failures_suggest_wrong_record_type() {
        let branches = vec!["groupCallRecord".to_owned()];
        let buf = [0x30, 0x01, 0xEE, 0x30, 0x01, 0xEE];
        let out = decode_stream(&ByteDecoder, &buf, &opts(&branches, false));
        assert_eq!(
            out.verdict,
            Verdict::LikelyWrongRecordType {
                category: "groupCallRecord/subscriberIMSI".into(),
                failures: 2
            }
        );

        let mixed = [0x30, 0x01, 0xEE, 0x30, 0x01, 0xDD];
        let out = decode_stream(&ByteDecoder, &mixed, &opts(&branches, false));
        assert_eq!(out.verdict, Verdict::NoUsableRecords { failures: 2 });
        assert_eq!(out.skips.count(UNCLASSIFIED), 1);
    }

    #[test]
    fn empty_buffer() {
        let out = decode_stream(&ByteDecoder, &[], &opts(&[], false));
        assert_eq!(out.verdict, Verdict::Empty);
    }
}
