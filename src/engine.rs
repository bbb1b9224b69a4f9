//! Per-file orchestration.
//!
//! A file goes through the direct scanner (raw bytes), the length
//! normalizer, then either a whole-file batch decode or per-record stream
//! decoding. Schema records are field-normalized and correlated with the
//! scanner hits found near their original offset. When the schema path
//! yields nothing, records are synthesized from scanner hits alone.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::correlate::HitIndex;
use crate::definite::normalize;
use crate::error::DecodeError;
use crate::fields::FieldRules;
use crate::profile::{BatchLayout, DecoderProfile};
use crate::scan::scan;
use crate::schema::{SchemaDecoder, SchemaError};
use crate::stream::{decode_stream, SkipReport, StreamOptions, Verdict};
use crate::value::{FieldTree, FieldValue};

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    /// Decode the elements of one file on the rayon pool.
    pub parallel_records: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Schema,
    Batch,
    Scanner,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedRecord {
    /// Offset in the original file. Batch records have none.
    pub offset: Option<usize>,
    /// Selected alternative of the record CHOICE.
    pub record_type: Option<String>,
    pub fields: FieldTree,
    pub source: RecordSource,
}

/// File-level problems that did not stop decoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FileIssue {
    #[error(transparent)]
    Structure(#[from] DecodeError),
    #[error("record stream stopped at offset {offset}")]
    StreamStopped { offset: usize },
    #[error("batch decode as {type_name} failed: {error}")]
    Batch { type_name: String, error: SchemaError },
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub filename: String,
    pub records: Vec<DecodedRecord>,
    pub skips: SkipReport,
    pub issues: Vec<FileIssue>,
    pub verdict: Verdict,
    /// Where the emitted records came from.
    pub source: Option<RecordSource>,
    pub scanner_hits: usize,
}

impl FileReport {
    fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_owned(),
            records: Vec::new(),
            skips: SkipReport::default(),
            issues: Vec::new(),
            verdict: Verdict::Empty,
            source: None,
            scanner_hits: 0,
        }
    }

    /// The "zero usable records" line, when that is what happened.
    pub fn summary(&self) -> Option<String> {
        if !self.records.is_empty() {
            return None;
        }
        match &self.verdict {
            Verdict::LikelyWrongRecordType { category, failures } => Some(format!(
                "{}: zero usable records, {failures} failures of category {category} (file likely wrong record type)",
                self.filename
            )),
            Verdict::NoUsableRecords { failures } => Some(format!(
                "{}: zero usable records, {failures} failures across {} categories",
                self.filename,
                self.skips.categories().count()
            )),
            Verdict::Decoded | Verdict::Empty => None,
        }
    }
}

/// Splits a decoded record into its CHOICE alternative name and fields.
fn split_record(value: FieldValue) -> (Option<String>, FieldTree) {
    match value {
        FieldValue::Choice(alt, inner) => match *inner {
            FieldValue::Tree(tree) => (Some(alt), tree),
            other => {
                let mut tree = FieldTree::new();
                tree.insert(alt.clone(), other);
                (Some(alt), tree)
            }
        },
        FieldValue::Tree(tree) => (None, tree),
        other => {
            let mut tree = FieldTree::new();
            tree.insert("value", other);
            (None, tree)
        }
    }
}

fn find_records<'v>(value: &'v FieldValue, field: &str) -> Option<&'v [FieldValue]> {
    match value {
        FieldValue::Tree(tree) => tree.find_list(field),
        FieldValue::Choice(_, inner) => find_records(inner, field),
        _ => None,
    }
}

pub struct Engine<D> {
    decoder: D,
    profile: DecoderProfile,
    rules: FieldRules,
    config: EngineConfig,
}

impl<D: SchemaDecoder> Engine<D> {
    pub fn new(decoder: D, profile: DecoderProfile, config: EngineConfig) -> Self {
        let rules = FieldRules::resolve(decoder.field_names(), profile.normalizer.clone());
        Self {
            decoder,
            profile,
            rules,
            config,
        }
    }

    pub fn profile(&self) -> &DecoderProfile {
        &self.profile
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    fn to_record(&self, value: FieldValue, offset: Option<usize>, source: RecordSource) -> DecodedRecord {
        let (record_type, tree) = split_record(value);
        DecodedRecord {
            offset,
            record_type,
            fields: self.rules.normalize_record(&tree),
            source,
        }
    }

    /// Whole-buffer decode as the batch type. `None` when the buffer is not
    /// a batch file.
    fn decode_batch(&self, batch: &BatchLayout, bytes: &[u8], report: &mut FileReport) -> Option<Vec<DecodedRecord>> {
        match self.decoder.decode(&batch.type_name, bytes) {
            Ok(value) => {
                let records = match find_records(&value, &batch.records_field) {
                    Some(items) => items
                        .iter()
                        .map(|item| self.to_record(item.clone(), None, RecordSource::Batch))
                        .collect(),
                    None => vec![self.to_record(value, None, RecordSource::Batch)],
                };
                debug!(type_name = %batch.type_name, records = records.len(), "decoded as batch file");
                Some(records)
            }
            Err(error) => {
                debug!(type_name = %batch.type_name, %error, "not a batch file");
                if batch.exclusive {
                    warn!(file = %report.filename, type_name = %batch.type_name, %error, "batch decode failed");
                    report.issues.push(FileIssue::Batch {
                        type_name: batch.type_name.clone(),
                        error,
                    });
                }
                None
            }
        }
    }

    pub fn decode_file(&self, filename: &str, data: &[u8]) -> FileReport {
        let mut report = FileReport::new(filename);

        let hits = if self.profile.scan {
            let index = scan(data);
            report.scanner_hits = index.total();
            HitIndex::build(&index)
        } else {
            HitIndex::default()
        };

        match normalize(data, &self.profile.envelope) {
            Ok(normalized) => {
                if let Some((_, cause)) = &normalized.verbatim_tail {
                    report.issues.push(cause.clone().into());
                }

                let batch_records = self
                    .profile
                    .batch
                    .as_ref()
                    .and_then(|batch| self.decode_batch(batch, &normalized.bytes, &mut report));
                let exclusive = self.profile.batch.as_ref().is_some_and(|b| b.exclusive);

                if let Some(records) = batch_records {
                    report.verdict = if records.is_empty() { Verdict::Empty } else { Verdict::Decoded };
                    report.records = records;
                    report.source = Some(RecordSource::Batch);
                } else if !exclusive {
                    let opts = StreamOptions {
                        type_name: &self.profile.record_type,
                        unstable_branches: &self.profile.unstable_branches,
                        parallel: self.config.parallel_records,
                    };
                    let outcome = decode_stream(&self.decoder, &normalized.bytes, &opts);
                    if let Some(at) = outcome.stopped_at {
                        report.issues.push(FileIssue::StreamStopped {
                            offset: normalized.origin_of(at),
                        });
                    }

                    report.records = outcome
                        .records
                        .into_iter()
                        .map(|r| {
                            let origin = normalized.origin_of(r.offset);
                            let mut record = self.to_record(r.value, Some(origin), RecordSource::Schema);
                            hits.merge_into(&mut record.fields, origin);
                            record
                        })
                        .collect();
                    report.skips = outcome.skips;
                    report.verdict = outcome.verdict;
                    if !report.records.is_empty() {
                        report.source = Some(RecordSource::Schema);
                    }
                }
            }
            Err(e) => {
                warn!(file = filename, error = %e, "falling back to direct scanner");
                report.issues.push(e.into());
            }
        }

        if report.records.is_empty() && !hits.is_empty() {
            report.records = hits
                .synthesize()
                .into_iter()
                .map(|(offset, fields)| DecodedRecord {
                    offset: Some(offset),
                    record_type: None,
                    fields,
                    source: RecordSource::Scanner,
                })
                .collect();
            if !report.records.is_empty() {
                report.source = Some(RecordSource::Scanner);
            }
        }

        if let Some(line) = report.summary() {
            warn!("{line}");
        }
        info!(
            file = filename,
            records = report.records.len(),
            skipped = report.skips.total(),
            scanner_hits = report.scanner_hits,
            source = ?report.source,
            "decoded file"
        );
        report
    }
}
