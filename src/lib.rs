//! Tolerant decoding of BER-encoded telecom CDR files.
//!
//! [`engine::Engine`] ties the pieces together: length normalization,
//! schema decoding with per-record recovery, field normalization and
//! correlation with the heuristic tag scanner.

pub mod arena;
pub mod bcd;
pub mod correlate;
pub mod definite;
pub mod engine;
pub mod error;
pub mod fields;
pub mod jsonl;
pub mod profile;
pub mod scan;
pub mod schema;
pub mod stream;
pub mod timestamp;
pub mod tlv;
pub mod value;

pub use engine::{DecodedRecord, Engine, EngineConfig, FileReport, RecordSource};
pub use error::{DecodeError, DecodeResult};
pub use profile::{DecoderProfile, RecordFamily};
pub use schema::{Asn1Schema, BerSchemaDecoder, SchemaDecoder};
pub use value::{FieldTree, FieldValue};
