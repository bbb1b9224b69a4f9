//! Schema decoding boundary.
//!
//! The engine only sees [`SchemaDecoder`]. [`BerSchemaDecoder`] is the
//! implementation shipped with the crate, driven by tables compiled from
//! ASN.1 text by [`Asn1Schema`].

mod compile;
mod decoder;

use std::fmt;

use thiserror::Error;

pub use compile::{is_synth_choice_tag, Asn1Schema, FieldSpec, TagKey, SYNTH_CHOICE_BASE};
pub use decoder::{decode_int_i64, BerSchemaDecoder};

use crate::value::FieldValue;

/// Failure to build or load schema tables.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("invalid schema pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("invalid tag number: {0}")]
    TagNumber(#[from] std::num::ParseIntError),
    #[error("schema cache I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("schema cache encoding: {0}")]
    Cache(#[from] bincode::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaErrorKind {
    UnknownType(String),
    RootTagMismatch { type_name: String, tag: TagKey },
    NoChoiceAlternative { choice: String, tag: TagKey },
    MissingField { field: String },
    Truncated { offset: usize },
}

impl fmt::Display for SchemaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownType(t) => write!(f, "unknown type {t}"),
            Self::RootTagMismatch { type_name, tag } => {
                write!(f, "tag [{}:{}] does not start a {type_name}", tag.0, tag.1)
            }
            Self::NoChoiceAlternative { choice, tag } => {
                write!(f, "no alternative of {choice} matches tag [{}:{}]", tag.0, tag.1)
            }
            Self::MissingField { field } => write!(f, "mandatory field {field} absent"),
            Self::Truncated { offset } => write!(f, "unparsable content at +{offset}"),
        }
    }
}

/// A schema decode failure and the field path it occurred under,
/// outermost name first.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at /{}", .path.join("/"))]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub path: Vec<String>,
}

impl SchemaError {
    pub fn new(kind: SchemaErrorKind) -> Self {
        Self { kind, path: Vec::new() }
    }

    /// Prepends `name` to the path.
    pub fn within(mut self, name: &str) -> Self {
        self.path.insert(0, name.to_owned());
        self
    }

    /// Path from the first occurrence of `branch`, joined with `/`.
    pub fn path_from(&self, branch: &str) -> Option<String> {
        let start = self.path.iter().position(|p| p == branch)?;
        Some(self.path[start..].join("/"))
    }
}

/// Anything that can turn a BER element into a field tree given a type name.
pub trait SchemaDecoder: Sync {
    fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<FieldValue, SchemaError>;

    /// Every field name the schema can produce.
    fn field_names(&self) -> Vec<String>;

    fn knows_type(&self, type_name: &str) -> bool;
}
