//! Streaming JSON Lines writer for decoded records.

use std::io::{self, Write};

use crate::engine::{DecodedRecord, RecordSource};
use crate::value::{FieldTree, FieldValue};

const RECORD_TYPE_KEY: &str = "recordType";

/// Writes `s` as a JSON string literal.
#[inline]
pub fn write_json_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(b"\"")?;
    let bytes = s.as_bytes();
    let mut run_start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        let esc: &[u8] = match b {
            b'"' => b"\\\"",
            b'\\' => b"\\\\",
            b'\n' => b"\\n",
            b'\r' => b"\\r",
            b'\t' => b"\\t",
            c if c < 0x20 => {
                w.write_all(&bytes[run_start..i])?;
                const HEX: &[u8; 16] = b"0123456789abcdef";
                w.write_all(&[b'\\', b'u', b'0', b'0', HEX[(c >> 4) as usize], HEX[(c & 0x0F) as usize]])?;
                run_start = i + 1;
                continue;
            }
            _ => continue,
        };
        w.write_all(&bytes[run_start..i])?;
        w.write_all(esc)?;
        run_start = i + 1;
    }
    w.write_all(&bytes[run_start..])?;
    w.write_all(b"\"")
}

#[inline]
fn write_int<W: Write>(w: &mut W, v: impl itoa::Integer) -> io::Result<()> {
    let mut buf = itoa::Buffer::new();
    w.write_all(buf.format(v).as_bytes())
}

fn write_value<W: Write>(w: &mut W, value: &FieldValue, scratch: &mut Vec<u8>) -> io::Result<()> {
    match value {
        FieldValue::Null => w.write_all(b"null"),
        FieldValue::Bool(true) => w.write_all(b"true"),
        FieldValue::Bool(false) => w.write_all(b"false"),
        FieldValue::Int(v) => write_int(w, *v),
        FieldValue::Text(s) => write_json_str(w, s),
        FieldValue::Bytes(b) => {
            scratch.clear();
            scratch.resize(b.len() * 2, 0);
            hex::encode_to_slice(b, scratch).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            w.write_all(b"\"")?;
            w.write_all(scratch)?;
            w.write_all(b"\"")
        }
        FieldValue::List(items) => {
            w.write_all(b"[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    w.write_all(b",")?;
                }
                write_value(w, item, scratch)?;
            }
            w.write_all(b"]")
        }
        FieldValue::Tree(tree) => {
            w.write_all(b"{")?;
            write_members(w, tree, false, None, scratch)?;
            w.write_all(b"}")
        }
        FieldValue::Choice(alt, inner) => {
            w.write_all(b"{")?;
            write_json_str(w, alt)?;
            w.write_all(b":")?;
            write_value(w, inner, scratch)?;
            w.write_all(b"}")
        }
    }
}

fn write_members<W: Write>(
    w: &mut W,
    tree: &FieldTree,
    mut comma: bool,
    skip: Option<&str>,
    scratch: &mut Vec<u8>,
) -> io::Result<()> {
    for (key, value) in tree.iter() {
        if skip == Some(key) {
            continue;
        }
        if comma {
            w.write_all(b",")?;
        }
        comma = true;
        write_json_str(w, key)?;
        w.write_all(b":")?;
        write_value(w, value, scratch)?;
    }
    Ok(())
}

fn source_name(source: RecordSource) -> &'static str {
    match source {
        RecordSource::Schema => "schema",
        RecordSource::Batch => "batch",
        RecordSource::Scanner => "scanner",
    }
}

/// Writes one record as a single JSON object followed by a newline.
///
/// Bookkeeping keys come first, then the record fields in decode order.
/// `recordType` is the record's alternative name when known, otherwise the
/// record's own `recordType` field; it is written once either way.
pub fn write_record<W: Write>(
    w: &mut W,
    filename: &str,
    record: &DecodedRecord,
    scratch: &mut Vec<u8>,
) -> io::Result<()> {
    w.write_all(b"{\"filename\":")?;
    write_json_str(w, filename)?;
    w.write_all(b",\"recordType\":")?;
    match (&record.record_type, record.fields.get(RECORD_TYPE_KEY)) {
        (Some(t), _) => write_json_str(w, t)?,
        (None, Some(value)) => write_value(w, value, scratch)?,
        (None, None) => w.write_all(b"null")?,
    }
    w.write_all(b",\"offset\":")?;
    match record.offset {
        Some(offset) => write_int(w, offset)?,
        None => w.write_all(b"null")?,
    }
    w.write_all(b",\"source\":")?;
    write_json_str(w, source_name(record.source))?;
    write_members(w, &record.fields, true, Some(RECORD_TYPE_KEY), scratch)?;
    w.write_all(b"}\n")
}
