//! Length normalization: envelope unwrapping, record re-tagging and
//! indefinite-to-definite rewriting.
//!
//! Schema decoders are only handed definite-length, single, well-formed
//! elements. Everything that makes a raw CDR file violate that is handled
//! here before the stream is split.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::arena::ElementArena;
use crate::error::{DecodeError, DecodeResult};
use crate::tlv::{parse_tlv, read_header, write_length, SEQUENCE_TAG};

/// Identifier octet that opens a record body (`recordType [0]`).
pub const RECORD_TYPE_TAG: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeRules {
    /// Single-octet tags that may wrap a batch of records.
    pub wrapper_tags: Vec<u8>,
    pub max_unwrap: usize,
    /// Concrete record tag the schema expects at top level, if wrappers
    /// holding a bare record body should be re-tagged.
    pub record_tag: Option<u8>,
    /// Spliced ahead of a wrapper's content when it lacks the record-type
    /// field.
    pub discriminator: Vec<u8>,
    /// A bare record body shorter than this is a proprietary minimal layout.
    pub min_record_len: usize,
}

impl EnvelopeRules {
    /// Only rewrite indefinite lengths; never unwrap or re-tag.
    pub fn none() -> Self {
        Self {
            wrapper_tags: Vec::new(),
            max_unwrap: 0,
            record_tag: None,
            discriminator: Vec::new(),
            min_record_len: 0,
        }
    }
}

impl Default for EnvelopeRules {
    fn default() -> Self {
        Self {
            wrapper_tags: vec![SEQUENCE_TAG, 0xA0],
            max_unwrap: 3,
            record_tag: None,
            discriminator: Vec::new(),
            min_record_len: 0,
        }
    }
}

/// Output of [`normalize`].
#[derive(Debug)]
pub struct Normalized<'a> {
    pub bytes: Cow<'a, [u8]>,
    pub layers_unwrapped: usize,
    /// Indefinite-length elements rewritten as definite.
    pub rewritten: usize,
    pub retagged: usize,
    /// Original offset and cause when the tail had to be copied verbatim.
    pub verbatim_tail: Option<(usize, DecodeError)>,
    /// `(normalized offset, original offset)` of every top-level element.
    origins: Vec<(usize, usize)>,
}

impl Normalized<'_> {
    /// Maps an offset in [`Normalized::bytes`] back to the original buffer.
    pub fn origin_of(&self, offset: usize) -> usize {
        let idx = self.origins.partition_point(|&(n, _)| n <= offset);
        match idx {
            0 => offset,
            _ => {
                let (n, o) = self.origins[idx - 1];
                o + (offset - n)
            }
        }
    }
}

fn unwrap_envelope<'a>(buf: &'a [u8], rules: &EnvelopeRules) -> (&'a [u8], usize, usize) {
    let mut body = buf;
    let mut base = 0usize;
    let mut layers = 0usize;

    while layers < rules.max_unwrap {
        if !body.first().is_some_and(|t| rules.wrapper_tags.contains(t)) {
            break;
        }
        let Some((tlv, end)) = parse_tlv(body, 0) else {
            break;
        };
        if body[end..].iter().any(|&b| b != 0) {
            break;
        }
        let inner_opens_element = tlv
            .value
            .first()
            .is_some_and(|t| rules.wrapper_tags.contains(t) || rules.record_tag == Some(*t));
        if !inner_opens_element {
            break;
        }
        let Ok(header) = read_header(body, 0) else {
            break;
        };
        base += header.len();
        body = tlv.value;
        layers += 1;
    }
    (body, base, layers)
}

/// Re-tags a top-level wrapper element that holds a bare record body.
/// Returns `false` when the element is not such a wrapper.
fn retag_record(
    arena: &ElementArena<'_>,
    rules: &EnvelopeRules,
    origin: usize,
    out: &mut Vec<u8>,
) -> DecodeResult<bool> {
    let Some(record_tag) = rules.record_tag else {
        return Ok(false);
    };
    let root = arena.root();
    let tag = arena.tag_bytes(0);
    if tag.len() != 1 || !rules.wrapper_tags.contains(&tag[0]) {
        return Ok(false);
    }

    let mut content = Vec::with_capacity(root.content_size);
    arena.emit_root_content(&mut content);

    out.push(record_tag);
    if content.first() == Some(&RECORD_TYPE_TAG) {
        let declared = root.content.len();
        if declared < rules.min_record_len {
            return Err(DecodeError::ProprietaryFormatDetected {
                offset: origin,
                declared,
                minimum: rules.min_record_len,
            });
        }
        write_length(out, content.len());
    } else {
        write_length(out, rules.discriminator.len() + content.len());
        out.extend_from_slice(&rules.discriminator);
    }
    out.extend_from_slice(&content);
    Ok(true)
}

/// Normalizes a raw CDR buffer.
///
/// Fails only with [`DecodeError::ProprietaryFormatDetected`]; structural
/// problems in one element cause the remaining bytes to be copied verbatim
/// and are reported through [`Normalized::verbatim_tail`].
pub fn normalize<'a>(buf: &'a [u8], rules: &EnvelopeRules) -> DecodeResult<Normalized<'a>> {
    let (body, base, layers_unwrapped) = unwrap_envelope(buf, rules);
    if layers_unwrapped > 0 {
        debug!(layers = layers_unwrapped, base, "unwrapped outer envelope");
    }

    let mut out: Vec<u8> = Vec::with_capacity(body.len());
    let mut origins = Vec::new();
    let mut changed = false;
    let mut rewritten = 0usize;
    let mut retagged = 0usize;
    let mut verbatim_tail = None;

    let mut pos = 0usize;
    while pos < body.len() {
        if body.len() - pos < 2 {
            out.extend_from_slice(&body[pos..]);
            break;
        }
        if body[pos] == 0 && body[pos + 1] == 0 {
            out.extend_from_slice(&body[pos..pos + 2]);
            pos += 2;
            continue;
        }

        let arena = match ElementArena::parse(body, pos) {
            Ok(arena) => arena,
            Err(e) => {
                warn!(offset = base + pos, error = %e, "copying remaining bytes verbatim");
                out.extend_from_slice(&body[pos..]);
                verbatim_tail = Some((base + pos, e));
                break;
            }
        };

        origins.push((out.len(), base + pos));
        rewritten += arena.indefinite_count();
        if retag_record(&arena, rules, base + pos, &mut out)? {
            retagged += 1;
            changed = true;
        } else {
            changed |= arena.root().dirty;
            arena.emit(&mut out);
        }
        pos = arena.root().end;
    }

    if rewritten > 0 || retagged > 0 {
        debug!(rewritten, retagged, "normalized element lengths");
    }

    let bytes = if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(body)
    };
    Ok(Normalized {
        bytes,
        layers_unwrapped,
        rewritten,
        retagged,
        verbatim_tail,
        origins,
    })
}

/// Rewrites a single element with definite lengths throughout.
pub fn to_definite(element: &[u8]) -> DecodeResult<Vec<u8>> {
    let arena = ElementArena::parse(element, 0)?;
    let mut out = Vec::with_capacity(element.len());
    arena.emit(&mut out);
    Ok(out)
}
