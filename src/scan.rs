//! Direct Scanner: schema-free tag-signature search over a raw CDR buffer.
//!
//! Used when a file cannot be decoded against the schema at all, and as the
//! source of supplementary values for the correlator. Scanning never fails;
//! implausible candidates are dropped and the scan moves on.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::bcd::{decode_digits, decode_tbcd, DigitSet, NibbleOrder};
use crate::timestamp;
use crate::value::FieldValue;

const MAX_PAYLOAD: usize = 10_000;
const MAX_LENGTH_OCTETS: usize = 4;
const MAX_MSISDN_DIGITS: usize = 16;
const NUMBER_LIMIT: u64 = 1 << 31;

const DEFAULT_WINDOW: usize = 1000;
const LOCATION_WINDOW: usize = 1024;

/// What a scanned tag holds. Variants are listed in correlation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HitCategory {
    Msisdn,
    Imsi,
    OpeningTime,
    LocationArea,
    CellId,
    SequenceNumber,
}

impl HitCategory {
    pub const ALL: [HitCategory; 6] = [
        HitCategory::Msisdn,
        HitCategory::Imsi,
        HitCategory::OpeningTime,
        HitCategory::LocationArea,
        HitCategory::CellId,
        HitCategory::SequenceNumber,
    ];

    pub const fn tag(self) -> u8 {
        match self {
            HitCategory::Imsi => 0x83,
            HitCategory::Msisdn => 0x9B,
            HitCategory::SequenceNumber => 0x95,
            HitCategory::OpeningTime => 0x90,
            HitCategory::LocationArea => 0x88,
            HitCategory::CellId => 0x89,
        }
    }

    /// Maximum distance between a hit and a record it may be merged into.
    pub const fn window(self) -> usize {
        match self {
            HitCategory::LocationArea | HitCategory::CellId => LOCATION_WINDOW,
            _ => DEFAULT_WINDOW,
        }
    }

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

const fn build_tag_table() -> [Option<HitCategory>; 256] {
    let mut table = [None; 256];
    let mut i = 0;
    while i < HitCategory::ALL.len() {
        let cat = HitCategory::ALL[i];
        table[cat.tag() as usize] = Some(cat);
        i += 1;
    }
    table
}

static TAG_TABLE: [Option<HitCategory>; 256] = build_tag_table();

/// One accepted tag occurrence and the fields extracted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanHit<'a> {
    pub tag: u8,
    pub offset: usize,
    pub payload: &'a [u8],
    pub fields: Vec<(&'static str, FieldValue)>,
}

/// Hits grouped by category, each list sorted by offset.
#[derive(Debug, Default)]
pub struct ScanIndex<'a> {
    hits: [Vec<ScanHit<'a>>; 6],
}

impl<'a> ScanIndex<'a> {
    pub fn hits(&self, category: HitCategory) -> &[ScanHit<'a>] {
        &self.hits[category.index()]
    }

    pub fn total(&self) -> usize {
        self.hits.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.iter().all(Vec::is_empty)
    }
}

/// Plausible length after a candidate tag at `pos`: short form, or long
/// form over 1 to 4 octets, with `0 < len < 10_000` and the payload in
/// bounds. Returns the payload range.
fn plausible_payload(buf: &[u8], pos: usize) -> Option<(usize, usize)> {
    let first = *buf.get(pos + 1)? as usize;
    let (len, start) = if first < 0x80 {
        (first, pos + 2)
    } else {
        let n = first & 0x7F;
        if n == 0 || n > MAX_LENGTH_OCTETS {
            return None;
        }
        let octets = buf.get(pos + 2..pos + 2 + n)?;
        let len = octets.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
        (len, pos + 2 + n)
    };
    if len == 0 || len >= MAX_PAYLOAD {
        return None;
    }
    let end = start + len;
    (end <= buf.len()).then_some((start, end))
}

#[inline]
fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

fn msisdn_run_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d{7,16}").unwrap_or_else(|e| unreachable!("static pattern: {e}")))
}

/// Over-long decodes keep their first run of 7 to 16 decimal digits,
/// otherwise the first 16 characters.
fn msisdn_digit_run(digits: &str) -> &str {
    if digits.len() <= MAX_MSISDN_DIGITS {
        return digits;
    }
    match msisdn_run_pattern().find(digits) {
        Some(m) => m.as_str(),
        None => &digits[..MAX_MSISDN_DIGITS],
    }
}

#[derive(Default)]
struct SequenceContainer<'a> {
    number: Option<u64>,
    node_id: Option<&'a [u8]>,
}

impl<'a> SequenceContainer<'a> {
    fn offer_number(&mut self, bytes: &[u8], offset: usize) {
        let value = be_uint(bytes);
        if value == 0 || value >= NUMBER_LIMIT {
            debug!(offset, value, "dropping implausible sequence number");
            return;
        }
        self.number.get_or_insert(value);
    }

    /// Bounded primitive scan of a sequence-number container.
    fn scan(content: &'a [u8], offset: usize) -> Self {
        let mut found = SequenceContainer::default();
        let mut pos = 0;
        while pos + 1 < content.len() {
            let len = content[pos + 1] as usize;
            let end = pos + 2 + len;
            match content[pos] {
                0x02 if end <= content.len() && len <= 8 => {
                    found.offer_number(&content[pos + 2..end], offset);
                    pos = end;
                }
                0x04 if end <= content.len() && (1..=20).contains(&len) => {
                    found.node_id.get_or_insert(&content[pos + 2..end]);
                    pos = end;
                }
                0x80 | 0x81 | 0x82 | 0xA0 | 0xA1 | 0xA2 if end <= content.len() => {
                    found.scan_integers(&content[pos + 2..end], offset);
                    pos = end;
                }
                _ => pos += 1,
            }
        }
        found
    }

    fn scan_integers(&mut self, content: &[u8], offset: usize) {
        let mut pos = 0;
        while pos + 1 < content.len() {
            let len = content[pos + 1] as usize;
            let end = pos + 2 + len;
            if content[pos] == 0x02 && end <= content.len() && len <= 8 {
                self.offer_number(&content[pos + 2..end], offset);
                pos = end;
            } else {
                pos += 1;
            }
        }
    }
}

fn location_fields(
    name: &'static str,
    first2: &'static str,
    payload: &[u8],
    offset: usize,
) -> Vec<(&'static str, FieldValue)> {
    if payload.len() > 8 {
        return Vec::new();
    }
    let value = be_uint(payload);
    if value >= NUMBER_LIMIT {
        debug!(offset, value, field = name, "dropping implausible location value");
        return Vec::new();
    }
    let mut fields = vec![(name, FieldValue::Int(value as i64))];
    if payload.len() > 2 {
        fields.push((first2, FieldValue::Int(be_uint(&payload[..2]) as i64)));
    }
    fields
}

fn extract(
    category: HitCategory,
    buf: &[u8],
    offset: usize,
    payload: &[u8],
) -> Vec<(&'static str, FieldValue)> {
    match category {
        HitCategory::Imsi => {
            let imsi = decode_tbcd(payload);
            if imsi.is_empty() {
                return Vec::new();
            }
            vec![("servedIMSI", FieldValue::Text(imsi))]
        }
        HitCategory::Msisdn => {
            let digits = decode_digits(payload, NibbleOrder::Swapped, DigitSet::Extended);
            let msisdn = msisdn_digit_run(&digits);
            if msisdn.is_empty() {
                return Vec::new();
            }
            vec![("servedMSISDN", FieldValue::text(msisdn))]
        }
        HitCategory::SequenceNumber => {
            let found = SequenceContainer::scan(payload, offset);
            let mut fields = Vec::with_capacity(3);
            if let Some(n) = found.number {
                fields.push(("localSequenceNumber", FieldValue::Int(n as i64)));
                fields.push(("recordSequenceNumber", FieldValue::Int(n as i64)));
            }
            if let Some(node) = found.node_id {
                fields.push(("recordNodeId", FieldValue::Text(hex::encode(node))));
            }
            fields
        }
        HitCategory::OpeningTime => timestamp::decode(payload)
            .or_else(|| timestamp::decode_in_window(buf, offset))
            .map(|ts| vec![("recordOpeningTime", FieldValue::Text(ts))])
            .unwrap_or_default(),
        HitCategory::LocationArea => location_fields(
            "locationAreaCode",
            "locationAreaCode_first2bytes",
            payload,
            offset,
        ),
        HitCategory::CellId => location_fields(
            "cellIdentifier",
            "cellIdentifier_first2bytes",
            payload,
            offset,
        ),
    }
}

/// Scans `buf` once for every target tag.
pub fn scan(buf: &[u8]) -> ScanIndex<'_> {
    let mut index = ScanIndex::default();
    let mut covered_until = [0usize; 6];

    for pos in 0..buf.len().saturating_sub(1) {
        let Some(category) = TAG_TABLE[buf[pos] as usize] else {
            continue;
        };
        let slot = category.index();
        if pos < covered_until[slot] {
            continue;
        }
        let Some((start, end)) = plausible_payload(buf, pos) else {
            continue;
        };
        let payload = &buf[start..end];
        let fields = extract(category, buf, pos, payload);
        if fields.is_empty() {
            continue;
        }
        covered_until[slot] = end;
        index.hits[slot].push(ScanHit {
            tag: category.tag(),
            offset: pos,
            payload,
            fields,
        });
    }

    for hits in &mut index.hits {
        hits.sort_by_key(|h| h.offset);
    }
    debug!(hits = index.total(), bytes = buf.len(), "direct scan finished");
    index
}
