//! Heuristic CDR timestamp decoding.
//!
//! Strategies are tried in order and the first that yields a valid calendar
//! date wins:
//!
//! 1. 3GPP BCD `YYMMDDhhmmss[Shhmm]`
//! 2. big-endian Unix epoch seconds
//! 3. printable ASCII date text
//! 4. binary `u16` year followed by month and day octets
//! 5. hex search for a year between 2000 and 2030
//!
//! Every result is rendered in UTC as `YYYY-MM-DDThh:mm:ss+00:00`.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

const EPOCH_MIN: u64 = 946_684_800; // 2000-01-01
const EPOCH_MAX: u64 = 1_893_456_000; // 2030-01-01
const YEAR_MIN: i32 = 2000;
const YEAR_MAX: i32 = 2030;

const TEXT_DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y%m%d", "%d/%m/%Y", "%m/%d/%Y"];

const WINDOW_BEFORE: usize = 50;
const WINDOW_AFTER: usize = 100;

fn render(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn midnight_utc(date: NaiveDate) -> Option<String> {
    date.and_hms_opt(0, 0, 0).map(|dt| render(dt.and_utc()))
}

#[inline]
fn bcd_pair(b: u8) -> Option<u32> {
    let (hi, lo) = (b >> 4, b & 0x0F);
    (hi <= 9 && lo <= 9).then(|| u32::from(hi) * 10 + u32::from(lo))
}

fn from_bcd(raw: &[u8]) -> Option<String> {
    if !(6..=9).contains(&raw.len()) {
        return None;
    }
    let digits: Vec<u32> = raw[..6]
        .iter()
        .flat_map(|&b| [b >> 4, b & 0x0F])
        .filter(|&n| n <= 9)
        .map(u32::from)
        .collect();
    if digits.len() < 12 {
        return None;
    }
    let pair = |i: usize| digits[i] * 10 + digits[i + 1];
    let yy = pair(0) as i32;
    let year = if yy < 69 { 2000 + yy } else { 1900 + yy };
    let local = NaiveDate::from_ymd_opt(year, pair(2), pair(4))?
        .and_hms_opt(pair(6), pair(8), pair(10))?;

    let offset_secs = if raw.len() == 9 {
        let sign = if raw[6] == b'-' { -1 } else { 1 };
        let minutes = bcd_pair(raw[7])? * 60 + bcd_pair(raw[8])?;
        sign * minutes as i32 * 60
    } else {
        0
    };
    to_utc(local, offset_secs).map(render)
}

fn to_utc(local: NaiveDateTime, offset_secs: i32) -> Option<DateTime<Utc>> {
    let offset = FixedOffset::east_opt(offset_secs)?;
    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn from_epoch(raw: &[u8]) -> Option<String> {
    if raw.len() != 4 && raw.len() != 8 {
        return None;
    }
    let secs = raw.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    if !(EPOCH_MIN..EPOCH_MAX).contains(&secs) {
        return None;
    }
    DateTime::from_timestamp(secs as i64, 0).map(render)
}

fn from_text(raw: &[u8]) -> Option<String> {
    let readable: String = raw
        .iter()
        .filter(|b| (32..=126).contains(*b))
        .map(|&b| char::from(b))
        .collect();
    if readable.len() < 10 {
        return None;
    }
    let head = &readable[..10];
    let date = TEXT_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok());
    date.and_then(midnight_utc)
}

fn from_binary_date(raw: &[u8]) -> Option<String> {
    if raw.len() < 4 {
        return None;
    }
    for big_endian in [true, false] {
        for off in 0..(raw.len() - 3).min(4) {
            let pair = [raw[off], raw[off + 1]];
            let year = if big_endian {
                u16::from_be_bytes(pair)
            } else {
                u16::from_le_bytes(pair)
            } as i32;
            let (month, day) = (u32::from(raw[off + 2]), u32::from(raw[off + 3]));
            if !(YEAR_MIN..=YEAR_MAX).contains(&year) {
                continue;
            }
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return midnight_utc(date);
            }
        }
    }
    None
}

/// Month and day right after the year across all years first, then the
/// wider `+4 / +6 / +8` nibble offsets.
fn from_hex_search(raw: &[u8]) -> Option<String> {
    let hex_str = hex::encode(raw);
    let octet = |pos: usize| {
        hex_str
            .get(pos..pos + 2)
            .and_then(|h| u32::from_str_radix(h, 16).ok())
    };
    let years: Vec<(i32, usize)> = (YEAR_MIN..=YEAR_MAX)
        .filter_map(|year| hex_str.find(&format!("{year:04x}")).map(|pos| (year, pos)))
        .collect();
    let date_at = |&(year, pos): &(i32, usize), shift: usize| {
        let (month, day) = (octet(pos + shift)?, octet(pos + shift + 2)?);
        NaiveDate::from_ymd_opt(year, month, day)
    };

    let date = years
        .iter()
        .find_map(|found| date_at(found, 4))
        .or_else(|| {
            years
                .iter()
                .find_map(|found| [4, 6, 8].into_iter().find_map(|shift| date_at(found, shift)))
        });
    date.and_then(midnight_utc)
}

/// Decodes raw timestamp octets, or `None` when no strategy applies.
pub fn decode(raw: &[u8]) -> Option<String> {
    from_bcd(raw)
        .or_else(|| from_epoch(raw))
        .or_else(|| from_text(raw))
        .or_else(|| from_binary_date(raw))
        .or_else(|| from_hex_search(raw))
}

/// Retries [`decode`] over the bytes around `offset` in the full buffer,
/// for tags whose own payload does not hold a usable timestamp.
pub fn decode_in_window(buf: &[u8], offset: usize) -> Option<String> {
    let start = offset.saturating_sub(WINDOW_BEFORE);
    let end = offset.saturating_add(WINDOW_AFTER).min(buf.len());
    if start >= end {
        return None;
    }
    decode(&buf[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcd_with_positive_offset_converts_to_utc() {
        let raw = [0x24, 0x06, 0x19, 0x12, 0x00, 0x00, 0x2B, 0x02, 0x00];
        assert_eq!(decode(&raw).as_deref(), Some("2024-06-19T10:00:00+00:00"));
    }

    #[test]
    fn bcd_with_negative_offset_crosses_midnight() {
        let raw = [0x24, 0x12, 0x31, 0x22, 0x30, 0x15, b'-', 0x03, 0x00];
        assert_eq!(decode(&raw).as_deref(), Some("2025-01-01T01:30:15+00:00"));
    }

    #[test]
    fn bcd_without_offset_is_utc() {
        let raw = [0x24, 0x06, 0x19, 0x00, 0x15, 0x01];
        assert_eq!(decode(&raw).as_deref(), Some("2024-06-19T00:15:01+00:00"));
    }

    #[test]
    fn epoch_seconds() {
        // 2024-06-19T10:00:00Z
        let raw = 1_718_791_200u32.to_be_bytes();
        assert_eq!(decode(&raw).as_deref(), Some("2024-06-19T10:00:00+00:00"));
        // before 2000 is rejected by the epoch strategy
        assert_eq!(from_epoch(&100u32.to_be_bytes()), None);
    }

    #[test]
    fn text_dates() {
        assert_eq!(decode(b"2024-06-19xx").as_deref(), Some("2024-06-19T00:00:00+00:00"));
        assert_eq!(decode(b"19/06/2024").as_deref(), Some("2024-06-19T00:00:00+00:00"));
        assert_eq!(decode(b"06/19/2024").as_deref(), Some("2024-06-19T00:00:00+00:00"));
    }

    #[test]
    fn compact_text_date_must_fill_ten_characters() {
        assert_eq!(from_text(b"2024061912"), None);
        assert_eq!(from_text(b"20240619"), None);
        assert_eq!(from_text(b"2024-06-19T10:00"), Some("2024-06-19T00:00:00+00:00".into()));
    }

    #[test]
    fn binary_and_hex_search() {
        assert_eq!(from_binary_date(&[0x07, 0xE8, 0x06, 0x13]).as_deref(), Some("2024-06-19T00:00:00+00:00"));
        assert_eq!(from_binary_date(&[0xE8, 0x07, 0x06, 0x13]).as_deref(), Some("2024-06-19T00:00:00+00:00"));
        assert_eq!(
            from_hex_search(&[0xFF, 0x07, 0xE8, 0xFF, 0x06, 0x13]).as_deref(),
            Some("2024-06-19T00:00:00+00:00")
        );
    }

    #[test]
    fn hex_search_prefers_adjacent_date_of_a_later_year() {
        // 2001 (07 D1) has a valid date only two octets later, 2024 (07 E8) right after
        let raw = [0x07, 0xD1, 0xFF, 0x03, 0x04, 0x07, 0xE8, 0x06, 0x13];
        assert_eq!(from_hex_search(&raw).as_deref(), Some("2024-06-19T00:00:00+00:00"));
        // without an adjacent date the wider offsets still apply
        let raw = [0x07, 0xD1, 0xFF, 0x03, 0x04];
        assert_eq!(from_hex_search(&raw).as_deref(), Some("2001-03-04T00:00:00+00:00"));
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(decode(&[0xFF, 0xFF, 0xFF]), None);
        assert_eq!(decode(&[]), None);
    }

    #[test]
    fn window_retry_finds_neighbouring_timestamp() {
        let mut buf = vec![0u8; 4];
        buf.extend_from_slice(b"2024-06-19");
        buf.extend_from_slice(&[0u8; 4]);
        assert!(decode(&buf[0..2]).is_none());
        assert_eq!(decode_in_window(&buf, 0).as_deref(), Some("2024-06-19T00:00:00+00:00"));
    }
}
