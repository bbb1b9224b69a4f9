//! BER tag/length primitives.
//!
//! Everything here works on borrowed slices and never allocates except for
//! [`write_length`]. Offsets are always absolute positions in the buffer that
//! was passed in.

use crate::error::{DecodeError, DecodeResult};

/// Identifier octet for a universal constructed SEQUENCE.
pub const SEQUENCE_TAG: u8 = 0x30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    /// 0 universal, 1 application, 2 context-specific, 3 private.
    pub class: u8,
    pub constructed: bool,
    pub number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Definite(usize),
    /// Length octet `0x80`; content runs until a matching End-of-Contents.
    Indefinite,
}

/// Decoded identifier and length octets of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub tag: Tag,
    pub tag_len: usize,
    pub length: Length,
    pub length_len: usize,
}

impl Header {
    #[inline]
    pub fn len(&self) -> usize {
        self.tag_len + self.length_len
    }
}

#[inline]
fn truncated(offset: usize, needed: usize) -> DecodeError {
    DecodeError::TruncatedInput { offset, needed }
}

/// Reads the identifier octet(s) at `pos`, following the high-tag-number form
/// while the continuation bit is set. Returns the tag and octets consumed.
pub fn read_tag(buf: &[u8], pos: usize) -> DecodeResult<(Tag, usize)> {
    let first = *buf.get(pos).ok_or_else(|| truncated(pos, 1))?;
    let class = (first >> 6) & 0x03;
    let constructed = (first & 0x20) != 0;
    let mut number = (first & 0x1F) as u32;
    let mut off = pos + 1;

    if number == 0x1F {
        number = 0;
        loop {
            let b = *buf.get(off).ok_or_else(|| truncated(off, 1))?;
            off += 1;
            number = (number << 7) | (b & 0x7F) as u32;
            if (b & 0x80) == 0 {
                break;
            }
        }
    }

    Ok((
        Tag {
            class,
            constructed,
            number,
        },
        off - pos,
    ))
}

/// Reads one length field at `pos`. Returns the length and octets consumed.
///
/// Indefinite form is reported as [`Length::Indefinite`], never as an error;
/// routing it to the normalizer is the caller's job.
pub fn read_length(buf: &[u8], pos: usize) -> DecodeResult<(Length, usize)> {
    let first = *buf.get(pos).ok_or_else(|| truncated(pos, 1))?;
    if (first & 0x80) == 0 {
        return Ok((Length::Definite(first as usize), 1));
    }

    let n = (first & 0x7F) as usize;
    if n == 0 {
        return Ok((Length::Indefinite, 1));
    }

    let avail = buf.len().saturating_sub(pos + 1);
    if n > avail {
        return Err(truncated(pos + 1, n - avail));
    }

    let mut len: usize = 0;
    for &b in &buf[pos + 1..pos + 1 + n] {
        // A length that does not fit in usize can never fit in the buffer.
        len = len
            .checked_mul(256)
            .and_then(|l| l.checked_add(b as usize))
            .ok_or_else(|| truncated(pos, usize::MAX))?;
    }
    Ok((Length::Definite(len), 1 + n))
}

pub fn read_header(buf: &[u8], pos: usize) -> DecodeResult<Header> {
    let (tag, tag_len) = read_tag(buf, pos)?;
    let (length, length_len) = read_length(buf, pos + tag_len)?;
    Ok(Header {
        tag,
        tag_len,
        length,
        length_len,
    })
}

/// Number of octets [`write_length`] emits for `len`.
#[inline]
pub fn encoded_length_len(len: usize) -> usize {
    if len < 0x80 {
        1
    } else {
        let significant = (usize::BITS - len.leading_zeros()).div_ceil(8) as usize;
        1 + significant
    }
}

/// Appends the minimal definite-length encoding of `len`.
pub fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

/// Finds the End-of-Contents that closes an indefinite-length element whose
/// content starts at `off`. Returns the offset just past the `00 00` pair.
///
/// Nested indefinite elements raise the depth and their own End-of-Contents
/// lowers it; definite elements are skipped whole so zero octets inside
/// their content never count.
pub fn find_eoc(data: &[u8], mut off: usize) -> Option<usize> {
    let mut depth: usize = 1;
    while off + 1 < data.len() {
        if data[off] == 0x00 && data[off + 1] == 0x00 {
            depth -= 1;
            off += 2;
            if depth == 0 {
                return Some(off);
            }
            continue;
        }

        let header = read_header(data, off).ok()?;
        let next = off + header.len();
        match header.length {
            Length::Indefinite => {
                if !header.tag.constructed {
                    return None;
                }
                depth += 1;
                off = next;
            }
            Length::Definite(len) => {
                let end = next.checked_add(len)?;
                if end > data.len() {
                    return None;
                }
                off = end;
            }
        }
    }
    None
}

/// A borrowed view of one element.
#[derive(Debug, Clone)]
pub struct Tlv<'a> {
    pub tag_class: u8,
    pub constructed: bool,
    pub tag_num: u32,
    pub value: &'a [u8],
    pub raw: &'a [u8],
}

impl<'a> Tlv<'a> {
    #[inline]
    pub fn key(&self) -> (u8, u32) {
        (self.tag_class, self.tag_num)
    }
}

/// Parses the element at `offset`, resolving indefinite lengths through
/// [`find_eoc`]. Returns the view and the offset just past the element.
pub fn parse_tlv(data: &[u8], offset: usize) -> Option<(Tlv<'_>, usize)> {
    if offset >= data.len() {
        return None;
    }
    let header = read_header(data, offset).ok()?;
    let content_start = offset + header.len();

    let (content_end, end) = match header.length {
        Length::Indefinite => {
            if !header.tag.constructed {
                return None;
            }
            let eoc_end = find_eoc(data, content_start)?;
            (eoc_end - 2, eoc_end)
        }
        Length::Definite(len) => {
            let end = content_start.checked_add(len)?;
            if end > data.len() {
                return None;
            }
            (end, end)
        }
    };

    Some((
        Tlv {
            tag_class: header.tag.class,
            constructed: header.tag.constructed,
            tag_num: header.tag.number,
            value: &data[content_start..content_end],
            raw: &data[offset..end],
        },
        end,
    ))
}

/// One complete top-level element of a concatenated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    pub offset: usize,
    pub bytes: &'a [u8],
}

impl Element<'_> {
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.bytes.len()
    }
}

/// Lazy iterator over concatenated definite-length elements.
///
/// Single pass: it stops for good at the first position where no complete
/// element can be read. `00 00` filler between elements is skipped.
pub struct ElementIter<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

pub fn iter_elements(buf: &[u8]) -> ElementIter<'_> {
    ElementIter {
        buf,
        pos: 0,
        done: false,
    }
}

impl<'a> ElementIter<'a> {
    /// Offset where iteration gave up before reaching the end of the buffer.
    pub fn stopped_at(&self) -> Option<usize> {
        (self.done && self.pos < self.buf.len()).then_some(self.pos)
    }

    fn stop(&mut self) -> Option<Element<'a>> {
        self.done = true;
        None
    }
}

impl<'a> Iterator for ElementIter<'a> {
    type Item = Element<'a>;

    fn next(&mut self) -> Option<Element<'a>> {
        if self.done {
            return None;
        }
        while self.pos + 1 < self.buf.len() && self.buf[self.pos] == 0 && self.buf[self.pos + 1] == 0 {
            self.pos += 2;
        }
        if self.buf.len() - self.pos < 2 {
            if self.pos == self.buf.len() {
                self.done = true;
                return None;
            }
            return self.stop();
        }

        let start = self.pos;
        let header = match read_header(self.buf, start) {
            Ok(h) => h,
            Err(_) => return self.stop(),
        };
        let len = match header.length {
            Length::Definite(len) => len,
            Length::Indefinite => return self.stop(),
        };
        let end = match (start + header.len()).checked_add(len) {
            Some(end) if end <= self.buf.len() => end,
            _ => return self.stop(),
        };

        self.pos = end;
        Some(Element {
            offset: start,
            bytes: &self.buf[start..end],
        })
    }
}
