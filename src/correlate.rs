//! Proximity correlation of scanner hits with decoded records.
//!
//! A record anchored at byte offset `a` receives, per category, the fields
//! of the first hit whose offset lies within that category's window of `a`.
//! Merging is additive: a key already present in the record is never
//! overwritten.

use crate::scan::{HitCategory, ScanIndex};
use crate::value::{FieldTree, FieldValue};

#[derive(Debug, Default)]
struct CategoryHits {
    offsets: Vec<usize>,
    fields: Vec<Vec<(&'static str, FieldValue)>>,
}

impl CategoryHits {
    /// Indices of hits with `|offset - anchor| <= window`.
    fn in_window(&self, anchor: usize, window: usize) -> std::ops::Range<usize> {
        let low = anchor.saturating_sub(window);
        let high = anchor.saturating_add(window);
        let lo = self.offsets.partition_point(|&o| o < low);
        let hi = self.offsets.partition_point(|&o| o <= high);
        lo..hi.max(lo)
    }
}

/// Offset-sorted scanner hits, immutable once built.
#[derive(Debug, Default)]
pub struct HitIndex {
    categories: Vec<(HitCategory, CategoryHits)>,
}

impl HitIndex {
    pub fn build(scan: &ScanIndex<'_>) -> Self {
        let categories = HitCategory::ALL
            .iter()
            .map(|&category| {
                let hits = scan.hits(category);
                let mut sorted: Vec<_> = hits.iter().collect();
                sorted.sort_by_key(|h| h.offset);
                let entry = CategoryHits {
                    offsets: sorted.iter().map(|h| h.offset).collect(),
                    fields: sorted.iter().map(|h| h.fields.clone()).collect(),
                };
                (category, entry)
            })
            .collect();
        Self { categories }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.iter().all(|(_, c)| c.offsets.is_empty())
    }

    /// Adds scanner values near `anchor` to `record`. Returns the number of
    /// keys inserted.
    pub fn merge_into(&self, record: &mut FieldTree, anchor: usize) -> usize {
        let mut inserted = 0;
        for (category, hits) in &self.categories {
            let range = hits.in_window(anchor, category.window());
            for fields in &hits.fields[range] {
                for (key, value) in fields {
                    if record.insert_if_absent(key, value.clone()) {
                        inserted += 1;
                    }
                }
            }
        }
        inserted
    }

    /// Scanner-only records, one per sequence-number hit, each correlated
    /// with the other categories around it.
    pub fn synthesize(&self) -> Vec<(usize, FieldTree)> {
        let Some((_, anchors)) = self
            .categories
            .iter()
            .find(|(c, _)| *c == HitCategory::SequenceNumber)
        else {
            return Vec::new();
        };
        anchors
            .offsets
            .iter()
            .map(|&offset| {
                let mut record = FieldTree::new();
                self.merge_into(&mut record, offset);
                (offset, record)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::scan;

    fn msisdn_at(buf: &mut [u8], offset: usize, last: u8) {
        buf[offset..offset + 8].copy_from_slice(&[0x9B, 0x06, 0x19, 0x32, 0x54, 0x76, 0x98, last]);
    }

    #[test]
    fn window_is_inclusive_and_first_in_range_wins() {
        let mut buf = vec![0u8; 3000];
        msisdn_at(&mut buf, 100, 0xF0);
        msisdn_at(&mut buf, 900, 0xF1);
        msisdn_at(&mut buf, 2960, 0xF2);
        let index = HitIndex::build(&scan(&buf));

        let mut record = FieldTree::new();
        assert_eq!(index.merge_into(&mut record, 1100), 1);
        assert_eq!(record.get("servedMSISDN"), Some(&FieldValue::text("91234567890")));

        // 900 sits exactly on the lower edge
        let mut edge = FieldTree::new();
        index.merge_into(&mut edge, 1900);
        assert_eq!(edge.get("servedMSISDN"), Some(&FieldValue::text("91234567891")));

        let mut far = FieldTree::new();
        assert_eq!(index.merge_into(&mut far, 1950), 0);
        assert!(far.is_empty());
    }

    #[test]
    fn merge_is_additive_only() {
        let mut buf = vec![0u8; 100];
        msisdn_at(&mut buf, 10, 0xF0);
        let index = HitIndex::build(&scan(&buf));

        let mut record = FieldTree::new();
        record.insert("servedMSISDN", FieldValue::text("from-schema"));
        record.insert("other", FieldValue::Int(1));
        let before: Vec<String> = record.iter().map(|(k, _)| k.to_owned()).collect();

        assert_eq!(index.merge_into(&mut record, 10), 0);
        assert_eq!(record.get("servedMSISDN"), Some(&FieldValue::text("from-schema")));
        let after: Vec<String> = record.iter().map(|(k, _)| k.to_owned()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn location_window_is_wider() {
        let mut buf = vec![0u8; 1200];
        buf[0..4].copy_from_slice(&[0x88, 0x02, 0x01, 0x2C]);
        let index = HitIndex::build(&scan(&buf));
        let mut record = FieldTree::new();
        index.merge_into(&mut record, 1020);
        assert_eq!(record.get("locationAreaCode"), Some(&FieldValue::Int(300)));
    }

    #[test]
    fn synthesized_records_anchor_on_sequence_numbers() {
        let mut buf = vec![0u8; 200];
        buf[0..5].copy_from_slice(&[0x95, 0x03, 0x02, 0x01, 0x07]);
        msisdn_at(&mut buf, 20, 0xF0);
        let index = HitIndex::build(&scan(&buf));
        let records = index.synthesize();
        assert_eq!(records.len(), 1);
        let (offset, record) = &records[0];
        assert_eq!(*offset, 0);
        assert_eq!(record.get("localSequenceNumber"), Some(&FieldValue::Int(7)));
        assert_eq!(record.get("servedMSISDN"), Some(&FieldValue::text("91234567890")));
    }
}
