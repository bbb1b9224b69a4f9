use std::collections::HashMap;

use super::compile::{is_synth_choice_tag, Asn1Schema, FieldSpec, TagKey};
use super::{SchemaDecoder, SchemaError, SchemaErrorKind};
use crate::tlv::{parse_tlv, Tlv};
use crate::value::{FieldTree, FieldValue};

type DecodeResult<T> = Result<T, SchemaError>;

/// Two's-complement INTEGER of at most eight octets.
pub fn decode_int_i64(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    let init = if bytes[0] & 0x80 != 0 { -1i64 } else { 0 };
    Some(bytes.iter().fold(init, |acc, &b| (acc << 8) | i64::from(b)))
}

/// Tolerant-in-structure, strict-in-content BER decoder driven by an
/// [`Asn1Schema`].
///
/// Indefinite lengths and unknown tags are accepted. A CHOICE with no
/// matching alternative, a missing mandatory field, or content that does
/// not parse as TLVs is an error.
#[derive(Debug, Clone)]
pub struct BerSchemaDecoder {
    schema: Asn1Schema,
}

impl BerSchemaDecoder {
    pub fn new(schema: Asn1Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Asn1Schema {
        &self.schema
    }

    fn choice_alt_matches_tlv(&self, alt_type: &str, tlv: &Tlv<'_>) -> bool {
        let rt = self.schema.resolve_alias(alt_type);

        if let Some(key) = self.schema.type_outer_tag.get(rt) {
            return tlv.key() == *key;
        }
        if let Some(sub_alts) = self.schema.choices.get(rt) {
            return sub_alts.contains_key(&tlv.key());
        }
        self.schema.universal_tag_for_type(rt) == Some(tlv.key())
    }

    fn tlv_matches_root(&self, tlv: &Tlv<'_>, root_type: &str) -> bool {
        let rt = self.schema.resolve_alias(root_type);

        if let Some(key) = self.schema.type_outer_tag.get(rt) {
            return tlv.key() == *key;
        }
        if let Some(alts) = self.schema.choices.get(rt) {
            if alts.contains_key(&tlv.key()) {
                return true;
            }
            return alts.iter().any(|((cls, tag), (_, ftype))| {
                *cls == 3 && is_synth_choice_tag(*tag) && self.choice_alt_matches_tlv(ftype, tlv)
            });
        }
        if self.schema.sequences.contains_key(rt) || self.schema.seq_of_types.contains_key(rt) {
            return tlv.tag_class == 0 && tlv.constructed && tlv.tag_num == 16;
        }
        if self.schema.sets.contains_key(rt) || self.schema.set_of_types.contains_key(rt) {
            return tlv.tag_class == 0 && tlv.constructed && tlv.tag_num == 17;
        }
        self.schema.primitives.contains_key(rt)
    }

    /// `data` is the content of an element of `type_name`, except for a
    /// CHOICE where it is the whole tagged element.
    fn decode_type(&self, data: &[u8], type_name: &str) -> DecodeResult<FieldValue> {
        let rt = self.schema.resolve_alias(type_name);

        if let Some(elem) = self
            .schema
            .seq_of_types
            .get(rt)
            .or_else(|| self.schema.set_of_types.get(rt))
        {
            return self.decode_sequence_of(data, elem);
        }
        if let Some(alts) = self.schema.choices.get(rt) {
            return self.decode_choice(data, rt, alts);
        }
        if let Some(fields) = self.schema.sequences.get(rt).or_else(|| self.schema.sets.get(rt)) {
            return self.decode_sequence(data, fields);
        }
        Ok(self.decode_primitive(data, rt))
    }

    fn decode_primitive(&self, value: &[u8], type_name: &str) -> FieldValue {
        match self.schema.base_kind(type_name) {
            "INTEGER" | "ENUMERATED" => decode_int_i64(value)
                .map(FieldValue::Int)
                .unwrap_or_else(|| FieldValue::Bytes(value.to_vec())),
            "BOOLEAN" if value.len() == 1 => FieldValue::Bool(value[0] != 0),
            "NULL" => FieldValue::Null,
            "IA5String" | "UTF8String" | "VisibleString" | "GraphicString" | "PrintableString"
            | "NumericString" => match std::str::from_utf8(value) {
                Ok(s) => FieldValue::Text(s.to_owned()),
                Err(_) => FieldValue::Bytes(value.to_vec()),
            },
            _ => FieldValue::Bytes(value.to_vec()),
        }
    }

    fn next_tlv<'a>(&self, data: &'a [u8], offset: usize) -> DecodeResult<Option<(Tlv<'a>, usize)>> {
        if data[offset..].iter().all(|&b| b == 0) {
            return Ok(None);
        }
        match parse_tlv(data, offset) {
            Some((tlv, end)) if end > offset => Ok(Some((tlv, end))),
            _ => Err(SchemaError::new(SchemaErrorKind::Truncated { offset })),
        }
    }

    fn decode_sequence(&self, data: &[u8], field_spec: &HashMap<TagKey, FieldSpec>) -> DecodeResult<FieldValue> {
        let mut tree = FieldTree::new();
        let mut offset = 0usize;

        while offset < data.len() {
            let Some((tlv, end)) = self.next_tlv(data, offset)? else {
                break;
            };

            match field_spec.get(&tlv.key()) {
                Some(field) => {
                    let value = if field.is_sequence_of || field.is_set_of {
                        self.decode_sequence_of(tlv.value, &field.field_type)
                    } else if self.schema.is_choice(&field.field_type) {
                        self.decode_type(tlv.raw, &field.field_type)
                    } else if tlv.constructed {
                        self.decode_type(tlv.value, &field.field_type)
                    } else {
                        Ok(self.decode_primitive(tlv.value, &field.field_type))
                    }
                    .map_err(|e| e.within(&field.name))?;
                    tree.insert(field.name.clone(), value);
                }
                None => {
                    let (cls, num) = tlv.key();
                    tree.insert(format!("unknown_tag_{cls}_{num}"), FieldValue::Bytes(tlv.value.to_vec()));
                }
            }
            offset = end;
        }

        if let Some(missing) = field_spec
            .values()
            .filter(|f| !f.optional && !tree.contains_key(&f.name))
            .min_by(|a, b| a.name.cmp(&b.name))
        {
            return Err(SchemaError::new(SchemaErrorKind::MissingField {
                field: missing.name.clone(),
            })
            .within(&missing.name));
        }
        Ok(FieldValue::Tree(tree))
    }

    fn decode_sequence_of(&self, data: &[u8], element_type: &str) -> DecodeResult<FieldValue> {
        let is_choice = self.schema.is_choice(element_type);
        let mut items = Vec::new();
        let mut offset = 0usize;

        while offset < data.len() {
            let Some((tlv, end)) = self.next_tlv(data, offset)? else {
                break;
            };
            let item = if is_choice {
                self.decode_type(tlv.raw, element_type)?
            } else if tlv.constructed {
                self.decode_type(tlv.value, element_type)?
            } else {
                self.decode_primitive(tlv.value, element_type)
            };
            items.push(item);
            offset = end;
        }
        Ok(FieldValue::List(items))
    }

    fn decode_choice(
        &self,
        data: &[u8],
        choice_name: &str,
        alts: &HashMap<TagKey, (String, String)>,
    ) -> DecodeResult<FieldValue> {
        let Some((outer, _)) = parse_tlv(data, 0) else {
            return Err(SchemaError::new(SchemaErrorKind::Truncated { offset: 0 }));
        };

        let mut candidates: [Option<Tlv<'_>>; 3] = [Some(outer.clone()), None, None];
        // explicit tagging: the alternative sits inside a constructed wrapper
        if outer.constructed {
            candidates[1] = parse_tlv(outer.value, 0).map(|(inner, _)| inner);
        }
        // OCTET STRING carrying an encoded alternative
        if outer.tag_class == 0 && !outer.constructed && outer.tag_num == 4 && outer.value.first().is_some_and(|&b| b != 0) {
            candidates[2] = parse_tlv(outer.value, 0).map(|(inner, _)| inner);
        }

        for cand in candidates.iter().flatten() {
            if let Some((field_name, type_name)) = alts.get(&cand.key()) {
                let value = self
                    .decode_type(cand.value, type_name)
                    .map_err(|e| e.within(field_name))?;
                return Ok(FieldValue::Choice(field_name.clone(), Box::new(value)));
            }
        }

        let mut synth_keys: Vec<u32> = alts
            .keys()
            .filter(|(cls, tag)| *cls == 3 && is_synth_choice_tag(*tag))
            .map(|(_, tag)| *tag)
            .collect();
        synth_keys.sort_unstable();

        for k in synth_keys {
            let Some((fname, ftype)) = alts.get(&(3, k)) else {
                continue;
            };
            let f_rt = self.schema.resolve_alias(ftype);
            for cand in candidates.iter().flatten() {
                if !self.choice_alt_matches_tlv(ftype, cand) {
                    continue;
                }
                let body = if !self.schema.type_outer_tag.contains_key(f_rt) && self.schema.is_choice(f_rt) {
                    cand.raw
                } else {
                    cand.value
                };
                let value = self.decode_type(body, ftype).map_err(|e| e.within(fname))?;
                return Ok(FieldValue::Choice(fname.clone(), Box::new(value)));
            }
        }

        Err(SchemaError::new(SchemaErrorKind::NoChoiceAlternative {
            choice: choice_name.to_owned(),
            tag: outer.key(),
        }))
    }
}

impl SchemaDecoder for BerSchemaDecoder {
    fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<FieldValue, SchemaError> {
        let rt = self.schema.resolve_alias(type_name);
        if !self.schema.knows_type(rt) {
            return Err(SchemaError::new(SchemaErrorKind::UnknownType(type_name.to_owned())));
        }
        let Some((tlv, _)) = parse_tlv(bytes, 0) else {
            return Err(SchemaError::new(SchemaErrorKind::Truncated { offset: 0 }));
        };
        if !self.tlv_matches_root(&tlv, rt) {
            return Err(SchemaError::new(SchemaErrorKind::RootTagMismatch {
                type_name: type_name.to_owned(),
                tag: tlv.key(),
            }));
        }

        if self.schema.type_outer_tag.contains_key(rt) {
            self.decode_type(tlv.value, rt)
        } else if self.schema.is_choice(rt) {
            self.decode_type(tlv.raw, rt)
        } else {
            self.decode_type(tlv.value, rt)
        }
    }

    fn field_names(&self) -> Vec<String> {
        self.schema.field_names()
    }

    fn knows_type(&self, type_name: &str) -> bool {
        self.schema.knows_type(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
CallEventRecord ::= CHOICE
{
    moCallRecord [0] MOCallRecord,
    groupCallRecord [1] GroupCallRecord
}

MOCallRecord ::= SEQUENCE
{
    recordType [0] CallEventRecordType,
    servedIMSI [1] IMSI,
    callDuration [2] INTEGER OPTIONAL,
    servedPartyAddress [6] PartyAddress OPTIONAL,
    ssList [7] SEQUENCE OF SSCode OPTIONAL
}

GroupCallRecord ::= SEQUENCE
{
    recordType [0] CallEventRecordType,
    subscriberIMSI [1] IMSI
}

PartyAddress ::= CHOICE
{
    iPBinV4Address [0] OCTET STRING,
    iPTextV4Address [2] IA5String
}

CallEventRecordType ::= INTEGER
IMSI ::= OCTET STRING
SSCode ::= OCTET STRING
"#;

    fn decoder() -> BerSchemaDecoder {
        BerSchemaDecoder::new(Asn1Schema::parse(SCHEMA).unwrap())
    }

    fn record(d: &BerSchemaDecoder, bytes: &[u8]) -> FieldTree {
        match d.decode("CallEventRecord", bytes).unwrap() {
            FieldValue::Choice(alt, inner) => {
                assert_eq!(alt, "moCallRecord");
                inner.as_tree().cloned().unwrap()
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn integers_are_twos_complement() {
        assert_eq!(decode_int_i64(&[0x01, 0x00]), Some(256));
        assert_eq!(decode_int_i64(&[0xFF]), Some(-1));
        assert_eq!(decode_int_i64(&[0x80]), Some(-128));
        assert_eq!(decode_int_i64(&[]), None);
        assert_eq!(decode_int_i64(&[0; 9]), None);
    }

    #[test]
    fn decodes_tagged_choice_and_fields() {
        let d = decoder();
        // A0 { 80 01 01 | 81 03 21 43 F5 | 82 02 01 2C | A6 04 82 02 'h' 'i' | A7 06 04 01 11 04 01 22 }
        let bytes = [
            0xA0, 0x1A, 0x80, 0x01, 0x01, 0x81, 0x03, 0x21, 0x43, 0xF5, 0x82, 0x02, 0x01, 0x2C,
            0xA6, 0x04, 0x82, 0x02, b'h', b'i', 0xA7, 0x06, 0x04, 0x01, 0x11, 0x04, 0x01, 0x22,
        ];
        let tree = record(&d, &bytes);
        assert_eq!(tree.get("recordType"), Some(&FieldValue::Int(1)));
        assert_eq!(tree.get("servedIMSI"), Some(&FieldValue::Bytes(vec![0x21, 0x43, 0xF5])));
        assert_eq!(tree.get("callDuration"), Some(&FieldValue::Int(300)));
        assert_eq!(
            tree.get("servedPartyAddress"),
            Some(&FieldValue::Choice("iPTextV4Address".into(), Box::new(FieldValue::text("hi"))))
        );
        assert_eq!(
            tree.get("ssList"),
            Some(&FieldValue::List(vec![FieldValue::Bytes(vec![0x11]), FieldValue::Bytes(vec![0x22])]))
        );
    }

    #[test]
    fn indefinite_lengths_and_unknown_tags_are_tolerated() {
        let d = decoder();
        let bytes = [0xA0, 0x80, 0x80, 0x01, 0x01, 0x81, 0x01, 0x21, 0x9F, 0x20, 0x01, 0x07, 0x00, 0x00];
        let tree = record(&d, &bytes);
        assert_eq!(tree.get("unknown_tag_2_32"), Some(&FieldValue::Bytes(vec![0x07])));
    }

    #[test]
    fn bad_choice_alternative_reports_path() {
        let d = decoder();
        // servedPartyAddress holds [5], which PartyAddress does not define
        let bytes = [0xA0, 0x0B, 0x80, 0x01, 0x01, 0x81, 0x01, 0x21, 0xA6, 0x03, 0x85, 0x01, 0x00];
        let err = d.decode("CallEventRecord", &bytes[..]).unwrap_err();
        assert_eq!(err.path, ["moCallRecord", "servedPartyAddress"]);
        assert!(matches!(err.kind, SchemaErrorKind::NoChoiceAlternative { ref choice, .. } if choice == "PartyAddress"));
    }

    #[test]
    fn missing_mandatory_field() {
        let d = decoder();
        let bytes = [0xA1, 0x03, 0x80, 0x01, 0x01];
        let err = d.decode("CallEventRecord", &bytes).unwrap_err();
        assert_eq!(err.path, ["groupCallRecord", "subscriberIMSI"]);
        assert!(matches!(err.kind, SchemaErrorKind::MissingField { .. }));
    }

    #[test]
    fn root_mismatch_and_unknown_type() {
        let d = decoder();
        let err = d.decode("CallEventRecord", &[0xA5, 0x00]).unwrap_err();
        assert!(matches!(err.kind, SchemaErrorKind::RootTagMismatch { tag: (2, 5), .. }));
        let err = d.decode("Nope", &[0xA0, 0x00]).unwrap_err();
        assert!(matches!(err.kind, SchemaErrorKind::UnknownType(_)));
    }
}
