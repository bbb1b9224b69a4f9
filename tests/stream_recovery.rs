use cdr_ber_decode::jsonl::write_record;
use cdr_ber_decode::stream::Verdict;
use cdr_ber_decode::{Asn1Schema, BerSchemaDecoder, DecoderProfile, Engine, EngineConfig, FieldValue, RecordFamily, RecordSource};

mod common;

use common::{tlv, MSC_SCHEMA};

fn mo_call(record_type: u8) -> Vec<u8> {
    let mut body = tlv(&[0x80], &[record_type]);
    body.extend(tlv(&[0x81], &[0x21, 0x43, 0xF5]));
    // "0123456" with the MSC trunk prefix
    body.extend(tlv(&[0x82], &[0x10, 0x32, 0x54, 0xF6]));
    tlv(&[0xA0], &body)
}

fn group_call(address: &[u8]) -> Vec<u8> {
    let mut body = tlv(&[0x80], &[0x02]);
    body.extend(tlv(&[0x81], &[0x21, 0x43, 0xF5]));
    body.extend(tlv(&[0xA6], address));
    tlv(&[0xA1], &body)
}

fn msc_engine(parallel_records: bool) -> Engine<BerSchemaDecoder> {
    let schema = Asn1Schema::parse(MSC_SCHEMA).expect("schema compiles");
    Engine::new(
        BerSchemaDecoder::new(schema),
        DecoderProfile::for_family(RecordFamily::Msc),
        EngineConfig { parallel_records },
    )
}

fn five_element_stream() -> (Vec<u8>, Vec<usize>) {
    let elements = [
        mo_call(1),
        group_call(&tlv(&[0x80], &[10, 0, 0, 1])),
        // [5] is not an alternative of PartyAddress
        group_call(&tlv(&[0x85], &[0x00])),
        mo_call(4),
        mo_call(5),
    ];
    let mut data = Vec::new();
    let mut offsets = Vec::new();
    for el in &elements {
        offsets.push(data.len());
        data.extend_from_slice(el);
    }
    (data, offsets)
}

#[test]
fn corrupted_element_is_skipped_and_the_rest_decode() {
    let (data, offsets) = five_element_stream();

    for parallel in [false, true] {
        let report = msc_engine(parallel).decode_file("msc.dat", &data);

        let got: Vec<Option<usize>> = report.records.iter().map(|r| r.offset).collect();
        assert_eq!(got, [offsets[0], offsets[1], offsets[3], offsets[4]].map(Some));
        assert_eq!(report.skips.total(), 1);
        assert_eq!(report.skips.count("groupCallRecord/servedPartyAddress"), 1);
        assert_eq!(report.verdict, Verdict::Decoded);
        assert_eq!(report.source, Some(RecordSource::Schema));
        assert!(report.issues.is_empty());
    }
}

#[test]
fn records_are_normalized_for_the_msc_family() {
    let (data, _) = five_element_stream();
    let report = msc_engine(false).decode_file("msc.dat", &data);

    let mo = &report.records[0];
    assert_eq!(mo.record_type.as_deref(), Some("moCallRecord"));
    assert_eq!(mo.fields.get("servedIMSI"), Some(&FieldValue::text("12345")));
    assert_eq!(mo.fields.get("calledNumber"), Some(&FieldValue::text("123456")));

    let group = &report.records[1];
    assert_eq!(group.record_type.as_deref(), Some("groupCallRecord"));
    assert_eq!(group.fields.get("servedPartyAddress"), Some(&FieldValue::text("10.0.0.1")));
}

#[test]
fn every_element_failing_alike_is_a_wrong_record_type() {
    let bad = group_call(&tlv(&[0x85], &[0x00]));
    let data = [bad.clone(), bad.clone(), bad].concat();
    let report = msc_engine(false).decode_file("other.dat", &data);

    assert!(report.records.is_empty());
    assert_eq!(
        report.verdict,
        Verdict::LikelyWrongRecordType {
            category: "groupCallRecord/servedPartyAddress".into(),
            failures: 3
        }
    );
    let summary = report.summary().expect("summary for an empty file");
    assert!(summary.contains("zero usable records, 3 failures of category groupCallRecord/servedPartyAddress"));
}

#[test]
fn jsonl_output_is_one_valid_object_per_record() {
    let (data, offsets) = five_element_stream();
    let report = msc_engine(false).decode_file("msc.dat", &data);

    let mut out = Vec::new();
    let mut scratch = Vec::new();
    for record in &report.records {
        write_record(&mut out, &report.filename, record, &mut scratch).unwrap();
    }
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(lines.len(), 4);
    assert_eq!(lines[3]["offset"], offsets[4]);
    assert_eq!(lines[3]["recordType"], "moCallRecord");
    assert_eq!(lines[3]["source"], "schema");
    assert_eq!(lines[0]["filename"], "msc.dat");
    assert_eq!(lines[1]["servedPartyAddress"], "10.0.0.1");
}
