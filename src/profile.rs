//! Record-family presets.

use serde::{Deserialize, Serialize};

use crate::bcd::DigitSet;
use crate::definite::EnvelopeRules;
use crate::fields::NormalizerOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecordFamily {
    /// GPRS session records from an SGSN.
    Sgsn,
    /// Voice and SMS records from an MSC.
    Msc,
    /// TAP roaming interchange files.
    Tap,
}

/// A whole-file container type and the list field holding its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLayout {
    pub type_name: String,
    pub records_field: String,
    /// No stream fallback when the batch decode fails.
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderProfile {
    pub family: RecordFamily,
    /// Schema type of one top-level record.
    pub record_type: String,
    pub batch: Option<BatchLayout>,
    pub envelope: EnvelopeRules,
    pub normalizer: NormalizerOptions,
    /// Run the direct scanner and correlate its hits.
    pub scan: bool,
    pub unstable_branches: Vec<String>,
}

impl DecoderProfile {
    pub fn for_family(family: RecordFamily) -> Self {
        match family {
            RecordFamily::Sgsn => Self::sgsn(),
            RecordFamily::Msc => Self::msc(),
            RecordFamily::Tap => Self::tap(),
        }
    }

    pub fn sgsn() -> Self {
        Self {
            family: RecordFamily::Sgsn,
            record_type: "CallEventRecord".into(),
            batch: None,
            envelope: EnvelopeRules {
                record_tag: Some(0xB4),
                discriminator: vec![0x80, 0x01, 0x12],
                min_record_len: 24,
                ..EnvelopeRules::default()
            },
            normalizer: NormalizerOptions {
                sum_traffic_volumes: true,
                ..NormalizerOptions::default()
            },
            scan: true,
            unstable_branches: Vec::new(),
        }
    }

    pub fn msc() -> Self {
        Self {
            family: RecordFamily::Msc,
            record_type: "CallEventRecord".into(),
            batch: Some(BatchLayout {
                type_name: "CallEventDataFile".into(),
                records_field: "callEventRecords".into(),
                exclusive: false,
            }),
            // MSC record alternatives are tagged [0], which reads as a wrapper
            envelope: EnvelopeRules::none(),
            normalizer: NormalizerOptions {
                digits: DigitSet::Extended,
                address_prefixes: ["18", "19", "110", "180", "0"].map(String::from).to_vec(),
                number_fields_are_digits: true,
                address_digits_fallback: true,
                ffff_is_null: true,
                describe_basic_service: true,
                ..NormalizerOptions::default()
            },
            scan: false,
            unstable_branches: vec!["groupCallRecord".into()],
        }
    }

    pub fn tap() -> Self {
        Self {
            family: RecordFamily::Tap,
            record_type: "DataInterChange".into(),
            batch: Some(BatchLayout {
                type_name: "DataInterChange".into(),
                records_field: "callEventDetails".into(),
                exclusive: true,
            }),
            envelope: EnvelopeRules::none(),
            normalizer: NormalizerOptions {
                address_prefixes: ["91", "1", "44"].map(String::from).to_vec(),
                prefix_min_len: 10,
                msisdn_has_type_octet: false,
                number_fields_are_digits: true,
                ..NormalizerOptions::default()
            },
            scan: false,
            unstable_branches: Vec::new(),
        }
    }
}
