//! Field Normalizer: turns raw schema values into readable ones.
//!
//! Conversions are chosen from the field name. Each schema field name is
//! classified once into an ordered chain of [`Conversion`]s; a conversion
//! that does not fit the value (wrong length, not decodable) declines and
//! the next one runs. Grouped upper-case hex is the terminal fallback.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bcd::{decode_digits, decode_plmn, normalize_imei, strip_prefix, DigitSet, NibbleOrder};
use crate::timestamp;
use crate::value::{FieldTree, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Conversion {
    /// TBCD subscriber identity (IMSI, IMEI).
    Digits,
    TwoOctetInt,
    OneOctetInt,
    IpAddress,
    Timestamp,
    ChargingCharacteristics,
    /// MSISDN `AddressString`: optional type-of-number octet, then TBCD.
    AddressString,
    /// TBCD number with configured prefixes stripped.
    DialledNumber,
    Plmn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizerOptions {
    pub digits: DigitSet,
    pub address_prefixes: Vec<String>,
    /// Prefixes are only stripped from numbers longer than this.
    pub prefix_min_len: usize,
    pub msisdn_has_type_octet: bool,
    /// `*number*` fields hold TBCD digits.
    pub number_fields_are_digits: bool,
    /// Non-IP `*address*` fields that are not IP-sized decode as digits.
    pub address_digits_fallback: bool,
    /// Octet strings containing `FF FF` are unset values.
    pub ffff_is_null: bool,
    /// `basicService` renders as `"<teleservice>, Code: <n>"`.
    pub describe_basic_service: bool,
    /// `listOfTrafficVolumes` is replaced by summed uplink and downlink
    /// volumes at record level.
    pub sum_traffic_volumes: bool,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            digits: DigitSet::Strict,
            address_prefixes: Vec::new(),
            prefix_min_len: 0,
            msisdn_has_type_octet: true,
            number_fields_are_digits: false,
            address_digits_fallback: false,
            ffff_is_null: false,
            describe_basic_service: false,
            sum_traffic_volumes: false,
        }
    }
}

const BASIC_SERVICE: &str = "basicService";
const TRAFFIC_VOLUMES: &str = "listOfTrafficVolumes";
const UPLINK_VOLUME: &str = "dataVolumeGPRSUplink";
const DOWNLINK_VOLUME: &str = "dataVolumeGPRSDownlink";

const TELESERVICES: [(i64, &str); 5] = [
    (16, "all teleservices"),
    (17, "telephony (speech)"),
    (18, "shortMessageMT"),
    (19, "shortMessageMO"),
    (34, "Depersonalisation Short Message"),
];

/// Conversion chains for every known field name.
#[derive(Debug, Clone)]
pub struct FieldRules {
    options: NormalizerOptions,
    table: HashMap<String, Vec<Conversion>>,
}

fn classify(name: &str, options: &NormalizerOptions) -> Vec<Conversion> {
    let lname = name.to_ascii_lowercase();
    let has = |s: &str| lname.contains(s);
    let mut chain = Vec::new();

    if has("imsi") || has("imei") {
        chain.push(Conversion::Digits);
    }
    if has("locationarea") {
        chain.push(Conversion::TwoOctetInt);
    }
    if has("cell") {
        chain.push(Conversion::TwoOctetInt);
    }
    if has("routingarea") {
        chain.push(Conversion::OneOctetInt);
    }
    if has("address") || has("ip") || has("ggsn") {
        chain.push(Conversion::IpAddress);
    }
    if has("time") {
        chain.push(Conversion::Timestamp);
    }
    if has("chargingcharacteristic") {
        chain.push(Conversion::ChargingCharacteristics);
    }
    if has("msisdn") {
        chain.push(Conversion::AddressString);
    }
    if has("plmn") {
        chain.push(Conversion::Plmn);
    }
    if options.number_fields_are_digits && has("number") {
        chain.push(Conversion::DialledNumber);
    }
    if options.address_digits_fallback && has("address") && !has("ip") {
        chain.push(Conversion::DialledNumber);
    }
    chain.dedup();
    chain
}

fn ip_to_string(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        4 => Some(format!("{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])),
        16 => Some(
            bytes
                .chunks(2)
                .map(|pair| format!("{:x}", u16::from_be_bytes([pair[0], pair[1]])))
                .collect::<Vec<_>>()
                .join(":"),
        ),
        _ => None,
    }
}

/// Collapses nested IP address CHOICEs to their address string.
fn ip_choice_text(value: &FieldValue) -> Option<String> {
    let FieldValue::Choice(alt, inner) = value else {
        return None;
    };
    match (alt.as_str(), inner.as_ref()) {
        ("iPBinV4Address" | "iPBinV6Address" | "iPBinaryAddress", FieldValue::Bytes(b)) => {
            ip_to_string(b)
        }
        (
            "iPTextV4Address" | "iPTextV6Address" | "iPTextRepresentedAddress",
            FieldValue::Text(s),
        ) => Some(s.clone()),
        (_, nested @ FieldValue::Choice(..)) => ip_choice_text(nested),
        _ => None,
    }
}

fn charging_characteristics(bytes: &[u8]) -> Option<FieldValue> {
    let &[first, second] = bytes else {
        return None;
    };
    let behavior = (u16::from(first >> 4) << 8) | u16::from(second);
    let mut tree = FieldTree::new();
    tree.insert("raw_hex", FieldValue::Text(format!("0x{}", hex::encode(bytes))));
    tree.insert("profile_index", FieldValue::Int(i64::from(first & 0x0F)));
    tree.insert("behavior_bits", FieldValue::Text(format!("0x{behavior:03x}")));
    tree.insert("behavior_int", FieldValue::Int(i64::from(behavior)));
    Some(FieldValue::Tree(tree))
}

fn service_code(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Int(n) => Some(*n),
        FieldValue::Bytes(b) if (1..=7).contains(&b.len()) => {
            Some(b.iter().fold(0i64, |acc, &x| (acc << 8) | i64::from(x)))
        }
        FieldValue::Text(s) => s.bytes().next().map(i64::from),
        _ => None,
    }
}

/// `basicService` CHOICE as teleservice description and numeric code.
fn basic_service_text(value: &FieldValue) -> Option<String> {
    let FieldValue::Choice(_, inner) = value else {
        return None;
    };
    let code = service_code(inner)?;
    let description = TELESERVICES
        .iter()
        .find(|(c, _)| *c == code)
        .map_or("unknown", |&(_, d)| d);
    Some(format!("{description}, Code: {code}"))
}

fn sum_traffic_volumes(tree: &mut FieldTree) {
    let volumes = match tree.remove(TRAFFIC_VOLUMES) {
        None => Vec::new(),
        Some(FieldValue::List(items)) => items,
        Some(_) => return,
    };
    let (mut uplink, mut downlink) = (0i64, 0i64);
    for volume in &volumes {
        let FieldValue::Tree(entry) = volume else {
            continue;
        };
        if let Some(FieldValue::Int(n)) = entry.get(UPLINK_VOLUME) {
            uplink = uplink.saturating_add(*n);
        }
        if let Some(FieldValue::Int(n)) = entry.get(DOWNLINK_VOLUME) {
            downlink = downlink.saturating_add(*n);
        }
    }
    tree.insert(UPLINK_VOLUME, FieldValue::Int(uplink));
    tree.insert(DOWNLINK_VOLUME, FieldValue::Int(downlink));
}

/// Upper-case hex, in 4-character clusters from 4 octets up and 2-character
/// clusters for 2 or 3 octets.
pub fn grouped_hex(bytes: &[u8]) -> String {
    let hex_str = hex::encode_upper(bytes);
    let cluster = match bytes.len() {
        0 | 1 => return hex_str,
        2 | 3 => 2,
        _ => 4,
    };
    hex_str
        .as_bytes()
        .chunks(cluster)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(s: String) -> Option<FieldValue> {
    (!s.is_empty()).then_some(FieldValue::Text(s))
}

impl FieldRules {
    /// Classifies every name up front.
    pub fn resolve<I, S>(names: I, options: NormalizerOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table = names
            .into_iter()
            .map(Into::into)
            .map(|name| {
                let chain = classify(&name, &options);
                (name, chain)
            })
            .collect();
        Self { options, table }
    }

    pub fn options(&self) -> &NormalizerOptions {
        &self.options
    }

    /// Conversion chain for `name`; names the schema never declared are
    /// classified on the spot.
    pub fn chain(&self, name: &str) -> std::borrow::Cow<'_, [Conversion]> {
        match self.table.get(name) {
            Some(chain) => std::borrow::Cow::Borrowed(chain.as_slice()),
            None => std::borrow::Cow::Owned(classify(name, &self.options)),
        }
    }

    fn apply(&self, conversion: Conversion, name: &str, bytes: &[u8]) -> Option<FieldValue> {
        let opts = &self.options;
        match conversion {
            Conversion::Digits => {
                let digits = decode_digits(bytes, NibbleOrder::Swapped, opts.digits);
                if name.to_ascii_lowercase().contains("imei") {
                    return non_empty(normalize_imei(&digits).to_owned());
                }
                non_empty(digits)
            }
            Conversion::TwoOctetInt => {
                let &[hi, lo] = bytes else {
                    return None;
                };
                Some(FieldValue::Int(i64::from(u16::from_be_bytes([hi, lo]))))
            }
            Conversion::OneOctetInt => match bytes {
                &[b] => Some(FieldValue::Int(i64::from(b))),
                _ => None,
            },
            Conversion::IpAddress => ip_to_string(bytes).map(FieldValue::Text),
            Conversion::Timestamp => timestamp::decode(bytes).map(FieldValue::Text),
            Conversion::ChargingCharacteristics => charging_characteristics(bytes),
            Conversion::AddressString => {
                let digits = if opts.msisdn_has_type_octet {
                    bytes.get(1..)?
                } else {
                    bytes
                };
                let number = decode_digits(digits, NibbleOrder::Swapped, opts.digits);
                non_empty(strip_prefix(&number, &opts.address_prefixes, opts.prefix_min_len))
            }
            Conversion::DialledNumber => {
                let number = decode_digits(bytes, NibbleOrder::Swapped, opts.digits);
                non_empty(strip_prefix(&number, &opts.address_prefixes, opts.prefix_min_len))
            }
            Conversion::Plmn => decode_plmn(bytes).map(FieldValue::Text),
        }
    }

    fn convert_bytes(&self, name: Option<&str>, bytes: &[u8]) -> FieldValue {
        if let Some(name) = name {
            for conversion in self.chain(name).iter() {
                if let Some(value) = self.apply(*conversion, name, bytes) {
                    return value;
                }
            }
        }
        if self.options.ffff_is_null && bytes.windows(2).any(|w| w == [0xFF, 0xFF]) {
            return FieldValue::Null;
        }
        FieldValue::Text(grouped_hex(bytes))
    }

    /// Normalizes one value stored under `name`.
    pub fn normalize_value(&self, name: Option<&str>, value: &FieldValue) -> FieldValue {
        if self.options.describe_basic_service && name == Some(BASIC_SERVICE) {
            if let Some(text) = basic_service_text(value) {
                return FieldValue::Text(text);
            }
        }
        match value {
            FieldValue::Bytes(bytes) => self.convert_bytes(name, bytes),
            FieldValue::Tree(tree) => FieldValue::Tree(self.normalize_tree(tree)),
            FieldValue::List(items) => {
                FieldValue::List(items.iter().map(|v| self.normalize_value(name, v)).collect())
            }
            FieldValue::Choice(alt, inner) => match ip_choice_text(value) {
                Some(ip) => FieldValue::Text(ip),
                None => {
                    let mut tree = FieldTree::new();
                    tree.insert(alt.clone(), self.normalize_value(Some(alt), inner));
                    FieldValue::Tree(tree)
                }
            },
            other => other.clone(),
        }
    }

    pub fn normalize_tree(&self, tree: &FieldTree) -> FieldTree {
        tree.iter()
            .map(|(k, v)| (k.to_owned(), self.normalize_value(Some(k), v)))
            .collect()
    }

    /// Normalizes a top-level record, then applies record-level rewrites.
    pub fn normalize_record(&self, tree: &FieldTree) -> FieldTree {
        let mut out = self.normalize_tree(tree);
        if self.options.sum_traffic_volumes {
            sum_traffic_volumes(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sgsn_rules() -> FieldRules {
        FieldRules::resolve(
            ["servedIMSI", "servedMSISDN", "locationAreaCode", "recordOpeningTime"],
            NormalizerOptions::default(),
        )
    }

    fn msc_rules() -> FieldRules {
        FieldRules::resolve(
            ["calledNumber", "mSCAddress"],
            NormalizerOptions {
                digits: DigitSet::Extended,
                address_prefixes: ["18", "19", "110", "180", "0"].map(String::from).to_vec(),
                number_fields_are_digits: true,
                address_digits_fallback: true,
                ffff_is_null: true,
                ..NormalizerOptions::default()
            },
        )
    }

    fn bytes(b: &[u8]) -> FieldValue {
        FieldValue::Bytes(b.to_vec())
    }

    #[test]
    fn precedence_is_resolved_once() {
        let rules = sgsn_rules();
        assert_eq!(&rules.chain("servedIMSI")[..], &[Conversion::Digits]);
        assert_eq!(&rules.chain("locationAreaCode")[..], &[Conversion::TwoOctetInt]);
        assert_eq!(&rules.chain("servedMSISDN")[..], &[Conversion::AddressString]);
        assert_eq!(&rules.chain("ggsnAddressUsed")[..], &[Conversion::IpAddress]);
        assert!(rules.chain("causeForRecClosing").is_empty());
    }

    #[test]
    fn identities_and_integers() {
        let rules = sgsn_rules();
        let imsi = bytes(&[0x21, 0x43, 0x65, 0x87, 0x09, 0x21, 0x43, 0xF5]);
        assert_eq!(rules.normalize_value(Some("servedIMSI"), &imsi), FieldValue::text("123456789012345"));
        let imei = bytes(&[0x53, 0x96, 0x83, 0x30, 0x65, 0x34, 0x08, 0x19]);
        assert_eq!(rules.normalize_value(Some("servedIMEI"), &imei), FieldValue::text("356938035643809"));
        assert_eq!(rules.normalize_value(Some("locationAreaCode"), &bytes(&[0x01, 0x2C])), FieldValue::Int(300));
        assert_eq!(rules.normalize_value(Some("routingArea"), &bytes(&[0x05])), FieldValue::Int(5));
    }

    #[test]
    fn wrong_length_falls_back_to_grouped_hex() {
        let rules = sgsn_rules();
        assert_eq!(
            rules.normalize_value(Some("locationAreaCode"), &bytes(&[0x01, 0x02, 0x03])),
            FieldValue::text("01 02 03")
        );
        assert_eq!(grouped_hex(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01]), "DEAD BEEF 01");
        assert_eq!(grouped_hex(&[0x0F]), "0F");
    }

    #[test]
    fn ip_choices_collapse() {
        let rules = sgsn_rules();
        let v4 = FieldValue::Choice(
            "iPBinaryAddress".into(),
            Box::new(FieldValue::Choice("iPBinV4Address".into(), Box::new(bytes(&[10, 0, 0, 1])))),
        );
        assert_eq!(rules.normalize_value(Some("ggsnAddressUsed"), &v4), FieldValue::text("10.0.0.1"));

        let mut six = [0u8; 16];
        six[..4].copy_from_slice(&[0x20, 0x01, 0x0D, 0xB8]);
        six[15] = 1;
        let v6 = FieldValue::Choice(
            "iPAddress".into(),
            Box::new(FieldValue::Choice(
                "iPBinaryAddress".into(),
                Box::new(FieldValue::Choice("iPBinV6Address".into(), Box::new(bytes(&six)))),
            )),
        );
        assert_eq!(
            rules.normalize_value(Some("servedPDPAddress"), &v6),
            FieldValue::text("2001:db8:0:0:0:0:0:1")
        );
    }

    #[test]
    fn other_choice_becomes_single_entry_tree() {
        let rules = sgsn_rules();
        let choice = FieldValue::Choice("servedIMSI".into(), Box::new(bytes(&[0x21, 0xF3])));
        let FieldValue::Tree(tree) = rules.normalize_value(Some("subscriber"), &choice) else {
            panic!("expected a tree");
        };
        assert_eq!(tree.get("servedIMSI"), Some(&FieldValue::text("123")));
    }

    #[test]
    fn charging_characteristics_and_msisdn() {
        let rules = sgsn_rules();
        let FieldValue::Tree(cc) = rules.normalize_value(Some("chargingCharacteristics"), &bytes(&[0x1A, 0x05])) else {
            panic!("expected a tree");
        };
        assert_eq!(cc.get("raw_hex"), Some(&FieldValue::text("0x1a05")));
        assert_eq!(cc.get("profile_index"), Some(&FieldValue::Int(10)));
        assert_eq!(cc.get("behavior_bits"), Some(&FieldValue::text("0x105")));
        assert_eq!(cc.get("behavior_int"), Some(&FieldValue::Int(261)));

        let msisdn = bytes(&[0x91, 0x19, 0x32, 0x54, 0x76, 0x98, 0xF0]);
        assert_eq!(rules.normalize_value(Some("servedMSISDN"), &msisdn), FieldValue::text("91234567890"));
    }

    #[test]
    fn opening_time() {
        let rules = sgsn_rules();
        let ts = bytes(&[0x24, 0x06, 0x19, 0x12, 0x00, 0x00, 0x2B, 0x02, 0x00]);
        assert_eq!(
            rules.normalize_value(Some("recordOpeningTime"), &ts),
            FieldValue::text("2024-06-19T10:00:00+00:00")
        );
    }

    fn volume(up: i64, down: i64) -> FieldValue {
        let mut entry = FieldTree::new();
        entry.insert("qosNegotiated", bytes(&[0x01, 0x02]));
        entry.insert(UPLINK_VOLUME, FieldValue::Int(up));
        entry.insert(DOWNLINK_VOLUME, FieldValue::Int(down));
        FieldValue::Tree(entry)
    }

    #[test]
    fn traffic_volumes_are_summed_per_record() {
        let rules = FieldRules::resolve(
            ["servedIMSI", TRAFFIC_VOLUMES],
            NormalizerOptions {
                sum_traffic_volumes: true,
                ..NormalizerOptions::default()
            },
        );
        let mut record = FieldTree::new();
        record.insert("servedIMSI", bytes(&[0x21, 0xF3]));
        record.insert(TRAFFIC_VOLUMES, FieldValue::List(vec![volume(100, 2000), volume(5, 30)]));

        let out = rules.normalize_record(&record);
        assert!(!out.contains_key(TRAFFIC_VOLUMES));
        assert_eq!(out.get(UPLINK_VOLUME), Some(&FieldValue::Int(105)));
        assert_eq!(out.get(DOWNLINK_VOLUME), Some(&FieldValue::Int(2030)));
        assert_eq!(out.get("servedIMSI"), Some(&FieldValue::text("123")));

        // a record without volumes reports zero traffic
        let out = rules.normalize_record(&FieldTree::new());
        assert_eq!(out.get(UPLINK_VOLUME), Some(&FieldValue::Int(0)));

        // nested trees are left alone
        let nested = rules.normalize_tree(&record);
        assert!(nested.contains_key(TRAFFIC_VOLUMES));
        assert!(!sgsn_rules().normalize_record(&record).contains_key(UPLINK_VOLUME));
    }

    #[test]
    fn basic_service_gets_teleservice_description() {
        let rules = FieldRules::resolve(
            [BASIC_SERVICE],
            NormalizerOptions {
                describe_basic_service: true,
                ..NormalizerOptions::default()
            },
        );
        let tele = |code: &[u8]| FieldValue::Choice("teleservice".into(), Box::new(bytes(code)));
        assert_eq!(
            rules.normalize_value(Some(BASIC_SERVICE), &tele(&[0x11])),
            FieldValue::text("telephony (speech), Code: 17")
        );
        assert_eq!(
            rules.normalize_value(Some(BASIC_SERVICE), &tele(&[0x22])),
            FieldValue::text("Depersonalisation Short Message, Code: 34")
        );
        assert_eq!(
            rules.normalize_value(Some(BASIC_SERVICE), &tele(&[0x61])),
            FieldValue::text("unknown, Code: 97")
        );

        // without the option the CHOICE stays a one-entry tree
        let FieldValue::Tree(tree) = sgsn_rules().normalize_value(Some(BASIC_SERVICE), &tele(&[0x11])) else {
            panic!("expected a tree");
        };
        assert!(tree.contains_key("teleservice"));
    }

    #[test]
    fn msc_numbers_strip_prefixes() {
        let rules = msc_rules();
        // "0123456"
        let called = bytes(&[0x10, 0x32, 0x54, 0xF6]);
        assert_eq!(rules.normalize_value(Some("calledNumber"), &called), FieldValue::text("123456"));
        // "18*447712", five octets so not an IPv4 address
        let addr = bytes(&[0x81, 0x4A, 0x74, 0x17, 0xF2]);
        assert_eq!(rules.normalize_value(Some("mSCAddress"), &addr), FieldValue::text("*447712"));
        assert_eq!(rules.normalize_value(Some("opaque"), &bytes(&[0x01, 0xFF, 0xFF])), FieldValue::Null);
    }
}
