use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::CompileError;

/// `(class, number)` of an identifier octet.
pub type TagKey = (u8, u32);

/// Untagged CHOICE alternatives are keyed under private class with numbers
/// from this base, in declaration order.
pub const SYNTH_CHOICE_BASE: u32 = 0xFFFF_FF00;

#[inline]
pub fn is_synth_choice_tag(t: u32) -> bool {
    t >= SYNTH_CHOICE_BASE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: String,
    /// `OPTIONAL` or carrying a `DEFAULT`.
    pub optional: bool,
    pub is_sequence_of: bool,
    pub is_set_of: bool,
}

/// Tables compiled from the ASN.1 subset used by CDR schemas.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Asn1Schema {
    pub choices: HashMap<String, HashMap<TagKey, (String, String)>>,
    pub sequences: HashMap<String, HashMap<TagKey, FieldSpec>>,
    pub sets: HashMap<String, HashMap<TagKey, FieldSpec>>,

    pub seq_of_types: HashMap<String, String>,
    pub set_of_types: HashMap<String, String>,

    pub primitives: HashMap<String, String>,
    pub aliases: HashMap<String, String>,

    pub type_outer_tag: HashMap<String, TagKey>,
}

#[inline]
fn tag_class_from_word(word: Option<&str>) -> u8 {
    match word.map(|s| s.to_ascii_uppercase()).as_deref() {
        Some("UNIVERSAL") => 0,
        Some("APPLICATION") => 1,
        Some("PRIVATE") => 3,
        // a bare [n] is context-specific
        _ => 2,
    }
}

/// Collapses runs of whitespace so `OCTET   STRING` and `OCTET STRING` match.
fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

const CLASS: &str = r"(?:(APPLICATION|UNIVERSAL|PRIVATE|CONTEXT|CONTEXT-SPECIFIC)\s+)?";
const BUILTIN: &str = r"OCTET\s+STRING|BIT\s+STRING|OBJECT\s+IDENTIFIER";
const CONSTRAINT: &str = r"(?:\s*\((?:[^()]|\([^()]*\))*\))?";

struct Patterns {
    snacc: Regex,
    comment: Regex,
    type_assign: Regex,
    alias: Regex,
    choice_tagged: Regex,
    choice_untagged: Regex,
    field: Regex,
    components_of: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, CompileError> {
        Ok(Self {
            snacc: Regex::new(r"(?is)--\s*snacc\b.*?--")?,
            comment: Regex::new(r"(?m)--.*?$")?,
            type_assign: Regex::new(&format!(
                r"(?s)([\w-]+)\s*::=\s*(?:\[\s*{CLASS}(\d+)\s*\]\s*)?(?:IMPLICIT|EXPLICIT)?\s*(CHOICE|SEQUENCE|SET|ENUMERATED|INTEGER|{BUILTIN}|IA5String|UTF8String|BOOLEAN|NULL|TBCD-STRING|[\w-]+)\s*(?:OF\s+([\w-]+))?{CONSTRAINT}\s*(\{{.*?\}})?"
            ))?,
            alias: Regex::new(r"(?m)^\s*([\w-]+)\s*::=\s*([\w-]+)\s*$")?,
            choice_tagged: Regex::new(&format!(
                r"([\w-]+)\s*\[\s*{CLASS}(\d+)\s*\]\s*(?:(?:IMPLICIT|EXPLICIT)\s+)?({BUILTIN}|[\w-]+)"
            ))?,
            choice_untagged: Regex::new(&format!(r"([\w-]+)\s+({BUILTIN}|[\w-]+)"))?,
            field: Regex::new(&format!(
                r"(?m)^\s*([\w-]+)\s*(?:\[\s*{CLASS}(\d+)\s*\])?\s*(?:IMPLICIT|EXPLICIT)?\s+((?:SET|SEQUENCE)\s+OF\s+[\w-]+|{BUILTIN}|[\w-]+){CONSTRAINT}\s*(DEFAULT\s+[^,\n]+)?\s*(OPTIONAL)?"
            ))?,
            components_of: Regex::new(r"(?m)^\s*COMPONENTS\s+OF\s+([\w-]+)")?,
        })
    }
}

struct Def {
    type_name: String,
    type_kind: String,
    of_type: Option<String>,
    body: String,
}

impl Asn1Schema {
    /// Compiles schema text.
    pub fn parse(schema_text: &str) -> Result<Self, CompileError> {
        let re = Patterns::compile()?;
        let no_snacc = re.snacc.replace_all(schema_text, " ");
        let stripped = re.comment.replace_all(&no_snacc, "");

        let mut schema = Asn1Schema::default();

        for cap in re.alias.captures_iter(&stripped) {
            let (lhs, rhs) = (&cap[1], &cap[2]);
            let is_keyword = matches!(
                rhs.to_ascii_uppercase().as_str(),
                "CHOICE" | "SEQUENCE" | "SET" | "ENUMERATED" | "INTEGER" | "OCTET" | "BIT"
                    | "IA5STRING" | "UTF8STRING" | "BOOLEAN" | "NULL" | "OBJECT" | "IDENTIFIER"
                    | "BEGIN" | "END"
            );
            if !is_keyword && lhs != rhs {
                schema.aliases.insert(lhs.to_owned(), rhs.to_owned());
            }
        }

        let mut defs: Vec<Def> = Vec::new();
        for caps in re.type_assign.captures_iter(&stripped) {
            let type_name = caps[1].to_owned();
            let type_kind = squash(&caps[4]);

            if let Some(num) = caps.get(3) {
                let cls = tag_class_from_word(caps.get(2).map(|m| m.as_str()));
                schema
                    .type_outer_tag
                    .insert(type_name.clone(), (cls, num.as_str().parse()?));
            }
            if !matches!(type_kind.as_str(), "CHOICE" | "SEQUENCE" | "SET") {
                schema.primitives.insert(type_name.clone(), type_kind.clone());
            }
            defs.push(Def {
                type_name,
                type_kind,
                of_type: caps.get(5).map(|m| m.as_str().to_owned()),
                body: caps.get(6).map(|m| m.as_str()).unwrap_or("").to_owned(),
            });
        }

        let mut components_queue: Vec<(String, String)> = Vec::new();

        for d in defs {
            match d.type_kind.as_str() {
                "SEQUENCE" | "SET" => {
                    let is_set = d.type_kind == "SET";
                    if let Some(elem) = d.of_type {
                        let table = if is_set {
                            &mut schema.set_of_types
                        } else {
                            &mut schema.seq_of_types
                        };
                        table.insert(d.type_name, elem);
                        continue;
                    }

                    let mut fields: HashMap<TagKey, FieldSpec> = HashMap::new();
                    for c in re.field.captures_iter(&d.body) {
                        let type_spec = squash(&c[4]);
                        let (element_type, is_sequence_of, is_set_of) =
                            if let Some(rest) = type_spec.strip_prefix("SEQUENCE OF ") {
                                (rest.to_owned(), true, false)
                            } else if let Some(rest) = type_spec.strip_prefix("SET OF ") {
                                (rest.to_owned(), false, true)
                            } else {
                                (type_spec, false, false)
                            };

                        let key: TagKey = match c.get(3) {
                            Some(tag) => {
                                let cls = tag_class_from_word(c.get(2).map(|m| m.as_str()));
                                (cls, tag.as_str().parse()?)
                            }
                            None => match schema.tag_for_type(&element_type) {
                                Some(tk) => tk,
                                None => continue,
                            },
                        };

                        fields.insert(
                            key,
                            FieldSpec {
                                name: c[1].to_owned(),
                                field_type: element_type,
                                optional: c.get(5).is_some() || c.get(6).is_some(),
                                is_sequence_of,
                                is_set_of,
                            },
                        );
                    }

                    for c in re.components_of.captures_iter(&d.body) {
                        components_queue.push((d.type_name.clone(), c[1].to_owned()));
                    }

                    if is_set {
                        schema.sets.insert(d.type_name, fields);
                    } else {
                        schema.sequences.insert(d.type_name, fields);
                    }
                }
                "CHOICE" => {
                    let mut alts: HashMap<TagKey, (String, String)> = HashMap::new();
                    for c in re.choice_tagged.captures_iter(&d.body) {
                        let cls = tag_class_from_word(c.get(2).map(|m| m.as_str()));
                        alts.insert((cls, c[3].parse()?), (c[1].to_owned(), squash(&c[4])));
                    }

                    if alts.is_empty() {
                        let mut idx: u32 = 0;
                        for c in re.choice_untagged.captures_iter(&d.body) {
                            let (field_name, field_type) = (&c[1], squash(&c[2]));
                            if field_name == "isPdu" || field_name == "TRUE" {
                                continue;
                            }
                            alts.insert((3u8, SYNTH_CHOICE_BASE + idx), (field_name.to_owned(), field_type));
                            idx += 1;
                        }
                    }
                    schema.choices.insert(d.type_name, alts);
                }
                _ => {}
            }
        }

        for (target, source) in components_queue {
            let source_fields = schema
                .sequences
                .get(&source)
                .or_else(|| schema.sets.get(&source))
                .cloned();
            if let Some(src) = source_fields {
                if let Some(tgt) = schema.sequences.get_mut(&target) {
                    tgt.extend(src);
                } else if let Some(tgt) = schema.sets.get_mut(&target) {
                    tgt.extend(src);
                }
            }
        }

        debug!(
            choices = schema.choices.len(),
            sequences = schema.sequences.len(),
            sets = schema.sets.len(),
            primitives = schema.primitives.len(),
            "compiled schema"
        );
        Ok(schema)
    }

    pub fn load_compiled(path: &Path) -> Result<Self, CompileError> {
        let file = File::open(path)?;
        Ok(bincode::deserialize_from(BufReader::new(file))?)
    }

    pub fn save_compiled(&self, path: &Path) -> Result<(), CompileError> {
        let file = File::create(path)?;
        bincode::serialize_into(BufWriter::new(file), self)?;
        Ok(())
    }

    #[inline]
    pub fn resolve_alias<'a>(&'a self, mut t: &'a str) -> &'a str {
        for _ in 0..32 {
            match self.aliases.get(t) {
                Some(next) => t = next,
                None => break,
            }
        }
        t
    }

    /// Builtin kind a primitive type ultimately refers to.
    pub fn base_kind<'a>(&'a self, mut t: &'a str) -> &'a str {
        for _ in 0..32 {
            let rt = self.resolve_alias(t);
            match self.primitives.get(rt) {
                Some(kind) if kind != rt => t = kind,
                _ => return rt,
            }
        }
        t
    }

    #[inline]
    pub fn knows_type(&self, t: &str) -> bool {
        let rt = self.resolve_alias(t);
        self.choices.contains_key(rt)
            || self.sequences.contains_key(rt)
            || self.sets.contains_key(rt)
            || self.seq_of_types.contains_key(rt)
            || self.set_of_types.contains_key(rt)
            || self.primitives.contains_key(rt)
    }

    #[inline]
    pub fn is_choice(&self, t: &str) -> bool {
        self.choices.contains_key(self.resolve_alias(t))
    }

    #[inline]
    pub fn tag_for_type(&self, t: &str) -> Option<TagKey> {
        let rt = self.resolve_alias(t);
        if let Some(tk) = self.type_outer_tag.get(rt) {
            return Some(*tk);
        }
        self.universal_tag_for_type(rt)
    }

    pub fn universal_tag_for_type(&self, t: &str) -> Option<TagKey> {
        let rt = self.resolve_alias(t);

        if self.sequences.contains_key(rt) || self.seq_of_types.contains_key(rt) {
            return Some((0, 16));
        }
        if self.sets.contains_key(rt) || self.set_of_types.contains_key(rt) {
            return Some((0, 17));
        }
        if self.choices.contains_key(rt) {
            return None;
        }

        match self.base_kind(rt) {
            "BOOLEAN" => Some((0, 1)),
            "INTEGER" => Some((0, 2)),
            "BIT STRING" => Some((0, 3)),
            "OCTET STRING" | "TBCD-STRING" => Some((0, 4)),
            "NULL" => Some((0, 5)),
            "OBJECT IDENTIFIER" => Some((0, 6)),
            "ENUMERATED" => Some((0, 10)),
            "UTF8String" => Some((0, 12)),
            "IA5String" => Some((0, 22)),
            "GraphicString" => Some((0, 25)),
            "VisibleString" => Some((0, 26)),
            _ => None,
        }
    }

    /// Every field and alternative name, sorted and deduplicated.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sequences
            .values()
            .chain(self.sets.values())
            .flat_map(|fields| fields.values().map(|f| f.name.clone()))
            .chain(
                self.choices
                    .values()
                    .flat_map(|alts| alts.values().map(|(name, _)| name.clone())),
            )
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
