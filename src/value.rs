//! Decoded field values.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<FieldValue>),
    Tree(FieldTree),
    /// A CHOICE: selected alternative name and its value.
    Choice(String, Box<FieldValue>),
}

impl FieldValue {
    pub fn as_tree(&self) -> Option<&FieldTree> {
        match self {
            FieldValue::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }
}

/// Field name to value mapping that keeps insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldTree {
    entries: Vec<(String, FieldValue)>,
}

impl FieldTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Inserts or replaces `key`, keeping its original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Inserts only when `key` is absent. Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, key: &str, value: FieldValue) -> bool {
        if self.contains_key(key) {
            return false;
        }
        self.entries.push((key.to_owned(), value));
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut FieldValue)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Depth-first search for the first list stored under `name`.
    pub fn find_list(&self, name: &str) -> Option<&[FieldValue]> {
        for (k, v) in &self.entries {
            if k == name {
                if let FieldValue::List(items) = v {
                    return Some(items);
                }
            }
            let nested = match v {
                FieldValue::Tree(t) => t.find_list(name),
                FieldValue::Choice(_, inner) => inner.as_tree().and_then(|t| t.find_list(name)),
                _ => None,
            };
            if nested.is_some() {
                return nested;
            }
        }
        None
    }
}

impl FromIterator<(String, FieldValue)> for FieldTree {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        let mut tree = FieldTree::new();
        for (k, v) in iter {
            tree.insert(k, v);
        }
        tree
    }
}

impl Serialize for FieldTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(v) => serializer.serialize_i64(*v),
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Bytes(b) => serializer.serialize_str(&hex::encode(b)),
            FieldValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FieldValue::Tree(t) => t.serialize(serializer),
            FieldValue::Choice(name, inner) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(name, inner.as_ref())?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_order_and_first_position() {
        let mut t = FieldTree::new();
        t.insert("b", FieldValue::Int(1));
        t.insert("a", FieldValue::Int(2));
        t.insert("b", FieldValue::Int(3));
        let keys: Vec<&str> = t.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(t.get("b"), Some(&FieldValue::Int(3)));
        assert!(!t.insert_if_absent("a", FieldValue::Null));
        assert_eq!(t.get("a"), Some(&FieldValue::Int(2)));
    }

    #[test]
    fn finds_nested_list() {
        let mut inner = FieldTree::new();
        inner.insert("callEventRecords", FieldValue::List(vec![FieldValue::Int(1)]));
        let mut outer = FieldTree::new();
        outer.insert("header", FieldValue::Null);
        outer.insert("body", FieldValue::Choice("x".into(), Box::new(FieldValue::Tree(inner))));
        assert_eq!(outer.find_list("callEventRecords").map(|l| l.len()), Some(1));
        assert!(outer.find_list("missing").is_none());
    }

    #[test]
    fn serializes_bytes_as_hex_and_choice_as_object() {
        let mut t = FieldTree::new();
        t.insert("raw", FieldValue::Bytes(vec![0xAB, 0x01]));
        t.insert(
            "addr",
            FieldValue::Choice("iPTextV4Address".into(), Box::new(FieldValue::text("10.0.0.1"))),
        );
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, r#"{"raw":"ab01","addr":{"iPTextV4Address":"10.0.0.1"}}"#);
    }
}
