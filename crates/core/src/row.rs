//! Ordered column-name → value mapping.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value::Value;

static NULL: Value = Value::Null;

/// A row keeps columns in insertion order; replacing a column keeps its position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == column).map(|(_, v)| v)
    }

    /// Like `get`, but an absent column reads as null.
    pub fn value(&self, column: &str) -> &Value {
        self.get(column).unwrap_or(&NULL)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == column)
    }

    /// Sets a column, returning the previous value if it existed.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == column) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((column, value));
                None
            }
        }
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == column)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct RowVisitor;

impl<'de> Visitor<'de> for RowVisitor {
    type Value = Row;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of column names to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Row, A::Error> {
        let mut row = Row::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((k, v)) = access.next_entry::<String, Value>()? {
            row.insert(k, v);
        }
        Ok(row)
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RowVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_preserves_position_on_replace() {
        let mut row = Row::new();
        row.insert("a", "1");
        row.insert("b", "2");
        let prev = row.insert("a", "9");
        assert_eq!(prev, Some(Value::text("1")));
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(row.value("a"), &Value::text("9"));
    }

    #[test]
    fn absent_column_reads_as_null() {
        let row: Row = [("a", "1")].into_iter().collect();
        assert!(row.value("zzz").is_null());
        assert!(row.get("zzz").is_none());
        assert!(row.contains("a"));
    }

    #[test]
    fn remove_keeps_remaining_order() {
        let mut row: Row = [("a", 1i64), ("b", 2), ("c", 3)].into_iter().collect();
        assert_eq!(row.remove("b"), Some(Value::Integer(2)));
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(row.remove("b"), None);
    }

    #[test]
    fn json_roundtrip_keeps_column_order() {
        let json = r#"{"z":"last","a":1,"m":null}"#;
        let row: Row = serde_json::from_str(json).unwrap();
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["z", "a", "m"]);
        assert_eq!(serde_json::to_string(&row).unwrap(), json);
    }
}
