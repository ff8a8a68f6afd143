use std::collections::BTreeMap;

use unirecon_core::CanonicalField;

use crate::model::SourceSnapshot;

/// Resolve break classifications: for each classifier field, the first
/// non-null value across the snapshots in source order.
pub fn resolve_classifications(
    snapshots: &[SourceSnapshot],
    classifier_fields: &[CanonicalField],
) -> BTreeMap<String, String> {
    let mut classifications = BTreeMap::new();
    for field in classifier_fields {
        let Some(key) = field.classification_key() else {
            continue;
        };
        let value = snapshots
            .iter()
            .map(|s| s.record.value(&field.name))
            .find(|v| !v.is_null());
        if let Some(value) = value {
            classifications.insert(key.to_string(), value.to_string());
        }
    }
    classifications
}

#[cfg(test)]
mod tests {
    use super::*;
    use unirecon_core::{FieldRole, Row};

    fn snapshot(source: &str, pairs: &[(&str, &str)]) -> SourceSnapshot {
        SourceSnapshot::new(source, pairs.iter().copied().collect())
    }

    #[test]
    fn first_non_null_value_wins() {
        let fields = vec![
            CanonicalField::new("desk", FieldRole::Product),
            CanonicalField::new("le", FieldRole::Entity),
            CanonicalField::new("book", FieldRole::SubProduct),
        ];
        let snapshots = vec![
            SourceSnapshot::new("BOOK", Row::new()),
            snapshot("CPTY", &[("desk", "FX"), ("le", "LDN")]),
            snapshot("GL", &[("desk", "RATES"), ("le", "NY")]),
        ];
        let out = resolve_classifications(&snapshots, &fields);
        assert_eq!(out.get("product").map(String::as_str), Some("FX"));
        assert_eq!(out.get("entity").map(String::as_str), Some("LDN"));
        assert!(!out.contains_key("subProduct"));
    }

    #[test]
    fn custom_tags_are_reported_under_their_tag() {
        let fields = vec![CanonicalField::new("region", FieldRole::Attribute).with_classifier_tag("region")];
        let out = resolve_classifications(&[snapshot("A", &[("region", "EMEA")])], &fields);
        assert_eq!(out.get("region").map(String::as_str), Some("EMEA"));
    }
}
