//! Dotted field-path access over nested JSON maps
//!
//! Every component that reads or writes inside an envelope goes through this
//! module. Paths are keys joined by [`SEPARATOR`] (`canonical.orbit.apogee_km`).
//! Lookups never fail for a missing path; they fail only when the path string
//! itself is malformed.

use serde_json::{Map, Value};
use thiserror::Error;

/// Separator between path segments
pub const SEPARATOR: char = '.';

/// Characters that may not appear anywhere in a path
const RESERVED_CHARACTERS: &[char] = &['$'];

/// Malformed field path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldPathError {
    #[error("field path is empty")]
    Empty,

    #[error("field path {0:?} contains whitespace")]
    Whitespace(String),

    #[error("field path {path:?} contains reserved character {character:?}")]
    ReservedCharacter { path: String, character: char },

    #[error("field path {0:?} contains consecutive separators")]
    EmptySegment(String),

    #[error("field path {0:?} starts with a separator")]
    LeadingSeparator(String),

    #[error("field path {0:?} ends with a separator")]
    TrailingSeparator(String),

    #[error("field path {path:?} must start with '{expected}.'")]
    WrongRoot { path: String, expected: &'static str },

    #[error("field path {0:?} names no field below its root")]
    MissingField(String),
}

/// Validate a dotted field path
///
/// Rejects empty paths, whitespace, control or reserved characters,
/// consecutive separators and leading or trailing separators.
pub fn validate_field_path(path: &str) -> Result<(), FieldPathError> {
    if path.is_empty() {
        return Err(FieldPathError::Empty);
    }
    if path.chars().any(char::is_whitespace) {
        return Err(FieldPathError::Whitespace(path.to_string()));
    }
    if let Some(character) = path
        .chars()
        .find(|c| c.is_control() || RESERVED_CHARACTERS.contains(c))
    {
        return Err(FieldPathError::ReservedCharacter {
            path: path.to_string(),
            character,
        });
    }
    if path.starts_with(SEPARATOR) {
        return Err(FieldPathError::LeadingSeparator(path.to_string()));
    }
    if path.ends_with(SEPARATOR) {
        return Err(FieldPathError::TrailingSeparator(path.to_string()));
    }
    if path.split(SEPARATOR).any(str::is_empty) {
        return Err(FieldPathError::EmptySegment(path.to_string()));
    }
    Ok(())
}

/// Validate and split a path into its segments
pub fn split(path: &str) -> Result<Vec<&str>, FieldPathError> {
    validate_field_path(path)?;
    Ok(path.split(SEPARATOR).collect())
}

/// Join segments back into a dotted path
pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string())
}

/// Read the value at `path`
///
/// Returns `Ok(None)` when any intermediate key is missing or is not a map.
pub fn get<'a>(root: &'a Map<String, Value>, path: &str) -> Result<Option<&'a Value>, FieldPathError> {
    let segments = split(path)?;
    Ok(get_segments(root, &segments))
}

/// Read the value at an already-split path
pub fn get_segments<'a, S: AsRef<str>>(root: &'a Map<String, Value>, segments: &[S]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = root.get(first.as_ref())?;
    for key in rest {
        current = current.as_object()?.get(key.as_ref())?;
    }
    Some(current)
}

/// Write `value` at `path`, creating intermediate maps as needed
///
/// Returns `true` when an existing non-map value sat on the way to the leaf
/// and was replaced by a fresh map. That value is lost.
pub fn set(root: &mut Map<String, Value>, path: &str, value: Value) -> Result<bool, FieldPathError> {
    let segments = split(path)?;
    Ok(set_segments(root, &segments, value))
}

/// Write `value` at an already-split path; see [`set`]
pub fn set_segments<S: AsRef<str>>(root: &mut Map<String, Value>, segments: &[S], value: Value) -> bool {
    let Some((leaf, parents)) = segments.split_last() else {
        return false;
    };

    let mut overwrote_non_map = false;
    let mut current = root;
    for key in parents {
        let slot = current
            .entry(key.as_ref().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            overwrote_non_map = true;
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => unreachable!("non-map slot replaced above"),
        };
    }

    current.insert(leaf.as_ref().to_string(), value);
    overwrote_non_map
}

/// Remove the value at an already-split path
///
/// Maps left empty by the removal are removed as well. Returns the removed
/// value, or `None` when nothing sat at the path.
pub fn remove_segments<S: AsRef<str>>(root: &mut Map<String, Value>, segments: &[S]) -> Option<Value> {
    let (first, rest) = segments.split_first()?;
    if rest.is_empty() {
        return root.remove(first.as_ref());
    }

    let child = root.get_mut(first.as_ref())?.as_object_mut()?;
    let removed = remove_segments(child, rest)?;
    if child.is_empty() {
        root.remove(first.as_ref());
    }
    Some(removed)
}

/// Every leaf path in `root`, depth first, in map order
///
/// Arrays and scalars are leaves. Empty maps contribute nothing.
pub fn leaf_paths(root: &Map<String, Value>) -> Vec<Vec<String>> {
    let mut paths = Vec::new();
    let mut prefix = Vec::new();
    collect_leaves(root, &mut prefix, &mut paths);
    paths
}

fn collect_leaves(map: &Map<String, Value>, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
    for (key, value) in map {
        prefix.push(key.clone());
        match value {
            Value::Object(child) => collect_leaves(child, prefix, out),
            _ => out.push(prefix.clone()),
        }
        prefix.pop();
    }
}

/// Whether a value counts as supplied
///
/// `null` and the empty string mean "this source does not have the field".
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_validate_accepts_dotted_paths() {
        for path in ["a.b.c", "kaggle.orbital_band", "sources.kaggle.orbital_band", "x"] {
            assert!(validate_field_path(path).is_ok(), "{path} should be valid");
        }
    }

    #[test]
    fn test_validate_rejects_malformed_paths() {
        assert_eq!(validate_field_path(""), Err(FieldPathError::Empty));
        assert!(matches!(validate_field_path("a..b"), Err(FieldPathError::EmptySegment(_))));
        assert!(matches!(validate_field_path(".a"), Err(FieldPathError::LeadingSeparator(_))));
        assert!(matches!(validate_field_path("a."), Err(FieldPathError::TrailingSeparator(_))));
        assert!(matches!(validate_field_path("a b"), Err(FieldPathError::Whitespace(_))));
        assert!(matches!(validate_field_path("field\tname"), Err(FieldPathError::Whitespace(_))));
        assert!(matches!(
            validate_field_path("field$name"),
            Err(FieldPathError::ReservedCharacter { character: '$', .. })
        ));
        assert!(matches!(
            validate_field_path("a\u{0}b"),
            Err(FieldPathError::ReservedCharacter { .. })
        ));
    }

    #[test]
    fn test_get_nested_values() {
        let doc = object(json!({
            "sources": {"kaggle": {"orbital_band": "LEO", "name": "ISS"}},
            "canonical": {"orbit": {"apogee_km": 420}}
        }));

        assert_eq!(get(&doc, "sources.kaggle.orbital_band").unwrap(), Some(&json!("LEO")));
        assert_eq!(get(&doc, "canonical.orbit.apogee_km").unwrap(), Some(&json!(420)));
        assert_eq!(get(&doc, "sources.nonexistent.field").unwrap(), None);
        assert_eq!(get(&doc, "sources.kaggle.missing").unwrap(), None);
    }

    #[test]
    fn test_get_through_scalar_is_absent() {
        let doc = object(json!({"a": "string"}));
        assert_eq!(get(&doc, "a.b").unwrap(), None);
        assert_eq!(get(&Map::new(), "a.b.c").unwrap(), None);
    }

    #[test]
    fn test_get_malformed_path_errors() {
        let doc = object(json!({"a": 1}));
        assert!(get(&doc, "a..b").is_err());
    }

    #[test]
    fn test_set_creates_intermediate_maps() {
        let mut doc = Map::new();
        assert!(!set(&mut doc, "a.b.c", json!(1)).unwrap());
        assert_eq!(Value::Object(doc), json!({"a": {"b": {"c": 1}}}));

        let mut doc = object(json!({"canonical": {"orbit": {}}}));
        set(&mut doc, "canonical.orbit.apogee_km", json!(420)).unwrap();
        assert_eq!(doc["canonical"]["orbit"]["apogee_km"], json!(420));

        let mut doc = Map::new();
        set(&mut doc, "x", json!(10)).unwrap();
        assert_eq!(Value::Object(doc), json!({"x": 10}));
    }

    #[test]
    fn test_set_overwrites_non_map_and_reports_it() {
        let mut doc = object(json!({"a": "string", "keep": true}));
        let overwrote = set(&mut doc, "a.b.c", json!(1)).unwrap();
        assert!(overwrote);
        assert_eq!(Value::Object(doc), json!({"a": {"b": {"c": 1}}, "keep": true}));
    }

    #[test]
    fn test_remove_prunes_emptied_maps() {
        let mut doc = object(json!({"orbit": {"apogee_km": 1, "tle": {"line1": "x"}}, "name": "Sat"}));
        assert_eq!(remove_segments(&mut doc, &["orbit", "tle", "line1"]), Some(json!("x")));
        assert_eq!(Value::Object(doc.clone()), json!({"orbit": {"apogee_km": 1}, "name": "Sat"}));

        assert_eq!(remove_segments(&mut doc, &["orbit", "apogee_km"]), Some(json!(1)));
        assert_eq!(Value::Object(doc.clone()), json!({"name": "Sat"}));

        assert_eq!(remove_segments(&mut doc, &["name", "deeper"]), None);
        assert_eq!(remove_segments(&mut doc, &["missing"]), None);
        assert_eq!(Value::Object(doc), json!({"name": "Sat"}));
    }

    #[test]
    fn test_leaf_paths_skip_empty_maps() {
        let doc = object(json!({
            "name": "Sat",
            "orbit": {"apogee_km": 1, "perigee_km": 2},
            "empty": {},
            "tags": ["a", "b"]
        }));
        let paths: Vec<String> = leaf_paths(&doc).iter().map(|p| join(p)).collect();
        assert_eq!(paths, vec!["name", "orbit.apogee_km", "orbit.perigee_km", "tags"]);
    }

    #[test]
    fn test_is_present() {
        assert!(!is_present(&Value::Null));
        assert!(!is_present(&json!("")));
        assert!(is_present(&json!(0)));
        assert!(is_present(&json!(false)));
        assert!(is_present(&json!("x")));
    }
}
