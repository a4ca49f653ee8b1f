//! Dotted-path access into nested JSON values.
//!
//! Reads are lenient: [`value_at`] walks a dotted path and yields `None` as
//! soon as a segment cannot be resolved. Writes follow document-database
//! update semantics and are strict: they operate on a validated
//! [`FieldPath`] and report a [`StorageError::PathConflict`] when the
//! existing structure cannot hold the requested change.
//!
//! The write helpers take the record's `value` slot as `&mut Option<Value>`
//! because a record may exist without any value at all.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::StorageError;

/// Most `null` elements a write may append to reach an array index.
pub const MAX_ARRAY_PADDING: usize = 1_500_000;

/// A validated, non-empty dotted path such as `settings.prefix` or `roles.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path. Empty paths, empty segments and segments starting
    /// with `$` are rejected.
    pub fn parse(path: &str) -> Result<Self, StorageError> {
        if path.is_empty() {
            return Err(invalid(path, "path is empty"));
        }

        let mut segments = Vec::new();
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(invalid(path, "path contains an empty segment"));
            }
            if segment.starts_with('$') {
                return Err(invalid(path, "segments must not start with '$'"));
            }
            segments.push(segment.to_string());
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Split into the parent segments and the final segment.
    fn split_last(&self) -> (&[String], &str) {
        match self.segments.split_last() {
            Some((last, parents)) => (parents, last.as_str()),
            // parse() never produces an empty segment list
            None => (&[], ""),
        }
    }
}

impl FromStr for FieldPath {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ============================================================================
// READS
// ============================================================================

/// Resolve `path` inside `root`.
///
/// A missing or empty path returns `root` unchanged. Objects are indexed by
/// key, arrays by decimal index; anything else ends the walk with `None`.
pub fn value_at<'a>(root: Option<&'a Value>, path: Option<&str>) -> Option<&'a Value> {
    let path = match path {
        Some(p) if !p.is_empty() => p,
        _ => return root,
    };

    let mut current = root?;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

// ============================================================================
// WRITES
// ============================================================================

/// Set the field at `path`, creating intermediate objects as needed.
pub fn set_at(root: &mut Option<Value>, path: &FieldPath, value: Value) -> Result<(), StorageError> {
    let (parents, last) = path.split_last();
    let mut node = root.get_or_insert_with(empty_object);
    for segment in parents {
        node = create_child(node, segment, path, empty_object)?;
    }

    match node {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            *array_slot(items, last, path, || Value::Null)? = value;
            Ok(())
        }
        other => Err(cannot_create(path, last, other)),
    }
}

/// Remove the field at `path`. Missing paths are left alone; array elements
/// are nulled rather than removed so sibling indices stay stable.
pub fn unset_at(root: &mut Option<Value>, path: &FieldPath) {
    let (parents, last) = path.split_last();
    let Some(mut node) = root.as_mut() else {
        return;
    };
    for segment in parents {
        node = match existing_child(node, segment) {
            Some(child) => child,
            None => return,
        };
    }

    match node {
        Value::Object(map) => {
            map.remove(last);
        }
        Value::Array(items) => {
            if let Some(slot) = last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                *slot = Value::Null;
            }
        }
        _ => {}
    }
}

/// Append `values` to the array at `path`, creating it if missing.
pub fn push_at(
    root: &mut Option<Value>,
    path: &FieldPath,
    values: Vec<Value>,
) -> Result<(), StorageError> {
    let items = array_at(root, path)?;
    items.extend(values);
    Ok(())
}

/// Append each of `values` not already present in the array at `path`.
pub fn add_to_set_at(
    root: &mut Option<Value>,
    path: &FieldPath,
    values: Vec<Value>,
) -> Result<(), StorageError> {
    let items = array_at(root, path)?;
    for value in values {
        if !items.contains(&value) {
            items.push(value);
        }
    }
    Ok(())
}

fn array_at<'a>(
    root: &'a mut Option<Value>,
    path: &FieldPath,
) -> Result<&'a mut Vec<Value>, StorageError> {
    let mut node = root.get_or_insert_with(empty_object);
    for (i, segment) in path.segments().iter().enumerate() {
        let is_leaf = i + 1 == path.segments().len();
        let fill: fn() -> Value = if is_leaf { empty_array } else { empty_object };
        node = create_child(node, segment, path, fill)?;
    }

    match node {
        Value::Array(items) => Ok(items),
        other => Err(StorageError::PathConflict {
            path: path.to_string(),
            reason: format!("the field must be an array but is of type {}", type_name(other)),
        }),
    }
}

fn create_child<'a>(
    node: &'a mut Value,
    segment: &str,
    path: &FieldPath,
    fill: fn() -> Value,
) -> Result<&'a mut Value, StorageError> {
    match node {
        Value::Object(map) => Ok(map.entry(segment.to_string()).or_insert_with(fill)),
        Value::Array(items) => array_slot(items, segment, path, fill),
        other => Err(cannot_create(path, segment, other)),
    }
}

/// Element `segment` of `items`, padding with `null` and `fill()` when the
/// index lies past the end.
fn array_slot<'a>(
    items: &'a mut Vec<Value>,
    segment: &str,
    path: &FieldPath,
    fill: fn() -> Value,
) -> Result<&'a mut Value, StorageError> {
    let index = array_index(segment, path)?;
    if index >= items.len() {
        if index - items.len() > MAX_ARRAY_PADDING {
            return Err(StorageError::PathConflict {
                path: path.to_string(),
                reason: format!(
                    "index {index} would pad the array by more than {MAX_ARRAY_PADDING} elements"
                ),
            });
        }
        items.resize(index, Value::Null);
        items.push(fill());
    }
    Ok(&mut items[index])
}

fn existing_child<'a>(node: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match node {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?),
        _ => None,
    }
}

fn array_index(segment: &str, path: &FieldPath) -> Result<usize, StorageError> {
    segment.parse().map_err(|_| StorageError::PathConflict {
        path: path.to_string(),
        reason: format!("cannot use the part '{segment}' to traverse an array"),
    })
}

fn cannot_create(path: &FieldPath, segment: &str, element: &Value) -> StorageError {
    StorageError::PathConflict {
        path: path.to_string(),
        reason: format!("cannot create field '{segment}' in element {element}"),
    }
}

fn invalid(path: &str, reason: &str) -> StorageError {
    StorageError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn empty_array() -> Value {
    Value::Array(Vec::new())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> FieldPath {
        FieldPath::parse(p).unwrap()
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        assert!(matches!(FieldPath::parse(""), Err(StorageError::InvalidPath { .. })));
        assert!(matches!(FieldPath::parse("a..b"), Err(StorageError::InvalidPath { .. })));
        assert!(matches!(FieldPath::parse(".a"), Err(StorageError::InvalidPath { .. })));
        assert!(matches!(FieldPath::parse("a.$set"), Err(StorageError::InvalidPath { .. })));
    }

    #[test]
    fn test_parse_segments() {
        let p: FieldPath = "settings.roles.0".parse().unwrap();
        assert_eq!(p.segments(), ["settings", "roles", "0"]);
        assert_eq!(p.as_str(), "settings.roles.0");
        assert_eq!(p.to_string(), "settings.roles.0");
    }

    #[test]
    fn test_value_at_without_path_returns_root() {
        let v = json!({"a": 1});
        assert_eq!(value_at(Some(&v), None), Some(&v));
        assert_eq!(value_at(Some(&v), Some("")), Some(&v));
        assert_eq!(value_at(None, None), None);
    }

    #[test]
    fn test_value_at_walks_objects_and_arrays() {
        let v = json!({"a": {"b": [10, {"c": "deep"}]}});
        assert_eq!(value_at(Some(&v), Some("a.b.0")), Some(&json!(10)));
        assert_eq!(value_at(Some(&v), Some("a.b.1.c")), Some(&json!("deep")));
    }

    #[test]
    fn test_value_at_stops_at_first_missing_segment() {
        let v = json!({"a": {"b": null}, "n": 5});
        assert_eq!(value_at(Some(&v), Some("x.y.z")), None);
        assert_eq!(value_at(Some(&v), Some("a.b")), Some(&Value::Null));
        assert_eq!(value_at(Some(&v), Some("a.b.c")), None);
        assert_eq!(value_at(Some(&v), Some("n.x")), None);
        assert_eq!(value_at(Some(&v), Some("a.b.0")), None);
    }

    #[test]
    fn test_set_at_creates_intermediate_objects() {
        let mut root = None;
        set_at(&mut root, &path("a.b.c"), json!(1)).unwrap();
        assert_eq!(root, Some(json!({"a": {"b": {"c": 1}}})));
    }

    #[test]
    fn test_set_at_keeps_siblings() {
        let mut root = Some(json!({"a": {"keep": true}, "b": 2}));
        set_at(&mut root, &path("a.new"), json!("x")).unwrap();
        assert_eq!(root, Some(json!({"a": {"keep": true, "new": "x"}, "b": 2})));
    }

    #[test]
    fn test_set_at_pads_arrays() {
        let mut root = Some(json!({"arr": [1]}));
        set_at(&mut root, &path("arr.3"), json!(4)).unwrap();
        assert_eq!(root, Some(json!({"arr": [1, null, null, 4]})));
    }

    #[test]
    fn test_set_at_huge_index_conflicts() {
        for raw in [
            "arr.18446744073709551615",
            "arr.99999999999",
            "arr.18446744073709551615.a",
            "arr.99999999999.a",
        ] {
            let mut root = Some(json!({"arr": [1]}));
            let err = set_at(&mut root, &path(raw), json!(2)).unwrap_err();
            assert!(matches!(err, StorageError::PathConflict { .. }), "{raw}");
            assert_eq!(root, Some(json!({"arr": [1]})));
        }
    }

    #[test]
    fn test_set_at_padding_limit_is_inclusive() {
        let mut root = Some(json!({"arr": []}));
        let at_limit = format!("arr.{MAX_ARRAY_PADDING}");
        set_at(&mut root, &path(&at_limit), json!(1)).unwrap();
        let items = value_at(root.as_ref(), Some("arr")).and_then(Value::as_array).unwrap();
        assert_eq!(items.len(), MAX_ARRAY_PADDING + 1);

        let mut root = Some(json!({"arr": []}));
        let past_limit = format!("arr.{}", MAX_ARRAY_PADDING + 1);
        assert!(set_at(&mut root, &path(&past_limit), json!(1)).is_err());
    }

    #[test]
    fn test_push_at_huge_index_conflicts() {
        let mut root = Some(json!({"arr": [[]]}));
        let err = push_at(&mut root, &path("arr.18446744073709551615"), vec![json!(1)]).unwrap_err();
        assert!(matches!(err, StorageError::PathConflict { .. }));
        let err = add_to_set_at(&mut root, &path("arr.99999999999.tags"), vec![json!(1)]).unwrap_err();
        assert!(matches!(err, StorageError::PathConflict { .. }));
        assert_eq!(root, Some(json!({"arr": [[]]})));
    }

    #[test]
    fn test_set_at_through_scalar_conflicts() {
        let mut root = Some(json!({"a": 5}));
        let err = set_at(&mut root, &path("a.b"), json!(1)).unwrap_err();
        assert!(matches!(err, StorageError::PathConflict { .. }));
        assert_eq!(root, Some(json!({"a": 5})));
    }

    #[test]
    fn test_set_at_non_numeric_array_segment_conflicts() {
        let mut root = Some(json!({"arr": []}));
        let err = set_at(&mut root, &path("arr.name"), json!(1)).unwrap_err();
        assert!(matches!(err, StorageError::PathConflict { .. }));
    }

    #[test]
    fn test_unset_at() {
        let mut root = Some(json!({"a": 1, "b": {"c": 2, "d": 3}, "arr": [1, 2]}));
        unset_at(&mut root, &path("a"));
        unset_at(&mut root, &path("b.c"));
        unset_at(&mut root, &path("arr.0"));
        unset_at(&mut root, &path("missing.deep"));
        assert_eq!(root, Some(json!({"b": {"d": 3}, "arr": [null, 2]})));
    }

    #[test]
    fn test_unset_at_on_empty_record_is_noop() {
        let mut root = None;
        unset_at(&mut root, &path("a"));
        assert_eq!(root, None);
    }

    #[test]
    fn test_push_at_creates_and_appends() {
        let mut root = None;
        push_at(&mut root, &path("list"), vec![json!(1), json!(1)]).unwrap();
        push_at(&mut root, &path("list"), vec![json!(2)]).unwrap();
        assert_eq!(root, Some(json!({"list": [1, 1, 2]})));
    }

    #[test]
    fn test_push_at_non_array_conflicts() {
        let mut root = Some(json!({"list": "nope"}));
        let err = push_at(&mut root, &path("list"), vec![json!(1)]).unwrap_err();
        assert!(matches!(err, StorageError::PathConflict { .. }));
    }

    #[test]
    fn test_add_to_set_at_dedupes() {
        let mut root = Some(json!({"tags": ["a"]}));
        add_to_set_at(
            &mut root,
            &path("tags"),
            vec![json!("a"), json!("b"), json!("b"), json!("c")],
        )
        .unwrap();
        assert_eq!(root, Some(json!({"tags": ["a", "b", "c"]})));
    }

    #[test]
    fn test_add_to_set_at_nested_creation() {
        let mut root = None;
        add_to_set_at(&mut root, &path("a.b"), vec![json!({"id": 1}), json!({"id": 1})]).unwrap();
        assert_eq!(root, Some(json!({"a": {"b": [{"id": 1}]}})));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z]{1,6}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Whatever is set at a path is read back from that path.
        #[test]
        fn prop_set_then_value_at(segments in prop::collection::vec(arb_segment(), 1..5), n in any::<i64>()) {
            let raw = segments.join(".");
            let field = FieldPath::parse(&raw).unwrap();
            let mut root = None;

            set_at(&mut root, &field, json!(n)).unwrap();

            prop_assert_eq!(value_at(root.as_ref(), Some(raw.as_str())), Some(&json!(n)));
        }

        /// Unsetting a path that was just set makes it unreadable again.
        #[test]
        fn prop_set_then_unset(segments in prop::collection::vec(arb_segment(), 1..5)) {
            let raw = segments.join(".");
            let field = FieldPath::parse(&raw).unwrap();
            let mut root = None;

            set_at(&mut root, &field, json!(true)).unwrap();
            unset_at(&mut root, &field);

            prop_assert_eq!(value_at(root.as_ref(), Some(raw.as_str())), None);
        }

        /// add_to_set never leaves duplicates behind.
        #[test]
        fn prop_add_to_set_unique(values in prop::collection::vec(0i64..5, 0..20)) {
            let field = FieldPath::parse("set").unwrap();
            let mut root = None;

            add_to_set_at(&mut root, &field, values.iter().map(|v| json!(v)).collect()).unwrap();

            let items = value_at(root.as_ref(), Some("set")).and_then(Value::as_array).unwrap();
            for (i, a) in items.iter().enumerate() {
                prop_assert!(!items[i + 1..].contains(a));
            }
        }
    }
}
