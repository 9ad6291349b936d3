//! Structured edits on YAML manifests and kustomization overlays.
//!
//! Every edit parses the document, changes the tree and re-serializes it.
//! Any parse failure aborts the edit: there is no partial patching.
//! Comments are not preserved by the round trip; key order is.

use crate::utils::errors::{InstallerError, Result};
use serde::Serialize;
use serde_yaml::{Mapping, Value};

/// JSON-patch operation used in kustomization `patches:` entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// One `{op, path, value}` triple
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Patch {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }
}

/// Parse a single YAML document; an empty document is an empty mapping
pub fn parse_document(document: &str) -> Result<Value> {
    let value: Value =
        serde_yaml::from_str(document).map_err(|e| InstallerError::parse("manifest", e))?;
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

/// Serialize any value to YAML text
pub fn to_yaml<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| InstallerError::parse("serialized manifest", e))
}

/// Walk `path` from `root`, creating empty mappings for missing or null
/// segments, and return the mapping at the end.
fn mapping_at<'a>(root: &'a mut Value, path: &[&str]) -> Result<&'a mut Mapping> {
    let mut node = root;
    for (depth, segment) in path.iter().enumerate() {
        if node.is_null() {
            *node = Value::Mapping(Mapping::new());
        }
        node = match node {
            Value::Mapping(map) => map
                .entry(Value::from(*segment))
                .or_insert(Value::Mapping(Mapping::new())),
            _ => {
                return Err(InstallerError::parse(
                    format!("path '{}'", path[..depth].join(".")),
                    "not a mapping",
                ));
            }
        };
    }

    if node.is_null() {
        *node = Value::Mapping(Mapping::new());
    }
    match node {
        Value::Mapping(map) => Ok(map),
        _ => Err(InstallerError::parse(
            format!("path '{}'", path.join(".")),
            "not a mapping",
        )),
    }
}

/// Set `field` to `value` inside the mapping at `path`.
///
/// `value` is itself parsed as YAML, so `"3"`, `"true"` and `"[a, b]"` land
/// as a number, a bool and a list. Missing intermediate mappings are created.
pub fn set_field(document: &str, value: &str, field: &str, path: &[&str]) -> Result<String> {
    let mut root = parse_document(document)?;
    let parsed: Value = serde_yaml::from_str(value)
        .map_err(|e| InstallerError::parse(format!("value for '{field}'"), e))?;

    mapping_at(&mut root, path)?.insert(Value::from(field), parsed);
    to_yaml(&root)
}

/// Read the value at `path` as trimmed text.
///
/// Strings come back verbatim; anything structured is re-serialized.
pub fn get_field(document: &str, path: &[&str]) -> Result<String> {
    let root = parse_document(document)?;
    let missing = || InstallerError::FieldNotFound(path.join("."));

    let mut node = &root;
    for segment in path {
        node = node.get(*segment).ok_or_else(missing)?;
    }

    match node {
        Value::Null => Err(missing()),
        Value::String(s) => Ok(s.trim().to_string()),
        other => Ok(to_yaml(other)?.trim().to_string()),
    }
}

/// Append a `patches:` entry targeting `(kind, name)` to a kustomization.
///
/// Each call adds one entry after any existing ones; entries are never
/// replaced or reordered.
pub fn add_patches(overlay: &str, kind: &str, name: &str, patches: &[Patch]) -> Result<String> {
    let mut root = parse_document(overlay)?;

    let mut target = Mapping::new();
    target.insert(Value::from("kind"), Value::from(kind));
    target.insert(Value::from("name"), Value::from(name));

    let mut entry = Mapping::new();
    entry.insert(Value::from("target"), Value::Mapping(target));
    entry.insert(Value::from("patch"), Value::from(to_yaml(patches)?));

    let list = mapping_at(&mut root, &[])?
        .entry(Value::from("patches"))
        .or_insert(Value::Sequence(Vec::new()));
    if list.is_null() {
        *list = Value::Sequence(Vec::new());
    }
    match list {
        Value::Sequence(seq) => seq.push(Value::Mapping(entry)),
        _ => return Err(InstallerError::parse("kustomization patches", "not a list")),
    }

    to_yaml(&root)
}

fn is_separator(line: &str) -> bool {
    let line = line.trim_end();
    line == "---" || line.starts_with("--- ") || line.starts_with("---\t")
}

/// Split a multi-document stream into its non-empty documents, keeping each
/// document's original text.
pub fn split_documents(stream: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();

    for line in stream.lines() {
        if is_separator(line) {
            push_document(&mut docs, &current);
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_document(&mut docs, &current);

    docs
}

fn push_document(docs: &mut Vec<String>, text: &str) {
    let has_content = text.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with('#')
    });
    if has_content {
        docs.push(text.trim_matches('\n').to_string());
    }
}

/// Join documents into one stream with `---` separators
pub fn join_documents<S: AsRef<str>>(docs: &[S]) -> String {
    if docs.is_empty() {
        return String::new();
    }
    let body = docs
        .iter()
        .map(|d| d.as_ref().trim_matches('\n'))
        .collect::<Vec<_>>()
        .join("\n---\n");
    format!("{body}\n")
}

/// `kind` of a single document, if it has one
pub fn kind_of(document: &str) -> Result<Option<String>> {
    let value = parse_document(document)?;
    Ok(value
        .get("kind")
        .and_then(Value::as_str)
        .map(str::to_string))
}

/// First document in `stream` whose kind is `kind`
pub fn get_manifest_by_kind(stream: &str, kind: &str) -> Result<Option<String>> {
    for doc in split_documents(stream) {
        if kind_of(&doc)?.as_deref() == Some(kind) {
            return Ok(Some(doc));
        }
    }
    Ok(None)
}

/// Every document in `stream` whose kind is `kind`, in stream order
pub fn get_all_manifests_by_kind(stream: &str, kind: &str) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for doc in split_documents(stream) {
        if kind_of(&doc)?.as_deref() == Some(kind) {
            found.push(doc);
        }
    }
    Ok(found)
}

/// Remove every document of `kind` from `stream`.
///
/// Returns the remaining stream and the removed documents in stream order.
pub fn omit_and_return_by_kind(stream: &str, kind: &str) -> Result<(String, Vec<String>)> {
    let mut kept = Vec::new();
    let mut removed = Vec::new();

    for doc in split_documents(stream) {
        if kind_of(&doc)?.as_deref() == Some(kind) {
            removed.push(doc);
        } else {
            kept.push(doc);
        }
    }

    Ok((join_documents(&kept), removed))
}
