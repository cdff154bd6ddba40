//! Resource Spec Builder.
//!
//! Translates the flat per-kind parameter sets into the control plane's
//! nested documents. Each builder validates its input completely before
//! producing anything, and records how the resulting document must be
//! compared against observed state (see [`DiffPolicy`]).

pub mod image;
pub mod network;
pub mod vm;
pub mod volume;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::{ResourceIdentity, ResourceKind};

/// Annotation that ties a claim to the image it is cloned from.
pub const IMAGE_ID_ANNOTATION: &str = "harvesterhci.io/imageId";

/// A location inside a document, stored as unescaped segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build from literal segments, e.g. `["spec", "running"]`.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Look the path up in a document.
    pub fn get<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(doc, |current, segment| current.get(segment.as_str()))
    }

    /// Write `value` at this path, creating intermediate objects and
    /// replacing any non-object found on the way.
    pub fn insert(&self, doc: &mut Value, value: Value) {
        let Some((last, parents)) = self.0.split_last() else {
            *doc = value;
            return;
        };
        let mut current = doc;
        for segment in parents {
            current = object_mut(current)
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        object_mut(current).insert(last.clone(), value);
    }
}

fn object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}

/// Renders as a JSON pointer.
impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "/{}", segment.replace('~', "~0").replace('/', "~1"))?;
        }
        Ok(())
    }
}

/// A field compared only as an opaque whole against the value recorded in
/// an annotation at the last apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueField {
    pub path: FieldPath,
    pub annotation: String,
}

/// How a desired document is compared against observed state.
#[derive(Debug, Clone, Default)]
pub struct DiffPolicy {
    /// Compared by normalised quantity value.
    pub quantities: BTreeSet<FieldPath>,
    /// Lists compared as multisets.
    pub unordered: BTreeSet<FieldPath>,
    /// Sent on create, never considered drift.
    pub create_only: BTreeSet<FieldPath>,
    /// Strings holding JSON documents, compared structurally.
    pub json_strings: BTreeSet<FieldPath>,
    pub opaque: Option<OpaqueField>,
}

/// VM power target requested by the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerTarget {
    Running,
    Stopped,
    Restarted,
}

/// Where a resolved image must be written into the desired document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceTarget {
    /// The volume itself is cloned from the image.
    Volume,
    /// A VM disk backed by a new claim created from the image.
    VmDisk {
        disk: String,
        claim: String,
        size: String,
        storage_class: Option<String>,
    },
}

/// A symbolic image reference awaiting resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// `name`, `namespace/name`, or a display name.
    pub image: String,
    pub target: ReferenceTarget,
}

/// A reference resolved to a concrete image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub namespace: String,
    pub name: String,
}

impl ResolvedImage {
    pub fn from_identity(identity: &ResourceIdentity) -> Self {
        Self {
            namespace: identity.namespace.clone(),
            name: identity.name.clone(),
        }
    }

    /// Identifier format used by the control plane's image annotations.
    pub fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Storage class the control plane provisions for each image.
    pub fn storage_class(&self) -> String {
        format!("longhorn-{}", self.name)
    }
}

/// Desired state for one resource, produced fresh on every invocation.
#[derive(Debug, Clone)]
pub struct DesiredSpec {
    pub identity: ResourceIdentity,
    pub document: Value,
    pub policy: DiffPolicy,
    pub power: Option<PowerTarget>,
    pub references: Vec<ImageReference>,
}

impl DesiredSpec {
    fn new(identity: ResourceIdentity) -> Self {
        let document = serde_json::json!({
            "apiVersion": identity.kind.api_version(),
            "kind": identity.kind.object_kind(),
            "metadata": {
                "name": identity.name,
                "namespace": identity.namespace,
            },
        });
        Self {
            identity,
            document,
            policy: DiffPolicy::default(),
            power: None,
            references: Vec::new(),
        }
    }

    /// Set an explicitly requested field.
    fn set(&mut self, path: &[&str], value: Value) {
        FieldPath::new(path.iter().copied()).insert(&mut self.document, value);
    }

    /// Set a field that only matters at creation time.
    fn set_create_only(&mut self, path: &[&str], value: Value) {
        let path = FieldPath::new(path.iter().copied());
        path.insert(&mut self.document, value);
        self.policy.create_only.insert(path);
    }

    /// Set an explicit value, or a create-only default when absent.
    fn set_or_default(&mut self, path: &[&str], value: Option<Value>, default: Value) {
        match value {
            Some(v) => self.set(path, v),
            None => self.set_create_only(path, default),
        }
    }

    fn set_labels(&mut self, path: &[&str], labels: &Option<BTreeMap<String, String>>) {
        if let Some(labels) = labels {
            self.set(path, string_map(labels));
        }
    }

    fn mark_quantity(&mut self, path: &[&str]) {
        self.policy
            .quantities
            .insert(FieldPath::new(path.iter().copied()));
    }

    /// Write resolved images into the document. References without a
    /// resolution are left untouched.
    pub fn bind_images(&mut self, resolved: &[(ImageReference, ResolvedImage)]) -> Result<()> {
        match self.identity.kind {
            ResourceKind::Vm => vm::bind_images(self, resolved),
            ResourceKind::Volume => {
                for (_, image) in resolved {
                    volume::bind_image(self, image);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// Validate an object name (DNS-1123 subdomain).
pub(crate) fn validate_name(what: &str, name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let valid_edges = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
    if name.is_empty() || name.len() > 253 || !valid_chars || !valid_edges {
        return Err(Error::invalid(format!(
            "{what} '{name}' must be a lowercase RFC 1123 name"
        )));
    }
    Ok(())
}

pub(crate) fn validate_identity(identity: &ResourceIdentity) -> Result<()> {
    validate_name("name", &identity.name)?;
    validate_name("namespace", &identity.namespace)?;
    if identity.namespace.len() > 63 || identity.namespace.contains('.') {
        return Err(Error::invalid(format!(
            "namespace '{}' must be a DNS label",
            identity.namespace
        )));
    }
    Ok(())
}
