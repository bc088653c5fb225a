use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};
use snafu::{OptionExt, Snafu};

use crate::{
    gvk::{Gvk, ResourceId},
    node::{child, child_mut, string_field},
    path::{FieldPath, Step},
};

/// Annotation carrying the file a resource was read from.
pub const PATH_ANNOTATION: &str = "internal.config.kubernetes.io/path";

/// Legacy variant of [`PATH_ANNOTATION`].
pub const LEGACY_PATH_ANNOTATION: &str = "config.kubernetes.io/path";

/// Annotation marking resources which are not meant to be deployed.
pub const LOCAL_CONFIG_ANNOTATION: &str = "config.kubernetes.io/local-config";

#[derive(Debug, PartialEq, Snafu)]
pub enum ResourceError {
    #[snafu(display("resource must be a mapping, got {found}"))]
    NotAMapping { found: String },
}

/// A single KRM resource.
///
/// The tree itself is a plain [`serde_yaml::Value`]. Line comments which
/// should be written next to a node are kept on the side, keyed by the
/// [`FieldPath`] of the node they belong to. The identity the resource had
/// when it was loaded is remembered, so references using the previous name
/// can still be resolved after a rename.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    root: Value,
    comments: BTreeMap<FieldPath, String>,
    original_id: ResourceId,
}

impl Resource {
    pub fn from_value(root: Value) -> Result<Self, ResourceError> {
        if !root.is_mapping() {
            return NotAMappingSnafu {
                found: kind_of(&root),
            }
            .fail();
        }

        let original_id = id_of(&root);
        Ok(Self {
            root,
            comments: BTreeMap::new(),
            original_id,
        })
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    pub fn gvk(&self) -> Gvk {
        Gvk::from_api_version(
            string_field(&self.root, "apiVersion").unwrap_or_default(),
            string_field(&self.root, "kind").unwrap_or_default(),
        )
    }

    pub fn name(&self) -> &str {
        self.metadata()
            .and_then(|metadata| string_field(metadata, "name"))
            .unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata()
            .and_then(|metadata| string_field(metadata, "namespace"))
    }

    /// The current identity, reflecting renames applied so far.
    pub fn id(&self) -> ResourceId {
        id_of(&self.root)
    }

    /// The identity the resource had when it was loaded.
    pub fn original_id(&self) -> &ResourceId {
        &self.original_id
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .and_then(|metadata| metadata.get("annotations"))
            .and_then(|annotations| string_field(annotations, key))
    }

    /// Sets `metadata.name`, creating `metadata` if needed.
    pub fn set_name(&mut self, name: impl Into<String>) {
        let Some(root) = self.root.as_mapping_mut() else {
            return;
        };
        let metadata = root
            .entry(Value::String("metadata".to_owned()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if !metadata.is_mapping() {
            *metadata = Value::Mapping(Mapping::new());
        }
        if let Some(metadata) = metadata.as_mapping_mut() {
            metadata.insert(Value::String("name".to_owned()), Value::String(name.into()));
        }
    }

    /// The file this resource was read from, taken from the path
    /// annotations set by the orchestrator.
    pub fn file_path(&self) -> Option<&str> {
        self.annotation(PATH_ANNOTATION)
            .or_else(|| self.annotation(LEGACY_PATH_ANNOTATION))
    }

    /// Returns `true` if the resource is only used for local configuration.
    pub fn is_local_config(&self) -> bool {
        self.annotation(LOCAL_CONFIG_ANNOTATION)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.steps()
            .iter()
            .try_fold(&self.root, |node, step| child(node, step))
    }

    pub fn get_mut(&mut self, path: &FieldPath) -> Option<&mut Value> {
        path.steps()
            .iter()
            .try_fold(&mut self.root, |node, step| child_mut(node, step))
    }

    /// Replaces the node at `path` and returns the previous node.
    pub fn replace(&mut self, path: &FieldPath, value: Value) -> Result<Value, MissingFieldError> {
        let node = self.get_mut(path).context(MissingFieldSnafu {
            path: path.to_string(),
        })?;
        Ok(std::mem::replace(node, value))
    }

    /// Attaches a line comment to the node at `path`.
    ///
    /// Comments are written after the value of scalars and after the key of
    /// mappings and sequences.
    pub fn set_comment(&mut self, path: FieldPath, comment: impl Into<String>) {
        self.comments.insert(path, comment.into());
    }

    pub fn comment(&self, path: &FieldPath) -> Option<&str> {
        self.comments.get(path).map(String::as_str)
    }

    pub fn comments(&self) -> &BTreeMap<FieldPath, String> {
        &self.comments
    }

    /// Returns the value of a key of the mapping enclosing `path`, e.g. the
    /// `kind` next to a `name` reference.
    pub fn sibling(&self, path: &FieldPath, key: &str) -> Option<&Value> {
        let parent = path.parent()?;
        child(self.get(&parent)?, &Step::Key(key.to_owned()))
    }

    fn metadata(&self) -> Option<&Value> {
        self.root.get("metadata")
    }
}

#[derive(Debug, PartialEq, Snafu)]
#[snafu(display("field {path:?} does not exist"))]
pub struct MissingFieldError {
    path: String,
}

fn id_of(root: &Value) -> ResourceId {
    let metadata = root.get("metadata");
    ResourceId::new(
        Gvk::from_api_version(
            string_field(root, "apiVersion").unwrap_or_default(),
            string_field(root, "kind").unwrap_or_default(),
        ),
        metadata
            .and_then(|metadata| string_field(metadata, "name"))
            .unwrap_or_default(),
        metadata
            .and_then(|metadata| string_field(metadata, "namespace"))
            .map(ToOwned::to_owned),
    )
}

fn kind_of(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
    .to_owned()
}
