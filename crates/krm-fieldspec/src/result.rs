//! Result messages reported back to the caller of a function.
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{gvk::ResourceId, path::FieldPath};

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

/// Points at the resource a [`ResultItem`] is about.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl From<&ResourceId> for ResourceRef {
    fn from(id: &ResourceId) -> Self {
        Self {
            api_version: id.gvk.api_version(),
            kind: id.gvk.kind.clone(),
            name: id.name.clone(),
            namespace: id.namespace.clone().filter(|namespace| !namespace.is_empty()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldRef {
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileRef {
    pub path: String,
}

/// A single entry of the `results` list of a ResourceList.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    pub message: String,
    pub severity: Severity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<ResourceRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
}

impl ResultItem {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            resource_ref: None,
            field: None,
            file: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Creates an error item from `error` including its whole source chain.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        Self::error(error_chain(error))
    }

    pub fn with_resource(mut self, id: &ResourceId) -> Self {
        self.resource_ref = Some(id.into());
        self
    }

    pub fn with_field(mut self, path: impl ToString) -> Self {
        self.field = Some(FieldRef {
            path: path.to_string(),
        });
        self
    }

    pub fn with_file(mut self, path: Option<&str>) -> Self {
        self.file = path.map(|path| FileRef {
            path: path.to_owned(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ResultItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)?;
        if let Some(field) = &self.field {
            write!(f, " (field {})", field.path)?;
        }
        if let Some(file) = &self.file {
            write!(f, " in {}", file.path)?;
        }
        Ok(())
    }
}

/// Joins the messages of `error` and all its sources with `: `.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// A single field value which was changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutationResult {
    pub resource: ResourceId,
    pub file_path: Option<String>,
    pub field_path: FieldPath,
    pub old_value: String,
    pub new_value: String,
}

impl From<&MutationResult> for ResultItem {
    fn from(mutation: &MutationResult) -> Self {
        Self::info(format!(
            "changed {:?} to {:?}",
            mutation.old_value, mutation.new_value
        ))
        .with_resource(&mutation.resource)
        .with_field(&mutation.field_path)
        .with_file(mutation.file_path.as_deref())
    }
}

/// Everything a pass over a resource list produced, in the order it
/// happened.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub mutations: Vec<MutationResult>,
    pub items: Vec<ResultItem>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `mutation` together with the result item describing it.
    pub fn record(&mut self, mutation: MutationResult) {
        self.items.push(ResultItem::from(&mutation));
        self.mutations.push(mutation);
    }

    pub fn push(&mut self, item: ResultItem) {
        self.items.push(item);
    }

    pub fn extend(&mut self, other: Self) {
        self.mutations.extend(other.mutations);
        self.items.extend(other.items);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(ResultItem::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_error()).count()
    }
}
