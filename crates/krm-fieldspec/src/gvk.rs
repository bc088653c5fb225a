use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::{Snafu, ensure};

const MAX_GROUP_LENGTH: usize = 253;
const MAX_VERSION_LENGTH: usize = 63;

/// The namespace Kubernetes assigns to namespaced objects without one.
pub const DEFAULT_NAMESPACE: &str = "default";

static API_GROUP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:[a-z0-9][a-z0-9-]{0,61}[a-z0-9])\.?)+$")
        .expect("failed to compile API group regex")
});

static API_VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("failed to compile API version regex")
});

static KIND_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9]*$").expect("failed to compile kind regex")
});

/// Kinds which are never bound to a namespace.
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "CSIDriver",
    "CSINode",
    "CertificateSigningRequest",
    "ClusterIssuer",
    "ClusterRole",
    "ClusterRoleBinding",
    "ComponentStatus",
    "CustomResourceDefinition",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PodSecurityPolicy",
    "PriorityClass",
    "RuntimeClass",
    "StorageClass",
    "ValidatingWebhookConfiguration",
    "VolumeAttachment",
];

/// Error variants which can be encountered when validating a [`Gvk`] which
/// is used as a selector.
#[derive(Debug, PartialEq, Snafu)]
pub enum GvkError {
    #[snafu(display("group {group:?} must not be longer than 253 characters"))]
    GroupTooLong { group: String },

    #[snafu(display("group {group:?} must be a valid DNS subdomain"))]
    InvalidGroup { group: String },

    #[snafu(display("version {version:?} must be a valid DNS label"))]
    InvalidVersion { version: String },

    #[snafu(display("kind {kind:?} must start with a letter and only contain alphanumerics"))]
    InvalidKind { kind: String },
}

/// A Group/Version/Kind triple.
///
/// The same type is used for the identity of a resource and for selecting
/// resources. When used as a selector, every empty component acts as a
/// wildcard, see [`Gvk::is_selected_by`].
#[derive(
    Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize,
)]
pub struct Gvk {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl Gvk {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Splits an `apiVersion` of the form `(<GROUP>/)<VERSION>` and combines
    /// it with `kind`. The core group is represented by an empty group.
    ///
    /// ```
    /// use krm_fieldspec::Gvk;
    ///
    /// let gvk = Gvk::from_api_version("apps/v1", "Deployment");
    /// assert_eq!(gvk, Gvk::new("apps", "v1", "Deployment"));
    /// ```
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };

        Self::new(group, version, kind)
    }

    /// Returns the `apiVersion` string this GVK was derived from.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Returns `true` if every non-empty component of `selector` equals the
    /// corresponding component of `self`.
    pub fn is_selected_by(&self, selector: &Self) -> bool {
        (selector.group.is_empty() || selector.group == self.group)
            && (selector.version.is_empty() || selector.version == self.version)
            && (selector.kind.is_empty() || selector.kind == self.kind)
    }

    /// Returns `true` if no component is set, which selects every resource.
    pub fn is_wildcard(&self) -> bool {
        self.group.is_empty() && self.version.is_empty() && self.kind.is_empty()
    }

    pub fn is_cluster_scoped(&self) -> bool {
        CLUSTER_SCOPED_KINDS.contains(&self.kind.as_str())
    }

    /// Validates the non-empty components of a selector.
    pub fn validate_selector(&self) -> Result<(), GvkError> {
        if !self.group.is_empty() {
            ensure!(
                self.group.len() <= MAX_GROUP_LENGTH,
                GroupTooLongSnafu { group: &self.group }
            );
            ensure!(
                API_GROUP_REGEX.is_match(&self.group),
                InvalidGroupSnafu { group: &self.group }
            );
        }

        if !self.version.is_empty() {
            ensure!(
                self.version.len() <= MAX_VERSION_LENGTH
                    && API_VERSION_REGEX.is_match(&self.version),
                InvalidVersionSnafu {
                    version: &self.version
                }
            );
        }

        if !self.kind.is_empty() {
            ensure!(
                KIND_REGEX.is_match(&self.kind),
                InvalidKindSnafu { kind: &self.kind }
            );
        }

        Ok(())
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
    }
}

/// Identity of a single resource: its [`Gvk`], name and optional namespace.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceId {
    pub gvk: Gvk,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceId {
    pub fn new(gvk: Gvk, name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            gvk,
            name: name.into(),
            namespace,
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.gvk.is_cluster_scoped()
    }

    /// The namespace used for scoping decisions. An absent or empty
    /// namespace is treated as [`DEFAULT_NAMESPACE`].
    pub fn effective_namespace(&self) -> &str {
        match self.namespace.as_deref() {
            None | Some("") => DEFAULT_NAMESPACE,
            Some(namespace) => namespace,
        }
    }

    /// Returns `true` if both ids live in the same namespace. Two
    /// cluster-scoped ids are always considered equal.
    pub fn is_ns_equal(&self, other: &Self) -> bool {
        if self.is_cluster_scoped() && other.is_cluster_scoped() {
            return true;
        }
        self.effective_namespace() == other.effective_namespace()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace.as_deref() {
            Some(namespace) if !namespace.is_empty() => {
                write!(f, "{}/{}/{}", namespace, self.gvk.kind, self.name)
            }
            _ => write!(f, "{}/{}", self.gvk.kind, self.name),
        }
    }
}
