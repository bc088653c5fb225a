//! Field specs select a path inside every resource of matching GVK.
//!
//! They are written in configuration like this:
//!
//! ```yaml
//! - path: spec/member
//!   group: iam.cnrm.cloud.google.com
//!   version: v1beta1
//!   kind: IAMPolicyMember
//!   regexPattern: (?P<prefix>group:\S+@)(?P<domain>\S+)
//! ```
use std::{fmt, ops::Deref};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

use crate::{
    gvk::{Gvk, GvkError},
    path::{PathError, PathPattern},
};

#[derive(Debug, PartialEq, Snafu)]
pub enum FieldSpecError {
    #[snafu(display("invalid GVK selector for path {path:?}"))]
    InvalidSelector { source: GvkError, path: String },

    #[snafu(display("invalid field spec path"))]
    InvalidPath { source: PathError },

    #[snafu(display(
        "field spec for path {path:?} sets both apiVersion and group/version"
    ))]
    AmbiguousApiVersion { path: String },
}

#[derive(Debug, PartialEq, Snafu)]
#[snafu(display(
    "conflicting fieldspecs: {gvk} with path {path:?} is declared twice with different settings"
))]
pub struct MergeError {
    gvk: Gvk,
    path: String,
}

/// A validated field spec.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "RawFieldSpec", into = "RawFieldSpec")]
pub struct FieldSpec {
    pub gvk: Gvk,
    pub path: PathPattern,

    /// Create the path if it does not exist yet.
    pub create: bool,

    /// Optional regex which has to match the current value. Its `prefix`
    /// and `suffix` groups are kept when the value is replaced.
    pub regex_pattern: String,

    /// Optional replacement template, see [`crate::substitute::Template`].
    pub template: Option<String>,
}

impl FieldSpec {
    pub fn new(gvk: Gvk, path: &str) -> Result<Self, FieldSpecError> {
        gvk.validate_selector()
            .context(InvalidSelectorSnafu { path })?;

        Ok(Self {
            gvk,
            path: PathPattern::parse_slashed(path).context(InvalidPathSnafu)?,
            create: false,
            regex_pattern: String::new(),
            template: None,
        })
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_regex_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.regex_pattern = pattern.into();
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Two field specs collide if they select the same GVK and path.
    pub fn is_same_location(&self, other: &Self) -> bool {
        self.gvk == other.gvk && self.path == other.path
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} path={}", self.gvk, self.path)
    }
}

/// The on-disk representation of a [`FieldSpec`].
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct RawFieldSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    group: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    kind: String,

    #[serde(default, skip_serializing)]
    api_version: Option<String>,

    path: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    create: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    regex_pattern: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    template: Option<String>,
}

impl TryFrom<RawFieldSpec> for FieldSpec {
    type Error = FieldSpecError;

    fn try_from(raw: RawFieldSpec) -> Result<Self, Self::Error> {
        let gvk = match raw.api_version {
            Some(api_version) => {
                ensure!(
                    raw.group.is_empty() && raw.version.is_empty(),
                    AmbiguousApiVersionSnafu { path: raw.path }
                );
                Gvk::from_api_version(&api_version, &raw.kind)
            }
            None => Gvk::new(raw.group, raw.version, raw.kind),
        };

        let mut spec = Self::new(gvk, &raw.path)?
            .with_create(raw.create)
            .with_regex_pattern(raw.regex_pattern);
        spec.template = raw.template;
        Ok(spec)
    }
}

impl From<FieldSpec> for RawFieldSpec {
    fn from(spec: FieldSpec) -> Self {
        Self {
            group: spec.gvk.group,
            version: spec.gvk.version,
            kind: spec.gvk.kind,
            api_version: None,
            path: spec.path.as_str().to_owned(),
            create: spec.create,
            regex_pattern: spec.regex_pattern,
            template: spec.template,
        }
    }
}

/// An ordered list of [`FieldSpec`]s without duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "Vec<FieldSpec>", into = "Vec<FieldSpec>")]
pub struct FieldSpecs(Vec<FieldSpec>);

impl FieldSpecs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `spec` unless an equivalent one is already present.
    ///
    /// A spec for the same GVK and path which differs in `create`,
    /// `regexPattern` or `template` cannot be reconciled and is rejected.
    pub fn merge_one(&mut self, spec: FieldSpec) -> Result<(), MergeError> {
        if let Some(existing) = self.0.iter().find(|existing| existing.is_same_location(&spec)) {
            ensure!(
                *existing == spec,
                MergeSnafu {
                    gvk: spec.gvk,
                    path: spec.path.as_str(),
                }
            );
            return Ok(());
        }

        self.0.push(spec);
        Ok(())
    }

    pub fn merge_all(
        &mut self,
        specs: impl IntoIterator<Item = FieldSpec>,
    ) -> Result<(), MergeError> {
        specs.into_iter().try_for_each(|spec| self.merge_one(spec))
    }

    /// Returns a copy of `self` with every spec of `overrides` applied on top.
    ///
    /// An override for a GVK and path which is already present replaces the
    /// existing spec in place, any other override is appended.
    pub fn overridden_by(&self, overrides: &Self) -> Self {
        let mut specs = self.clone();
        for spec in overrides {
            match specs.0.iter_mut().find(|existing| existing.is_same_location(spec)) {
                Some(existing) => existing.clone_from(spec),
                None => specs.0.push(spec.clone()),
            }
        }
        specs
    }
}

impl Deref for FieldSpecs {
    type Target = [FieldSpec];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl IntoIterator for FieldSpecs {
    type IntoIter = std::vec::IntoIter<FieldSpec>;
    type Item = FieldSpec;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FieldSpecs {
    type IntoIter = std::slice::Iter<'a, FieldSpec>;
    type Item = &'a FieldSpec;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<FieldSpecs> for Vec<FieldSpec> {
    fn from(specs: FieldSpecs) -> Self {
        specs.0
    }
}

impl TryFrom<Vec<FieldSpec>> for FieldSpecs {
    type Error = MergeError;

    fn try_from(specs: Vec<FieldSpec>) -> Result<Self, Self::Error> {
        let mut merged = Self::new();
        merged.merge_all(specs)?;
        Ok(merged)
    }
}
