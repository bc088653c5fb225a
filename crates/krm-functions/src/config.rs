//! The function configuration document.
//!
//! A function is configured either with a `ConfigMap` carrying flat
//! key/value pairs in `data`, or with a typed document whose kind names
//! the function. Which one is used is decided by the GVK of the document.
use std::collections::BTreeMap;

use krm_fieldspec::{FieldSpecError, Gvk, MergeError, PathError, PatternError, node};
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use snafu::{OptionExt, ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("functionConfig must be a mapping"))]
    NotAMapping,

    #[snafu(display("missing `data` field in `ConfigMap` FunctionConfig"))]
    MissingData,

    #[snafu(display("missing `.data.{key}` field in `ConfigMap` FunctionConfig"))]
    MissingKey { key: String },

    #[snafu(display("`.data.{key}` in `ConfigMap` FunctionConfig must be a scalar"))]
    NonScalarData { key: String },

    #[snafu(display("missing functionConfig, expected a `ConfigMap` or `{kind}`"))]
    MissingConfig { kind: String },

    #[snafu(display(
        "unsupported functionConfig kind {gvk}, expected a `ConfigMap` or `{expected}`"
    ))]
    UnsupportedKind { gvk: Gvk, expected: String },

    #[snafu(display("failed to parse `{kind}` FunctionConfig"))]
    ParseStructured {
        source: serde_yaml::Error,
        kind: String,
    },

    #[snafu(display("invalid fieldspec"))]
    InvalidFieldSpec { source: FieldSpecError },

    #[snafu(display("failed to merge fieldspecs"))]
    MergeFieldSpecs { source: MergeError },

    #[snafu(display("failed to parse the built-in {what}"))]
    ParseBuiltin {
        source: serde_yaml::Error,
        what: &'static str,
    },

    #[snafu(display("unknown region {region:?}"))]
    UnknownRegion { region: String },

    #[snafu(display("unknown zone {zone:?}"))]
    UnknownZone { zone: String },

    #[snafu(display(
        "fieldspec {spec} selects a reference and cannot set regexPattern or template"
    ))]
    UnsupportedSubstitution { spec: String },

    #[snafu(display("no annotations given"))]
    EmptyAnnotations,

    #[snafu(display(
        "`fieldSpecs` has been deprecated, please rename it to `additionalAnnotationFields`"
    ))]
    DeprecatedFieldSpecs,

    #[snafu(display("invalid matcher {key:?}, must be one of {allowed:?}"))]
    InvalidMatcher {
        key: String,
        allowed: &'static [&'static str],
    },

    #[snafu(display("only one of {exclusive:?} can be provided"))]
    ConflictingMatchers { exclusive: &'static [&'static str] },

    #[snafu(display("at least one of {required:?} must be provided"))]
    MissingMatchers { required: &'static [&'static str] },

    #[snafu(display("invalid by-path {path:?}"))]
    InvalidPath { source: PathError, path: String },

    #[snafu(display("invalid by-value-regex"))]
    InvalidPattern { source: PatternError },

    #[snafu(display("invalid by-file-path {pattern:?}"))]
    InvalidGlob {
        source: glob::PatternError,
        pattern: String,
    },
}

/// The resolved function configuration.
#[derive(Clone, Debug, PartialEq)]
pub enum FunctionConfig {
    /// A `ConfigMap`, `data` is `None` when the map is missing.
    Flat { data: Option<BTreeMap<String, String>> },

    /// Any other kind, deserialized on demand by the function.
    Structured { gvk: Gvk, document: Value },

    Absent,
}

impl FunctionConfig {
    /// Resolves the variant from the GVK of `document`.
    pub fn from_value(document: Option<&Value>) -> Result<Self, ConfigError> {
        let document = match document {
            None | Some(Value::Null) => return Ok(Self::Absent),
            Some(document @ Value::Mapping(_)) => document,
            Some(_) => return NotAMappingSnafu.fail(),
        };

        let gvk = Gvk::from_api_version(
            node::string_field(document, "apiVersion").unwrap_or_default(),
            node::string_field(document, "kind").unwrap_or_default(),
        );

        let is_config_map = gvk.kind == "ConfigMap" && gvk.group.is_empty();
        let is_untyped = gvk.kind.is_empty() && document.get("data").is_some();
        if !is_config_map && !is_untyped {
            return Ok(Self::Structured {
                gvk,
                document: document.clone(),
            });
        }

        let data = match document.get("data") {
            None | Some(Value::Null) => None,
            Some(Value::Mapping(data)) => {
                let mut flat = BTreeMap::new();
                for (key, value) in data {
                    let key = node::scalar_text(key).unwrap_or_default();
                    let value = node::scalar_text(value).context(NonScalarDataSnafu { key: &key })?;
                    flat.insert(key, value);
                }
                Some(flat)
            }
            Some(_) => return MissingDataSnafu.fail(),
        };

        Ok(Self::Flat { data })
    }

    /// The `data` map of a `ConfigMap`.
    pub fn data(&self) -> Result<&BTreeMap<String, String>, ConfigError> {
        match self {
            Self::Flat { data: Some(data) } => Ok(data),
            _ => MissingDataSnafu.fail(),
        }
    }

    /// A value from `data` which must be present and non-empty.
    pub fn required(&self, key: &str) -> Result<&str, ConfigError> {
        self.data()?
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
            .context(MissingKeySnafu { key })
    }

    pub fn optional(&self, key: &str) -> Option<&str> {
        match self {
            Self::Flat { data: Some(data) } => data
                .get(key)
                .map(String::as_str)
                .filter(|value| !value.is_empty()),
            _ => None,
        }
    }

    /// Deserializes a structured config of the given `kind`.
    ///
    /// Returns `None` for `ConfigMap`s, so callers can fall back to the flat
    /// keys.
    pub fn structured<T: DeserializeOwned>(&self, kind: &str) -> Result<Option<T>, ConfigError> {
        match self {
            Self::Flat { .. } => Ok(None),
            Self::Absent => MissingConfigSnafu { kind }.fail(),
            Self::Structured { gvk, .. } if gvk.kind != kind => UnsupportedKindSnafu {
                gvk: gvk.clone(),
                expected: kind,
            }
            .fail(),
            Self::Structured { document, .. } => serde_yaml::from_value(document.clone())
                .map(Some)
                .context(ParseStructuredSnafu { kind }),
        }
    }
}
