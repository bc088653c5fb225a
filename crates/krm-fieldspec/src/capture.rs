//! Extracts capture groups from field values.
use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use snafu::{ResultExt, Snafu};

/// Upper bound for the compiled size of user supplied patterns.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Name of the group kept in front of the replaced value.
pub const PREFIX_GROUP: &str = "prefix";

/// Name of the group kept after the replaced value.
pub const SUFFIX_GROUP: &str = "suffix";

#[derive(Debug, Snafu)]
pub enum PatternError {
    #[snafu(display("invalid regex pattern {pattern:?}"))]
    InvalidPattern {
        source: regex::Error,
        pattern: String,
    },
}

/// A compiled, possibly empty, regex pattern.
///
/// An empty pattern matches every value without producing any groups, which
/// means the whole value gets replaced.
#[derive(Clone, Debug)]
pub struct CapturePattern {
    regex: Option<Regex>,
}

impl CapturePattern {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Ok(Self { regex: None });
        }

        let regex = RegexBuilder::new(pattern)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()
            .context(InvalidPatternSnafu { pattern })?;
        Ok(Self { regex: Some(regex) })
    }

    pub fn is_empty(&self) -> bool {
        self.regex.is_none()
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_ref().map_or("", Regex::as_str)
    }

    /// Applies the pattern to `value`.
    ///
    /// Returns [`None`] if the pattern does not match, which is not an
    /// error. The field is simply left alone.
    pub fn resolve(&self, value: &str) -> Option<CaptureGroups> {
        let Some(regex) = &self.regex else {
            return Some(CaptureGroups::default());
        };

        let captures = regex.captures(value)?;
        let mut groups = CaptureGroups::default();
        for (index, name) in regex.capture_names().enumerate().skip(1) {
            let text = captures
                .get(index)
                .map_or_else(String::new, |m| m.as_str().to_owned());
            if let Some(name) = name {
                groups.insert(name, text.clone());
            }
            groups.insert(index.to_string(), text);
        }

        Some(groups)
    }
}

/// Values captured by a [`CapturePattern`].
///
/// Every group is available under its 1-based index, named groups are
/// additionally available under their name. Groups which did not take
/// part in the match resolve to an empty string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureGroups(BTreeMap<String, String>);

impl CaptureGroups {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn prefix(&self) -> &str {
        self.get(PREFIX_GROUP).unwrap_or_default()
    }

    pub fn suffix(&self) -> &str {
        self.get(SUFFIX_GROUP).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
