//! `search-replace`: finds fields by value and/or path and optionally
//! replaces their value or attaches a line comment.
use std::sync::LazyLock;

use krm_fieldspec::{
    CapturePattern, FieldPath, MutationResult, PathPattern, Report, Resource, ResultItem, Step,
    matcher,
    node::{infer_scalar, scalar_text},
};
use regex::{Captures, Regex};
use serde_yaml::Value;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, warn};

use crate::{
    config::{
        ConfigError, ConflictingMatchersSnafu, FunctionConfig, InvalidGlobSnafu,
        InvalidMatcherSnafu, InvalidPathSnafu, InvalidPatternSnafu, MissingMatchersSnafu,
    },
    driver::{Configured, KrmFunction},
};

pub const BY_VALUE: &str = "by-value";
pub const BY_VALUE_REGEX: &str = "by-value-regex";
pub const BY_PATH: &str = "by-path";
pub const BY_FILE_PATH: &str = "by-file-path";
pub const PUT_VALUE: &str = "put-value";
pub const PUT_COMMENT: &str = "put-comment";

const MATCHERS: &[&str] = &[
    BY_VALUE,
    BY_FILE_PATH,
    BY_VALUE_REGEX,
    BY_PATH,
    PUT_VALUE,
    PUT_COMMENT,
];
const VALUE_MATCHERS: &[&str] = &[BY_VALUE, BY_VALUE_REGEX];
const SEARCH_MATCHERS: &[&str] = &[BY_VALUE, BY_VALUE_REGEX, BY_PATH];

static GROUP_PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([0-9]+)\}").expect("failed to compile capture group placeholder regex")
});

#[derive(Debug, Snafu)]
pub enum SearchError {
    #[snafu(display("unable to resolve capture groups"))]
    UnresolvedCaptureGroups,
}

#[derive(Debug)]
pub struct SearchReplace {
    by_value: Option<String>,
    by_value_regex: Option<CapturePattern>,
    by_path: Option<PathPattern>,
    by_file_path: Option<glob::Pattern>,
    put_value: Option<String>,
    put_comment: Option<String>,
}

/// Something found while walking a resource.
enum Found {
    Scalar {
        path: FieldPath,
        current: String,
        new_value: Option<String>,
        comment: Option<String>,
    },

    /// A key holding a sequence, which gets the comment itself.
    SequenceKey { path: FieldPath, rendered: String },

    /// A matching field which is left alone because its replacement could
    /// not be resolved.
    Unresolved { path: FieldPath, error: SearchError },
}

impl KrmFunction for SearchReplace {
    const NAME: &'static str = "search-replace";

    fn configure(config: &FunctionConfig) -> Result<Configured<Self>, ConfigError> {
        let data = config.data()?;
        for key in data.keys() {
            ensure!(
                MATCHERS.contains(&key.as_str()),
                InvalidMatcherSnafu {
                    key,
                    allowed: MATCHERS
                }
            );
        }

        let get = |key: &str| config.optional(key).map(ToOwned::to_owned);
        let by_value = get(BY_VALUE);
        let by_value_regex = get(BY_VALUE_REGEX);
        let by_path = get(BY_PATH);

        ensure!(
            by_value.is_none() || by_value_regex.is_none(),
            ConflictingMatchersSnafu {
                exclusive: VALUE_MATCHERS
            }
        );
        ensure!(
            by_value.is_some() || by_value_regex.is_some() || by_path.is_some(),
            MissingMatchersSnafu {
                required: SEARCH_MATCHERS
            }
        );

        Ok(Configured::Ready(Self {
            by_value,
            by_value_regex: by_value_regex
                .map(|pattern| CapturePattern::new(&pattern))
                .transpose()
                .context(InvalidPatternSnafu)?,
            by_path: by_path
                .map(|path| {
                    PathPattern::parse_dotted(&path).context(InvalidPathSnafu { path: &path })
                })
                .transpose()?,
            by_file_path: get(BY_FILE_PATH)
                .map(|pattern| {
                    glob::Pattern::new(&pattern).context(InvalidGlobSnafu { pattern: &pattern })
                })
                .transpose()?,
            put_value: get(PUT_VALUE),
            put_comment: get(PUT_COMMENT),
        }))
    }

    fn apply(&self, resources: &mut [Resource]) -> Report {
        let mut report = Report::new();
        for resource in resources.iter_mut() {
            self.perform(resource, &mut report);
        }

        if report.items.is_empty() {
            report.push(ResultItem::info("no matches"));
        }
        report
    }
}

impl SearchReplace {
    fn mutates(&self) -> bool {
        self.put_value.is_some() || self.put_comment.is_some()
    }

    fn perform(&self, resource: &mut Resource, report: &mut Report) {
        let file_path = resource.file_path().map(ToOwned::to_owned);
        if let Some(pattern) = &self.by_file_path {
            let options = glob::MatchOptions {
                require_literal_separator: true,
                ..glob::MatchOptions::new()
            };
            if !file_path
                .as_deref()
                .is_some_and(|path| pattern.matches_with(path, options))
            {
                return;
            }
        }

        if let Some(put_value) = self.put_value_by_path() {
            self.put_value_by_path_into(resource, put_value, file_path.as_deref(), report);
            return;
        }

        let mut found = Vec::new();
        self.visit(resource.root(), resource.root(), FieldPath::new(), &mut found);

        let id = resource.id();
        for found in found {
            match found {
                Found::Scalar {
                    path,
                    current,
                    new_value,
                    comment,
                } => {
                    if let Some(comment) = comment {
                        resource.set_comment(path.clone(), comment);
                    }

                    let shown = new_value.clone().unwrap_or_else(|| current.clone());
                    if let Some(new_value) = new_value {
                        if let Some(node) = resource.get_mut(&path) {
                            *node = infer_scalar(&new_value);
                        }
                        if new_value != current {
                            debug!(
                                resource = %id,
                                field = %path,
                                old = %current,
                                new = %new_value,
                                "mutated field"
                            );
                            report.mutations.push(MutationResult {
                                resource: id.clone(),
                                file_path: file_path.clone(),
                                field_path: path.clone(),
                                old_value: current,
                                new_value,
                            });
                        }
                    }

                    report.push(self.result(&shown, path.to_string(), file_path.as_deref()));
                }
                Found::SequenceKey { path, rendered } => {
                    let comment = self.put_comment.clone().unwrap_or_default();
                    resource.set_comment(path, comment.clone());
                    let field = format!(
                        "{} # {comment}",
                        self.by_path.as_ref().map_or("", PathPattern::as_str)
                    );
                    report.push(self.result(&rendered, field, file_path.as_deref()));
                }
                Found::Unresolved { path, error } => {
                    warn!(
                        error = &error as &dyn std::error::Error,
                        resource = %id,
                        field = %path,
                        "skipping field"
                    );
                    report.push(
                        ResultItem::error(format!(
                            "failed to perform search-replace operation: {error}"
                        ))
                        .with_resource(&id)
                        .with_field(&path)
                        .with_file(file_path.as_deref()),
                    );
                }
            }
        }
    }

    /// `put-value` can be written straight to `by-path` when the path names a
    /// single, possibly missing, field and no value has to match.
    fn put_value_by_path(&self) -> Option<&str> {
        let literal = self.by_path.as_ref().is_some_and(PathPattern::is_literal);
        if literal && self.by_value.is_none() && self.by_value_regex.is_none() {
            self.put_value.as_deref()
        } else {
            None
        }
    }

    fn put_value_by_path_into(
        &self,
        resource: &mut Resource,
        put_value: &str,
        file_path: Option<&str>,
        report: &mut Report,
    ) {
        let Some(by_path) = &self.by_path else {
            return;
        };

        let id = resource.id();
        for path in matcher::resolve(resource.root_mut(), by_path.segments(), true) {
            let Some(node) = resource.get_mut(&path) else {
                continue;
            };
            let current = scalar_text(node).unwrap_or_default();
            *node = infer_scalar(put_value);

            if current != put_value {
                report.mutations.push(MutationResult {
                    resource: id.clone(),
                    file_path: file_path.map(ToOwned::to_owned),
                    field_path: path,
                    old_value: current,
                    new_value: put_value.to_owned(),
                });
            }
            report.push(self.result(put_value, by_path.as_str().to_owned(), file_path));
        }
    }

    fn visit(&self, root: &Value, node: &Value, path: FieldPath, found: &mut Vec<Found>) {
        match node {
            Value::Mapping(mapping) => {
                for (key, value) in mapping {
                    let Some(key) = key.as_str() else {
                        continue;
                    };
                    let child = path.join(Step::Key(key.trim().to_owned()));

                    if let Value::Sequence(sequence) = value {
                        if self.put_comment.is_some()
                            && !sequence.is_empty()
                            && self.path_matches(root, &child)
                        {
                            found.push(Found::SequenceKey {
                                path: child.clone(),
                                rendered: flow(sequence),
                            });
                        }
                    }
                    self.visit(root, value, child, found);
                }
            }
            Value::Sequence(sequence) => {
                for (index, element) in sequence.iter().enumerate() {
                    self.visit(root, element, path.join(Step::Index(index)), found);
                }
            }
            Value::Tagged(tagged) => self.visit(root, &tagged.value, path, found),
            scalar => {
                let current = scalar_text(scalar).unwrap_or_default();
                if !self.criteria_match(root, &path, &current) {
                    return;
                }

                let resolve = |template: Option<&str>| {
                    template
                        .map(|template| self.resolve_groups(&current, template))
                        .transpose()
                };
                match (resolve(self.put_comment.as_deref()), resolve(self.put_value.as_deref())) {
                    (Ok(comment), Ok(new_value)) => found.push(Found::Scalar {
                        path,
                        current,
                        new_value,
                        comment,
                    }),
                    (Err(error), _) | (_, Err(error)) => {
                        found.push(Found::Unresolved { path, error });
                    }
                }
            }
        }
    }

    fn path_matches(&self, root: &Value, path: &FieldPath) -> bool {
        self.by_path
            .as_ref()
            .is_some_and(|pattern| pattern.matches(root, path))
    }

    fn criteria_match(&self, root: &Value, path: &FieldPath, value: &str) -> bool {
        let path_match = self.path_matches(root, path);
        let value_match = self.by_value.as_deref().is_some_and(|by_value| by_value == value)
            || self
                .by_value_regex
                .as_ref()
                .is_some_and(|regex| regex.resolve(value).is_some());
        let by_value_given = self.by_value.is_some() || self.by_value_regex.is_some();

        (value_match && path_match)
            || (value_match && self.by_path.is_none())
            || (path_match && !by_value_given)
    }

    /// Replaces `${N}` in `pattern` by the groups `by-value-regex` captured
    /// from `value`.
    fn resolve_groups(&self, value: &str, pattern: &str) -> Result<String, SearchError> {
        let Some(groups) = self
            .by_value_regex
            .as_ref()
            .and_then(|regex| regex.resolve(value))
        else {
            return Ok(pattern.to_owned());
        };

        let resolved = GROUP_PLACEHOLDER_REGEX.replace_all(pattern, |captures: &Captures<'_>| {
            groups
                .get(&captures[1])
                .map_or_else(|| captures[0].to_owned(), ToOwned::to_owned)
        });
        ensure!(
            !GROUP_PLACEHOLDER_REGEX.is_match(&resolved),
            UnresolvedCaptureGroupsSnafu
        );
        Ok(resolved.into_owned())
    }

    fn result(&self, value: &str, field: String, file_path: Option<&str>) -> ResultItem {
        let message = if self.mutates() {
            format!("Mutated field value to {value:?}")
        } else {
            format!("Matched field value {value:?}")
        };
        ResultItem::info(message).with_field(field).with_file(file_path)
    }
}

/// Renders a sequence in flow style, e.g. `[dev, stage]`.
fn flow(sequence: &[Value]) -> String {
    let elements: Vec<String> = sequence
        .iter()
        .map(|element| scalar_text(element).unwrap_or_else(|| "...".to_owned()))
        .collect();
    format!("[{}]", elements.join(", "))
}
