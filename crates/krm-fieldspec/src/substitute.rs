//! Computes and writes new field values.
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_yaml::Value;
use snafu::{Snafu, ensure};
use tracing::{debug, warn};

use crate::{
    capture::{CaptureGroups, CapturePattern, PatternError},
    fieldspec::{FieldSpec, FieldSpecs},
    matcher,
    node::scalar_text,
    resource::Resource,
    result::{MutationResult, Report, ResultItem, error_chain},
};

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("failed to compile placeholder regex")
});

#[derive(Debug, PartialEq, Snafu)]
pub enum SubstituteError {
    #[snafu(display("unable to resolve capture groups {missing:?} in {template:?}"))]
    UnresolvedCaptureGroups {
        template: String,
        missing: Vec<String>,
    },
}

/// A replacement string containing `${name}` or `${index}` placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template(String);

impl Template {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_placeholders(&self) -> bool {
        PLACEHOLDER_REGEX.is_match(&self.0)
    }

    /// Replaces every placeholder by its binding.
    ///
    /// Fails if any placeholder has no binding. Nothing is substituted in
    /// that case.
    pub fn render(&self, bindings: &CaptureGroups) -> Result<String, SubstituteError> {
        let mut missing = Vec::new();
        let rendered = PLACEHOLDER_REGEX.replace_all(&self.0, |captures: &Captures<'_>| {
            let name = &captures[1];
            match bindings.get(name) {
                Some(value) => value.to_owned(),
                None => {
                    missing.push(name.to_owned());
                    String::new()
                }
            }
        });

        ensure!(
            missing.is_empty(),
            UnresolvedCaptureGroupsSnafu {
                template: &self.0,
                missing,
            }
        );
        Ok(rendered.into_owned())
    }
}

/// Computes the new value of a field.
///
/// * With a template, the template is rendered against the capture groups
///   plus `core` bound to `binding`. The configured value wins over a
///   capture group of the same name.
/// * With a pattern but no template, the `prefix` and `suffix` groups are
///   kept around `core`.
/// * Otherwise the value is replaced by `core`.
pub fn compose(
    core: &str,
    binding: &str,
    groups: &CaptureGroups,
    template: Option<&Template>,
) -> Result<String, SubstituteError> {
    if let Some(template) = template {
        let mut bindings = groups.clone();
        if !binding.is_empty() {
            bindings.insert(binding, core);
        }
        return template.render(&bindings);
    }

    Ok(format!("{}{core}{}", groups.prefix(), groups.suffix()))
}

/// A [`FieldSpec`] with its pattern and template prepared.
#[derive(Clone, Debug)]
pub struct CompiledFieldSpec {
    pub spec: FieldSpec,
    pub pattern: CapturePattern,
    pub template: Option<Template>,
}

impl CompiledFieldSpec {
    pub fn compile(spec: FieldSpec) -> Result<Self, PatternError> {
        let pattern = CapturePattern::new(&spec.regex_pattern)?;
        let template = spec.template.clone().map(Template::new);
        Ok(Self {
            spec,
            pattern,
            template,
        })
    }
}

/// Writes one configured value into every field selected by a set of
/// field specs.
///
/// Field specs whose pattern does not compile are reported once and then
/// ignored, all others are still applied.
#[derive(Clone, Debug)]
pub struct FieldValueEngine {
    specs: Vec<CompiledFieldSpec>,
    binding: String,
    value: String,
    compile_errors: Vec<ResultItem>,
}

impl FieldValueEngine {
    /// `binding` is the template name under which `value` is available,
    /// e.g. `project` for `${project}`.
    pub fn new(specs: &FieldSpecs, binding: impl Into<String>, value: impl Into<String>) -> Self {
        let mut compiled = Vec::new();
        let mut compile_errors = Vec::new();
        for spec in specs {
            match CompiledFieldSpec::compile(spec.clone()) {
                Ok(spec) => compiled.push(spec),
                Err(err) => {
                    warn!(error = &err as &dyn std::error::Error, %spec, "skipping field spec");
                    compile_errors.push(
                        ResultItem::error(format!("{}: {}", spec, error_chain(&err)))
                            .with_field(spec.path.as_str()),
                    );
                }
            }
        }

        Self {
            specs: compiled,
            binding: binding.into(),
            value: value.into(),
            compile_errors,
        }
    }

    pub fn specs(&self) -> &[CompiledFieldSpec] {
        &self.specs
    }

    /// Applies every field spec to every resource, resources first.
    pub fn apply(&self, resources: &mut [Resource]) -> Report {
        apply_all(std::slice::from_ref(self), resources)
    }

    /// Applies every field spec to a single resource, in configured order.
    pub fn apply_to(&self, resource: &mut Resource, report: &mut Report) {
        for spec in &self.specs {
            self.apply_one(resource, spec, report);
        }
    }

    /// Field specs which were skipped because their pattern did not compile.
    pub fn compile_errors(&self) -> &[ResultItem] {
        &self.compile_errors
    }

    fn apply_one(&self, resource: &mut Resource, spec: &CompiledFieldSpec, report: &mut Report) {
        for path in matcher::locate(resource, &spec.spec) {
            let id = resource.id();
            let file_path = resource.file_path().map(ToOwned::to_owned);
            let Some(node) = resource.get_mut(&path) else {
                continue;
            };

            let Some(current) = scalar_text(node) else {
                warn!(resource = %id, field = %path, "field is not a scalar, skipping");
                report.push(
                    ResultItem::warning("field is not a scalar value, skipping")
                        .with_resource(&id)
                        .with_field(&path)
                        .with_file(file_path.as_deref()),
                );
                continue;
            };

            let Some(groups) = spec.pattern.resolve(&current) else {
                continue;
            };

            let composed = compose(&self.value, &self.binding, &groups, spec.template.as_ref());
            let new_value = match composed {
                Ok(new_value) => new_value,
                Err(err) => {
                    report.push(
                        ResultItem::from_error(&err)
                            .with_resource(&id)
                            .with_field(&path)
                            .with_file(file_path.as_deref()),
                    );
                    continue;
                }
            };

            let new_node = Value::String(new_value.clone());
            if *node == new_node {
                continue;
            }
            *node = new_node;

            debug!(
                resource = %id,
                field = %path,
                old = %current,
                new = %new_value,
                "mutated field"
            );
            report.record(MutationResult {
                resource: id,
                file_path,
                field_path: path,
                old_value: current,
                new_value,
            });
        }
    }
}

/// Runs several engines in a single pass over `resources`.
///
/// Results follow document order first, then the order of `engines` and of
/// their field specs.
pub fn apply_all(engines: &[FieldValueEngine], resources: &mut [Resource]) -> Report {
    let mut report = Report::new();
    for engine in engines {
        report.items.extend(engine.compile_errors().iter().cloned());
    }

    for resource in resources.iter_mut() {
        for engine in engines {
            engine.apply_to(resource, &mut report);
        }
    }

    report
}
