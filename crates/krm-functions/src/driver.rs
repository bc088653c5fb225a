//! Runs a function over a [`ResourceList`].
//!
//! A run moves through `Unconfigured`, `Configured`, `Applied` and
//! `Reported`. A configuration failure ends the run before any resource is
//! touched. Once the function has been applied the run always reports,
//! field level failures only show up as error results.
use krm_fieldspec::{Report, Resource, ResultItem};
use strum::Display;
use tracing::{info, info_span, warn};

use crate::{
    config::{ConfigError, FunctionConfig},
    resource_list::ResourceList,
};

/// Outcome of configuring a function.
#[derive(Debug)]
pub enum Configured<F> {
    Ready(F),

    /// The configuration deliberately asks for nothing to be done.
    NoOp { reason: String },
}

/// A KRM function.
pub trait KrmFunction: Sized {
    /// The name used on the command line and in results.
    const NAME: &'static str;

    /// Whether resources annotated as local config are passed to
    /// [`KrmFunction::apply`].
    const INCLUDE_LOCAL_CONFIG: bool = true;

    fn configure(config: &FunctionConfig) -> Result<Configured<Self>, ConfigError>;

    fn apply(&self, resources: &mut [Resource]) -> Report;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Unconfigured,
    Configured,
    Applied,
    Reported,
}

/// Runs `F` over `list` and appends the results to it.
///
/// Returns the phase the run ended in, [`Phase::Unconfigured`] if the
/// configuration was rejected.
pub fn run<F: KrmFunction>(list: &mut ResourceList) -> Phase {
    let _span = info_span!("run", function = F::NAME).entered();

    let function = match configure::<F>(list.function_config.as_ref()) {
        Ok(Configured::Ready(function)) => function,
        Ok(Configured::NoOp { reason }) => {
            info!(%reason, "nothing to do");
            list.results.push(ResultItem::info(reason));
            return Phase::Reported;
        }
        Err(err) => {
            warn!(error = &err as &dyn std::error::Error, "invalid function config");
            list.results.push(ResultItem::from_error(&err));
            return Phase::Unconfigured;
        }
    };
    info!(phase = %Phase::Configured, "configured function");

    let report = apply_filtered(&function, &mut list.items);
    info!(
        phase = %Phase::Applied,
        mutations = report.mutations.len(),
        errors = report.error_count(),
        "applied function"
    );

    list.results.extend(report.items);
    list.results.push(summary::<F>(report.mutations.len()));
    info!(phase = %Phase::Reported, "reported results");
    Phase::Reported
}

fn configure<F: KrmFunction>(
    document: Option<&serde_yaml::Value>,
) -> Result<Configured<F>, ConfigError> {
    let config = FunctionConfig::from_value(document)?;
    F::configure(&config)
}

/// Applies `function` to every resource it accepts, keeping the order of
/// the list intact.
fn apply_filtered<F: KrmFunction>(function: &F, items: &mut Vec<Resource>) -> Report {
    if F::INCLUDE_LOCAL_CONFIG {
        return function.apply(items);
    }

    let local: Vec<bool> = items.iter().map(Resource::is_local_config).collect();
    let (mut excluded, mut included): (Vec<_>, Vec<_>) = std::mem::take(items)
        .into_iter()
        .partition(Resource::is_local_config);

    let report = function.apply(&mut included);

    let mut included = included.into_iter();
    let mut excluded = excluded.drain(..);
    items.extend(local.into_iter().filter_map(|is_local| {
        if is_local {
            excluded.next()
        } else {
            included.next()
        }
    }));

    report
}

fn summary<F: KrmFunction>(mutations: usize) -> ResultItem {
    match mutations {
        0 => ResultItem::info(format!("{}: no fields changed", F::NAME)),
        1 => ResultItem::info(format!("{}: changed 1 field", F::NAME)),
        n => ResultItem::info(format!("{}: changed {n} fields", F::NAME)),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use krm_fieldspec::{FieldPath, MutationResult, Severity};
    use serde_yaml::Value;

    use super::*;

    /// Uppercases every resource name, refuses to run without `data`.
    struct Shout {
        suffix: String,
    }

    impl KrmFunction for Shout {
        const INCLUDE_LOCAL_CONFIG: bool = false;
        const NAME: &'static str = "shout";

        fn configure(config: &FunctionConfig) -> Result<Configured<Self>, ConfigError> {
            match config.optional("skip") {
                Some(_) => Ok(Configured::NoOp {
                    reason: "told to skip".to_owned(),
                }),
                None => Ok(Configured::Ready(Self {
                    suffix: config.required("suffix")?.to_owned(),
                })),
            }
        }

        fn apply(&self, resources: &mut [Resource]) -> Report {
            let mut report = Report::new();
            for resource in resources {
                let old_value = resource.name().to_owned();
                let new_value = format!("{}{}", old_value.to_uppercase(), self.suffix);
                resource.set_name(&new_value);
                report.record(MutationResult {
                    resource: resource.id(),
                    file_path: None,
                    field_path: ["metadata", "name"].into_iter().collect::<FieldPath>(),
                    old_value,
                    new_value,
                });
            }
            report
        }
    }

    fn list(config: &str) -> ResourceList {
        let mut list = ResourceList::parse(indoc! {r#"
            apiVersion: config.kubernetes.io/v1
            kind: ResourceList
            items:
            - apiVersion: v1
              kind: Service
              metadata:
                name: a
            - apiVersion: v1
              kind: ConfigMap
              metadata:
                name: local
                annotations:
                  config.kubernetes.io/local-config: "true"
            - apiVersion: v1
              kind: Service
              metadata:
                name: b
        "#})
        .expect("ResourceList is valid");
        list.function_config =
            serde_yaml::from_str::<Option<Value>>(config).expect("config is valid YAML");
        list
    }

    fn names(list: &ResourceList) -> Vec<&str> {
        list.items.iter().map(Resource::name).collect()
    }

    #[test]
    fn applies_and_reports() {
        let mut list = list("kind: ConfigMap\napiVersion: v1\ndata:\n  suffix: '!'\n");

        assert_eq!(run::<Shout>(&mut list), Phase::Reported);
        assert_eq!(names(&list), ["A!", "local", "B!"]);

        let messages: Vec<_> = list.results.iter().map(|result| result.message.as_str()).collect();
        assert_eq!(messages, [
            r#"changed "a" to "A!""#,
            r#"changed "b" to "B!""#,
            "shout: changed 2 fields"
        ]);
    }

    #[test]
    fn config_errors_abort() {
        let mut list = list("kind: ConfigMap\napiVersion: v1\ndata: {}\n");

        assert_eq!(run::<Shout>(&mut list), Phase::Unconfigured);
        assert_eq!(names(&list), ["a", "local", "b"]);
        assert_eq!(list.results.len(), 1);
        assert_eq!(list.results[0].severity, Severity::Error);
        assert_eq!(
            list.results[0].message,
            "missing `.data.suffix` field in `ConfigMap` FunctionConfig"
        );
    }

    #[test]
    fn no_op() {
        let mut list = list("kind: ConfigMap\napiVersion: v1\ndata:\n  skip: 'yes'\n");

        assert_eq!(run::<Shout>(&mut list), Phase::Reported);
        assert_eq!(names(&list), ["a", "local", "b"]);
        assert_eq!(list.results, [ResultItem::info("told to skip")]);
    }
}
