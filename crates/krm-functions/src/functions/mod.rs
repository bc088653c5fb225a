//! The function catalog.
use krm_fieldspec::{FieldSpec, FieldSpecs, Gvk};
use serde::Deserialize;
use snafu::ResultExt;
use strum::{Display, EnumIter, EnumString};

use crate::{
    config::{ConfigError, InvalidFieldSpecSnafu, MergeFieldSpecsSnafu, ParseBuiltinSnafu},
    driver::{self, Phase},
    resource_list::ResourceList,
};

pub mod search_replace;
pub mod set_annotations;
pub mod set_default_name;
pub mod set_domain;
pub mod set_location;
pub mod set_org_id;
pub mod set_project_id;

/// Every function in the catalog, named as on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum FunctionKind {
    SetDomain,
    SetLocation,
    SetOrgId,
    SetProjectId,
    SetDefaultName,
    SetAnnotations,
    SearchReplace,
}

impl FunctionKind {
    pub fn run(self, list: &mut ResourceList) -> Phase {
        match self {
            Self::SetDomain => driver::run::<set_domain::SetDomain>(list),
            Self::SetLocation => driver::run::<set_location::SetLocation>(list),
            Self::SetOrgId => driver::run::<set_org_id::SetOrgId>(list),
            Self::SetProjectId => driver::run::<set_project_id::SetProjectId>(list),
            Self::SetDefaultName => driver::run::<set_default_name::SetDefaultName>(list),
            Self::SetAnnotations => driver::run::<set_annotations::SetAnnotations>(list),
            Self::SearchReplace => driver::run::<search_replace::SearchReplace>(list),
        }
    }
}

/// Parses a YAML constant of built-in field specs.
fn builtin<T: for<'de> Deserialize<'de>>(yaml: &str, what: &'static str) -> Result<T, ConfigError> {
    serde_yaml::from_str(yaml).context(ParseBuiltinSnafu { what })
}

/// Built-in field specs with user provided ones on top. A user spec for a
/// built-in GVK and path replaces the built-in one.
fn with_overrides(builtin: FieldSpecs, overrides: Option<FieldSpecs>) -> FieldSpecs {
    match overrides {
        Some(overrides) => builtin.overridden_by(&overrides),
        None => builtin,
    }
}

/// Field specs for a single key of every annotation map selected by
/// `annotation_maps`.
fn annotation_field_specs(
    annotation_maps: &[(Gvk, &str)],
    key: &str,
    create: bool,
) -> Result<FieldSpecs, ConfigError> {
    let key = escape_key(key);
    let mut specs = FieldSpecs::new();
    for (gvk, path) in annotation_maps {
        let spec = FieldSpec::new(gvk.clone(), &format!("{path}/{key}"))
            .context(InvalidFieldSpecSnafu)?
            .with_create(create);
        specs.merge_one(spec).context(MergeFieldSpecsSnafu)?;
    }
    Ok(specs)
}

/// Escapes the path delimiter inside an annotation key, e.g.
/// `cnrm.cloud.google.com/project-id`.
fn escape_key(key: &str) -> String {
    key.replace('/', "\\/")
}

/// The annotation maps of workload pod templates, in addition to
/// `metadata/annotations` of every resource.
fn workload_annotation_maps() -> Vec<(Gvk, &'static str)> {
    const TEMPLATE: &str = "spec/template/metadata/annotations";

    vec![
        (Gvk::default(), "metadata/annotations"),
        (Gvk::new("", "v1", "ReplicationController"), TEMPLATE),
        (Gvk::new("", "", "Deployment"), TEMPLATE),
        (Gvk::new("", "", "ReplicaSet"), TEMPLATE),
        (Gvk::new("", "", "DaemonSet"), TEMPLATE),
        (Gvk::new("apps", "", "StatefulSet"), TEMPLATE),
        (Gvk::new("batch", "", "Job"), TEMPLATE),
        (Gvk::new("batch", "", "CronJob"), "spec/jobTemplate/metadata/annotations"),
        (
            Gvk::new("batch", "", "CronJob"),
            "spec/jobTemplate/spec/template/metadata/annotations",
        ),
    ]
}
