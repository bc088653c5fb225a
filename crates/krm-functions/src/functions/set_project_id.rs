//! `set-project-id`: points resources at a different GCP project.
//!
//! Besides the project references listed in [`PROJECT_FIELD_SPECS`], the
//! `cnrm.cloud.google.com/project-id` annotation is updated wherever a
//! resource already carries it. It is never added.
use indoc::indoc;
use krm_fieldspec::{FieldSpecs, FieldValueEngine, Report, Resource, apply_all};
use serde::Deserialize;
use snafu::ensure;

use super::{annotation_field_specs, builtin, with_overrides, workload_annotation_maps};
use crate::{
    config::{ConfigError, FunctionConfig, MissingKeySnafu},
    driver::{Configured, KrmFunction},
};

pub const PROJECT_ID_KEY: &str = "projectID";
pub const PROJECT_ANNOTATION: &str = "cnrm.cloud.google.com/project-id";

/// Name under which the project id is available in templates.
const BINDING: &str = "project";

pub const PROJECT_FIELD_SPECS: &str = indoc! {r"
    # Blueprint redis
    - path: spec/authorizedNetworkRef/external
      group: redis.cnrm.cloud.google.com
      version: v1beta1
      kind: RedisInstance
      regexPattern: (?P<prefix>projects/)(?P<projectID>\S+)(?P<suffix>/global/networks/default)

    # Blueprint iam-foundation
    - path: spec/resourceRef/external
      group: iam.cnrm.cloud.google.com
      version: v1beta1
      kind: IAMPolicyMember
      regexPattern: (?P<prefix>projects/)(?P<projectID>\S+)
"};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetProjectIdConfig {
    #[serde(rename = "projectID")]
    project_id: String,

    #[serde(default)]
    project_field_spec: Option<FieldSpecs>,
}

#[derive(Debug)]
pub struct SetProjectId {
    /// The annotation engine followed by the reference engine.
    engines: Vec<FieldValueEngine>,
}

impl KrmFunction for SetProjectId {
    const NAME: &'static str = "set-project-id";

    fn configure(config: &FunctionConfig) -> Result<Configured<Self>, ConfigError> {
        let (project_id, overrides) =
            match config.structured::<SetProjectIdConfig>("SetProjectId")? {
                Some(structured) => (structured.project_id, structured.project_field_spec),
                None => (config.required(PROJECT_ID_KEY)?.to_owned(), None),
            };
        ensure!(!project_id.is_empty(), MissingKeySnafu { key: PROJECT_ID_KEY });

        let annotations =
            annotation_field_specs(&workload_annotation_maps(), PROJECT_ANNOTATION, false)?;
        let references = with_overrides(
            builtin(PROJECT_FIELD_SPECS, "project field specs")?,
            overrides,
        );

        Ok(Configured::Ready(Self {
            engines: vec![
                FieldValueEngine::new(&annotations, BINDING, project_id.clone()),
                FieldValueEngine::new(&references, BINDING, project_id),
            ],
        }))
    }

    fn apply(&self, resources: &mut [Resource]) -> Report {
        apply_all(&self.engines, resources)
    }
}

#[cfg(test)]
mod tests {
    use krm_fieldspec::{FieldPath, Resource};

    use super::*;
    use crate::{driver, resource_list::ResourceList};

    const INPUT: &str = indoc! {r#"
        apiVersion: config.kubernetes.io/v1
        kind: ResourceList
        items:
        - apiVersion: redis.cnrm.cloud.google.com/v1beta1
          kind: RedisInstance
          metadata:
            name: redis
            annotations:
              cnrm.cloud.google.com/project-id: old-project
          spec:
            authorizedNetworkRef:
              external: projects/old-project/global/networks/default
        - apiVersion: iam.cnrm.cloud.google.com/v1beta1
          kind: IAMPolicyMember
          metadata:
            name: member
          spec:
            resourceRef:
              external: projects/old-project
        - apiVersion: apps/v1
          kind: Deployment
          metadata:
            name: app
          spec:
            template:
              metadata:
                annotations:
                  cnrm.cloud.google.com/project-id: old-project
        functionConfig:
          apiVersion: v1
          kind: ConfigMap
          data:
            projectID: new-project
    "#};

    fn get<'a>(resource: &'a Resource, path: &[&str]) -> Option<&'a str> {
        resource
            .get(&path.iter().copied().collect::<FieldPath>())
            .and_then(serde_yaml::Value::as_str)
    }

    #[test]
    fn updates_references_and_annotations() {
        let mut list = ResourceList::parse(INPUT).expect("ResourceList is valid");
        driver::run::<SetProjectId>(&mut list);

        let (redis, member, app) = (&list.items[0], &list.items[1], &list.items[2]);
        assert_eq!(
            get(redis, &["metadata", "annotations", PROJECT_ANNOTATION]),
            Some("new-project")
        );
        assert_eq!(
            get(redis, &["spec", "authorizedNetworkRef", "external"]),
            Some("projects/new-project/global/networks/default")
        );
        assert_eq!(
            get(member, &["spec", "resourceRef", "external"]),
            Some("projects/new-project")
        );
        assert_eq!(
            get(app, &["spec", "template", "metadata", "annotations", PROJECT_ANNOTATION]),
            Some("new-project")
        );
        assert!(!list.has_errors());
    }

    #[test]
    fn annotation_is_never_added() {
        let mut list = ResourceList::parse(INPUT).expect("ResourceList is valid");
        driver::run::<SetProjectId>(&mut list);

        assert_eq!(get(&list.items[1], &["metadata", "annotations", PROJECT_ANNOTATION]), None);
        assert_eq!(get(&list.items[2], &["metadata", "annotations", PROJECT_ANNOTATION]), None);
    }

    #[test]
    fn missing_data() {
        let mut list = ResourceList::parse(INPUT).expect("ResourceList is valid");
        list.function_config =
            Some(serde_yaml::from_str("apiVersion: v1\nkind: ConfigMap\n").expect("valid YAML"));
        driver::run::<SetProjectId>(&mut list);

        assert_eq!(list.results.len(), 1);
        assert_eq!(
            list.results[0].message,
            "missing `data` field in `ConfigMap` FunctionConfig"
        );
        assert_eq!(
            get(&list.items[1], &["spec", "resourceRef", "external"]),
            Some("projects/old-project")
        );
    }
}
