//! `set-org-id`: points organization references at another organization.
//!
//! The field specs select reference mappings such as
//!
//! ```yaml
//! resourceRef:
//!   apiVersion: resourcemanager.cnrm.cloud.google.com/v1beta1
//!   kind: Organization
//!   external: "433637338589"
//! ```
//!
//! and `external` is replaced if `kind` is `Organization`.
use indoc::indoc;
use krm_fieldspec::{
    FieldPath, FieldSpecs, MutationResult, Report, Resource, Step, matcher,
    node::{scalar_text, string_field},
};
use serde::Deserialize;
use serde_yaml::Value;
use snafu::ensure;
use tracing::debug;

use super::{builtin, with_overrides};
use crate::{
    config::{ConfigError, FunctionConfig, MissingKeySnafu, UnsupportedSubstitutionSnafu},
    driver::{Configured, KrmFunction},
};

pub const ORG_ID_KEY: &str = "orgID";
const ORGANIZATION_KIND: &str = "Organization";
const EXTERNAL_KEY: &str = "external";

const ORG_FIELD_SPECS: &str = indoc! {"
    # Blueprint iam-foundation
    - path: spec/resourceRef
      group: iam.cnrm.cloud.google.com
      version: v1beta1
      kind: IAMPolicyMember
"};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetOrgIdConfig {
    #[serde(rename = "orgID")]
    org_id: String,

    #[serde(default, rename = "organizationsIDs")]
    organizations_ids: Option<FieldSpecs>,
}

#[derive(Debug)]
pub struct SetOrgId {
    org_id: String,
    specs: FieldSpecs,
}

impl KrmFunction for SetOrgId {
    const NAME: &'static str = "set-org-id";

    fn configure(config: &FunctionConfig) -> Result<Configured<Self>, ConfigError> {
        let (org_id, overrides) = match config.structured::<SetOrgIdConfig>("SetOrgId")? {
            Some(structured) => (structured.org_id, structured.organizations_ids),
            None => (config.required(ORG_ID_KEY)?.to_owned(), None),
        };
        ensure!(!org_id.is_empty(), MissingKeySnafu { key: ORG_ID_KEY });

        let specs = with_overrides(
            builtin(ORG_FIELD_SPECS, "organization field specs")?,
            overrides,
        );
        // References are rewritten as a whole, there is no value to match.
        for spec in &specs {
            ensure!(
                spec.regex_pattern.is_empty() && spec.template.is_none(),
                UnsupportedSubstitutionSnafu {
                    spec: spec.to_string()
                }
            );
        }

        Ok(Configured::Ready(Self { org_id, specs }))
    }

    fn apply(&self, resources: &mut [Resource]) -> Report {
        let mut report = Report::new();
        for resource in resources.iter_mut() {
            for spec in &self.specs {
                for reference in matcher::locate(resource, spec) {
                    self.update_reference(resource, &reference, &mut report);
                }
            }
        }
        report
    }
}

impl SetOrgId {
    /// Replaces `external` of the mapping at `reference`. The key has to
    /// exist already.
    fn update_reference(
        &self,
        resource: &mut Resource,
        reference: &FieldPath,
        report: &mut Report,
    ) {
        if !resource.get(reference).is_some_and(is_organization_ref) {
            return;
        }

        let external = reference.join(Step::Key(EXTERNAL_KEY.to_owned()));
        let id = resource.id();
        let file_path = resource.file_path().map(ToOwned::to_owned);
        let Some(node) = resource.get_mut(&external) else {
            return;
        };
        let Some(old_value) = scalar_text(node) else {
            return;
        };
        if old_value == self.org_id {
            return;
        }

        *node = Value::String(self.org_id.clone());
        debug!(
            resource = %id,
            field = %external,
            old = %old_value,
            new = %self.org_id,
            "updated organization"
        );
        report.record(MutationResult {
            resource: id,
            file_path,
            field_path: external,
            old_value,
            new_value: self.org_id.clone(),
        });
    }
}

/// Returns `true` if `reference` is a mapping pointing at an organization.
pub fn is_organization_ref(reference: &Value) -> bool {
    string_field(reference, "kind") == Some(ORGANIZATION_KIND)
}

#[cfg(test)]
mod tests {
    use indoc::formatdoc;
    use krm_fieldspec::Severity;
    use rstest::rstest;

    use super::*;
    use crate::{driver, resource_list::ResourceList};

    const INPUT: &str = indoc! {r#"
        apiVersion: config.kubernetes.io/v1
        kind: ResourceList
        items:
        - apiVersion: iam.cnrm.cloud.google.com/v1beta1
          kind: IAMPolicyMember
          metadata:
            name: org-admin
          spec:
            member: group:admins@example.com
            resourceRef:
              apiVersion: resourcemanager.cnrm.cloud.google.com/v1beta1
              kind: Organization
              external: "123456789012"
        - apiVersion: iam.cnrm.cloud.google.com/v1beta1
          kind: IAMPolicyMember
          metadata:
            name: project-admin
          spec:
            resourceRef:
              apiVersion: resourcemanager.cnrm.cloud.google.com/v1beta1
              kind: Project
              external: projects/my-project
        - apiVersion: iam.cnrm.cloud.google.com/v1beta1
          kind: IAMPolicyMember
          metadata:
            name: no-external
          spec:
            resourceRef:
              kind: Organization
              name: org
        functionConfig:
          apiVersion: v1
          kind: ConfigMap
          data:
            orgID: "433637338589"
    "#};

    fn reference(list: &ResourceList, index: usize) -> &Value {
        list.items[index]
            .get(&["spec", "resourceRef"].into_iter().collect::<FieldPath>())
            .unwrap_or(&Value::Null)
    }

    #[test]
    fn updates_organization_references() {
        let mut list = ResourceList::parse(INPUT).expect("ResourceList is valid");
        driver::run::<SetOrgId>(&mut list);

        assert!(is_organization_ref(reference(&list, 0)));
        assert_eq!(string_field(reference(&list, 0), EXTERNAL_KEY), Some("433637338589"));
        assert_eq!(string_field(reference(&list, 1), EXTERNAL_KEY), Some("projects/my-project"));
        assert_eq!(reference(&list, 2).get(EXTERNAL_KEY), None);

        let mutated: Vec<_> = list
            .results
            .iter()
            .filter_map(|result| result.field.as_ref())
            .collect();
        assert_eq!(mutated.len(), 1);
        assert_eq!(mutated[0].path, "spec.resourceRef.external");
    }

    #[test]
    fn second_run_changes_nothing() {
        let mut list = ResourceList::parse(INPUT).expect("ResourceList is valid");
        driver::run::<SetOrgId>(&mut list);
        let first = list.items.clone();

        list.results.clear();
        driver::run::<SetOrgId>(&mut list);
        assert_eq!(list.items, first);
        assert_eq!(list.results.len(), 1);
        assert_eq!(list.results[0].message, "set-org-id: no fields changed");
    }

    #[rstest]
    #[case::pattern("regexPattern: (?P<org>\\d+)")]
    #[case::template("template: organizations/${org}")]
    fn rejects_substitution_settings(#[case] setting: &str) {
        let mut list = ResourceList::parse(INPUT).expect("ResourceList is valid");
        list.function_config = Some(
            serde_yaml::from_str(&formatdoc! {"
                apiVersion: fn.kpt.dev/v1alpha1
                kind: SetOrgId
                orgID: \"433637338589\"
                organizationsIDs:
                - path: spec/resourceRef
                  kind: IAMPolicyMember
                  {setting}
            "})
            .expect("config is valid YAML"),
        );
        let before = list.items.clone();

        driver::run::<SetOrgId>(&mut list);

        assert_eq!(list.items, before);
        assert_eq!(list.results.len(), 1);
        assert_eq!(list.results[0].severity, Severity::Error);
        assert!(list.results[0].message.contains("cannot set regexPattern or template"));
    }
}
