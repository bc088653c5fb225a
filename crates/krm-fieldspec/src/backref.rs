//! Propagates renames to the fields referring to the renamed resource.
//!
//! A [`BackReferenceTable`] lists, per referral target GVK, where other
//! resources mention targets by name. After a target was renamed,
//! [`propagate_all`] rewrites every such mention of the old name.
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::{
    fieldspec::{FieldSpecs, MergeError},
    gvk::{DEFAULT_NAMESPACE, Gvk, ResourceId},
    matcher,
    node::string_field,
    path::{FieldPath, Step},
    resource::Resource,
    result::{MutationResult, Report, ResultItem},
};

const SERVICE_ACCOUNT_KIND: &str = "ServiceAccount";
const ROLE_BINDING_KINDS: &[&str] = &["RoleBinding", "ClusterRoleBinding"];

/// All places in which resources of type `gvk` are referred to by name.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackReference {
    #[serde(flatten)]
    pub gvk: Gvk,

    #[serde(rename = "fieldSpecs", default)]
    pub referrers: FieldSpecs,
}

/// An immutable set of [`BackReference`]s with at most one entry per
/// target GVK.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "Vec<BackReference>", into = "Vec<BackReference>")]
pub struct BackReferenceTable(Vec<BackReference>);

impl BackReferenceTable {
    pub fn new(entries: impl IntoIterator<Item = BackReference>) -> Result<Self, MergeError> {
        let mut table = Vec::<BackReference>::new();
        for entry in entries {
            match table.iter_mut().find(|existing| existing.gvk == entry.gvk) {
                Some(existing) => existing.referrers.merge_all(entry.referrers)?,
                None => table.push(entry),
            }
        }
        Ok(Self(table))
    }

    /// Returns a table containing the entries of both tables. Referrers of
    /// the same target GVK are united.
    pub fn merged(&self, other: &Self) -> Result<Self, MergeError> {
        Self::new(self.0.iter().chain(&other.0).cloned())
    }

    pub fn entries(&self) -> &[BackReference] {
        &self.0
    }

    /// Entries which apply to targets of type `gvk`.
    pub fn entries_for<'a>(&'a self, gvk: &'a Gvk) -> impl Iterator<Item = &'a BackReference> + 'a {
        self.0.iter().filter(move |entry| gvk.is_selected_by(&entry.gvk))
    }
}

impl TryFrom<Vec<BackReference>> for BackReferenceTable {
    type Error = MergeError;

    fn try_from(entries: Vec<BackReference>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<BackReferenceTable> for Vec<BackReference> {
    fn from(table: BackReferenceTable) -> Self {
        table.0
    }
}

/// Decides which resources are considered when looking for references to a
/// renamed resource.
pub trait ReferenceScope {
    fn could_reference(&self, referrer: &Resource, target: &ResourceId) -> bool;
}

/// Namespace rules as Kubernetes applies them: namespaced resources refer
/// to resources in their own namespace only, cluster-scoped resources on
/// either side are visible everywhere. Role bindings may additionally
/// refer to service accounts in the namespaces named by their subjects.
#[derive(Clone, Copy, Debug, Default)]
pub struct KubernetesScope;

impl ReferenceScope for KubernetesScope {
    fn could_reference(&self, referrer: &Resource, target: &ResourceId) -> bool {
        let referrer_id = referrer.id();
        if referrer_id.is_cluster_scoped() || target.is_cluster_scoped() {
            return true;
        }
        if referrer_id.is_ns_equal(target) {
            return true;
        }

        ROLE_BINDING_KINDS.contains(&referrer_id.gvk.kind.as_str())
            && target.gvk.kind == SERVICE_ACCOUNT_KIND
            && subject_namespaces(referrer)
                .any(|namespace| namespace == target.effective_namespace())
    }
}

/// Every resource may refer to every other resource.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unscoped;

impl ReferenceScope for Unscoped {
    fn could_reference(&self, _referrer: &Resource, _target: &ResourceId) -> bool {
        true
    }
}

fn subject_namespaces(binding: &Resource) -> impl Iterator<Item = &str> {
    binding
        .root()
        .get("subjects")
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
        .filter(|subject| string_field(subject, "kind") == Some(SERVICE_ACCOUNT_KIND))
        .filter_map(|subject| string_field(subject, "namespace"))
}

/// A resource whose name changed from `old_name` to `new_name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rename {
    /// The resource as it was identified before the rename.
    pub target: ResourceId,
    pub old_name: String,
    pub new_name: String,
}

impl Rename {
    pub fn new(target: ResourceId, new_name: impl Into<String>) -> Self {
        Self {
            old_name: target.name.clone(),
            target,
            new_name: new_name.into(),
        }
    }

    /// Detects a rename by comparing the current and the original identity.
    pub fn of(resource: &Resource) -> Option<Self> {
        let original = resource.original_id();
        let current = resource.name();
        (original.name != current).then(|| Self::new(original.clone(), current))
    }
}

/// Propagates a single rename, see [`propagate_all`].
pub fn propagate(
    resources: &mut [Resource],
    table: &BackReferenceTable,
    rename: &Rename,
    scope: &dyn ReferenceScope,
) -> Report {
    propagate_all(resources, table, std::slice::from_ref(rename), scope)
}

/// Rewrites every reference to the old name of a renamed resource.
///
/// All renames are matched against the state before this pass, so chained
/// renames (`a` to `b` and `b` to `c`) do not cascade. Fields are never
/// created. A field which could refer to several renamed resources with
/// different new names is left alone and reported as an error.
pub fn propagate_all(
    resources: &mut [Resource],
    table: &BackReferenceTable,
    renames: &[Rename],
    scope: &dyn ReferenceScope,
) -> Report {
    let mut report = Report::new();

    for resource in resources.iter_mut() {
        let candidates = find_candidates(resource, table, renames, scope);
        let id = resource.id();
        let file_path = resource.file_path().map(ToOwned::to_owned);

        for (path, matched) in candidates {
            let mut new_names: Vec<&str> =
                matched.iter().map(|rename| rename.new_name.as_str()).collect();
            new_names.sort_unstable();
            new_names.dedup();

            if let [new_name] = new_names.as_slice() {
                let Some(node) = resource.get_mut(&path) else {
                    continue;
                };
                let old_value = matched[0].old_name.clone();
                *node = Value::String((*new_name).to_owned());

                debug!(
                    resource = %id,
                    field = %path,
                    old = %old_value,
                    new = %new_name,
                    "updated reference"
                );
                report.record(MutationResult {
                    resource: id.clone(),
                    file_path: file_path.clone(),
                    field_path: path,
                    old_value,
                    new_value: (*new_name).to_owned(),
                });
            } else {
                let targets = matched
                    .iter()
                    .map(|rename| rename.target.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                warn!(resource = %id, field = %path, %targets, "ambiguous reference");
                report.push(
                    ResultItem::error(format!(
                        "ambiguous reference {:?}, it could refer to any of {targets}",
                        matched[0].old_name
                    ))
                    .with_resource(&id)
                    .with_field(&path)
                    .with_file(file_path.as_deref()),
                );
            }
        }
    }

    report
}

/// Collects the fields of `resource` which hold the old name of one of
/// `renames`, together with the renames they may refer to.
fn find_candidates<'a>(
    resource: &mut Resource,
    table: &BackReferenceTable,
    renames: &'a [Rename],
    scope: &dyn ReferenceScope,
) -> Vec<(FieldPath, Vec<&'a Rename>)> {
    let mut candidates: Vec<(FieldPath, Vec<&'a Rename>)> = Vec::new();
    let gvk = resource.gvk();

    for rename in renames {
        if !scope.could_reference(resource, &rename.target) {
            continue;
        }

        for entry in table.entries_for(&rename.target.gvk) {
            for spec in entry.referrers.iter().filter(|spec| matcher::selects(spec, &gvk)) {
                for path in matcher::resolve(resource.root_mut(), spec.path.segments(), false) {
                    for field in referring_fields(resource, &path, rename) {
                        match candidates.iter_mut().find(|(existing, _)| *existing == field) {
                            Some((_, matched)) if matched.contains(&rename) => {}
                            Some((_, matched)) => matched.push(rename),
                            None => candidates.push((field, vec![rename])),
                        }
                    }
                }
            }
        }
    }

    candidates
}

/// Returns the fields at or below `path` which refer to the target of
/// `rename`.
fn referring_fields(resource: &Resource, path: &FieldPath, rename: &Rename) -> Vec<FieldPath> {
    if !passes_guards(resource, path, &rename.target) {
        return Vec::new();
    }

    match resource.get(path) {
        Some(Value::String(name)) if *name == rename.old_name => vec![path.clone()],
        Some(Value::Sequence(names)) => names
            .iter()
            .enumerate()
            .filter(|(_, name)| name.as_str() == Some(rename.old_name.as_str()))
            .map(|(index, _)| path.join(Step::Index(index)))
            .collect(),
        _ => Vec::new(),
    }
}

/// A name next to a `kind` or `namespace` field only refers to resources
/// of that kind and namespace.
fn passes_guards(resource: &Resource, path: &FieldPath, target: &ResourceId) -> bool {
    let kind_matches = match resource.sibling(path, "kind").and_then(Value::as_str) {
        Some(kind) => kind == target.gvk.kind,
        None => true,
    };
    let namespace_matches = match resource.sibling(path, "namespace").and_then(Value::as_str) {
        Some("") => target.effective_namespace() == DEFAULT_NAMESPACE,
        Some(namespace) => target.is_cluster_scoped() || namespace == target.effective_namespace(),
        None => true,
    };

    kind_matches && namespace_matches
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde::Deserialize;

    use super::*;

    fn resources(yaml: &str) -> Vec<Resource> {
        serde_yaml::Deserializer::from_str(yaml)
            .map(|document| {
                let value = Value::deserialize(document).expect("test YAML is valid");
                Resource::from_value(value).expect("test YAML is a mapping")
            })
            .collect()
    }

    fn table(yaml: &str) -> BackReferenceTable {
        serde_yaml::from_str(yaml).expect("back references are valid")
    }

    fn field(resource: &Resource, path: &[Step]) -> Option<String> {
        resource
            .get(&FieldPath::from(path.to_vec()))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    }

    fn key(key: &str) -> Step {
        Step::Key(key.to_owned())
    }

    const SERVICE_ACCOUNT_REFERENCES: &str = indoc! {"
        - kind: ServiceAccount
          version: v1
          fieldSpecs:
          - path: subjects/name
            kind: RoleBinding
            group: rbac.authorization.k8s.io
          - path: spec/template/spec/serviceAccountName
            kind: Deployment
    "};

    #[test]
    fn merge_does_not_duplicate_referrers() {
        let config_maps = indoc! {"
            - kind: ConfigMap
              version: v1
              fieldSpecs:
              - path: spec/volumes/configMap/name
                kind: Pod
              - path: spec/containers/env/valueFrom/configMapKeyRef/name
                kind: Pod
        "};

        let merged = table(config_maps)
            .merged(&table(config_maps))
            .expect("identical tables do not conflict");
        assert_eq!(merged.entries().len(), 1);
        assert_eq!(merged.entries()[0].referrers.len(), 2);
    }

    #[test]
    fn merge_unions_and_rejects_conflicts() {
        let first = table("- kind: Secret\n  fieldSpecs:\n  - path: spec/a\n");
        let second = table("- kind: Secret\n  fieldSpecs:\n  - path: spec/b\n");
        let merged = first.merged(&second).expect("tables do not conflict");
        assert_eq!(merged.entries()[0].referrers.len(), 2);

        let conflicting =
            table("- kind: Secret\n  fieldSpecs:\n  - path: spec/a\n    create: true\n");
        let err = first.merged(&conflicting).expect_err("create flags differ");
        assert!(err.to_string().starts_with("conflicting fieldspecs"));
    }

    #[test]
    fn service_account_rename_updates_role_binding() {
        let mut resources = resources(indoc! {"
            apiVersion: v1
            kind: ServiceAccount
            metadata:
              name: sa
            ---
            apiVersion: rbac.authorization.k8s.io/v1
            kind: RoleBinding
            metadata:
              name: binding
            subjects:
            - kind: ServiceAccount
              name: sa
            - kind: User
              name: sa
            - kind: ServiceAccount
              name: other
        "});
        resources[0].set_name("bob");
        let rename = Rename::of(&resources[0]).expect("service account was renamed");

        let report = propagate(
            &mut resources,
            &table(SERVICE_ACCOUNT_REFERENCES),
            &rename,
            &KubernetesScope,
        );

        let subject = |index: usize| {
            field(&resources[1], &[key("subjects"), Step::Index(index), key("name")])
        };
        assert_eq!(subject(0).as_deref(), Some("bob"));
        assert_eq!(subject(1).as_deref(), Some("sa"));
        assert_eq!(subject(2).as_deref(), Some("other"));
        assert_eq!(report.mutations.len(), 1);
        assert_eq!(report.mutations[0].field_path.to_string(), "subjects[0].name");
    }

    #[test]
    fn scope_restricts_candidates() {
        let yaml = indoc! {"
            apiVersion: apps/v1
            kind: Deployment
            metadata:
              name: web
              namespace: other
            spec:
              template:
                spec:
                  serviceAccountName: sa
            ---
            apiVersion: rbac.authorization.k8s.io/v1
            kind: RoleBinding
            metadata:
              name: binding
              namespace: other
            subjects:
            - kind: ServiceAccount
              name: sa
              namespace: default
        "};
        let rename = Rename::new(
            ResourceId::new(Gvk::new("", "v1", "ServiceAccount"), "sa", None),
            "bob",
        );
        let service_account_name =
            [key("spec"), key("template"), key("spec"), key("serviceAccountName")];
        let subject_name = [key("subjects"), Step::Index(0), key("name")];

        let mut scoped = resources(yaml);
        propagate(&mut scoped, &table(SERVICE_ACCOUNT_REFERENCES), &rename, &KubernetesScope);
        assert_eq!(field(&scoped[0], &service_account_name).as_deref(), Some("sa"));
        assert_eq!(field(&scoped[1], &subject_name).as_deref(), Some("bob"));

        let mut unscoped = resources(yaml);
        propagate(&mut unscoped, &table(SERVICE_ACCOUNT_REFERENCES), &rename, &Unscoped);
        assert_eq!(field(&unscoped[0], &service_account_name).as_deref(), Some("bob"));
    }

    #[test]
    fn renames_do_not_cascade() {
        let mut resources = resources(indoc! {"
            apiVersion: apps/v1
            kind: Deployment
            metadata:
              name: web
            spec:
              template:
                spec:
                  serviceAccountName: a
        "});
        let service_account =
            |name: &str| ResourceId::new(Gvk::new("", "v1", "ServiceAccount"), name, None);
        let renames = [
            Rename::new(service_account("a"), "b"),
            Rename::new(service_account("b"), "c"),
        ];

        propagate_all(
            &mut resources,
            &table(SERVICE_ACCOUNT_REFERENCES),
            &renames,
            &KubernetesScope,
        );
        let service_account_name =
            [key("spec"), key("template"), key("spec"), key("serviceAccountName")];
        assert_eq!(field(&resources[0], &service_account_name).as_deref(), Some("b"));
    }

    #[test]
    fn ambiguous_references_are_reported() {
        let mut resources = resources(indoc! {"
            apiVersion: v1
            kind: Pod
            metadata:
              name: pod
            spec:
              secrets:
              - shared
              - unrelated
        "});
        let references =
            table("- kind: Secret\n  fieldSpecs:\n  - path: spec/secrets\n    kind: Pod\n");
        let secret = |namespace: &str| {
            ResourceId::new(Gvk::new("", "v1", "Secret"), "shared", Some(namespace.to_owned()))
        };
        let renames = [
            Rename::new(secret("default"), "one"),
            Rename::new(secret(""), "two"),
        ];

        let report = propagate_all(&mut resources, &references, &renames, &Unscoped);
        assert!(report.has_errors());
        assert!(report.mutations.is_empty());
        assert_eq!(
            field(&resources[0], &[key("spec"), key("secrets"), Step::Index(0)]).as_deref(),
            Some("shared")
        );
    }
}
