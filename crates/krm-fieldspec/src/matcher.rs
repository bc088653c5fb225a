//! Resolves field specs against resources.
//!
//! Resolution walks the resource tree segment by segment. A field segment
//! which meets a sequence is applied to every element of that sequence, so
//! `spec/containers/image` reaches the image of every container. Missing
//! nodes end the walk silently unless the field spec asks for them to be
//! created.
use std::collections::BTreeSet;

use serde_yaml::{Mapping, Value};
use tracing::trace;

use crate::{
    fieldspec::FieldSpec,
    gvk::Gvk,
    node::scalar_text,
    path::{FieldPath, Segment, Step},
    resource::Resource,
};

/// Returns `true` if `spec` applies to resources of type `gvk`.
pub fn selects(spec: &FieldSpec, gvk: &Gvk) -> bool {
    gvk.is_selected_by(&spec.gvk)
}

/// Finds every node `spec` addresses inside `resource`.
///
/// If `spec.create` is set, missing mapping keys along the path are added,
/// intermediate ones as empty mappings and the final one as `null`.
/// Sequence elements are never created.
pub fn locate(resource: &mut Resource, spec: &FieldSpec) -> Vec<FieldPath> {
    if !selects(spec, &resource.gvk()) {
        return Vec::new();
    }

    let paths = resolve(resource.root_mut(), spec.path.segments(), spec.create);
    trace!(
        resource = %resource.id(),
        path = %spec.path,
        matches = paths.len(),
        "resolved field spec"
    );
    paths
}

/// Resolves `segments` starting at `root`, see [`locate`].
pub fn resolve(root: &mut Value, segments: &[Segment], create: bool) -> Vec<FieldPath> {
    let mut found = Vec::new();
    walk(root, segments, create, FieldPath::new(), &mut found);

    // `**` may reach the same node along several routes.
    let mut seen = BTreeSet::new();
    found.retain(|path| seen.insert(path.clone()));
    found
}

fn walk(
    node: &mut Value,
    segments: &[Segment],
    create: bool,
    at: FieldPath,
    found: &mut Vec<FieldPath>,
) {
    if let Value::Tagged(tagged) = node {
        return walk(&mut tagged.value, segments, create, at, found);
    }

    let Some((segment, rest)) = segments.split_first() else {
        if create || !node.is_null() {
            found.push(at);
        }
        return;
    };

    match (segment, node) {
        (Segment::Field(name), Value::Mapping(mapping)) => {
            if create {
                materialize(mapping, name, rest.is_empty());
            }
            if let Some(child) = mapping.get_mut(name.as_str()) {
                walk(child, rest, create, at.join(Step::Key(name.clone())), found);
            }
        }

        // A field applied to a sequence is applied to each of its elements.
        (Segment::Field(_), Value::Sequence(sequence)) => {
            for (index, element) in sequence.iter_mut().enumerate() {
                if element.is_mapping() {
                    walk(element, segments, create, at.join(Step::Index(index)), found);
                }
            }
        }

        (Segment::AnyField, Value::Mapping(mapping)) => {
            for (key, child) in mapping.iter_mut() {
                if let Some(key) = key.as_str() {
                    walk(child, rest, false, at.join(Step::Key(key.to_owned())), found);
                }
            }
        }

        (Segment::Index(index), Value::Sequence(sequence)) => {
            if let Some(element) = sequence.get_mut(*index) {
                walk(element, rest, create, at.join(Step::Index(*index)), found);
            }
        }

        (Segment::Elements, Value::Sequence(sequence)) => {
            for (index, element) in sequence.iter_mut().enumerate() {
                walk(element, rest, create, at.join(Step::Index(index)), found);
            }
        }

        (Segment::Select { key, value }, Value::Sequence(sequence)) => {
            for (index, element) in sequence.iter_mut().enumerate() {
                let selected = element
                    .get(key.as_str())
                    .and_then(scalar_text)
                    .is_some_and(|text| &text == value);
                if selected {
                    walk(element, rest, create, at.join(Step::Index(index)), found);
                }
            }
        }

        (Segment::AnyDepth, node) => {
            walk(node, rest, false, at.clone(), found);
            match node {
                Value::Mapping(mapping) => {
                    for (key, child) in mapping.iter_mut() {
                        if let Some(key) = key.as_str() {
                            walk(child, segments, false, at.join(Step::Key(key.to_owned())), found);
                        }
                    }
                }
                Value::Sequence(sequence) => {
                    for (index, element) in sequence.iter_mut().enumerate() {
                        walk(element, segments, false, at.join(Step::Index(index)), found);
                    }
                }
                _ => {}
            }
        }

        _ => {}
    }
}

/// Inserts `name` into `mapping` if it is missing or `null`.
fn materialize(mapping: &mut Mapping, name: &str, leaf: bool) {
    let missing = mapping.get(name).is_none_or(Value::is_null);
    if !missing {
        return;
    }

    let value = if leaf {
        Value::Null
    } else {
        Value::Mapping(Mapping::new())
    };
    mapping.insert(Value::String(name.to_owned()), value);
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    fn resource(yaml: &str) -> Resource {
        Resource::from_value(serde_yaml::from_str(yaml).expect("test YAML is valid"))
            .expect("test YAML is a mapping")
    }

    fn bucket() -> Resource {
        resource(indoc! {"
            apiVersion: storage.cnrm.cloud.google.com/v1beta1
            kind: StorageBucket
            metadata:
              name: bucket
            spec:
              location: us-west1
        "})
    }

    fn spec(gvk: Gvk, path: &str) -> FieldSpec {
        FieldSpec::new(gvk, path).expect("field spec is valid")
    }

    #[rstest]
    #[case::wildcard(Gvk::default(), 1)]
    #[case::kind_only(Gvk::new("", "", "StorageBucket"), 1)]
    #[case::version_only(Gvk::new("", "v1beta1", ""), 1)]
    #[case::other_kind(Gvk::new("", "", "RedisInstance"), 0)]
    #[case::other_group(Gvk::new("redis.cnrm.cloud.google.com", "", ""), 0)]
    fn gvk_selection(#[case] gvk: Gvk, #[case] expected: usize) {
        let mut bucket = bucket();
        assert_eq!(locate(&mut bucket, &spec(gvk, "spec/location")).len(), expected);
    }

    #[test]
    fn wildcard_selects_every_kind() {
        let wildcard = spec(Gvk::default(), "metadata/name");
        for yaml in [
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n",
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: b\n",
            "kind: Anything\nmetadata:\n  name: c\n",
        ] {
            let mut resource = resource(yaml);
            assert_eq!(locate(&mut resource, &wildcard).len(), 1, "{yaml}");
        }
    }

    #[test]
    fn missing_path_without_create_is_untouched() {
        let mut bucket = bucket();
        let before = bucket.clone();

        let paths = locate(&mut bucket, &spec(Gvk::default(), "spec/storageClass/name"));
        assert!(paths.is_empty());
        assert_eq!(bucket, before);
    }

    #[test]
    fn null_leaf_counts_as_missing() {
        let mut resource = resource("kind: Foo\nspec:\n  region: ~\n");
        assert!(locate(&mut resource, &spec(Gvk::default(), "spec/region")).is_empty());

        let created = spec(Gvk::default(), "spec/region").with_create(true);
        assert_eq!(
            locate(&mut resource, &created),
            vec![["spec", "region"].into_iter().collect::<FieldPath>()]
        );
    }

    #[test]
    fn create_materializes_mappings() {
        let mut bucket = bucket();
        let spec = spec(Gvk::default(), "metadata/annotations/owner").with_create(true);

        let paths = locate(&mut bucket, &spec);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].to_string(), "metadata.annotations.owner");
        assert_eq!(bucket.get(&paths[0]), Some(&Value::Null));
    }

    #[test]
    fn create_never_invents_sequence_elements() {
        let mut resource = resource("kind: Pod\nspec:\n  containers: []\n");
        let spec = spec(Gvk::default(), "spec/containers[0]/image").with_create(true);
        assert!(locate(&mut resource, &spec).is_empty());
    }

    #[test]
    fn sequences() {
        let mut resource = resource(indoc! {"
            apiVersion: rbac.authorization.k8s.io/v1
            kind: RoleBinding
            metadata:
              name: binding
            subjects:
            - kind: ServiceAccount
              name: sa
            - kind: User
              name: alice
            - name: unnamed-kind
        "});

        let paths = |path: &str, resource: &mut Resource| {
            locate(resource, &spec(Gvk::default(), path))
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        };

        assert_eq!(
            paths("subjects/name", &mut resource),
            ["subjects[0].name", "subjects[1].name", "subjects[2].name"]
        );
        assert_eq!(paths("subjects[1]/name", &mut resource), ["subjects[1].name"]);
        assert_eq!(
            paths("subjects[kind=ServiceAccount]/name", &mut resource),
            ["subjects[0].name"]
        );
        assert_eq!(paths("subjects[]/kind", &mut resource), [
            "subjects[0].kind",
            "subjects[1].kind"
        ]);
    }

    #[test]
    fn wildcards() {
        let mut resource = resource(indoc! {"
            kind: Foo
            spec:
              a:
                image: one
              b:
                nested:
                  image: two
        "});

        let any_field: Vec<_> = locate(&mut resource, &spec(Gvk::default(), "spec/*/image"))
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(any_field, ["spec.a.image"]);

        let any_depth: Vec<_> = locate(&mut resource, &spec(Gvk::default(), "**/image"))
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(any_depth, ["spec.a.image", "spec.b.nested.image"]);
    }
}
