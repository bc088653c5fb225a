//! Reading and writing the `ResourceList` wire format.
use krm_fieldspec::{Resource, ResultItem, node, resource::ResourceError};
use serde::Deserialize;
use serde_yaml::Value;
use snafu::{ResultExt, Snafu};

use crate::yaml::{self, Comments};

pub const API_VERSION: &str = "config.kubernetes.io/v1";
pub const KIND: &str = "ResourceList";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse YAML document"))]
    ParseDocument { source: serde_yaml::Error },

    #[snafu(display("failed to parse ResourceList"))]
    ParseResourceList { source: serde_yaml::Error },

    #[snafu(display("invalid item {index} in the input"))]
    InvalidItem { source: ResourceError, index: usize },

    #[snafu(display("failed to serialize results"))]
    SerializeResults { source: serde_yaml::Error },

    #[snafu(display("failed to write YAML"))]
    Emit { source: yaml::Error },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResourceList {
    #[serde(default)]
    items: Vec<Value>,

    #[serde(default)]
    function_config: Option<Value>,

    #[serde(default)]
    results: Vec<ResultItem>,
}

/// The input and output of a function run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceList {
    pub items: Vec<Resource>,
    pub function_config: Option<Value>,
    pub results: Vec<ResultItem>,

    /// The input was a plain stream of resources rather than a
    /// `ResourceList`, and is written back the same way.
    pub standalone: bool,
}

impl ResourceList {
    /// Parses a `ResourceList`, or a multi-document stream of resources.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut documents = Vec::new();
        for document in serde_yaml::Deserializer::from_str(input) {
            let value = Value::deserialize(document).context(ParseDocumentSnafu)?;
            if !value.is_null() {
                documents.push(value);
            }
        }

        if let [document] = documents.as_slice() {
            if node::string_field(document, "kind") == Some(KIND) {
                let raw: RawResourceList =
                    serde_yaml::from_value(document.clone()).context(ParseResourceListSnafu)?;
                return Ok(Self {
                    items: into_resources(raw.items)?,
                    function_config: raw.function_config.filter(|config| !config.is_null()),
                    results: raw.results,
                    standalone: false,
                });
            }
        }

        Ok(Self {
            items: into_resources(documents)?,
            standalone: true,
            ..Self::default()
        })
    }

    pub fn has_errors(&self) -> bool {
        self.results.iter().any(ResultItem::is_error)
    }

    /// Writes the list in the format it was read in.
    ///
    /// Standalone streams only carry the resources; results are left to the
    /// caller.
    pub fn to_yaml(&self) -> Result<String, Error> {
        if self.standalone {
            return yaml::to_string(self.items.iter().map(|item| (item.root(), item.comments())))
                .context(EmitSnafu);
        }

        let mut emitter = yaml::Emitter::new();
        emitter
            .entry("apiVersion", &Value::String(API_VERSION.to_owned()))
            .context(EmitSnafu)?;
        emitter
            .entry("kind", &Value::String(KIND.to_owned()))
            .context(EmitSnafu)?;
        emitter
            .entry_with_items(
                "items",
                self.items.iter().map(|item| (item.root(), item.comments())),
            )
            .context(EmitSnafu)?;

        if let Some(function_config) = &self.function_config {
            emitter
                .entry("functionConfig", function_config)
                .context(EmitSnafu)?;
        }

        if !self.results.is_empty() {
            let results = self
                .results
                .iter()
                .map(serde_yaml::to_value)
                .collect::<Result<Vec<_>, _>>()
                .context(SerializeResultsSnafu)?;
            let no_comments = Comments::new();
            emitter
                .entry_with_items("results", results.iter().map(|result| (result, &no_comments)))
                .context(EmitSnafu)?;
        }

        Ok(emitter.finish())
    }
}

fn into_resources(values: Vec<Value>) -> Result<Vec<Resource>, Error> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| Resource::from_value(value).context(InvalidItemSnafu { index }))
        .collect()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use krm_fieldspec::{FieldPath, Severity};

    use super::*;

    const LIST: &str = indoc! {"
        apiVersion: config.kubernetes.io/v1
        kind: ResourceList
        items:
        - apiVersion: v1
          kind: ConfigMap
          metadata:
            name: cm
        - apiVersion: apps/v1
          kind: Deployment
          metadata:
            name: app
        functionConfig:
          apiVersion: v1
          kind: ConfigMap
          data:
            domain: example.com
    "};

    #[test]
    fn parse_resource_list() {
        let list = ResourceList::parse(LIST).expect("ResourceList is valid");

        assert!(!list.standalone);
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[1].name(), "app");
        assert!(list.function_config.is_some());
        assert!(list.results.is_empty());
    }

    #[test]
    fn write_resource_list() {
        let mut list = ResourceList::parse(LIST).expect("ResourceList is valid");
        list.items[0].set_comment(
            ["metadata", "name"].into_iter().collect::<FieldPath>(),
            "renamed",
        );
        list.results.push(ResultItem::info("done"));

        assert_eq!(list.to_yaml().expect("list can be written"), indoc! {"
            apiVersion: config.kubernetes.io/v1
            kind: ResourceList
            items:
            - apiVersion: v1
              kind: ConfigMap
              metadata:
                name: cm # renamed
            - apiVersion: apps/v1
              kind: Deployment
              metadata:
                name: app
            functionConfig:
              apiVersion: v1
              kind: ConfigMap
              data:
                domain: example.com
            results:
            - message: done
              severity: info
        "});
    }

    #[test]
    fn standalone_stream() {
        let input = indoc! {"
            apiVersion: v1
            kind: Service
            metadata:
              name: a
            ---
            apiVersion: v1
            kind: Service
            metadata:
              name: b
        "};

        let list = ResourceList::parse(input).expect("stream is valid");
        assert!(list.standalone);
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.to_yaml().expect("stream can be written"), input);
    }

    #[test]
    fn existing_results_are_kept() {
        let input = indoc! {"
            apiVersion: config.kubernetes.io/v1
            kind: ResourceList
            items: []
            results:
            - message: earlier failure
              severity: error
        "};

        let list = ResourceList::parse(input).expect("ResourceList is valid");
        assert_eq!(list.results[0].severity, Severity::Error);
        assert!(list.has_errors());
    }

    #[test]
    fn rejects_scalar_items() {
        let error = ResourceList::parse("- a\n- b\n");
        assert!(error.is_err());

        let error = ResourceList::parse("just a string").expect_err("scalar is not a resource");
        assert!(matches!(error, Error::InvalidItem { index: 0, .. }));
    }
}
