//! `set-annotations`: adds annotations to resources and the pod templates
//! of workloads.
use std::collections::BTreeMap;

use krm_fieldspec::{FieldSpec, FieldValueEngine, Report, Resource, apply_all};
use serde::Deserialize;
use snafu::{ResultExt, ensure};

use super::{annotation_field_specs, escape_key, workload_annotation_maps};
use crate::{
    config::{
        ConfigError, DeprecatedFieldSpecsSnafu, EmptyAnnotationsSnafu, FunctionConfig,
        InvalidFieldSpecSnafu, MergeFieldSpecsSnafu,
    },
    driver::{Configured, KrmFunction},
};

const BINDING: &str = "annotation";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetAnnotationConfig {
    #[serde(default)]
    annotations: BTreeMap<String, String>,

    #[serde(default)]
    additional_annotation_fields: Option<Vec<FieldSpec>>,

    /// Deprecated name of `additionalAnnotationFields`.
    #[serde(default)]
    field_specs: Option<Vec<FieldSpec>>,
}

#[derive(Debug)]
pub struct SetAnnotations {
    engines: Vec<FieldValueEngine>,
}

impl KrmFunction for SetAnnotations {
    const NAME: &'static str = "set-annotations";

    fn configure(config: &FunctionConfig) -> Result<Configured<Self>, ConfigError> {
        let structured = match config.structured::<SetAnnotationConfig>("SetAnnotationConfig")? {
            Some(structured) => structured,
            None => SetAnnotationConfig {
                annotations: config.data()?.clone(),
                ..SetAnnotationConfig::default()
            },
        };

        ensure!(
            structured.additional_annotation_fields.is_none() || structured.field_specs.is_none(),
            DeprecatedFieldSpecsSnafu
        );
        ensure!(!structured.annotations.is_empty(), EmptyAnnotationsSnafu);

        let additional_fields = structured
            .additional_annotation_fields
            .or(structured.field_specs)
            .unwrap_or_default();

        let maps = workload_annotation_maps();
        let mut engines = Vec::new();
        for (key, value) in structured.annotations {
            let mut specs = annotation_field_specs(&maps, &key, true)?;
            for field in &additional_fields {
                let spec = FieldSpec::new(
                    field.gvk.clone(),
                    &format!("{}/{}", field.path.as_str(), escape_key(&key)),
                )
                .context(InvalidFieldSpecSnafu)?
                .with_create(field.create);
                specs.merge_one(spec).context(MergeFieldSpecsSnafu)?;
            }
            engines.push(FieldValueEngine::new(&specs, BINDING, value));
        }

        Ok(Configured::Ready(Self { engines }))
    }

    fn apply(&self, resources: &mut [Resource]) -> Report {
        apply_all(&self.engines, resources)
    }
}
