//! `set-default-name`: names GCP resources and updates every reference to
//! the previous names.
use indoc::indoc;
use krm_fieldspec::{
    BackReferenceTable, FieldSpecs, FieldValueEngine, KubernetesScope, Rename, Report, Resource,
    backref,
};
use serde::Deserialize;
use snafu::{ResultExt, ensure};
use tracing::info;

use super::{builtin, with_overrides};
use crate::{
    config::{ConfigError, FunctionConfig, MergeFieldSpecsSnafu, MissingKeySnafu},
    driver::{Configured, KrmFunction},
};

pub const NAME_KEY: &str = "name";

const CUSTOM_META_NAME_FIELD_SPECS: &str = indoc! {"
    - path: metadata/name
      group: storage.cnrm.cloud.google.com

    - path: metadata/name
      group: serviceusage.cnrm.cloud.google.com

    - path: metadata/name
      group: redis.cnrm.cloud.google.com

    - path: metadata/name
      group: spanner.cnrm.cloud.google.com
"};

/// Where Kubernetes resources refer to each other by name.
const NAME_REFERENCES: &str = indoc! {"
    - kind: ConfigMap
      version: v1
      fieldSpecs:
      - path: spec/volumes/configMap/name
        version: v1
        kind: Pod
      - path: spec/containers/env/valueFrom/configMapKeyRef/name
        version: v1
        kind: Pod
      - path: spec/initContainers/env/valueFrom/configMapKeyRef/name
        version: v1
        kind: Pod
      - path: spec/containers/envFrom/configMapRef/name
        version: v1
        kind: Pod
      - path: spec/template/spec/volumes/configMap/name
        kind: Deployment
      - path: spec/template/spec/containers/env/valueFrom/configMapKeyRef/name
        kind: Deployment
      - path: spec/template/spec/containers/envFrom/configMapRef/name
        kind: Deployment
      - path: spec/template/spec/volumes/configMap/name
        kind: StatefulSet
      - path: spec/template/spec/volumes/configMap/name
        kind: DaemonSet
      - path: spec/template/spec/volumes/configMap/name
        kind: Job
      - path: spec/jobTemplate/spec/template/spec/volumes/configMap/name
        kind: CronJob

    - kind: Secret
      version: v1
      fieldSpecs:
      - path: spec/volumes/secret/secretName
        version: v1
        kind: Pod
      - path: spec/containers/env/valueFrom/secretKeyRef/name
        version: v1
        kind: Pod
      - path: spec/imagePullSecrets/name
        version: v1
        kind: Pod
      - path: spec/template/spec/volumes/secret/secretName
        kind: Deployment
      - path: spec/template/spec/containers/env/valueFrom/secretKeyRef/name
        kind: Deployment
      - path: spec/template/spec/containers/envFrom/secretRef/name
        kind: Deployment
      - path: spec/template/spec/imagePullSecrets/name
        kind: Deployment
      - path: spec/template/spec/volumes/secret/secretName
        kind: StatefulSet
      - path: spec/tls/secretName
        kind: Ingress
      - path: imagePullSecrets/name
        kind: ServiceAccount

    - kind: ServiceAccount
      version: v1
      fieldSpecs:
      - path: subjects/name
        kind: RoleBinding
      - path: subjects/name
        kind: ClusterRoleBinding
      - path: spec/serviceAccountName
        version: v1
        kind: Pod
      - path: spec/template/spec/serviceAccountName
        kind: Deployment
      - path: spec/template/spec/serviceAccountName
        kind: StatefulSet
      - path: spec/template/spec/serviceAccountName
        kind: DaemonSet
      - path: spec/template/spec/serviceAccountName
        kind: Job
      - path: spec/jobTemplate/spec/template/spec/serviceAccountName
        kind: CronJob

    - kind: Role
      group: rbac.authorization.k8s.io
      fieldSpecs:
      - path: roleRef/name
        kind: RoleBinding
        group: rbac.authorization.k8s.io

    - kind: ClusterRole
      group: rbac.authorization.k8s.io
      fieldSpecs:
      - path: roleRef/name
        kind: RoleBinding
        group: rbac.authorization.k8s.io
      - path: roleRef/name
        kind: ClusterRoleBinding
        group: rbac.authorization.k8s.io

    - kind: Service
      version: v1
      fieldSpecs:
      - path: spec/serviceName
        kind: StatefulSet
        group: apps
      - path: spec/rules/http/paths/backend/service/name
        kind: Ingress

    - kind: PersistentVolumeClaim
      version: v1
      fieldSpecs:
      - path: spec/volumes/persistentVolumeClaim/claimName
        version: v1
        kind: Pod
      - path: spec/template/spec/volumes/persistentVolumeClaim/claimName
        kind: Deployment
      - path: spec/template/spec/volumes/persistentVolumeClaim/claimName
        kind: StatefulSet

    - kind: Deployment
      fieldSpecs:
      - path: spec/scaleTargetRef/name
        kind: HorizontalPodAutoscaler
"};

/// Where Config Connector resources refer to each other by name.
const GCP_NAME_REFERENCES: &str = indoc! {"
    - kind: RedisInstance
      fieldSpecs:
      - path: spec/displayName
        kind: RedisInstance

    - kind: SpannerInstance
      fieldSpecs:
      - path: spec/displayName
        kind: SpannerInstance
      - path: spec/instanceRef/name
        kind: SpannerDatabase

    - kind: LoggingLogSink
      fieldSpecs:
      - path: spec/memberFrom/logSinkRef/name
        kind: IAMPolicyMember
        group: iam.cnrm.cloud.google.com

    - kind: PubSubTopic
      fieldSpecs:
      - path: spec/destination/pubSubTopicRef/name
        kind: LoggingLogSink
      - path: spec/memberFrom/resourceRef/name
        kind: IAMPolicyMember

    - kind: BigQueryDataset
      fieldSpecs:
      - path: spec/destination/bigQueryDatasetRef/name
        kind: LoggingLogSink
"};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetDefaultNameConfig {
    name: String,

    #[serde(default)]
    custom_meta_name: Option<FieldSpecs>,

    #[serde(default)]
    name_reference: Option<BackReferenceTable>,
}

#[derive(Debug)]
pub struct SetDefaultName {
    names: FieldValueEngine,
    references: BackReferenceTable,
}

impl KrmFunction for SetDefaultName {
    const INCLUDE_LOCAL_CONFIG: bool = false;
    const NAME: &'static str = "set-default-name";

    fn configure(config: &FunctionConfig) -> Result<Configured<Self>, ConfigError> {
        let (name, name_overrides, reference_overrides) =
            match config.structured::<SetDefaultNameConfig>("SetDefaultName")? {
                Some(structured) => (
                    structured.name,
                    structured.custom_meta_name,
                    structured.name_reference,
                ),
                None => (config.required(NAME_KEY)?.to_owned(), None, None),
            };
        ensure!(!name.is_empty(), MissingKeySnafu { key: NAME_KEY });

        let names = with_overrides(
            builtin(CUSTOM_META_NAME_FIELD_SPECS, "name field specs")?,
            name_overrides,
        );

        let mut references = builtin::<BackReferenceTable>(NAME_REFERENCES, "name references")?
            .merged(&builtin(GCP_NAME_REFERENCES, "GCP name references")?)
            .context(MergeFieldSpecsSnafu)?;
        if let Some(overrides) = reference_overrides {
            references = references.merged(&overrides).context(MergeFieldSpecsSnafu)?;
        }

        Ok(Configured::Ready(Self {
            names: FieldValueEngine::new(&names, NAME_KEY, name),
            references,
        }))
    }

    fn apply(&self, resources: &mut [Resource]) -> Report {
        let mut report = self.names.apply(resources);

        let renames: Vec<Rename> = resources.iter().filter_map(Rename::of).collect();
        info!(renames = renames.len(), "propagating renames");
        report.extend(backref::propagate_all(
            resources,
            &self.references,
            &renames,
            &KubernetesScope,
        ));
        report
    }
}
