//! `set-location`: moves GCP resources to another region or zone.
use indoc::indoc;
use krm_fieldspec::{FieldSpecs, FieldValueEngine, Report, Resource, apply_all};
use serde::Deserialize;
use snafu::ensure;

use super::{builtin, with_overrides};
use crate::{
    config::{ConfigError, FunctionConfig, UnknownRegionSnafu, UnknownZoneSnafu},
    driver::{Configured, KrmFunction},
};

pub const REGION_KEY: &str = "region";
pub const ZONE_KEY: &str = "zone";

const REGION_FIELD_SPECS: &str = indoc! {r"
    # Storage and BigQueryDataset instances.
    - path: spec/location
      version: v1beta1

    - path: spec/region
      group: redis.cnrm.cloud.google.com
      version: v1beta1
      kind: RedisInstance

    - path: spec/config
      group: spanner.cnrm.cloud.google.com
      version: v1beta1
      kind: SpannerInstance
      regexPattern: (?P<prefix>regional-)(?P<location>\S+)
"};

const ZONE_FIELD_SPECS: &str = indoc! {"
    - path: spec/zone
      group: compute.cnrm.cloud.google.com
      version: v1beta1
      kind: ComputeInstance
"};

/// Google Cloud regions.
const REGIONS: &[&str] = &[
    "africa-south1",
    "asia-east1",
    "asia-east2",
    "asia-northeast1",
    "asia-northeast2",
    "asia-northeast3",
    "asia-south1",
    "asia-south2",
    "asia-southeast1",
    "asia-southeast2",
    "australia-southeast1",
    "australia-southeast2",
    "europe-central2",
    "europe-north1",
    "europe-southwest1",
    "europe-west1",
    "europe-west2",
    "europe-west3",
    "europe-west4",
    "europe-west6",
    "europe-west8",
    "europe-west9",
    "europe-west10",
    "europe-west12",
    "me-central1",
    "me-central2",
    "me-west1",
    "northamerica-northeast1",
    "northamerica-northeast2",
    "southamerica-east1",
    "southamerica-west1",
    "us-central1",
    "us-east1",
    "us-east4",
    "us-east5",
    "us-south1",
    "us-west1",
    "us-west2",
    "us-west3",
    "us-west4",
];

pub fn is_known_region(region: &str) -> bool {
    REGIONS.contains(&region)
}

/// A zone is a known region followed by a single letter, e.g. `us-east1-b`.
pub fn is_known_zone(zone: &str) -> bool {
    zone.rsplit_once('-').is_some_and(|(region, letter)| {
        is_known_region(region)
            && letter.len() == 1
            && letter.bytes().all(|b| b.is_ascii_lowercase())
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetLocationConfig {
    #[serde(default)]
    region: String,

    #[serde(default)]
    zone: String,

    #[serde(default)]
    regions: Option<FieldSpecs>,

    #[serde(default)]
    zones: Option<FieldSpecs>,
}

#[derive(Debug)]
pub struct SetLocation {
    engines: Vec<FieldValueEngine>,
}

impl KrmFunction for SetLocation {
    const NAME: &'static str = "set-location";

    fn configure(config: &FunctionConfig) -> Result<Configured<Self>, ConfigError> {
        let structured = match config.structured::<SetLocationConfig>("SetLocation")? {
            Some(structured) => structured,
            None => {
                config.data()?;
                SetLocationConfig {
                    region: config.optional(REGION_KEY).unwrap_or_default().to_owned(),
                    zone: config.optional(ZONE_KEY).unwrap_or_default().to_owned(),
                    ..SetLocationConfig::default()
                }
            }
        };

        if !structured.region.is_empty() {
            ensure!(
                is_known_region(&structured.region),
                UnknownRegionSnafu {
                    region: &structured.region
                }
            );
        }
        if !structured.zone.is_empty() {
            ensure!(
                is_known_zone(&structured.zone),
                UnknownZoneSnafu {
                    zone: &structured.zone
                }
            );
        }

        let mut engines = Vec::new();
        if !structured.region.is_empty() {
            let specs = with_overrides(
                builtin(REGION_FIELD_SPECS, "region field specs")?,
                structured.regions,
            );
            engines.push(FieldValueEngine::new(&specs, REGION_KEY, structured.region));
        }
        if !structured.zone.is_empty() {
            let specs = with_overrides(
                builtin(ZONE_FIELD_SPECS, "zone field specs")?,
                structured.zones,
            );
            engines.push(FieldValueEngine::new(&specs, ZONE_KEY, structured.zone));
        }

        if engines.is_empty() {
            return Ok(Configured::NoOp {
                reason: "neither `region` nor `zone` is given".to_owned(),
            });
        }
        Ok(Configured::Ready(Self { engines }))
    }

    fn apply(&self, resources: &mut [Resource]) -> Report {
        apply_all(&self.engines, resources)
    }
}

#[cfg(test)]
mod tests {
    use krm_fieldspec::{FieldPath, Severity};
    use rstest::rstest;

    use super::*;
    use crate::{driver, resource_list::ResourceList};

    const INPUT: &str = indoc! {"
        apiVersion: config.kubernetes.io/v1
        kind: ResourceList
        items:
        - apiVersion: storage.cnrm.cloud.google.com/v1beta1
          kind: StorageBucket
          metadata:
            name: bucket
          spec:
            location: US
        - apiVersion: spanner.cnrm.cloud.google.com/v1beta1
          kind: SpannerInstance
          metadata:
            name: spanner
          spec:
            config: regional-us-west1
        - apiVersion: compute.cnrm.cloud.google.com/v1beta1
          kind: ComputeInstance
          metadata:
            name: vm
          spec:
            zone: us-west1-a
    "};

    fn run(data: &str) -> ResourceList {
        let mut list = ResourceList::parse(INPUT).expect("ResourceList is valid");
        list.function_config = Some(
            serde_yaml::from_str(&format!("apiVersion: v1\nkind: ConfigMap\ndata: {data}\n"))
                .expect("config is valid YAML"),
        );
        driver::run::<SetLocation>(&mut list);
        list
    }

    fn get<'a>(list: &'a ResourceList, index: usize, path: &[&str]) -> Option<&'a str> {
        list.items[index]
            .get(&path.iter().copied().collect::<FieldPath>())
            .and_then(serde_yaml::Value::as_str)
    }

    #[rstest]
    #[case("us-east1", true)]
    #[case("europe-west10", true)]
    #[case("us-east1-b", false)]
    #[case("mars-north1", false)]
    fn regions(#[case] region: &str, #[case] known: bool) {
        assert_eq!(is_known_region(region), known);
    }

    #[rstest]
    #[case("us-east1-b", true)]
    #[case("asia-southeast2-c", true)]
    #[case("us-east1", false)]
    #[case("us-east1-bb", false)]
    #[case("mars-north1-a", false)]
    fn zones(#[case] zone: &str, #[case] known: bool) {
        assert_eq!(is_known_zone(zone), known);
    }

    #[test]
    fn sets_region_and_zone() {
        let list = run("{region: us-east1, zone: us-east1-b}");

        assert_eq!(get(&list, 0, &["spec", "location"]), Some("us-east1"));
        assert_eq!(get(&list, 1, &["spec", "config"]), Some("regional-us-east1"));
        assert_eq!(get(&list, 2, &["spec", "zone"]), Some("us-east1-b"));
        assert!(!list.has_errors());
    }

    #[test]
    fn results_follow_document_order() {
        let mut list = ResourceList::parse(indoc! {"
            apiVersion: config.kubernetes.io/v1
            kind: ResourceList
            items:
            - apiVersion: compute.cnrm.cloud.google.com/v1beta1
              kind: ComputeInstance
              metadata:
                name: first-doc
              spec:
                zone: us-west1-a
            - apiVersion: storage.cnrm.cloud.google.com/v1beta1
              kind: StorageBucket
              metadata:
                name: second-doc
              spec:
                location: US
            functionConfig:
              apiVersion: v1
              kind: ConfigMap
              data:
                region: us-east1
                zone: us-east1-b
        "})
        .expect("ResourceList is valid");

        driver::run::<SetLocation>(&mut list);

        let changed: Vec<_> = list
            .results
            .iter()
            .filter_map(|result| result.resource_ref.as_ref())
            .map(|resource| resource.name.as_str())
            .collect();
        assert_eq!(changed, ["first-doc", "second-doc"]);
        assert_eq!(
            list.results.last().map(|result| result.message.as_str()),
            Some("set-location: changed 2 fields")
        );
    }

    #[test]
    fn region_only_leaves_zones_alone() {
        let list = run("{region: us-east1}");

        assert_eq!(get(&list, 0, &["spec", "location"]), Some("us-east1"));
        assert_eq!(get(&list, 2, &["spec", "zone"]), Some("us-west1-a"));
    }

    #[rstest]
    #[case("{region: mars-north1}", "unknown region \"mars-north1\"")]
    #[case("{zone: us-east1}", "unknown zone \"us-east1\"")]
    fn rejects_unknown_locations(#[case] data: &str, #[case] expected: &str) {
        let list = run(data);

        assert_eq!(list.results.len(), 1);
        assert_eq!(list.results[0].message, expected);
        assert_eq!(get(&list, 0, &["spec", "location"]), Some("US"));
    }

    #[test]
    fn neither_region_nor_zone() {
        let list = run("{other: value}");

        assert_eq!(list.results.len(), 1);
        assert_eq!(list.results[0].severity, Severity::Info);
        assert_eq!(list.results[0].message, "neither `region` nor `zone` is given");
    }
}
