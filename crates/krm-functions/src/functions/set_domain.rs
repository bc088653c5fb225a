//! `set-domain`: replaces the domain of group members.
use indoc::indoc;
use krm_fieldspec::{FieldSpecs, FieldValueEngine, Report, Resource};
use serde::Deserialize;
use snafu::ensure;

use super::{builtin, with_overrides};
use crate::{
    config::{ConfigError, FunctionConfig, MissingKeySnafu},
    driver::{Configured, KrmFunction},
};

pub const DOMAIN_KEY: &str = "domain";

const DOMAIN_FIELD_SPECS: &str = indoc! {r"
    # Blueprint iam-location
    - path: spec/member
      regexPattern: (?P<prefix>group:\S+@)(?P<domain>\S+)
      group: iam.cnrm.cloud.google.com
      version: v1beta1
      kind: IAMPolicyMember
"};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetDomainConfig {
    domain: String,

    #[serde(default)]
    domains: Option<FieldSpecs>,
}

#[derive(Debug)]
pub struct SetDomain {
    engine: FieldValueEngine,
}

impl KrmFunction for SetDomain {
    const NAME: &'static str = "set-domain";

    fn configure(config: &FunctionConfig) -> Result<Configured<Self>, ConfigError> {
        let (domain, overrides) = match config.structured::<SetDomainConfig>("SetDomain")? {
            Some(structured) => (structured.domain, structured.domains),
            None => (config.required(DOMAIN_KEY)?.to_owned(), None),
        };
        ensure!(!domain.is_empty(), MissingKeySnafu { key: DOMAIN_KEY });

        let specs = with_overrides(
            builtin(DOMAIN_FIELD_SPECS, "domain field specs")?,
            overrides,
        );
        Ok(Configured::Ready(Self {
            engine: FieldValueEngine::new(&specs, DOMAIN_KEY, domain),
        }))
    }

    fn apply(&self, resources: &mut [Resource]) -> Report {
        self.engine.apply(resources)
    }
}
