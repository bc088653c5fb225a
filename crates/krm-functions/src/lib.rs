//! A catalog of KRM functions operating on `ResourceList`s.
//!
//! Every function implements [`KrmFunction`] and is run through
//! [`driver::run`], which parses the function config, applies the function
//! and appends its results to the list.
pub mod config;
pub mod driver;
pub mod functions;
pub mod logging;
pub mod resource_list;
pub mod yaml;

pub use crate::{
    config::{ConfigError, FunctionConfig},
    driver::{Configured, KrmFunction, Phase},
    functions::FunctionKind,
    resource_list::ResourceList,
};
