//! Field spec matching and value substitution for KRM resources.
//!
//! The building blocks are:
//!
//! * [`FieldSpec`]s, which select a path inside resources of a given
//!   [`Gvk`], resolved by the [`matcher`],
//! * [`CapturePattern`]s, which extract `prefix`, `suffix` and other
//!   groups from the current value of a field,
//! * the [`FieldValueEngine`], which composes new values and writes them
//!   back,
//! * and the [`backref`] module, which propagates renames to every field
//!   referring to the renamed resource.
pub mod backref;
pub mod capture;
pub mod fieldspec;
pub mod gvk;
pub mod matcher;
pub mod node;
pub mod path;
pub mod resource;
pub mod result;
pub mod substitute;

pub use crate::{
    backref::{BackReference, BackReferenceTable, KubernetesScope, ReferenceScope, Rename, Unscoped},
    capture::{CaptureGroups, CapturePattern, PatternError},
    fieldspec::{FieldSpec, FieldSpecError, FieldSpecs, MergeError},
    gvk::{Gvk, GvkError, ResourceId},
    path::{FieldPath, PathError, PathPattern, Step},
    resource::Resource,
    result::{MutationResult, Report, ResultItem, Severity},
    substitute::{FieldValueEngine, SubstituteError, Template, apply_all},
};
