//! Artifacts: classification, participation rules, branch-specific paths and
//! the document shapes of flows, apps and raw apps.

pub mod app;
pub mod assemble;
pub mod branch;
pub mod document;
pub mod filter;
pub mod flow;
pub mod inline;
pub mod kind;
pub mod validate;

pub use branch::SpecificItems;
pub use document::DocumentFormat;
pub use filter::{IgnoreRules, Skips};
pub use kind::{classify, ArtifactKind, TriggerKind};
pub use validate::{DocumentValidator, SchemaValidator, ValidationTarget};

/// A file split out of a structured document, path relative to the
/// document's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineFile {
    pub path: String,
    pub content: String,
}
