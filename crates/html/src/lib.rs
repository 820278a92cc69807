#![allow(
    clippy::missing_docs_in_private_items,
    reason = "Internal implementation details don't need public documentation"
)]
#![allow(
    clippy::missing_inline_in_public_items,
    reason = "Inlining decisions left to compiler for this crate"
)]

//! Host document model and inert markup parsing.
//!
//! The [`dom::Document`] is the shared page the orchestrator mutates; the
//! [`parser`] turns third-party markup into detached nodes in that document
//! without running any of the scripts it contains.

pub mod dom;
pub mod parser;

pub use dom::{DOMNode, Document, DomError, NodeKind};
pub use indextree::NodeId;
pub use parser::{ParsedMarkup, ScriptDescriptor, ScriptKind, ScriptSource, parse_markup};
