//! Context Packer: builds the per-attempt context bundle
//!
//! Handles both the initial bundle (task, output constraints, retrieved
//! references) and retry bundles, which add a corrective section derived from
//! the most recent failed attempt only.

pub mod assembler;
pub mod corpus;

pub use assembler::{ContextAssembler, ContextBundle, DiagnosticSection, DEFAULT_TOP_K};
pub use corpus::{
    chunk_text, ReferenceCorpus, ReferenceSnippet, RetrievedSnippet, DEFAULT_CHUNK_LINES,
};
