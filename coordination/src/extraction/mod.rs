//! Parameter extraction: the correction loop applied to structured documents
//!
//! The artifact is a two-section parameter document (initial-conditions
//! generator + evolution engine) and "execution" is schema validation. The
//! [`ParameterJudge`] plugs into the same [`CorrectionLoop`](crate::feedback::CorrectionLoop)
//! that runs scripts.

pub mod document;
pub mod schema;
pub mod validator;
pub mod writer;

pub use document::{parse_document, recover_json, DocumentStatus, ParameterDocument};
pub use schema::{FieldKind, FieldSpec, ParameterSchema, SectionSchema};
pub use validator::{
    validate, ParamValue, ParameterEntry, ParameterJudge, ValidatedParameters, ValidatedSection,
};
pub use writer::{
    clear_results, diagnostics_path, render_param_file, report_path, result_paths,
    write_diagnostics, write_parameters, write_report, ParameterFiles, SectionFiles,
};
