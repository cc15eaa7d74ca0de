//! Schema validation for parameter documents
//!
//! Validation is the "execution" step of parameter extraction. It checks field
//! presence, type conformance and plausible ranges, lists every problem it
//! finds, and reports the category of the most fundamental one
//! (missing-field before type-mismatch before out-of-range).

use crate::extraction::document::{parse_document, recover_json, DocumentStatus, ParameterDocument};
use crate::extraction::schema::{FieldKind, FieldSpec, ParameterSchema};
use crate::feedback::correction_loop::{Judge, Judgement};
use crate::feedback::outcome::{Failure, FailureCategory};
use crate::task::TaskSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A scalar parameter value after type coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Number(f64),
    Text(String),
}

impl ParamValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    fn from_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Number(n.as_f64()?),
            }),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Bool(b) => Some(Self::Integer(i64::from(*b))),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{}", i),
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub name: String,
    pub value: ParamValue,
}

/// One section of a validated document, schema fields first, extras after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedSection {
    pub name: String,
    pub entries: Vec<ParameterEntry>,
}

impl ValidatedSection {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.value)
    }

    pub fn to_json_map(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|e| {
                let value = serde_json::to_value(&e.value).unwrap_or(Value::Null);
                (e.name.clone(), value)
            })
            .collect()
    }
}

/// A document that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedParameters {
    pub sections: Vec<ValidatedSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ValidatedParameters {
    pub fn section(&self, name: &str) -> Option<&ValidatedSection> {
        self.sections.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone)]
struct Problem {
    category: FailureCategory,
    detail: String,
}

impl Problem {
    fn new(category: FailureCategory, detail: String) -> Self {
        Self { category, detail }
    }
}

fn severity(category: FailureCategory) -> u8 {
    match category {
        FailureCategory::MissingField => 0,
        FailureCategory::TypeMismatch => 1,
        FailureCategory::OutOfRange => 2,
        _ => 3,
    }
}

/// Validate `document` against `schema`.
pub fn validate(
    document: &ParameterDocument,
    schema: &ParameterSchema,
) -> Result<ValidatedParameters, Failure> {
    let mut problems: Vec<Problem> = Vec::new();

    if document.status == DocumentStatus::Incomplete {
        if document.missing_parameters.is_empty() {
            problems.push(Problem::new(
                FailureCategory::MissingField,
                "the document declares itself incomplete without naming the missing parameters"
                    .into(),
            ));
        }
        for name in &document.missing_parameters {
            problems.push(Problem::new(
                FailureCategory::MissingField,
                format!("{} (declared missing by the document)", name),
            ));
        }
    }

    let mut sections = Vec::with_capacity(schema.sections.len());
    for section_schema in &schema.sections {
        let Some(values) = document.section(&section_schema.name) else {
            problems.push(Problem::new(
                FailureCategory::MissingField,
                format!("section `{}` is missing", section_schema.name),
            ));
            continue;
        };

        let mut entries = Vec::new();
        for field in &section_schema.fields {
            let qualified = format!("{}.{}", section_schema.name, field.name);
            match values.get(&field.name) {
                None | Some(Value::Null) => problems.push(Problem::new(
                    FailureCategory::MissingField,
                    format!("{} is required", qualified),
                )),
                Some(raw) => match coerce(field, raw) {
                    Err(problem) => problems.push(problem.qualify(&qualified)),
                    Ok(value) => match range_problem(field, &value) {
                        Some(problem) => problems.push(problem.qualify(&qualified)),
                        None => entries.push(ParameterEntry {
                            name: field.name.clone(),
                            value,
                        }),
                    },
                },
            }
        }

        for (name, raw) in values {
            if section_schema.field(name).is_some() || raw.is_null() {
                continue;
            }
            match ParamValue::from_scalar(raw) {
                Some(value) => entries.push(ParameterEntry {
                    name: name.clone(),
                    value,
                }),
                None => problems.push(Problem::new(
                    FailureCategory::TypeMismatch,
                    format!(
                        "{}.{} must be a single number or string, got {}",
                        section_schema.name, name, raw
                    ),
                )),
            }
        }

        sections.push(ValidatedSection {
            name: section_schema.name.clone(),
            entries,
        });
    }

    if problems.is_empty() {
        return Ok(ValidatedParameters {
            sections,
            comment: document.comment.clone(),
        });
    }

    // Stable: problems of equal severity keep schema order
    problems.sort_by_key(|p| severity(p.category));
    let details: Vec<&str> = problems.iter().map(|p| p.detail.as_str()).collect();
    Err(Failure::new(
        problems[0].category,
        format!(
            "{} problem(s) in the parameter document:\n- {}",
            problems.len(),
            details.join("\n- ")
        ),
    ))
}

/// Problem detail before the field name is known.
struct FieldProblem {
    category: FailureCategory,
    detail: String,
}

impl FieldProblem {
    fn qualify(self, qualified: &str) -> Problem {
        Problem::new(self.category, format!("{} {}", qualified, self.detail))
    }
}

fn coerce(field: &FieldSpec, raw: &Value) -> Result<ParamValue, FieldProblem> {
    let mismatch = || FieldProblem {
        category: FailureCategory::TypeMismatch,
        detail: format!("must be {}, got {}", article(field.kind), raw),
    };

    match field.kind {
        FieldKind::Text => match raw {
            Value::String(s) if s.trim().is_empty() => Err(FieldProblem {
                category: FailureCategory::MissingField,
                detail: "is empty".into(),
            }),
            Value::String(s) => Ok(ParamValue::Text(s.clone())),
            Value::Number(n) => Ok(ParamValue::Text(n.to_string())),
            _ => Err(mismatch()),
        },
        FieldKind::Number => {
            let number = match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number
                .filter(|n| n.is_finite())
                .map(ParamValue::Number)
                .ok_or_else(mismatch)
        }
        FieldKind::Integer => {
            let number = match raw {
                Value::Number(n) => n.as_i64().map(|i| i as f64).or_else(|| n.as_f64()),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number
                .filter(|n| n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64)
                .map(|n| ParamValue::Integer(n as i64))
                .ok_or_else(mismatch)
        }
    }
}

fn range_problem(field: &FieldSpec, value: &ParamValue) -> Option<FieldProblem> {
    let number = value.as_f64()?;
    let below = field.min.is_some_and(|min| number < min);
    let above = field.max.is_some_and(|max| number > max);
    if !(below || above) {
        return None;
    }
    Some(FieldProblem {
        category: FailureCategory::OutOfRange,
        detail: format!(
            "= {} is outside the plausible range {}",
            value,
            field.range().unwrap_or_default()
        ),
    })
}

fn article(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Number => "a number",
        FieldKind::Integer => "an integer",
        FieldKind::Text => "a string",
    }
}

/// Judges parameter documents by schema validation.
#[derive(Debug, Clone)]
pub struct ParameterJudge {
    schema: Arc<ParameterSchema>,
}

impl ParameterJudge {
    pub fn new(schema: Arc<ParameterSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }
}

impl Default for ParameterJudge {
    fn default() -> Self {
        Self::new(Arc::new(ParameterSchema::mp_gadget()))
    }
}

#[async_trait]
impl Judge for ParameterJudge {
    type Artifact = ValidatedParameters;

    fn candidate(&self, completion: &str) -> Result<String, Failure> {
        let value = recover_json(completion)?;
        if !value.is_object() {
            return Err(Failure::generation(
                "the reply must be a JSON object with one object per parameter section",
            ));
        }
        serde_json::to_string_pretty(&value).map_err(|e| Failure::generation(e.to_string()))
    }

    async fn judge(&self, candidate: &str, _task: &TaskSpec) -> Judgement<ValidatedParameters> {
        let verdict = parse_document(candidate).and_then(|doc| validate(&doc, &self.schema));
        let transcript = match &verdict {
            Ok(params) => format!(
                "validated {} section(s), {} parameter(s)",
                params.sections.len(),
                params.sections.iter().map(|s| s.entries.len()).sum::<usize>()
            ),
            Err(failure) => failure.message.clone(),
        };
        Judgement {
            verdict,
            transcript,
        }
    }
}
