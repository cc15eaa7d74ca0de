//! Required-field schema for parameter documents
//!
//! A schema is a list of sections, each a list of field specs. The built-in
//! [`ParameterSchema::mp_gadget`] schema covers the MP-GenIC and MP-Gadget
//! parameters every run needs; other schemas can be loaded from TOML:
//!
//! ```toml
//! [[sections]]
//! name = "genic"
//!
//! [[sections.fields]]
//! name = "Redshift"
//! kind = "number"
//! min = 0.0
//! max = 1100.0
//! ```

use crate::error::{CoordinationError, CoordinationResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Expected value type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Number,
    Integer,
    Text,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number => write!(f, "number"),
            Self::Integer => write!(f, "integer"),
            Self::Text => write!(f, "text"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Inclusive lower bound for numeric kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound for numeric kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Unit shown in diagnostics (e.g. "kpc/h")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl FieldSpec {
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Text,
            min: None,
            max: None,
            unit: None,
        }
    }

    pub fn number(name: &str, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Number,
            min: Some(min),
            max: Some(max),
            unit: None,
        }
    }

    pub fn integer(name: &str, min: f64, max: f64) -> Self {
        Self {
            kind: FieldKind::Integer,
            ..Self::number(name, min, max)
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    /// Human-readable plausible range, if any.
    pub fn range(&self) -> Option<String> {
        let unit = self
            .unit
            .as_deref()
            .map(|u| format!(" {}", u))
            .unwrap_or_default();
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some(format!("[{}, {}]{}", min, max, unit)),
            (Some(min), None) => Some(format!(">= {}{}", min, unit)),
            (None, Some(max)) => Some(format!("<= {}{}", max, unit)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl SectionSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub sections: Vec<SectionSchema>,
}

impl ParameterSchema {
    /// Required fields for an MP-GenIC + MP-Gadget run (lengths in kpc/h).
    pub fn mp_gadget() -> Self {
        let cosmology = || {
            vec![
                FieldSpec::number("Omega0", 0.0, 1.0),
                FieldSpec::number("OmegaLambda", 0.0, 1.0),
                FieldSpec::number("HubbleParam", 0.2, 1.5),
                FieldSpec::number("BoxSize", 1.0, 1.0e8).with_unit("kpc/h"),
            ]
        };

        let mut genic = vec![
            FieldSpec::text("OutputDir"),
            FieldSpec::text("FileWithInputSpectrum"),
            FieldSpec::text("FileBase"),
            FieldSpec::integer("Nmesh", 8.0, 16_384.0),
            FieldSpec::number("Redshift", 0.0, 1_100.0),
        ];
        genic.extend(cosmology());

        let mut gadget = vec![
            FieldSpec::text("InitCondFile"),
            FieldSpec::text("OutputDir"),
            FieldSpec::number("TimeMax", 1.0e-4, 1.0).with_unit("scale factor"),
            FieldSpec::text("OutputList"),
        ];
        gadget.extend(cosmology());

        Self {
            sections: vec![
                SectionSchema {
                    name: "genic".into(),
                    fields: genic,
                },
                SectionSchema {
                    name: "gadget".into(),
                    fields: gadget,
                },
            ],
        }
    }

    pub fn from_toml_str(text: &str) -> CoordinationResult<Self> {
        let schema: Self = toml::from_str(text)?;
        schema.check()?;
        Ok(schema)
    }

    pub fn load(path: &Path) -> CoordinationResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn section(&self, name: &str) -> Option<&SectionSchema> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    fn check(&self) -> CoordinationResult<()> {
        if self.sections.is_empty() {
            return Err(CoordinationError::Schema("schema declares no sections".into()));
        }
        let mut names = HashSet::new();
        for section in &self.sections {
            if !names.insert(section.name.as_str()) {
                return Err(CoordinationError::Schema(format!(
                    "section `{}` declared twice",
                    section.name
                )));
            }
            let mut fields = HashSet::new();
            for field in &section.fields {
                if !fields.insert(field.name.as_str()) {
                    return Err(CoordinationError::Schema(format!(
                        "field `{}.{}` declared twice",
                        section.name, field.name
                    )));
                }
                if let (Some(min), Some(max)) = (field.min, field.max) {
                    if min > max {
                        return Err(CoordinationError::Schema(format!(
                            "field `{}.{}` has min {} above max {}",
                            section.name, field.name, min, max
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::mp_gadget()
    }
}
