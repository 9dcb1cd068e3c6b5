//! Field schemas for structured extraction.

use crate::error::RagError;
use crate::keywords::lexicon_for_field;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    /// Free-form hint passed to the model (type, format, meaning).
    pub description: Option<String>,
}

impl SchemaField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Fields with related meaning are retrieved and extracted together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFamily {
    Identifiers,
    Contact,
    Building,
    Dates,
    Other,
}

impl FieldFamily {
    pub fn of(field_name: &str) -> Self {
        match lexicon_for_field(field_name).map(|entry| entry.field) {
            Some("regon" | "nip" | "krs" | "name") => FieldFamily::Identifiers,
            Some("address" | "postal_code" | "phone" | "email" | "website") => FieldFamily::Contact,
            Some("floors" | "units" | "area") => FieldFamily::Building,
            Some("date") => FieldFamily::Dates,
            _ => FieldFamily::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldGroup {
    pub family: FieldFamily,
    pub fields: Vec<SchemaField>,
}

impl FieldGroup {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }
}

/// Ordered, duplicate-free set of fields to extract. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionSchema {
    fields: Vec<SchemaField>,
}

impl ExtractionSchema {
    pub fn new(fields: Vec<SchemaField>) -> Result<Self, RagError> {
        if fields.is_empty() {
            return Err(RagError::InvalidSchema("schema has no fields".to_string()));
        }

        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(fields.len());
        for mut field in fields {
            field.name = field.name.trim().to_string();
            if field.name.is_empty() {
                return Err(RagError::InvalidSchema("field names must not be empty".to_string()));
            }
            if !seen.insert(field.name.clone()) {
                return Err(RagError::InvalidSchema(format!(
                    "duplicate field `{}`",
                    field.name
                )));
            }
            normalized.push(field);
        }

        Ok(Self { fields: normalized })
    }

    pub fn from_names<I, S>(names: I) -> Result<Self, RagError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(SchemaField::new).collect())
    }

    /// Accepts a JSON object (`{"field": "description"}`), a JSON array of names, or a plain
    /// list separated by commas, semicolons or newlines.
    pub fn parse(text: &str) -> Result<Self, RagError> {
        let text = text.trim();
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Self::new(
                map.into_iter()
                    .map(|(name, hint)| SchemaField {
                        name,
                        description: describe(hint),
                    })
                    .collect(),
            ),
            Ok(Value::Array(items)) => Self::new(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(name) => Ok(SchemaField::new(name)),
                        other => Err(RagError::InvalidSchema(format!(
                            "array entries must be field names, got {other}"
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Ok(_) | Err(_) if text.starts_with('{') || text.starts_with('[') => Err(
                RagError::InvalidSchema("schema looks like JSON but does not parse as an object or array".to_string()),
            ),
            _ => Self::from_names(
                text.split([',', ';', '\n'])
                    .map(str::trim)
                    .filter(|name| !name.is_empty()),
            ),
        }
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    /// Groups fields by family in order of first appearance, splitting groups larger than
    /// `max_per_group`. Fields keep schema order within a group.
    pub fn groups(&self, max_per_group: usize) -> Vec<FieldGroup> {
        let max_per_group = max_per_group.max(1);
        let mut families: Vec<(FieldFamily, Vec<SchemaField>)> = Vec::new();
        for field in &self.fields {
            let family = FieldFamily::of(&field.name);
            match families.iter_mut().find(|(existing, _)| *existing == family) {
                Some((_, members)) => members.push(field.clone()),
                None => families.push((family, vec![field.clone()])),
            }
        }

        families
            .into_iter()
            .flat_map(|(family, members)| {
                members
                    .chunks(max_per_group)
                    .map(|fields| FieldGroup {
                        family,
                        fields: fields.to_vec(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

fn describe(hint: Value) -> Option<String> {
    match hint {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}
