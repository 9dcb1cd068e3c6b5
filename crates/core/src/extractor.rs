//! Schema-driven field extraction over retrieved evidence.

use crate::chunking::{fold_diacritics, normalize_whitespace};
use crate::config::GenerationConfig;
use crate::error::{ProviderError, ProviderStage, RagError};
use crate::indexer::IndexSnapshot;
use crate::models::{PageScope, RetrievalResult};
use crate::prompt;
use crate::retriever::{HybridRetriever, RetrievalOptions};
use crate::retry::with_retry;
use crate::schema::{ExtractionSchema, FieldGroup, SchemaField};
use crate::traits::{EmbeddingProvider, LanguageModel};
use crate::validators::FieldValidator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Returned by the model and accepted by the field's validator.
    Validated,
    /// Returned by the model; the field has no validator.
    Unchecked,
    /// Returned by the model but rejected by the field's validator. Kept as-is.
    LowConfidence,
    /// The model returned nothing; the value was read next to the field's label in the evidence.
    PatternFallback,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub name: String,
    pub value: Option<String>,
    pub confidence: Confidence,
    /// Evidence pages the value was found on.
    pub pages: Vec<u32>,
}

impl ExtractedField {
    fn not_found(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            confidence: Confidence::NotFound,
            pages: Vec::new(),
        }
    }
}

/// One entry per schema field, in schema order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub scope: Option<PageScope>,
    pub fields: Vec<ExtractedField>,
}

impl ExtractionResult {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ExtractedField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|field| field.value.as_deref())
    }

    /// `{"field": "value" | null, ...}`
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|field| {
                    let value = field.value.clone().map_or(Value::Null, Value::String);
                    (field.name.clone(), value)
                })
                .collect(),
        )
    }
}

pub struct Extractor<'a, P, L: ?Sized> {
    retriever: &'a HybridRetriever<P>,
    llm: &'a L,
    generation: &'a GenerationConfig,
}

impl<'a, P, L> Extractor<'a, P, L>
where
    P: EmbeddingProvider,
    L: LanguageModel + ?Sized,
{
    pub fn new(retriever: &'a HybridRetriever<P>, llm: &'a L, generation: &'a GenerationConfig) -> Self {
        Self {
            retriever,
            llm,
            generation,
        }
    }

    pub async fn extract(
        &self,
        snapshot: &IndexSnapshot,
        schema: &ExtractionSchema,
        scope: Option<PageScope>,
    ) -> Result<ExtractionResult, RagError> {
        let config = self.retriever.config();
        let groups = schema.groups(config.max_fields_per_group);
        info!(
            field_count = schema.len(),
            group_count = groups.len(),
            scope = ?scope.map(|scope| scope.to_string()),
            "extracting fields"
        );

        let mut extracted = Vec::with_capacity(schema.len());
        for group in &groups {
            extracted.extend(self.extract_group(snapshot, group, scope).await?);
        }

        // Groups reorder fields by family; hand them back in schema order.
        let fields = schema
            .names()
            .map(|name| {
                extracted
                    .iter()
                    .position(|field: &ExtractedField| field.name == name)
                    .map(|position| extracted.swap_remove(position))
                    .unwrap_or_else(|| ExtractedField::not_found(name))
            })
            .collect();

        Ok(ExtractionResult { scope, fields })
    }

    async fn extract_group(
        &self,
        snapshot: &IndexSnapshot,
        group: &FieldGroup,
        scope: Option<PageScope>,
    ) -> Result<Vec<ExtractedField>, RagError> {
        let config = self.retriever.config();
        let options = RetrievalOptions {
            top_k: Some(config.top_k.max(group.fields.len() * 2)),
            similarity_threshold: None,
            scope,
        };
        let evidence = self
            .retriever
            .retrieve(snapshot, &group_query(group), options)
            .await?;

        if evidence.is_empty() {
            debug!(family = ?group.family, "no evidence for field group");
            return Ok(group
                .fields
                .iter()
                .map(|field| ExtractedField::not_found(&field.name))
                .collect());
        }

        let request = prompt::extraction_request(group, &evidence, self.generation);
        let request = &request;
        let llm = self.llm;
        let values = with_retry(ProviderStage::Generate, &self.generation.retry, move || async move {
            let raw = llm.generate(request).await?;
            parse_model_object(&raw)
        })
        .await?;

        Ok(group
            .fields
            .iter()
            .map(|field| self.resolve_field(field, &values, &evidence))
            .collect())
    }

    fn resolve_field(
        &self,
        field: &SchemaField,
        values: &Map<String, Value>,
        evidence: &RetrievalResult,
    ) -> ExtractedField {
        let validator = FieldValidator::for_field(&field.name);
        let check = |value: &str| validator.map_or(true, |validator| validator.validate(value));

        if let Some(value) = lookup(values, &field.name).and_then(value_text) {
            let confidence = match validator {
                None => Confidence::Unchecked,
                Some(_) if check(&value) => Confidence::Validated,
                Some(validator) => {
                    warn!(field = %field.name, ?validator, "extracted value failed validation");
                    Confidence::LowConfidence
                }
            };
            return ExtractedField {
                name: field.name.clone(),
                pages: pages_containing(evidence, &value),
                value: Some(value),
                confidence,
            };
        }

        let scorer = self.retriever.scorer();
        let fallback = evidence.hits.iter().find_map(|hit| {
            scorer
                .find_labeled_value(&field.name, &hit.chunk.text)
                .map(|value| (value, hit.chunk.page))
        });
        match fallback {
            Some((value, page)) => {
                let confidence = if check(&value) {
                    Confidence::PatternFallback
                } else {
                    Confidence::LowConfidence
                };
                debug!(field = %field.name, page, "used labelled value from evidence");
                ExtractedField {
                    name: field.name.clone(),
                    value: Some(value),
                    confidence,
                    pages: vec![page],
                }
            }
            None => ExtractedField::not_found(&field.name),
        }
    }
}

fn group_query(group: &FieldGroup) -> String {
    group
        .fields
        .iter()
        .map(|field| {
            let name = field.name.replace(['_', '-'], " ");
            match &field.description {
                Some(description) => format!("{name} ({description})"),
                None => name,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Accepts a bare JSON object or one wrapped in a markdown code fence.
pub fn parse_model_object(raw: &str) -> Result<Map<String, Value>, ProviderError> {
    let trimmed = raw.trim();
    let body = if trimmed.starts_with("```") {
        let lines: Vec<&str> = trimmed.lines().collect();
        let end = if lines.len() > 1 && lines[lines.len() - 1].trim_start().starts_with("```") {
            lines.len() - 1
        } else {
            lines.len()
        };
        lines[1.min(end)..end].join("\n")
    } else {
        trimmed.to_string()
    };

    match serde_json::from_str::<Value>(&body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProviderError::fatal(format!(
            "model returned JSON that is not an object: {other}"
        ))),
        Err(error) => Err(ProviderError::fatal(format!(
            "model returned invalid JSON: {error}"
        ))),
    }
}

fn lookup<'v>(values: &'v Map<String, Value>, name: &str) -> Option<&'v Value> {
    values.get(name).or_else(|| {
        values
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(text) => text.trim().to_string(),
        Value::Array(items) if items.is_empty() => return None,
        other => other.to_string(),
    };
    let lowered = text.to_lowercase();
    if text.is_empty() || matches!(lowered.as_str(), "null" | "n/a" | "none" | "brak") {
        return None;
    }
    Some(text)
}

fn pages_containing(evidence: &RetrievalResult, value: &str) -> Vec<u32> {
    let needle = normalize_whitespace(&fold_diacritics(&value.to_lowercase()));
    let mut pages: Vec<u32> = evidence
        .hits
        .iter()
        .filter(|hit| hit.chunk.text_normalized.contains(&needle))
        .map(|hit| hit.chunk.page)
        .collect();
    pages.sort_unstable();
    pages.dedup();
    pages
}
