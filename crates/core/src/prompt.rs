use crate::config::GenerationConfig;
use crate::models::RetrievalResult;
use crate::schema::FieldGroup;
use crate::traits::GenerationRequest;
use serde_json::{Map, Value};

const ANSWER_SYSTEM_PROMPT: &str = "You are a precise assistant. Answer the user's question ONLY using the provided document context. \
If the context is insufficient, say you don't know. Be concise. Do not fabricate details.\n\
For Polish requests like 'Podaj X' (Give/Provide X), return the exact value found in the context.\n\
For questions about numbers, dates, identifiers or other specific values, quote the exact text from the document.\n\
Use bullet points for lists. Avoid repeating the question.";

const EXTRACTION_SYSTEM_PROMPT: &str = "You are a precise data extraction assistant. Extract the requested fields from the provided document context \
and reply with a single JSON object.\n\
Rules:\n\
1. Use ONLY information explicitly present in the context.\n\
2. Use exactly the requested field names as keys, one key per field.\n\
3. If a field is not found, set its value to null.\n\
4. Do not invent, infer or correct values.\n\
5. For numbers and identifiers, copy the exact digits you see.\n\
6. Search through ALL context sections carefully.";

const POLISH_LABEL_HINTS: &str = "Pay attention to Polish terms like:\n\
- REGON (business registry number)\n\
- NIP (tax ID)\n\
- KRS (court register number)\n\
- adres, siedziba (address, registered office)\n\
- nazwa, firma (company name)\n\
- telefon (phone)\n\
- strona internetowa (website)\n\
- liczba kondygnacji (number of floors)\n\
- liczba lokali w budynku (number of units in the building)";

/// Renders ranked evidence with provenance headers, best first.
pub fn format_context(evidence: &RetrievalResult) -> String {
    evidence
        .hits
        .iter()
        .enumerate()
        .map(|(position, hit)| {
            format!(
                "[Source {} | page {} | chunk {} | score {:.2}]\n{}",
                position + 1,
                hit.chunk.page,
                hit.chunk.index,
                hit.combined_score,
                hit.chunk.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn answer_request(
    question: &str,
    evidence: &RetrievalResult,
    generation: &GenerationConfig,
) -> GenerationRequest {
    GenerationRequest {
        system: ANSWER_SYSTEM_PROMPT.to_string(),
        user: format!(
            "Question:\n{question}\n\nContext:\n{}",
            format_context(evidence)
        ),
        temperature: generation.temperature,
        max_tokens: generation.max_tokens,
        json_output: false,
    }
}

pub fn extraction_request(
    group: &FieldGroup,
    evidence: &RetrievalResult,
    generation: &GenerationConfig,
) -> GenerationRequest {
    let fields: Map<String, Value> = group
        .fields
        .iter()
        .map(|field| {
            let hint = field
                .description
                .clone()
                .map_or(Value::Null, Value::String);
            (field.name.clone(), hint)
        })
        .collect();
    let fields = Value::Object(fields);

    GenerationRequest {
        system: EXTRACTION_SYSTEM_PROMPT.to_string(),
        user: format!(
            "Document context (chunks from different pages):\n{}\n\n\
             Extract these fields as JSON (keys are field names, values are optional hints):\n{fields}\n\n\
             {POLISH_LABEL_HINTS}",
            format_context(evidence)
        ),
        temperature: generation.temperature,
        max_tokens: generation.max_tokens,
        json_output: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ScoredChunk};
    use crate::schema::{FieldFamily, SchemaField};

    fn evidence() -> RetrievalResult {
        let hit = |index: usize, page: u32, text: &str, score: f32| ScoredChunk {
            chunk: Chunk {
                index,
                chunk_id: format!("id-{index}"),
                page,
                char_start: 0,
                char_end: text.chars().count(),
                overlap_chars: 0,
                text: text.to_string(),
                text_normalized: text.to_lowercase(),
                tokens: Vec::new(),
            },
            semantic_score: score,
            keyword_score: 0.0,
            combined_score: score,
            high_confidence: false,
            semantic_rank: Some(index),
            matched_terms: Vec::new(),
        };
        RetrievalResult {
            query: "q".to_string(),
            similarity_threshold: 0.7,
            hits: vec![
                hit(4, 2, "  Liczba kondygnacji: 17. ", 0.91),
                hit(0, 1, "Spółka Archicom.", 0.75),
            ],
        }
    }

    #[test]
    fn context_keeps_rank_order_and_provenance() {
        let context = format_context(&evidence());
        assert_eq!(
            context,
            "[Source 1 | page 2 | chunk 4 | score 0.91]\nLiczba kondygnacji: 17.\n\n\
             [Source 2 | page 1 | chunk 0 | score 0.75]\nSpółka Archicom."
        );
    }

    #[test]
    fn answer_request_is_free_text() {
        let request = answer_request("ile pięter?", &evidence(), &GenerationConfig::default());
        assert!(!request.json_output);
        assert!(request.system.contains("Podaj X"));
        assert!(request.user.starts_with("Question:\nile pięter?\n\nContext:\n[Source 1"));
        assert_eq!(request.temperature, 0.0);
    }

    #[test]
    fn extraction_request_lists_fields_as_json() {
        let group = FieldGroup {
            family: FieldFamily::Identifiers,
            fields: vec![
                SchemaField::new("regon").with_description("9 digits"),
                SchemaField::new("nip"),
            ],
        };
        let request = extraction_request(&group, &evidence(), &GenerationConfig::default());
        assert!(request.json_output);
        assert!(request.user.contains(r#"{"regon":"9 digits","nip":null}"#));
        assert!(request.user.contains("Liczba kondygnacji: 17."));
    }
}
