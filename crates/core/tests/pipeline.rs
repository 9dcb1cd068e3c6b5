//! End-to-end tests of a document session with deterministic providers.

use async_trait::async_trait;
use docrag_core::embeddings::{is_unit_norm, Embedder};
use docrag_core::{
    chunk_pages, tokenize, AnswerStatus, CharacterNgramEmbedder, ChunkingConfig, Confidence,
    DocumentSession, EmbeddingConfig, EmbeddingProvider, ExtractionSchema, GenerationRequest,
    LanguageModel, PageScope, PageText, ProviderError, RagConfig, RagError, RetryPolicy,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Mutex;

/// Topic buckets; a token counts towards a bucket when it starts with one of the stems.
const CONCEPTS: [&[&str]; 5] = [
    &["spolk", "dewelop", "archicom", "firm", "inwestyc"],
    &["regon", "nip", "krs", "numer"],
    &["kondygn", "pieter", "pietr", "budyn", "floor"],
    &["adres", "ulic", "siedzib", "wroclaw", "krakowsk"],
    &["termin", "harmonogram", "oddan", "2025"],
];
const CONCEPT_DIMENSIONS: usize = CONCEPTS.len() + 1;

/// Bag-of-concepts embedder: similarity follows topical overlap, never exact tokens.
struct ConceptEmbedder;

fn concept_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; CONCEPT_DIMENSIONS];
    for token in tokenize(text) {
        for (bucket, stems) in CONCEPTS.iter().enumerate() {
            if stems.iter().any(|stem| token.starts_with(stem)) {
                vector[bucket] += 1.0;
            }
        }
    }
    vector[CONCEPTS.len()] = 0.05;
    vector
}

#[async_trait]
impl EmbeddingProvider for ConceptEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| concept_vector(text)).collect())
    }
}

/// Answers with the text of the best-ranked source; extracts `label: value` pairs for the
/// requested keys straight from the context.
struct ContextReadingModel {
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ContextReadingModel {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn context_of(user: &str) -> &str {
    let start = user.find("[Source 1").unwrap_or(0);
    &user[start..]
}

#[async_trait]
impl LanguageModel for ContextReadingModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let context = context_of(&request.user);

        if !request.json_output {
            let first_source = context
                .lines()
                .skip(1)
                .take_while(|line| !line.starts_with("[Source"))
                .collect::<Vec<_>>()
                .join(" ");
            return Ok(first_source);
        }

        let requested = request
            .user
            .lines()
            .find(|line| line.starts_with('{'))
            .ok_or_else(|| ProviderError::fatal("no field list in prompt"))?;
        let requested: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(requested).map_err(|error| ProviderError::fatal(error.to_string()))?;

        let mut answer = serde_json::Map::new();
        for key in requested.keys() {
            let pattern = Regex::new(&format!(r"(?i)\b{}\s*:\s*([\p{{L}}\d -]+)", regex::escape(key)))
                .map_err(|error| ProviderError::fatal(error.to_string()))?;
            let value = pattern
                .captures(context)
                .and_then(|captures| captures.get(1))
                .map(|value| serde_json::Value::String(value.as_str().trim().to_string()))
                .unwrap_or(serde_json::Value::Null);
            answer.insert(key.clone(), value);
        }
        Ok(serde_json::Value::Object(answer).to_string())
    }
}

fn config() -> RagConfig {
    let mut config = RagConfig::default();
    config.embedding = EmbeddingConfig {
        dimensions: CONCEPT_DIMENSIONS,
        retry: RetryPolicy::immediate(1),
        ..EmbeddingConfig::default()
    };
    config.generation.retry = RetryPolicy::immediate(1);
    config
}

fn session_with(config: RagConfig) -> DocumentSession<ConceptEmbedder, ContextReadingModel> {
    DocumentSession::new(config, "archicom-prospectus", ConceptEmbedder, ContextReadingModel::new())
        .expect("valid session")
}

fn prospectus() -> Vec<PageText> {
    vec![
        PageText::new(
            1,
            "Spółka deweloperska Archicom S.A. realizuje inwestycję mieszkaniową we Wrocławiu. \
             Adres: Krakowska 12, 50-123 Wrocław. REGON: 362794360.",
        ),
        PageText::new(
            2,
            "Budynek ma dwie klatki schodowe i garaż podziemny. Liczba kondygnacji: 17. \
             Termin oddania: grudzień 2025.",
        ),
    ]
}

#[tokio::test]
async fn floor_question_is_answered_from_page_two() {
    let session = session_with(config());
    session.build_index(&prospectus()).await.unwrap();

    let answer = session.ask("ile pięter").await.unwrap();

    assert_eq!(answer.status, AnswerStatus::Answered);
    assert!(answer.text.contains("17"), "answer was: {}", answer.text);
    let threshold = answer.evidence.similarity_threshold;
    let supporting = answer
        .evidence
        .hits
        .iter()
        .find(|hit| hit.chunk.text.contains("Liczba kondygnacji: 17"))
        .expect("floor chunk is in the evidence");
    assert_eq!(supporting.chunk.page, 2);
    assert!(supporting.high_confidence || supporting.combined_score > threshold);
}

#[tokio::test]
async fn extraction_fills_regon_and_leaves_missing_nip_null() {
    let session = session_with(config());
    session.build_index(&prospectus()).await.unwrap();
    let schema = ExtractionSchema::parse(r#"{"regon": null, "nip": null, "address": null}"#).unwrap();

    let result = session.extract(&schema, None).await.unwrap();

    assert_eq!(result.len(), 3);
    let regon = result.get("regon").unwrap();
    assert_eq!(regon.value.as_deref(), Some("362794360"));
    assert_eq!(regon.confidence, Confidence::Validated);
    let nip = result.get("nip").unwrap();
    assert_eq!(nip.value, None);
    assert_eq!(nip.confidence, Confidence::NotFound);
    let address = result.get("address").unwrap();
    assert_eq!(address.value.as_deref(), Some("Krakowska 12"));
    assert_eq!(address.pages, vec![1]);
    assert_eq!(session.llm().calls(), 2);

    let json = result.to_json();
    assert_eq!(json["regon"], "362794360");
    assert!(json["nip"].is_null());
}

#[tokio::test]
async fn extraction_returns_exactly_one_key_per_field() {
    let session = session_with(config());
    session.build_index(&prospectus()).await.unwrap();
    let names = [
        "regon", "nip", "krs", "address", "email", "liczba_kondygnacji", "termin_oddania",
        "favourite_colour", "notes", "CompanyName",
    ];
    let schema = ExtractionSchema::from_names(names).unwrap();

    let result = session.extract(&schema, None).await.unwrap();

    let keys: Vec<String> = result
        .to_json()
        .as_object()
        .unwrap()
        .keys()
        .cloned()
        .collect();
    assert_eq!(keys, names.iter().map(|name| name.to_string()).collect::<Vec<_>>());
    for field in &result.fields {
        match field.confidence {
            Confidence::NotFound => assert!(field.value.is_none()),
            _ => assert!(field.value.is_some()),
        }
    }
}

#[tokio::test]
async fn page_scope_limits_extraction_evidence() {
    let session = session_with(config());
    session.build_index(&prospectus()).await.unwrap();
    let schema = ExtractionSchema::from_names(["regon"]).unwrap();

    let scoped = session.extract(&schema, Some(PageScope::Page(2))).await.unwrap();
    assert_eq!(scoped.value("regon"), None);

    let outside = session.extract(&schema, Some(PageScope::Page(7))).await;
    assert!(matches!(outside, Err(RagError::InvalidPageScope(_))));
}

#[tokio::test]
async fn labelled_registry_number_outranks_topical_chunk() {
    let mut config = config();
    config.retrieval.similarity_threshold = 0.5;
    let session = session_with(config);
    session
        .build_index(&[
            PageText::new(
                1,
                "Spółka deweloperska Archicom jest firmą deweloperską z wieloletnim doświadczeniem. \
                 Archicom prowadzi inwestycje deweloperskie.",
            ),
            PageText::new(2, "Dane rejestrowe. REGON: 362794360."),
        ])
        .await
        .unwrap();

    let result = session
        .retrieve("Podaj numer REGON spółki deweloperskiej Archicom", None)
        .await
        .unwrap();

    let regon = result.hits.iter().find(|hit| hit.chunk.page == 2).unwrap();
    let topical = result.hits.iter().find(|hit| hit.chunk.page == 1).unwrap();
    assert!(topical.semantic_score > regon.semantic_score);
    assert!(regon.high_confidence);
    assert!(regon.combined_score > topical.combined_score);
    assert_eq!(result.hits[0].chunk.page, 2);
}

#[tokio::test]
async fn question_without_evidence_does_not_reach_the_model() {
    let session = session_with(config());
    session.build_index(&prospectus()).await.unwrap();

    let answer = session.ask("zzzz qqqq").await.unwrap();

    assert_eq!(answer.status, AnswerStatus::NoEvidence);
    assert!(answer.evidence.is_empty());
    assert_eq!(session.llm().calls(), 0);
}

#[tokio::test]
async fn rebuild_discards_previous_chunks() {
    let session = session_with(config());
    let pages: Vec<PageText> = prospectus()
        .into_iter()
        .map(|page| PageText::new(page.number, page.text.repeat(6)))
        .collect();

    let small = session
        .build_index_with(&pages, ChunkingConfig::new(200, 40).unwrap())
        .await
        .unwrap();
    let large = session
        .build_index_with(&pages, ChunkingConfig::new(1_000, 100).unwrap())
        .await
        .unwrap();

    assert!(small.chunk_count() > large.chunk_count());
    assert_eq!(session.chunk_count(), large.chunk_count());
    assert_eq!(session.current_index().unwrap().build_id, large.build_id);
    assert_eq!(large.vector_index().len(), large.chunk_count());

    let current: HashSet<(usize, String)> = large
        .chunks()
        .iter()
        .map(|chunk| (chunk.index, chunk.text.clone()))
        .collect();
    let result = session.retrieve("REGON Archicom kondygnacji", None).await.unwrap();
    assert!(!result.is_empty());
    for hit in &result.hits {
        assert!(current.contains(&(hit.chunk.index, hit.chunk.text.clone())));
    }
}

#[tokio::test]
async fn page_starting_with_blank_lines_builds_offline() {
    let mut config = config();
    config.embedding.dimensions = 256;
    let session = DocumentSession::new(
        config,
        "scanned",
        CharacterNgramEmbedder::new(256),
        ContextReadingModel::new(),
    )
    .expect("valid session");
    let text = format!(
        "\n\n\n\n\n\n{}. Liczba kondygnacji: 17.",
        "Budynek mieszkalny ".repeat(110)
    );

    let snapshot = session.build_index(&[PageText::new(1, text)]).await.unwrap();

    assert!(snapshot.chunk_count() >= 1);
    assert!(snapshot.chunks().iter().all(|chunk| !chunk.text.trim().is_empty()));
    assert_eq!(snapshot.vector_index().len(), snapshot.chunk_count());
}

#[tokio::test]
async fn every_embedding_has_unit_norm() {
    let texts: Vec<String> = prospectus().into_iter().map(|page| page.text).collect();

    let concept = Embedder::new(
        ConceptEmbedder,
        EmbeddingConfig {
            dimensions: CONCEPT_DIMENSIONS,
            ..EmbeddingConfig::default()
        },
    );
    let ngram = Embedder::new(
        CharacterNgramEmbedder::new(256),
        EmbeddingConfig {
            dimensions: 256,
            batch_size: 1,
            ..EmbeddingConfig::default()
        },
    );

    for vector in concept.embed(&texts).await.unwrap() {
        assert!(is_unit_norm(&vector));
    }
    for vector in ngram.embed(&texts).await.unwrap() {
        assert!(is_unit_norm(&vector));
    }
    assert!(is_unit_norm(&ngram.embed_query("ile pięter").await.unwrap()));
}

#[test]
fn chunks_reconstruct_every_page() {
    let pages = vec![
        PageText::new(1, prospectus()[0].text.repeat(9)),
        PageText::new(3, "Krótka strona."),
        PageText::new(4, prospectus()[1].text.repeat(14)),
    ];

    for (chunk_size, overlap) in [(120, 30), (300, 80), (2_000, 350)] {
        let config = ChunkingConfig::new(chunk_size, overlap).unwrap();
        let chunks = chunk_pages("doc", &pages, config).unwrap();

        for page in &pages {
            let rebuilt: String = chunks
                .iter()
                .filter(|chunk| chunk.page == page.number)
                .map(|chunk| chunk.fresh_text())
                .collect();
            assert_eq!(rebuilt, page.text, "chunk_size={chunk_size} overlap={overlap}");
        }
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, position);
            assert!(chunk.char_len() <= chunk_size);
        }
    }
}
