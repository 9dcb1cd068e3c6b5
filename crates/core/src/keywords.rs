//! Lexical half of hybrid retrieval.
//!
//! Scores a chunk against a query by exact/stemmed token overlap plus a table of well-known
//! document fields (Polish and English labels, value shapes). A label immediately followed by a
//! value of the right shape, or a numeric identifier copied verbatim from the query, is a
//! high-confidence hit.

use crate::chunking::{fold_diacritics, tokenize};
use crate::config::KeywordWeights;
use crate::error::RagError;
use crate::models::Chunk;
use regex::Regex;
use std::collections::HashSet;

/// One well-known field: how a query asks for it and how a document states it.
#[derive(Debug)]
pub struct FieldLexicon {
    pub field: &'static str,
    /// Stems; a query or field-name token starting with one activates the entry.
    pub triggers: &'static [&'static str],
    /// Stems of labels as they appear in (folded, lowercase) document text.
    pub labels: &'static [&'static str],
    /// Shape of the value written after the label.
    pub value: Option<&'static str>,
    /// Whether the value may also precede the label ("17 kondygnacji").
    pub value_first: bool,
    /// Shape recognisable even without a label.
    pub standalone: Option<&'static str>,
}

/// Matched in order, so narrower entries come before broad ones like `address` and `name`.
pub const FIELD_LEXICON: &[FieldLexicon] = &[
    FieldLexicon {
        field: "regon",
        triggers: &["regon"],
        labels: &["regon"],
        value: Some(r"\d{9}(?:\d{5})?\b"),
        value_first: false,
        standalone: Some(r"\b\d{9}\b"),
    },
    FieldLexicon {
        field: "nip",
        triggers: &["nip", "vat", "tax"],
        labels: &["nip", "vat id", "tax id", "vat"],
        value: Some(r"(?:pl\s?)?(?:\d{3}-\d{3}-\d{2}-\d{2}|\d{3}-\d{2}-\d{2}-\d{3}|\d{10})\b"),
        value_first: false,
        standalone: Some(r"\b\d{3}-?\d{3}-?\d{2}-?\d{2}\b"),
    },
    FieldLexicon {
        field: "krs",
        triggers: &["krs"],
        labels: &["krs"],
        value: Some(r"\d{10}\b"),
        value_first: false,
        standalone: None,
    },
    FieldLexicon {
        field: "postal_code",
        triggers: &["pocztow", "postal", "zip", "postcode"],
        labels: &["kod pocztowy", "postal code", "zip code", "postcode"],
        value: Some(r"\d{2}-\d{3}\b"),
        value_first: false,
        standalone: Some(r"\b\d{2}-\d{3}\b"),
    },
    FieldLexicon {
        field: "phone",
        triggers: &["telefon", "tel", "phone"],
        labels: &["telefon", "tel", "phone"],
        value: Some(r"\+?\d[\d ()-]{7,}\d\b"),
        value_first: false,
        standalone: None,
    },
    FieldLexicon {
        field: "email",
        triggers: &["email", "mail"],
        labels: &["e-mail", "email", "mail"],
        value: Some(r"[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b"),
        value_first: false,
        standalone: Some(r"[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b"),
    },
    FieldLexicon {
        field: "website",
        triggers: &["stron", "www", "website", "internet", "url"],
        labels: &["strona", "www", "website"],
        value: Some(r"(?:https?://)?(?:www\.)?[a-z0-9-]+\.[a-z]{2,}\b"),
        value_first: false,
        standalone: Some(r"\bwww\.[a-z0-9-]+\.[a-z]{2,}\b"),
    },
    FieldLexicon {
        field: "address",
        triggers: &["adres", "address", "ulic", "street", "siedzib", "headquart"],
        labels: &["adres", "ul", "ulica", "address", "street", "siedziba"],
        value: Some(r"(?:ul\.?\s+)?[a-z][a-z .-]{1,40}\s\d+[a-z]?\b"),
        value_first: false,
        standalone: Some(r"\bul\.\s+[a-z][a-z .-]{1,40}\s\d+"),
    },
    FieldLexicon {
        field: "floors",
        triggers: &["kondygnac", "pieter", "pietr", "floor", "storey", "stories", "levels"],
        labels: &["kondygnac", "pieter", "pietr", "floors", "storeys", "stories"],
        value: Some(r"\d{1,3}\b"),
        value_first: true,
        standalone: None,
    },
    FieldLexicon {
        field: "units",
        triggers: &["lokal", "mieszka", "apartment", "units", "flats"],
        labels: &["lokali", "lokale", "mieszkan", "apartments", "units", "flats"],
        value: Some(r"\d{1,4}\b"),
        value_first: true,
        standalone: None,
    },
    FieldLexicon {
        field: "date",
        triggers: &["termin", "data", "date", "kiedy", "when", "rozpocz", "zakoncz", "deadline"],
        labels: &["termin", "data", "date", "deadline"],
        value: Some(r"(?:\d{1,2}[./-]\d{1,2}[./-]\d{2,4}|\d{4}-\d{2}-\d{2}|\d{1,2}\s+[a-z]+\s+\d{4})\b"),
        value_first: false,
        standalone: Some(r"\b(?:\d{1,2}[./-]\d{1,2}[./-]\d{4}|\d{4}-\d{2}-\d{2})\b"),
    },
    FieldLexicon {
        field: "area",
        triggers: &["powierzchn", "area", "metraz"],
        labels: &["powierzchnia", "area"],
        value: Some(r"\d+(?:[.,]\d+)?\s?(?:m2|mkw|m)\b"),
        value_first: false,
        standalone: None,
    },
    FieldLexicon {
        field: "name",
        triggers: &["nazw", "name", "spolk", "firm", "company", "deweloper", "developer"],
        labels: &["nazwa", "firma", "spolka", "company", "deweloper", "developer"],
        value: None,
        value_first: false,
        standalone: None,
    },
];

const STOPWORDS: &[&str] = &[
    "the", "and", "what", "which", "how", "many", "much", "are", "for", "this", "that", "with",
    "from", "give", "does", "jaki", "jaka", "jakie", "jest", "ile", "czy", "podaj", "dla", "oraz",
    "jak", "sie", "nie", "tego", "ten",
];

#[derive(Debug)]
struct CompiledField {
    lexicon: &'static FieldLexicon,
    label: Regex,
    labeled_value: Option<Regex>,
    value_then_label: Option<Regex>,
    standalone: Option<Regex>,
}

impl CompiledField {
    fn compile(lexicon: &'static FieldLexicon) -> Result<Self, RagError> {
        let labels = lexicon
            .labels
            .iter()
            .map(|label| {
                // Short labels such as `ul` or `tel` must stand alone, not prefix other words.
                if label.chars().count() <= 3 {
                    format!(r"{}\b", regex::escape(label))
                } else {
                    regex::escape(label)
                }
            })
            .collect::<Vec<_>>()
            .join("|");

        let label = Regex::new(&format!(r"\b(?:{labels})"))?;
        let labeled_value = lexicon
            .value
            .map(|value| {
                Regex::new(&format!(
                    r"\b(?:{labels})\w*\.?\s*(?:[:=–-]\s*)?(?:nr\.?\s*)?(?P<value>{value})"
                ))
            })
            .transpose()?;
        let value_then_label = match (lexicon.value, lexicon.value_first) {
            (Some(value), true) => Some(Regex::new(&format!(
                r"\b(?P<value>{value})\s+(?:\w+\s+)?(?:{labels})"
            ))?),
            _ => None,
        };
        let standalone = lexicon.standalone.map(Regex::new).transpose()?;

        Ok(Self {
            lexicon,
            label,
            labeled_value,
            value_then_label,
            standalone,
        })
    }

    /// Byte range of the value in `folded`.
    fn labeled_value_span(&self, folded: &str) -> Option<(usize, usize)> {
        [&self.labeled_value, &self.value_then_label]
            .into_iter()
            .flatten()
            .find_map(|pattern| pattern.captures(folded))
            .and_then(|captures| captures.name("value"))
            .map(|value| (value.start(), value.end()))
    }

    fn labeled_value(&self, folded: &str) -> Option<String> {
        self.labeled_value_span(folded)
            .map(|(start, end)| folded[start..end].trim().to_string())
    }
}

/// Lexical view of a query, computed once per retrieval.
#[derive(Debug, Clone, Default)]
pub struct QueryTerms {
    pub tokens: Vec<String>,
    /// Digit-only tokens of four or more digits.
    pub numeric_ids: Vec<String>,
    fields: Vec<usize>,
}

impl QueryTerms {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldHit {
    pub field: &'static str,
    /// Value found right next to the field's label, if any.
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordMatch {
    /// In `[0, 1]`.
    pub score: f32,
    pub high_confidence: bool,
    pub matched_terms: Vec<String>,
    pub fields: Vec<FieldHit>,
}

#[derive(Debug)]
pub struct KeywordScorer {
    weights: KeywordWeights,
    fields: Vec<CompiledField>,
}

impl KeywordScorer {
    pub fn new(weights: KeywordWeights) -> Result<Self, RagError> {
        let fields = FIELD_LEXICON
            .iter()
            .map(CompiledField::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { weights, fields })
    }

    pub fn analyze_query(&self, query: &str) -> QueryTerms {
        let all_tokens = tokenize(query);
        let mut seen = HashSet::new();
        let mut tokens: Vec<String> = all_tokens
            .iter()
            .filter(|token| {
                let numeric = token.chars().all(|ch| ch.is_ascii_digit());
                numeric || (token.chars().count() >= 3 && !STOPWORDS.contains(&token.as_str()))
            })
            .filter(|token| seen.insert(token.to_string()))
            .cloned()
            .collect();
        if tokens.is_empty() {
            tokens = all_tokens.clone();
            tokens.dedup();
        }

        let numeric_ids = tokens
            .iter()
            .filter(|token| is_numeric_id(token))
            .cloned()
            .collect();

        let fields = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, compiled)| triggered_by(compiled.lexicon, &all_tokens))
            .map(|(position, _)| position)
            .collect();

        QueryTerms {
            tokens,
            numeric_ids,
            fields,
        }
    }

    pub fn score(&self, terms: &QueryTerms, chunk: &Chunk) -> KeywordMatch {
        let chunk_tokens: HashSet<&str> = chunk.tokens.iter().map(String::as_str).collect();
        let chunk_stems: HashSet<&str> = chunk.tokens.iter().map(|token| stem(token)).collect();

        let matched_terms: Vec<String> = terms
            .tokens
            .iter()
            .filter(|token| chunk_tokens.contains(token.as_str()) || chunk_stems.contains(stem(token)))
            .cloned()
            .collect();
        let fraction = if terms.tokens.is_empty() {
            0.0
        } else {
            matched_terms.len() as f32 / terms.tokens.len() as f32
        };

        let mut label_hit = false;
        let mut shape_hit = false;
        let mut high_confidence = false;
        let mut fields = Vec::new();

        for &position in &terms.fields {
            let compiled = &self.fields[position];
            let folded = chunk.text_normalized.as_str();

            let has_label = compiled.label.is_match(folded);
            let value = compiled.labeled_value(folded);
            let has_shape = value.is_some()
                || compiled
                    .standalone
                    .as_ref()
                    .is_some_and(|pattern| pattern.is_match(folded));

            if value.is_some() {
                high_confidence = true;
            }
            label_hit |= has_label;
            shape_hit |= has_shape;
            if has_label || has_shape {
                fields.push(FieldHit {
                    field: compiled.lexicon.field,
                    value,
                });
            }
        }

        if terms
            .numeric_ids
            .iter()
            .any(|id| chunk_tokens.contains(id.as_str()))
        {
            high_confidence = true;
            shape_hit = true;
        }

        let weights = self.weights;
        let mut score = weights.term * fraction;
        if label_hit {
            score += weights.label;
        }
        if shape_hit {
            score += weights.shape;
        }
        let mut score = score.clamp(0.0, 1.0);
        if high_confidence {
            let floor = weights.high_confidence_floor.clamp(0.0, 1.0);
            score = score.max(floor + (1.0 - floor) * fraction);
        }

        KeywordMatch {
            score,
            high_confidence,
            matched_terms,
            fields,
        }
    }

    /// Value written next to the label of the lexicon entry matching `field_name`.
    pub fn find_labeled_value(&self, field_name: &str, text: &str) -> Option<String> {
        let lexicon = lexicon_for_field(field_name)?;
        let compiled = self
            .fields
            .iter()
            .find(|compiled| compiled.lexicon.field == lexicon.field)?;
        let folded = fold_diacritics(&text.to_lowercase());
        let (start, end) = compiled.labeled_value_span(&folded)?;

        // Folding maps characters one to one for almost all input; when it does, hand back the
        // value as written in the document.
        if folded.chars().count() == text.chars().count() {
            let skip = folded[..start].chars().count();
            let take = folded[start..end].chars().count();
            let original: String = text.chars().skip(skip).take(take).collect();
            return Some(original.trim().to_string());
        }
        Some(folded[start..end].trim().to_string())
    }
}

/// Lexicon entry whose triggers match one of the tokens of `field_name`.
pub fn lexicon_for_field(field_name: &str) -> Option<&'static FieldLexicon> {
    let tokens = tokenize(&field_name.replace('_', " "));
    FIELD_LEXICON
        .iter()
        .find(|lexicon| lexicon.field == field_name.to_lowercase() || triggered_by(lexicon, &tokens))
}

fn triggered_by(lexicon: &FieldLexicon, tokens: &[String]) -> bool {
    tokens.iter().any(|token| {
        lexicon
            .triggers
            .iter()
            .any(|trigger| token.starts_with(trigger))
    })
}

/// First five characters of tokens of six or more characters; shorter tokens are their own stem.
fn stem(token: &str) -> &str {
    if token.chars().count() < 6 {
        return token;
    }
    match token.char_indices().nth(5) {
        Some((offset, _)) => &token[..offset],
        None => token,
    }
}

/// Digit runs of four or more, except four-digit numbers that read as a year.
fn is_numeric_id(token: &str) -> bool {
    if token.len() < 4 || !token.chars().all(|ch| ch.is_ascii_digit()) {
        return false;
    }
    let looks_like_year = token.len() == 4 && token.parse::<u32>().is_ok_and(|year| (1900..=2100).contains(&year));
    !looks_like_year
}
