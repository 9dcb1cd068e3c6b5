pub mod ngram;
pub mod openai;

pub use ngram::CharacterNgramEmbedder;
pub use openai::{OpenAiClient, OpenAiSettings};
