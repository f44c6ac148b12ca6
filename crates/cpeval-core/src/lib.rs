pub mod error;
pub mod extract;
pub mod generator;
pub mod language;
pub mod problem;
pub mod prompt;
pub mod score;

pub use error::{CpError, CpResult};
pub use extract::{Extraction, Extractor, Payload, Shape};
pub use generator::{TextGenerator, TokenCounter};
pub use language::{EnvironmentCatalogue, LangCluster};
pub use problem::{
    pad_candidates, slot_index, slot_key, CandidateResponse, CandidateText, ExtractedCode, GenerationRequest,
    Problem, SamplingParams,
};
pub use prompt::{ChatTemplate, PromptBuilder, PromptStyle};
pub use score::{score_streams, Band, ScoreStratum, ScoreSummary, StratumTally, Thresholds};
