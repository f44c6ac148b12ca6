use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CpError, CpResult};

/// Output field prefix for candidate slots: `program_synthesis_0 .. program_synthesis_{k-1}`.
pub const SLOT_PREFIX: &str = "program_synthesis_";

pub fn slot_key(index: usize) -> String {
    format!("{SLOT_PREFIX}{index}")
}

/// Inverse of [`slot_key`]: `Some(i)` for `program_synthesis_i`.
pub fn slot_index(key: &str) -> Option<usize> {
    key.strip_prefix(SLOT_PREFIX)?.parse().ok()
}

/// One benchmark problem, read-only once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub src_uid: String,
    pub description: String,
    pub input_specification: String,
    pub output_specification: String,
    pub sample_inputs: String,
    pub sample_outputs: String,
    pub notes: String,
    pub lang_cluster: String,
    pub difficulty: i64,
}

impl Problem {
    /// Build a problem from a raw dataset record, failing on the first missing field.
    ///
    /// Sample inputs/outputs are arrays in some dataset dumps; non-string
    /// values are embedded using their JSON rendering. A `null` notes field
    /// is treated as empty.
    pub fn from_value(record: &Value) -> CpResult<Self> {
        let obj = record.as_object().ok_or_else(|| CpError::InvalidField {
            field: "record",
            reason: "expected a JSON object".into(),
        })?;

        Ok(Self {
            src_uid: text_field(obj, "src_uid")?,
            description: text_field(obj, "description")?,
            input_specification: text_field(obj, "input_specification")?,
            output_specification: text_field(obj, "output_specification")?,
            sample_inputs: text_field(obj, "sample_inputs")?,
            sample_outputs: text_field(obj, "sample_outputs")?,
            notes: text_field(obj, "notes")?,
            lang_cluster: text_field(obj, "lang_cluster")?,
            difficulty: difficulty_of(record)?,
        })
    }
}

fn text_field(obj: &Map<String, Value>, field: &'static str) -> CpResult<String> {
    match obj.get(field) {
        None => Err(CpError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) => Ok(String::new()),
        Some(other) => Ok(other.to_string()),
    }
}

/// Read the integer `difficulty` of any record (dataset, generation output or
/// execution results).
pub fn difficulty_of(record: &Value) -> CpResult<i64> {
    let value = record
        .get("difficulty")
        .ok_or(CpError::MissingField("difficulty"))?;
    if let Some(d) = value.as_i64() {
        return Ok(d);
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 => Ok(f as i64),
        _ => Err(CpError::InvalidField {
            field: "difficulty",
            reason: format!("expected an integer, got {value}"),
        }),
    }
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub candidate_count: usize,
    pub max_output_tokens: usize,
}

/// A single request for a problem. Consumed once by the generator.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub problem_id: String,
    pub prompt: String,
    pub params: SamplingParams,
}

/// Text of one candidate slot. `Empty` is the explicit placeholder for a slot
/// the generator did not fill or whose output was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateText {
    Raw(String),
    Empty,
}

impl CandidateText {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Raw(s) => s,
            Self::Empty => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateResponse {
    pub index: usize,
    pub text: CandidateText,
}

/// Pad generator output to exactly `candidate_count` positional slots.
///
/// Extra outputs beyond `candidate_count` are dropped; empty strings become
/// `CandidateText::Empty`.
pub fn pad_candidates(texts: Vec<String>, candidate_count: usize) -> Vec<CandidateResponse> {
    let mut texts = texts.into_iter();
    (0..candidate_count)
        .map(|index| {
            let text = match texts.next() {
                Some(s) if !s.is_empty() => CandidateText::Raw(s),
                _ => CandidateText::Empty,
            };
            CandidateResponse { index, text }
        })
        .collect()
}

/// Code recovered from one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedCode {
    pub version: String,
    #[serde(rename = "target code")]
    pub target_code: String,
}
