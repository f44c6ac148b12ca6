//! Sequential batch runs over JSON-lines files.
//!
//! Problems are processed one at a time; every output record is written and
//! flushed before the next problem starts. Dataset-level errors (missing
//! fields, unknown clusters) are raised before the first generation call.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{info, warn};

use cpeval_core::{
    slot_index, slot_key, CandidateText, CpError, CpResult, Extractor, GenerationRequest, LangCluster, Problem,
    PromptBuilder, SamplingParams, TextGenerator, TokenCounter,
};

use crate::resilient::ResilientGenerator;

/// Stream the records of a JSON-lines file, skipping blank lines.
pub fn jsonl_records(path: &Path) -> CpResult<impl Iterator<Item = CpResult<Value>>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(reader
        .lines()
        .enumerate()
        .filter_map(|(i, line)| match line {
            Ok(l) if l.trim().is_empty() => None,
            Ok(l) => Some(serde_json::from_str(&l).map_err(|e| CpError::InvalidField {
                field: "jsonl",
                reason: format!("line {}: {e}", i + 1),
            })),
            Err(e) => Some(Err(e.into())),
        }))
}

pub fn read_jsonl(path: &Path) -> CpResult<Vec<Value>> {
    jsonl_records(path)?.collect()
}

fn write_record<W: Write>(out: &mut W, record: &Map<String, Value>) -> CpResult<()> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub params: SamplingParams,
    /// Store extracted payloads instead of raw model text.
    pub extract: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub problems: usize,
    /// Problems whose every slot ended up empty.
    pub failed: usize,
    pub empty_slots: usize,
    /// Slots emptied for exceeding the output budget.
    pub discarded_slots: usize,
    /// Prompts sent despite exceeding the model's context window.
    pub over_context: usize,
}

struct Prepared {
    record: Map<String, Value>,
    problem: Problem,
    cluster: LangCluster,
    prompt: String,
}

fn prepare(records: Vec<Value>, builder: &PromptBuilder) -> CpResult<Vec<Prepared>> {
    records
        .into_iter()
        .map(|value| {
            let problem = Problem::from_value(&value)?;
            let cluster = builder.validate(&problem)?;
            let prompt = builder.build(&problem)?;
            let Value::Object(record) = value else {
                return Err(CpError::InvalidField {
                    field: "record",
                    reason: "expected a JSON object".into(),
                });
            };
            Ok(Prepared {
                record,
                problem,
                cluster,
                prompt,
            })
        })
        .collect()
}

/// Generate candidates for every record and write one output line per problem.
///
/// Output records keep every input field and add `program_synthesis_0 ..
/// program_synthesis_{k-1}`, each always present.
pub fn run_batch<G, C, W>(
    records: Vec<Value>,
    builder: &PromptBuilder,
    generator: &ResilientGenerator<G, C>,
    options: &BatchOptions,
    out: &mut W,
) -> CpResult<BatchStats>
where
    G: TextGenerator,
    C: TokenCounter,
    W: Write,
{
    let prepared = prepare(records, builder)?;
    let total = prepared.len();
    let mut stats = BatchStats::default();

    for (n, item) in prepared.into_iter().enumerate() {
        info!(
            "[{}/{}] problem {} ({}, difficulty {})",
            n + 1,
            total,
            item.problem.src_uid,
            item.cluster,
            item.problem.difficulty
        );
        let request = GenerationRequest {
            problem_id: item.problem.src_uid.clone(),
            prompt: item.prompt,
            params: options.params.clone(),
        };
        let generation = generator.generate_padded(&request);
        let slots = generation.slots;
        let extractor = options.extract.then(|| Extractor::for_cluster(item.cluster));

        let mut record = item.record;
        let mut empty = 0;
        for slot in &slots {
            let value = match (&slot.text, &extractor) {
                (CandidateText::Empty, _) => String::new(),
                (CandidateText::Raw(raw), None) => raw.clone(),
                (CandidateText::Raw(raw), Some(ex)) => ex.extract(raw).payload.wrapped(),
            };
            if slot.text == CandidateText::Empty {
                empty += 1;
            }
            record.insert(slot_key(slot.index), Value::String(value));
        }

        stats.problems += 1;
        stats.empty_slots += empty;
        stats.discarded_slots += generation.discarded;
        stats.over_context += usize::from(generation.over_context);
        if empty == slots.len() {
            stats.failed += 1;
        }
        write_record(out, &record)?;
    }

    Ok(stats)
}

/// Re-extract every candidate slot of previously generated records.
///
/// Slots `0..candidate_count` are always written; any higher
/// `program_synthesis_i` already present in a record is re-extracted too.
/// Non-empty slots become wrapped payloads (an empty wrapped payload when
/// nothing is recovered); empty or missing slots are written as `""`.
pub fn postprocess_records<I, W>(records: I, candidate_count: usize, out: &mut W) -> CpResult<usize>
where
    I: IntoIterator<Item = CpResult<Value>>,
    W: Write,
{
    let mut written = 0;
    for record in records {
        let mut record = match record? {
            Value::Object(map) => map,
            other => {
                return Err(CpError::InvalidField {
                    field: "record",
                    reason: format!("expected a JSON object, got {other}"),
                })
            }
        };

        let cluster_name = record
            .get("lang_cluster")
            .and_then(Value::as_str)
            .unwrap_or("python");
        let extractor = match cluster_name.parse::<LangCluster>() {
            Ok(cluster) => Extractor::for_cluster(cluster),
            Err(e) => {
                warn!("{e}; using the python extraction chain");
                Extractor::default()
            }
        };

        let present = record
            .keys()
            .filter_map(|key| slot_index(key))
            .map(|index| index + 1)
            .max()
            .unwrap_or(0);
        if present > candidate_count {
            warn!(
                "record has {present} candidate slots, more than the requested {candidate_count}; re-extracting all of them"
            );
        }

        for index in 0..present.max(candidate_count) {
            let key = slot_key(index);
            let raw = record.get(&key).and_then(Value::as_str).unwrap_or("");
            let value = if raw.is_empty() {
                String::new()
            } else {
                extractor.extract(raw).payload.wrapped()
            };
            record.insert(key, Value::String(value));
        }

        write_record(out, &record)?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::resilient::GeneratorConfig;
    use crate::retry::{RetryPolicy, Sleeper};
    use crate::tokenizer::ApproxTokenCounter;
    use cpeval_core::EnvironmentCatalogue;

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _: Duration) {}
    }

    /// Returns `outputs` for every call, except that calls listed in `fail_on`
    /// fail with a non-transient error.
    struct Canned {
        outputs: Vec<String>,
        fail_on: Vec<u32>,
        calls: Cell<u32>,
    }

    impl TextGenerator for Canned {
        fn generate(&self, _prompt: &str, _params: &SamplingParams) -> CpResult<Vec<String>> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if self.fail_on.contains(&n) {
                return Err(CpError::Provider {
                    status: 400,
                    message: "rejected".into(),
                });
            }
            Ok(self.outputs.clone())
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn generator(outputs: &[&str], fail_on: &[u32]) -> ResilientGenerator<Canned, ApproxTokenCounter> {
        let inner = Canned {
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            fail_on: fail_on.to_vec(),
            calls: Cell::new(0),
        };
        ResilientGenerator::new(
            inner,
            ApproxTokenCounter::default(),
            RetryPolicy::default(),
            GeneratorConfig::default(),
        )
        .with_sleeper(Box::new(NoSleep))
    }

    fn problem(uid: &str, cluster: &str, difficulty: i64) -> Value {
        json!({
            "src_uid": uid,
            "description": "d",
            "input_specification": "i",
            "output_specification": "o",
            "sample_inputs": ["1"],
            "sample_outputs": ["1"],
            "notes": "",
            "lang_cluster": cluster,
            "difficulty": difficulty,
            "testcases": "[]"
        })
    }

    fn options(k: usize, extract: bool) -> BatchOptions {
        BatchOptions {
            params: SamplingParams {
                temperature: 0.5,
                candidate_count: k,
                max_output_tokens: 1024,
            },
            extract,
        }
    }

    fn lines(out: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(out)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_every_record_has_exactly_k_slots() {
        let records = vec![problem("a", "Python", 800), problem("b", "Python", 1900)];
        let gen = generator(&["```python\nprint(1)\n```"], &[2]);
        let mut out = Vec::new();
        let stats = run_batch(
            records,
            &PromptBuilder::default(),
            &gen,
            &options(3, false),
            &mut out,
        )
        .unwrap();

        assert_eq!(stats.problems, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.empty_slots, 5);
        let written = lines(&out);
        assert_eq!(written.len(), 2);
        for record in &written {
            let slots = record
                .as_object()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with("program_synthesis_"))
                .count();
            assert_eq!(slots, 3);
            assert_eq!(record["testcases"], "[]");
        }
        assert_eq!(written[0]["program_synthesis_0"], "```python\nprint(1)\n```");
        assert_eq!(written[0]["program_synthesis_1"], "");
        assert_eq!(written[1]["program_synthesis_0"], "");
    }

    #[test]
    fn test_over_budget_slots_counted_separately_from_failures() {
        let long = "y".repeat(200);
        let gen = generator(&["x", &long], &[]);
        let mut opts = options(2, false);
        opts.params.max_output_tokens = 10;
        let mut out = Vec::new();
        let stats = run_batch(
            vec![problem("a", "python", 800)],
            &PromptBuilder::default(),
            &gen,
            &opts,
            &mut out,
        )
        .unwrap();
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.empty_slots, 1);
        assert_eq!(stats.discarded_slots, 1);
        assert_eq!(stats.over_context, 0);
        assert_eq!(lines(&out)[0]["program_synthesis_1"], "");
    }

    #[test]
    fn test_inline_extraction() {
        let gen = generator(&["Sure!\n```python\nprint(1)\n```", "no code here"], &[]);
        let mut out = Vec::new();
        run_batch(
            vec![problem("a", "python", 800)],
            &PromptBuilder::default(),
            &gen,
            &options(2, true),
            &mut out,
        )
        .unwrap();
        let written = lines(&out);
        assert_eq!(
            written[0]["program_synthesis_0"],
            "```json\n[{\"version\":\"python3\",\"target code\":\"print(1)\"}]\n```"
        );
        assert_eq!(written[0]["program_synthesis_1"], "```json\n\n```");
    }

    #[test]
    fn test_unknown_cluster_fails_before_generation() {
        let records = vec![problem("a", "python", 800), problem("b", "cobol", 800)];
        let gen = generator(&["x"], &[]);
        let mut out = Vec::new();
        let err = run_batch(
            records,
            &PromptBuilder::default(),
            &gen,
            &options(1, false),
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, CpError::UnknownLanguageCluster(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_missing_field_fails_before_generation() {
        let mut bad = problem("b", "python", 800);
        bad.as_object_mut().unwrap().remove("notes");
        let gen = generator(&["x"], &[]);
        let mut out = Vec::new();
        let err = run_batch(
            vec![problem("a", "python", 800), bad],
            &PromptBuilder::new(EnvironmentCatalogue::python_only()),
            &gen,
            &options(1, false),
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, CpError::MissingField("notes")));
        assert!(out.is_empty());
    }

    #[test]
    fn test_postprocess_records() {
        let mut generated = problem("a", "Python", 800);
        let obj = generated.as_object_mut().unwrap();
        obj.insert("program_synthesis_0".into(), json!("```python\nprint(1)\n```"));
        obj.insert(
            "program_synthesis_1".into(),
            json!(r#"text [{"version": "python3", "target code": "x"}] more"#),
        );

        let mut out = Vec::new();
        let written = postprocess_records(vec![Ok(generated)], 3, &mut out).unwrap();
        assert_eq!(written, 1);
        let record = &lines(&out)[0];
        assert_eq!(
            record["program_synthesis_0"],
            "```json\n[{\"version\":\"python3\",\"target code\":\"print(1)\"}]\n```"
        );
        assert_eq!(
            record["program_synthesis_1"],
            "```json\n[{\"version\": \"python3\", \"target code\": \"x\"}]\n```"
        );
        assert_eq!(record["program_synthesis_2"], "");
        assert_eq!(record["src_uid"], "a");
    }

    #[test]
    fn test_postprocess_covers_slots_beyond_candidate_count() {
        let mut generated = problem("a", "python", 800);
        let obj = generated.as_object_mut().unwrap();
        obj.insert("program_synthesis_0".into(), json!("```python\nprint(1)\n```"));
        obj.insert("program_synthesis_1".into(), json!("```python\nprint(2)\n```"));

        let mut out = Vec::new();
        postprocess_records(vec![Ok(generated)], 1, &mut out).unwrap();
        let record = &lines(&out)[0];
        assert_eq!(
            record["program_synthesis_1"],
            "```json\n[{\"version\":\"python3\",\"target code\":\"print(2)\"}]\n```"
        );
        assert!(record.get("program_synthesis_2").is_none());
    }

    #[test]
    fn test_jsonl_roundtrip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("problems.jsonl");
        let mut body = String::new();
        for v in [problem("a", "go", 1600), problem("b", "go", 900)] {
            body.push_str(&v.to_string());
            body.push_str("\n\n");
        }
        std::fs::write(&input, body).unwrap();

        let records = read_jsonl(&input).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["src_uid"], "b");

        std::fs::write(&input, "{\"a\": 1}\n{broken\n").unwrap();
        let err = read_jsonl(&input).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
