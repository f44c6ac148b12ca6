//! Generation wrapped in retry, token budgets and a post-call cooldown.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use cpeval_core::{
    pad_candidates, CandidateResponse, ChatTemplate, CpResult, GenerationRequest, TextGenerator,
    TokenCounter,
};

use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Wait after every successful call, for provider rate limits.
    pub cooldown: Duration,
    /// Applied to every returned candidate before budgeting.
    pub template: ChatTemplate,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            template: ChatTemplate::Raw,
        }
    }
}

/// Completions of one successful call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub texts: Vec<String>,
    /// Candidates replaced with `""` for exceeding the output budget.
    pub discarded: usize,
    /// The prompt was longer than the model's context window.
    pub over_context: bool,
}

/// Outcome of [`ResilientGenerator::generate_padded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedGeneration {
    pub slots: Vec<CandidateResponse>,
    pub discarded: usize,
    pub over_context: bool,
    /// The call failed and every slot is empty.
    pub failed: bool,
}

pub struct ResilientGenerator<G, C> {
    inner: G,
    counter: C,
    policy: RetryPolicy,
    config: GeneratorConfig,
    sleeper: Box<dyn Sleeper>,
}

impl<G: TextGenerator, C: TokenCounter> ResilientGenerator<G, C> {
    pub fn new(inner: G, counter: C, policy: RetryPolicy, config: GeneratorConfig) -> Self {
        Self {
            inner,
            counter,
            policy,
            config,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    /// Generate up to `candidate_count` completions.
    ///
    /// An over-long prompt is only warned about; the request is still sent.
    /// A completion over the output budget comes back as an empty string and
    /// is counted in [`Generation::discarded`].
    /// Exhausted retries and non-transient provider errors propagate.
    pub fn generate(&self, request: &GenerationRequest) -> CpResult<Generation> {
        let input_tokens = self.counter.count_tokens(&request.prompt)?;
        info!("problem {}: {input_tokens} input tokens", request.problem_id);
        let over_context = match self.inner.max_context_tokens() {
            Some(max) if input_tokens > max => {
                warn!(
                    "problem {}: prompt has {input_tokens} tokens, over the {max} token context",
                    request.problem_id
                );
                true
            }
            _ => false,
        };

        let outputs = self.policy.run(self.sleeper.as_ref(), |attempt| {
            debug!("problem {}: generation attempt {attempt}", request.problem_id);
            self.inner.generate(&request.prompt, &request.params)
        })?;
        self.sleeper.sleep(self.config.cooldown);

        let budget = request.params.max_output_tokens;
        let mut texts = Vec::with_capacity(outputs.len());
        let mut discarded = 0;
        for (index, raw) in outputs
            .into_iter()
            .take(request.params.candidate_count)
            .enumerate()
        {
            let text = self.config.template.clean_response(&raw);
            let output_tokens = self.counter.count_tokens(&text)?;
            debug!("problem {} candidate {index}: {output_tokens} output tokens", request.problem_id);
            if output_tokens > budget {
                warn!(
                    "problem {} candidate {index}: {output_tokens} tokens over the {budget} budget, discarded",
                    request.problem_id
                );
                discarded += 1;
                texts.push(String::new());
            } else {
                texts.push(text);
            }
        }
        Ok(Generation {
            texts,
            discarded,
            over_context,
        })
    }

    /// Generate and pad to exactly `candidate_count` slots. Any failure
    /// leaves every slot empty.
    pub fn generate_padded(&self, request: &GenerationRequest) -> PaddedGeneration {
        let (generation, failed) = match self.generate(request) {
            Ok(generation) => (generation, false),
            Err(e) => {
                error!("problem {}: generation failed: {e}", request.problem_id);
                (Generation::default(), true)
            }
        };
        let Generation {
            texts,
            discarded,
            over_context,
        } = generation;
        if !failed && texts.len() < request.params.candidate_count {
            warn!(
                "problem {}: {} of {} candidates returned",
                request.problem_id,
                texts.len(),
                request.params.candidate_count
            );
        }
        PaddedGeneration {
            slots: pad_candidates(texts, request.params.candidate_count),
            discarded,
            over_context,
            failed,
        }
    }
}
