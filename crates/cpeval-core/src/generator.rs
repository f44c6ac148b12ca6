use crate::error::CpResult;
use crate::problem::SamplingParams;

/// A black-box text-generation capability: one prompt in, up to
/// `params.candidate_count` completions out.
pub trait TextGenerator {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> CpResult<Vec<String>>;

    /// Maximum context length the provider reports, if known.
    fn max_context_tokens(&self) -> Option<usize> {
        None
    }

    fn model_name(&self) -> &str;
}

pub trait TokenCounter {
    fn count_tokens(&self, text: &str) -> CpResult<usize>;
}

impl<T: TextGenerator + ?Sized> TextGenerator for &T {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> CpResult<Vec<String>> {
        (**self).generate(prompt, params)
    }

    fn max_context_tokens(&self) -> Option<usize> {
        (**self).max_context_tokens()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

impl<T: TextGenerator + ?Sized> TextGenerator for Box<T> {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> CpResult<Vec<String>> {
        (**self).generate(prompt, params)
    }

    fn max_context_tokens(&self) -> Option<usize> {
        (**self).max_context_tokens()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

impl<T: TokenCounter + ?Sized> TokenCounter for Box<T> {
    fn count_tokens(&self, text: &str) -> CpResult<usize> {
        (**self).count_tokens(text)
    }
}
