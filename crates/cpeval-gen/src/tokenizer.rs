use cpeval_core::{CpResult, TokenCounter};

/// Length-based estimate for providers without a local tokenizer:
/// one token per `bytes_per_token` bytes, rounded up.
#[derive(Debug, Clone)]
pub struct ApproxTokenCounter {
    bytes_per_token: usize,
}

impl ApproxTokenCounter {
    pub fn new(bytes_per_token: usize) -> Self {
        Self {
            bytes_per_token: bytes_per_token.max(1),
        }
    }
}

impl Default for ApproxTokenCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for ApproxTokenCounter {
    fn count_tokens(&self, text: &str) -> CpResult<usize> {
        Ok(text.len().div_ceil(self.bytes_per_token))
    }
}

#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenCounter;

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use std::path::Path;

    use cpeval_core::{CpError, CpResult, TokenCounter};
    use tokenizers::Tokenizer;

    /// Counts with the model's own `tokenizer.json`.
    pub struct HfTokenCounter {
        tokenizer: Tokenizer,
    }

    impl HfTokenCounter {
        pub fn from_file(path: &Path) -> CpResult<Self> {
            let tokenizer = Tokenizer::from_file(path).map_err(|e| {
                CpError::Tokenizer(format!("cannot load {}: {e}", path.display()))
            })?;
            Ok(Self { tokenizer })
        }
    }

    impl TokenCounter for HfTokenCounter {
        fn count_tokens(&self, text: &str) -> CpResult<usize> {
            self.tokenizer
                .encode(text, false)
                .map(|enc| enc.len())
                .map_err(|e| CpError::Tokenizer(e.to_string()))
        }
    }
}
