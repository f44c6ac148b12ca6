pub mod batch;
pub mod provider;
pub mod resilient;
pub mod retry;
pub mod tokenizer;

pub use batch::{jsonl_records, postprocess_records, read_jsonl, run_batch, BatchOptions, BatchStats};
pub use provider::{GeminiProvider, OpenAiProvider, ProviderConfig, ProviderKind};
pub use resilient::{Generation, GeneratorConfig, PaddedGeneration, ResilientGenerator};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
#[cfg(feature = "hf-tokenizer")]
pub use tokenizer::HfTokenCounter;
pub use tokenizer::ApproxTokenCounter;
