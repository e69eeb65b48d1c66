mod openai_client;
mod response_cache;

pub use openai_client::OpenAiClient;
pub use response_cache::{CachedCompletion, PromptCache};
