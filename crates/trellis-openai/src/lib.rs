// OpenAI protocol driver for Trellis
//
// Implements the core LlmDriver trait over the chat-completions streaming
// API. Works against api.openai.com or any compatible endpoint via
// `with_base_url`.

pub mod driver;
pub mod types;

pub use driver::OpenAiProtocolDriver;
