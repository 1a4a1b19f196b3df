pub mod anthropic;
pub mod gateway;
pub mod google;
pub mod oauth;
pub mod openai_compat;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod secrets;
pub mod traits;
pub mod transport;
pub(crate) mod sse;
pub mod util;

// Re-exports for convenience.
pub use gateway::Gateway;
pub use registry::ProviderRegistry;
pub use secrets::{KeyringSecretStore, MemorySecretStore, SecretStore};
pub use traits::{ChatRequest, ChatResponse, DeltaCallback, LlmClient, ProviderAdapter};
pub use transport::{ChannelTransport, HttpTransport, Transport};
