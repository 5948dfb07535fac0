use std::sync::Arc;

mod preamble;
mod provider;
mod rig_adapter;

pub use preamble::{DEFAULT_PERSONA, compose_preamble, compose_prompt, title_instruction};
pub use provider::{
    BoxFuture, GenerationOptions, LlmProvider, ProviderConfig, ProviderError, ProviderEventStream,
    ProviderMessage, ProviderResult, ProviderStreamHandle, ProviderWorker, Role,
    StreamEventMapped, StreamEventPayload, StreamRequest, StreamTarget, make_event_stream,
};
pub use rig_adapter::{RIG_OPENAI_PROVIDER_ID, RigProviderAdapter, SharedProviderConfig};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

pub fn create_provider(config: SharedProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    let provider_id = config.load().provider_id.trim().to_string();

    match provider_id.as_str() {
        "" | "openai" | "rig-openai" => Ok(Arc::new(RigProviderAdapter::new(config))),
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id,
        }),
    }
}
