use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::preamble::{compose_preamble, compose_prompt, title_instruction};
use super::provider::{
    BoxFuture, CompletionsFailedSnafu, EmptyPromptSnafu, HttpClientSnafu, LlmProvider,
    MissingApiKeySnafu, ProviderConfig, ProviderError, ProviderMessage, ProviderResult,
    ProviderStreamHandle, ProviderWorker, Role, StreamEventMapped, StreamEventPayload,
    StreamRequest, StreamTarget, SummaryFailedSnafu, make_event_stream,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

/// Settings shared with the configuration layer; swapped in place when the user edits them.
pub type SharedProviderConfig = Arc<ArcSwap<ProviderConfig>>;

/// Everything one upstream completion call needs, detached from the shared config.
struct OpenStream {
    preamble: Option<String>,
    history: Vec<RigMessage>,
    prompt: RigMessage,
    temperature: Option<f64>,
}

pub struct RigProviderAdapter {
    config: SharedProviderConfig,
}

impl RigProviderAdapter {
    pub fn new(config: SharedProviderConfig) -> Self {
        Self { config }
    }

    fn current_config(&self, stage: &'static str) -> ProviderResult<ProviderConfig> {
        let config = self.config.load_full();
        ensure!(
            config.has_credential(),
            MissingApiKeySnafu {
                stage,
                provider_id: config.provider_id.clone(),
            }
        );
        Ok(config.as_ref().clone())
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_rig_message(message: &ProviderMessage) -> Option<RigMessage> {
        match message.role {
            Role::System => None,
            Role::User => Some(RigMessage::user(message.content.clone())),
            Role::Assistant => Some(RigMessage::assistant(message.content.clone())),
        }
    }

    fn build_open_stream(request: &StreamRequest) -> OpenStream {
        // System-role history entries fold into the single preamble rig exposes.
        let system_parts = request
            .history
            .iter()
            .filter(|message| matches!(message.role, Role::System))
            .map(|message| message.content.clone())
            .collect::<Vec<_>>();

        OpenStream {
            preamble: Some(compose_preamble(&request.options, &system_parts)),
            history: request
                .history
                .iter()
                .filter(|message| !message.content.trim().is_empty())
                .filter_map(Self::to_rig_message)
                .collect(),
            prompt: RigMessage::user(compose_prompt(
                &request.prompt,
                request.hidden_context.as_deref(),
            )),
            temperature: request.temperature,
        }
    }

    async fn open_stream(
        config: &ProviderConfig,
        open: OpenStream,
    ) -> ProviderResult<RigStreamingResponse> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(config.model.clone());

        let mut builder = model.completion_request(open.prompt).messages(open.history);

        if let Some(preamble) = open.preamble {
            builder = builder.preamble(preamble);
        }

        if let Some(temperature) = open.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = config.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn emit_error_event(
        event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
        target: StreamTarget,
        error: ProviderError,
    ) {
        let _ = event_tx.send(StreamEventMapped::error(target, error.to_string()));
    }

    fn map_stream_item<R>(
        target: StreamTarget,
        item: StreamedAssistantContent<R>,
    ) -> Option<StreamEventMapped>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) if !text.text.is_empty() => Some(
                StreamEventMapped {
                    target,
                    payload: StreamEventPayload::Delta(text.text),
                },
            ),
            // Reasoning and tool traffic never reaches the reply text.
            _ => None,
        }
    }

    async fn run_stream_worker(
        config: ProviderConfig,
        target: StreamTarget,
        open: OpenStream,
        event_tx: mpsc::UnboundedSender<StreamEventMapped>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let mut stream = match Self::open_stream(&config, open).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    target = ?target,
                    provider_id = %config.provider_id,
                    model_id = %config.model,
                    error = %error,
                    "failed to open provider stream"
                );
                Self::emit_error_event(&event_tx, target, error);
                return;
            }
        };

        let mut cancelled = false;
        let mut stream_failed = false;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    tracing::debug!(target = ?target, "provider stream cancelled");
                    stream.cancel();
                    break;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(mapped) = Self::map_stream_item(target, item)
                                && event_tx.send(mapped).is_err()
                            {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            stream_failed = true;
                            tracing::warn!(
                                target = ?target,
                                error = %source,
                                "provider stream emitted an error chunk"
                            );
                            let error = ProviderError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            Self::emit_error_event(&event_tx, target, error);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if !cancelled && !stream_failed {
            let _ = event_tx.send(StreamEventMapped::done(target));
        }
    }

    async fn collect_title(&self, prompt: String, language: String) -> ProviderResult<String> {
        let config = self.current_config("summarize-title")?;
        let open = OpenStream {
            preamble: Some(title_instruction(&language)),
            history: Vec::new(),
            prompt: RigMessage::user(prompt),
            temperature: Some(0.3),
        };

        let mut stream = Self::open_stream(&config, open).await?;
        let mut title = String::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(StreamedAssistantContent::Text(text)) => title.push_str(&text.text),
                Ok(_) => {}
                Err(source) => {
                    return Err(ProviderError::CompletionsFailed {
                        stage: "summarize-title-chunk",
                        source,
                    });
                }
            }
        }

        ensure!(
            !title.trim().is_empty(),
            SummaryFailedSnafu {
                stage: "summarize-title-empty",
                message: "provider returned an empty title".to_string(),
            }
        );
        Ok(title)
    }
}

impl LlmProvider for RigProviderAdapter {
    fn id(&self) -> &str {
        RIG_OPENAI_PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Rig OpenAI"
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.prompt.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "stream-chat",
                target: request.target,
            }
        );
        let config = self.current_config("stream-chat")?;

        let target = request.target;
        let open = Self::build_open_stream(&request);
        let (event_tx, stream, cancel_rx) = make_event_stream(target);
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            config, target, open, event_tx, cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }

    fn summarize_title<'a>(
        &'a self,
        prompt: String,
        language: String,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(self.collect_title(prompt, language))
    }
}
