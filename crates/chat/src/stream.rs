use selah_llm::StreamTarget as ProviderStreamTarget;
use selah_storage::{MessageId, SessionId};

/// Routing key for one generation: the owning session and the placeholder being filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationTarget {
    pub session_id: SessionId,
    pub message_id: MessageId,
}

impl GenerationTarget {
    pub const fn new(session_id: SessionId, message_id: MessageId) -> Self {
        Self {
            session_id,
            message_id,
        }
    }

    pub fn to_provider(self) -> ProviderStreamTarget {
        ProviderStreamTarget::new(self.session_id.as_uuid(), self.message_id.as_uuid())
    }

    pub fn matches_provider(self, target: ProviderStreamTarget) -> bool {
        self.to_provider() == target
    }
}

/// How a generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

impl GenerationOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Completed replies are written back, cancelled ones only when something arrived.
    /// Failed replies stay local.
    pub fn persists_reply(&self, text: &str) -> bool {
        match self {
            Self::Completed => true,
            Self::Cancelled => !text.is_empty(),
            Self::Failed(_) => false,
        }
    }
}

/// Controller-wide generation lifecycle. At most one generation streams at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming(GenerationTarget),
    Finished {
        target: GenerationTarget,
        outcome: GenerationOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Start(GenerationTarget),
    Finish {
        target: GenerationTarget,
        outcome: GenerationOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStreaming {
        active: GenerationTarget,
        attempted: GenerationTarget,
    },
    NoActiveStream,
    TargetMismatch {
        active: GenerationTarget,
        attempted: GenerationTarget,
    },
}

pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    pub fn active_target(&self) -> Option<GenerationTarget> {
        match self {
            Self::Streaming(target) => Some(*target),
            Self::Idle | Self::Finished { .. } => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.active_target().is_some()
    }

    /// True when incoming stream data belongs to the in-flight generation.
    pub fn accepts(&self, target: GenerationTarget) -> bool {
        matches!(self, Self::Streaming(active) if *active == target)
    }

    /// Applies one transition. Finishing must name the active target exactly.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Start(target) => match self {
                Self::Streaming(active) => Err(StreamTransitionRejection::AlreadyStreaming {
                    active: *active,
                    attempted: target,
                }),
                Self::Idle | Self::Finished { .. } => Ok(Self::Streaming(target)),
            },
            StreamTransition::Finish { target, outcome } => match self {
                Self::Streaming(active) if *active == target => {
                    Ok(Self::Finished { target, outcome })
                }
                Self::Streaming(active) => Err(StreamTransitionRejection::TargetMismatch {
                    active: *active,
                    attempted: target,
                }),
                Self::Idle | Self::Finished { .. } => {
                    Err(StreamTransitionRejection::NoActiveStream)
                }
            },
        }
    }
}
