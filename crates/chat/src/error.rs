use selah_storage::SessionId;
use snafu::Snafu;

use crate::stream::GenerationTarget;

/// Reasons a send is refused before any state changes.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DispatchError {
    #[snafu(display("a generation credential is required before chatting"))]
    CredentialRequired { stage: &'static str },
    #[snafu(display("there is no active session to send into"))]
    NoActiveSession { stage: &'static str },
    #[snafu(display("session {session_id} is still waiting on {active:?}"))]
    GenerationInFlight {
        stage: &'static str,
        session_id: SessionId,
        active: GenerationTarget,
    },
    #[snafu(display("message text is empty"))]
    EmptyPrompt { stage: &'static str },
}

pub type DispatchResult<T> = Result<T, DispatchError>;
