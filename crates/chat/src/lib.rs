//! Chat session controller: the in-memory session list, sending and streaming replies,
//! regeneration, title assignment and best-effort persistence.

mod accumulator;
mod controller;
mod credential;
mod dispatch;
mod error;
mod events;
mod generation;
mod locale;
mod message;
mod reconciler;
mod regenerate;
mod store;
mod stream;
mod title;

pub use accumulator::{AccumulatorStep, StreamAccumulator};
pub use controller::{ChatController, ChatDependencies, ChatOptions, DEFAULT_STREAM_IDLE_TIMEOUT};
pub use credential::{CredentialGate, CredentialProbe, CredentialWatch, StaticCredential};
pub use error::{DispatchError, DispatchResult};
pub use events::ChatEvent;
pub use generation::Generation;
pub use locale::{BuiltinLocalizer, Localizer};
pub use message::{ChatSession, Message, Role, TitleState};
pub use reconciler::PersistenceReconciler;
pub use regenerate::regeneration_context;
pub use store::{RemovedSession, SessionStore};
pub use stream::{
    GenerationOutcome, GenerationTarget, StreamState, StreamTransition, StreamTransitionRejection,
};
pub use title::clean_title;
