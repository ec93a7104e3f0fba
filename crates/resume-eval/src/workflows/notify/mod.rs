//! Chat notifications for evaluated candidates.
//!
//! Pushes go out through a signed group-robot webhook, either on the daily schedule, on demand,
//! or automatically after a batch finishes. Every push opens a session so that a numeric reply
//! in the group ("1", "1,3") can be mapped back to the candidates it listed.

pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod format;
pub mod inbound;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod session;

#[cfg(test)]
mod tests;

pub use config::{NotifyConfig, NotifyConfigStore};
pub use correlator::{parse_selection, ReplyCorrelator, ReplyError, Resolution};
pub use dispatcher::{
    ChatDispatcher, DispatchError, MarkdownMessage, Mentions, WebhookDispatcher, WebhookTarget,
};
pub use inbound::{CallbackBoundary, CallbackOutcome, InboundHandler, InboundMessage};
pub use router::notify_router;
pub use scheduler::{PushSchedule, PushScheduler, ScheduleError};
pub use service::{PushError, PushKind, PushService};
pub use session::{PushSession, PushSessionStore};
