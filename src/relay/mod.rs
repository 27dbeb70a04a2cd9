//! Relay worker
//!
//! Pages open named channels to the [`RelayWorker`]; each stream request
//! becomes a session that calls the provider and relays decoded fragments
//! back over the channel. One cancellation handle per tab lets the page
//! abort its in-flight request.

pub mod capture;
pub mod decoder;
pub mod metrics;
pub mod port;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod speech;
pub mod stream;
pub mod task;
pub mod worker;

pub use capture::{Capture, FileCapture};
pub use decoder::{SseDecoder, StreamFragment};
pub use metrics::SessionOutcome;
pub use port::{PagePort, ReplySender, TabId};
pub use protocol::{PageAction, PageRequest, Reply, ReplyAction, ReplyMessage, ReplyStatus};
pub use registry::{CancellationHandle, CancellationRegistry};
pub use session::{
    build_messages, run_session, SessionContext, SessionRequest, INCORRECT_KEY_MESSAGE,
    STOPPED_MESSAGE, STREAMING_UNSUPPORTED_MESSAGE,
};
pub use speech::run_read;
pub use task::{Task, TaskKind};
pub use worker::RelayWorker;
