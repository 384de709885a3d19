//! Query service transports
//!
//! A transport carries requests to a query back end. Replies arrive later as
//! [`TransportEvent`]s on the channel handed over with each request, tagged
//! with the session id and the request token they answer.

mod archive;

pub use archive::ArchiveQueryTransport;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::plan::QueryPlanRecord;
use crate::result::{Classification, QueryResult, ResultId};

/// Identifies one request issued by a session
pub type RequestToken = u64;

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the channel transport events travel on
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    ResultAvailable {
        result: Box<QueryResult>,
        feedback_request: bool,
    },
    ResultSetComplete {
        has_feedback_requests: bool,
    },
    Error(String),
    Status(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub session_id: Uuid,
    pub token: RequestToken,
    pub kind: TransportEventKind,
}

/// Where replies to a request are delivered
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session_id: Uuid,
    pub token: RequestToken,
    events: EventSender,
}

impl RequestContext {
    pub fn new(session_id: Uuid, token: RequestToken, events: EventSender) -> Self {
        Self {
            session_id,
            token,
            events,
        }
    }

    /// Deliver an event; false once the receiving side is gone
    pub fn emit(&self, kind: TransportEventKind) -> bool {
        self.events
            .send(TransportEvent {
                session_id: self.session_id,
                token: self.token,
                kind,
            })
            .is_ok()
    }
}

/// Trait for query back ends
pub trait QueryTransport: Send + Sync {
    /// Service location this transport talks to
    fn endpoint(&self) -> &str;

    /// Start a query; results arrive asynchronously
    fn submit(
        &self,
        ctx: RequestContext,
        plan: &QueryPlanRecord,
        working_set_size: usize,
    ) -> anyhow::Result<()>;

    /// Re-run the query using relevance feedback
    fn refine(
        &self,
        ctx: RequestContext,
        feedback: &[(ResultId, Classification)],
    ) -> anyhow::Result<()>;

    /// Ask for up to `count` results the service wants classified
    fn request_feedback(&self, ctx: RequestContext, count: usize) -> anyhow::Result<()>;

    /// Record feedback on a single result
    fn send_feedback(
        &self,
        session_id: Uuid,
        id: ResultId,
        classification: Classification,
    ) -> anyhow::Result<()>;

    /// Stop emitting events for a request
    fn cancel(&self, session_id: Uuid, token: RequestToken);

    /// Drop everything held for a session
    fn release(&self, session_id: Uuid);
}
