//! Content-based query sessions
//!
//! Query plans and their KST reader, result records, the session state
//! machine driving a query transport, and the binder that turns results
//! into video and tracks for playback.

pub mod binder;
pub mod error;
pub mod plan;
pub mod result;
pub mod session;
pub mod transport;

// Re-exports
pub use binder::{BinderConfig, BoundResult, ResultBinder};
pub use error::{PlanErrorKind, QueryError};
pub use plan::{read_plan, Plan, QueryPlanRecord};
pub use result::{Classification, QueryResult, ResultId, SortOrder};
pub use session::{
    FeedbackChange, QuerySession, ResultsSnapshot, SessionConfig, SessionHandlers, SessionState,
};
pub use transport::{
    event_channel, ArchiveQueryTransport, EventReceiver, EventSender, QueryTransport,
    RequestContext, TransportEvent, TransportEventKind,
};
