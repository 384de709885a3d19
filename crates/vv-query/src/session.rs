//! Query session state machine
//!
//! A session runs one query at a time against a [`QueryTransport`]. Replies
//! come back as [`TransportEvent`]s which the owner feeds to
//! [`QuerySession::handle_event`]; events that do not carry the session's id
//! and current request token are dropped.
//!
//! ```text
//! Idle --execute--> Executing --complete--> Completed --refine--> Executing
//!   any --error--> Error            any --shut_down--> Closed
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{QueryError, Result};
use crate::plan::{Plan, QueryKind, QueryPlanRecord};
use crate::result::{Classification, QueryResult, ResultId, SortOrder};
use crate::transport::{
    EventSender, QueryTransport, RequestContext, RequestToken, TransportEvent, TransportEventKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Executing,
    Completed,
    Error,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SessionState::Idle => "idle",
            SessionState::Executing => "executing",
            SessionState::Completed => "completed",
            SessionState::Error => "in error",
            SessionState::Closed => "closed",
        };
        f.write_str(text)
    }
}

/// Feedback behaviour of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Number of feedback requests asked for after a round completes
    pub desired_feedback_count: usize,
    /// Ask for feedback requests when the service offered none
    pub implicit_feedback: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            desired_feedback_count: 10,
            implicit_feedback: true,
        }
    }
}

type CompleteHandler = Box<dyn Fn(bool) + Send + Sync>;
type MessageHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Callbacks registered when a session is created
#[derive(Default)]
pub struct SessionHandlers {
    on_complete: Option<CompleteHandler>,
    on_error: Option<MessageHandler>,
    on_status: Option<MessageHandler>,
}

impl SessionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a result set completes, with whether it held feedback requests
    pub fn on_complete(mut self, handler: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn on_status(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_status = Some(Box::new(handler));
        self
    }
}

/// A pending classification change, kept until the next refinement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedbackChange {
    pub old: Classification,
    pub new: Classification,
}

/// Results and feedback requests taken under a single lock
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsSnapshot {
    pub results: BTreeMap<ResultId, QueryResult>,
    /// Result ids in rank order
    pub result_ids: Vec<ResultId>,
    pub feedback_ids: Vec<ResultId>,
}

/// Handler call to make once the session lock is released
enum Notification {
    Complete(bool),
    Error(String),
    Status(String),
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    status: String,
    plan: Option<QueryPlanRecord>,
    initial_plan: Option<QueryPlanRecord>,
    working_set_size: usize,
    /// Token of the request replies are accepted for
    token: Option<RequestToken>,
    next_token: RequestToken,
    results: AHashMap<ResultId, QueryResult>,
    feedback_requests: Vec<ResultId>,
    feedback_changes: AHashMap<ResultId, FeedbackChange>,
    /// Results from the previous round not yet returned by the current one
    removed: AHashSet<ResultId>,
    feedback_requested: bool,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            status: String::new(),
            plan: None,
            initial_plan: None,
            working_set_size: 0,
            token: None,
            next_token: 1,
            results: AHashMap::new(),
            feedback_requests: Vec::new(),
            feedback_changes: AHashMap::new(),
            removed: AHashSet::new(),
            feedback_requested: false,
        }
    }

    fn issue_token(&mut self) -> RequestToken {
        let token = self.next_token;
        self.next_token += 1;
        self.token = Some(token);
        token
    }

    fn clear_results(&mut self) {
        self.results.clear();
        self.feedback_requests.clear();
        self.feedback_changes.clear();
        self.removed.clear();
        self.feedback_requested = false;
    }

    fn add_result(&mut self, result: QueryResult, feedback_request: bool) {
        let id = result.instance_id;
        if feedback_request {
            if !self.feedback_requests.contains(&id) {
                self.feedback_requests.push(id);
            }
            match self.results.get_mut(&id) {
                Some(existing) => existing.preference_score = result.preference_score,
                None => {
                    self.results.insert(id, result);
                }
            }
        } else {
            let mut result = result;
            if let Some(existing) = self.results.get(&id) {
                result.user_score = existing.user_score;
                result.user_data = existing.user_data.clone();
            }
            self.results.insert(id, result);
        }
        self.removed.remove(&id);
    }

    fn fail(&mut self, message: String) -> Notification {
        self.state = SessionState::Error;
        self.token = None;
        self.status = message.clone();
        Notification::Error(message)
    }
}

/// Asynchronous, cancellable query session
pub struct QuerySession {
    id: Uuid,
    transport: Arc<dyn QueryTransport>,
    events: EventSender,
    config: SessionConfig,
    handlers: SessionHandlers,
    inner: RwLock<SessionInner>,
    sorted: Mutex<AHashMap<SortOrder, Arc<[ResultId]>>>,
}

impl QuerySession {
    pub fn new(
        transport: Arc<dyn QueryTransport>,
        events: EventSender,
        config: SessionConfig,
        handlers: SessionHandlers,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transport,
            events,
            config,
            handlers,
            inner: RwLock::new(SessionInner::new()),
            sorted: Mutex::new(AHashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn query_url(&self) -> &str {
        self.transport.endpoint()
    }

    /// Start a query; completion is reported through [`Self::handle_event`]
    pub fn execute(&self, plan: impl Into<Plan>, working_set_size: usize) -> Result<()> {
        let (result, notification) = {
            let mut inner = self.inner.write();
            if inner.state == SessionState::Executing {
                return Err(QueryError::InvalidState {
                    operation: "execute",
                    state: inner.state.to_string(),
                });
            }

            match plan.into().resolve() {
                Err(err) => {
                    let notification = inner.fail(err.to_string());
                    (Err(err), notification)
                }
                Ok(record) => {
                    inner.clear_results();
                    self.invalidate();
                    let token = inner.issue_token();
                    let ctx = RequestContext::new(self.id, token, self.events.clone());
                    match self.transport.submit(ctx, &record, working_set_size) {
                        Err(err) => {
                            let err = QueryError::SessionUnavailable(format!("{:#}", err));
                            let notification = inner.fail(err.to_string());
                            (Err(err), notification)
                        }
                        Ok(()) => {
                            info!(
                                session = %self.id,
                                query = %record.query_id,
                                token,
                                working_set_size,
                                "Executing query"
                            );
                            inner.state = SessionState::Executing;
                            inner.status = format!("Executing query {}", record.query_id);
                            inner.working_set_size = working_set_size;
                            inner.initial_plan = Some(record.clone());
                            inner.plan = Some(record);
                            (Ok(()), Notification::Status(inner.status.clone()))
                        }
                    }
                }
            }
        };

        self.notify(notification);
        result
    }

    /// Abandon the request in flight
    pub fn cancel(&self) -> Result<()> {
        let notification = {
            let mut inner = self.inner.write();
            match inner.state {
                SessionState::Closed => return Err(QueryError::SessionClosed),
                SessionState::Executing => {}
                state => {
                    return Err(QueryError::InvalidState {
                        operation: "cancel",
                        state: state.to_string(),
                    })
                }
            }

            if let Some(token) = inner.token.take() {
                self.transport.cancel(self.id, token);
            }
            inner.removed.clear();
            inner.state = if inner.results.is_empty() {
                SessionState::Idle
            } else {
                SessionState::Completed
            };
            inner.status = "Query cancelled".to_string();
            info!(session = %self.id, "Query cancelled");
            Notification::Status(inner.status.clone())
        };

        self.notify(notification);
        Ok(())
    }

    /// Deliver a transport event; returns whether it was accepted
    pub fn handle_event(&self, event: TransportEvent) -> bool {
        if event.session_id != self.id {
            debug!(session = %self.id, other = %event.session_id, "Ignoring event for another session");
            return false;
        }

        let notification = {
            let mut inner = self.inner.write();
            if inner.token != Some(event.token) {
                debug!(
                    session = %self.id,
                    token = event.token,
                    current = ?inner.token,
                    "Discarding stale transport event"
                );
                return false;
            }

            match event.kind {
                TransportEventKind::ResultAvailable {
                    result,
                    feedback_request,
                } => {
                    if inner.state != SessionState::Executing {
                        debug!(session = %self.id, id = result.instance_id, "Ignoring result outside execution");
                        return false;
                    }
                    inner.add_result(*result, feedback_request);
                    self.invalidate();
                    None
                }
                TransportEventKind::ResultSetComplete {
                    has_feedback_requests,
                } => {
                    if inner.state != SessionState::Executing {
                        return false;
                    }
                    self.prepare_results(&mut inner, event.token, has_feedback_requests);
                    self.invalidate();
                    Some(Notification::Complete(has_feedback_requests))
                }
                TransportEventKind::Error(message) => {
                    warn!(session = %self.id, %message, "Query failed");
                    Some(inner.fail(message))
                }
                TransportEventKind::Status(message) => {
                    inner.status = message.clone();
                    Some(Notification::Status(message))
                }
            }
        };

        if let Some(notification) = notification {
            self.notify(notification);
        }
        true
    }

    fn prepare_results(&self, inner: &mut SessionInner, token: RequestToken, has_feedback_requests: bool) {
        if !has_feedback_requests
            && self.config.implicit_feedback
            && self.config.desired_feedback_count > 0
            && !inner.feedback_requested
        {
            inner.feedback_requested = true;
            let ctx = RequestContext::new(self.id, token, self.events.clone());
            match self
                .transport
                .request_feedback(ctx, self.config.desired_feedback_count)
            {
                Ok(()) => {
                    debug!(session = %self.id, count = self.config.desired_feedback_count, "Requesting feedback");
                    inner.status = "Requesting feedback".to_string();
                    return;
                }
                Err(err) => warn!(session = %self.id, "Feedback request failed: {:#}", err),
            }
        }

        let removed: Vec<ResultId> = inner.removed.drain().collect();
        for id in &removed {
            inner.results.remove(id);
        }
        let results = &inner.results;
        let requests: Vec<ResultId> = inner
            .feedback_requests
            .iter()
            .copied()
            .filter(|id| results.contains_key(id))
            .collect();
        inner.feedback_requests = requests;

        inner.state = SessionState::Completed;
        inner.status = format!("Query completed with {} results", inner.results.len());
        info!(
            session = %self.id,
            results = inner.results.len(),
            feedback_requests = inner.feedback_requests.len(),
            removed = removed.len(),
            "Query completed"
        );
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    pub fn is_executing(&self) -> bool {
        self.state() == SessionState::Executing
    }

    pub fn is_completed(&self) -> bool {
        self.state() == SessionState::Completed
    }

    pub fn status(&self) -> String {
        self.inner.read().status.clone()
    }

    pub fn plan(&self) -> Option<QueryPlanRecord> {
        self.inner.read().plan.clone()
    }

    /// Plan of the first round, before any refinement
    pub fn initial_plan(&self) -> Option<QueryPlanRecord> {
        self.inner.read().initial_plan.clone()
    }

    pub fn working_set_size(&self) -> usize {
        self.inner.read().working_set_size
    }

    pub fn result_count(&self) -> usize {
        self.inner.read().results.len()
    }

    /// Result ids in `order`, skipping `start` and returning at most `max_count`
    pub fn results(&self, order: SortOrder, start: usize, max_count: Option<usize>) -> Vec<ResultId> {
        let ids = self.sorted_ids(order);
        let max_count = max_count.unwrap_or(usize::MAX);
        ids.iter().skip(start).take(max_count).copied().collect()
    }

    fn sorted_ids(&self, order: SortOrder) -> Arc<[ResultId]> {
        if let Some(ids) = self.sorted.lock().get(&order) {
            return ids.clone();
        }

        let inner = self.inner.read();
        let mut results: Vec<&QueryResult> = inner.results.values().collect();
        results.sort_by(|a, b| order.compare(a, b));
        let ids: Arc<[ResultId]> = results.iter().map(|r| r.instance_id).collect();
        self.sorted.lock().insert(order, ids.clone());
        ids
    }

    /// Drop cached orderings; called with the session lock held
    fn invalidate(&self) {
        self.sorted.lock().clear();
    }

    pub fn result(&self, id: ResultId) -> Result<QueryResult> {
        let inner = self.inner.read();
        if inner.state == SessionState::Closed {
            return Err(QueryError::SessionClosed);
        }
        inner
            .results
            .get(&id)
            .cloned()
            .ok_or(QueryError::NotFound(id))
    }

    /// Ids the service wants classified, limited to results still held
    pub fn feedback_requests(&self) -> Vec<ResultId> {
        let inner = self.inner.read();
        inner
            .feedback_requests
            .iter()
            .copied()
            .filter(|id| inner.results.contains_key(id))
            .collect()
    }

    pub fn results_and_feedback_requests(&self) -> ResultsSnapshot {
        let result_ids = self.results(SortOrder::ByRank, 0, None);
        let inner = self.inner.read();
        let feedback_ids: Vec<ResultId> = inner
            .feedback_requests
            .iter()
            .copied()
            .filter(|id| inner.results.contains_key(id))
            .collect();
        let results = inner
            .results
            .iter()
            .map(|(id, result)| (*id, result.clone()))
            .collect();
        // Results may have arrived since the ordering was computed
        let mut result_ids: Vec<ResultId> = result_ids
            .into_iter()
            .filter(|id| inner.results.contains_key(id))
            .collect();
        let mut late: Vec<ResultId> = inner
            .results
            .keys()
            .copied()
            .filter(|id| !result_ids.contains(id))
            .collect();
        late.sort_unstable();
        result_ids.extend(late);

        ResultsSnapshot {
            results,
            result_ids,
            feedback_ids,
        }
    }

    /// Classify a result and forward the classification to the service
    pub fn set_result_feedback(&self, id: ResultId, classification: Classification) -> Result<()> {
        {
            let mut inner = self.inner.write();
            if inner.state == SessionState::Closed {
                return Err(QueryError::SessionClosed);
            }
            let result = inner.results.get_mut(&id).ok_or(QueryError::NotFound(id))?;
            let old = result.user_score;
            if old == classification {
                return Ok(());
            }
            result.user_score = classification;

            match inner.feedback_changes.get(&id).copied() {
                Some(change) if change.old == classification => {
                    inner.feedback_changes.remove(&id);
                }
                Some(change) => {
                    inner.feedback_changes.insert(
                        id,
                        FeedbackChange {
                            old: change.old,
                            new: classification,
                        },
                    );
                }
                None => {
                    inner.feedback_changes.insert(
                        id,
                        FeedbackChange {
                            old,
                            new: classification,
                        },
                    );
                }
            }
            debug!(session = %self.id, id, ?classification, "Result feedback set");
        }

        if let Err(err) = self.transport.send_feedback(self.id, id, classification) {
            warn!(session = %self.id, id, "Failed to forward feedback: {:#}", err);
        }
        Ok(())
    }

    /// Classification changes since the last refinement, by result id
    pub fn feedback_changes(&self) -> Vec<(ResultId, FeedbackChange)> {
        let inner = self.inner.read();
        let mut changes: Vec<_> = inner
            .feedback_changes
            .iter()
            .map(|(id, change)| (*id, *change))
            .collect();
        changes.sort_by_key(|(id, _)| *id);
        changes
    }

    pub fn can_refine(&self) -> bool {
        let inner = self.inner.read();
        inner.state == SessionState::Completed
            && matches!(
                inner.plan.as_ref().map(|p| &p.kind),
                Some(QueryKind::Similarity { .. })
            )
    }

    /// Re-run the query using the accumulated feedback
    pub fn refine(&self) -> Result<()> {
        let (result, notification) = {
            let mut inner = self.inner.write();
            match inner.state {
                SessionState::Closed => return Err(QueryError::SessionClosed),
                SessionState::Completed => {}
                state => {
                    return Err(QueryError::InvalidState {
                        operation: "refine",
                        state: state.to_string(),
                    })
                }
            }
            if !matches!(
                inner.plan.as_ref().map(|p| &p.kind),
                Some(QueryKind::Similarity { .. })
            ) {
                return Err(QueryError::InvalidState {
                    operation: "refine",
                    state: "holding a retrieval query".to_string(),
                });
            }

            let mut feedback: BTreeMap<ResultId, Classification> = BTreeMap::new();
            for id in &inner.feedback_requests {
                if let Some(result) = inner.results.get(id) {
                    feedback.insert(*id, result.user_score);
                }
            }
            for result in inner.results.values() {
                if result.user_score != Classification::Unclassified {
                    feedback.insert(result.instance_id, result.user_score);
                }
            }
            let feedback: Vec<(ResultId, Classification)> = feedback
                .into_iter()
                .filter(|(_, score)| *score != Classification::Unclassified)
                .collect();
            if feedback.is_empty() {
                let err = QueryError::NoFeedback;
                inner.status = err.to_string();
                return Err(err);
            }

            let token = inner.issue_token();
            let ctx = RequestContext::new(self.id, token, self.events.clone());
            match self.transport.refine(ctx, &feedback) {
                Err(err) => {
                    let err = QueryError::SessionUnavailable(format!("{:#}", err));
                    let notification = inner.fail(err.to_string());
                    (Err(err), notification)
                }
                Ok(()) => {
                    info!(session = %self.id, token, feedback = feedback.len(), "Refining query");
                    inner.removed = inner.results.keys().copied().collect();
                    inner.feedback_requests.clear();
                    inner.feedback_changes.clear();
                    inner.feedback_requested = false;
                    inner.state = SessionState::Executing;
                    inner.status = "Refining query".to_string();
                    (Ok(()), Notification::Status(inner.status.clone()))
                }
            }
        };

        self.notify(notification);
        result
    }

    /// Release the session; safe to call repeatedly
    pub fn shut_down(&self) {
        {
            let mut inner = self.inner.write();
            if inner.state == SessionState::Closed {
                return;
            }
            if let Some(token) = inner.token.take() {
                self.transport.cancel(self.id, token);
            }
            self.transport.release(self.id);
            inner.clear_results();
            self.invalidate();
            inner.state = SessionState::Closed;
            inner.status = "Session closed".to_string();
            info!(session = %self.id, "Query session shut down");
        }
    }

    fn notify(&self, notification: Notification) {
        match notification {
            Notification::Complete(has_feedback_requests) => {
                if let Some(handler) = &self.handlers.on_complete {
                    handler(has_feedback_requests);
                }
            }
            Notification::Error(message) => {
                if let Some(handler) = &self.handlers.on_error {
                    handler(&message);
                }
            }
            Notification::Status(message) => {
                if let Some(handler) = &self.handlers.on_status {
                    handler(&message);
                }
            }
        }
    }
}

impl Drop for QuerySession {
    fn drop(&mut self) {
        self.shut_down();
    }
}
