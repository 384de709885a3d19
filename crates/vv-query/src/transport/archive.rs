//! Query transport serving archived result sets
//!
//! The endpoint is a `file://` URI (or plain path) of a JSON array of query
//! results. Queries filter and rank that set; relevance feedback nudges the
//! scores of classified results before the next round.

use std::path::Path;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use anyhow::{anyhow, Context};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{QueryTransport, RequestContext, RequestToken, TransportEventKind};
use crate::plan::QueryPlanRecord;
use crate::result::{Classification, QueryResult, ResultId};

#[derive(Debug, Default)]
struct SessionData {
    results: Vec<QueryResult>,
    working_set_size: usize,
    scores: AHashMap<ResultId, Classification>,
    cancelled: AHashSet<RequestToken>,
}

type Sessions = Arc<Mutex<AHashMap<Uuid, SessionData>>>;

/// Transport answering queries from a result archive on disk
pub struct ArchiveQueryTransport {
    endpoint: String,
    sessions: Sessions,
}

impl ArchiveQueryTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            sessions: Arc::new(Mutex::new(AHashMap::new())),
        }
    }

    fn load(&self) -> anyhow::Result<Vec<QueryResult>> {
        let path = self
            .endpoint
            .strip_prefix("file://")
            .unwrap_or(&self.endpoint);
        if path.is_empty() || path.contains("://") {
            return Err(anyhow!("unsupported query service '{}'", self.endpoint));
        }
        let text = std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("Failed to read result archive {}", path))?;
        let results: Vec<QueryResult> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse result archive {}", path))?;
        Ok(results)
    }

    /// Emit `results` then a completion on a background task
    fn spawn_emitter(
        &self,
        ctx: RequestContext,
        results: Vec<QueryResult>,
        feedback_request: bool,
    ) -> anyhow::Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .context("Query transport requires a tokio runtime")?;
        let sessions = self.sessions.clone();

        handle.spawn(async move {
            for result in results {
                if is_cancelled(&sessions, &ctx) {
                    debug!(token = ctx.token, "Request cancelled, stopping emission");
                    return;
                }
                let kind = TransportEventKind::ResultAvailable {
                    result: Box::new(result),
                    feedback_request,
                };
                if !ctx.emit(kind) {
                    return;
                }
                tokio::task::yield_now().await;
            }
            if !is_cancelled(&sessions, &ctx) {
                ctx.emit(TransportEventKind::ResultSetComplete {
                    has_feedback_requests: feedback_request,
                });
            }
        });
        Ok(())
    }
}

impl QueryTransport for ArchiveQueryTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn submit(
        &self,
        ctx: RequestContext,
        plan: &QueryPlanRecord,
        working_set_size: usize,
    ) -> anyhow::Result<()> {
        let results: Vec<QueryResult> = self
            .load()?
            .into_iter()
            .filter(|r| matches_plan(r, plan))
            .collect();
        info!(
            query = %plan.query_id,
            candidates = results.len(),
            "Submitting query to result archive"
        );

        let ranked = rank(results.clone(), working_set_size);
        self.sessions.lock().insert(
            ctx.session_id,
            SessionData {
                results,
                working_set_size,
                ..SessionData::default()
            },
        );
        self.spawn_emitter(ctx, ranked, false)
    }

    fn refine(
        &self,
        ctx: RequestContext,
        feedback: &[(ResultId, Classification)],
    ) -> anyhow::Result<()> {
        let ranked = {
            let mut sessions = self.sessions.lock();
            let data = sessions
                .get_mut(&ctx.session_id)
                .ok_or_else(|| anyhow!("no query submitted for session {}", ctx.session_id))?;

            for (id, classification) in feedback {
                data.scores.insert(*id, *classification);
            }
            for result in &mut data.results {
                match data.scores.get(&result.instance_id) {
                    Some(Classification::Positive) => {
                        result.relevancy_score += (1.0 - result.relevancy_score) * 0.5;
                    }
                    Some(Classification::Negative) => result.relevancy_score *= 0.5,
                    _ => {}
                }
            }
            rank(data.results.clone(), data.working_set_size)
        };

        debug!(feedback = feedback.len(), "Refining archived query");
        self.spawn_emitter(ctx, ranked, false)
    }

    fn request_feedback(&self, ctx: RequestContext, count: usize) -> anyhow::Result<()> {
        let requests = {
            let sessions = self.sessions.lock();
            let data = sessions
                .get(&ctx.session_id)
                .ok_or_else(|| anyhow!("no query submitted for session {}", ctx.session_id))?;

            let mut candidates: Vec<QueryResult> = data
                .results
                .iter()
                .filter(|r| {
                    data.scores
                        .get(&r.instance_id)
                        .map_or(true, |c| *c == Classification::Unclassified)
                })
                .cloned()
                .collect();
            candidates.sort_by(|a, b| {
                uncertainty(a)
                    .total_cmp(&uncertainty(b))
                    .then_with(|| a.instance_id.cmp(&b.instance_id))
            });
            candidates.truncate(count);
            for request in &mut candidates {
                request.rank = -1;
                request.preference_score = 1.0 - uncertainty(request) * 2.0;
            }
            candidates
        };

        debug!(requests = requests.len(), "Issuing feedback requests");
        self.spawn_emitter(ctx, requests, true)
    }

    fn send_feedback(
        &self,
        session_id: Uuid,
        id: ResultId,
        classification: Classification,
    ) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock();
        let data = sessions
            .get_mut(&session_id)
            .ok_or_else(|| anyhow!("no query submitted for session {}", session_id))?;
        data.scores.insert(id, classification);
        Ok(())
    }

    fn cancel(&self, session_id: Uuid, token: RequestToken) {
        if let Some(data) = self.sessions.lock().get_mut(&session_id) {
            data.cancelled.insert(token);
        }
    }

    fn release(&self, session_id: Uuid) {
        self.sessions.lock().remove(&session_id);
    }
}

fn is_cancelled(sessions: &Sessions, ctx: &RequestContext) -> bool {
    sessions
        .lock()
        .get(&ctx.session_id)
        .map_or(true, |data| data.cancelled.contains(&ctx.token))
}

/// Distance of the relevancy score from the decision boundary
fn uncertainty(result: &QueryResult) -> f64 {
    (result.relevancy_score - 0.5).abs()
}

fn matches_plan(result: &QueryResult, plan: &QueryPlanRecord) -> bool {
    if let Some(stream) = &plan.stream_id_limit {
        if &result.stream_id != stream {
            return false;
        }
    }
    match &plan.temporal_limit {
        Some(limit) => result.end_time >= limit.lower && result.start_time <= limit.upper,
        None => true,
    }
}

/// Order by descending relevancy and number the ranks from zero
fn rank(mut results: Vec<QueryResult>, working_set_size: usize) -> Vec<QueryResult> {
    results.sort_by(|a, b| {
        b.relevancy_score
            .total_cmp(&a.relevancy_score)
            .then_with(|| a.instance_id.cmp(&b.instance_id))
    });
    if working_set_size > 0 {
        results.truncate(working_set_size);
    }
    for (index, result) in results.iter_mut().enumerate() {
        result.rank = index as i32;
    }
    results
}
