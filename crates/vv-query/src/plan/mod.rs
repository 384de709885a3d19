//! Query plans
//!
//! A plan is either already parsed or raw KST text:
//!
//! ```text
//! QueryPlan, 1;
//! SIMILARITY;
//! <query id> [, <stream id limit>];
//! [ descriptor, ... ];
//! [ <temporal lower>, <temporal upper> [, <filter mode>] ];
//! <similarity threshold> [, <IQR model>];
//! ```
//!
//! Retrieval plans name the requested entities (`TRACKS`, `DESCRIPTORS` or
//! `ALL`) in place of the descriptor list and carry no threshold.

pub mod kst;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlanErrorKind, QueryError, Result};
use kst::{KstRecord, KstValue};

const PLAN_TAG: &str = "QueryPlan";
const OTHER_TAGS: &[&str] = &["Tracks", "Descriptors", "QueryResults", "EventSetInfo", "ALERT"];
const MAX_PLAN_VERSION: u32 = 2;

/// A query plan as handed to a session
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Parsed(QueryPlanRecord),
    /// Serialized KST text, parsed on execution
    Raw(String),
}

impl Plan {
    pub fn resolve(self) -> Result<QueryPlanRecord> {
        match self {
            Plan::Parsed(record) => Ok(record),
            Plan::Raw(text) => read_plan(&text),
        }
    }
}

impl From<QueryPlanRecord> for Plan {
    fn from(record: QueryPlanRecord) -> Self {
        Plan::Parsed(record)
    }
}

/// Entities requested by a retrieval query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Tracks,
    Descriptors,
    #[serde(rename = "ALL")]
    TracksAndDescriptors,
}

/// How a limit is applied to candidate results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterMode {
    Ignore,
    ContainsWholly,
    ContainsAny,
    Intersects,
    IntersectsInbound,
    IntersectsOutbound,
    DoesNotContain,
}

impl FilterMode {
    fn parse(text: &str) -> Option<Self> {
        let mode = match text.to_ascii_uppercase().as_str() {
            "IGNORE" => FilterMode::Ignore,
            "CONTAINS_WHOLLY" => FilterMode::ContainsWholly,
            "CONTAINS_ANY" => FilterMode::ContainsAny,
            "INTERSECTS" => FilterMode::Intersects,
            "INTERSECTS_INBOUND" => FilterMode::IntersectsInbound,
            "INTERSECTS_OUTBOUND" => FilterMode::IntersectsOutbound,
            "DOES_NOT_CONTAIN" => FilterMode::DoesNotContain,
            _ => return None,
        };
        Some(mode)
    }
}

/// Time window results must fall in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalLimit {
    pub lower: i64,
    pub upper: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryKind {
    Retrieval {
        entities: EntityType,
    },
    #[serde(rename_all = "camelCase")]
    Similarity {
        descriptors: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iqr_model: Option<String>,
    },
}

/// Structured query plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlanRecord {
    pub version: u32,
    pub query_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id_limit: Option<String>,
    #[serde(flatten)]
    pub kind: QueryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_limit: Option<TemporalLimit>,
}

impl QueryPlanRecord {
    /// A similarity plan over the named descriptors
    pub fn similarity(query_id: impl Into<String>, descriptors: Vec<String>) -> Self {
        Self {
            version: 1,
            query_id: query_id.into(),
            stream_id_limit: None,
            kind: QueryKind::Similarity {
                descriptors,
                threshold: None,
                iqr_model: None,
            },
            temporal_limit: None,
        }
    }

    pub fn retrieval(query_id: impl Into<String>, entities: EntityType) -> Self {
        Self {
            version: 1,
            query_id: query_id.into(),
            stream_id_limit: None,
            kind: QueryKind::Retrieval { entities },
            temporal_limit: None,
        }
    }
}

/// Parse a KST query plan
pub fn read_plan(text: &str) -> Result<QueryPlanRecord> {
    let records = kst::parse(text).map_err(|m| QueryError::plan(PlanErrorKind::Syntax, m))?;
    let mut records = records.into_iter();

    let header = records
        .next()
        .ok_or_else(|| QueryError::plan(PlanErrorKind::Header, "error reading header: empty plan"))?;
    let version = read_header(&header)?;

    let mut body = BodyReader {
        records: records.collect(),
        position: 0,
    };
    let plan = body.read_plan(version)?;
    debug!(query = %plan.query_id, version, "Read query plan");
    Ok(plan)
}

fn read_header(header: &KstRecord) -> Result<u32> {
    let header_error = |message: String| QueryError::plan(PlanErrorKind::Header, message);

    let tag = header
        .first()
        .and_then(KstValue::as_text)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| header_error("error reading header".to_string()))?;

    if tag != PLAN_TAG {
        if OTHER_TAGS.contains(&tag) {
            return Err(QueryError::plan(
                PlanErrorKind::TypeMismatch,
                format!("expected a query plan, found {}", tag),
            ));
        }
        return Err(header_error(format!("Unrecognized file format {}", tag)));
    }

    let version = match header.get(1) {
        None => 0,
        Some(value) if value.is_empty() => 0,
        Some(value) => value
            .as_text()
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| header_error("error reading header version".to_string()))?,
    };
    if version > MAX_PLAN_VERSION {
        return Err(header_error(format!(
            "Unable to read query plan version {}: latest recognized version is {}",
            version, MAX_PLAN_VERSION
        )));
    }
    Ok(version)
}

struct BodyReader {
    records: Vec<KstRecord>,
    position: usize,
}

impl BodyReader {
    fn next_record(&mut self) -> Option<&KstRecord> {
        let record = self.records.get(self.position)?;
        self.position += 1;
        Some(record)
    }

    fn require(&mut self, what: &str) -> Result<KstRecord> {
        self.next_record()
            .cloned()
            .ok_or_else(|| body_error(format!("Error reading {}", what)))
    }

    fn read_plan(&mut self, version: u32) -> Result<QueryPlanRecord> {
        let query_type = if version > 0 {
            let record = self.require("query type")?;
            text_at(&record, 0)
                .ok_or_else(|| body_error("Error reading query type"))?
                .to_ascii_uppercase()
        } else {
            "SIMILARITY".to_string()
        };

        let header = self.require("query ID")?;
        let query_id = text_at(&header, 0)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| body_error("Error reading query ID"))?
            .to_string();
        let stream_id_limit = text_at(&header, 1)
            .filter(|s| !s.is_empty())
            .map(String::from);

        let kind = match query_type.as_str() {
            "RETRIEVAL" => {
                let record = self.require("query retrieval entity type")?;
                let entity = text_at(&record, 0).unwrap_or_default();
                let entities = match entity.to_ascii_uppercase().as_str() {
                    "TRACKS" => EntityType::Tracks,
                    "DESCRIPTORS" => EntityType::Descriptors,
                    "ALL" => EntityType::TracksAndDescriptors,
                    _ => {
                        return Err(body_error(format!(
                            "Unrecognized retrieval query entity type {}",
                            entity
                        )))
                    }
                };
                QueryKind::Retrieval { entities }
            }
            "SIMILARITY" => {
                let record = self.require("query descriptors")?;
                let descriptors = record
                    .first()
                    .and_then(KstValue::as_array)
                    .ok_or_else(|| body_error("Error reading query descriptors"))?
                    .iter()
                    .map(|v| {
                        v.as_text()
                            .map(String::from)
                            .ok_or_else(|| body_error("Error reading query descriptors"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                QueryKind::Similarity {
                    descriptors,
                    threshold: None,
                    iqr_model: None,
                }
            }
            other => return Err(body_error(format!("Unknown query type {}", other))),
        };

        let temporal_limit = match self.next_record().cloned() {
            Some(record) => read_temporal_limit(&record)?,
            None => None,
        };

        let kind = match kind {
            QueryKind::Similarity { descriptors, .. } => {
                let (threshold, iqr_model) = match self.next_record().cloned() {
                    Some(record) => read_threshold(&record)?,
                    None => (None, None),
                };
                QueryKind::Similarity {
                    descriptors,
                    threshold,
                    iqr_model,
                }
            }
            retrieval => retrieval,
        };

        if self.position < self.records.len() {
            debug!(
                ignored = self.records.len() - self.position,
                "Ignoring trailing query plan records"
            );
        }

        Ok(QueryPlanRecord {
            version,
            query_id,
            stream_id_limit,
            kind,
            temporal_limit,
        })
    }
}

fn read_temporal_limit(record: &KstRecord) -> Result<Option<TemporalLimit>> {
    let Some(first) = record.first().filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let limits = first
        .as_array()
        .filter(|values| (2..=3).contains(&values.len()))
        .ok_or_else(|| body_error("Error reading query temporal limit"))?;

    let bound = |i: usize, what: &str| {
        limits[i]
            .as_text()
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| body_error(format!("Error reading query temporal {} limit", what)))
    };
    let lower = bound(0, "lower")?;
    let upper = bound(1, "upper")?;

    let filter = match limits.get(2).and_then(KstValue::as_text) {
        Some(mode) => Some(
            FilterMode::parse(mode)
                .ok_or_else(|| body_error(format!("Unrecognized filter mode {}", mode)))?,
        ),
        None => None,
    };

    Ok(Some(TemporalLimit {
        lower,
        upper,
        filter,
    }))
}

fn read_threshold(record: &KstRecord) -> Result<(Option<f64>, Option<String>)> {
    let threshold = text_at(record, 0)
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(|| body_error("Error reading query similarity threshold"))?;
    let model = text_at(record, 1)
        .filter(|m| !m.is_empty())
        .map(String::from);
    Ok((Some(threshold), model))
}

fn text_at(record: &KstRecord, index: usize) -> Option<&str> {
    record.get(index).and_then(KstValue::as_text)
}

fn body_error(message: impl Into<String>) -> QueryError {
    QueryError::plan(PlanErrorKind::Body, message)
}
