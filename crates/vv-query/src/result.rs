//! Query result records

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use vv_core::TimeStamp;

/// Result instance identifier
pub type ResultId = i64;

/// User relevance feedback on a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Classification {
    #[default]
    Unclassified,
    Positive,
    Negative,
}

impl From<Classification> for i32 {
    fn from(value: Classification) -> Self {
        match value {
            Classification::Unclassified => 0,
            Classification::Positive => 1,
            Classification::Negative => -1,
        }
    }
}

impl TryFrom<i32> for Classification {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Classification::Unclassified),
            1 => Ok(Classification::Positive),
            -1 => Ok(Classification::Negative),
            other => Err(format!("invalid classification {}", other)),
        }
    }
}

/// Pixel rectangle in image coordinates (origin top-left)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageBox {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorRegion {
    pub time_stamp: TimeStamp,
    pub image_region: ImageBox,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRef {
    pub source: i32,
    pub serial_number: i64,
}

/// Feature descriptor supporting a result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Descriptor {
    pub descriptor_name: String,
    pub module_name: String,
    pub instance_id: i64,
    pub confidence: f64,
    pub values: Vec<Vec<f64>>,
    pub track_ids: Vec<TrackRef>,
    pub regions: Vec<DescriptorRegion>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserData {
    pub flags: i32,
    pub notes: String,
}

/// A single query result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub instance_id: ResultId,
    #[serde(default)]
    pub rank: i32,
    #[serde(default)]
    pub relevancy_score: f64,
    #[serde(default)]
    pub preference_score: f64,
    #[serde(default)]
    pub query_id: String,
    #[serde(default)]
    pub mission_id: String,
    #[serde(default)]
    pub stream_id: String,
    /// Microseconds
    #[serde(default)]
    pub start_time: i64,
    /// Microseconds
    #[serde(default)]
    pub end_time: i64,
    /// Geographic footprint, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<serde_json::Value>,
    /// Supporting tracks, passed through untouched
    #[serde(default)]
    pub tracks: Vec<serde_json::Value>,
    #[serde(default)]
    pub descriptors: Vec<Descriptor>,
    #[serde(default)]
    pub user_score: Classification,
    #[serde(default)]
    pub user_data: UserData,
}

impl QueryResult {
    pub fn new(instance_id: ResultId, relevancy_score: f64) -> Self {
        Self {
            instance_id,
            relevancy_score,
            ..Self::default()
        }
    }
}

/// Result orderings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    /// Ascending rank
    #[default]
    ByRank,
    /// Most relevant first
    ByRelevancy,
    /// Most preferred first
    ByPreference,
    ById,
}

impl SortOrder {
    /// Compare two results; ties always fall back to the instance id
    pub fn compare(&self, a: &QueryResult, b: &QueryResult) -> Ordering {
        let by_id = || a.instance_id.cmp(&b.instance_id);
        match self {
            SortOrder::ByRank => a
                .rank
                .cmp(&b.rank)
                .then_with(|| b.relevancy_score.total_cmp(&a.relevancy_score))
                .then_with(by_id),
            SortOrder::ByRelevancy => b
                .relevancy_score
                .total_cmp(&a.relevancy_score)
                .then_with(|| a.rank.cmp(&b.rank))
                .then_with(by_id),
            SortOrder::ByPreference => b
                .preference_score
                .total_cmp(&a.preference_score)
                .then_with(|| b.relevancy_score.total_cmp(&a.relevancy_score))
                .then_with(by_id),
            SortOrder::ById => by_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: ResultId, rank: i32, relevancy: f64, preference: f64) -> QueryResult {
        QueryResult {
            rank,
            preference_score: preference,
            ..QueryResult::new(id, relevancy)
        }
    }

    fn sorted(order: SortOrder, mut results: Vec<QueryResult>) -> Vec<ResultId> {
        results.sort_by(|a, b| order.compare(a, b));
        results.iter().map(|r| r.instance_id).collect()
    }

    #[test]
    fn test_orders() {
        let results = vec![
            result(3, 2, 0.5, 0.1),
            result(1, 1, 0.9, 0.3),
            result(2, 1, 0.9, 0.9),
            result(4, 0, 0.2, 0.3),
        ];
        assert_eq!(sorted(SortOrder::ByRank, results.clone()), vec![4, 1, 2, 3]);
        assert_eq!(sorted(SortOrder::ByRelevancy, results.clone()), vec![1, 2, 3, 4]);
        assert_eq!(sorted(SortOrder::ByPreference, results.clone()), vec![2, 1, 4, 3]);
        assert_eq!(sorted(SortOrder::ById, results), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::json!({
            "instanceId": 7,
            "rank": 1,
            "relevancyScore": 0.8,
            "streamId": "s1",
            "startTime": 100,
            "endTime": 200,
            "userScore": -1,
            "descriptors": [{
                "descriptorName": "color",
                "regions": [{
                    "timeStamp": { "time": 150, "frame": 3 },
                    "imageRegion": { "top": 10, "left": 20, "bottom": 30, "right": 40 }
                }]
            }]
        });
        let result: QueryResult = serde_json::from_value(json).unwrap();
        assert_eq!(result.instance_id, 7);
        assert_eq!(result.user_score, Classification::Negative);
        assert_eq!(result.descriptors[0].regions[0].time_stamp.frame_number(), Some(3));

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["relevancyScore"], 0.8);
        assert_eq!(value["userScore"], -1);
        assert_eq!(value["userData"]["notes"], "");
        assert!(serde_json::from_value::<Classification>(serde_json::json!(5)).is_err());
    }
}
