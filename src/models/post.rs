use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::chart::{ChartStats, Chart};

const CHART_CATEGORY_NAME: &str = "SELF_POST";
const CHART_CATEGORY_ID: &str = "chart";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostAuthor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostTag {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

/// A user submission. Only chart submissions are mirrored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artists: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<Chart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<PostAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<PostTag>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Post {
    pub fn is_chart_submission(&self) -> bool {
        self.category_name.as_deref() == Some(CHART_CATEGORY_NAME)
            && self.category_id.as_deref() == Some(CHART_CATEGORY_ID)
    }

    pub fn chart_stats(&self) -> Option<ChartStats> {
        self.chart
            .as_ref()
            .filter(|chart| !chart.0.is_empty())
            .and_then(Chart::stats)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOrder {
    TimeAsc,
    TimeDesc,
}

impl PostOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostOrder::TimeAsc => "TIME_ASC",
            PostOrder::TimeDesc => "TIME_DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPageEntry {
    pub id: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of the chart post listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostPage {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub posts: Vec<PostPageEntry>,
}
