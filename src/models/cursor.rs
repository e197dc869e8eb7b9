use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// High-water mark of the post crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub last_confirmed_post_id: u32,
    pub timestamp: DateTime<Utc>,
}

impl SyncCursor {
    pub fn new(last_confirmed_post_id: u32) -> Self {
        Self {
            last_confirmed_post_id,
            timestamp: Utc::now(),
        }
    }

    /// Move the mark forward. Never moves backwards.
    pub fn advance(&mut self, post_id: u32) {
        if post_id > self.last_confirmed_post_id {
            self.last_confirmed_post_id = post_id;
        }
        self.timestamp = Utc::now();
    }
}
