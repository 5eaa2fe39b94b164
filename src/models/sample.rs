use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A collected specimen and the tests drawn against it.
///
/// `NotCollected` is the implicit absence of a sample; a constructed
/// `Sample` is always in the collected state, which is terminal in scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: Uuid,
    pub specimen_type: String,
    pub collected_at: NaiveDateTime,
    pub collected_by: String,
    /// Associated test ids, in request order, deduplicated. Never empty.
    pub test_ids: Vec<String>,
}

impl Sample {
    pub fn includes_test(&self, test_id: &str) -> bool {
        self.test_ids.iter().any(|t| t == test_id)
    }

    /// True when this sample covers exactly the given test set —
    /// same ids, order-insensitive, no extras on either side.
    pub fn covers_exactly(&self, test_ids: &[String]) -> bool {
        let mut mine: Vec<&str> = self.test_ids.iter().map(String::as_str).collect();
        let mut theirs: Vec<&str> = test_ids.iter().map(String::as_str).collect();
        mine.sort_unstable();
        mine.dedup();
        theirs.sort_unstable();
        theirs.dedup();
        mine == theirs
    }
}
