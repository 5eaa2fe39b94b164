use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Per-test note extracted from an assistant analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestNote {
    pub test_id: String,
    pub note: String,
}

/// A completed assistant analysis, tagged with the row signature that
/// triggered it so stale completions can be recognized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub narrative: String,
    pub test_notes: Vec<TestNote>,
    /// Signature of the row set this response was computed from.
    pub signature: String,
    pub generated_at: NaiveDateTime,
}

impl AnalysisResponse {
    pub fn note_for(&self, test_id: &str) -> Option<&str> {
        self.test_notes
            .iter()
            .find(|n| n.test_id == test_id)
            .map(|n| n.note.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_for_finds_matching_test() {
        let response = AnalysisResponse {
            narrative: "Pattern consistent with dehydration.".into(),
            test_notes: vec![
                TestNote {
                    test_id: "sodium".into(),
                    note: "Elevated; correlate with fluid status.".into(),
                },
                TestNote {
                    test_id: "creatinine".into(),
                    note: "Mildly elevated.".into(),
                },
            ],
            signature: "creatinine=1.4;sodium=148".into(),
            generated_at: chrono::Local::now().naive_local(),
        };

        assert_eq!(
            response.note_for("sodium"),
            Some("Elevated; correlate with fluid status.")
        );
        assert_eq!(response.note_for("glucose"), None);
    }
}
