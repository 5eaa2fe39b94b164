//! Specimen collection tracking.
//!
//! Correlates samples to tests independently of the ledger's values.
//! The only persisted state in scope is `Collected`; a test with no
//! covering sample is implicitly `NotCollected`, and there is no
//! re-collection path.

use thiserror::Error;
use uuid::Uuid;

use crate::models::Sample;

#[derive(Debug, Clone, Error)]
pub enum CollectionError {
    #[error("Test {test_id} already belongs to a collected sample")]
    AlreadyCollected { test_id: String },

    #[error("A sample requires at least one test")]
    EmptyTestSet,
}

/// All collected samples for the active order.
pub struct SampleTracker {
    samples: Vec<Sample>,
}

impl SampleTracker {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Collect one specimen covering the given tests.
    ///
    /// Assigns a fresh sample id, stamps the collection time and
    /// collector, and associates every given test. Rejects the whole
    /// request if any test is already covered.
    pub fn collect_sample(
        &mut self,
        test_ids: &[String],
        specimen_type: &str,
        collected_by: &str,
    ) -> Result<&Sample, CollectionError> {
        let mut requested: Vec<String> = Vec::new();
        for id in test_ids {
            if !requested.contains(id) {
                requested.push(id.clone());
            }
        }
        if requested.is_empty() {
            return Err(CollectionError::EmptyTestSet);
        }

        for test_id in &requested {
            if self.sample_for_test(test_id).is_some() {
                return Err(CollectionError::AlreadyCollected {
                    test_id: test_id.clone(),
                });
            }
        }

        let sample = Sample {
            id: Uuid::new_v4(),
            specimen_type: specimen_type.to_string(),
            collected_at: chrono::Local::now().naive_local(),
            collected_by: collected_by.to_string(),
            test_ids: requested,
        };
        tracing::info!(
            sample_id = %sample.id,
            specimen = specimen_type,
            tests = sample.test_ids.len(),
            "Sample collected"
        );

        let idx = self.samples.len();
        self.samples.push(sample);
        Ok(&self.samples[idx])
    }

    /// The sample a test was drawn against, if collected.
    pub fn sample_for_test(&self, test_id: &str) -> Option<&Sample> {
        self.samples.iter().find(|s| s.includes_test(test_id))
    }

    /// A sample covering exactly the given test set. Partial overlap
    /// returns `None`, signaling that the uncovered subset needs a new
    /// sample.
    pub fn existing_sample_for_tests(&self, test_ids: &[String]) -> Option<&Sample> {
        self.samples.iter().find(|s| s.covers_exactly(test_ids))
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn collected_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_collected(&self, test_id: &str) -> bool {
        self.sample_for_test(test_id).is_some()
    }
}

impl Default for SampleTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn collect_assigns_id_time_and_collector() {
        let mut tracker = SampleTracker::new();
        let sample = tracker
            .collect_sample(&ids(&["cbc", "bmp"]), "Blood", "Tech A")
            .unwrap();

        assert_eq!(sample.specimen_type, "Blood");
        assert_eq!(sample.collected_by, "Tech A");
        assert_eq!(sample.test_ids, ids(&["cbc", "bmp"]));
        assert!(tracker.is_collected("cbc"));
        assert!(tracker.is_collected("bmp"));
    }

    #[test]
    fn recollection_of_covered_test_rejected() {
        let mut tracker = SampleTracker::new();
        tracker
            .collect_sample(&ids(&["cbc", "bmp"]), "Blood", "Tech A")
            .unwrap();

        match tracker.collect_sample(&ids(&["cbc"]), "Blood", "Tech B") {
            Err(CollectionError::AlreadyCollected { test_id }) => assert_eq!(test_id, "cbc"),
            other => panic!("Expected AlreadyCollected, got: {other:?}"),
        }
        // The failed request collected nothing.
        assert_eq!(tracker.collected_count(), 1);
    }

    #[test]
    fn empty_request_rejected() {
        let mut tracker = SampleTracker::new();
        assert!(matches!(
            tracker.collect_sample(&[], "Blood", "Tech A"),
            Err(CollectionError::EmptyTestSet)
        ));
    }

    #[test]
    fn duplicate_ids_in_request_collapsed() {
        let mut tracker = SampleTracker::new();
        let sample = tracker
            .collect_sample(&ids(&["cbc", "cbc"]), "Blood", "Tech A")
            .unwrap();
        assert_eq!(sample.test_ids, ids(&["cbc"]));
    }

    #[test]
    fn exact_cover_lookup() {
        let mut tracker = SampleTracker::new();
        tracker
            .collect_sample(&ids(&["cbc", "bmp"]), "Blood", "Tech A")
            .unwrap();

        let found = tracker.existing_sample_for_tests(&ids(&["bmp", "cbc"]));
        assert!(found.is_some());

        // Partial overlap and supersets signal a new sample is needed.
        assert!(tracker.existing_sample_for_tests(&ids(&["cbc"])).is_none());
        assert!(tracker
            .existing_sample_for_tests(&ids(&["cbc", "bmp", "lipid"]))
            .is_none());
    }

    #[test]
    fn sample_for_test_absent_when_not_collected() {
        let tracker = SampleTracker::new();
        assert!(tracker.sample_for_test("cbc").is_none());
        assert!(!tracker.is_collected("cbc"));
    }

    #[test]
    fn disjoint_sets_collect_independently() {
        let mut tracker = SampleTracker::new();
        tracker
            .collect_sample(&ids(&["cbc"]), "Blood", "Tech A")
            .unwrap();
        tracker
            .collect_sample(&ids(&["urinalysis"]), "Urine", "Tech B")
            .unwrap();

        assert_eq!(tracker.collected_count(), 2);
        assert_eq!(
            tracker.sample_for_test("urinalysis").unwrap().specimen_type,
            "Urine"
        );
    }
}
