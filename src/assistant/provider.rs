//! Analysis provider seam.
//!
//! The capability that actually produces narrative suggestions is
//! external; the core only builds requests and manages scheduling. The
//! trait is synchronous and driven from the coordinator's async task via
//! `spawn_blocking`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::signature::signature_of;
use crate::ledger::ResultLedger;
use crate::models::enums::ResultFlag;
use crate::models::{PatientContext, TestNote};

#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error("Cannot reach analysis provider at {0}")]
    Connection(String),

    #[error("Analysis request timed out after {0}s")]
    Timeout(u64),

    #[error("Provider error: HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Failed to parse provider response: {0}")]
    ResponseParsing(String),

    #[error("No numeric values to analyze")]
    NothingToAnalyze,

    #[error("Analysis task failed: {0}")]
    Task(String),
}

/// One result as sent to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct RequestResult {
    pub test_id: String,
    pub name: String,
    pub value_si: Option<f64>,
    pub unit: String,
    pub flag: ResultFlag,
    pub reference_text: String,
}

/// Everything the provider needs for one analysis call.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub order_id: String,
    pub patient: PatientContext,
    pub physician: Option<String>,
    pub panels: Vec<String>,
    pub results: Vec<RequestResult>,
}

impl AnalysisRequest {
    /// Snapshot the current ledger state into a request.
    pub fn from_ledger(order_id: &str, physician: Option<&str>, ledger: &ResultLedger) -> Self {
        let catalog = ledger.catalog();

        let mut panels = Vec::new();
        let results = ledger
            .rows()
            .iter()
            .map(|row| {
                let (name, panel_id) = match catalog.lookup(&row.test_id) {
                    Ok(def) => (def.name.clone(), def.panel_id.clone()),
                    Err(_) => (row.test_id.clone(), None),
                };
                if let Some(pid) = panel_id {
                    if !panels.contains(&pid) {
                        panels.push(pid);
                    }
                }
                RequestResult {
                    test_id: row.test_id.clone(),
                    name,
                    value_si: row.value_si,
                    unit: row.display_unit.clone(),
                    flag: row.flag.clone(),
                    reference_text: ledger.reference_range_text(row.id).unwrap_or_default(),
                }
            })
            .collect();

        Self {
            order_id: order_id.to_string(),
            patient: ledger.patient().clone(),
            physician: physician.map(str::to_string),
            panels,
            results,
        }
    }

    /// Fingerprint of the request's `(test_id, value)` pairs.
    pub fn signature(&self) -> String {
        signature_of(
            self.results
                .iter()
                .map(|r| (r.test_id.as_str(), r.value_si)),
        )
    }

    pub fn has_numeric_values(&self) -> bool {
        self.results.iter().any(|r| r.value_si.is_some())
    }
}

/// Raw provider output; the coordinator tags it with signature and time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderReply {
    pub narrative: String,
    #[serde(default)]
    pub test_notes: Vec<TestNote>,
}

/// The external analysis capability.
pub trait AnalysisProvider: Send + Sync {
    fn analyze(&self, request: &AnalysisRequest) -> Result<ProviderReply, AnalysisError>;
}

/// HTTP client for a remote analysis service.
pub struct HttpAnalysisClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpAnalysisClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        }
    }

    /// Client against the default local provider endpoint.
    pub fn default_local() -> Self {
        Self::new(
            crate::config::DEFAULT_PROVIDER_URL,
            crate::config::DEFAULT_ANALYSIS_TIMEOUT_SECS,
        )
    }
}

impl AnalysisProvider for HttpAnalysisClient {
    fn analyze(&self, request: &AnalysisRequest) -> Result<ProviderReply, AnalysisError> {
        let url = format!("{}/v1/analyze", self.base_url);

        let response = self.client.post(&url).json(request).send().map_err(|e| {
            if e.is_connect() {
                AnalysisError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                AnalysisError::Timeout(self.timeout_secs)
            } else {
                AnalysisError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AnalysisError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .map_err(|e| AnalysisError::ResponseParsing(e.to_string()))
    }
}

/// Mock provider for tests — configurable reply, failure, and latency.
pub struct MockAnalysisProvider {
    reply: ProviderReply,
    failure: Option<AnalysisError>,
    latency: std::time::Duration,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockAnalysisProvider {
    pub fn new(narrative: &str) -> Self {
        Self {
            reply: ProviderReply {
                narrative: narrative.to_string(),
                test_notes: Vec::new(),
            },
            failure: None,
            latency: std::time::Duration::ZERO,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn with_notes(mut self, notes: Vec<TestNote>) -> Self {
        self.reply.test_notes = notes;
        self
    }

    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing(error: AnalysisError) -> Self {
        let mut mock = Self::new("");
        mock.failure = Some(error);
        mock
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl AnalysisProvider for MockAnalysisProvider {
    fn analyze(&self, _request: &AnalysisRequest) -> Result<ProviderReply, AnalysisError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(self.reply.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::TestCatalog;
    use crate::models::enums::Sex;

    fn make_ledger() -> ResultLedger {
        ResultLedger::new(
            Arc::new(TestCatalog::load_test()),
            PatientContext::new(40, Sex::Male),
        )
    }

    #[test]
    fn request_snapshot_carries_names_flags_and_panels() {
        let mut ledger = make_ledger();
        let na = ledger.add_test("sodium").unwrap();
        ledger.update_value(na, "148").unwrap();
        ledger.add_test("hemoglobin").unwrap();

        let request = AnalysisRequest::from_ledger("ord-17", Some("Dr. Osei"), &ledger);
        assert_eq!(request.order_id, "ord-17");
        assert_eq!(request.physician.as_deref(), Some("Dr. Osei"));
        assert_eq!(request.panels, vec!["bmp", "cbc"]);
        assert_eq!(request.results.len(), 2);

        let sodium = &request.results[0];
        assert_eq!(sodium.name, "Sodium");
        assert_eq!(sodium.flag, ResultFlag::AbnormalHigh);
        assert!(sodium.reference_text.contains("mmol/L"));
    }

    #[test]
    fn request_signature_tracks_values_only() {
        let mut ledger = make_ledger();
        let na = ledger.add_test("sodium").unwrap();
        ledger.update_value(na, "140").unwrap();
        let r1 = AnalysisRequest::from_ledger("ord-17", None, &ledger);

        ledger.update_unit(na, "mmol/L").unwrap();
        let r2 = AnalysisRequest::from_ledger("ord-17", None, &ledger);
        assert_eq!(r1.signature(), r2.signature());

        ledger.update_value(na, "141").unwrap();
        let r3 = AnalysisRequest::from_ledger("ord-17", None, &ledger);
        assert_ne!(r1.signature(), r3.signature());
    }

    #[test]
    fn has_numeric_values_requires_at_least_one() {
        let mut ledger = make_ledger();
        ledger.add_test("sodium").unwrap();
        let blank = AnalysisRequest::from_ledger("ord-17", None, &ledger);
        assert!(!blank.has_numeric_values());
    }

    #[test]
    fn mock_counts_calls_and_fails_on_demand() {
        let mock = MockAnalysisProvider::failing(AnalysisError::Provider {
            status: 503,
            body: "overloaded".into(),
        });
        let ledger = make_ledger();
        let request = AnalysisRequest::from_ledger("ord-17", None, &ledger);

        assert!(mock.analyze(&request).is_err());
        assert_eq!(mock.call_count(), 1);
    }
}
