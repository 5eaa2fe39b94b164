//! Diagnostics assistant coordinator.
//!
//! Debounced, cancellable scheduling around the external analysis
//! provider. Every signature change cancels the pending call and
//! schedules a new one after the quiet period, so only the last
//! signature in a burst of edits is ever analyzed. At most one call is
//! in flight per order; a newer signature supersedes an older running
//! call, and a completion whose signature no longer matches current
//! state is discarded as stale.

pub mod provider;
pub mod signature;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::{DEFAULT_ANALYSIS_TIMEOUT_SECS, DEFAULT_QUIET_PERIOD_MS};
use crate::models::AnalysisResponse;

pub use provider::{
    AnalysisError, AnalysisProvider, AnalysisRequest, HttpAnalysisClient, MockAnalysisProvider,
    ProviderReply, RequestResult,
};
pub use signature::row_signature;

#[derive(Default)]
struct AssistantState {
    /// Signature of the row set as last seen by `schedule`/`analyze_now`.
    current_signature: String,
    /// Signature of the call currently in flight, if any.
    analyzing: Option<String>,
    last_response: Option<AnalysisResponse>,
    last_error: Option<AnalysisError>,
}

/// Debounce and lifecycle manager for assistant analysis calls.
pub struct AssistantCoordinator {
    provider: Arc<dyn AnalysisProvider>,
    quiet_period: Duration,
    call_timeout: Duration,
    state: Arc<Mutex<AssistantState>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl AssistantCoordinator {
    pub fn new(
        provider: Arc<dyn AnalysisProvider>,
        quiet_period: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            quiet_period,
            call_timeout,
            state: Arc::new(Mutex::new(AssistantState::default())),
            pending: Mutex::new(None),
        }
    }

    pub fn with_defaults(provider: Arc<dyn AnalysisProvider>) -> Self {
        Self::new(
            provider,
            Duration::from_millis(DEFAULT_QUIET_PERIOD_MS),
            Duration::from_secs(DEFAULT_ANALYSIS_TIMEOUT_SECS),
        )
    }

    /// React to a (possibly unchanged) row snapshot.
    ///
    /// An unchanged signature is a no-op. A changed signature cancels
    /// whatever was pending and schedules one analysis after the quiet
    /// period, provided at least one row carries a numeric value.
    pub fn schedule(&self, request: AnalysisRequest) {
        let signature = request.signature();
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.current_signature == signature {
                tracing::debug!("Signature unchanged, analysis not rescheduled");
                return;
            }
            state.current_signature = signature.clone();
        }

        self.cancel_pending();

        if !request.has_numeric_values() {
            tracing::debug!("No numeric values, analysis not scheduled");
            return;
        }

        let state = self.state.clone();
        let provider = self.provider.clone();
        let quiet = self.quiet_period;
        let timeout = self.call_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            run_analysis(state, provider, timeout, signature, request).await;
        });

        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(handle);
        }
    }

    /// Run an analysis immediately, bypassing the quiet period.
    /// This is also the explicit retry path after a captured failure.
    pub async fn analyze_now(&self, request: AnalysisRequest) {
        let signature = request.signature();
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.current_signature = signature.clone();
            if !request.has_numeric_values() {
                state.last_error = Some(AnalysisError::NothingToAnalyze);
                return;
            }
        }
        self.cancel_pending();

        run_analysis(
            self.state.clone(),
            self.provider.clone(),
            self.call_timeout,
            signature,
            request,
        )
        .await;
    }

    /// Abort the scheduled-but-not-yet-started (or still-running) task.
    pub fn cancel_pending(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(handle) = pending.take() {
                handle.abort();
                tracing::debug!("Pending analysis superseded");
            }
        }
    }

    // ── Projections ─────────────────────────────────────────

    pub fn is_analyzing(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.analyzing.is_some())
            .unwrap_or(false)
    }

    pub fn last_response(&self) -> Option<AnalysisResponse> {
        self.state.lock().ok()?.last_response.clone()
    }

    pub fn last_error(&self) -> Option<AnalysisError> {
        self.state.lock().ok()?.last_error.clone()
    }

    /// Per-test note from the last stored response.
    pub fn test_diagnostics(&self, test_id: &str) -> Option<String> {
        self.last_response()?.note_for(test_id).map(String::from)
    }

    pub fn current_signature(&self) -> String {
        self.state
            .lock()
            .map(|s| s.current_signature.clone())
            .unwrap_or_default()
    }
}

/// Execute one provider call and fold the outcome into shared state.
///
/// The blocking provider call cannot itself be aborted: a superseded or
/// timed-out call finishes on the blocking pool and its result is
/// dropped here when the signature no longer matches.
async fn run_analysis(
    state: Arc<Mutex<AssistantState>>,
    provider: Arc<dyn AnalysisProvider>,
    call_timeout: Duration,
    signature: String,
    request: AnalysisRequest,
) {
    {
        let Ok(mut s) = state.lock() else { return };
        if s.current_signature != signature {
            tracing::debug!("Analysis superseded before start");
            return;
        }
        s.analyzing = Some(signature.clone());
    }
    tracing::info!(results = request.results.len(), "Analysis started");

    let outcome = tokio::time::timeout(
        call_timeout,
        tokio::task::spawn_blocking(move || provider.analyze(&request)),
    )
    .await;

    let result = match outcome {
        Err(_) => Err(AnalysisError::Timeout(call_timeout.as_secs())),
        Ok(Err(join)) => Err(AnalysisError::Task(join.to_string())),
        Ok(Ok(r)) => r,
    };

    let Ok(mut s) = state.lock() else { return };
    if s.analyzing.as_deref() == Some(signature.as_str()) {
        s.analyzing = None;
    }
    if s.current_signature != signature {
        tracing::debug!("Stale analysis response discarded");
        return;
    }

    match result {
        Ok(reply) => {
            tracing::info!(notes = reply.test_notes.len(), "Analysis complete");
            s.last_response = Some(AnalysisResponse {
                narrative: reply.narrative,
                test_notes: reply.test_notes,
                signature,
                generated_at: chrono::Local::now().naive_local(),
            });
            s.last_error = None;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Analysis failed");
            s.last_error = Some(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::catalog::TestCatalog;
    use crate::ledger::ResultLedger;
    use crate::models::enums::Sex;
    use crate::models::{PatientContext, TestNote};

    fn make_ledger() -> ResultLedger {
        ResultLedger::new(
            Arc::new(TestCatalog::load_test()),
            PatientContext::new(40, Sex::Male),
        )
    }

    fn request_with(values: &[(&str, &str)]) -> AnalysisRequest {
        let mut ledger = make_ledger();
        for (test, raw) in values {
            let id = ledger.add_test(test).unwrap();
            ledger.update_value(id, raw).unwrap();
        }
        AnalysisRequest::from_ledger("ord-1", None, &ledger)
    }

    fn coordinator(
        mock: Arc<MockAnalysisProvider>,
        quiet_ms: u64,
    ) -> AssistantCoordinator {
        AssistantCoordinator::new(mock, Duration::from_millis(quiet_ms), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn burst_of_edits_triggers_single_analysis_with_final_signature() {
        let mock = Arc::new(MockAnalysisProvider::new("ok"));
        let coord = coordinator(mock.clone(), 80);

        coord.schedule(request_with(&[("sodium", "138")]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        coord.schedule(request_with(&[("sodium", "140")]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let last = request_with(&[("sodium", "148")]);
        let last_signature = last.signature();
        coord.schedule(last);

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(mock.call_count(), 1);
        let response = coord.last_response().expect("analysis stored");
        assert_eq!(response.signature, last_signature);
    }

    #[tokio::test]
    async fn unchanged_signature_does_not_reschedule() {
        let mock = Arc::new(MockAnalysisProvider::new("ok"));
        let coord = coordinator(mock.clone(), 40);

        coord.schedule(request_with(&[("sodium", "140")]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.call_count(), 1);

        // Same values, e.g. after a display-unit change.
        coord.schedule(request_with(&[("sodium", "140")]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn all_blank_rows_never_call_the_provider() {
        let mock = Arc::new(MockAnalysisProvider::new("ok"));
        let coord = coordinator(mock.clone(), 10);

        let mut ledger = make_ledger();
        ledger.add_test("sodium").unwrap();
        coord.schedule(AnalysisRequest::from_ledger("ord-1", None, &ledger));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(mock.call_count(), 0);
        assert!(coord.last_response().is_none());
    }

    #[tokio::test]
    async fn analyze_now_bypasses_quiet_period_and_stores_notes() {
        let mock = Arc::new(
            MockAnalysisProvider::new("Pattern consistent with hyponatremia.").with_notes(vec![
                TestNote {
                    test_id: "sodium".into(),
                    note: "Low; assess volume status.".into(),
                },
            ]),
        );
        let coord = coordinator(mock.clone(), 5_000);

        coord.analyze_now(request_with(&[("sodium", "128")])).await;

        assert_eq!(mock.call_count(), 1);
        assert!(!coord.is_analyzing());
        assert_eq!(
            coord.test_diagnostics("sodium").as_deref(),
            Some("Low; assess volume status.")
        );
        assert_eq!(coord.test_diagnostics("potassium"), None);
    }

    #[tokio::test]
    async fn provider_failure_captured_as_state_not_thrown() {
        let mock = Arc::new(MockAnalysisProvider::failing(AnalysisError::Provider {
            status: 503,
            body: "overloaded".into(),
        }));
        let coord = coordinator(mock.clone(), 10);

        coord.analyze_now(request_with(&[("sodium", "140")])).await;

        assert!(coord.last_response().is_none());
        assert!(matches!(
            coord.last_error(),
            Some(AnalysisError::Provider { status: 503, .. })
        ));
        assert!(!coord.is_analyzing());
    }

    #[tokio::test]
    async fn explicit_retry_after_failure_clears_error() {
        let failing = Arc::new(MockAnalysisProvider::failing(AnalysisError::Connection(
            "http://localhost:8080".into(),
        )));
        let coord = coordinator(failing, 10);
        let request = request_with(&[("sodium", "140")]);

        coord.analyze_now(request.clone()).await;
        assert!(coord.last_error().is_some());

        // No automatic retry happened; the caller retries explicitly
        // against a now-healthy provider.
        let healthy = Arc::new(MockAnalysisProvider::new("ok"));
        let coord = AssistantCoordinator::new(
            healthy.clone(),
            Duration::from_millis(10),
            Duration::from_secs(5),
        );
        coord.analyze_now(request).await;
        assert!(coord.last_error().is_none());
        assert!(coord.last_response().is_some());
    }

    #[tokio::test]
    async fn analyze_now_without_values_records_nothing_to_analyze() {
        let mock = Arc::new(MockAnalysisProvider::new("ok"));
        let coord = coordinator(mock.clone(), 10);

        let mut ledger = make_ledger();
        ledger.add_test("sodium").unwrap();
        coord
            .analyze_now(AnalysisRequest::from_ledger("ord-1", None, &ledger))
            .await;

        assert_eq!(mock.call_count(), 0);
        assert!(matches!(
            coord.last_error(),
            Some(AnalysisError::NothingToAnalyze)
        ));
    }

    #[tokio::test]
    async fn is_analyzing_visible_while_call_runs() {
        let mock =
            Arc::new(MockAnalysisProvider::new("ok").with_latency(Duration::from_millis(120)));
        let coord = Arc::new(coordinator(mock, 10));

        let running = coord.clone();
        let task = tokio::spawn(async move {
            running
                .analyze_now(request_with(&[("sodium", "140")]))
                .await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(coord.is_analyzing());

        task.await.unwrap();
        assert!(!coord.is_analyzing());
    }

    #[tokio::test]
    async fn stale_completion_discarded_when_signature_moved_on() {
        let mock =
            Arc::new(MockAnalysisProvider::new("ok").with_latency(Duration::from_millis(150)));
        let coord = Arc::new(coordinator(mock.clone(), 20));

        let slow = coord.clone();
        let first = request_with(&[("sodium", "128")]);
        let first_task = tokio::spawn(async move {
            slow.analyze_now(first).await;
        });
        tokio::time::sleep(Duration::from_millis(40)).await;

        // A newer snapshot supersedes the still-running call.
        let second = request_with(&[("sodium", "148")]);
        let second_signature = second.signature();
        coord.schedule(second);

        first_task.await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let response = coord.last_response().expect("second analysis stored");
        assert_eq!(response.signature, second_signature);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn request_values_in_hashmap_order_do_not_flap_signature() {
        // Two ledgers with the same values always produce the same
        // signature, so reloading an order does not re-trigger analysis.
        let mock = Arc::new(MockAnalysisProvider::new("ok"));
        let coord = coordinator(mock.clone(), 20);

        let mut priors = HashMap::new();
        priors.insert("sodium".to_string(), 139.0);

        let mut a = make_ledger();
        for (t, v) in [("sodium", "140"), ("potassium", "4.2")] {
            let id = a.add_test(t).unwrap();
            a.update_value(id, v).unwrap();
        }
        a.apply_priors(&priors);

        let mut b = make_ledger();
        for (t, v) in [("potassium", "4.2"), ("sodium", "140")] {
            let id = b.add_test(t).unwrap();
            b.update_value(id, v).unwrap();
        }

        coord.schedule(AnalysisRequest::from_ledger("ord-1", None, &a));
        tokio::time::sleep(Duration::from_millis(80)).await;
        coord.schedule(AnalysisRequest::from_ledger("ord-1", None, &b));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(mock.call_count(), 1);
    }
}
