//! The dispatcher's single entry point to both model tiers.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use fogpdm_core::result::{InferenceResult, Tier};

use crate::capability::Predictor;
use crate::error::InferenceError;
use crate::messages::PredictRequest;
use crate::model::ModelSlot;

/// Wraps the edge and cloud predictors.
///
/// Every call reads one model snapshot, runs under the configured timeout
/// and comes back as an [`InferenceResult`] whose confidence and fault flag
/// are derived from the reported probability. Failures are returned as
/// [`InferenceError`]; choosing a fallback is the caller's business.
pub struct InferenceClient {
    edge: Arc<dyn Predictor>,
    cloud: Arc<dyn Predictor>,
    cloud_model: Arc<ModelSlot>,
    timeout: Duration,
}

impl InferenceClient {
    pub fn new(edge: Arc<dyn Predictor>, cloud: Arc<dyn Predictor>, timeout: Duration) -> Self {
        Self {
            edge,
            cloud,
            cloud_model: Arc::new(ModelSlot::default()),
            timeout,
        }
    }

    /// Share an existing cloud model slot (the model-sync controller writes
    /// to it).
    pub fn with_cloud_model(mut self, slot: Arc<ModelSlot>) -> Self {
        self.cloud_model = slot;
        self
    }

    pub fn cloud_model(&self) -> &Arc<ModelSlot> {
        &self.cloud_model
    }

    /// Classify on the edge tier with the model currently installed in
    /// `model` (the edge node's slot).
    pub async fn predict_edge(
        &self,
        model: &ModelSlot,
        request: PredictRequest,
    ) -> Result<InferenceResult, InferenceError> {
        self.call(Tier::Edge, self.edge.as_ref(), model, request).await
    }

    /// Classify on the cloud tier.
    pub async fn predict_cloud(
        &self,
        request: PredictRequest,
    ) -> Result<InferenceResult, InferenceError> {
        self.call(Tier::Cloud, self.cloud.as_ref(), &self.cloud_model, request)
            .await
    }

    async fn call(
        &self,
        tier: Tier,
        predictor: &dyn Predictor,
        slot: &ModelSlot,
        request: PredictRequest,
    ) -> Result<InferenceResult, InferenceError> {
        let model = slot.load();
        let request = request.for_model(model.version);
        let started = Instant::now();

        let response = tokio::time::timeout(self.timeout, predictor.predict(&model, &request))
            .await
            .map_err(|_| InferenceError::Timeout(self.timeout))??
            .validate()?;

        let latency = if response.latency_ms.is_finite() && response.latency_ms > 0.0 {
            Duration::from_micros((response.latency_ms * 1000.0).round() as u64)
        } else {
            started.elapsed()
        };
        let method = if response.method.is_empty() {
            predictor.name().to_string()
        } else {
            response.method
        };

        let result = InferenceResult::from_probability(tier, response.prob, latency, method);
        if result.is_fault != (response.fault == 1) {
            tracing::debug!(
                tier = %tier,
                machine_id = request.machine_id,
                reported_fault = response.fault,
                probability = response.prob,
                "Fault flag disagrees with probability, using probability",
            );
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::capability::UnavailablePredictor;
    use crate::messages::PredictResponse;
    use crate::model::VersionedModel;

    /// Replies with a fixed probability after an optional delay and records
    /// the model version it was asked to use.
    struct Scripted {
        prob: f64,
        fault: i64,
        delay: Duration,
        seen_version: AtomicU64,
    }

    impl Scripted {
        fn new(prob: f64) -> Self {
            Self {
                prob,
                fault: i64::from(prob > 0.5),
                delay: Duration::ZERO,
                seen_version: AtomicU64::new(u64::MAX),
            }
        }
    }

    #[async_trait]
    impl Predictor for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn predict(
            &self,
            model: &VersionedModel,
            request: &PredictRequest,
        ) -> Result<PredictResponse, InferenceError> {
            assert_eq!(model.version, request.model_version);
            self.seen_version.store(model.version, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(PredictResponse {
                fault: self.fault,
                prob: self.prob,
                latency_ms: 0.0,
                method: String::new(),
            })
        }
    }

    fn request() -> PredictRequest {
        PredictRequest {
            machine_id: 1,
            features: Vec::new(),
            vibration: None,
            label: None,
            model_version: 0,
        }
    }

    fn client(edge: Arc<dyn Predictor>, cloud: Arc<dyn Predictor>) -> InferenceClient {
        InferenceClient::new(edge, cloud, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn edge_result_carries_confidence_and_tier() {
        let c = client(
            Arc::new(Scripted::new(0.95)),
            Arc::new(UnavailablePredictor::new("cloud")),
        );
        let r = c.predict_edge(&ModelSlot::default(), request()).await.unwrap();
        assert_eq!(r.tier, Tier::Edge);
        assert!(r.is_fault);
        assert!((r.confidence - 0.9).abs() < 1e-9);
        assert_eq!(r.method, "scripted");
    }

    #[tokio::test]
    async fn call_uses_current_model_version() {
        let edge = Arc::new(Scripted::new(0.2));
        let c = client(edge.clone(), Arc::new(UnavailablePredictor::new("cloud")));
        let slot = ModelSlot::default();
        slot.replace(VersionedModel {
            version: 4,
            blob: vec![1],
            updated_at: 1.0,
        });

        c.predict_edge(&slot, request()).await.unwrap();
        assert_eq!(edge.seen_version.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fault_flag_is_recomputed_from_probability() {
        let mut lying = Scripted::new(0.3);
        lying.fault = 1;
        let c = client(Arc::new(UnavailablePredictor::new("edge")), Arc::new(lying));
        let r = c.predict_cloud(request()).await.unwrap();
        assert!(!r.is_fault);
        assert_eq!(r.tier, Tier::Cloud);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_capability_times_out() {
        let mut slow = Scripted::new(0.9);
        slow.delay = Duration::from_secs(5);
        let c = client(Arc::new(slow), Arc::new(UnavailablePredictor::new("cloud")));
        assert_matches!(
            c.predict_edge(&ModelSlot::default(), request()).await,
            Err(InferenceError::Timeout(_))
        );
    }

    #[tokio::test]
    async fn unavailable_capability_surfaces_error() {
        let c = client(
            Arc::new(UnavailablePredictor::new("edge")),
            Arc::new(UnavailablePredictor::new("cloud")),
        );
        assert_matches!(
            c.predict_cloud(request()).await,
            Err(InferenceError::Unavailable(_))
        );
    }
}
