// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! The Consensus Engine: fans a detection request out to every configured
//! [`Provider`](veritas_providers::Provider), waits for each probe under a
//! shared deadline, and aggregates the results into a single
//! [`ConsensusSummary`](veritas_core::ConsensusSummary).
//!
//! Aggregation is a weighted mean over providers that returned
//! [`ProviderStatus::Ok`](veritas_core::ProviderStatus); unavailable,
//! unsupported, and errored providers are recorded for audit but excluded
//! from the mean. A request with zero successful providers resolves to a
//! probability of `0.0` with `is_ai_generated = false` — the engine never
//! panics or blocks indefinitely on an empty vote set.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use veritas_core::{ConsensusSummary, ConsensusVote, ContentType, ProviderStatus};
use veritas_error::{ErrorCode, VeritasError};
use veritas_providers::{Artifact, Provider};

/// Name [`veritas_providers::InternalDetector`] registers itself under. A
/// hard fault on this provider specifically fails the whole call, since it
/// is the only provider guaranteed to be configured.
const INTERNAL_PROVIDER_NAME: &str = "internal";

/// Aggregates provider opinions into one calibrated verdict.
pub struct ConsensusEngine {
    providers: Vec<Arc<dyn Provider>>,
    provider_timeout: Duration,
    thresholds: std::collections::BTreeMap<String, f64>,
}

/// Default decision threshold used when a modality has no configured entry.
const DEFAULT_THRESHOLD: f64 = 0.5;

impl ConsensusEngine {
    /// Construct a new engine over `providers`, applying `provider_timeout`
    /// to each individual probe and looking up decision thresholds from
    /// `thresholds` (keyed by [`ContentType::as_str`]).
    #[must_use]
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        provider_timeout: Duration,
        thresholds: std::collections::BTreeMap<String, f64>,
    ) -> Self {
        Self {
            providers,
            provider_timeout,
            thresholds,
        }
    }

    fn threshold_for(&self, modality: ContentType) -> f64 {
        self.thresholds
            .get(modality.as_str())
            .copied()
            .unwrap_or(DEFAULT_THRESHOLD)
    }

    /// Probe every provider that supports `modality` and aggregate their
    /// votes into a [`ConsensusSummary`].
    ///
    /// If the internal detector's own vote comes back as anything other
    /// than [`ProviderStatus::Ok`], the call fails with
    /// [`ErrorCode::DetectorUnavailable`] rather than silently excluding it
    /// from the mean like any other provider — it is the one provider this
    /// engine assumes is always configured.
    pub async fn score(
        &self,
        modality: ContentType,
        artifact: Artifact<'_>,
    ) -> Result<ConsensusSummary, VeritasError> {
        let threshold = self.threshold_for(modality);

        let probes = self.providers.iter().map(|provider| {
            let provider = Arc::clone(provider);
            let artifact = artifact.clone();
            let timeout = self.provider_timeout;
            async move {
                if !provider.supports(modality) {
                    return ConsensusVote {
                        provider: provider.name().to_string(),
                        probability: None,
                        weight: provider.weight_hint(),
                        status: ProviderStatus::Unsupported,
                        rationale: format!("{} does not support {modality}", provider.name()),
                    };
                }

                let weight = provider.weight_hint();
                let name = provider.name().to_string();
                match tokio::time::timeout(timeout, provider.probe(modality, &artifact, timeout))
                    .await
                {
                    Ok(outcome) => ConsensusVote {
                        provider: name,
                        probability: outcome.probability,
                        weight,
                        status: outcome.status,
                        rationale: outcome.rationale,
                    },
                    Err(_) => ConsensusVote {
                        provider: name,
                        probability: None,
                        weight,
                        status: ProviderStatus::Unavailable,
                        rationale: format!("probe exceeded {timeout:?} deadline"),
                    },
                }
            }
        });

        let providers = join_all(probes).await;

        let internal_vote = providers
            .iter()
            .find(|v| v.provider == INTERNAL_PROVIDER_NAME);
        if let Some(vote) = internal_vote {
            if vote.status != ProviderStatus::Ok {
                return Err(VeritasError::new(
                    ErrorCode::DetectorUnavailable,
                    format!("internal detector unavailable: {}", vote.rationale),
                ));
            }
        }

        Ok(summarize(providers, threshold))
    }
}

/// Aggregate a set of provider votes into a final verdict.
///
/// Exposed standalone (in addition to [`ConsensusEngine::score`]) so that
/// callers with already-collected votes — e.g. replaying an audit record —
/// can recompute the same summary deterministically.
#[must_use]
pub fn summarize(providers: Vec<ConsensusVote>, threshold: f64) -> ConsensusSummary {
    let ok_votes: Vec<&ConsensusVote> = providers
        .iter()
        .filter(|v| v.status == ProviderStatus::Ok && v.probability.is_some())
        .collect();

    let weight_sum: f64 = ok_votes.iter().map(|v| v.weight.max(0.0)).sum();

    let final_probability = if weight_sum > 0.0 {
        ok_votes
            .iter()
            .map(|v| v.probability.unwrap_or(0.0) * v.weight.max(0.0))
            .sum::<f64>()
            / weight_sum
    } else {
        0.0
    };

    let disagreement = if weight_sum > 0.0 {
        let variance = ok_votes
            .iter()
            .map(|v| {
                let diff = v.probability.unwrap_or(0.0) - final_probability;
                diff * diff * v.weight.max(0.0)
            })
            .sum::<f64>()
            / weight_sum;
        variance.sqrt()
    } else {
        0.0
    };

    ConsensusSummary {
        final_probability,
        threshold,
        is_ai_generated: final_probability >= threshold,
        disagreement,
        providers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedProvider {
        name: &'static str,
        probability: f64,
        weight: f64,
        status: ProviderStatus,
    }

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn supports(&self, _modality: ContentType) -> bool {
            true
        }

        fn weight_hint(&self) -> f64 {
            self.weight
        }

        async fn probe(
            &self,
            _modality: ContentType,
            _artifact: &Artifact<'_>,
            _deadline: Duration,
        ) -> veritas_providers::ProviderOutcome {
            match self.status {
                ProviderStatus::Ok => veritas_providers::ProviderOutcome::ok(self.probability, "fixed"),
                _ => veritas_providers::ProviderOutcome::unavailable("fixed unavailable"),
            }
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl Provider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        fn supports(&self, _modality: ContentType) -> bool {
            true
        }

        async fn probe(
            &self,
            _modality: ContentType,
            _artifact: &Artifact<'_>,
            _deadline: Duration,
        ) -> veritas_providers::ProviderOutcome {
            tokio::time::sleep(Duration::from_secs(10)).await;
            veritas_providers::ProviderOutcome::ok(0.9, "too slow to matter")
        }
    }

    fn thresholds(value: f64) -> std::collections::BTreeMap<String, f64> {
        std::collections::BTreeMap::from([("text".to_string(), value)])
    }

    #[tokio::test]
    async fn weighted_mean_of_two_equal_weight_providers() {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(FixedProvider {
                name: "a",
                probability: 0.2,
                weight: 1.0,
                status: ProviderStatus::Ok,
            }),
            Arc::new(FixedProvider {
                name: "b",
                probability: 0.8,
                weight: 1.0,
                status: ProviderStatus::Ok,
            }),
        ];
        let engine = ConsensusEngine::new(providers, Duration::from_secs(1), thresholds(0.5));
        let summary = engine.score(ContentType::Text, Artifact::Text("hi")).await.unwrap();
        assert!((summary.final_probability - 0.5).abs() < 1e-9);
        assert!(summary.is_ai_generated);
    }

    #[tokio::test]
    async fn unavailable_provider_excluded_from_mean() {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(FixedProvider {
                name: "a",
                probability: 0.9,
                weight: 1.0,
                status: ProviderStatus::Ok,
            }),
            Arc::new(FixedProvider {
                name: "b",
                probability: 0.1,
                weight: 5.0,
                status: ProviderStatus::Unavailable,
            }),
        ];
        let engine = ConsensusEngine::new(providers, Duration::from_secs(1), thresholds(0.5));
        let summary = engine.score(ContentType::Text, Artifact::Text("hi")).await.unwrap();
        assert!((summary.final_probability - 0.9).abs() < 1e-9);
        assert_eq!(summary.providers.len(), 2);
    }

    #[tokio::test]
    async fn all_providers_unavailable_resolves_to_zero() {
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(FixedProvider {
            name: "a",
            probability: 0.9,
            weight: 1.0,
            status: ProviderStatus::Unavailable,
        })];
        let engine = ConsensusEngine::new(providers, Duration::from_secs(1), thresholds(0.5));
        let summary = engine.score(ContentType::Text, Artifact::Text("hi")).await.unwrap();
        assert_eq!(summary.final_probability, 0.0);
        assert!(!summary.is_ai_generated);
        assert_eq!(summary.disagreement, 0.0);
    }

    #[tokio::test]
    async fn slow_provider_times_out_and_is_marked_unavailable() {
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(SlowProvider)];
        let engine = ConsensusEngine::new(providers, Duration::from_millis(20), thresholds(0.5));
        let summary = engine.score(ContentType::Text, Artifact::Text("hi")).await.unwrap();
        assert_eq!(summary.providers[0].status, ProviderStatus::Unavailable);
    }

    #[tokio::test]
    async fn tie_at_threshold_is_ai_generated() {
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(FixedProvider {
            name: "a",
            probability: 0.5,
            weight: 1.0,
            status: ProviderStatus::Ok,
        })];
        let engine = ConsensusEngine::new(providers, Duration::from_secs(1), thresholds(0.5));
        let summary = engine.score(ContentType::Text, Artifact::Text("hi")).await.unwrap();
        assert!(summary.is_ai_generated);
    }

    #[test]
    fn summarize_is_deterministic_given_same_votes() {
        let votes = vec![
            ConsensusVote {
                provider: "a".into(),
                probability: Some(0.3),
                weight: 2.0,
                status: ProviderStatus::Ok,
                rationale: "x".into(),
            },
            ConsensusVote {
                provider: "b".into(),
                probability: Some(0.9),
                weight: 1.0,
                status: ProviderStatus::Ok,
                rationale: "y".into(),
            },
        ];
        let first = summarize(votes.clone(), 0.5);
        let second = summarize(votes, 0.5);
        assert_eq!(first.final_probability, second.final_probability);
        assert_eq!(first.disagreement, second.disagreement);
    }

    #[test]
    fn disagreement_is_zero_when_all_votes_agree() {
        let votes = vec![
            ConsensusVote {
                provider: "a".into(),
                probability: Some(0.4),
                weight: 1.0,
                status: ProviderStatus::Ok,
                rationale: "x".into(),
            },
            ConsensusVote {
                provider: "b".into(),
                probability: Some(0.4),
                weight: 1.0,
                status: ProviderStatus::Ok,
                rationale: "y".into(),
            },
        ];
        let summary = summarize(votes, 0.5);
        assert_eq!(summary.disagreement, 0.0);
    }

    #[tokio::test]
    async fn internal_detector_hard_fault_fails_the_whole_call() {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(FixedProvider {
                name: "internal",
                probability: 0.9,
                weight: 2.0,
                status: ProviderStatus::Unavailable,
            }),
            Arc::new(FixedProvider {
                name: "other",
                probability: 0.1,
                weight: 1.0,
                status: ProviderStatus::Ok,
            }),
        ];
        let engine = ConsensusEngine::new(providers, Duration::from_secs(1), thresholds(0.5));
        let err = engine
            .score(ContentType::Text, Artifact::Text("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DetectorUnavailable);
    }
}
