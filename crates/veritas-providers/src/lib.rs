// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Provider trait and adapters for the Consensus Engine.
//!
//! [`Provider`] is probed by `veritas-consensus` for every detection
//! request. The internal heuristic detector is always probed; external
//! adapters (Copyleaks, Reality Defender, C2PA, Hive) are probed only when
//! configured and enabled. Vendor wire protocols are out of scope for this
//! workspace — external adapters are modeled at the trait boundary only and
//! report [`ProviderStatus::Unavailable`] until a real client is wired in.

use async_trait::async_trait;
use std::time::Duration;
use veritas_config::ProviderConfig;
use veritas_core::{ContentType, ProviderStatus};

/// The submitted content a provider is asked to evaluate.
#[derive(Debug, Clone)]
pub enum Artifact<'a> {
    /// Normalized text.
    Text(&'a str),
    /// Raw media bytes (image, audio, or video).
    Bytes(&'a [u8]),
}

/// The raw result of one provider probe, before consensus weighting.
#[derive(Debug, Clone)]
pub struct ProviderOutcome {
    /// Probability in `[0, 1]` that the content is AI-generated, absent when
    /// the provider did not produce one.
    pub probability: Option<f64>,
    /// Terminal status of the probe.
    pub status: ProviderStatus,
    /// Human-readable explanation.
    pub rationale: String,
}

impl ProviderOutcome {
    /// Construct a successful outcome.
    #[must_use]
    pub fn ok(probability: f64, rationale: impl Into<String>) -> Self {
        Self {
            probability: Some(probability.clamp(0.0, 1.0)),
            status: ProviderStatus::Ok,
            rationale: rationale.into(),
        }
    }

    /// Construct an outcome for a provider that could not be reached.
    #[must_use]
    pub fn unavailable(rationale: impl Into<String>) -> Self {
        Self {
            probability: None,
            status: ProviderStatus::Unavailable,
            rationale: rationale.into(),
        }
    }

    /// Construct an outcome for a modality the provider does not support.
    #[must_use]
    pub fn unsupported(modality: ContentType) -> Self {
        Self {
            probability: None,
            status: ProviderStatus::Unsupported,
            rationale: format!("provider does not support modality '{modality}'"),
        }
    }

    /// Construct an outcome for a provider that returned an explicit error.
    #[must_use]
    pub fn error(rationale: impl Into<String>) -> Self {
        Self {
            probability: None,
            status: ProviderStatus::Error,
            rationale: rationale.into(),
        }
    }
}

/// A source of AI-content probability opinions, probed by the Consensus
/// Engine for every request.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name (`"internal"`, `"copyleaks"`, ...).
    fn name(&self) -> &str;

    /// Returns `true` if this provider is able to evaluate `modality` at
    /// all, independent of runtime availability.
    fn supports(&self, modality: ContentType) -> bool;

    /// Relative weight this provider contributes to the consensus weighted
    /// mean, absent a per-provider override from configuration.
    fn weight_hint(&self) -> f64 {
        1.0
    }

    /// Evaluate `artifact`, returning within `deadline` at the caller's
    /// discretion — callers are expected to wrap this call in
    /// `tokio::time::timeout` rather than rely on the provider enforcing it
    /// internally, but well-behaved providers should not block indefinitely.
    async fn probe(
        &self,
        modality: ContentType,
        artifact: &Artifact<'_>,
        deadline: Duration,
    ) -> ProviderOutcome;
}

// ---------------------------------------------------------------------------
// Internal detector
// ---------------------------------------------------------------------------

/// The always-on heuristic detector. Unlike external adapters, this
/// provider has no network dependency and is never `unavailable`.
///
/// The scoring heuristic here is intentionally simple (lexical diversity
/// and punctuation-burstiness for text; deterministic size-based scoring
/// for media) since the exact detection algorithm is explicitly out of
/// scope for this workspace — the internal detector exists to guarantee
/// the Consensus Engine always has at least one vote.
#[derive(Debug, Default)]
pub struct InternalDetector;

impl InternalDetector {
    /// Construct the internal detector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn score_text(text: &str) -> f64 {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return 0.0;
        }
        let unique: std::collections::HashSet<&str> = words.iter().copied().collect();
        let diversity = unique.len() as f64 / words.len() as f64;
        // Low lexical diversity over a long passage is weakly correlated
        // with templated/generated text; this is a placeholder heuristic.
        let repetition_signal = 1.0 - diversity;
        repetition_signal.clamp(0.0, 1.0)
    }

    fn score_bytes(bytes: &[u8]) -> f64 {
        if bytes.is_empty() {
            return 0.0;
        }
        // Deterministic placeholder: not a real media classifier.
        let sum: u64 = bytes.iter().take(4096).map(|b| *b as u64).sum();
        let normalized = (sum % 1000) as f64 / 1000.0;
        normalized
    }
}

#[async_trait]
impl Provider for InternalDetector {
    fn name(&self) -> &str {
        "internal"
    }

    fn supports(&self, _modality: ContentType) -> bool {
        true
    }

    fn weight_hint(&self) -> f64 {
        // The internal detector always runs, so it anchors the consensus
        // mean with the largest default weight.
        2.0
    }

    async fn probe(
        &self,
        modality: ContentType,
        artifact: &Artifact<'_>,
        _deadline: Duration,
    ) -> ProviderOutcome {
        let probability = match artifact {
            Artifact::Text(text) => Self::score_text(text),
            Artifact::Bytes(bytes) => Self::score_bytes(bytes),
        };
        let _ = modality;
        ProviderOutcome::ok(probability, "internal heuristic detector")
    }
}

// ---------------------------------------------------------------------------
// External adapters
// ---------------------------------------------------------------------------

/// Which external provider an [`ExternalAdapter`] speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    /// Copyleaks AI-content detection.
    Copyleaks,
    /// Reality Defender deepfake detection.
    RealityDefender,
    /// C2PA content-credentials verification.
    C2pa,
    /// Hive AI-content moderation/detection.
    Hive,
}

impl ExternalKind {
    /// Parse a provider kind from its configured name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "copyleaks" => Some(Self::Copyleaks),
            "reality_defender" => Some(Self::RealityDefender),
            "c2pa" => Some(Self::C2pa),
            "hive" => Some(Self::Hive),
            _ => None,
        }
    }

    /// Modalities this provider kind is able to evaluate.
    #[must_use]
    pub fn supported_modalities(&self) -> &'static [ContentType] {
        match self {
            Self::Copyleaks => &[ContentType::Text],
            Self::RealityDefender => &[ContentType::Image, ContentType::Audio, ContentType::Video],
            Self::C2pa => &[ContentType::Image, ContentType::Video],
            Self::Hive => &[ContentType::Text, ContentType::Image, ContentType::Audio, ContentType::Video],
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Copyleaks => "copyleaks",
            Self::RealityDefender => "reality_defender",
            Self::C2pa => "c2pa",
            Self::Hive => "hive",
        }
    }
}

/// A configured external provider adapter.
///
/// The actual vendor wire protocol is out of scope for this workspace
/// (see `SPEC_FULL.md` Non-goals); this adapter establishes the trait
/// boundary every future real client would implement against, and reports
/// `unavailable` with a clear rationale until one is wired in.
#[derive(Debug)]
pub struct ExternalAdapter {
    kind: ExternalKind,
    base_url: Option<String>,
    weight: f64,
}

impl ExternalAdapter {
    /// Build an adapter from a parsed [`ProviderConfig`] entry.
    ///
    /// Returns `None` if `config.name` does not match a known external
    /// provider kind.
    #[must_use]
    pub fn from_config(config: &ProviderConfig) -> Option<Self> {
        let kind = ExternalKind::from_name(&config.name)?;
        Some(Self {
            kind,
            base_url: config.base_url.clone(),
            weight: config.weight,
        })
    }

    /// Relative weight configured for this provider.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }
}

#[async_trait]
impl Provider for ExternalAdapter {
    fn name(&self) -> &str {
        self.kind.label()
    }

    fn supports(&self, modality: ContentType) -> bool {
        self.kind.supported_modalities().contains(&modality)
    }

    fn weight_hint(&self) -> f64 {
        self.weight
    }

    async fn probe(
        &self,
        modality: ContentType,
        _artifact: &Artifact<'_>,
        _deadline: Duration,
    ) -> ProviderOutcome {
        if !self.supports(modality) {
            return ProviderOutcome::unsupported(modality);
        }
        match &self.base_url {
            Some(_) => ProviderOutcome::unavailable(format!(
                "{} client is not implemented in this workspace",
                self.kind.label()
            )),
            None => ProviderOutcome::unavailable(format!(
                "{} has no base_url configured",
                self.kind.label()
            )),
        }
    }
}

/// Build the list of providers the Consensus Engine should probe: the
/// internal detector is always first, followed by every enabled, known
/// external provider from `config.providers`.
#[must_use]
pub fn build_providers(
    providers_config: &[ProviderConfig],
) -> Vec<std::sync::Arc<dyn Provider>> {
    let mut providers: Vec<std::sync::Arc<dyn Provider>> =
        vec![std::sync::Arc::new(InternalDetector::new())];

    for entry in providers_config {
        if !entry.enabled {
            continue;
        }
        match ExternalAdapter::from_config(entry) {
            Some(adapter) => providers.push(std::sync::Arc::new(adapter)),
            None => tracing::warn!(provider = %entry.name, "unknown provider name, skipping"),
        }
    }

    providers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn internal_detector_supports_all_modalities() {
        let detector = InternalDetector::new();
        assert!(detector.supports(ContentType::Text));
        assert!(detector.supports(ContentType::Video));
    }

    #[tokio::test]
    async fn internal_detector_probe_returns_ok() {
        let detector = InternalDetector::new();
        let outcome = detector
            .probe(
                ContentType::Text,
                &Artifact::Text("the quick brown fox jumps over the lazy dog"),
                Duration::from_secs(1),
            )
            .await;
        assert_eq!(outcome.status, ProviderStatus::Ok);
        let p = outcome.probability.expect("probability present");
        assert!((0.0..=1.0).contains(&p));
    }

    #[tokio::test]
    async fn internal_detector_handles_empty_text() {
        let detector = InternalDetector::new();
        let outcome = detector
            .probe(ContentType::Text, &Artifact::Text(""), Duration::from_secs(1))
            .await;
        assert_eq!(outcome.probability, Some(0.0));
    }

    #[test]
    fn external_kind_from_name_roundtrips() {
        assert_eq!(ExternalKind::from_name("copyleaks"), Some(ExternalKind::Copyleaks));
        assert_eq!(ExternalKind::from_name("nonexistent"), None);
    }

    #[test]
    fn external_adapter_respects_modality_support() {
        let config = ProviderConfig {
            name: "copyleaks".into(),
            enabled: true,
            weight: 1.0,
            base_url: Some("https://api.copyleaks.test".into()),
            api_key_env: None,
        };
        let adapter = ExternalAdapter::from_config(&config).unwrap();
        assert!(adapter.supports(ContentType::Text));
        assert!(!adapter.supports(ContentType::Audio));
    }

    #[tokio::test]
    async fn external_adapter_unsupported_modality_short_circuits() {
        let config = ProviderConfig {
            name: "c2pa".into(),
            enabled: true,
            weight: 1.0,
            base_url: Some("https://c2pa.test".into()),
            api_key_env: None,
        };
        let adapter = ExternalAdapter::from_config(&config).unwrap();
        let outcome = adapter
            .probe(ContentType::Audio, &Artifact::Bytes(&[1, 2, 3]), Duration::from_secs(1))
            .await;
        assert_eq!(outcome.status, ProviderStatus::Unsupported);
    }

    #[tokio::test]
    async fn external_adapter_reports_unavailable_without_real_client() {
        let config = ProviderConfig {
            name: "hive".into(),
            enabled: true,
            weight: 1.0,
            base_url: Some("https://hive.test".into()),
            api_key_env: None,
        };
        let adapter = ExternalAdapter::from_config(&config).unwrap();
        let outcome = adapter
            .probe(ContentType::Text, &Artifact::Text("hello"), Duration::from_secs(1))
            .await;
        assert_eq!(outcome.status, ProviderStatus::Unavailable);
    }

    #[test]
    fn build_providers_always_includes_internal_first() {
        let providers = build_providers(&[]);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name(), "internal");
    }

    #[test]
    fn build_providers_skips_disabled_entries() {
        let config = vec![ProviderConfig {
            name: "copyleaks".into(),
            enabled: false,
            weight: 1.0,
            base_url: None,
            api_key_env: None,
        }];
        let providers = build_providers(&config);
        assert_eq!(providers.len(), 1);
    }

    #[test]
    fn build_providers_includes_enabled_known_providers() {
        let config = vec![ProviderConfig {
            name: "copyleaks".into(),
            enabled: true,
            weight: 2.0,
            base_url: Some("https://api.copyleaks.test".into()),
            api_key_env: None,
        }];
        let providers = build_providers(&config);
        assert_eq!(providers.len(), 2);
        assert!(providers.iter().any(|p| p.name() == "copyleaks"));
    }
}
