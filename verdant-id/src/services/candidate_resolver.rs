//! Free-text query → candidate list
//!
//! Never fails: a matching error yields an empty list (the caller then tries a
//! direct by-name identification), and enrichment failures leave a candidate
//! without a preview.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::Candidate;
use crate::services::analyzer::{parse_candidates, PlantAnalyzer};
use crate::services::image_lookup::ImageLookup;

pub const MAX_CANDIDATES: usize = 5;

pub struct CandidateResolver {
    analyzer: Arc<dyn PlantAnalyzer>,
    images: Arc<dyn ImageLookup>,
}

impl CandidateResolver {
    pub fn new(analyzer: Arc<dyn PlantAnalyzer>, images: Arc<dyn ImageLookup>) -> Self {
        Self { analyzer, images }
    }

    pub async fn resolve(&self, query: &str, language: &str) -> Vec<Candidate> {
        let raw = match self.analyzer.match_candidates(query, language).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(query, error = %e, "Candidate matching failed");
                return Vec::new();
            }
        };

        let candidates = match parse_candidates(&raw) {
            Ok(candidates) => dedupe(candidates),
            Err(e) => {
                tracing::warn!(query, error = %e, "Candidate response rejected");
                return Vec::new();
            }
        };

        let enriched = join_all(candidates.into_iter().map(|c| self.enrich(c))).await;
        tracing::debug!(query, count = enriched.len(), "Resolved candidates");
        enriched
    }

    /// Best-effort preview by scientific name, then common name
    pub async fn preview_for(&self, scientific_name: &str, common_name: &str) -> Option<String> {
        for name in [scientific_name, common_name] {
            if name.trim().is_empty() {
                continue;
            }
            match self.images.lookup(name).await {
                Ok(Some(url)) => return Some(url),
                Ok(None) => {}
                Err(e) => tracing::debug!(name, error = %e, "Preview lookup failed"),
            }
        }
        None
    }

    async fn enrich(&self, mut candidate: Candidate) -> Candidate {
        if candidate.image_url.is_none() {
            candidate.image_url = self
                .preview_for(&candidate.scientific_name, &candidate.common_name)
                .await;
        }
        candidate
    }
}

/// Drop repeated scientific names (case-insensitive) and cap the list
fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.scientific_name.to_lowercase()))
        .take(MAX_CANDIDATES)
        .collect()
}
