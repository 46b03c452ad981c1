//! Sequential fallback over an ordered list of candidates.
//!
//! Retrying happens inside a candidate (see [`crate::retry`]); falling
//! through happens between candidates. Candidates are never tried in
//! parallel because each one draws on its own quota bucket.

use crate::{
    classifier::{classify, ErrorClassification},
    error::{GenError, Result},
    models::Candidate,
    retry::{retry, Deadline},
};
use std::future::Future;

/// Fallback priority: the first candidate is the caller's preference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateOrder(Vec<Candidate>);

impl CandidateOrder {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self(candidates)
    }

    pub fn primary(&self) -> Option<&Candidate> {
        self.0.first()
    }

    pub fn is_primary(&self, id: &str) -> bool {
        self.primary().map_or(false, |primary| primary.id == id)
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.0
    }

    pub fn ids(&self) -> Vec<&str> {
        self.0.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, candidate: Candidate) {
        self.0.push(candidate);
    }

    /// Returns a new order with `head` tried before everything in `self`.
    pub fn prepended(&self, head: Candidate) -> Self {
        let mut candidates = Vec::with_capacity(self.0.len() + 1);
        candidates.push(head);
        candidates.extend(self.0.iter().cloned());
        Self(candidates)
    }
}

impl From<Vec<Candidate>> for CandidateOrder {
    fn from(candidates: Vec<Candidate>) -> Self {
        Self(candidates)
    }
}

/// What a successful waterfall hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct Served<T> {
    pub value: T,
    pub served_by: String,
    /// Position of the serving candidate; zero means the primary.
    pub rung: usize,
}

impl<T> Served<T> {
    pub fn degraded(&self) -> bool {
        self.rung > 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelWaterfall {
    deadline: Deadline,
}

impl ModelWaterfall {
    pub fn new(deadline: Deadline) -> Self {
        Self { deadline }
    }

    /// Tries each candidate in order until one yields at least one artifact.
    ///
    /// A reply with no artifacts counts as a failed attempt.
    pub async fn run<T, F, Fut>(
        &self,
        order: &CandidateOrder,
        invoke: F,
    ) -> Result<Served<Vec<T>>>
    where
        F: Fn(Candidate) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        self.try_each(order, |candidate| {
            let id = candidate.id.clone();
            let attempt = invoke(candidate);
            async move {
                match attempt.await {
                    Ok(artifacts) if artifacts.is_empty() => {
                        Err(GenError::EmptyResponse { model: id })
                    }
                    other => other,
                }
            }
        })
        .await
    }

    /// Tries each candidate in order until one call succeeds.
    pub async fn try_each<T, F, Fut>(
        &self,
        order: &CandidateOrder,
        invoke: F,
    ) -> Result<Served<T>>
    where
        F: Fn(Candidate) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_failure: Option<(ErrorClassification, String)> = None;

        for (rung, candidate) in order.candidates().iter().enumerate() {
            log::info!(
                "Trying candidate {} ({}/{}, quota bucket {})",
                candidate.id,
                rung + 1,
                order.len(),
                candidate.quota_bucket
            );

            let outcome =
                retry(&candidate.retry, self.deadline, || invoke(candidate.clone())).await;

            match outcome {
                Ok(value) => {
                    if rung > 0 {
                        log::warn!("Served by fallback candidate {}", candidate.id);
                    }
                    return Ok(Served {
                        value,
                        served_by: candidate.id.clone(),
                        rung,
                    });
                }
                Err(GenError::DeadlineExceeded) => {
                    log::warn!("Deadline reached while trying {}", candidate.id);
                    return Err(GenError::DeadlineExceeded);
                }
                Err(err) => {
                    let classification = classify(&err);
                    log::warn!(
                        "Candidate {} failed with {}: {}",
                        candidate.id,
                        classification,
                        err.diagnostic()
                    );
                    last_failure = Some((classification, err.diagnostic()));
                }
            }
        }

        let (classification, detail) = last_failure.unwrap_or((
            ErrorClassification::Unknown,
            "no candidates configured".to_string(),
        ));
        log::error!(
            "All {} candidates exhausted, last failure was {}",
            order.len(),
            classification
        );
        Err(GenError::AllCandidatesExhausted {
            classification,
            detail,
        })
    }
}
