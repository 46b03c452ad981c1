use crate::models::{GenerateRequest, ImageBlob};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Deterministic fingerprint of every `GenerateRequest` field that affects the output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_request(request: &GenerateRequest) -> Self {
        // JSON quoting keeps the fields unambiguous whatever the prompt contains.
        let fingerprint = serde_json::json!([
            request.prompt,
            request.aspect_ratio,
            request.resolution,
            request.quality_tier,
        ]);
        Self(fingerprint.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Generated artifacts keyed by request. Entries are never evicted or
/// refreshed while the owning orchestrator lives.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<CacheKey, Vec<ImageBlob>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recovers a poisoned lock; every write is a single map call.
    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Vec<ImageBlob>>> {
        self.entries.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            log::warn!("Result cache lock was poisoned; keeping existing entries");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<ImageBlob>> {
        self.entries().get(key).cloned()
    }

    /// Stores `artifacts` unless the key already has an entry; the first
    /// result ever produced wins.
    pub fn insert(&self, key: CacheKey, artifacts: Vec<ImageBlob>) {
        self.entries().entry(key).or_insert(artifacts);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}
