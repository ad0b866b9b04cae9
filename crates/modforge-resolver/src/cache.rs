//! Per-run store of fetched registry data.
//!
//! Listings are written once per identity and never modified afterwards;
//! readers share them through `Arc`. A store lives for one resolution run.

use std::collections::BTreeMap;
use std::sync::Arc;

use modforge_core::candidate::VersionCandidate;
use modforge_core::identity::{ModIdentity, ModMetadata};

use crate::policy::compare_preference;

#[derive(Debug, Default)]
pub struct CandidateStore {
    listings: BTreeMap<ModIdentity, Arc<[VersionCandidate]>>,
    metadata: BTreeMap<String, ModMetadata>,
}

impl CandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the listing for `identity`, sorted best first: highest
    /// version, then newest publish time, then version id.
    ///
    /// A listing already present is kept and returned unchanged.
    pub fn insert(
        &mut self,
        identity: ModIdentity,
        mut candidates: Vec<VersionCandidate>,
    ) -> Arc<[VersionCandidate]> {
        if let Some(existing) = self.listings.get(&identity) {
            return existing.clone();
        }
        candidates.sort_by(compare_preference);
        candidates.dedup_by(|a, b| a.version_id == b.version_id);
        let listing: Arc<[VersionCandidate]> = candidates.into();
        self.listings.insert(identity, listing.clone());
        listing
    }

    pub fn get(&self, identity: &ModIdentity) -> Option<Arc<[VersionCandidate]>> {
        self.listings.get(identity).cloned()
    }

    pub fn contains(&self, identity: &ModIdentity) -> bool {
        self.listings.contains_key(identity)
    }

    /// Remember descriptive metadata under the reference it was looked up by.
    pub fn insert_metadata(&mut self, reference: &str, metadata: ModMetadata) {
        self.metadata
            .entry(reference.to_lowercase())
            .or_insert(metadata);
    }

    pub fn metadata(&self, reference: &str) -> Option<&ModMetadata> {
        self.metadata.get(&reference.to_lowercase())
    }

    /// Number of identities with a listing.
    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}
