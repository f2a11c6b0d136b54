//! Score-ordered offer list with an identity index.
//!
//! Offer counts are bounded by cluster size (hundreds), so the list is a
//! plain `Vec` kept sorted by descending `point` with linear insertion,
//! plus an `offer_id -> pool id` map for O(1) membership checks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use drover_core::ResourceOffer;

/// Live pool entry. Never handed out; readers get [`Offer`] copies.
#[derive(Debug, Clone)]
pub(crate) struct OfferEntry {
    pub id: i64,
    pub offer_id: String,
    pub hostname: String,
    pub ip: String,
    pub is_valid: bool,
    pub created_at: Instant,
    pub offer: Arc<ResourceOffer>,
    pub delta_cpu: f64,
    pub delta_mem: f64,
    pub delta_disk: f64,
    pub point: f64,
}

impl OfferEntry {
    fn snapshot(&self) -> Offer {
        Offer {
            id: self.id,
            offer_id: self.offer_id.clone(),
            hostname: self.hostname.clone(),
            offer: Arc::clone(&self.offer),
            delta_cpu: self.delta_cpu,
            delta_mem: self.delta_mem,
            delta_disk: self.delta_disk,
        }
    }
}

/// Read snapshot of a pool offer.
///
/// Not kept in sync with the pool: claim it with `OfferPool::use_offer`
/// and check the result. `id` doubles as the traversal handle for
/// `OfferPool::get_next_offer`.
#[derive(Debug, Clone)]
pub struct Offer {
    pub id: i64,
    pub offer_id: String,
    pub hostname: String,
    pub offer: Arc<ResourceOffer>,
    pub delta_cpu: f64,
    pub delta_mem: f64,
    pub delta_disk: f64,
}

#[derive(Debug, Default)]
pub(crate) struct OfferList {
    entries: Vec<OfferEntry>,
    index: HashMap<String, i64>,
}

impl OfferList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn contains(&self, offer_id: &str) -> bool {
        self.index.contains_key(offer_id)
    }

    pub fn has_host(&self, hostname: &str) -> bool {
        self.entries.iter().any(|e| e.hostname == hostname)
    }

    /// Insert after every entry whose point is >= the new one.
    pub fn insert(&mut self, entry: OfferEntry) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.point < entry.point)
            .unwrap_or(self.entries.len());
        self.index.insert(entry.offer_id.clone(), entry.id);
        self.entries.insert(pos, entry);
    }

    pub fn remove(&mut self, offer_id: &str) -> Option<OfferEntry> {
        self.index.remove(offer_id)?;
        let pos = self.entries.iter().position(|e| e.offer_id == offer_id)?;
        Some(self.entries.remove(pos))
    }

    /// Remove a still-valid offer. Expired ones stay for the sweep to decline.
    pub fn take_valid(&mut self, offer_id: &str) -> Option<OfferEntry> {
        let valid = self
            .entries
            .iter()
            .any(|e| e.offer_id == offer_id && e.is_valid);
        if valid { self.remove(offer_id) } else { None }
    }

    /// Remove every entry (valid or not) for a host.
    pub fn take_host(&mut self, hostname: &str) -> Vec<OfferEntry> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.hostname == hostname);
        self.entries = kept;
        for entry in &taken {
            self.index.remove(&entry.offer_id);
        }
        taken
    }

    pub fn first_valid(&self) -> Option<Offer> {
        self.entries
            .iter()
            .find(|e| e.is_valid)
            .map(OfferEntry::snapshot)
    }

    /// The next valid entry after `id`, or the first valid one if `id` is gone.
    pub fn next_valid(&self, id: i64) -> Option<Offer> {
        match self.entries.iter().position(|e| e.id == id) {
            Some(pos) => self.entries[pos + 1..]
                .iter()
                .find(|e| e.is_valid)
                .map(OfferEntry::snapshot),
            None => self.first_valid(),
        }
    }

    pub fn all_valid(&self) -> Vec<Offer> {
        self.entries
            .iter()
            .filter(|e| e.is_valid)
            .map(OfferEntry::snapshot)
            .collect()
    }

    /// Expire offers past `life` and purge invalid ones past `life + grace`.
    ///
    /// Returns the purged entries; each must be declined exactly once.
    pub fn sweep(&mut self, now: Instant, life: Duration, grace: Duration) -> Vec<OfferEntry> {
        let mut purged_ids = Vec::new();
        for entry in &mut self.entries {
            if entry.is_valid {
                if now >= entry.created_at + life {
                    entry.is_valid = false;
                }
            } else if now >= entry.created_at + life + grace {
                purged_ids.push(entry.offer_id.clone());
            }
        }
        purged_ids
            .iter()
            .filter_map(|offer_id| self.remove(offer_id))
            .collect()
    }
}
