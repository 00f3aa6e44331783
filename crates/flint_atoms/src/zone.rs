use std::sync::Arc;

use hashbrown::HashTable;

use crate::atom::{AtomId, CharBuf};
use crate::error::AtomError;
use crate::lookup::{chars_eq, AtomLookup};

/// An allocation zone. The atoms table only cares about the per-zone atom
/// cache hanging off of it; everything else a zone owns lives elsewhere.
pub struct Zone {
    cache: ZoneAtomCache,
}

impl Zone {
    pub fn new() -> Self {
        Self {
            cache: ZoneAtomCache::new(),
        }
    }

    /// Drops every memoized atom. The collector calls this at the start of
    /// each collection cycle; a cache hit is never proof of liveness beyond
    /// the current epoch's normal assumptions.
    pub fn purge_atom_cache(&mut self) {
        self.cache.purge();
    }

    pub(crate) fn cache(&self) -> &ZoneAtomCache {
        &self.cache
    }

    pub(crate) fn cache_mut(&mut self) -> &mut ZoneAtomCache {
        &mut self.cache
    }
}

impl Default for Zone {
    fn default() -> Self {
        Self::new()
    }
}

struct CacheEntry {
    hash: u32,
    /// The atom's own storage, so a hit can be matched against the lookup
    /// without touching the owning partition.
    chars: Arc<CharBuf>,
    atom: AtomId,
}

/// Best-effort memo from string content to the atom it resolved to. Owned by
/// exactly one zone, so no locking; never authoritative.
pub(crate) struct ZoneAtomCache {
    entries: HashTable<CacheEntry>,
}

impl ZoneAtomCache {
    fn new() -> Self {
        Self {
            entries: HashTable::new(),
        }
    }

    pub(crate) fn lookup(&self, lookup: &AtomLookup<'_>) -> Option<AtomId> {
        debug_assert!(lookup.atom.is_none());
        self.entries
            .find(u64::from(lookup.hash()), |entry| {
                entry.hash == lookup.hash() && chars_eq(entry.chars.as_slice(), lookup.chars())
            })
            .map(|entry| entry.atom)
    }

    pub(crate) fn insert(&mut self, hash: u32, chars: Arc<CharBuf>, atom: AtomId) -> Result<(), AtomError> {
        self.entries.try_reserve(1, |entry| u64::from(entry.hash))?;
        self.entries
            .insert_unique(u64::from(hash), CacheEntry { hash, chars, atom }, |entry| {
                u64::from(entry.hash)
            });
        Ok(())
    }

    pub(crate) fn purge(&mut self) {
        self.entries.clear();
    }
}
