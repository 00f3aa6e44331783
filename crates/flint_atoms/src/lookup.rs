use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::atom::{AtomData, AtomId, CharSlice};

/// Hashes string content down to the 32-bit value used for entry lookup and
/// partition routing. Narrow characters are widened to code units first, so
/// both encodings of the same code points hash identically. The hash is a
/// pure function of the content: it is stable across calls, threads and
/// table instances.
pub(crate) fn hash_chars(chars: CharSlice<'_>) -> u32 {
    let mut hasher = FxHasher::default();
    for unit in chars.units() {
        hasher.write_u16(unit);
    }
    let hash = hasher.finish();
    (hash as u32) ^ ((hash >> 32) as u32)
}

/// Code-point equality across encodings.
pub(crate) fn chars_eq(a: CharSlice<'_>, b: CharSlice<'_>) -> bool {
    match (a, b) {
        (CharSlice::Narrow(a), CharSlice::Narrow(b)) => a == b,
        (CharSlice::Wide(a), CharSlice::Wide(b)) => a == b,
        _ => a.len() == b.len() && a.units().eq(b.units()),
    }
}

/// Transient description of a string being resolved: the characters, their
/// precomputed hash, and the atom itself when the caller already holds one.
/// Never stored; a lookup lives for the duration of one table operation.
pub struct AtomLookup<'a> {
    pub(crate) chars: CharSlice<'a>,
    pub(crate) hash: u32,
    pub(crate) atom: Option<AtomId>,
}

impl<'a> AtomLookup<'a> {
    pub fn new(chars: CharSlice<'a>) -> Self {
        Self {
            chars,
            hash: hash_chars(chars),
            atom: None,
        }
    }

    /// Lookup for an atom the caller already resolved; entry comparisons
    /// reduce to a handle check.
    pub(crate) fn for_existing(atom: AtomId, chars: CharSlice<'a>, hash: u32) -> Self {
        debug_assert_eq!(hash_chars(chars), hash);
        Self {
            chars,
            hash,
            atom: Some(atom),
        }
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub(crate) fn chars(&self) -> CharSlice<'a> {
        self.chars
    }

    /// Does the atom stored as (`id`, `data`) spell the same string as this
    /// lookup? The identity-known case must agree with the content-based
    /// comparison for that atom.
    pub(crate) fn matches(&self, id: AtomId, data: &AtomData) -> bool {
        if let Some(atom) = self.atom {
            return atom == id;
        }
        if data.hash != self.hash || data.chars.len() != self.chars.len() {
            return false;
        }
        chars_eq(data.chars.as_slice(), self.chars)
    }
}
