use std::sync::Arc;

use hashbrown::HashTable;

use crate::atom::{parse_array_index, AtomData, AtomFlags, AtomId, CharBuf};
use crate::error::{AtomError, MAX_ATOM_LENGTH};
use crate::lookup::AtomLookup;
use crate::trace::Tracer;

/// Mutable accumulator for permanent atoms, usable only while the runtime is
/// still single-threaded. [`PermanentStaging::freeze`] turns it into the
/// read-only set shared by every runtime instance afterwards.
pub struct PermanentStaging {
    atoms: Vec<AtomData>,
    set: HashTable<u32>,
}

impl PermanentStaging {
    pub(crate) fn new() -> Self {
        Self {
            atoms: Vec::new(),
            set: HashTable::new(),
        }
    }

    /// Interns into the staging set; the atom is marked permanent (and
    /// thereby pinned) on creation.
    pub fn atomize(&mut self, lookup: &AtomLookup<'_>) -> Result<AtomId, AtomError> {
        if lookup.chars().len() > MAX_ATOM_LENGTH {
            return Err(AtomError::TooLong);
        }
        let hash64 = u64::from(lookup.hash());
        let Self { atoms, set } = self;
        if let Some(&slot) = set.find(hash64, |&slot| {
            lookup.matches(AtomId::permanent(slot), &atoms[slot as usize])
        }) {
            return Ok(AtomId::permanent(slot));
        }

        atoms.try_reserve(1)?;
        set.try_reserve(1, |&slot| u64::from(atoms[slot as usize].hash))?;
        let slot = u32::try_from(atoms.len()).map_err(|_| AtomError::OutOfMemory)?;
        atoms.push(AtomData {
            chars: Arc::new(lookup.chars().to_buf()),
            hash: lookup.hash(),
            flags: AtomFlags::PERMANENT | AtomFlags::PINNED,
            index_value: parse_array_index(lookup.chars()),
        });
        set.insert_unique(hash64, slot, |&slot| u64::from(atoms[slot as usize].hash));
        Ok(AtomId::permanent(slot))
    }

    pub fn atomize_str(&mut self, text: &str) -> Result<AtomId, AtomError> {
        if text.is_ascii() {
            self.atomize(&AtomLookup::new(crate::atom::CharSlice::Narrow(text.as_bytes())))
        } else {
            let buf = CharBuf::from_str(text);
            self.atomize(&AtomLookup::new(buf.as_slice()))
        }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub(crate) fn freeze(self) -> FrozenAtomSet {
        FrozenAtomSet {
            atoms: self.atoms,
            set: self.set,
        }
    }
}

/// The permanent atom set. Immutable once built, so lookups take `&self` and
/// are safe from any thread without locking. Shared between parent and child
/// runtimes via `Arc` rather than copied.
pub struct FrozenAtomSet {
    atoms: Vec<AtomData>,
    set: HashTable<u32>,
}

impl FrozenAtomSet {
    pub(crate) fn lookup(&self, lookup: &AtomLookup<'_>) -> Option<AtomId> {
        self.set
            .find(u64::from(lookup.hash()), |&slot| {
                lookup.matches(AtomId::permanent(slot), &self.atoms[slot as usize])
            })
            .map(|&slot| AtomId::permanent(slot))
    }

    pub(crate) fn data(&self, atom: AtomId) -> &AtomData {
        debug_assert!(atom.is_permanent());
        &self.atoms[atom.slot() as usize]
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Permanent atoms are process-global roots.
    pub(crate) fn trace(&self, tracer: &mut dyn Tracer) {
        for (slot, data) in self.atoms.iter().enumerate() {
            debug_assert!(data.flags.contains(AtomFlags::PINNED));
            tracer.trace_root(AtomId::permanent(slot as u32), "permanent atom");
        }
    }

    pub(crate) fn heap_bytes(&self) -> usize {
        let chars: usize = self
            .atoms
            .iter()
            .map(|data| size_of::<CharBuf>() + data.chars.byte_size())
            .sum();
        self.atoms.capacity() * size_of::<AtomData>() + self.set.capacity() * size_of::<u32>() + chars
    }
}
