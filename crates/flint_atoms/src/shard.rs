use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use hashbrown::HashTable;
use parking_lot::{Mutex, MutexGuard};

use crate::atom::{parse_array_index, AtomData, AtomFlags, AtomId, CharBuf, GENERATION_MASK};
use crate::error::AtomError;
use crate::lookup::AtomLookup;
use crate::trace::{Liveness, Tracer};
use crate::Pinning;

/// One entry in a partition's set: the atom plus a pinned bit kept in sync
/// with the atom's own flag.
#[derive(Clone, Copy)]
pub(crate) struct AtomEntry {
    pub atom: AtomId,
    pub pinned: bool,
}

pub(crate) type AtomSet = HashTable<AtomEntry>;

pub(crate) struct Slot {
    generation: u32,
    data: Option<AtomData>,
}

/// Everything a partition owns, guarded by its mutex: the primary entry set,
/// the secondary set absorbing insertions while the partition is being swept,
/// and the slot storage its atoms live in.
pub(crate) struct PartitionData {
    pub atoms: AtomSet,
    /// Non-`None` exactly while an incremental sweep of this partition is in
    /// progress; merged back into `atoms` once the partition is fully swept.
    pub atoms_added_while_sweeping: Option<Box<AtomSet>>,
    /// Installed together with the secondary set. A hit in the primary set
    /// during the sweep may be a dead atom that simply has not been visited
    /// yet, so it is revalidated against this oracle.
    pub sweep_liveness: Option<Arc<dyn Liveness + Send + Sync>>,
    slots: Vec<Slot>,
    free: Vec<u32>,
}

/// One independently locked slice of the atoms table.
pub(crate) struct Partition {
    pub(crate) data: Mutex<PartitionData>,
}

impl Partition {
    pub(crate) fn new() -> Self {
        Self {
            data: Mutex::new(PartitionData::new()),
        }
    }
}

/// Scoped access to a partition. The lock is skipped while the runtime is
/// still in single-writer mode; see `AtomsRuntime::enable_thread_safety` for
/// the contract that makes the skip sound. Acquiring unconditionally would
/// always be correct, it only costs throughput.
pub(crate) enum PartitionGuard<'a> {
    Locked(MutexGuard<'a, PartitionData>),
    Exclusive(&'a mut PartitionData),
}

impl<'a> PartitionGuard<'a> {
    pub(crate) fn lock(partition: &'a Partition, thread_safe: bool) -> Self {
        if thread_safe {
            PartitionGuard::Locked(partition.data.lock())
        } else {
            // SAFETY: single-writer mode means the runtime has not been
            // shared with any other thread yet (the enable_thread_safety
            // contract), and no caller holds two guards for one partition,
            // so this is the only live reference to the data.
            PartitionGuard::Exclusive(unsafe { &mut *partition.data.data_ptr() })
        }
    }
}

impl Deref for PartitionGuard<'_> {
    type Target = PartitionData;

    fn deref(&self) -> &PartitionData {
        match self {
            PartitionGuard::Locked(guard) => guard,
            PartitionGuard::Exclusive(data) => data,
        }
    }
}

impl DerefMut for PartitionGuard<'_> {
    fn deref_mut(&mut self) -> &mut PartitionData {
        match self {
            PartitionGuard::Locked(guard) => guard,
            PartitionGuard::Exclusive(data) => data,
        }
    }
}

impl PartitionData {
    pub(crate) fn new() -> Self {
        Self {
            atoms: AtomSet::new(),
            atoms_added_while_sweeping: None,
            sweep_liveness: None,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Resolves or creates the atom described by `lookup` within this
    /// partition. A reported failure leaves the partition unchanged.
    pub(crate) fn atomize(
        &mut self,
        lookup: &AtomLookup<'_>,
        pin: Pinning,
        index_hint: Option<u32>,
        partition_index: u8,
    ) -> Result<(AtomId, Arc<CharBuf>), AtomError> {
        let hash64 = u64::from(lookup.hash());
        let Self {
            atoms,
            atoms_added_while_sweeping,
            sweep_liveness,
            slots,
            free,
        } = self;

        let found = 'search: {
            match atoms_added_while_sweeping.as_deref() {
                None => atoms
                    .find(hash64, |e| entry_matches(slots, e, lookup))
                    .map(|e| (e.atom, false)),
                Some(secondary) => {
                    // While this partition is being swept, new atoms go to
                    // the secondary set, so check it first.
                    if let Some(e) = secondary.find(hash64, |e| entry_matches(slots, e, lookup)) {
                        break 'search Some((e.atom, true));
                    }
                    // A primary entry may be dead but not yet swept; it only
                    // counts if it is pinned or still reachable.
                    if let Some(e) = atoms.find(hash64, |e| entry_matches(slots, e, lookup)) {
                        let liveness = sweep_liveness
                            .as_ref()
                            .expect("sweeping partition has no liveness oracle");
                        if e.pinned || liveness.is_reachable(e.atom) {
                            break 'search Some((e.atom, false));
                        }
                    }
                    None
                }
            }
        };

        if let Some((atom, in_secondary)) = found {
            let data = slots[atom.slot() as usize]
                .data
                .as_mut()
                .expect("found entry refers to a live slot");
            if pin == Pinning::Pin && !data.flags.contains(AtomFlags::PINNED) {
                data.flags.insert(AtomFlags::PINNED);
                let set = if in_secondary {
                    atoms_added_while_sweeping
                        .as_deref_mut()
                        .expect("entry was found in the secondary set")
                } else {
                    &mut *atoms
                };
                set.find_mut(hash64, |e| e.atom == atom)
                    .expect("entry vanished while the partition was held")
                    .pinned = true;
            }
            return Ok((atom, Arc::clone(&data.chars)));
        }

        let index_value = match index_hint {
            Some(index) => {
                debug_assert_eq!(parse_array_index(lookup.chars()), Some(index));
                Some(index)
            }
            None => parse_array_index(lookup.chars()),
        };
        let chars = Arc::new(lookup.chars().to_buf());
        let mut flags = AtomFlags::empty();
        if pin == Pinning::Pin {
            flags.insert(AtomFlags::PINNED);
        }
        let atom = alloc_slot(
            slots,
            free,
            partition_index,
            AtomData {
                chars: Arc::clone(&chars),
                hash: lookup.hash(),
                flags,
                index_value,
            },
        )?;

        let target = match atoms_added_while_sweeping.as_deref_mut() {
            Some(secondary) => secondary,
            None => &mut *atoms,
        };
        if let Err(err) = try_insert(target, slots, hash64, AtomEntry { atom, pinned: pin == Pinning::Pin }) {
            // The new atom must not survive without an entry referencing it.
            release_slot(slots, free, atom);
            return Err(err);
        }
        Ok((atom, chars))
    }

    /// Marks an existing atom non-collectible, updating the entry bit and
    /// the atom flag together. The atom must currently live in this
    /// partition; anything else is a caller bug.
    pub(crate) fn pin_existing(&mut self, atom: AtomId) {
        let Self {
            atoms,
            atoms_added_while_sweeping,
            slots,
            ..
        } = self;
        let slot = slots
            .get(atom.slot() as usize)
            .expect("pinned atom does not exist in this table");
        assert_eq!(
            slot.generation,
            atom.generation(),
            "pinned atom does not exist in this table"
        );
        let data = slot.data.as_ref().expect("pinned atom does not exist in this table");
        if data.flags.contains(AtomFlags::PINNED) {
            return;
        }

        // Identity-known lookup: entry comparison is a handle check.
        let lookup = AtomLookup::for_existing(atom, data.chars.as_slice(), data.hash);
        let hash64 = u64::from(lookup.hash());
        let in_primary = atoms.find(hash64, |e| entry_matches(slots, e, &lookup)).is_some();
        let set = if in_primary {
            &mut *atoms
        } else {
            atoms_added_while_sweeping
                .as_deref_mut()
                .expect("pinned atom has no entry in its partition")
        };
        set.find_mut(hash64, |e| e.atom == atom)
            .expect("pinned atom has no entry in its partition")
            .pinned = true;

        slots[atom.slot() as usize]
            .data
            .as_mut()
            .expect("pinned atom does not exist in this table")
            .flags
            .insert(AtomFlags::PINNED);
    }

    /// One incremental sweep step: removes `atom` from the primary set if it
    /// is unpinned and the collector no longer reaches it.
    pub(crate) fn sweep_entry(&mut self, atom: AtomId) {
        let Self {
            atoms,
            sweep_liveness,
            slots,
            free,
            ..
        } = self;
        let slot = &slots[atom.slot() as usize];
        debug_assert_eq!(slot.generation, atom.generation());
        let data = slot.data.as_ref().expect("swept atom has a live slot");
        if data.flags.contains(AtomFlags::PINNED) {
            return;
        }
        let liveness = sweep_liveness
            .as_ref()
            .expect("sweeping partition has no liveness oracle");
        if liveness.is_reachable(atom) {
            return;
        }
        let hash64 = u64::from(data.hash);
        match atoms.find_entry(hash64, |e| e.atom == atom) {
            Ok(entry) => {
                entry.remove();
            }
            Err(_) => unreachable!("swept atom is missing from its primary set"),
        }
        release_slot(slots, free, atom);
    }

    /// Non-incremental sweep of the whole primary set.
    pub(crate) fn sweep_unreachable(&mut self, liveness: &dyn Liveness) {
        let Self { atoms, slots, free, .. } = self;
        atoms.retain(|entry| {
            if entry.pinned || liveness.is_reachable(entry.atom) {
                return true;
            }
            release_slot(slots, free, entry.atom);
            false
        });
    }

    /// Folds the atoms added while this partition was being swept back into
    /// the primary set and ends the partition's sweep. Growth here must not
    /// fail: dropping an entry would lose a live atom, so allocation failure
    /// aborts the process.
    pub(crate) fn merge_atoms_added_while_sweeping(&mut self) {
        let Self {
            atoms,
            atoms_added_while_sweeping,
            sweep_liveness,
            slots,
            ..
        } = self;
        let secondary = atoms_added_while_sweeping
            .take()
            .expect("partition is not being swept");
        sweep_liveness.take();
        atoms.reserve(secondary.len(), entry_hasher(slots));
        for entry in *secondary {
            let data = slots[entry.atom.slot() as usize]
                .data
                .as_ref()
                .expect("merged entry refers to a live slot");
            atoms.insert_unique(u64::from(data.hash), entry, entry_hasher(slots));
        }
    }

    pub(crate) fn atom_data(&self, atom: AtomId) -> &AtomData {
        let slot = self.slots.get(atom.slot() as usize).expect("stale atom id");
        assert_eq!(slot.generation, atom.generation(), "stale atom id");
        slot.data.as_ref().expect("stale atom id")
    }

    pub(crate) fn trace_pinned(&self, tracer: &mut dyn Tracer) {
        self.trace_pinned_in_set(&self.atoms, tracer);
        if let Some(secondary) = &self.atoms_added_while_sweeping {
            self.trace_pinned_in_set(secondary, tracer);
        }
    }

    fn trace_pinned_in_set(&self, set: &AtomSet, tracer: &mut dyn Tracer) {
        for entry in set.iter() {
            let data = self.atom_data(entry.atom);
            debug_assert_eq!(entry.pinned, data.flags.contains(AtomFlags::PINNED));
            if entry.pinned {
                tracer.trace_root(entry.atom, "interned_atom");
            }
        }
    }

    pub(crate) fn entry_count(&self) -> usize {
        let secondary = self.atoms_added_while_sweeping.as_ref().map_or(0, |s| s.len());
        self.atoms.len() + secondary
    }

    pub(crate) fn heap_bytes(&self) -> usize {
        let mut bytes = self.atoms.capacity() * size_of::<AtomEntry>()
            + self.slots.capacity() * size_of::<Slot>()
            + self.free.capacity() * size_of::<u32>();
        if let Some(secondary) = &self.atoms_added_while_sweeping {
            bytes += size_of::<AtomSet>() + secondary.capacity() * size_of::<AtomEntry>();
        }
        for slot in &self.slots {
            if let Some(data) = &slot.data {
                bytes += size_of::<CharBuf>() + data.chars.byte_size();
            }
        }
        bytes
    }

    /// Reserves space in a freshly created secondary set so installing it is
    /// all-or-nothing for the caller.
    pub(crate) fn reserve_secondary(&self, secondary: &mut AtomSet, capacity: usize) -> Result<(), AtomError> {
        secondary.try_reserve(capacity, entry_hasher(&self.slots))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn occurrences(&self, atom: AtomId) -> usize {
        let count = |set: &AtomSet| set.iter().filter(|e| e.atom == atom).count();
        count(&self.atoms)
            + self
                .atoms_added_while_sweeping
                .as_deref()
                .map_or(0, count)
    }
}

fn entry_matches(slots: &[Slot], entry: &AtomEntry, lookup: &AtomLookup<'_>) -> bool {
    let slot = &slots[entry.atom.slot() as usize];
    debug_assert_eq!(slot.generation, entry.atom.generation());
    let data = slot.data.as_ref().expect("entry refers to a live slot");
    lookup.matches(entry.atom, data)
}

pub(crate) fn entry_hasher(slots: &[Slot]) -> impl Fn(&AtomEntry) -> u64 + '_ {
    move |entry| {
        let data = slots[entry.atom.slot() as usize]
            .data
            .as_ref()
            .expect("entry refers to a live slot");
        u64::from(data.hash)
    }
}

fn try_insert(set: &mut AtomSet, slots: &[Slot], hash64: u64, entry: AtomEntry) -> Result<(), AtomError> {
    set.try_reserve(1, entry_hasher(slots))?;
    set.insert_unique(hash64, entry, entry_hasher(slots));
    Ok(())
}

fn alloc_slot(
    slots: &mut Vec<Slot>,
    free: &mut Vec<u32>,
    partition_index: u8,
    data: AtomData,
) -> Result<AtomId, AtomError> {
    if let Some(index) = free.pop() {
        let slot = &mut slots[index as usize];
        debug_assert!(slot.data.is_none());
        slot.data = Some(data);
        Ok(AtomId::from_raw_parts(index, partition_index, slot.generation))
    } else {
        slots.try_reserve(1)?;
        let index = u32::try_from(slots.len()).map_err(|_| AtomError::OutOfMemory)?;
        slots.push(Slot {
            generation: 0,
            data: Some(data),
        });
        Ok(AtomId::from_raw_parts(index, partition_index, 0))
    }
}

fn release_slot(slots: &mut [Slot], free: &mut Vec<u32>, atom: AtomId) {
    let slot = &mut slots[atom.slot() as usize];
    debug_assert_eq!(slot.generation, atom.generation());
    slot.data = None;
    slot.generation = (slot.generation + 1) & GENERATION_MASK;
    free.push(atom.slot());
}
