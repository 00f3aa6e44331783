use std::sync::Arc;

use flint_log::debug;
use smallvec::SmallVec;

use parking_lot::MutexGuard;

use crate::atom::{AtomId, CharBuf, Pinning};
use crate::error::AtomError;
use crate::lookup::AtomLookup;
use crate::shard::{AtomSet, Partition, PartitionData, PartitionGuard};
use crate::sweep::{SweepBudget, SweepCursor, SweepProgress, SweepState};
use crate::trace::{Liveness, Tracer};

#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) const DEFAULT_PARTITION_COUNT: usize = 16;
/// The partition byte of an atom id reserves `u8::MAX` for permanent atoms.
pub(crate) const MAX_PARTITION_COUNT: usize = 64;

const SECONDARY_SET_CAPACITY: usize = 16;

/// The sharded table holding every non-permanent atom of one runtime.
/// A fixed high-order slice of the 32-bit content hash routes each lookup to
/// its partition; the routing never changes for the lifetime of the table.
pub(crate) struct AtomsTable {
    partitions: Box<[Partition]>,
    partition_shift: u32,
    #[cfg(debug_assertions)]
    all_partitions_locked: AtomicBool,
}

impl AtomsTable {
    pub(crate) fn new(partition_count: usize) -> Self {
        assert!(
            partition_count.is_power_of_two() && partition_count <= MAX_PARTITION_COUNT,
            "partition count must be a power of two of at most {MAX_PARTITION_COUNT}"
        );
        Self {
            partitions: (0..partition_count).map(|_| Partition::new()).collect(),
            partition_shift: partition_count.trailing_zeros(),
            #[cfg(debug_assertions)]
            all_partitions_locked: AtomicBool::new(false),
        }
    }

    pub(crate) fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn partition_index(&self, hash: u32) -> usize {
        if self.partition_shift == 0 {
            0
        } else {
            (hash >> (32 - self.partition_shift)) as usize
        }
    }

    fn partition_for(&self, atom: AtomId) -> &Partition {
        self.partitions
            .get(atom.partition() as usize)
            .expect("atom does not belong to this table")
    }

    pub(crate) fn atomize_chars(
        &self,
        lookup: &AtomLookup<'_>,
        pin: Pinning,
        index_hint: Option<u32>,
        thread_safe: bool,
    ) -> Result<(AtomId, Arc<CharBuf>), AtomError> {
        let index = self.partition_index(lookup.hash());
        let mut guard = PartitionGuard::lock(&self.partitions[index], thread_safe);
        guard.atomize(lookup, pin, index_hint, index as u8)
    }

    pub(crate) fn pin_existing(&self, atom: AtomId, thread_safe: bool) {
        PartitionGuard::lock(self.partition_for(atom), thread_safe).pin_existing(atom)
    }

    pub(crate) fn chars(&self, atom: AtomId, thread_safe: bool) -> Arc<CharBuf> {
        Arc::clone(&PartitionGuard::lock(self.partition_for(atom), thread_safe).atom_data(atom).chars)
    }

    pub(crate) fn index_value(&self, atom: AtomId, thread_safe: bool) -> Option<u32> {
        PartitionGuard::lock(self.partition_for(atom), thread_safe)
            .atom_data(atom)
            .index_value
    }

    pub(crate) fn is_pinned(&self, atom: AtomId, thread_safe: bool) -> bool {
        PartitionGuard::lock(self.partition_for(atom), thread_safe)
            .atom_data(atom)
            .flags
            .contains(crate::atom::AtomFlags::PINNED)
    }

    /// Locks every partition, in ascending index order; the guard releases
    /// them in reverse. This is the only multi-partition lock pattern, so it
    /// cannot deadlock against shard-local operations. The holder must not
    /// atomize through the same table while the guard is alive.
    pub(crate) fn lock_all(&self) -> AllPartitionsGuard<'_> {
        #[cfg(debug_assertions)]
        assert!(
            !self.all_partitions_locked.load(Ordering::Acquire),
            "all partitions are already locked"
        );
        let mut guards = SmallVec::new();
        for partition in self.partitions.iter() {
            guards.push(partition.data.lock());
        }
        #[cfg(debug_assertions)]
        self.all_partitions_locked.store(true, Ordering::Release);
        AllPartitionsGuard {
            guards,
            #[cfg(debug_assertions)]
            locked: &self.all_partitions_locked,
        }
    }

    /// Reports every pinned atom as a root. Entries and atom flags are
    /// asserted to agree.
    pub(crate) fn trace_pinned_atoms(&self, tracer: &mut dyn Tracer) {
        let guard = self.lock_all();
        for partition in guard.parts() {
            partition.trace_pinned(tracer);
        }
    }

    /// Gives every partition a secondary set so atomization can continue
    /// while the table is swept in budgeted slices. Fails atomically: either
    /// every partition carries a secondary set afterwards, or none does.
    /// Panics if the previous incremental sweep was never driven to
    /// completion.
    pub(crate) fn start_incremental_sweep(
        &self,
        liveness: Arc<dyn Liveness + Send + Sync>,
        thread_safe: bool,
    ) -> Result<SweepCursor, AtomError> {
        debug!("starting incremental atom sweep");
        let mut installed = 0;
        for partition in self.partitions.iter() {
            let mut guard = PartitionGuard::lock(partition, thread_safe);
            assert!(
                guard.atoms_added_while_sweeping.is_none(),
                "incremental sweep already in progress"
            );
            let mut secondary = Box::new(AtomSet::new());
            if guard.reserve_secondary(&mut secondary, SECONDARY_SET_CAPACITY).is_err() {
                drop(guard);
                for partition in self.partitions.iter().take(installed) {
                    let mut guard = PartitionGuard::lock(partition, thread_safe);
                    guard.atoms_added_while_sweeping = None;
                    guard.sweep_liveness = None;
                }
                return Err(AtomError::OutOfMemory);
            }
            guard.atoms_added_while_sweeping = Some(secondary);
            guard.sweep_liveness = Some(Arc::clone(&liveness));
            installed += 1;
        }
        Ok(SweepCursor::new())
    }

    /// Advances the cursor until the budget runs out or the sweep finishes.
    /// A partition's secondary set is merged only once that partition is
    /// fully swept, never when the budget ends mid-partition, so the table
    /// is consistent and lockable between calls.
    pub(crate) fn sweep_incrementally(
        &self,
        cursor: &mut SweepCursor,
        budget: &mut SweepBudget,
        thread_safe: bool,
    ) -> SweepProgress {
        loop {
            let SweepState::AtShard { index, pending } = &mut cursor.state else {
                return SweepProgress::Done;
            };
            let mut guard = PartitionGuard::lock(&self.partitions[*index], thread_safe);
            let pending = pending.get_or_insert_with(|| guard.atoms.iter().map(|e| e.atom).collect());
            while let Some(&atom) = pending.last() {
                if !budget.step() {
                    return SweepProgress::InProgress;
                }
                pending.pop();
                guard.sweep_entry(atom);
            }
            guard.merge_atoms_added_while_sweeping();
            drop(guard);

            let next = *index + 1;
            if next == self.partitions.len() {
                cursor.state = SweepState::Exhausted;
                debug!("incremental atom sweep finished");
                return SweepProgress::Done;
            }
            cursor.state = SweepState::AtShard {
                index: next,
                pending: None,
            };
        }
    }

    /// Non-incremental sweep, used when no secondary sets exist. Takes each
    /// partition's lock in turn rather than all at once.
    pub(crate) fn sweep_all(&self, liveness: &dyn Liveness, thread_safe: bool) {
        debug!("non-incremental atom sweep");
        for partition in self.partitions.iter() {
            let mut guard = PartitionGuard::lock(partition, thread_safe);
            assert!(
                guard.atoms_added_while_sweeping.is_none(),
                "sweep_all called during an incremental sweep"
            );
            guard.sweep_unreachable(liveness);
        }
    }

    pub(crate) fn atom_count(&self, thread_safe: bool) -> usize {
        self.partitions
            .iter()
            .map(|partition| PartitionGuard::lock(partition, thread_safe).entry_count())
            .sum()
    }

    pub(crate) fn heap_bytes(&self, thread_safe: bool) -> usize {
        let partitions: usize = self
            .partitions
            .iter()
            .map(|partition| PartitionGuard::lock(partition, thread_safe).heap_bytes())
            .sum();
        size_of::<Self>() + self.partitions.len() * size_of::<Partition>() + partitions
    }

    #[cfg(test)]
    pub(crate) fn occurrences(&self, atom: AtomId, thread_safe: bool) -> usize {
        self.partitions
            .iter()
            .map(|partition| PartitionGuard::lock(partition, thread_safe).occurrences(atom))
            .sum()
    }
}

/// Holds every partition lock of one table. Dropping the guard releases the
/// locks in reverse acquisition order.
pub struct AllPartitionsGuard<'a> {
    guards: SmallVec<[MutexGuard<'a, PartitionData>; 16]>,
    #[cfg(debug_assertions)]
    locked: &'a AtomicBool,
}

impl AllPartitionsGuard<'_> {
    pub(crate) fn parts(&self) -> impl Iterator<Item = &PartitionData> {
        self.guards.iter().map(|guard| &**guard)
    }
}

impl Drop for AllPartitionsGuard<'_> {
    fn drop(&mut self) {
        while self.guards.pop().is_some() {}
        #[cfg(debug_assertions)]
        self.locked.store(false, Ordering::Release);
    }
}
