use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flint_log::debug;

use crate::atom::{AtomId, CharBuf, CharSlice, Pinning};
use crate::error::{AtomError, MAX_ATOM_LENGTH};
use crate::lookup::AtomLookup;
use crate::names::CommonNames;
use crate::permanent::{FrozenAtomSet, PermanentStaging};
use crate::statics::StaticStrings;
use crate::sweep::{SweepBudget, SweepCursor, SweepProgress};
use crate::table::{AllPartitionsGuard, AtomsTable, DEFAULT_PARTITION_COUNT};
use crate::trace::{Liveness, Tracer};
use crate::zone::Zone;

/// First phase of the runtime's two-phase lifecycle: a single-threaded
/// staging area for permanent atoms. Construction preinterns the static
/// strings and the common names; the embedder may add its own bootstrap
/// atoms before calling [`AtomsBootstrap::freeze`].
pub struct AtomsBootstrap {
    staging: PermanentStaging,
    statics: StaticStrings,
    names: CommonNames,
    partition_count: usize,
}

impl AtomsBootstrap {
    pub fn new() -> Result<Self, AtomError> {
        Self::with_partition_count(DEFAULT_PARTITION_COUNT)
    }

    pub fn with_partition_count(partition_count: usize) -> Result<Self, AtomError> {
        let mut staging = PermanentStaging::new();
        let statics = StaticStrings::init(&mut staging)?;
        let names = CommonNames::new(&mut staging)?;
        Ok(Self {
            staging,
            statics,
            names,
            partition_count,
        })
    }

    /// Interns a bootstrap atom. Everything atomized before `freeze` is
    /// permanent: shared by all runtime instances and never swept.
    pub fn atomize(&mut self, text: &str) -> Result<AtomId, AtomError> {
        self.staging.atomize_str(text)
    }

    /// The staging set, for `define_atom_set!`-built name tables.
    pub fn staging_mut(&mut self) -> &mut PermanentStaging {
        &mut self.staging
    }

    pub fn names(&self) -> &CommonNames {
        &self.names
    }

    pub fn statics(&self) -> &StaticStrings {
        &self.statics
    }

    /// Ends bootstrap. The staging set becomes the immutable permanent set
    /// and the sharded table comes up empty.
    pub fn freeze(self) -> AtomsRuntime {
        debug!(permanent_atoms = self.staging.len(), "froze permanent atom set");
        AtomsRuntime {
            permanent: Arc::new(self.staging.freeze()),
            statics: Arc::new(self.statics),
            names: Arc::new(self.names),
            table: AtomsTable::new(self.partition_count),
            thread_safe: AtomicBool::new(false),
            shared_from_parent: false,
        }
    }
}

/// The atoms subsystem of one runtime instance: the shared frozen permanent
/// set, the static-strings fast table, the common names and the sharded
/// table of dynamically interned atoms.
pub struct AtomsRuntime {
    permanent: Arc<FrozenAtomSet>,
    statics: Arc<StaticStrings>,
    names: Arc<CommonNames>,
    table: AtomsTable,
    /// Starts `false`: the runtime begins in single-writer mode and
    /// partition locks are skipped until [`enable_thread_safety`] is called.
    ///
    /// [`enable_thread_safety`]: AtomsRuntime::enable_thread_safety
    thread_safe: AtomicBool,
    shared_from_parent: bool,
}

impl AtomsRuntime {
    /// Deduplicates `text` into its canonical atom.
    pub fn atomize(&self, zone: &mut Zone, text: &str) -> Result<AtomId, AtomError> {
        self.atomize_with(zone, text, Pinning::DoNotPin, None)
    }

    pub fn atomize_with(
        &self,
        zone: &mut Zone,
        text: &str,
        pin: Pinning,
        index_hint: Option<u32>,
    ) -> Result<AtomId, AtomError> {
        if text.is_ascii() {
            self.atomize_chars(zone, CharSlice::Narrow(text.as_bytes()), pin, index_hint)
        } else {
            let buf = CharBuf::from_str(text);
            self.atomize_chars(zone, buf.as_slice(), pin, index_hint)
        }
    }

    pub fn atomize_narrow(
        &self,
        zone: &mut Zone,
        chars: &[u8],
        pin: Pinning,
        index_hint: Option<u32>,
    ) -> Result<AtomId, AtomError> {
        self.atomize_chars(zone, CharSlice::Narrow(chars), pin, index_hint)
    }

    pub fn atomize_wide(
        &self,
        zone: &mut Zone,
        units: &[u16],
        pin: Pinning,
        index_hint: Option<u32>,
    ) -> Result<AtomId, AtomError> {
        self.atomize_chars(zone, CharSlice::Wide(units), pin, index_hint)
    }

    /// The full resolution order: static strings, then the zone cache, then
    /// the permanent set, then the owning partition. `index_hint`, when
    /// given, is cached on a newly created atom instead of reparsing the
    /// content later.
    pub fn atomize_chars(
        &self,
        zone: &mut Zone,
        chars: CharSlice<'_>,
        pin: Pinning,
        index_hint: Option<u32>,
    ) -> Result<AtomId, AtomError> {
        if let Some(atom) = self.statics.lookup(chars) {
            return Ok(atom);
        }

        let lookup = AtomLookup::new(chars);

        // The cache elides the partition lock on repeat lookups. Pinning
        // requests are rare and must reach the owning partition, so they
        // bypass it.
        let use_cache = pin == Pinning::DoNotPin;
        if use_cache {
            if let Some(atom) = zone.cache().lookup(&lookup) {
                return Ok(atom);
            }
        }

        if let Some(atom) = self.permanent.lookup(&lookup) {
            if use_cache {
                let stored = Arc::clone(&self.permanent.data(atom).chars);
                // A cache insertion failure fails the whole call even though
                // the atom was already resolved; the cache stays in lockstep
                // with what callers were handed.
                zone.cache_mut().insert(lookup.hash(), stored, atom)?;
            }
            return Ok(atom);
        }

        // Validate the length before taking a partition lock.
        if chars.len() > MAX_ATOM_LENGTH {
            return Err(AtomError::TooLong);
        }

        let (atom, stored) = self
            .table
            .atomize_chars(&lookup, pin, index_hint, self.is_thread_safe())?;
        if use_cache {
            zone.cache_mut().insert(lookup.hash(), stored, atom)?;
        }
        Ok(atom)
    }

    /// Atomizes the decimal spelling of `index`, carrying the index hint
    /// along so the array-index value is cached without reparsing.
    pub fn atomize_index(&self, zone: &mut Zone, index: u32) -> Result<AtomId, AtomError> {
        if let Some(atom) = self.statics.int(index) {
            return Ok(atom);
        }
        let mut buf = [0; 10];
        let digits = crate::atom::write_decimal(&mut buf, index);
        let hint = (index < u32::MAX).then_some(index);
        self.atomize_chars(zone, CharSlice::Narrow(digits), Pinning::DoNotPin, hint)
    }

    pub fn atomize_char(&self, zone: &mut Zone, value: char) -> Result<AtomId, AtomError> {
        if (value as u32) < 0x100 {
            self.atomize_chars(zone, CharSlice::Narrow(&[value as u8]), Pinning::DoNotPin, None)
        } else {
            let mut buf = [0; 2];
            let units = value.encode_utf16(&mut buf);
            self.atomize_chars(zone, CharSlice::Wide(units), Pinning::DoNotPin, None)
        }
    }

    /// Pins `atom` so no sweep can ever remove it. The atom must currently
    /// exist in this runtime; pinning an unknown or stale handle is a
    /// programming error and panics.
    pub fn pin(&self, atom: AtomId) {
        if atom.is_permanent() {
            return;
        }
        self.table.pin_existing(atom, self.is_thread_safe());
    }

    pub fn is_pinned(&self, atom: AtomId) -> bool {
        if atom.is_permanent() {
            return true;
        }
        self.table.is_pinned(atom, self.is_thread_safe())
    }

    /// The atom's character storage. Panics on a stale handle.
    pub fn chars(&self, atom: AtomId) -> Arc<CharBuf> {
        if atom.is_permanent() {
            Arc::clone(&self.permanent.data(atom).chars)
        } else {
            self.table.chars(atom, self.is_thread_safe())
        }
    }

    pub fn resolve(&self, atom: AtomId) -> String {
        self.chars(atom).to_string()
    }

    pub fn atom_len(&self, atom: AtomId) -> usize {
        self.chars(atom).len()
    }

    /// The cached array-index value, present when the content is a canonical
    /// base-10 index.
    pub fn index_value(&self, atom: AtomId) -> Option<u32> {
        if atom.is_permanent() {
            self.permanent.data(atom).index_value
        } else {
            self.table.index_value(atom, self.is_thread_safe())
        }
    }

    /// Leaves single-writer mode for good. Must be called by the thread that
    /// owns the runtime before any other thread is given access to it; from
    /// then on every partition access takes the partition lock.
    pub fn enable_thread_safety(&self) {
        self.thread_safe.store(true, Ordering::Release);
    }

    fn is_thread_safe(&self) -> bool {
        self.thread_safe.load(Ordering::Relaxed)
    }

    /// Freezes the whole table for a cross-thread bulk operation. The caller
    /// must not atomize through this runtime while the guard is held.
    pub fn lock_all(&self) -> AllPartitionsGuard<'_> {
        self.table.lock_all()
    }

    /// Reports every pinned atom to the collector as a root.
    pub fn trace_pinned_atoms(&self, tracer: &mut dyn Tracer) {
        self.table.trace_pinned_atoms(tracer);
    }

    /// Reports the permanent atoms as process-global roots. Only the runtime
    /// that built the permanent set reports them; children sharing it stay
    /// silent so roots are not reported twice.
    pub fn trace_permanent_atoms(&self, tracer: &mut dyn Tracer) {
        if self.shared_from_parent {
            return;
        }
        self.permanent.trace(tracer);
    }

    /// Begins an incremental sweep cycle driven by the returned cursor.
    /// `liveness` is consulted for every unpinned entry until the cycle
    /// completes. Fails atomically if the secondary sets cannot be built.
    pub fn start_incremental_sweep(
        &self,
        liveness: Arc<dyn Liveness + Send + Sync>,
    ) -> Result<SweepCursor, AtomError> {
        self.table.start_incremental_sweep(liveness, self.is_thread_safe())
    }

    /// Runs sweep steps until `budget` is exhausted ([`SweepProgress::InProgress`])
    /// or the cycle is complete ([`SweepProgress::Done`]).
    pub fn sweep_incrementally(&self, cursor: &mut SweepCursor, budget: &mut SweepBudget) -> SweepProgress {
        self.table.sweep_incrementally(cursor, budget, self.is_thread_safe())
    }

    /// Sweeps the whole table in one pass. Only valid outside an incremental
    /// sweep cycle.
    pub fn sweep_all(&self, liveness: &dyn Liveness) {
        self.table.sweep_all(liveness, self.is_thread_safe());
    }

    /// A runtime sharing this runtime's permanent set, static strings and
    /// common names, with its own empty sharded table.
    pub fn child(&self) -> AtomsRuntime {
        AtomsRuntime {
            permanent: Arc::clone(&self.permanent),
            statics: Arc::clone(&self.statics),
            names: Arc::clone(&self.names),
            table: AtomsTable::new(self.table.partition_count()),
            thread_safe: AtomicBool::new(false),
            shared_from_parent: true,
        }
    }

    pub fn names(&self) -> &CommonNames {
        &self.names
    }

    pub fn statics(&self) -> &StaticStrings {
        &self.statics
    }

    pub fn permanent_atoms(&self) -> &FrozenAtomSet {
        &self.permanent
    }

    /// Number of atoms resolvable through this runtime, permanent included.
    pub fn atom_count(&self) -> usize {
        self.permanent.len() + self.table.atom_count(self.is_thread_safe())
    }

    /// Approximate bytes held by the table structures and character storage.
    /// A child runtime does not count the shared permanent set.
    pub fn heap_bytes(&self) -> usize {
        let mut bytes = self.table.heap_bytes(self.is_thread_safe());
        if !self.shared_from_parent {
            bytes += self.permanent.heap_bytes();
        }
        bytes
    }

    #[cfg(test)]
    pub(crate) fn occurrences(&self, atom: AtomId) -> usize {
        self.table.occurrences(atom, self.is_thread_safe())
    }
}
