//! The flint runtime's interned-string (atom) table.
//!
//! Strings are deduplicated into [`AtomId`]s: two atoms spell the same
//! sequence of code points if and only if their handles are equal, so
//! property-key and identifier comparison is a single integer compare.
//!
//! The table is split into independently locked partitions so worker threads
//! can atomize concurrently, cooperates with a tracing collector through the
//! narrow [`Liveness`]/[`Tracer`] interfaces, and supports a budgeted,
//! resumable sweep that removes unreachable atoms without a long pause. A
//! single-threaded bootstrap phase ([`AtomsBootstrap`]) builds the permanent
//! atoms every runtime instance shares for the lifetime of the process.

pub mod atom;
pub mod error;
pub mod lookup;
pub mod names;
pub mod permanent;
pub mod runtime;
mod shard;
pub mod statics;
pub mod sweep;
mod table;
pub mod trace;
pub mod zone;

#[cfg(test)]
mod test;

pub use atom::{AtomId, CharBuf, CharSlice, Pinning};
pub use error::{AtomError, MAX_ATOM_LENGTH};
pub use lookup::AtomLookup;
pub use names::CommonNames;
pub use permanent::{FrozenAtomSet, PermanentStaging};
pub use runtime::{AtomsBootstrap, AtomsRuntime};
pub use statics::StaticStrings;
pub use sweep::{SweepBudget, SweepCursor, SweepProgress};
pub use table::AllPartitionsGuard;
pub use trace::{Liveness, Tracer};
pub use zone::Zone;
