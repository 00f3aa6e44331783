use derive_more::Display;

/// Longest string the table will intern, in code units.
pub const MAX_ATOM_LENGTH: usize = (1 << 30) - 2;

/// Failures surfaced by atomization and sweep setup. Contract violations
/// (pinning an unknown atom, overlapping sweep cycles, stale handles) are
/// not errors; they panic.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum AtomError {
    /// Backing storage for an atom or an entry set could not be grown.
    #[display("atom table out of memory")]
    OutOfMemory,
    /// The string exceeds [`MAX_ATOM_LENGTH`] code units.
    #[display("string is too long to be atomized")]
    TooLong,
}

impl std::error::Error for AtomError {}

impl From<hashbrown::TryReserveError> for AtomError {
    fn from(_: hashbrown::TryReserveError) -> Self {
        AtomError::OutOfMemory
    }
}

impl From<std::collections::TryReserveError> for AtomError {
    fn from(_: std::collections::TryReserveError) -> Self {
        AtomError::OutOfMemory
    }
}
