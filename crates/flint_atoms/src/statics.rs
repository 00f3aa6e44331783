use crate::atom::{parse_array_index, write_decimal, AtomId, CharSlice};
use crate::error::AtomError;
use crate::lookup::AtomLookup;
use crate::permanent::PermanentStaging;

pub(crate) const STATIC_INT_LIMIT: u32 = 256;

/// Fast table for common tiny and numeric strings: the empty string and the
/// decimal spellings of `0..=255`, preinterned as permanent atoms during
/// bootstrap. `atomize` consults it before hashing anything.
pub struct StaticStrings {
    empty: AtomId,
    ints: Box<[AtomId]>,
}

impl StaticStrings {
    pub(crate) fn init(staging: &mut PermanentStaging) -> Result<Self, AtomError> {
        let empty = staging.atomize(&AtomLookup::new(CharSlice::Narrow(&[])))?;
        let mut ints = Vec::with_capacity(STATIC_INT_LIMIT as usize);
        let mut buf = [0; 10];
        for value in 0..STATIC_INT_LIMIT {
            let digits = write_decimal(&mut buf, value);
            ints.push(staging.atomize(&AtomLookup::new(CharSlice::Narrow(digits)))?);
        }
        Ok(Self {
            empty,
            ints: ints.into_boxed_slice(),
        })
    }

    /// Resolves content that has a preinterned atom. Only canonical decimal
    /// spellings match; `"007"` is an ordinary atom.
    pub(crate) fn lookup(&self, chars: CharSlice<'_>) -> Option<AtomId> {
        match chars.len() {
            0 => Some(self.empty),
            1..=3 => {
                let value = parse_array_index(chars)?;
                (value < STATIC_INT_LIMIT).then(|| self.ints[value as usize])
            }
            _ => None,
        }
    }

    pub fn empty(&self) -> AtomId {
        self.empty
    }

    pub fn int(&self, value: u32) -> Option<AtomId> {
        self.ints.get(value as usize).copied()
    }
}
