use std::fmt::{self, Write};
use std::sync::Arc;

use bitflags::bitflags;
use either::Either;

bitflags! {
    /// Flags carried by every live atom.
    pub(crate) struct AtomFlags: u8 {
        /// Exempt from sweeping; never cleared once set.
        const PINNED = 1 << 0;
        /// Lives in the frozen permanent set rather than in a partition.
        const PERMANENT = 1 << 1;
    }
}

/// Whether an atomization request should also pin the resulting atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pinning {
    DoNotPin,
    Pin,
}

/// Low 32 bits: slot index within the owning partition (or within the
/// permanent store). Next 8 bits: partition index, with [`PERMANENT_DOMAIN`]
/// marking permanent atoms. Top 24 bits: slot generation.
type PackedAtomId = u64;

pub(crate) const PERMANENT_DOMAIN: u8 = u8::MAX;
pub(crate) const GENERATION_MASK: u32 = (1 << 24) - 1;

/// Opaque handle to an interned string. Equal content implies equal handles
/// within one runtime, so atoms compare by identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomId {
    raw: PackedAtomId,
}

impl AtomId {
    pub(crate) fn from_raw_parts(slot: u32, partition: u8, generation: u32) -> Self {
        debug_assert!(generation <= GENERATION_MASK);
        Self {
            raw: u64::from(slot) | u64::from(partition) << 32 | u64::from(generation) << 40,
        }
    }

    pub(crate) fn permanent(slot: u32) -> Self {
        Self::from_raw_parts(slot, PERMANENT_DOMAIN, 0)
    }

    pub(crate) fn slot(self) -> u32 {
        self.raw as u32
    }

    pub(crate) fn partition(self) -> u8 {
        (self.raw >> 32) as u8
    }

    pub(crate) fn generation(self) -> u32 {
        (self.raw >> 40) as u32
    }

    /// Permanent atoms were created during bootstrap and outlive every sweep.
    pub fn is_permanent(self) -> bool {
        self.partition() == PERMANENT_DOMAIN
    }
}

impl fmt::Debug for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_permanent() {
            f.debug_struct("AtomId").field("permanent_slot", &self.slot()).finish()
        } else {
            f.debug_struct("AtomId")
                .field("slot", &self.slot())
                .field("partition", &self.partition())
                .field("generation", &self.generation())
                .finish()
        }
    }
}

/// A borrowed view of string content in either encoding.
#[derive(Debug, Clone, Copy)]
pub enum CharSlice<'a> {
    /// Latin-1: every byte is a code point in `0..=0xFF`.
    Narrow(&'a [u8]),
    /// UTF-16 code units.
    Wide(&'a [u16]),
}

impl<'a> CharSlice<'a> {
    pub fn len(self) -> usize {
        match self {
            CharSlice::Narrow(chars) => chars.len(),
            CharSlice::Wide(units) => units.len(),
        }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// The content as UTF-16 code units, independent of encoding.
    pub(crate) fn units(self) -> impl Iterator<Item = u16> + 'a {
        match self {
            CharSlice::Narrow(chars) => Either::Left(chars.iter().copied().map(u16::from)),
            CharSlice::Wide(units) => Either::Right(units.iter().copied()),
        }
    }

    pub fn to_buf(self) -> CharBuf {
        match self {
            CharSlice::Narrow(chars) => CharBuf::Narrow(chars.into()),
            CharSlice::Wide(units) => CharBuf::Wide(units.into()),
        }
    }
}

/// Owned character storage of one atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharBuf {
    Narrow(Box<[u8]>),
    Wide(Box<[u16]>),
}

impl CharBuf {
    /// Chooses the narrow encoding whenever every code point fits in Latin-1.
    pub fn from_str(text: &str) -> Self {
        if text.chars().all(|c| (c as u32) < 0x100) {
            CharBuf::Narrow(text.chars().map(|c| c as u8).collect())
        } else {
            CharBuf::Wide(text.encode_utf16().collect())
        }
    }

    pub fn as_slice(&self) -> CharSlice<'_> {
        match self {
            CharBuf::Narrow(chars) => CharSlice::Narrow(chars),
            CharBuf::Wide(units) => CharSlice::Wide(units),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn byte_size(&self) -> usize {
        match self {
            CharBuf::Narrow(chars) => chars.len(),
            CharBuf::Wide(units) => units.len() * 2,
        }
    }
}

impl fmt::Display for CharBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharBuf::Narrow(chars) => {
                for &b in chars.iter() {
                    f.write_char(char::from(b))?;
                }
                Ok(())
            }
            CharBuf::Wide(units) => {
                for c in char::decode_utf16(units.iter().copied()) {
                    f.write_char(c.unwrap_or(char::REPLACEMENT_CHARACTER))?;
                }
                Ok(())
            }
        }
    }
}

/// Payload of one interned atom.
pub(crate) struct AtomData {
    pub chars: Arc<CharBuf>,
    pub hash: u32,
    pub flags: AtomFlags,
    /// The numeric value when the content is a canonical array-index string.
    pub index_value: Option<u32>,
}

/// Parses a canonical base-10 array index: `"0"`, or digits with no leading
/// zero, with a value below `u32::MAX`.
pub(crate) fn parse_array_index(chars: CharSlice<'_>) -> Option<u32> {
    let len = chars.len();
    if len == 0 || len > 10 {
        return None;
    }
    let mut units = chars.units();
    let first = decimal_digit(units.next().expect("length was checked"))?;
    if first == 0 && len > 1 {
        return None;
    }
    let mut value = u64::from(first);
    for unit in units {
        value = value * 10 + u64::from(decimal_digit(unit)?);
    }
    // u32::MAX itself is reserved and never a valid element index.
    (value < u64::from(u32::MAX)).then_some(value as u32)
}

fn decimal_digit(unit: u16) -> Option<u32> {
    let digit = u32::from(unit).wrapping_sub(u32::from(b'0'));
    (digit <= 9).then_some(digit)
}

/// Formats `value` into `buf`, returning the used suffix.
/// `u32::MAX` is at most 10 digits long.
pub(crate) fn write_decimal(buf: &mut [u8; 10], mut value: u32) -> &[u8] {
    let mut at = buf.len();
    loop {
        at -= 1;
        buf[at] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    &buf[at..]
}
