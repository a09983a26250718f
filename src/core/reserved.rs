// This module models the fixed pool of reserved scratch bytes and the CPU register indices
// used by the VIL backend. The 6502 has only three registers, so any instruction expansion
// that needs temporary storage (the right operand of an add, the two halves of a long
// pointer) borrows one of a handful of zero-page bytes at the start of RAM. Slots are plain
// fixed indices rather than allocations: ScratchSlot maps an index to its address, SlotSet is
// a small bitset recording which slots an expansion touched, and ReservedSlots is the
// per-expansion arena the emitter draws slots from. A slot is live only inside the single
// instruction expansion that requested it; the catalog self-check compares the SlotSet an
// expansion actually used against the count its descriptor declares. Register maps the
// popToRegister index onto A, X and Y and rejects anything else.

//! Reserved scratch slots and CPU register indices.

use super::error::{CompileError, CompileResult};
use std::fmt;

/// Address of the first reserved scratch byte.
pub const RESERVED_BASE: u16 = 0x80;

/// Number of reserved scratch bytes.
pub const RESERVED_SLOTS: u8 = 4;

/// Whether `addr` lies inside the reserved scratch region.
pub fn is_reserved(addr: u16) -> bool {
    (RESERVED_BASE..RESERVED_BASE + RESERVED_SLOTS as u16).contains(&addr)
}

/// Whether the byte range `addr..addr + size` touches the reserved region.
pub fn overlaps_reserved(addr: u16, size: u8) -> bool {
    let end = addr as u32 + size as u32;
    (addr as u32) < (RESERVED_BASE + RESERVED_SLOTS as u16) as u32 && end > RESERVED_BASE as u32
}

/// One reserved scratch byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScratchSlot(u8);

impl ScratchSlot {
    pub const fn index(self) -> u8 {
        self.0
    }

    pub const fn address(self) -> u16 {
        RESERVED_BASE + self.0 as u16
    }

    /// The slot living at `addr`, if any.
    pub fn at_address(addr: u16) -> Option<Self> {
        if is_reserved(addr) {
            Some(ScratchSlot((addr - RESERVED_BASE) as u8))
        } else {
            None
        }
    }
}

/// Bit set of scratch slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotSet {
    bits: u8,
}

impl SlotSet {
    pub fn new() -> Self {
        Self { bits: 0 }
    }

    pub fn contains(&self, slot: ScratchSlot) -> bool {
        self.bits & (1 << slot.0) != 0
    }

    pub fn set(&mut self, slot: ScratchSlot) {
        self.bits |= 1 << slot.0;
    }

    pub fn clear(&mut self, slot: ScratchSlot) {
        self.bits &= !(1 << slot.0);
    }

    pub fn union(&mut self, other: &SlotSet) {
        self.bits |= other.bits;
    }

    pub fn count(&self) -> u8 {
        self.bits.count_ones() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Number of slots needed to cover every member, counting from slot 0.
    pub fn span(&self) -> u8 {
        8 - self.bits.leading_zeros() as u8
    }

    pub fn iter(&self) -> impl Iterator<Item = ScratchSlot> + '_ {
        (0..RESERVED_SLOTS)
            .map(ScratchSlot)
            .filter(move |slot| self.contains(*slot))
    }
}

/// Fixed-index slot arena for a single instruction expansion.
///
/// Handing out a slot only records that it was used; nothing is ever freed,
/// the whole arena is dropped with the expansion.
#[derive(Debug, Default)]
pub struct ReservedSlots {
    used: SlotSet,
}

impl ReservedSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&mut self, index: u8) -> CompileResult<ScratchSlot> {
        if index >= RESERVED_SLOTS {
            return Err(CompileError::invariant(format!(
                "scratch slot {} out of range (only {} reserved)",
                index, RESERVED_SLOTS
            )));
        }
        let slot = ScratchSlot(index);
        self.used.set(slot);
        Ok(slot)
    }

    pub fn used(&self) -> SlotSet {
        self.used
    }
}

/// A CPU register addressable by `popToRegister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    A,
    X,
    Y,
}

impl Register {
    pub fn index(self) -> u8 {
        match self {
            Register::A => 0,
            Register::X => 1,
            Register::Y => 2,
        }
    }
}

impl TryFrom<u8> for Register {
    type Error = CompileError;

    fn try_from(index: u8) -> CompileResult<Self> {
        match index {
            0 => Ok(Register::A),
            1 => Ok(Register::X),
            2 => Ok(Register::Y),
            index => Err(CompileError::InvalidRegisterIndex { index }),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Register::A => "A",
            Register::X => "X",
            Register::Y => "Y",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn test_slot_addresses() {
        let mut slots = ReservedSlots::new();
        let s0 = slots.slot(0).unwrap();
        let s1 = slots.slot(1).unwrap();
        assert_eq!(s0.address(), 0x80);
        assert_eq!(s1.address(), 0x81);
        assert_eq!(ScratchSlot::at_address(0x81), Some(s1));
        assert_eq!(ScratchSlot::at_address(0x84), None);
        assert_eq!(slots.used().count(), 2);
        assert_eq!(
            slots.slot(RESERVED_SLOTS).unwrap_err().kind(),
            ErrorKind::InvariantViolation
        );
    }

    #[test]
    fn test_slot_set_ops() {
        let mut a = SlotSet::new();
        assert!(a.is_empty());
        a.set(ScratchSlot(2));
        assert_eq!(a.span(), 3);
        let mut b = SlotSet::new();
        b.set(ScratchSlot(0));
        a.union(&b);
        assert_eq!(a.count(), 2);
        assert_eq!(a.iter().map(|s| s.index()).collect::<Vec<_>>(), vec![0, 2]);
        a.clear(ScratchSlot(2));
        assert_eq!(a.span(), 1);
    }

    #[test]
    fn test_reserved_overlap() {
        assert!(overlaps_reserved(0x7f, 2));
        assert!(overlaps_reserved(0x83, 1));
        assert!(!overlaps_reserved(0x84, 4));
        assert!(!overlaps_reserved(0x7e, 2));
    }

    #[test]
    fn test_register_index() {
        assert_eq!(Register::try_from(1).unwrap(), Register::X);
        assert_eq!(
            Register::try_from(3).unwrap_err(),
            CompileError::InvalidRegisterIndex { index: 3 }
        );
    }
}
