// This module defines the operand descriptors carried by VIL instructions. An operand names
// where a value comes from or goes to: an immediate constant, a global address in flat RAM,
// a field at a fixed offset inside a global struct or inside the struct a pointer refers to,
// a dereferenced pointer, or an element of a labelled ROM table indexed by a constant or by
// the value on top of the stack. Every operand carries its resolved type and byte size, so
// later stages (fusion guards, addressing, emission) never need the type registry again.
// Operands are built through validating constructors that check sizes against the registry,
// pointer-ness of dereferenced bases, field bounds and overlap with the reserved scratch
// region; once built they are immutable.

//! Operand descriptors.

use super::error::{CompileError, CompileResult};
use super::reserved::overlaps_reserved;
use super::types::{is_pointer, referent_of, Type, TypeRegistry, LONG_POINTER_SIZE};

/// Largest value size moved by push/pop/copy instructions.
pub const MAX_VALUE_SIZE: u8 = 8;

/// Largest constant size.
pub const MAX_CONSTANT_SIZE: u8 = 2;

/// Index of a ROM table element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RomIndex {
    /// Folded into the address at compile time.
    Constant(u8),
    /// Popped from the stack at run time.
    Stack,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Constant {
        value: u16,
        ty: Type,
        size: u8,
    },
    Global {
        addr: u16,
        ty: Type,
        size: u8,
    },
    Field {
        base: Box<Operand>,
        offset: u8,
        ty: Type,
        size: u8,
    },
    PointerDeref {
        base: Box<Operand>,
        pointer_size: u8,
        ty: Type,
        size: u8,
    },
    RomElement {
        label: String,
        referent: Type,
        index: RomIndex,
    },
}

/// Operand kind without payload, used by catalog parameter declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    Constant,
    Global,
    Field,
    PointerDeref,
    RomElement,
}

impl Operand {
    /// A constant of `size` bytes (1 or 2). The value must fit.
    pub fn constant(value: u16, ty: Type, size: u8) -> CompileResult<Self> {
        if size == 0 || size > MAX_CONSTANT_SIZE {
            return Err(CompileError::unsupported_size(format!(
                "{}-byte constant",
                size
            )));
        }
        if size == 1 && value > 0xff {
            return Err(CompileError::unsupported_size(format!(
                "constant {} does not fit in one byte",
                value
            )));
        }
        Ok(Operand::Constant { value, ty, size })
    }

    /// A global of type `ty`. `size` defaults to the registered size; only
    /// pointer globals may override it (1 for zero-page, 2 for long pointers).
    pub fn global(
        registry: &TypeRegistry,
        addr: u16,
        ty: Type,
        size: Option<u8>,
    ) -> CompileResult<Self> {
        let natural = registry.size_of(ty)?;
        let size = size.unwrap_or(natural);
        if is_pointer(ty) {
            if size == 0 || size > LONG_POINTER_SIZE {
                return Err(CompileError::unsupported_size(format!(
                    "{}-byte pointer",
                    size
                )));
            }
        } else if size != natural {
            return Err(CompileError::invariant(format!(
                "global ${:04x} declared with size {} but its type has size {}",
                addr, size, natural
            )));
        }
        if size == 0 || size > MAX_VALUE_SIZE {
            return Err(CompileError::unsupported_size(format!(
                "{}-byte global",
                size
            )));
        }
        if addr as u32 + size as u32 > 0x1_0000 {
            return Err(CompileError::invariant(format!(
                "global ${:04x} of size {} wraps the address space",
                addr, size
            )));
        }
        if overlaps_reserved(addr, size) {
            return Err(CompileError::invariant(format!(
                "global ${:04x} overlaps the reserved scratch region",
                addr
            )));
        }
        Ok(Operand::Global { addr, ty, size })
    }

    /// Dereference of a pointer-typed global.
    pub fn deref(registry: &TypeRegistry, base: Operand) -> CompileResult<Self> {
        let (ty, pointer_size) = match &base {
            Operand::Global { ty, size, .. } => (*ty, *size),
            other => {
                return Err(CompileError::invariant(format!(
                    "cannot dereference {:?} operand",
                    other.kind()
                )))
            }
        };
        if !is_pointer(ty) {
            return Err(CompileError::invariant(
                "dereferenced operand is not a pointer",
            ));
        }
        let referent = referent_of(ty)?;
        let size = registry.size_of(referent)?;
        if size == 0 || size > MAX_VALUE_SIZE {
            return Err(CompileError::unsupported_size(format!(
                "dereference of {}-byte referent",
                size
            )));
        }
        Ok(Operand::PointerDeref {
            base: Box::new(base),
            pointer_size,
            ty: referent,
            size,
        })
    }

    /// Field at `offset` of a struct global or of a dereferenced struct pointer.
    pub fn field(
        registry: &TypeRegistry,
        base: Operand,
        offset: u8,
        ty: Type,
    ) -> CompileResult<Self> {
        let size = registry.size_of(ty)?;
        let container = match &base {
            Operand::Global { ty, size, .. } if !is_pointer(*ty) => *size,
            Operand::PointerDeref { size, .. } => *size,
            other => {
                return Err(CompileError::invariant(format!(
                    "field base must be a struct global or a dereference, got {:?}",
                    other.kind()
                )))
            }
        };
        if offset as u16 + size as u16 > container as u16 {
            return Err(CompileError::invariant(format!(
                "field at offset {} of size {} exceeds its {}-byte struct",
                offset, size, container
            )));
        }
        Ok(Operand::Field {
            base: Box::new(base),
            offset,
            ty,
            size,
        })
    }

    /// Element of the ROM table at `label`. Only 1-byte elements are addressable.
    pub fn rom_element(
        registry: &TypeRegistry,
        label: impl Into<String>,
        referent: Type,
        index: RomIndex,
    ) -> CompileResult<Self> {
        let size = registry.size_of(referent)?;
        if size != 1 {
            return Err(CompileError::unsupported_size(format!(
                "ROM element of size {}",
                size
            )));
        }
        Ok(Operand::RomElement {
            label: label.into(),
            referent,
            index,
        })
    }

    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Constant { .. } => OperandKind::Constant,
            Operand::Global { .. } => OperandKind::Global,
            Operand::Field { .. } => OperandKind::Field,
            Operand::PointerDeref { .. } => OperandKind::PointerDeref,
            Operand::RomElement { .. } => OperandKind::RomElement,
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            Operand::Constant { ty, .. }
            | Operand::Global { ty, .. }
            | Operand::Field { ty, .. }
            | Operand::PointerDeref { ty, .. } => *ty,
            Operand::RomElement { referent, .. } => *referent,
        }
    }

    pub fn size(&self) -> u8 {
        match self {
            Operand::Constant { size, .. }
            | Operand::Global { size, .. }
            | Operand::Field { size, .. }
            | Operand::PointerDeref { size, .. } => *size,
            Operand::RomElement { .. } => 1,
        }
    }

    /// Address of a plain global.
    pub fn global_addr(&self) -> Option<u16> {
        match self {
            Operand::Global { addr, .. } => Some(*addr),
            _ => None,
        }
    }

    /// Value of a constant.
    pub fn constant_value(&self) -> Option<u16> {
        match self {
            Operand::Constant { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Constant byte `i` (little-endian).
    pub fn constant_byte(&self, i: u8) -> Option<u8> {
        match self {
            Operand::Constant { value, size, .. } if i < *size => {
                Some((value >> (8 * i as u16)) as u8)
            }
            _ => None,
        }
    }

    /// Whether the operand pops a ROM index from the stack when accessed.
    pub fn consumes_stack_index(&self) -> bool {
        matches!(
            self,
            Operand::RomElement {
                index: RomIndex::Stack,
                ..
            }
        )
    }
}
