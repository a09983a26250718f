// This module implements the type and size resolver for VIL. Types live in a small closed
// universe encoded as single bytes: the builtins Byte, Boolean and Nothing occupy even
// encodings starting at 100, user struct types take the following even encodings, and every
// odd encoding is the pointer to the even type just below it. That fixed bijection makes
// pointer tests a parity check and makes pointerOf/referentOf plain arithmetic. The resolver
// functions are total over their declared domain and return explicit errors for everything
// else: arithmetic result types, bitwise and comparison result types, short-integer
// classification (Byte and Boolean truncate on store) and the store rule used by every
// pop-to-memory instruction. TypeRegistry owns the name table used by the textual front end
// and answers size queries for user struct types.

//! Type & size resolution.
//!
//! Builtin kinds plus a pointer wrapper, encoded so that
//! `is_pointer(t) == (t.encoding() % 2 == 1)`.

use super::error::{CompileError, CompileResult};
use hashbrown::HashMap;
use std::fmt;

/// Size in bytes of a zero-page (short) pointer.
pub const SHORT_POINTER_SIZE: u8 = 1;

/// Size in bytes of a long pointer.
pub const LONG_POINTER_SIZE: u8 = 2;

/// A type in the VIL type universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Type(u8);

impl Type {
    pub const BYTE: Type = Type(100);
    pub const BOOLEAN: Type = Type(102);
    pub const NOTHING: Type = Type(104);

    /// First encoding handed out to user struct types.
    pub const FIRST_USER: u8 = 106;

    pub const fn from_encoding(encoding: u8) -> Self {
        Type(encoding)
    }

    pub const fn encoding(self) -> u8 {
        self.0
    }

    fn is_builtin(self) -> bool {
        matches!(self, Type::BYTE | Type::BOOLEAN | Type::NOTHING)
    }
}

/// Binary operations whose result type is resolved here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOp {
    Add,
    Sub,
    BitwiseOr,
    Compare,
}

/// How a stack value is written into a storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Sizes and types agree; every byte is stored.
    Exact,
    /// Short-integer target: the low bytes are stored, `discard` high bytes are dropped.
    Truncate { discard: u8 },
}

pub fn is_pointer(t: Type) -> bool {
    t.0 % 2 == 1
}

/// Byte and Boolean are short integers and truncate on store.
pub fn is_short_integer(t: Type) -> bool {
    t == Type::BYTE || t == Type::BOOLEAN
}

pub fn pointer_of(t: Type) -> CompileResult<Type> {
    if is_pointer(t) {
        return Err(CompileError::invariant(format!(
            "pointer_of called on pointer type {}",
            t.0
        )));
    }
    // Even encodings top out at 254, so the pointer encoding always fits.
    Ok(Type(t.0 + 1))
}

pub fn referent_of(p: Type) -> CompileResult<Type> {
    if !is_pointer(p) {
        return Err(CompileError::invariant(format!(
            "referent_of called on non-pointer type {}",
            p.0
        )));
    }
    Ok(Type(p.0 - 1))
}

/// Size of a builtin or pointer type. User struct types need a [`TypeRegistry`].
pub fn size_of(t: Type) -> CompileResult<u8> {
    match t {
        Type::BYTE | Type::BOOLEAN => Ok(1),
        Type::NOTHING => Ok(0),
        t if is_pointer(t) => Ok(SHORT_POINTER_SIZE),
        t => Err(CompileError::UnknownType {
            name: format!("#{}", t.0),
        }),
    }
}

/// Result type of a binary stack operation.
///
/// Only the combinations the target can actually lower are accepted; every
/// other pairing is a `TypeMismatch`.
pub fn result_type(op: TypeOp, first: Type, second: Type) -> CompileResult<Type> {
    let result = match (op, first, second) {
        (TypeOp::Add | TypeOp::Sub, Type::BYTE, Type::BYTE) => Some(Type::BYTE),
        (TypeOp::BitwiseOr, Type::BOOLEAN, Type::BOOLEAN) => Some(Type::BOOLEAN),
        (TypeOp::BitwiseOr, Type::BYTE, Type::BYTE) => Some(Type::BYTE),
        (TypeOp::Compare, a, b) if a == b && is_short_integer(a) => Some(Type::BOOLEAN),
        _ => None,
    };
    result.ok_or_else(|| {
        CompileError::type_mismatch(format!(
            "unsupported operand types {} and {} for {:?}",
            first.0, second.0, op
        ))
    })
}

/// Arithmetic, bitwise and comparison operations are single-byte only.
pub fn check_operand_sizes(op: TypeOp, first: u8, second: u8) -> CompileResult<()> {
    if first != 1 || second != 1 {
        return Err(CompileError::unsupported_size(format!(
            "{:?} on {}-byte and {}-byte operands",
            op, first, second
        )));
    }
    Ok(())
}

/// Decide how a stack value of `(stack_type, stack_size)` is stored into a
/// location of `(target_type, target_size)`.
pub fn store_kind(
    target_type: Type,
    target_size: u8,
    stack_type: Type,
    stack_size: u8,
) -> CompileResult<StoreKind> {
    if is_short_integer(target_type) {
        if stack_size < target_size {
            return Err(CompileError::unsupported_size(format!(
                "cannot widen a {}-byte stack value into a {}-byte short integer",
                stack_size, target_size
            )));
        }
        return Ok(if stack_size == target_size {
            StoreKind::Exact
        } else {
            StoreKind::Truncate {
                discard: stack_size - target_size,
            }
        });
    }
    if target_type != stack_type {
        return Err(CompileError::type_mismatch(format!(
            "storing type {} into location of type {}",
            stack_type.0, target_type.0
        )));
    }
    if target_size != stack_size {
        return Err(CompileError::unsupported_size(format!(
            "storing {}-byte value into {}-byte location",
            stack_size, target_size
        )));
    }
    Ok(StoreKind::Exact)
}

#[derive(Debug, Clone)]
struct UserType {
    name: String,
    size: u8,
}

/// Name table and size oracle for every type a program mentions.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    user: Vec<UserType>,
    by_name: HashMap<String, Type>,
}

impl TypeRegistry {
    /// Registry containing only the builtins.
    pub fn new() -> Self {
        let mut by_name = HashMap::new();
        by_name.insert("byte".to_string(), Type::BYTE);
        by_name.insert("bool".to_string(), Type::BOOLEAN);
        by_name.insert("nothing".to_string(), Type::NOTHING);
        Self {
            user: Vec::new(),
            by_name,
        }
    }

    /// Register a user struct type of `size` bytes.
    pub fn define(&mut self, name: &str, size: u8) -> CompileResult<Type> {
        if self.by_name.contains_key(name) {
            return Err(CompileError::type_mismatch(format!(
                "type `{}` is already defined",
                name
            )));
        }
        let encoding = Type::FIRST_USER as usize + 2 * self.user.len();
        if encoding >= u8::MAX as usize {
            return Err(CompileError::invariant("type encoding space exhausted"));
        }
        let ty = Type(encoding as u8);
        self.user.push(UserType {
            name: name.to_string(),
            size,
        });
        self.by_name.insert(name.to_string(), ty);
        Ok(ty)
    }

    /// Look up a type by name. A trailing `*` names the pointer type.
    pub fn lookup(&self, name: &str) -> CompileResult<Type> {
        if let Some(referent) = name.strip_suffix('*') {
            return pointer_of(self.lookup(referent)?);
        }
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::UnknownType {
                name: name.to_string(),
            })
    }

    fn user_type(&self, t: Type) -> Option<&UserType> {
        let offset = t.0.checked_sub(Type::FIRST_USER)?;
        if offset % 2 != 0 {
            return None;
        }
        self.user.get((offset / 2) as usize)
    }

    /// Whether `t` is a builtin, a registered struct, or a pointer to either.
    pub fn contains(&self, t: Type) -> bool {
        let base = if is_pointer(t) { Type(t.0 - 1) } else { t };
        base.is_builtin() || self.user_type(base).is_some()
    }

    pub fn size_of(&self, t: Type) -> CompileResult<u8> {
        if !self.contains(t) {
            return Err(CompileError::UnknownType {
                name: format!("#{}", t.0),
            });
        }
        if let Some(user) = self.user_type(t) {
            return Ok(user.size);
        }
        size_of(t)
    }

    pub fn name_of(&self, t: Type) -> CompileResult<String> {
        if is_pointer(t) {
            return Ok(format!("{}*", self.name_of(referent_of(t)?)?));
        }
        match t {
            Type::BYTE => Ok("byte".to_string()),
            Type::BOOLEAN => Ok("bool".to_string()),
            Type::NOTHING => Ok("nothing".to_string()),
            t => self
                .user_type(t)
                .map(|u| u.name.clone())
                .ok_or_else(|| CompileError::UnknownType {
                    name: format!("#{}", t.0),
                }),
        }
    }

    /// User struct types in registration order, as `(type, name, size)`.
    pub fn user_types(&self) -> impl Iterator<Item = (Type, &str, u8)> {
        self.user.iter().enumerate().map(|(i, u)| {
            (
                Type(Type::FIRST_USER + 2 * i as u8),
                u.name.as_str(),
                u.size,
            )
        })
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Type::BYTE => write!(f, "byte"),
            Type::BOOLEAN => write!(f, "bool"),
            Type::NOTHING => write!(f, "nothing"),
            t if is_pointer(t) => write!(f, "{}*", Type(t.0 - 1)),
            t => write!(f, "type{}", t.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn test_pointer_parity() {
        for encoding in 100..=200u8 {
            let t = Type::from_encoding(encoding);
            assert_eq!(is_pointer(t), encoding % 2 == 1);
        }
    }

    #[test]
    fn test_pointer_bijection() {
        for encoding in (100..=254u8).step_by(2) {
            let r = Type::from_encoding(encoding);
            let p = pointer_of(r).unwrap();
            assert!(is_pointer(p));
            assert_eq!(referent_of(p).unwrap(), r);
            assert_eq!(pointer_of(referent_of(p).unwrap()).unwrap(), p);
        }
    }

    #[test]
    fn test_last_registered_type_has_a_pointer() {
        let mut registry = TypeRegistry::new();
        let mut last = None;
        for i in 0.. {
            match registry.define(&format!("s{}", i), 2) {
                Ok(t) => last = Some((i, t)),
                Err(e) => {
                    assert_eq!(e.kind(), ErrorKind::InvariantViolation);
                    break;
                }
            }
        }
        let (i, t) = last.unwrap();
        assert_eq!(t.encoding(), 254);
        let p = registry.lookup(&format!("s{}*", i)).unwrap();
        assert_eq!(p.encoding(), 255);
        assert_eq!(referent_of(p).unwrap(), t);
        assert!(registry.contains(p));
        assert_eq!(registry.name_of(p).unwrap(), format!("s{}*", i));
    }

    #[test]
    fn test_wrong_variant_fails() {
        let p = pointer_of(Type::BYTE).unwrap();
        assert_eq!(pointer_of(p).unwrap_err().kind(), ErrorKind::InvariantViolation);
        assert_eq!(
            referent_of(Type::BYTE).unwrap_err().kind(),
            ErrorKind::InvariantViolation
        );
    }

    #[test]
    fn test_result_types() {
        assert_eq!(result_type(TypeOp::Add, Type::BYTE, Type::BYTE).unwrap(), Type::BYTE);
        assert_eq!(result_type(TypeOp::Sub, Type::BYTE, Type::BYTE).unwrap(), Type::BYTE);
        assert_eq!(
            result_type(TypeOp::BitwiseOr, Type::BOOLEAN, Type::BOOLEAN).unwrap(),
            Type::BOOLEAN
        );
        assert_eq!(
            result_type(TypeOp::Compare, Type::BYTE, Type::BYTE).unwrap(),
            Type::BOOLEAN
        );
        assert_eq!(
            result_type(TypeOp::Add, Type::BYTE, Type::BOOLEAN).unwrap_err().kind(),
            ErrorKind::TypeMismatch
        );
        assert_eq!(
            result_type(TypeOp::Compare, Type::BYTE, Type::BOOLEAN).unwrap_err().kind(),
            ErrorKind::TypeMismatch
        );
    }

    #[test]
    fn test_store_rules() {
        assert_eq!(
            store_kind(Type::BOOLEAN, 1, Type::BYTE, 1).unwrap(),
            StoreKind::Exact
        );
        assert_eq!(
            store_kind(Type::BYTE, 1, Type::BYTE, 2).unwrap(),
            StoreKind::Truncate { discard: 1 }
        );
        let mut registry = TypeRegistry::new();
        let point = registry.define("point", 2).unwrap();
        assert_eq!(
            store_kind(point, 2, Type::BYTE, 2).unwrap_err().kind(),
            ErrorKind::TypeMismatch
        );
        let ptr = pointer_of(Type::BYTE).unwrap();
        assert_eq!(
            store_kind(ptr, 1, ptr, 2).unwrap_err().kind(),
            ErrorKind::UnsupportedSize
        );
    }

    #[test]
    fn test_registry_sizes_and_names() {
        let mut registry = TypeRegistry::new();
        let point = registry.define("point", 3).unwrap();
        assert_eq!(point.encoding(), Type::FIRST_USER);
        assert_eq!(registry.size_of(point).unwrap(), 3);
        assert_eq!(registry.size_of(Type::BOOLEAN).unwrap(), 1);
        assert_eq!(registry.lookup("point*").unwrap(), pointer_of(point).unwrap());
        assert_eq!(registry.name_of(pointer_of(point).unwrap()).unwrap(), "point*");
        assert_eq!(
            registry.size_of(Type::from_encoding(150)).unwrap_err().kind(),
            ErrorKind::UnknownType
        );
        assert_eq!(
            registry.lookup("sprite").unwrap_err().kind(),
            ErrorKind::UnknownType
        );
        assert_eq!(
            registry.define("point", 1).unwrap_err().kind(),
            ErrorKind::TypeMismatch
        );
    }
}
