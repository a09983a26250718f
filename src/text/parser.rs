// This module parses the textual VIL format used by the command-line front end and the
// file-based tests. The input is line oriented: a `.type name size` directive declares a
// struct type, `name:` defines a label, and any other non-empty line is an instruction name
// followed by comma-separated arguments whose shape comes from the catalog descriptor of
// that instruction. Deprecated instruction names are accepted and canonicalised with a
// warning. Each argument is read by a small character cursor: constants (#v:T), globals
// ($addr:T), fields ([base]+off:T), dereferences (*$addr:T*) and ROM elements (NAME[i]:T),
// with an optional @n size suffix, plus stack slots, type names, numbers and labels. Every
// instruction goes through the builder as soon as it is parsed, so resolver failures are
// reported with the line they occurred on.

//! Textual VIL parser.

use crate::core::error::CompileError;
use crate::core::operand::{Operand, RomIndex};
use crate::core::types::{is_pointer, Type, TypeRegistry};
use crate::vil::catalog::{Catalog, ParamKind};
use crate::vil::{Arg, Builder, Inst, Program, StackSlot};
use log::warn;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

/// Parse a whole VIL source text.
pub fn parse_program(text: &str) -> Result<Program, ParseError> {
    let catalog = Catalog::new();
    let mut builder = Builder::new(TypeRegistry::new());

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let fail = |message: String| ParseError { line, message };
        let content = match raw.find(';') {
            Some(pos) => &raw[..pos],
            None => raw,
        }
        .trim();
        if content.is_empty() {
            continue;
        }

        if let Some(rest) = content.strip_prefix(".type") {
            let mut parts = rest.split_whitespace();
            let (Some(name), Some(size), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(fail("expected `.type <name> <size>`".to_string()));
            };
            let size = parse_number(size)
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| fail(format!("invalid type size `{}`", size)))?;
            builder
                .types_mut()
                .define(name, size)
                .map_err(|e| fail(e.to_string()))?;
            continue;
        }

        if let Some(name) = content.strip_suffix(':') {
            if !is_label(name) {
                return Err(fail(format!("invalid label `{}`", name)));
            }
            builder.label(name).map_err(|d| fail(d.to_string()))?;
            continue;
        }

        let (mnemonic, rest) = match content.find(char::is_whitespace) {
            Some(pos) => (&content[..pos], content[pos..].trim()),
            None => (content, ""),
        };
        let found = catalog
            .lookup(mnemonic)
            .ok_or_else(|| fail(format!("unknown instruction `{}`", mnemonic)))?;
        if found.deprecated {
            warn!(
                "line {}: `{}` is deprecated, use `{}`",
                line,
                mnemonic,
                found.kind.name()
            );
        }

        let desc = Catalog::descriptor(found.kind);
        let texts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(str::trim).collect()
        };
        if texts.len() != desc.params.len() {
            return Err(fail(format!(
                "`{}` takes {} arguments, got {}",
                desc.name(),
                desc.params.len(),
                texts.len()
            )));
        }

        let mut args = Vec::with_capacity(texts.len());
        for (param, text) in desc.params.iter().zip(texts) {
            let arg = Cursor::new(text, builder.types())
                .parse_arg(*param)
                .map_err(|message| fail(format!("`{}`: {}", text, message)))?;
            args.push(arg);
        }
        let inst = Inst::from_args(found.kind, args).map_err(|e| fail(e.to_string()))?;
        builder.push(inst).map_err(|d| fail(d.to_string()))?;
    }

    Ok(builder.finish())
}

fn is_label(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '.')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

/// Decimal, `$hex` or `0xhex`.
fn parse_number(text: &str) -> Option<u16> {
    if let Some(hex) = text.strip_prefix('$').or_else(|| text.strip_prefix("0x")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

/// Character cursor over one argument.
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
    types: &'a TypeRegistry,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str, types: &'a TypeRegistry) -> Self {
        Self { text, pos: 0, types }
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), String> {
        if !self.try_read(ch) {
            return Err(format!(
                "expected '{}' but found {:?}",
                ch,
                self.current_char()
            ));
        }
        Ok(())
    }

    fn finish<T>(&self, value: T) -> Result<T, String> {
        if self.pos != self.text.len() {
            return Err(format!("unexpected trailing `{}`", &self.text[self.pos..]));
        }
        Ok(value)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(ch) = self.current_char() {
            if !pred(ch) {
                break;
            }
            self.advance();
        }
        &self.text[start..self.pos]
    }

    fn read_identifier(&mut self) -> Result<&'a str, String> {
        let ident = self.take_while(|c| c.is_alphanumeric() || c == '_' || c == '.');
        if ident.is_empty() {
            return Err(format!("expected identifier but found {:?}", self.current_char()));
        }
        Ok(ident)
    }

    fn read_number(&mut self) -> Result<u16, String> {
        let start = self.pos;
        if self.try_read('$') {
            self.take_while(|c| c.is_ascii_hexdigit());
        } else {
            self.take_while(|c| c.is_ascii_alphanumeric());
        }
        let text = &self.text[start..self.pos];
        parse_number(text).ok_or_else(|| format!("invalid number `{}`", text))
    }

    fn read_byte(&mut self) -> Result<u8, String> {
        let n = self.read_number()?;
        u8::try_from(n).map_err(|_| format!("{} does not fit in a byte", n))
    }

    fn read_type(&mut self) -> Result<Type, String> {
        let start = self.pos;
        self.read_identifier()?;
        while self.try_read('*') {}
        let name = &self.text[start..self.pos];
        self.types.lookup(name).map_err(|e| e.to_string())
    }

    /// Optional `@n` size suffix.
    fn read_size(&mut self) -> Result<Option<u8>, String> {
        if self.try_read('@') {
            Ok(Some(self.read_byte()?))
        } else {
            Ok(None)
        }
    }

    /// `:T` with an optional `@n`.
    fn read_annotation(&mut self) -> Result<(Type, Option<u8>), String> {
        self.expect(':')?;
        let ty = self.read_type()?;
        let size = self.read_size()?;
        Ok((ty, size))
    }

    fn parse_arg(mut self, param: ParamKind) -> Result<Arg, String> {
        let arg = match param {
            ParamKind::Operand(_) => Arg::Operand(self.read_operand()?),
            ParamKind::Slot => {
                let ty = self.read_type()?;
                let size = match self.read_size()? {
                    Some(size) => size,
                    None => natural_size(self.types, ty)?,
                };
                Arg::Slot(StackSlot::new(ty, size))
            }
            ParamKind::Type => Arg::Type(self.read_type()?),
            ParamKind::Offset | ParamKind::Amount | ParamKind::Register => {
                Arg::Number(self.read_number()?)
            }
            ParamKind::Label => Arg::Label(self.read_identifier()?.to_string()),
        };
        self.finish(arg)
    }

    fn read_operand(&mut self) -> Result<Operand, String> {
        let c = |e: CompileError| e.to_string();
        match self.current_char() {
            Some('#') => {
                self.advance();
                let value = self.read_number()?;
                let (ty, size) = self.read_annotation()?;
                let size = match size {
                    Some(size) => size,
                    None => natural_size(self.types, ty)?,
                };
                Operand::constant(value, ty, size).map_err(c)
            }
            Some('$') => self.read_global(),
            Some('*') => {
                self.advance();
                let base = self.read_global()?;
                Operand::deref(self.types, base).map_err(c)
            }
            Some('[') => {
                self.advance();
                let base = self.read_operand()?;
                self.expect(']')?;
                self.expect('+')?;
                let offset = self.read_byte()?;
                let (ty, size) = self.read_annotation()?;
                let field = Operand::field(self.types, base, offset, ty).map_err(c)?;
                fixed_size(field, size)
            }
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                let label = self.read_identifier()?;
                self.expect('[')?;
                let index = if self.try_read('s') {
                    RomIndex::Stack
                } else {
                    RomIndex::Constant(self.read_byte()?)
                };
                self.expect(']')?;
                let (ty, size) = self.read_annotation()?;
                let element = Operand::rom_element(self.types, label, ty, index).map_err(c)?;
                fixed_size(element, size)
            }
            other => Err(format!("expected an operand but found {:?}", other)),
        }
    }

    fn read_global(&mut self) -> Result<Operand, String> {
        if self.current_char() != Some('$') {
            return Err(format!("expected a global address but found {:?}", self.current_char()));
        }
        let addr = self.read_number()?;
        let (ty, size) = self.read_annotation()?;
        Operand::global(self.types, addr, ty, size).map_err(|e| e.to_string())
    }
}

/// Fields and ROM elements take their size from the type; an `@n` may only restate it.
fn fixed_size(operand: Operand, size: Option<u8>) -> Result<Operand, String> {
    match size {
        Some(size) if size != operand.size() => Err(CompileError::unsupported_size(format!(
            "{}-byte access to a {}-byte {:?} operand",
            size,
            operand.size(),
            operand.kind()
        ))
        .to_string()),
        _ => Ok(operand),
    }
}

fn natural_size(types: &TypeRegistry, ty: Type) -> Result<u8, String> {
    if is_pointer(ty) {
        return Ok(crate::core::types::SHORT_POINTER_SIZE);
    }
    types.size_of(ty).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vil::InstKind;

    #[test]
    fn test_parse_basic_program() {
        let program = parse_program(
            "; add ten\n\
             pushGlobal $90:byte\n\
             pushConstant #10:byte\n\
             addFromStack byte, byte\n\
             popToGlobal $91:byte, byte\n\
             loop:\n\
             branch loop\n",
        )
        .unwrap();
        let kinds: Vec<_> = program.insts.iter().map(|i| i.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                InstKind::PushGlobal,
                InstKind::PushConstant,
                InstKind::AddFromStack,
                InstKind::PopToGlobal,
                InstKind::Label,
                InstKind::Branch
            ]
        );
    }

    #[test]
    fn test_parse_operand_forms() {
        let program = parse_program(
            ".type point 3\n\
             pushGlobal [$a0:point]+1:byte\n\
             pushGlobal [*$94:point*]+2:byte\n\
             pushGlobal *$96:byte*@2\n\
             pushGlobal DATA[3]:byte\n\
             pushGlobal DATA[s]:byte\n",
        )
        .unwrap();
        assert_eq!(program.len(), 5);
        match &program.insts[2] {
            Inst::PushGlobal {
                source: Operand::PointerDeref { pointer_size, .. },
            } => assert_eq!(*pointer_size, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(program.insts[4].stack_effect().unwrap().pop.len(), 1);
    }

    #[test]
    fn test_field_and_rom_sizes_come_from_the_type() {
        let err = parse_program(".type point 3\npushGlobal [$a0:point]+1:byte@2\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("Unsupported size"), "{}", err.message);

        let err = parse_program("pushGlobal DATA[2]:byte@2\n").unwrap_err();
        assert!(err.message.contains("Unsupported size"), "{}", err.message);

        let restated = parse_program(".type point 3\npushGlobal [$a0:point]+1:byte@1\n").unwrap();
        let natural = parse_program(".type point 3\npushGlobal [$a0:point]+1:byte\n").unwrap();
        assert_eq!(restated.insts, natural.insts);
    }

    #[test]
    fn test_deprecated_alias_is_canonicalised() {
        let program = parse_program("pushLocal $90:byte\npopToLocal $91:byte, byte\n").unwrap();
        assert_eq!(program.insts[0].kind(), InstKind::PushGlobal);
        assert_eq!(program.insts[1].kind(), InstKind::PopToGlobal);
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = parse_program("pushConstant #1:byte\nfrobnicate\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("frobnicate"));

        let err = parse_program("\n\naddFromStack byte@2, byte\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("UnsupportedSize"));
    }

    #[test]
    fn test_unknown_type() {
        let err = parse_program("pushGlobal $90:widget\n").unwrap_err();
        assert!(err.message.contains("Unknown type"));
    }

    #[test]
    fn test_register_index_out_of_range() {
        let err = parse_program("popToRegister 3, byte\n").unwrap_err();
        assert!(err.message.contains("Invalid register index"));
    }
}
