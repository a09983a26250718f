// This module models the target statements the emitter produces: a 6502 mnemonic with a
// resolved addressing mode, a local label, or a comment. Addresses are either numeric or
// symbolic (a label plus a constant offset, used for ROM tables), and zero-page numeric
// addresses are kept distinct from absolute ones so that rendering and encoded sizes match
// what the assembler will pick. Statements render in 64tass syntax, and encoded_len gives the
// byte size of each statement in ROM, which the fusion engine uses as its cost measure.

//! 6502 statement model.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Lda,
    Ldx,
    Ldy,
    Sta,
    Stx,
    Sty,
    Pha,
    Pla,
    Tax,
    Tay,
    Txa,
    Tsx,
    Clc,
    Sec,
    Adc,
    Sbc,
    Ora,
    Cmp,
    Inc,
    Dec,
    Beq,
    Bne,
    Bcs,
    Bcc,
    Jmp,
    Jsr,
    Rts,
    Nop,
}

impl Mnemonic {
    pub fn as_str(self) -> &'static str {
        match self {
            Mnemonic::Lda => "LDA",
            Mnemonic::Ldx => "LDX",
            Mnemonic::Ldy => "LDY",
            Mnemonic::Sta => "STA",
            Mnemonic::Stx => "STX",
            Mnemonic::Sty => "STY",
            Mnemonic::Pha => "PHA",
            Mnemonic::Pla => "PLA",
            Mnemonic::Tax => "TAX",
            Mnemonic::Tay => "TAY",
            Mnemonic::Txa => "TXA",
            Mnemonic::Tsx => "TSX",
            Mnemonic::Clc => "CLC",
            Mnemonic::Sec => "SEC",
            Mnemonic::Adc => "ADC",
            Mnemonic::Sbc => "SBC",
            Mnemonic::Ora => "ORA",
            Mnemonic::Cmp => "CMP",
            Mnemonic::Inc => "INC",
            Mnemonic::Dec => "DEC",
            Mnemonic::Beq => "BEQ",
            Mnemonic::Bne => "BNE",
            Mnemonic::Bcs => "BCS",
            Mnemonic::Bcc => "BCC",
            Mnemonic::Jmp => "JMP",
            Mnemonic::Jsr => "JSR",
            Mnemonic::Rts => "RTS",
            Mnemonic::Nop => "NOP",
        }
    }

    pub fn is_relative_branch(self) -> bool {
        matches!(
            self,
            Mnemonic::Beq | Mnemonic::Bne | Mnemonic::Bcs | Mnemonic::Bcc
        )
    }
}

/// A memory address, numeric or relative to a label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Numeric(u16),
    Symbol { label: String, offset: u16 },
}

impl Address {
    pub fn numeric(&self) -> Option<u16> {
        match self {
            Address::Numeric(addr) => Some(*addr),
            Address::Symbol { .. } => None,
        }
    }

    /// Whether zero-page addressing applies.
    pub fn is_zero_page(&self) -> bool {
        matches!(self, Address::Numeric(addr) if *addr < 0x100)
    }

    /// The address `delta` bytes further on.
    pub fn offset(&self, delta: u16) -> Address {
        match self {
            Address::Numeric(addr) => Address::Numeric(addr.wrapping_add(delta)),
            Address::Symbol { label, offset } => Address::Symbol {
                label: label.clone(),
                offset: offset.wrapping_add(delta),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Mode {
    Implied,
    Immediate(u8),
    /// Zero-page or absolute, chosen from the address.
    Direct(Address),
    /// `addr,X`.
    IndexedX(Address),
    /// `addr,Y`.
    IndexedY(Address),
    /// `(zp),Y`.
    IndirectY(u8),
    /// Branch or jump target.
    Target(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Statement {
    Op { mnemonic: Mnemonic, mode: Mode },
    Label(String),
    Comment(String),
}

impl Statement {
    pub fn op(mnemonic: Mnemonic, mode: Mode) -> Self {
        Statement::Op { mnemonic, mode }
    }

    pub fn implied(mnemonic: Mnemonic) -> Self {
        Statement::op(mnemonic, Mode::Implied)
    }

    pub fn imm(mnemonic: Mnemonic, value: u8) -> Self {
        Statement::op(mnemonic, Mode::Immediate(value))
    }

    pub fn direct(mnemonic: Mnemonic, addr: u16) -> Self {
        Statement::op(mnemonic, Mode::Direct(Address::Numeric(addr)))
    }

    pub fn target(mnemonic: Mnemonic, label: impl Into<String>) -> Self {
        Statement::op(mnemonic, Mode::Target(label.into()))
    }

    /// Size in bytes once assembled.
    pub fn encoded_len(&self) -> usize {
        match self {
            Statement::Label(_) | Statement::Comment(_) => 0,
            Statement::Op { mnemonic, mode } => match mode {
                Mode::Implied => 1,
                Mode::Immediate(_) | Mode::IndirectY(_) => 2,
                Mode::Direct(addr) | Mode::IndexedX(addr) => {
                    if addr.is_zero_page() {
                        2
                    } else {
                        3
                    }
                }
                Mode::IndexedY(_) => 3,
                Mode::Target(_) => {
                    if mnemonic.is_relative_branch() {
                        2
                    } else {
                        3
                    }
                }
            },
        }
    }
}

/// Total encoded size of a statement list.
pub fn encoded_len(statements: &[Statement]) -> usize {
    statements.iter().map(Statement::encoded_len).sum()
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Numeric(addr) if *addr < 0x100 => write!(f, "${:02X}", addr),
            Address::Numeric(addr) => write!(f, "${:04X}", addr),
            Address::Symbol { label, offset: 0 } => write!(f, "{}", label),
            Address::Symbol { label, offset } => write!(f, "{}+{}", label, offset),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Implied => Ok(()),
            Mode::Immediate(value) => write!(f, "#${:02X}", value),
            Mode::Direct(addr) => write!(f, "{}", addr),
            Mode::IndexedX(addr) => write!(f, "{},X", addr),
            Mode::IndexedY(addr) => write!(f, "{},Y", addr),
            Mode::IndirectY(zp) => write!(f, "(${:02X}),Y", zp),
            Mode::Target(label) => write!(f, "{}", label),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Op {
                mnemonic,
                mode: Mode::Implied,
            } => write!(f, "\t{}", mnemonic.as_str()),
            Statement::Op { mnemonic, mode } => write!(f, "\t{} {}", mnemonic.as_str(), mode),
            Statement::Label(name) => write!(f, "{}", name),
            Statement::Comment(text) => write!(f, "\t; {}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_64tass_syntax() {
        assert_eq!(Statement::imm(Mnemonic::Lda, 10).to_string(), "\tLDA #$0A");
        assert_eq!(Statement::direct(Mnemonic::Sta, 0x90).to_string(), "\tSTA $90");
        assert_eq!(Statement::direct(Mnemonic::Sta, 0x0290).to_string(), "\tSTA $0290");
        assert_eq!(
            Statement::op(Mnemonic::Lda, Mode::IndexedX(Address::Numeric(2))).to_string(),
            "\tLDA $02,X"
        );
        assert_eq!(
            Statement::op(Mnemonic::Lda, Mode::IndirectY(0x80)).to_string(),
            "\tLDA ($80),Y"
        );
        let rom = Address::Symbol {
            label: "DATA".to_string(),
            offset: 3,
        };
        assert_eq!(
            Statement::op(Mnemonic::Lda, Mode::Direct(rom)).to_string(),
            "\tLDA DATA+3"
        );
        assert_eq!(Statement::implied(Mnemonic::Pha).to_string(), "\tPHA");
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(Statement::implied(Mnemonic::Pla).encoded_len(), 1);
        assert_eq!(Statement::direct(Mnemonic::Inc, 0x90).encoded_len(), 2);
        assert_eq!(Statement::direct(Mnemonic::Inc, 0x0290).encoded_len(), 3);
        assert_eq!(Statement::target(Mnemonic::Beq, "x").encoded_len(), 2);
        assert_eq!(Statement::target(Mnemonic::Jmp, "x").encoded_len(), 3);
        assert_eq!(Statement::Label("x".to_string()).encoded_len(), 0);
    }
}
