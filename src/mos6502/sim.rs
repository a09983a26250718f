// This module is a small reference executor for emitted statement lists. It models the
// parts of the 6502 the emitter relies on: 64 KiB of flat memory, the A, X and Y registers,
// the stack pointer over page one, and the carry, zero and negative flags, with binary-mode
// ADC/SBC. Labels inside the executed list are branch targets. A JMP to a label outside the
// list halts the run (the program left the code under test), a JSR to an unknown routine is
// treated as an external routine that returns immediately, and an RTS with no pending JSR
// halts as a return to the caller. Named symbols can be bound to addresses so ROM table
// accesses resolve. Tests and the catalog self-check use it to compare memory and stack
// contents across primitive and fused sequences and to measure stack pointer movement.

//! Reference 6502 executor.

use super::isa::{Address, Mnemonic, Mode, Statement};
use hashbrown::HashMap;
use thiserror::Error;

/// Upper bound on executed statements per run.
pub const STEP_LIMIT: usize = 100_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("branch to unknown label `{0}`")]
    UnknownLabel(String),

    #[error("unknown symbol `{0}`")]
    UnknownSymbol(String),

    #[error("step limit of {0} exceeded")]
    StepLimit(usize),

    #[error("{mnemonic} does not support this addressing mode")]
    InvalidMode { mnemonic: &'static str },
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// Ran past the last statement.
    End,
    /// Jumped to a label outside the program.
    Jump(String),
    /// Returned with no pending call.
    Return,
}

pub struct Machine {
    memory: Vec<u8>,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub carry: bool,
    pub zero: bool,
    pub negative: bool,
    symbols: HashMap<String, u16>,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            memory: vec![0; 0x1_0000],
            a: 0,
            x: 0,
            y: 0,
            sp: 0xff,
            carry: false,
            zero: false,
            negative: false,
            symbols: HashMap::new(),
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        self.memory[addr as usize]
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        self.memory[addr as usize] = value;
    }

    /// Little-endian 16-bit store.
    pub fn write_word(&mut self, addr: u16, value: u16) {
        self.write(addr, value as u8);
        self.write(addr.wrapping_add(1), (value >> 8) as u8);
    }

    pub fn read_word(&self, addr: u16) -> u16 {
        self.read(addr) as u16 | (self.read(addr.wrapping_add(1)) as u16) << 8
    }

    pub fn define_symbol(&mut self, name: &str, addr: u16) {
        self.symbols.insert(name.to_string(), addr);
    }

    /// Load `bytes` starting at `addr`.
    pub fn load(&mut self, addr: u16, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.write(addr.wrapping_add(i as u16), *byte);
        }
    }

    pub fn push(&mut self, value: u8) {
        self.write(0x0100 | self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    pub fn pull(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        self.read(0x0100 | self.sp as u16)
    }

    /// Bytes currently on the stack, deepest first.
    pub fn stack(&self) -> Vec<u8> {
        ((self.sp as u16 + 1)..=0xff)
            .rev()
            .map(|offset| self.read(0x0100 | offset))
            .collect()
    }

    /// Contents of RAM below the stack page and in `$0200..$0800`.
    pub fn ram(&self) -> Vec<u8> {
        let mut ram = self.memory[..0x100].to_vec();
        ram.extend_from_slice(&self.memory[0x200..0x800]);
        ram
    }

    fn set_nz(&mut self, value: u8) {
        self.zero = value == 0;
        self.negative = value & 0x80 != 0;
    }

    fn resolve(&self, addr: &Address) -> Result<u16, SimError> {
        match addr {
            Address::Numeric(addr) => Ok(*addr),
            Address::Symbol { label, offset } => self
                .symbols
                .get(label)
                .map(|base| base.wrapping_add(*offset))
                .ok_or_else(|| SimError::UnknownSymbol(label.clone())),
        }
    }

    /// Effective address of a memory operand.
    fn effective(&self, mnemonic: Mnemonic, mode: &Mode) -> Result<u16, SimError> {
        match mode {
            Mode::Direct(addr) => self.resolve(addr),
            Mode::IndexedX(addr) => {
                let base = self.resolve(addr)?;
                if addr.is_zero_page() {
                    Ok((base as u8).wrapping_add(self.x) as u16)
                } else {
                    Ok(base.wrapping_add(self.x as u16))
                }
            }
            Mode::IndexedY(addr) => Ok(self.resolve(addr)?.wrapping_add(self.y as u16)),
            Mode::IndirectY(zp) => {
                let lo = self.read(*zp as u16) as u16;
                let hi = self.read(zp.wrapping_add(1) as u16) as u16;
                Ok((hi << 8 | lo).wrapping_add(self.y as u16))
            }
            _ => Err(SimError::InvalidMode {
                mnemonic: mnemonic.as_str(),
            }),
        }
    }

    fn operand(&self, mnemonic: Mnemonic, mode: &Mode) -> Result<u8, SimError> {
        match mode {
            Mode::Immediate(value) => Ok(*value),
            mode => Ok(self.read(self.effective(mnemonic, mode)?)),
        }
    }

    /// Execute `statements` from the first one until a halt.
    pub fn run(&mut self, statements: &[Statement]) -> Result<Halt, SimError> {
        let labels: HashMap<&str, usize> = statements
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Statement::Label(name) => Some((name.as_str(), i)),
                _ => None,
            })
            .collect();

        let mut pc = 0;
        let mut depth = 0usize;
        let mut steps = 0;
        while pc < statements.len() {
            steps += 1;
            if steps > STEP_LIMIT {
                return Err(SimError::StepLimit(STEP_LIMIT));
            }
            let (mnemonic, mode) = match &statements[pc] {
                Statement::Op { mnemonic, mode } => (*mnemonic, mode),
                Statement::Label(_) | Statement::Comment(_) => {
                    pc += 1;
                    continue;
                }
            };
            pc += 1;

            match mnemonic {
                Mnemonic::Lda => {
                    self.a = self.operand(mnemonic, mode)?;
                    self.set_nz(self.a);
                }
                Mnemonic::Ldx => {
                    self.x = self.operand(mnemonic, mode)?;
                    self.set_nz(self.x);
                }
                Mnemonic::Ldy => {
                    self.y = self.operand(mnemonic, mode)?;
                    self.set_nz(self.y);
                }
                Mnemonic::Sta | Mnemonic::Stx | Mnemonic::Sty => {
                    let addr = self.effective(mnemonic, mode)?;
                    let value = match mnemonic {
                        Mnemonic::Sta => self.a,
                        Mnemonic::Stx => self.x,
                        _ => self.y,
                    };
                    self.write(addr, value);
                }
                Mnemonic::Pha => self.push(self.a),
                Mnemonic::Pla => {
                    self.a = self.pull();
                    self.set_nz(self.a);
                }
                Mnemonic::Tax => {
                    self.x = self.a;
                    self.set_nz(self.x);
                }
                Mnemonic::Tay => {
                    self.y = self.a;
                    self.set_nz(self.y);
                }
                Mnemonic::Txa => {
                    self.a = self.x;
                    self.set_nz(self.a);
                }
                Mnemonic::Tsx => {
                    self.x = self.sp;
                    self.set_nz(self.x);
                }
                Mnemonic::Clc => self.carry = false,
                Mnemonic::Sec => self.carry = true,
                Mnemonic::Adc => {
                    let m = self.operand(mnemonic, mode)?;
                    let sum = self.a as u16 + m as u16 + self.carry as u16;
                    self.carry = sum > 0xff;
                    self.a = sum as u8;
                    self.set_nz(self.a);
                }
                Mnemonic::Sbc => {
                    let m = self.operand(mnemonic, mode)?;
                    let diff = self.a as i16 - m as i16 - (!self.carry) as i16;
                    self.carry = diff >= 0;
                    self.a = diff as u8;
                    self.set_nz(self.a);
                }
                Mnemonic::Ora => {
                    self.a |= self.operand(mnemonic, mode)?;
                    self.set_nz(self.a);
                }
                Mnemonic::Cmp => {
                    let m = self.operand(mnemonic, mode)?;
                    self.carry = self.a >= m;
                    self.set_nz(self.a.wrapping_sub(m));
                }
                Mnemonic::Inc | Mnemonic::Dec => {
                    let addr = self.effective(mnemonic, mode)?;
                    let value = if mnemonic == Mnemonic::Inc {
                        self.read(addr).wrapping_add(1)
                    } else {
                        self.read(addr).wrapping_sub(1)
                    };
                    self.write(addr, value);
                    self.set_nz(value);
                }
                Mnemonic::Beq | Mnemonic::Bne | Mnemonic::Bcs | Mnemonic::Bcc => {
                    let taken = match mnemonic {
                        Mnemonic::Beq => self.zero,
                        Mnemonic::Bne => !self.zero,
                        Mnemonic::Bcs => self.carry,
                        _ => !self.carry,
                    };
                    if taken {
                        let label = target(mnemonic, mode)?;
                        pc = *labels
                            .get(label)
                            .ok_or_else(|| SimError::UnknownLabel(label.to_string()))?;
                    }
                }
                Mnemonic::Jmp => {
                    let label = target(mnemonic, mode)?;
                    match labels.get(label) {
                        Some(index) => pc = *index,
                        None => return Ok(Halt::Jump(label.to_string())),
                    }
                }
                Mnemonic::Jsr => {
                    let label = target(mnemonic, mode)?;
                    if let Some(index) = labels.get(label) {
                        let ret = pc as u16;
                        self.push((ret >> 8) as u8);
                        self.push(ret as u8);
                        depth += 1;
                        pc = *index;
                    }
                }
                Mnemonic::Rts => {
                    if depth == 0 {
                        return Ok(Halt::Return);
                    }
                    depth -= 1;
                    let lo = self.pull() as usize;
                    let hi = self.pull() as usize;
                    pc = hi << 8 | lo;
                }
                Mnemonic::Nop => {}
            }
        }
        Ok(Halt::End)
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

fn target(mnemonic: Mnemonic, mode: &Mode) -> Result<&str, SimError> {
    match mode {
        Mode::Target(label) => Ok(label),
        _ => Err(SimError::InvalidMode {
            mnemonic: mnemonic.as_str(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_push_pull() {
        let mut m = Machine::new();
        m.push(1);
        m.push(2);
        assert_eq!(m.stack(), vec![1, 2]);
        assert_eq!(m.pull(), 2);
        assert_eq!(m.sp, 0xfe);
    }

    #[test]
    fn test_adc_sets_carry() {
        let mut m = Machine::new();
        let program = vec![
            Statement::imm(Mnemonic::Lda, 0xf0),
            Statement::implied(Mnemonic::Clc),
            Statement::imm(Mnemonic::Adc, 0x20),
            Statement::direct(Mnemonic::Sta, 0x90),
        ];
        assert_eq!(m.run(&program).unwrap(), Halt::End);
        assert_eq!(m.read(0x90), 0x10);
        assert!(m.carry);
    }

    #[test]
    fn test_sbc_borrow() {
        let mut m = Machine::new();
        let program = vec![
            Statement::imm(Mnemonic::Lda, 3),
            Statement::implied(Mnemonic::Sec),
            Statement::imm(Mnemonic::Sbc, 5),
        ];
        m.run(&program).unwrap();
        assert_eq!(m.a, 0xfe);
        assert!(!m.carry);
    }

    #[test]
    fn test_jump_outside_halts() {
        let mut m = Machine::new();
        let program = vec![
            Statement::target(Mnemonic::Jmp, "skip"),
            Statement::imm(Mnemonic::Lda, 1),
            Statement::Label("skip".to_string()),
            Statement::target(Mnemonic::Jmp, "elsewhere"),
        ];
        assert_eq!(m.run(&program).unwrap(), Halt::Jump("elsewhere".to_string()));
        assert_eq!(m.a, 0);
    }

    #[test]
    fn test_call_and_return() {
        let mut m = Machine::new();
        let program = vec![
            Statement::target(Mnemonic::Jsr, "routine"),
            Statement::target(Mnemonic::Jsr, "external"),
            Statement::target(Mnemonic::Jmp, "done"),
            Statement::Label("routine".to_string()),
            Statement::imm(Mnemonic::Lda, 9),
            Statement::implied(Mnemonic::Rts),
            Statement::Label("done".to_string()),
            Statement::implied(Mnemonic::Rts),
        ];
        assert_eq!(m.run(&program).unwrap(), Halt::Return);
        assert_eq!(m.a, 9);
        assert_eq!(m.sp, 0xff);
    }

    #[test]
    fn test_indirect_y() {
        let mut m = Machine::new();
        m.write_word(0x80, 0x0300);
        m.write(0x0302, 0x42);
        let program = vec![
            Statement::imm(Mnemonic::Ldy, 2),
            Statement::op(Mnemonic::Lda, Mode::IndirectY(0x80)),
        ];
        m.run(&program).unwrap();
        assert_eq!(m.a, 0x42);
    }

    #[test]
    fn test_unknown_symbol() {
        let mut m = Machine::new();
        let program = vec![Statement::op(
            Mnemonic::Lda,
            Mode::Direct(Address::Symbol {
                label: "DATA".to_string(),
                offset: 0,
            }),
        )];
        assert_eq!(
            m.run(&program).unwrap_err(),
            SimError::UnknownSymbol("DATA".to_string())
        );
    }
}
