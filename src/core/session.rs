// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession is the hub for a single program's compilation: it owns a reference to
// the arena that backs the fusion engine's per-pass instruction buffers and collects
// statistics. Statistics live behind a RefCell so every stage can record through a shared
// reference. SessionStats counts instructions before and after fusion, fusion passes,
// rewrites per rule, statements emitted and the encoded ROM size of the output, and renders
// as a short report for the command line.

//! Arena-based compilation session management.
//!
//! All per-program scratch data shares the session lifetime, so passes can
//! hand out arena-backed buffers without lifetime plumbing.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for per-pass buffers.
    arena: &'arena Bump,

    stats: RefCell<SessionStats>,
}

impl<'arena> CompilationSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Record the instruction count of the program as it entered the pipeline.
    pub fn record_program_in(&self, instructions: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.programs_compiled += 1;
        stats.instructions_in += instructions;
    }

    /// Record the instruction count after fusion.
    pub fn record_program_out(&self, instructions: usize) {
        self.stats.borrow_mut().instructions_out += instructions;
    }

    pub fn record_pass(&self) {
        self.stats.borrow_mut().fusion_passes += 1;
    }

    /// Record that the fusion rule `rule` fired once.
    pub fn record_rewrite(&self, rule: &'static str) {
        let mut stats = self.stats.borrow_mut();
        stats.rewrites += 1;
        *stats.rewrites_per_rule.entry(rule).or_insert(0) += 1;
    }

    pub fn record_emitted(&self, statements: usize, rom_bytes: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.statements_emitted += statements;
        stats.rom_bytes += rom_bytes;
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub programs_compiled: usize,

    /// Instructions before fusion.
    pub instructions_in: usize,

    /// Instructions after fusion.
    pub instructions_out: usize,

    pub fusion_passes: usize,

    pub rewrites: usize,

    /// Rewrites keyed by rule name.
    pub rewrites_per_rule: HashMap<&'static str, usize>,

    pub statements_emitted: usize,

    /// Encoded size of the emitted statements.
    pub rom_bytes: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Programs compiled: {}", self.programs_compiled)?;
        writeln!(f, "  Instructions in: {}", self.instructions_in)?;
        writeln!(f, "  Instructions out: {}", self.instructions_out)?;
        writeln!(f, "  Fusion passes: {}", self.fusion_passes)?;
        writeln!(f, "  Rewrites: {}", self.rewrites)?;
        writeln!(f, "  Statements emitted: {}", self.statements_emitted)?;
        writeln!(f, "  ROM bytes: {}", self.rom_bytes)?;

        if !self.rewrites_per_rule.is_empty() {
            writeln!(f, "  Rewrite breakdown:")?;
            let mut sorted: Vec<_> = self.rewrites_per_rule.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

            for (rule, count) in sorted {
                writeln!(f, "    {}: {}", rule, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_session_creation() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let stats = session.stats();
        assert_eq!(stats.programs_compiled, 0);
        assert_eq!(stats.rewrites, 0);
        assert!(stats.rewrites_per_rule.is_empty());
    }

    #[test]
    fn test_session_statistics() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        session.record_program_in(4);
        session.record_pass();
        session.record_pass();
        session.record_rewrite("add_global_constant");
        session.record_rewrite("add_global_constant_to_global");
        session.record_rewrite("add_global_constant");
        session.record_program_out(1);
        session.record_emitted(4, 7);

        let stats = session.stats();
        assert_eq!(stats.instructions_in, 4);
        assert_eq!(stats.instructions_out, 1);
        assert_eq!(stats.fusion_passes, 2);
        assert_eq!(stats.rewrites, 3);
        assert_eq!(stats.rewrites_per_rule["add_global_constant"], 2);
        assert_eq!(stats.rom_bytes, 7);
    }

    #[test]
    fn test_statistics_display() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        session.record_program_in(3);
        session.record_rewrite("copy_global_to_global");

        let output = format!("{}", session.stats());
        assert!(output.contains("Instructions in: 3"));
        assert!(output.contains("copy_global_to_global: 1"));
    }
}
