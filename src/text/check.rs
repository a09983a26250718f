// This module implements the FileCheck-style harness behind the file-based tests. A test
// file is ordinary VIL source whose comment lines carry directives: `; RUN:` lines name the
// options to compile with, and `; CHECK:`, `; CHECK-LABEL:`, `; CHECK-NEXT:`,
// `; CHECK-EMPTY` and `; COM:` lines describe the expected output. The runner parses the
// remaining source, compiles it once per RUN line and matches the produced assembly (plus
// the fused VIL when asked) against the directives in order. A RUN line whose command is
// `not` expects compilation to fail, in which case the error text is the output.

//! FileCheck-style test validation for VIL files.

use super::parser::parse_program;
use super::printer::print_insts;
use crate::compiler::{CompileOptions, Compiler};
use crate::core::session::CompilationSession;
use bumpalo::Bump;

/// A CHECK directive extracted from a VIL file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDirective {
    /// CHECK: pattern - Match on this or a later line
    Check(String),
    /// CHECK-LABEL: pattern - Label for a section
    CheckLabel(String),
    /// CHECK-NEXT: pattern - Match on the next line
    CheckNext(String),
    /// CHECK-EMPTY - Match empty line
    CheckEmpty,
    /// COM: comment - Comment, ignored
    Comment(String),
}

/// A RUN directive specifying how to compile the test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirective {
    pub command: String,
    pub args: Vec<String>,
}

impl RunDirective {
    pub fn expects_failure(&self) -> bool {
        self.command == "not"
    }
}

/// Test specification extracted from a VIL file.
#[derive(Debug)]
pub struct TestSpec {
    pub run_directives: Vec<RunDirective>,
    pub check_directives: Vec<CheckDirective>,
    pub vil_content: String,
}

impl TestSpec {
    /// Split a VIL file into directives and source.
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut run_directives = Vec::new();
        let mut check_directives = Vec::new();
        let mut vil_lines = Vec::new();

        for line in content.lines() {
            let trimmed = line.trim();

            if let Some(run_cmd) = trimmed.strip_prefix("; RUN:") {
                let parts: Vec<&str> = run_cmd.split_whitespace().collect();
                let Some((command, args)) = parts.split_first() else {
                    return Err("empty RUN directive".to_string());
                };
                run_directives.push(RunDirective {
                    command: command.to_string(),
                    args: args.iter().map(|s| s.to_string()).collect(),
                });
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-LABEL:") {
                check_directives.push(CheckDirective::CheckLabel(pattern.trim().to_string()));
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK-NEXT:") {
                check_directives.push(CheckDirective::CheckNext(pattern.trim().to_string()));
            } else if trimmed.starts_with("; CHECK-EMPTY") {
                check_directives.push(CheckDirective::CheckEmpty);
            } else if let Some(pattern) = trimmed.strip_prefix("; CHECK:") {
                check_directives.push(CheckDirective::Check(pattern.trim().to_string()));
            } else if let Some(comment) = trimmed.strip_prefix("; COM:") {
                check_directives.push(CheckDirective::Comment(comment.trim().to_string()));
            } else {
                vil_lines.push(line);
            }
        }

        if run_directives.is_empty() {
            return Err("no RUN directive".to_string());
        }

        Ok(TestSpec {
            run_directives,
            check_directives,
            vil_content: vil_lines.join("\n"),
        })
    }
}

/// Test runner that compiles VIL tests and validates their output.
pub struct TestRunner {
    verbose: bool,
}

impl TestRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Run every RUN line of `spec` and check its output.
    pub fn run_test(&self, spec: &TestSpec) -> Result<(), String> {
        for run_dir in &spec.run_directives {
            let output = self.execute_command(&spec.vil_content, run_dir)?;
            self.validate_output(&output, &spec.check_directives)?;
        }
        Ok(())
    }

    /// Compile `source` as `run_dir` asks and return the text to check.
    fn execute_command(&self, source: &str, run_dir: &RunDirective) -> Result<String, String> {
        let mut options = CompileOptions::default();
        let mut print_vil = false;
        for arg in &run_dir.args {
            match arg.as_str() {
                "--no-fuse" => options.fuse = false,
                "--annotate" => options.annotate = true,
                "--print-vil" => print_vil = true,
                "%s" | "vilc" => {}
                other => return Err(format!("unknown RUN argument `{}`", other)),
            }
        }

        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let result = parse_program(source)
            .map_err(|e| e.to_string())
            .and_then(|program| {
                Compiler::new(&session, options)
                    .compile(&program)
                    .map(|output| (program, output))
                    .map_err(|d| d.to_string())
            });

        match (result, run_dir.expects_failure()) {
            (Ok((program, output)), false) => {
                let mut text = String::new();
                if print_vil {
                    text.push_str(&print_insts(&program.types, &output.insts));
                }
                text.push_str(&output.asm());
                Ok(text)
            }
            (Err(message), true) => {
                if self.verbose {
                    println!("expected failure: {}", message);
                }
                Ok(message)
            }
            (Ok(_), true) => Err("expected compilation to fail, but it succeeded".to_string()),
            (Err(message), false) => Err(format!("compilation failed: {}", message)),
        }
    }

    /// Validate output against CHECK directives.
    pub fn validate_output(
        &self,
        output: &str,
        directives: &[CheckDirective],
    ) -> Result<(), String> {
        let output_lines: Vec<_> = output.lines().collect();
        let mut line_idx = 0;

        for directive in directives {
            match directive {
                CheckDirective::Comment(_) => continue,

                CheckDirective::Check(pattern) | CheckDirective::CheckLabel(pattern) => {
                    let found = output_lines
                        .iter()
                        .skip(line_idx)
                        .position(|line| line.contains(pattern.as_str()));
                    let Some(idx) = found else {
                        return Err(format!("CHECK: pattern '{}' not found in output", pattern));
                    };
                    line_idx += idx + 1;
                    if self.verbose {
                        println!("CHECK: '{}' found at line {}", pattern, line_idx - 1);
                    }
                }

                CheckDirective::CheckNext(pattern) => {
                    let Some(line) = output_lines.get(line_idx) else {
                        return Err(format!("CHECK-NEXT: no more lines, expected '{}'", pattern));
                    };
                    if !line.contains(pattern.as_str()) {
                        return Err(format!(
                            "CHECK-NEXT: expected '{}' but got '{}'",
                            pattern, line
                        ));
                    }
                    if self.verbose {
                        println!("CHECK-NEXT: '{}' matches at line {}", pattern, line_idx);
                    }
                    line_idx += 1;
                }

                CheckDirective::CheckEmpty => {
                    // End of output counts as empty.
                    if let Some(line) = output_lines.get(line_idx) {
                        if !line.trim().is_empty() {
                            return Err(format!(
                                "CHECK-EMPTY: expected empty line but got '{}'",
                                line
                            ));
                        }
                    }
                    line_idx += 1;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directives() {
        let content = "; RUN: vilc --no-fuse %s
; CHECK: LDA $90
; CHECK-NEXT: PHA
; COM: the stack form
pushGlobal $90:byte
popStack byte";

        let spec = TestSpec::parse(content).unwrap();
        assert_eq!(spec.run_directives.len(), 1);
        assert!(!spec.run_directives[0].expects_failure());
        assert_eq!(spec.check_directives.len(), 3);
        assert!(spec.vil_content.contains("pushGlobal"));
        assert!(!spec.vil_content.contains("RUN"));
    }

    #[test]
    fn test_missing_run_is_rejected() {
        assert!(TestSpec::parse("pushGlobal $90:byte\n").is_err());
    }

    #[test]
    fn test_check_matching() {
        let runner = TestRunner::new(false);
        let output = "\tLDA $90\n\tPHA\n\n";
        let directives = vec![
            CheckDirective::Check("LDA $90".to_string()),
            CheckDirective::CheckNext("PHA".to_string()),
            CheckDirective::CheckEmpty,
        ];
        assert!(runner.validate_output(output, &directives).is_ok());

        let directives = vec![
            CheckDirective::Check("PHA".to_string()),
            CheckDirective::CheckNext("LDA".to_string()),
        ];
        assert!(runner.validate_output(output, &directives).is_err());
    }

    #[test]
    fn test_run_compiles_and_checks() {
        let spec = TestSpec::parse(
            "; RUN: vilc %s
; CHECK: INC $90
; CHECK-EMPTY
pushGlobal $90:byte
pushConstant #1:byte
addFromStack byte, byte
popToGlobal $90:byte, byte",
        )
        .unwrap();
        TestRunner::new(false).run_test(&spec).unwrap();
    }

    #[test]
    fn test_expected_failure_checks_message() {
        let spec = TestSpec::parse(
            "; RUN: not vilc %s
; CHECK: Unknown type
pushGlobal $90:widget",
        )
        .unwrap();
        TestRunner::new(false).run_test(&spec).unwrap();

        let spec = TestSpec::parse("; RUN: not vilc %s\npushGlobal $90:byte\npopStack byte").unwrap();
        assert!(TestRunner::new(false).run_test(&spec).is_err());
    }
}
