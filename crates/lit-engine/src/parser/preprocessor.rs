//! Text-level preprocessor.
//!
//! Runs before the scanner and understands a C-flavoured subset:
//! `#define NAME`, `#undef NAME`, `#ifdef NAME`, `#ifndef NAME`, `#else`,
//! `#endif`. Directives must be the first non-blank thing on their line.
//! Everything the pass removes (directives and untaken branches) is
//! overwritten with spaces so token line numbers keep matching the
//! original source.

use rustc_hash::FxHashSet;

use crate::errors::{CompileError, CompileErrorKind};

struct Branch {
    /// Whether the enclosing region was live when this `#ifdef` opened.
    parent_live: bool,
    /// Whether the currently selected branch is live.
    live: bool,
    seen_else: bool,
}

/// Preprocess `source` in place of the scanner's input. `defined` is the
/// persistent macro table; `#define`/`#undef` mutate it across runs.
pub fn preprocess(
    source: &str,
    defined: &mut FxHashSet<String>,
) -> Result<String, CompileError> {
    if !source.contains('#') {
        return Ok(source.to_string());
    }
    let mut out = String::with_capacity(source.len());
    let mut stack: Vec<Branch> = Vec::new();
    for (index, line) in source.split('\n').enumerate() {
        let live = stack.iter().all(|b| b.live && b.parent_live);
        let trimmed = line.trim_start();
        if let Some(directive) = trimmed.strip_prefix('#') {
            let mut words = directive.split_whitespace();
            let name = words.next().unwrap_or("");
            let arg = words.next();
            match (name, arg) {
                ("define", Some(arg)) => {
                    if live {
                        defined.insert(arg.to_string());
                    }
                }
                ("undef", Some(arg)) => {
                    if live {
                        defined.remove(arg);
                    }
                }
                ("ifdef", Some(arg)) => stack.push(Branch {
                    parent_live: live,
                    live: defined.contains(arg),
                    seen_else: false,
                }),
                ("ifndef", Some(arg)) => stack.push(Branch {
                    parent_live: live,
                    live: !defined.contains(arg),
                    seen_else: false,
                }),
                ("else", None) => match stack.last_mut() {
                    Some(branch) if !branch.seen_else => {
                        branch.seen_else = true;
                        branch.live = !branch.live;
                    }
                    _ => {
                        return Err(CompileError::new(CompileErrorKind::UnclosedMacro, index + 1))
                    }
                },
                ("endif", None) => {
                    if stack.pop().is_none() {
                        return Err(CompileError::new(CompileErrorKind::UnclosedMacro, index + 1));
                    }
                }
                _ => {
                    return Err(CompileError::new(
                        CompileErrorKind::UnknownMacro {
                            name: name.to_string(),
                        },
                        index + 1,
                    ))
                }
            }
            blank_line(&mut out, line);
        } else if live {
            out.push_str(line);
            out.push('\n');
        } else {
            blank_line(&mut out, line);
        }
    }
    if !stack.is_empty() {
        return Err(CompileError::new(CompileErrorKind::UnclosedMacro, 0));
    }
    // The loop appends one '\n' per split segment, which is one more than
    // the source had; trim it so the text stays byte-compatible.
    out.pop();
    Ok(out)
}

fn blank_line(out: &mut String, line: &str) {
    for _ in 0..line.len() {
        out.push(' ');
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> String {
        let mut defined = FxHashSet::default();
        preprocess(source, &mut defined).unwrap()
    }

    #[test]
    fn passthrough_without_directives() {
        assert_eq!(run("var a = 1\n"), "var a = 1\n");
    }

    #[test]
    fn ifdef_keeps_line_numbers() {
        let source = "#define DEBUG\n#ifdef DEBUG\nprint(1)\n#endif\nprint(2)\n";
        let cleaned = run(source);
        assert_eq!(cleaned.split('\n').count(), source.split('\n').count());
        assert!(cleaned.contains("print(1)"));
        assert!(cleaned.contains("print(2)"));
        assert!(!cleaned.contains("define"));
    }

    #[test]
    fn ifndef_and_else() {
        let cleaned = run("#ifdef MISSING\nprint(1)\n#else\nprint(2)\n#endif\n");
        assert!(!cleaned.contains("print(1)"));
        assert!(cleaned.contains("print(2)"));
    }

    #[test]
    fn nested_branches() {
        let source = "#define A\n#ifdef A\n#ifdef B\nx\n#endif\ny\n#endif\n";
        let cleaned = run(source);
        assert!(!cleaned.contains('x'));
        assert!(cleaned.contains('y'));
    }

    #[test]
    fn unclosed_macro_errors() {
        let mut defined = FxHashSet::default();
        let err = preprocess("#ifdef A\n", &mut defined).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnclosedMacro);
    }

    #[test]
    fn unknown_macro_errors() {
        let mut defined = FxHashSet::default();
        let err = preprocess("#include <x>\n", &mut defined).unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::UnknownMacro { .. }));
    }
}
