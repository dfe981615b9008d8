//! Call-stack capture and reduction.
//!
//! A captured stack arrives most-recent-frame-first. Reduction reverses
//! it so the chain reads oldest-caller-first, drops frames that belong to
//! vendored code (or carry no file information), and renders the rest as
//! an indented tree rooted at the per-query trace id. The innermost
//! retained frame doubles as a one-line summary of where in application
//! code the query was issued.

use anyhow::{Context, Result};
use regex::Regex;

/// How a function was entered, rendered as the glyph between the owner
/// and the function name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallType {
    /// Instance method (`->`).
    Method,
    /// Associated function or namespaced call (`::`).
    #[default]
    Static,
    /// Free function, no owner prefix.
    Function,
}

impl CallType {
    pub fn glyph(&self) -> &'static str {
        match self {
            CallType::Method => "->",
            CallType::Static => "::",
            CallType::Function => "",
        }
    }
}

/// One frame of a captured call stack.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackFrame {
    /// Owning type or module path, empty for free functions.
    pub owner: String,
    pub call_type: CallType,
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl StackFrame {
    /// `owner` + glyph + `function`, with ` at <file>@<line>` appended
    /// when known.
    pub fn label(&self) -> String {
        let mut label = format!("{}{}{}", self.owner, self.call_type.glyph(), self.function);
        if let Some(file) = &self.file {
            label.push_str(" at ");
            label.push_str(file);
            if let Some(line) = self.line {
                label.push_str(&format!("@{line}"));
            }
        }
        label
    }
}

/// The rendered call chain for one traced query.
#[derive(Debug, Clone, Default)]
pub struct ReducedTrace {
    /// Multi-line block ready for the chain sink. Empty when no frame
    /// survived reduction.
    pub block: String,
    /// Label of the most proximate retained frame.
    pub summary: String,
}

impl ReducedTrace {
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }
}

/// Indentation of the first child line under the `[id]` root line.
const CHAIN_BASE_INDENT: usize = 12;

pub struct StackReducer {
    vendor: Regex,
}

impl StackReducer {
    /// `vendor_pattern` is matched against each frame's file path; matching
    /// frames are dropped from the chain.
    pub fn new(vendor_pattern: &str) -> Result<Self> {
        let vendor = Regex::new(vendor_pattern)
            .with_context(|| format!("Invalid vendor frame pattern: '{vendor_pattern}'"))?;
        Ok(StackReducer { vendor })
    }

    /// Reduce a captured stack to its renderable chain.
    ///
    /// Never fails: an empty or fully-vendored stack yields an empty trace.
    pub fn reduce(&self, frames: &[StackFrame], sql_trace_id: &str) -> ReducedTrace {
        let mut block = String::new();
        let mut summary = String::new();
        let mut indent = CHAIN_BASE_INDENT;
        let mut first = true;

        for frame in frames.iter().rev() {
            let Some(file) = &frame.file else {
                continue;
            };
            if self.vendor.is_match(file) {
                continue;
            }
            let label = frame.label();
            if first {
                block.push_str(&format!("[{sql_trace_id}] {label}\n"));
                first = false;
            } else {
                block.push_str(&format!("{:indent$}└── {label}\n", ""));
                indent += 1;
            }
            summary = label;
        }

        ReducedTrace { block, summary }
    }
}

/// Source of the current call stack, bounded to a maximum depth.
///
/// The listener captures through this seam so tests can supply synthetic
/// frames.
pub trait StackSource: Send {
    fn capture(&self, max_depth: usize) -> Vec<StackFrame>;
}

/// Captures the live call stack of the current thread.
#[derive(Debug, Default)]
pub struct BacktraceSource;

impl StackSource for BacktraceSource {
    fn capture(&self, max_depth: usize) -> Vec<StackFrame> {
        let mut frames = Vec::new();
        backtrace::trace(|frame| {
            backtrace::resolve_frame(frame, |symbol| {
                // A single frame can resolve to several inlined symbols, so
                // the depth bound is enforced here as well.
                if frames.len() >= max_depth {
                    return;
                }
                let name = symbol
                    .name()
                    .map(|n| n.to_string())
                    .unwrap_or_default();
                let (owner, function) = split_symbol(&name);
                let call_type = if owner.is_empty() {
                    CallType::Function
                } else {
                    CallType::Static
                };
                frames.push(StackFrame {
                    owner,
                    call_type,
                    function,
                    file: symbol.filename().map(|p| p.display().to_string()),
                    line: symbol.lineno(),
                });
            });
            frames.len() < max_depth
        });
        frames
    }
}

/// Split a demangled symbol into (owner path, function name), stripping
/// the trailing disambiguator hash rustc appends.
fn split_symbol(name: &str) -> (String, String) {
    let name = match name.rsplit_once("::") {
        Some((rest, hash)) if is_symbol_hash(hash) => rest,
        _ => name,
    };
    match name.rsplit_once("::") {
        Some((owner, function)) => (owner.to_string(), function.to_string()),
        None => (String::new(), name.to_string()),
    }
}

fn is_symbol_hash(segment: &str) -> bool {
    segment.len() == 17
        && segment.starts_with('h')
        && segment[1..].chars().all(|c| c.is_ascii_hexdigit())
}
