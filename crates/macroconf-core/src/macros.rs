//! Macro token scanning
//!
//! Finds `$( name )$` tokens inside string values:
//! - `$(ROOT)$` - a key path or environment variable name
//! - `$( folders/data )$` - whitespace around the name is ignored
//! - `$(ROOT)$/sub/$(NAME)$` - any number of tokens mixed with literal text
//!
//! The name is taken literally; it is never itself expanded.

use std::ops::Range;

use crate::error::{Error, Result};

/// Opening delimiter of a macro token
pub const MACRO_OPEN: &str = "$(";
/// Closing delimiter of a macro token
pub const MACRO_CLOSE: &str = ")$";

/// One macro occurrence within a string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroToken<'a> {
    /// Byte range of the whole token, delimiters included
    pub span: Range<usize>,
    /// Referenced name with surrounding whitespace trimmed
    pub name: &'a str,
}

/// Lazy left-to-right iterator over the macro tokens of a string
///
/// Yields an error and stops on an unterminated token or an empty name.
#[derive(Debug, Clone)]
pub struct MacroScanner<'a> {
    input: &'a str,
    pos: usize,
    done: bool,
}

impl<'a> MacroScanner<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            done: false,
        }
    }

    fn fail(&mut self, err: Error) -> Option<Result<MacroToken<'a>>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<'a> Iterator for MacroScanner<'a> {
    type Item = Result<MacroToken<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let Some(offset) = self.input[self.pos..].find(MACRO_OPEN) else {
            self.done = true;
            return None;
        };
        let start = self.pos + offset;
        let name_start = start + MACRO_OPEN.len();

        let Some(len) = self.input[name_start..].find(MACRO_CLOSE) else {
            return self.fail(
                Error::parse(format!(
                    "Unterminated macro at byte {} in '{}'",
                    start, self.input
                ))
                .with_help("Close the macro with ')$', e.g. $(ROOT)$"),
            );
        };
        let name_end = name_start + len;
        let end = name_end + MACRO_CLOSE.len();
        self.pos = end;

        let name = self.input[name_start..name_end].trim();
        if name.is_empty() {
            return self.fail(Error::parse(format!(
                "Empty macro name at byte {} in '{}'",
                start, self.input
            )));
        }

        Some(Ok(MacroToken {
            span: start..end,
            name,
        }))
    }
}

/// Scan `input` for macro tokens
pub fn scan(input: &str) -> MacroScanner<'_> {
    MacroScanner::new(input)
}

/// Check whether a string may contain macro tokens
pub fn contains_macro(input: &str) -> bool {
    input.contains(MACRO_OPEN)
}
