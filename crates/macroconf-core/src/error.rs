//! Error types for macroconf
//!
//! Every failure is a structured [`Error`] with a kind, the key path it
//! concerns, an optional source location and an actionable help message.

use std::fmt;

/// Result type alias for macroconf operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for macroconf operations
#[derive(Debug, Clone)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Key path the error concerns (e.g., "vis.spatial_psf.data_file")
    pub path: Option<String>,
    /// Source location (file, line) if available
    pub source_location: Option<SourceLocation>,
    /// Actionable help message
    pub help: Option<String>,
    /// Underlying cause (as string for Clone compatibility)
    pub cause: Option<String>,
}

/// Location in a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// Malformed or unreadable document, include cycle, malformed macro token
    #[error("Parse error")]
    Parse,
    /// Key path does not exist (or escapes an active subkey restriction)
    #[error("Key not found")]
    KeyNotFound,
    /// Key path tries to descend through a node that is not a container
    #[error("Invalid key path")]
    KeyPath,
    /// No lookup source produced a value for a macro name
    #[error("Unresolved macro: {name}")]
    UnresolvedMacro { name: String },
    /// A key was re-entered while it was still being resolved
    #[error("Macro cycle detected")]
    MacroCycle,
    /// Type coercion failed
    #[error("Type coercion failed")]
    TypeCoercion,
    /// Invalid option text (precedence, delimiters, location class)
    #[error("Invalid option")]
    InvalidOption,
    /// I/O error while saving or locating files
    #[error("I/O error")]
    Io,
}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            path: None,
            source_location: None,
            help: None,
            cause: None,
        }
    }

    /// Create a new parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Parse)
        }
    }

    /// Create a parse error for a file that could not be read or parsed
    pub fn parse_file(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::parse(message).with_source_location(SourceLocation {
            file: file.into(),
            line: None,
            column: None,
        })
    }

    /// Create an include cycle error
    pub fn include_cycle(chain: Vec<String>) -> Self {
        Self {
            help: Some("Remove one of the !include directives to break the cycle".into()),
            cause: Some(format!("Include chain: {}", chain.join(" → "))),
            ..Self::new(ErrorKind::Parse)
        }
    }

    /// Create a key not found error
    pub fn key_not_found(path: impl Into<String>) -> Self {
        let path_str = path.into();
        Self {
            help: Some(format!(
                "Check that '{}' exists in the configuration",
                path_str
            )),
            path: Some(path_str),
            ..Self::new(ErrorKind::KeyNotFound)
        }
    }

    /// Create a key path error for a segment that cannot be applied to a node
    pub fn key_path(
        path: impl Into<String>,
        segment: impl Into<String>,
        node_type: &str,
    ) -> Self {
        Self {
            path: Some(path.into()),
            cause: Some(format!(
                "Cannot index {} with '{}'",
                node_type,
                segment.into()
            )),
            help: Some("Only mappings (by key) and sequences (by index) can be descended into".into()),
            ..Self::new(ErrorKind::KeyPath)
        }
    }

    /// Create an unresolved macro error
    pub fn unresolved_macro(name: impl Into<String>, config_path: Option<String>) -> Self {
        let n = name.into();
        Self {
            help: Some(format!(
                "Define the key '{}' in the configuration or set the {} environment variable",
                n, n
            )),
            path: config_path,
            ..Self::new(ErrorKind::UnresolvedMacro { name: n })
        }
    }

    /// Create a macro cycle error
    pub fn macro_cycle(path: Option<String>, chain: Vec<String>) -> Self {
        Self {
            path,
            help: Some("Break the cycle by removing one of the macro references".into()),
            cause: Some(format!("Chain: {}", chain.join(" → "))),
            ..Self::new(ErrorKind::MacroCycle)
        }
    }

    /// Create a type coercion error
    pub fn type_coercion(
        path: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Self {
            path: Some(path.into()),
            help: Some(format!(
                "Ensure the value can be converted to {}",
                expected.into()
            )),
            cause: Some(format!("Got: {}", got.into())),
            ..Self::new(ErrorKind::TypeCoercion)
        }
    }

    /// Create an invalid option error
    pub fn invalid_option(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::InvalidOption)
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Io)
        }
    }

    /// Add path context to the error
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add source location to the error
    pub fn with_source_location(mut self, loc: SourceLocation) -> Self {
        self.source_location = Some(loc);
        self
    }

    /// Add help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Whether this error means "nothing at that key path"
    pub fn is_missing_key(&self) -> bool {
        matches!(self.kind, ErrorKind::KeyNotFound | ErrorKind::KeyPath)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(path) = &self.path {
            write!(f, "\n  Path: {}", path)?;
        }

        if let Some(loc) = &self.source_location {
            write!(f, "\n  File: {}", loc.file)?;
            if let Some(line) = loc.line {
                write!(f, ":{}", line)?;
                if let Some(column) = loc.column {
                    write!(f, ":{}", column)?;
                }
            }
        }

        if let Some(cause) = &self.cause {
            write!(f, "\n  {}", cause)?;
        }

        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}
