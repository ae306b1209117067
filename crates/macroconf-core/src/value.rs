//! Configuration value types and key paths
//!
//! Represents parsed configuration values before macro expansion.
//! Values can be scalars (string, int, float, bool, null),
//! sequences (arrays), or mappings (objects).
//!
//! Nodes are addressed by [`KeyPath`]s: a path string such as
//! `vis.spatial_psf.data_file` or `vis/spatial_psf/data_file` split on a
//! configurable set of [`Delimiters`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A configuration value that may contain unexpanded macros
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[derive(Default)]
pub enum Value {
    /// Null value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value (may contain macros like $(ROOT)$)
    String(String),
    /// Sequence of values
    Sequence(Vec<Value>),
    /// Mapping of string keys to values
    Mapping(IndexMap<String, Value>),
}

impl Value {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a string
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// Check if this value is a sequence
    pub fn is_sequence(&self) -> bool {
        matches!(self, Value::Sequence(_))
    }

    /// Check if this value is a mapping
    pub fn is_mapping(&self) -> bool {
        matches!(self, Value::Mapping(_))
    }

    /// Get as boolean if this is a Bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an Integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a Float or Integer
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as str if this is a String
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as slice if this is a Sequence
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// Get as mapping if this is a Mapping
    pub fn as_mapping(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Whether this is an empty mapping or sequence (or null)
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Sequence(s) => s.is_empty(),
            Value::Mapping(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Get a value by key path string, splitting on the default delimiters
    pub fn get_path(&self, path: &str) -> Result<&Value> {
        self.get_key_path(&KeyPath::parse(path, &Delimiters::default()))
    }

    /// Walk a key path down from this node
    ///
    /// Mappings are indexed by key, sequences by zero-based integer index.
    /// Descending into a scalar is a key path error.
    pub fn get_key_path(&self, path: &KeyPath) -> Result<&Value> {
        let mut current = self;

        for segment in path.segments() {
            current = match current {
                Value::Mapping(map) => map
                    .get(segment.as_str())
                    .ok_or_else(|| Error::key_not_found(path.to_string()))?,
                Value::Sequence(seq) => {
                    let idx = parse_index(path, segment)?;
                    seq.get(idx)
                        .ok_or_else(|| Error::key_not_found(path.to_string()))?
                }
                other => {
                    return Err(Error::key_path(
                        path.to_string(),
                        segment,
                        other.type_name(),
                    ))
                }
            };
        }

        Ok(current)
    }

    /// Get a mutable value by key path
    pub fn get_key_path_mut(&mut self, path: &KeyPath) -> Result<&mut Value> {
        let mut current = self;

        for segment in path.segments() {
            current = match current {
                Value::Mapping(map) => map
                    .get_mut(segment.as_str())
                    .ok_or_else(|| Error::key_not_found(path.to_string()))?,
                Value::Sequence(seq) => {
                    let idx = parse_index(path, segment)?;
                    seq.get_mut(idx)
                        .ok_or_else(|| Error::key_not_found(path.to_string()))?
                }
                other => {
                    return Err(Error::key_path(
                        path.to_string(),
                        segment,
                        other.type_name(),
                    ))
                }
            };
        }

        Ok(current)
    }

    /// Set a value at a key path, creating intermediate mappings as needed
    pub fn set_key_path(&mut self, path: &KeyPath, value: Value) -> Result<()> {
        let Some((last, parents)) = path.segments().split_last() else {
            *self = value;
            return Ok(());
        };

        let mut current = self;
        for segment in parents {
            if current.is_null() {
                *current = Value::Mapping(IndexMap::new());
            }
            current = match current {
                Value::Mapping(map) => map
                    .entry(segment.clone())
                    .or_insert_with(|| Value::Mapping(IndexMap::new())),
                Value::Sequence(seq) => {
                    let idx = parse_index(path, segment)?;
                    seq.get_mut(idx)
                        .ok_or_else(|| Error::key_not_found(path.to_string()))?
                }
                other => {
                    return Err(Error::key_path(
                        path.to_string(),
                        segment,
                        other.type_name(),
                    ))
                }
            };
        }

        if current.is_null() {
            *current = Value::Mapping(IndexMap::new());
        }
        match current {
            Value::Mapping(map) => {
                map.insert(last.clone(), value);
                Ok(())
            }
            Value::Sequence(seq) => {
                let idx = parse_index(path, last)?;
                let slot = seq
                    .get_mut(idx)
                    .ok_or_else(|| Error::key_not_found(path.to_string()))?;
                *slot = value;
                Ok(())
            }
            other => Err(Error::key_path(path.to_string(), last, other.type_name())),
        }
    }

    /// Returns the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
        }
    }
}

fn parse_index(path: &KeyPath, segment: &str) -> Result<usize> {
    segment
        .parse()
        .map_err(|_| Error::key_path(path.to_string(), segment, "sequence"))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{:?}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Sequence(seq) => {
                write!(f, "[")?;
                for (i, v) in seq.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Mapping(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

// Convenient From implementations
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Sequence(v.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Mapping(m)
    }
}

/// The set of characters that separate key path segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters(Vec<char>);

impl Delimiters {
    /// Create a delimiter set; it must contain at least one character and
    /// none of the characters used by the macro syntax
    pub fn new(chars: impl IntoIterator<Item = char>) -> Result<Self> {
        let mut set: Vec<char> = Vec::new();
        for c in chars {
            if c.is_whitespace() || matches!(c, '$' | '(' | ')') {
                return Err(Error::invalid_option(format!(
                    "'{}' cannot be used as a key delimiter",
                    c.escape_default()
                )));
            }
            if !set.contains(&c) {
                set.push(c);
            }
        }
        if set.is_empty() {
            return Err(Error::invalid_option("At least one key delimiter is required"));
        }
        Ok(Self(set))
    }

    /// Whether `c` separates segments
    pub fn contains(&self, c: char) -> bool {
        self.0.contains(&c)
    }

    pub fn as_slice(&self) -> &[char] {
        &self.0
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self(vec!['.', '/'])
    }
}

impl FromStr for Delimiters {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s.chars())
    }
}

impl fmt::Display for Delimiters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.0 {
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// A key path: the non-empty segments of a delimited path string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// Split `path` on every delimiter character, dropping empty segments
    pub fn parse(path: &str, delimiters: &Delimiters) -> Self {
        let segments = path
            .split(|c: char| delimiters.contains(c))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self { segments }
    }

    /// The path addressing the node it is applied to
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append `other` below this path
    pub fn join(&self, other: &KeyPath) -> KeyPath {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        KeyPath { segments }
    }

    /// Canonical text form: segments joined with `/`
    pub fn canonical(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.canonical())
        }
    }
}
