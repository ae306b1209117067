//! Document store
//!
//! Loads a YAML document into a [`Value`] tree, splicing in `!include`d
//! files, and writes it back out again.
//!
//! ```yaml
//! detectors: !include detectors.yaml   # relative to this file's directory
//! ```

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{Error, Result, SourceLocation};
use crate::value::Value;

/// Tag that sources a node from another YAML file
pub const INCLUDE_TAG: &str = "include";

/// An in-memory configuration document and the file it was read from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    root: Value,
    source: Option<PathBuf>,
}

impl Document {
    /// Wrap an existing value tree
    pub fn new(root: Value) -> Self {
        Self { root, source: None }
    }

    /// Load a YAML file, resolving `!include` directives relative to it
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading configuration document {}", path.display());

        let root = Loader::default().load_file(path)?;
        Ok(Self {
            root: empty_to_mapping(root),
            source: Some(path.to_path_buf()),
        })
    }

    /// Parse YAML text; `!include` paths are relative to `base_dir`
    /// (the current directory when `None`)
    pub fn from_yaml_str(yaml: &str, base_dir: Option<&Path>) -> Result<Self> {
        let base_dir = base_dir.unwrap_or_else(|| Path::new("."));
        let root = Loader::default().parse(yaml, base_dir, None)?;
        Ok(Self::new(empty_to_mapping(root)))
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    /// The file this document was last loaded from or saved to
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn set_source(&mut self, source: Option<PathBuf>) {
        self.source = source;
    }

    /// Serialize the document (with includes spliced in) as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.root).map_err(|e| Error::parse(e.to_string()))
    }

    /// Write the document to `dest` as YAML, preserving key order
    ///
    /// Missing parent directories are created when `make_dirs` is set.
    pub fn save(&self, dest: impl AsRef<Path>, make_dirs: bool) -> Result<()> {
        let dest = dest.as_ref();
        let content = self.to_yaml()?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                if !make_dirs {
                    return Err(Error::io(format!(
                        "Directory '{}' does not exist",
                        parent.display()
                    ))
                    .with_help("Pass make_dirs = true to create missing directories"));
                }
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::io(format!(
                        "Failed to create directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        std::fs::write(dest, content).map_err(|e| {
            Error::io(format!("Failed to write '{}': {}", dest.display(), e))
        })?;
        log::debug!("Saved configuration document to {}", dest.display());
        Ok(())
    }
}

/// An empty YAML document behaves like an empty mapping
fn empty_to_mapping(root: Value) -> Value {
    match root {
        Value::Null => Value::Mapping(IndexMap::new()),
        other => other,
    }
}

/// Recursive YAML loader tracking the chain of files being included
#[derive(Default)]
struct Loader {
    include_stack: Vec<PathBuf>,
}

impl Loader {
    fn load_file(&mut self, path: &Path) -> Result<Value> {
        let display = path.display().to_string();
        let canonical = dunce::canonicalize(path).map_err(|e| {
            Error::parse_file(&display, format!("Failed to read file: {}", e))
        })?;

        if self.include_stack.contains(&canonical) {
            let mut chain: Vec<String> = self
                .include_stack
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            chain.push(canonical.display().to_string());
            return Err(Error::include_cycle(chain));
        }

        let content = std::fs::read_to_string(&canonical).map_err(|e| {
            Error::parse_file(&display, format!("Failed to read file: {}", e))
        })?;

        let base_dir = canonical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        self.include_stack.push(canonical);
        let result = self.parse(&content, &base_dir, Some(&display));
        self.include_stack.pop();
        result
    }

    fn parse(&mut self, text: &str, base_dir: &Path, file: Option<&str>) -> Result<Value> {
        let raw: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| yaml_error(&e, file))?;
        self.convert(raw, base_dir, file)
    }

    fn convert(
        &mut self,
        raw: serde_yaml::Value,
        base_dir: &Path,
        file: Option<&str>,
    ) -> Result<Value> {
        use serde_yaml::Value as Yaml;

        match raw {
            Yaml::Null => Ok(Value::Null),
            Yaml::Bool(b) => Ok(Value::Bool(b)),
            Yaml::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else {
                    n.as_f64()
                        .map(Value::Float)
                        .ok_or_else(|| in_file(Error::parse(format!("Invalid number: {}", n)), file))
                }
            }
            Yaml::String(s) => Ok(Value::String(s)),
            Yaml::Sequence(seq) => seq
                .into_iter()
                .map(|item| self.convert(item, base_dir, file))
                .collect::<Result<Vec<_>>>()
                .map(Value::Sequence),
            Yaml::Mapping(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (key, value) in map {
                    let key = mapping_key(&key).map_err(|e| in_file(e, file))?;
                    if out.contains_key(&key) {
                        return Err(in_file(
                            Error::parse(format!("Duplicate mapping key '{}'", key)).with_help(
                                "Keys are compared as text, so 1 and '1' or true and 'true' clash",
                            ),
                            file,
                        ));
                    }
                    let value = self.convert(value, base_dir, file)?;
                    out.insert(key, value);
                }
                Ok(Value::Mapping(out))
            }
            Yaml::Tagged(tagged) => {
                let serde_yaml::value::TaggedValue { tag, value } = *tagged;
                if tag != INCLUDE_TAG {
                    return Err(in_file(
                        Error::parse(format!("Unsupported tag {}", tag)),
                        file,
                    )
                    .with_help("Only !include is supported"));
                }
                match value {
                    Yaml::String(relative) => {
                        let target = base_dir.join(relative.trim());
                        log::debug!("Including {}", target.display());
                        self.load_file(&target)
                    }
                    other => Err(in_file(
                        Error::parse(format!(
                            "!include expects a file path, got {:?}",
                            other
                        )),
                        file,
                    )),
                }
            }
        }
    }
}

/// Scalar mapping keys are stored by their YAML text (e.g. `350.0`)
fn mapping_key(key: &serde_yaml::Value) -> Result<String> {
    use serde_yaml::Value as Yaml;

    match key {
        Yaml::String(s) => Ok(s.clone()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        other => Err(Error::parse(format!(
            "Unsupported mapping key {:?}; keys must be scalars",
            other
        ))),
    }
}

fn in_file(err: Error, file: Option<&str>) -> Error {
    match file {
        Some(f) if err.source_location.is_none() => err.with_source_location(SourceLocation {
            file: f.to_string(),
            line: None,
            column: None,
        }),
        _ => err,
    }
}

fn yaml_error(err: &serde_yaml::Error, file: Option<&str>) -> Error {
    let parse = Error::parse(err.to_string());
    match (file, err.location()) {
        (Some(f), location) => parse.with_source_location(SourceLocation {
            file: f.to_string(),
            line: location.as_ref().map(|l| l.line()),
            column: location.as_ref().map(|l| l.column()),
        }),
        (None, _) => parse,
    }
}
