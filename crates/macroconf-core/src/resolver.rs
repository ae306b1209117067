//! Macro resolution
//!
//! Expands `$( name )$` tokens in configuration values. A name is looked up
//! in the document (as a key path) and in the environment, in the order
//! given by a [`Precedence`]. Substitutions are themselves fully resolved
//! before they are spliced, and a key that is re-entered while it is still
//! being resolved is reported as a [`MacroCycle`](crate::ErrorKind::MacroCycle).

use std::fmt;
use std::str::FromStr;

use indexmap::{IndexMap, IndexSet};

use crate::env::EnvSource;
use crate::error::{Error, Result};
use crate::macros;
use crate::value::{Delimiters, KeyPath, Value};

/// Upper bound on rescans of a single string
pub const MAX_EXPANSION_PASSES: usize = 64;

/// Upper bound on keys and variables being resolved at once
pub const MAX_NESTING_DEPTH: usize = 128;

/// Where a macro name can be looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Keys of the configuration document
    Internal,
    /// Environment variables
    Environment,
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "internal" => Ok(Source::Internal),
            "env" | "environment" => Ok(Source::Environment),
            other => Err(Error::invalid_option(format!(
                "Unknown macro source '{}'",
                other
            ))
            .with_help("Use 'int' or 'env'")),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Internal => write!(f, "int"),
            Source::Environment => write!(f, "env"),
        }
    }
}

/// Ordered list of distinct lookup sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precedence(Vec<Source>);

impl Precedence {
    /// Build a precedence from one or two distinct sources
    pub fn new(sources: impl IntoIterator<Item = Source>) -> Result<Self> {
        let mut list = Vec::new();
        for source in sources {
            if list.contains(&source) {
                return Err(Error::invalid_option(format!(
                    "Macro source '{}' listed twice",
                    source
                )));
            }
            list.push(source);
        }
        if list.is_empty() {
            return Err(Error::invalid_option("At least one macro source is required")
                .with_help("Use 'int', 'env', 'int,env' or 'env,int'"));
        }
        Ok(Self(list))
    }

    /// Document keys, then environment variables
    pub fn internal_first() -> Self {
        Self(vec![Source::Internal, Source::Environment])
    }

    /// Environment variables, then document keys
    pub fn environment_first() -> Self {
        Self(vec![Source::Environment, Source::Internal])
    }

    pub fn internal_only() -> Self {
        Self(vec![Source::Internal])
    }

    pub fn environment_only() -> Self {
        Self(vec![Source::Environment])
    }

    pub fn sources(&self) -> &[Source] {
        &self.0
    }
}

impl Default for Precedence {
    fn default() -> Self {
        Self::internal_first()
    }
}

impl FromStr for Precedence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let sources = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Source>>>()?;
        Self::new(sources)
    }
}

impl fmt::Display for Precedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, source) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", source)?;
        }
        Ok(())
    }
}

/// Which tree internal macro references are looked up in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MacroScope {
    /// The whole document, regardless of any subkey restriction
    #[default]
    Document,
    /// Only the visible subtree of a subkey view
    Visible,
}

impl FromStr for MacroScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" | "doc" => Ok(MacroScope::Document),
            "visible" => Ok(MacroScope::Visible),
            other => Err(Error::invalid_option(format!(
                "Unknown macro scope '{}'",
                other
            ))
            .with_help("Use 'document' or 'visible'")),
        }
    }
}

impl fmt::Display for MacroScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroScope::Document => write!(f, "document"),
            MacroScope::Visible => write!(f, "visible"),
        }
    }
}

/// Resolves macros against a document root and an environment
pub struct MacroResolver<'a> {
    root: &'a Value,
    precedence: &'a Precedence,
    delimiters: &'a Delimiters,
    env: &'a dyn EnvSource,
}

impl<'a> MacroResolver<'a> {
    pub fn new(
        root: &'a Value,
        precedence: &'a Precedence,
        delimiters: &'a Delimiters,
        env: &'a dyn EnvSource,
    ) -> Self {
        Self {
            root,
            precedence,
            delimiters,
            env,
        }
    }

    /// Fully resolve a value
    pub fn resolve(&self, value: &Value) -> Result<Value> {
        self.resolve_at(value, "")
    }

    /// Fully resolve a value, naming `path` as its location in errors
    pub fn resolve_at(&self, value: &Value, path: &str) -> Result<Value> {
        let mut visited = IndexSet::new();
        self.resolve_value(value, path, &mut visited)
    }

    fn resolve_value(
        &self,
        value: &Value,
        path: &str,
        visited: &mut IndexSet<String>,
    ) -> Result<Value> {
        match value {
            Value::String(s) => self.resolve_string(s, path, visited),
            Value::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.resolve_value(item, &child_path(path, &i.to_string()), visited))
                .collect::<Result<Vec<_>>>()
                .map(Value::Sequence),
            Value::Mapping(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve_value(v, &child_path(path, k), visited)?)))
                .collect::<Result<IndexMap<_, _>>>()
                .map(Value::Mapping),
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(
        &self,
        text: &str,
        path: &str,
        visited: &mut IndexSet<String>,
    ) -> Result<Value> {
        if !macros::contains_macro(text) {
            return Ok(Value::String(text.to_string()));
        }

        let mut current = text.to_string();
        for pass in 0..=MAX_EXPANSION_PASSES {
            let tokens = macros::scan(&current)
                .collect::<Result<Vec<_>>>()
                .map_err(|e| e.with_path(display_path(path)))?;
            if tokens.is_empty() {
                return Ok(Value::String(current));
            }
            if pass == MAX_EXPANSION_PASSES {
                break;
            }

            // A lone macro keeps the type of what it refers to
            if pass == 0 && tokens.len() == 1 && tokens[0].span == (0..current.len()) {
                return self.lookup(tokens[0].name, path, visited);
            }

            let mut expanded = String::with_capacity(current.len());
            let mut last = 0;
            for token in &tokens {
                expanded.push_str(&current[last..token.span.start]);
                match self.lookup(token.name, path, visited)? {
                    Value::String(s) => expanded.push_str(&s),
                    other => expanded.push_str(&other.to_string()),
                }
                last = token.span.end;
            }
            expanded.push_str(&current[last..]);
            current = expanded;
        }

        let mut chain: Vec<String> = visited.iter().cloned().collect();
        chain.push(display_path(path));
        Err(Error::macro_cycle(Some(display_path(path)), chain).with_help(format!(
            "Macro expansion did not converge after {} passes",
            MAX_EXPANSION_PASSES
        )))
    }

    /// Look `name` up in each source in precedence order
    fn lookup(&self, name: &str, path: &str, visited: &mut IndexSet<String>) -> Result<Value> {
        for source in self.precedence.sources() {
            let found = match source {
                Source::Environment => self.lookup_env(name, path, visited)?,
                Source::Internal => self.lookup_internal(name, path, visited)?,
            };
            if let Some(value) = found {
                log::trace!("$({})$ at {} resolved from {}", name, display_path(path), source);
                return Ok(value);
            }
        }

        Err(Error::unresolved_macro(
            name,
            (!path.is_empty()).then(|| path.to_string()),
        ))
    }

    fn lookup_env(
        &self,
        name: &str,
        path: &str,
        visited: &mut IndexSet<String>,
    ) -> Result<Option<Value>> {
        let Some(raw) = self.env.var(name) else {
            return Ok(None);
        };
        self.enter(format!("env:{}", name), path, visited, |visited| {
            self.resolve_string(&raw, path, visited)
        })
        .map(Some)
    }

    fn lookup_internal(
        &self,
        name: &str,
        path: &str,
        visited: &mut IndexSet<String>,
    ) -> Result<Option<Value>> {
        let key_path = KeyPath::parse(name, self.delimiters);
        if key_path.is_root() {
            return Ok(None);
        }
        let node = match self.root.get_key_path(&key_path) {
            Ok(node) => node,
            Err(e) if e.is_missing_key() => return Ok(None),
            Err(e) => return Err(e),
        };
        // An empty key is no definition; let the next source answer
        if node.is_null() {
            return Ok(None);
        }

        let key = key_path.canonical();
        self.enter(key.clone(), path, visited, |visited| {
            self.resolve_value(node, &key, visited)
        })
        .map(Some)
    }

    /// Run `f` with `key` marked as in progress
    fn enter<F>(
        &self,
        key: String,
        path: &str,
        visited: &mut IndexSet<String>,
        f: F,
    ) -> Result<Value>
    where
        F: FnOnce(&mut IndexSet<String>) -> Result<Value>,
    {
        if let Some(start) = visited.get_index_of(&key) {
            let mut chain: Vec<String> = visited.iter().skip(start).cloned().collect();
            chain.push(key);
            log::debug!("Macro cycle: {}", chain.join(" -> "));
            return Err(Error::macro_cycle(Some(display_path(path)), chain));
        }
        if visited.len() >= MAX_NESTING_DEPTH {
            let mut chain: Vec<String> = visited.iter().cloned().collect();
            chain.push(key);
            log::debug!(
                "Macro nesting exceeds {} levels at {}",
                MAX_NESTING_DEPTH,
                display_path(path)
            );
            let help = format!(
                "Macro references nest deeper than {} levels; look for a cycle or shorten the chain",
                MAX_NESTING_DEPTH
            );
            return Err(Error::macro_cycle(Some(display_path(path)), chain).with_help(help));
        }

        visited.insert(key);
        let result = f(visited);
        visited.pop();
        result
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", parent, key)
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::env::MapEnv;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn doc(yaml: &str) -> Value {
        Document::from_yaml_str(yaml, None).unwrap().root().clone()
    }

    fn resolve_with(root: &Value, path: &str, precedence: Precedence, env: &MapEnv) -> Result<Value> {
        let delimiters = Delimiters::default();
        let resolver = MacroResolver::new(root, &precedence, &delimiters, env);
        resolver.resolve_at(root.get_path(path)?, path)
    }

    fn resolve(root: &Value, path: &str) -> Result<Value> {
        resolve_with(root, path, Precedence::default(), &MapEnv::new())
    }

    #[test]
    fn test_macro_free_document_is_unchanged() {
        let root = doc("a: 1\nb: [x, 2.5, true]\nc:\n  d: plain $ (text)\n  e: null\n");
        let env = MapEnv::new();
        let precedence = Precedence::default();
        let delimiters = Delimiters::default();
        let resolver = MacroResolver::new(&root, &precedence, &delimiters, &env);
        assert_eq!(resolver.resolve(&root).unwrap(), root);
    }

    #[test]
    fn test_nested_key_references() {
        let root = doc(
            "ROOT: /data\nfolders:\n  l1pp: $(ROOT)$/l1pp\nx:\n  y: $( folders/l1pp )$/uv/file.fits\n",
        );
        assert_eq!(
            resolve(&root, "x.y").unwrap(),
            Value::from("/data/l1pp/uv/file.fits")
        );
    }

    #[test]
    fn test_reference_equals_resolved_target() {
        let root = doc("ROOT: /data\nq: $(ROOT)$/q\nr: $(q)$\n");
        assert_eq!(resolve(&root, "r").unwrap(), resolve(&root, "q").unwrap());
    }

    #[test]
    fn test_lone_macro_keeps_type() {
        let root = doc("area: 25.0\nsize: [2000, 1504]\nalias: $(area)$\nshape: $(size)$\n");
        assert_eq!(resolve(&root, "alias").unwrap(), Value::Float(25.0));
        assert_eq!(resolve(&root, "shape").unwrap(), Value::from(vec![2000, 1504]));
    }

    #[test]
    fn test_embedded_macro_renders_text() {
        let root = doc("area: 25.0\nn: 3\nlabel: area=$(area)$ n=$(n)$\n");
        assert_eq!(resolve(&root, "label").unwrap(), Value::from("area=25.0 n=3"));
    }

    #[test]
    fn test_resolves_inside_sequences_and_mappings() {
        let root = doc("ROOT: /d\nfiles:\n  - $(ROOT)$/a\n  - name: $(ROOT)$/b\n");
        let expected = doc("files:\n  - /d/a\n  - name: /d/b\n");
        assert_eq!(
            resolve(&root, "files").unwrap(),
            expected.get_path("files").unwrap().clone()
        );
    }

    #[test]
    fn test_repeated_reference_is_not_a_cycle() {
        let root = doc("a: x\nb: $(a)$-$(a)$\nc: [$(b)$, $(b)$]\n");
        assert_eq!(resolve(&root, "b").unwrap(), Value::from("x-x"));
        assert_eq!(resolve(&root, "c").unwrap(), Value::from(vec!["x-x", "x-x"]));
    }

    #[test]
    fn test_environment_fallback() {
        let root = doc("data: $(DATA_ROOT)$/psf.fits\n");
        let env = MapEnv::new().with("DATA_ROOT", "/srv");
        let value = resolve_with(&root, "data", Precedence::default(), &env).unwrap();
        assert_eq!(value, Value::from("/srv/psf.fits"));
    }

    #[test]
    fn test_precedence_order() {
        let root = doc("ROOT: /internal\np: $(ROOT)$/x\n");
        let env = MapEnv::new().with("ROOT", "/env");

        let int_first = resolve_with(&root, "p", Precedence::internal_first(), &env).unwrap();
        assert_eq!(int_first, Value::from("/internal/x"));

        let env_first = resolve_with(&root, "p", Precedence::environment_first(), &env).unwrap();
        assert_eq!(env_first, Value::from("/env/x"));
    }

    #[test]
    fn test_single_source_precedence() {
        let root = doc("ROOT: /internal\np: $(ROOT)$\nq: $(HOME_DIR)$\n");
        let env = MapEnv::new().with("HOME_DIR", "/home/me");

        let err = resolve_with(&root, "q", Precedence::internal_only(), &env).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedMacro { name: "HOME_DIR".into() });

        let err = resolve_with(&root, "p", Precedence::environment_only(), &env).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedMacro { name: "ROOT".into() });
    }

    #[test]
    fn test_environment_value_is_expanded() {
        let root = doc("ROOT: /data\np: $(OUT)$\n");
        let env = MapEnv::new().with("OUT", "$(ROOT)$/out");
        let value = resolve_with(&root, "p", Precedence::default(), &env).unwrap();
        assert_eq!(value, Value::from("/data/out"));
    }

    #[test]
    fn test_environment_self_reference_is_a_cycle() {
        let root = doc("p: $(LOOP)$\n");
        let env = MapEnv::new().with("LOOP", "x$(LOOP)$");
        let err = resolve_with(&root, "p", Precedence::environment_only(), &env).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MacroCycle);
    }

    #[test]
    fn test_missing_key_through_scalar_falls_back_to_env() {
        let root = doc("a: 1\np: $(a.b)$\n");
        let env = MapEnv::new().with("a.b", "from-env");
        let value = resolve_with(&root, "p", Precedence::default(), &env).unwrap();
        assert_eq!(value, Value::from("from-env"));
    }

    #[test]
    fn test_unresolved_macro_names_value() {
        let root = doc("vis:\n  data_file: $(NOWHERE)$/f\n");
        let err = resolve(&root, "vis.data_file").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedMacro { name: "NOWHERE".into() });
        assert_eq!(err.path.as_deref(), Some("vis.data_file"));
    }

    #[test]
    fn test_self_cycle() {
        let root = doc("a: $(a)$\n");
        let err = resolve(&root, "a").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MacroCycle);
    }

    #[test]
    fn test_mutual_cycle_lists_chain() {
        let root = doc("a: x/$(b)$\nb: y/$(c)$\nc: z/$(a)$\nstart: $(a)$\n");
        let err = resolve(&root, "start").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MacroCycle);
        assert!(err.to_string().contains("a → b → c → a"));
    }

    #[test]
    fn test_long_cycle_is_reported() {
        let n = 5000;
        let mut yaml = String::new();
        for i in 0..n {
            yaml.push_str(&format!("k{}: $(k{})$\n", i, (i + 1) % n));
        }
        let root = doc(&yaml);
        let err = resolve(&root, "k0").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MacroCycle);
    }

    #[test]
    fn test_long_chain_resolves() {
        let n = MAX_NESTING_DEPTH - 1;
        let mut yaml = format!("k{}: end\n", n);
        for i in 0..n {
            yaml.push_str(&format!("k{}: x$(k{})$\n", i, i + 1));
        }
        let root = doc(&yaml);
        let expected = format!("{}end", "x".repeat(n));
        assert_eq!(resolve(&root, "k0").unwrap(), Value::from(expected));
    }

    #[test]
    fn test_chain_deeper_than_nesting_limit_is_an_error() {
        let n = 500;
        let mut yaml = format!("k{}: end\n", n);
        for i in 0..n {
            yaml.push_str(&format!("k{}: $(k{})$\n", i, i + 1));
        }
        let root = doc(&yaml);
        let err = resolve(&root, "k0").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MacroCycle);
        assert!(err.help.unwrap().contains("nest deeper than 128"));
    }

    #[test]
    fn test_null_key_is_not_a_definition() {
        let root = doc("ROOT:\np: $(ROOT)$/x\n");
        let err = resolve(&root, "p").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedMacro { name: "ROOT".into() });

        let env = MapEnv::new().with("ROOT", "/env");
        let value = resolve_with(&root, "p", Precedence::default(), &env).unwrap();
        assert_eq!(value, Value::from("/env/x"));
    }

    #[test]
    fn test_custom_delimiters_reach_dotted_keys() {
        let root = doc("psfdata:\n  350.0: psf_350.fits\nfile: $(psfdata/350.0)$\n");
        let env = MapEnv::new();
        let precedence = Precedence::default();
        let delimiters: Delimiters = "/".parse().unwrap();
        let resolver = MacroResolver::new(&root, &precedence, &delimiters, &env);
        let value = resolver.resolve(root.get_path("file").unwrap()).unwrap();
        assert_eq!(value, Value::from("psf_350.fits"));
    }

    #[test]
    fn test_malformed_macro_is_parse_error() {
        let root = doc("bad: $(ROOT/x\n");
        let err = resolve(&root, "bad").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn test_precedence_parse() {
        assert_eq!("int".parse::<Precedence>().unwrap(), Precedence::internal_only());
        assert_eq!(
            "env, int".parse::<Precedence>().unwrap(),
            Precedence::environment_first()
        );
        assert_eq!(Precedence::default().to_string(), "int,env");
        assert!("int,int".parse::<Precedence>().is_err());
        assert!("".parse::<Precedence>().is_err());
        assert!("int,env,file".parse::<Precedence>().is_err());
    }

    #[test]
    fn test_macro_scope_parse() {
        assert_eq!("visible".parse::<MacroScope>().unwrap(), MacroScope::Visible);
        assert_eq!(MacroScope::default(), MacroScope::Document);
        assert!("global".parse::<MacroScope>().is_err());
    }
}
