//! Main Config type for holding and resolving configuration
//!
//! A [`Config`] owns a [`Document`] and answers key path lookups against it,
//! expanding `$( name )$` macros on the way out. A subkey view shares the
//! document and roots user lookups deeper in the tree.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::document::Document;
use crate::env::{EnvSource, ProcessEnv};
use crate::error::{Error, Result};
use crate::locator::Locator;
use crate::path::normalize;
use crate::resolver::{MacroResolver, MacroScope, Precedence};
use crate::value::{Delimiters, KeyPath, Value};

/// Options applied when a configuration is created
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// Key path of the subtree user lookups are rooted at
    pub subkey: Option<String>,
    /// Order in which macro names are looked up
    pub precedence: Precedence,
    /// Characters separating key path segments
    pub delimiters: Delimiters,
    /// Tree that internal macro references are resolved against
    pub macro_scope: MacroScope,
}

impl ConfigOptions {
    pub fn with_subkey(mut self, subkey: impl Into<String>) -> Self {
        self.subkey = Some(subkey.into());
        self
    }

    pub fn with_precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn with_macro_scope(mut self, macro_scope: MacroScope) -> Self {
        self.macro_scope = macro_scope;
        self
    }
}

/// The main configuration container
///
/// Values are resolved on every lookup; the environment is read afresh each
/// time and nothing is cached.
#[derive(Clone)]
pub struct Config {
    /// Loaded document, shared between subkey views
    document: Arc<Document>,
    /// Root of user lookups, relative to the document root
    visible: KeyPath,
    precedence: Precedence,
    delimiters: Delimiters,
    macro_scope: MacroScope,
    env: Arc<dyn EnvSource>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("document", &self.document)
            .field("visible", &self.visible)
            .field("precedence", &self.precedence)
            .field("delimiters", &self.delimiters)
            .field("macro_scope", &self.macro_scope)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Create a new Config from a Value
    pub fn new(value: Value) -> Self {
        Self::from_document(Document::new(value))
    }

    fn from_document(document: Document) -> Self {
        Self {
            document: Arc::new(document),
            visible: KeyPath::root(),
            precedence: Precedence::default(),
            delimiters: Delimiters::default(),
            macro_scope: MacroScope::default(),
            env: Arc::new(ProcessEnv),
        }
    }

    fn from_document_with_options(document: Document, options: ConfigOptions) -> Result<Self> {
        let mut config = Self::from_document(document);
        config.precedence = options.precedence;
        config.delimiters = options.delimiters;
        config.macro_scope = options.macro_scope;
        if let Some(subkey) = options.subkey.as_deref() {
            config.visible = KeyPath::parse(subkey, &config.delimiters);
            config.check_visible_root(subkey)?;
        }
        Ok(config)
    }

    /// Create a Config with custom options
    pub fn with_options(value: Value, options: ConfigOptions) -> Result<Self> {
        Self::from_document_with_options(Document::new(value), options)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(Self::from_document(Document::from_yaml_str(yaml, None)?))
    }

    /// Load configuration from a YAML string with options
    pub fn from_yaml_with_options(yaml: &str, options: ConfigOptions) -> Result<Self> {
        Self::from_document_with_options(Document::from_yaml_str(yaml, None)?, options)
    }

    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_document(Document::load(path)?))
    }

    /// Load configuration from a YAML file with options
    pub fn load_with_options(path: impl AsRef<Path>, options: ConfigOptions) -> Result<Self> {
        Self::from_document_with_options(Document::load(path)?, options)
    }

    /// Load the configuration file a [`Locator`] points at
    pub fn locate(locator: &Locator, options: ConfigOptions) -> Result<Self> {
        let path = locator.path()?;
        log::debug!("Located {} at {}", locator.file, path.display());
        Self::load_with_options(path, options)
    }

    /// Replace the environment macro names are looked up in
    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    fn check_visible_root(&self, subkey: &str) -> Result<()> {
        let root = self.visible_root().map_err(|e| e.with_path(subkey))?;
        if root.is_mapping() || root.is_sequence() {
            Ok(())
        } else {
            Err(Error::key_path(subkey, subkey, root.type_name())
                .with_help("A subkey must select a mapping or a sequence"))
        }
    }

    fn visible_root(&self) -> Result<&Value> {
        self.document.root().get_key_path(&self.visible)
    }

    fn macro_root(&self) -> Result<&Value> {
        match self.macro_scope {
            MacroScope::Document => Ok(self.document.root()),
            MacroScope::Visible => self.visible_root(),
        }
    }

    fn key_path(&self, path: &str) -> KeyPath {
        KeyPath::parse(path, &self.delimiters)
    }

    /// Get the raw (unresolved) value at a path
    pub fn get_raw(&self, path: &str) -> Result<&Value> {
        self.visible_root()?
            .get_key_path(&self.key_path(path))
            .map_err(|e| e.with_path(path))
    }

    /// Get a resolved value at a path
    ///
    /// Every macro in the value is expanded; the result contains none.
    pub fn get(&self, path: &str) -> Result<Value> {
        let raw = self.get_raw(path)?;
        self.resolve(raw, path)
    }

    fn resolve(&self, value: &Value, path: &str) -> Result<Value> {
        MacroResolver::new(
            self.macro_root()?,
            &self.precedence,
            &self.delimiters,
            self.env.as_ref(),
        )
        .resolve_at(value, path)
    }

    /// Get a resolved value as a normalized filesystem path
    pub fn get_pathname(&self, path: &str) -> Result<PathBuf> {
        let value = self.get(path)?;
        match value {
            Value::Sequence(_) | Value::Mapping(_) => {
                Err(Error::type_coercion(path, "pathname", value.type_name()))
            }
            other => Ok(normalize(other.to_string())),
        }
    }

    /// Get a resolved string value, with type coercion if needed
    pub fn get_string(&self, path: &str) -> Result<String> {
        let value = self.get(path)?;
        match value {
            Value::String(s) => Ok(s),
            Value::Sequence(_) | Value::Mapping(_) => {
                Err(Error::type_coercion(path, "string", value.type_name()))
            }
            scalar => Ok(scalar.to_string()),
        }
    }

    /// Get a resolved integer value, with type coercion if needed
    pub fn get_i64(&self, path: &str) -> Result<i64> {
        let value = self.get(path)?;
        match value {
            Value::Integer(i) => Ok(i),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| Error::type_coercion(path, "integer", format!("string (\"{}\")", s))),
            _ => Err(Error::type_coercion(path, "integer", value.type_name())),
        }
    }

    /// Get a resolved float value, with type coercion if needed
    pub fn get_f64(&self, path: &str) -> Result<f64> {
        let value = self.get(path)?;
        match value {
            Value::Float(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| Error::type_coercion(path, "float", format!("string (\"{}\")", s))),
            _ => Err(Error::type_coercion(path, "float", value.type_name())),
        }
    }

    /// Get a resolved boolean value; strings must be "true" or "false"
    pub fn get_bool(&self, path: &str) -> Result<bool> {
        let value = self.get(path)?;
        match value {
            Value::Bool(b) => Ok(b),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(Error::type_coercion(
                    path,
                    "boolean",
                    format!("string (\"{}\") - only \"true\" or \"false\" allowed", s),
                )),
            },
            _ => Err(Error::type_coercion(path, "boolean", value.type_name())),
        }
    }

    /// Get a resolved sequence
    pub fn get_sequence(&self, path: &str) -> Result<Vec<Value>> {
        match self.get(path)? {
            Value::Sequence(items) => Ok(items),
            other => Err(Error::type_coercion(path, "sequence", other.type_name())),
        }
    }

    /// A view of the subtree at `path`, sharing this configuration's document
    pub fn subkey(&self, path: &str) -> Result<Config> {
        let mut view = self.clone();
        view.visible = self.visible.join(&self.key_path(path));
        view.check_visible_root(path)?;
        Ok(view)
    }

    /// Key path of the visible root, empty when the whole document is visible
    pub fn visible_path(&self) -> &KeyPath {
        &self.visible
    }

    /// Export the visible tree, resolved or as written
    pub fn to_value(&self, resolve: bool) -> Result<Value> {
        let root = self.visible_root()?;
        if resolve {
            self.resolve(root, "")
        } else {
            Ok(root.clone())
        }
    }

    /// Export the visible tree as YAML
    pub fn to_yaml(&self, resolve: bool) -> Result<String> {
        let value = self.to_value(resolve)?;
        serde_yaml::to_string(&value).map_err(|e| Error::parse(e.to_string()))
    }

    /// Export the visible tree as JSON
    pub fn to_json(&self, resolve: bool) -> Result<String> {
        let value = self.to_value(resolve)?;
        serde_json::to_string_pretty(&value).map_err(|e| Error::parse(e.to_string()))
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.delimiters
    }

    pub fn set_delimiters(&mut self, delimiters: Delimiters) {
        self.delimiters = delimiters;
    }

    pub fn precedence(&self) -> &Precedence {
        &self.precedence
    }

    pub fn set_precedence(&mut self, precedence: Precedence) {
        self.precedence = precedence;
    }

    pub fn macro_scope(&self) -> MacroScope {
        self.macro_scope
    }

    pub fn set_macro_scope(&mut self, macro_scope: MacroScope) {
        self.macro_scope = macro_scope;
    }

    /// Write `value` at `path`, relative to the visible root
    ///
    /// Missing intermediate mappings are created. Other views sharing the
    /// document keep seeing the old contents.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        let target = self.visible.join(&self.key_path(path));
        Arc::make_mut(&mut self.document)
            .root_mut()
            .set_key_path(&target, value.into())
            .map_err(|e| e.with_path(path))
    }

    /// Replace the whole document
    ///
    /// Clears any subkey restriction and forgets the source file.
    pub fn set_values(&mut self, values: Value) {
        self.document = Arc::new(Document::new(values));
        self.visible = KeyPath::root();
    }

    /// File the document was last loaded from or saved to
    pub fn filename(&self) -> Option<&Path> {
        self.document.source()
    }

    /// Write the document back to the file it came from
    pub fn save(&self) -> Result<()> {
        let dest = self.filename().ok_or_else(|| {
            Error::io("No file to save to")
                .with_help("Use save_to() for a configuration that was not loaded from a file")
        })?;
        self.document.save(dest, false)
    }

    /// Write the document to `dest` and remember it as the source file
    pub fn save_to(&mut self, dest: impl AsRef<Path>, make_dirs: bool) -> Result<()> {
        let dest = dest.as_ref();
        self.document.save(dest, make_dirs)?;
        Arc::make_mut(&mut self.document).set_source(Some(dest.to_path_buf()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{FnEnv, MapEnv};
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    const INSTRUMENT: &str = r#"
ROOT: /data
folders:
  l1pp: $(ROOT)$/l1pp
vis:
  front_aperture_area: 25.0
  enabled: "TRUE"
  binning: "4"
  window:
    native_size: [2000, 1504]
  spatial_psf:
    data_file: $(folders.l1pp)$/vis/psf.fits
    scratch: $(TMP_DIR)$/$(ROOT)$
  empty_list: []
"#;

    fn config() -> Config {
        Config::from_yaml(INSTRUMENT)
            .unwrap()
            .with_env(Arc::new(MapEnv::new().with("TMP_DIR", "/tmp")))
    }

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("macroconf-config-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_get_resolves_macros() {
        let config = config();
        assert_eq!(
            config.get("vis.spatial_psf.data_file").unwrap(),
            Value::from("/data/l1pp/vis/psf.fits")
        );
        assert_eq!(
            config.get("vis/spatial_psf/scratch").unwrap(),
            Value::from("/tmp//data")
        );
    }

    #[test]
    fn test_get_raw_keeps_macros() {
        let config = config();
        assert_eq!(
            config.get_raw("folders.l1pp").unwrap(),
            &Value::from("$(ROOT)$/l1pp")
        );
    }

    #[test]
    fn test_missing_key_reports_user_path() {
        let err = config().get("nir.front_aperture_area").unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyNotFound);
        assert_eq!(err.path.as_deref(), Some("nir.front_aperture_area"));
    }

    #[test]
    fn test_get_pathname_normalizes() {
        let config = config();
        assert_eq!(
            config.get_pathname("vis.spatial_psf.scratch").unwrap(),
            PathBuf::from("/tmp/data")
        );
        let err = config.get_pathname("vis.window").unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeCoercion);
    }

    #[test]
    fn test_typed_getters() {
        let config = config();
        assert_eq!(config.get_f64("vis.front_aperture_area").unwrap(), 25.0);
        assert_eq!(config.get_i64("vis.binning").unwrap(), 4);
        assert!(config.get_bool("vis.enabled").unwrap());
        assert_eq!(config.get_string("vis.front_aperture_area").unwrap(), "25.0");
        assert_eq!(
            config.get_sequence("vis.window.native_size").unwrap(),
            vec![Value::Integer(2000), Value::Integer(1504)]
        );
        assert!(config.get_sequence("vis.empty_list").unwrap().is_empty());
    }

    #[test]
    fn test_typed_getter_mismatch() {
        let config = config();
        for err in [
            config.get_i64("vis.window").unwrap_err(),
            config.get_bool("vis.binning").unwrap_err(),
            config.get_sequence("vis.binning").unwrap_err(),
            config.get_string("vis.window").unwrap_err(),
        ] {
            assert_eq!(err.kind, ErrorKind::TypeCoercion);
        }
    }

    #[test]
    fn test_subkey_view() {
        let vis = config().subkey("vis").unwrap();
        assert_eq!(vis.get_f64("front_aperture_area").unwrap(), 25.0);
        // Macros still see the whole document
        assert_eq!(
            vis.get("spatial_psf.data_file").unwrap(),
            Value::from("/data/l1pp/vis/psf.fits")
        );
        let err = vis.get("ROOT").unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyNotFound);
        assert_eq!(vis.visible_path().canonical(), "vis");
    }

    #[test]
    fn test_nested_subkey_view() {
        let psf = config().subkey("vis").unwrap().subkey("spatial_psf").unwrap();
        assert_eq!(
            psf.get_string("data_file").unwrap(),
            "/data/l1pp/vis/psf.fits"
        );
    }

    #[test]
    fn test_subkey_must_be_container() {
        let err = config().subkey("vis.front_aperture_area").unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyPath);
        let err = config().subkey("nir").unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyNotFound);
    }

    #[test]
    fn test_subkey_option() {
        let options = ConfigOptions::default().with_subkey("vis/window");
        let config = Config::from_yaml_with_options(INSTRUMENT, options).unwrap();
        assert_eq!(config.get_i64("native_size.0").unwrap(), 2000);
    }

    #[test]
    fn test_visible_macro_scope() {
        let yaml = "ROOT: /top\nvis:\n  ROOT: /vis\n  file: $(ROOT)$/f\n";
        let options = ConfigOptions::default()
            .with_subkey("vis")
            .with_macro_scope(MacroScope::Visible);
        let config = Config::from_yaml_with_options(yaml, options).unwrap();
        assert_eq!(config.get("file").unwrap(), Value::from("/vis/f"));

        let mut config = config;
        config.set_macro_scope(MacroScope::Document);
        assert_eq!(config.get("file").unwrap(), Value::from("/top/f"));
    }

    #[test]
    fn test_precedence_switch() {
        let mut config = Config::from_yaml("ROOT: /internal\np: $(ROOT)$\n")
            .unwrap()
            .with_env(Arc::new(MapEnv::new().with("ROOT", "/env")));
        assert_eq!(config.get_string("p").unwrap(), "/internal");
        config.set_precedence(Precedence::environment_first());
        assert_eq!(config.get_string("p").unwrap(), "/env");
    }

    #[test]
    fn test_environment_read_on_every_lookup() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let env = FnEnv::new(move |name| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            (name == "RUN").then(|| format!("run{}", n))
        });
        let config = Config::from_yaml("dir: $(RUN)$\n").unwrap().with_env(Arc::new(env));

        assert_eq!(config.get_string("dir").unwrap(), "run0");
        assert_eq!(config.get_string("dir").unwrap(), "run1");
    }

    #[test]
    fn test_custom_delimiters() {
        let yaml = "psfdata:\n  350.0: a.fits\n";
        let mut config = Config::from_yaml(yaml).unwrap();
        assert!(config.get("psfdata/350.0").is_err());

        config.set_delimiters("/".parse().unwrap());
        assert_eq!(config.get_string("psfdata/350.0").unwrap(), "a.fits");
    }

    #[test]
    fn test_set_inside_subkey_view() {
        let base = config();
        let mut vis = base.subkey("vis").unwrap();
        vis.set("window.binning", vec![2, 2]).unwrap();

        assert_eq!(vis.get_i64("window.binning.1").unwrap(), 2);
        // The base view keeps its own copy
        assert!(base.get("vis.window.binning").is_err());
    }

    #[test]
    fn test_set_values_resets_subkey() {
        let mut vis = config().subkey("vis").unwrap();
        vis.set_values(Config::from_yaml("a: 1\n").unwrap().to_value(false).unwrap());
        assert!(vis.visible_path().is_root());
        assert_eq!(vis.get_i64("a").unwrap(), 1);
        assert!(vis.filename().is_none());
    }

    #[test]
    fn test_to_value_exports_visible_tree() {
        let vis = config().subkey("vis.spatial_psf").unwrap();
        let resolved = vis.to_value(true).unwrap();
        assert_eq!(
            resolved.get_path("data_file").unwrap(),
            &Value::from("/data/l1pp/vis/psf.fits")
        );
        let raw = vis.to_value(false).unwrap();
        assert_eq!(
            raw.get_path("data_file").unwrap(),
            &Value::from("$(folders.l1pp)$/vis/psf.fits")
        );
        let json = vis.to_json(true).unwrap();
        assert!(json.contains("\"data_file\": \"/data/l1pp/vis/psf.fits\""));
    }

    #[test]
    fn test_save_without_source_fails() {
        let err = config().save().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
    }

    #[test]
    fn test_save_to_and_reload() {
        let path = temp_file("nested/instrument.yaml");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());

        let mut config = config();
        assert_eq!(
            config.save_to(&path, false).unwrap_err().kind,
            ErrorKind::Io
        );
        config.set("vis.front_aperture_area", 30.5).unwrap();
        config.save_to(&path, true).unwrap();
        assert_eq!(config.filename(), Some(path.as_path()));

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.get_f64("vis.front_aperture_area").unwrap(), 30.5);
        assert_eq!(
            reloaded.get_raw("vis.spatial_psf.data_file").unwrap(),
            &Value::from("$(folders.l1pp)$/vis/psf.fits")
        );

        let mut reloaded = reloaded;
        reloaded.set("ROOT", "/elsewhere").unwrap();
        reloaded.save().unwrap();
        assert_eq!(
            Config::load(&path).unwrap().get_string("folders.l1pp").unwrap(),
            "/elsewhere/l1pp"
        );

        let _ = std::fs::remove_dir_all(path.parent().unwrap().parent().unwrap());
    }
}
