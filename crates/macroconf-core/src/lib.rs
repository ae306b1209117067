//! macroconf-core: YAML configuration with `$( name )$` macro expansion
//!
//! This crate loads YAML configuration documents and resolves string values
//! that reference other keys or environment variables through macros.
//!
//! # Example
//!
//! ```rust
//! use macroconf_core::Config;
//!
//! let yaml = r#"
//! ROOT: /data
//! folders:
//!   l1pp: $(ROOT)$/l1pp
//! vis:
//!   data_file: $( folders/l1pp )$/vis/psf.fits
//! "#;
//!
//! let config = Config::from_yaml(yaml).unwrap();
//! assert_eq!(
//!     config.get("vis.data_file").unwrap().as_str(),
//!     Some("/data/l1pp/vis/psf.fits")
//! );
//! ```

pub mod document;
pub mod env;
pub mod error;
pub mod locator;
pub mod macros;
pub mod path;
pub mod resolver;
pub mod value;

mod config;

pub use config::{Config, ConfigOptions};
pub use document::Document;
pub use env::{EnvSource, FnEnv, MapEnv, ProcessEnv};
pub use error::{Error, ErrorKind, Result};
pub use locator::{LocationClass, Locator};
pub use resolver::{MacroResolver, MacroScope, Precedence, Source};
pub use value::{Delimiters, KeyPath, Value};
