//! Configuration management
//!
//! Node address, mining address, data directory, bootstrap peers and the
//! network timing knobs. Defaults can be overridden from a TOML file and
//! from the environment.

pub mod settings;

pub use settings::Config;
