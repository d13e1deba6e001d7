pub mod catalog;
pub mod config;
pub mod error;
pub mod utils;
pub mod verdict;

pub use catalog::{Catalog, ExerciseDefinition};
pub use config::{EngineConfig, NamespaceMode, SandboxBackend};
pub use error::{CatalogError, ConfigError, SandboxLaunchError, ValidationError};
pub use verdict::{Verdict, VerdictKind};
