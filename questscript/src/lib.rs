//! Block model, code generation, conservative import and incremental
//! diagnostics for EQEmu Perl quest scripts.

pub mod block;
pub mod config;
pub mod diagnostics;
pub mod document;
pub mod generator;
pub mod importer;
pub mod plugin;
pub mod registry;
pub mod stamp;
pub mod template;

pub use block::{Block, BlockKind, Uid};
pub use diagnostics::{Diagnostics, Edit, Report, Severity, ValidationIssue};
pub use document::{Document, Parent, StructureError};
pub use generator::{Generated, Generator};
pub use importer::{Imported, Importer};
pub use plugin::PluginRegistry;
pub use stamp::TemplateRegistry;
