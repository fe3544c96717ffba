pub mod context;
pub mod dispatch;
mod merge;
pub mod session;

// Re-export key types for convenience.
pub use context::{AdContext, PLUGIN_SYMBOL, built_in_descriptors};
pub use dispatch::ExportAttributesError;
