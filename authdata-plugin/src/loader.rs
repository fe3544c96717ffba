use std::any::Any;
use std::path::PathBuf;

use crate::capability::AdPluginDescriptor;
use crate::error::ModuleResult;

/// Discovered plugin descriptors plus the resource that keeps them loaded.
///
/// The registry stores the handle in the context for the context's whole
/// lifetime; dropping the context releases it exactly once.
pub struct PluginDirHandle {
    descriptors: Vec<Box<dyn AdPluginDescriptor>>,
    _resource: Option<Box<dyn Any + Send>>,
}

impl PluginDirHandle {
    pub fn new(descriptors: Vec<Box<dyn AdPluginDescriptor>>) -> Self {
        Self {
            descriptors,
            _resource: None,
        }
    }

    /// Attach the opaque resource backing the descriptors (for loaders
    /// that must keep plugin objects mapped while the tables are in use).
    pub fn with_resource(
        descriptors: Vec<Box<dyn AdPluginDescriptor>>,
        resource: Box<dyn Any + Send>,
    ) -> Self {
        Self {
            descriptors,
            _resource: Some(resource),
        }
    }

    pub fn descriptors(&self) -> &[Box<dyn AdPluginDescriptor>] {
        &self.descriptors
    }
}

/// Plugin discovery collaborator: scans search directories for plugin
/// objects exporting `symbol` and returns their capability tables.
pub trait PluginLoader {
    fn open(&mut self, search_dirs: &[PathBuf], symbol: &str) -> ModuleResult<PluginDirHandle>;
}

/// Loader over a fixed descriptor list, for tests and embedded
/// deployments with no dynamic discovery. Yields its descriptors once.
#[derive(Default)]
pub struct StaticLoader {
    descriptors: Vec<Box<dyn AdPluginDescriptor>>,
}

impl StaticLoader {
    pub fn new(descriptors: Vec<Box<dyn AdPluginDescriptor>>) -> Self {
        Self { descriptors }
    }
}

impl PluginLoader for StaticLoader {
    fn open(&mut self, _search_dirs: &[PathBuf], _symbol: &str) -> ModuleResult<PluginDirHandle> {
        Ok(PluginDirHandle::new(std::mem::take(&mut self.descriptors)))
    }
}
