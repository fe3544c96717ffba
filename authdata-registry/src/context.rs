use std::path::PathBuf;

use authdata_plugin::{
    AdCapability, AdModule, AdPluginDescriptor, AdType, ModuleFlags, ModuleResult,
    PluginDirHandle, PluginLoader, RequestState,
};
use tracing::{debug, warn};

/// Symbol name plugin objects export their capability tables under.
pub const PLUGIN_SYMBOL: &str = "authdata_client_0";

/// Built-in capability tables, registered after any loader-discovered
/// ones. The stock build registers none.
pub fn built_in_descriptors() -> Vec<Box<dyn AdPluginDescriptor>> {
    Vec::new()
}

/// One initialized plugin and the request-scoped slot shared by all of
/// its table entries.
pub(crate) struct PluginInstance {
    pub(crate) module: Box<dyn AdModule>,
    pub(crate) request_state: Option<RequestState>,
}

/// One advertised AD type's registration record.
pub(crate) struct ModuleEntry {
    pub(crate) ad_type: AdType,
    /// Index into the owning instance collection.
    pub(crate) instance: usize,
    pub(crate) name: String,
    pub(crate) flags: ModuleFlags,
    /// True only for the first-registered entry of an instance; request
    /// init runs once per instance, gated by this entry's flags.
    pub(crate) primary: bool,
}

/// The built-once module table.
///
/// Owns the plugin instances, the flattened per-type entry list, and the
/// loader resource. The table is immutable in length and order after
/// construction; only request-state slot contents change afterward. All
/// session and dispatch operations take `&mut self`, so one logical
/// session runs to completion at a time.
pub struct AdContext {
    pub(crate) instances: Vec<PluginInstance>,
    pub(crate) entries: Vec<ModuleEntry>,
    loader: Option<PluginDirHandle>,
}

impl AdContext {
    /// Build a context over the built-in descriptor list only.
    pub fn new() -> ModuleResult<Self> {
        Self::build(None, built_in_descriptors())
    }

    /// Build a context over the given tables, treated as the built-in
    /// batch.
    pub fn from_descriptors(descriptors: Vec<Box<dyn AdPluginDescriptor>>) -> ModuleResult<Self> {
        Self::build(None, descriptors)
    }

    /// Build a context from loader-discovered tables followed by the
    /// built-in list. Discovered entries occupy the lower table indices.
    /// Discovery failure is not fatal; the context then carries built-in
    /// modules only.
    pub fn with_loader(
        loader: &mut dyn PluginLoader,
        search_dirs: &[PathBuf],
    ) -> ModuleResult<Self> {
        let handle = match loader.open(search_dirs, PLUGIN_SYMBOL) {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(%err, "plugin discovery failed; continuing with built-in modules");
                None
            }
        };
        Self::build(handle, built_in_descriptors())
    }

    fn build(
        loader: Option<PluginDirHandle>,
        builtins: Vec<Box<dyn AdPluginDescriptor>>,
    ) -> ModuleResult<Self> {
        // Size the table before registering anything; reservation failure
        // is the only fatal construction error.
        let discovered = loader.as_ref().map(|h| h.descriptors().len()).unwrap_or(0);
        let mut advertised = 0;
        if let Some(handle) = &loader {
            for descriptor in handle.descriptors() {
                advertised += descriptor.ad_types().len();
            }
        }
        for descriptor in &builtins {
            advertised += descriptor.ad_types().len();
        }

        let mut entries = Vec::new();
        entries.try_reserve(advertised)?;
        let mut instances = Vec::new();
        instances.try_reserve(discovered + builtins.len())?;

        let mut context = Self {
            instances,
            entries,
            loader: None,
        };
        if let Some(handle) = &loader {
            for descriptor in handle.descriptors() {
                context.register(descriptor.as_ref());
            }
        }
        for descriptor in &builtins {
            context.register(descriptor.as_ref());
        }
        context.loader = loader;
        Ok(context)
    }

    /// Register one descriptor: init once, then one entry per advertised
    /// type. A bad descriptor is dropped whole, never fatal.
    fn register(&mut self, descriptor: &dyn AdPluginDescriptor) {
        let name = descriptor.name();
        let ad_types = descriptor.ad_types();
        if ad_types.is_empty() {
            warn!(module = name, "module advertises no AD types; skipping");
            return;
        }
        let module = match descriptor.init() {
            Ok(module) => module,
            Err(err) => {
                warn!(module = name, %err, "module failed to initialize; skipping");
                return;
            }
        };
        let instance = self.instances.len();
        let mut registered: Vec<AdType> = Vec::new();
        for &ad_type in ad_types {
            if registered.contains(&ad_type) {
                warn!(module = name, ad_type, "duplicate advertised AD type; dropping repeat");
                continue;
            }
            let flags = module.flags(ad_type);
            debug!(module = name, ad_type, ?flags, "registered AD module entry");
            self.entries.push(ModuleEntry {
                ad_type,
                instance,
                name: name.to_string(),
                flags,
                primary: registered.is_empty(),
            });
            registered.push(ad_type);
        }
        self.instances.push(PluginInstance {
            module,
            request_state: None,
        });
    }

    /// Number of registered entries: one per advertised type of every
    /// descriptor that carried a non-empty type list and initialized.
    pub fn module_count(&self) -> usize {
        self.entries.len()
    }

    /// Registered (module name, AD type) pairs in dispatch order.
    pub fn registered_types(&self) -> Vec<(&str, AdType)> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.ad_type))
            .collect()
    }
}

impl Drop for AdContext {
    fn drop(&mut self) {
        // Release request-scoped state ahead of the plugin instances;
        // the loader handle goes last, after its tables are unreachable.
        for instance in &mut self.instances {
            if let Some(state) = instance.request_state.take() {
                if has_capability(instance.module.as_ref(), AdCapability::RequestFini) {
                    instance.module.request_fini(state);
                }
            }
        }
    }
}

pub(crate) fn has_capability(module: &dyn AdModule, capability: AdCapability) -> bool {
    module.capabilities().contains(&capability)
}
