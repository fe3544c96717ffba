pub mod attribute;
pub mod capability;
pub mod element;
pub mod error;
pub mod loader;
pub mod testing;

// Re-export key types for convenience.
pub use attribute::{AttributeTypes, AttributeValue};
pub use capability::{
    AdCapability, AdModule, AdPluginDescriptor, InternalRepr, ModuleFlags, RequestState, UsageMask,
    apply_informational_policy,
};
pub use element::{AdElement, AdType, AuthMaterial, find_ad_elements};
pub use error::{ModuleError, ModuleResult};
pub use loader::{PluginDirHandle, PluginLoader, StaticLoader};
