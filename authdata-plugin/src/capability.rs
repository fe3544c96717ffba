use std::any::Any;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::attribute::{AttributeTypes, AttributeValue};
use crate::element::{AdElement, AdType, AuthMaterial};
use crate::error::{ModuleError, ModuleResult};

bitflags! {
    /// Per-type module flags.
    ///
    /// The usage bits select which sessions initialize the module's
    /// request-scoped state; `INFORMATIONAL` downgrades the module's
    /// failures in verification and session init.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModuleFlags: u32 {
        const USAGE_AS_REQ = 1 << 0;
        const USAGE_TGS_REQ = 1 << 1;
        const USAGE_AP_REQ = 1 << 2;
        const USAGE_KDC_ISSUED = 1 << 3;
        const INFORMATIONAL = 1 << 4;
    }
}

/// Mask of usage bits a caller passes to session init.
pub type UsageMask = ModuleFlags;

/// Optional operations a module can opt into.
///
/// The dispatcher silently skips a module for any operation missing from
/// its capability set; only the set itself, the advertised type list, the
/// name, and init are mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdCapability {
    RequestInit,
    RequestFini,
    Verify,
    GetAttributeTypes,
    GetAttribute,
    SetAttribute,
    DeleteAttribute,
    ExportAttributes,
    ExportInternal,
    FreeInternal,
}

/// Opaque request-scoped state produced by request-init, shared by every
/// table entry of the producing plugin instance.
pub type RequestState = Box<dyn Any + Send>;

/// Opaque internal representation handed out by export-internal and
/// returned through free-internal.
pub type InternalRepr = Box<dyn Any + Send>;

/// A registered capability table: what the registry initializes plugin
/// instances from.
pub trait AdPluginDescriptor: Send {
    /// Diagnostic label, copied into every table entry at registration.
    fn name(&self) -> &str;

    /// Advertised AD types. A descriptor advertising none is excluded from
    /// the registry entirely; repeats within one descriptor are dropped.
    fn ad_types(&self) -> &[AdType];

    /// Initialize the plugin-level state. Called exactly once per
    /// registration regardless of how many types the descriptor
    /// advertises; failure excludes the whole descriptor.
    fn init(&self) -> ModuleResult<Box<dyn AdModule>>;
}

/// An initialized plugin occurrence.
///
/// The implementor owns its plugin-level state; dropping it is the
/// plugin-level finalizer and runs exactly once per instance. All
/// operations take `&self`; interior mutability of plugin-level state is
/// the module's own responsibility. Request-scoped state is handed in
/// explicitly and mutably; the registry guarantees a single live session
/// at a time.
pub trait AdModule: Send {
    /// The optional operations this module participates in.
    fn capabilities(&self) -> &[AdCapability];

    /// Per-type flags, queried once at registration.
    fn flags(&self, _ad_type: AdType) -> ModuleFlags {
        ModuleFlags::empty()
    }

    fn request_init(&self, _usage: UsageMask) -> ModuleResult<RequestState> {
        Err(not_implemented("request_init"))
    }

    fn request_fini(&self, _state: RequestState) {}

    fn verify(
        &self,
        _request: Option<&mut RequestState>,
        _material: &AuthMaterial,
        _key: Option<&[u8]>,
        _elements: &[AdElement],
    ) -> ModuleResult<()> {
        Err(not_implemented("verify"))
    }

    fn get_attribute_types(
        &self,
        _request: Option<&mut RequestState>,
    ) -> ModuleResult<AttributeTypes> {
        Err(not_implemented("get_attribute_types"))
    }

    fn get_attribute(
        &self,
        _request: Option<&mut RequestState>,
        _id: &str,
    ) -> ModuleResult<AttributeValue> {
        Err(not_implemented("get_attribute"))
    }

    fn set_attribute(
        &self,
        _request: Option<&mut RequestState>,
        _complete: bool,
        _id: &str,
        _value: &[u8],
    ) -> ModuleResult<()> {
        Err(not_implemented("set_attribute"))
    }

    fn delete_attribute(&self, _request: Option<&mut RequestState>, _id: &str) -> ModuleResult<()> {
        Err(not_implemented("delete_attribute"))
    }

    fn export_attributes(
        &self,
        _request: Option<&mut RequestState>,
    ) -> ModuleResult<Vec<AdElement>> {
        Err(not_implemented("export_attributes"))
    }

    fn export_internal(
        &self,
        _request: Option<&mut RequestState>,
        _ad_type: AdType,
    ) -> ModuleResult<InternalRepr> {
        Err(not_implemented("export_internal"))
    }

    fn free_internal(
        &self,
        _request: Option<&mut RequestState>,
        _ad_type: AdType,
        _value: InternalRepr,
    ) {
    }
}

fn not_implemented(operation: &str) -> ModuleError {
    ModuleError::Failed(format!("module does not implement {operation}"))
}

/// The informational downgrade policy, applied uniformly at the two call
/// sites that honor it (verification and session init).
///
/// A failure from an entry whose flags include `INFORMATIONAL` counts as
/// success with no result; resource exhaustion is never downgraded.
pub fn apply_informational_policy<T>(
    flags: ModuleFlags,
    result: ModuleResult<T>,
) -> ModuleResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if flags.contains(ModuleFlags::INFORMATIONAL) && !err.is_resource_exhaustion() => {
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
