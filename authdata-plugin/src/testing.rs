//! Scripted plugin doubles for exercising registry construction, request
//! sessions, and dispatch fan-out in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::attribute::{AttributeTypes, AttributeValue};
use crate::capability::{
    AdCapability, AdModule, AdPluginDescriptor, InternalRepr, ModuleFlags, RequestState, UsageMask,
};
use crate::element::{AdElement, AdType, AuthMaterial};
use crate::error::{ModuleError, ModuleResult};

/// Shared journal recording every call made into scripted plugins, in
/// invocation order. Clone it before handing the plugin away.
#[derive(Clone, Default)]
pub struct CallLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.into());
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

/// A scripted capability table.
///
/// Builder methods opt the produced module into capabilities; anything not
/// scripted stays out of the capability set and is never dispatched to.
/// Counter handles survive the move into the registry, so tests grab them
/// first.
pub struct ScriptedPlugin {
    name: String,
    ad_types: Vec<AdType>,
    flags: HashMap<AdType, ModuleFlags>,
    fail_init: bool,
    request_init_result: Option<ModuleResult<()>>,
    has_request_fini: bool,
    verify_result: Option<ModuleResult<()>>,
    attribute_types_result: Option<ModuleResult<AttributeTypes>>,
    get_attribute_results: Option<Arc<Mutex<VecDeque<ModuleResult<AttributeValue>>>>>,
    set_result: Option<ModuleResult<()>>,
    delete_result: Option<ModuleResult<()>>,
    export_result: Option<ModuleResult<Vec<AdElement>>>,
    export_internal_token: Option<u32>,
    log: CallLog,
    fini_count: Arc<AtomicUsize>,
    request_init_count: Arc<AtomicUsize>,
    request_fini_count: Arc<AtomicUsize>,
}

impl ScriptedPlugin {
    pub fn new(name: &str, ad_types: &[AdType]) -> Self {
        Self {
            name: name.into(),
            ad_types: ad_types.to_vec(),
            flags: HashMap::new(),
            fail_init: false,
            request_init_result: None,
            has_request_fini: false,
            verify_result: None,
            attribute_types_result: None,
            get_attribute_results: None,
            set_result: None,
            delete_result: None,
            export_result: None,
            export_internal_token: None,
            log: CallLog::new(),
            fini_count: Arc::new(AtomicUsize::new(0)),
            request_init_count: Arc::new(AtomicUsize::new(0)),
            request_fini_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Share one journal across several plugins to assert visit order.
    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    pub fn with_flags(mut self, ad_type: AdType, flags: ModuleFlags) -> Self {
        self.flags.insert(ad_type, flags);
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Opt into request-init (and request-fini) with the given outcome.
    pub fn with_request_init(mut self, result: ModuleResult<()>) -> Self {
        self.request_init_result = Some(result);
        self.has_request_fini = true;
        self
    }

    /// Keep request-init but drop request-fini from the capability set.
    pub fn without_request_fini(mut self) -> Self {
        self.has_request_fini = false;
        self
    }

    pub fn with_verify(mut self, result: ModuleResult<()>) -> Self {
        self.verify_result = Some(result);
        self
    }

    pub fn with_attribute_types(mut self, result: ModuleResult<AttributeTypes>) -> Self {
        self.attribute_types_result = Some(result);
        self
    }

    /// Script a sequence of get-attribute outcomes, consumed in order;
    /// once exhausted the module reports "not found".
    pub fn with_get_attribute(mut self, results: Vec<ModuleResult<AttributeValue>>) -> Self {
        self.get_attribute_results = Some(Arc::new(Mutex::new(results.into())));
        self
    }

    pub fn with_set_attribute(mut self, result: ModuleResult<()>) -> Self {
        self.set_result = Some(result);
        self
    }

    pub fn with_delete_attribute(mut self, result: ModuleResult<()>) -> Self {
        self.delete_result = Some(result);
        self
    }

    pub fn with_export_attributes(mut self, result: ModuleResult<Vec<AdElement>>) -> Self {
        self.export_result = Some(result);
        self
    }

    /// Opt into export-internal/free-internal; the exported value is the
    /// given token boxed as an opaque representation.
    pub fn with_export_internal(mut self, token: u32) -> Self {
        self.export_internal_token = Some(token);
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Times the produced module instance has been dropped.
    pub fn fini_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.fini_count)
    }

    pub fn request_init_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.request_init_count)
    }

    pub fn request_fini_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.request_fini_count)
    }

    fn capability_set(&self) -> Vec<AdCapability> {
        let mut caps = Vec::new();
        if self.request_init_result.is_some() {
            caps.push(AdCapability::RequestInit);
        }
        if self.has_request_fini {
            caps.push(AdCapability::RequestFini);
        }
        if self.verify_result.is_some() {
            caps.push(AdCapability::Verify);
        }
        if self.attribute_types_result.is_some() {
            caps.push(AdCapability::GetAttributeTypes);
        }
        if self.get_attribute_results.is_some() {
            caps.push(AdCapability::GetAttribute);
        }
        if self.set_result.is_some() {
            caps.push(AdCapability::SetAttribute);
        }
        if self.delete_result.is_some() {
            caps.push(AdCapability::DeleteAttribute);
        }
        if self.export_result.is_some() {
            caps.push(AdCapability::ExportAttributes);
        }
        if self.export_internal_token.is_some() {
            caps.push(AdCapability::ExportInternal);
            caps.push(AdCapability::FreeInternal);
        }
        caps
    }
}

impl AdPluginDescriptor for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn ad_types(&self) -> &[AdType] {
        &self.ad_types
    }

    fn init(&self) -> ModuleResult<Box<dyn AdModule>> {
        if self.fail_init {
            return Err(ModuleError::Failed(format!("{} refused to start", self.name)));
        }
        Ok(Box::new(ScriptedModule {
            name: self.name.clone(),
            caps: self.capability_set(),
            flags: self.flags.clone(),
            request_init_result: self.request_init_result.clone(),
            verify_result: self.verify_result.clone(),
            attribute_types_result: self.attribute_types_result.clone(),
            get_attribute_results: self.get_attribute_results.clone(),
            set_result: self.set_result.clone(),
            delete_result: self.delete_result.clone(),
            export_result: self.export_result.clone(),
            export_internal_token: self.export_internal_token,
            log: self.log.clone(),
            fini_count: Arc::clone(&self.fini_count),
            request_init_count: Arc::clone(&self.request_init_count),
            request_fini_count: Arc::clone(&self.request_fini_count),
        }))
    }
}

struct ScriptedModule {
    name: String,
    caps: Vec<AdCapability>,
    flags: HashMap<AdType, ModuleFlags>,
    request_init_result: Option<ModuleResult<()>>,
    verify_result: Option<ModuleResult<()>>,
    attribute_types_result: Option<ModuleResult<AttributeTypes>>,
    get_attribute_results: Option<Arc<Mutex<VecDeque<ModuleResult<AttributeValue>>>>>,
    set_result: Option<ModuleResult<()>>,
    delete_result: Option<ModuleResult<()>>,
    export_result: Option<ModuleResult<Vec<AdElement>>>,
    export_internal_token: Option<u32>,
    log: CallLog,
    fini_count: Arc<AtomicUsize>,
    request_init_count: Arc<AtomicUsize>,
    request_fini_count: Arc<AtomicUsize>,
}

impl ScriptedModule {
    fn scripted<T: Clone>(&self, slot: &Option<ModuleResult<T>>) -> ModuleResult<T> {
        slot.clone()
            .unwrap_or_else(|| Err(ModuleError::Failed(format!("{} is unscripted", self.name))))
    }
}

impl AdModule for ScriptedModule {
    fn capabilities(&self) -> &[AdCapability] {
        &self.caps
    }

    fn flags(&self, ad_type: AdType) -> ModuleFlags {
        self.flags.get(&ad_type).copied().unwrap_or_default()
    }

    fn request_init(&self, _usage: UsageMask) -> ModuleResult<RequestState> {
        self.log.record(format!("{}:request_init", self.name));
        self.request_init_count.fetch_add(1, Ordering::SeqCst);
        self.scripted(&self.request_init_result)
            .map(|()| Box::new(()) as RequestState)
    }

    fn request_fini(&self, state: RequestState) {
        self.log.record(format!("{}:request_fini", self.name));
        self.request_fini_count.fetch_add(1, Ordering::SeqCst);
        drop(state);
    }

    fn verify(
        &self,
        _request: Option<&mut RequestState>,
        _material: &AuthMaterial,
        _key: Option<&[u8]>,
        elements: &[AdElement],
    ) -> ModuleResult<()> {
        let ad_type = elements.first().map(|e| e.ad_type).unwrap_or_default();
        self.log.record(format!("{}:verify:{ad_type}", self.name));
        self.scripted(&self.verify_result)
    }

    fn get_attribute_types(
        &self,
        _request: Option<&mut RequestState>,
    ) -> ModuleResult<AttributeTypes> {
        self.log.record(format!("{}:get_attribute_types", self.name));
        self.scripted(&self.attribute_types_result)
    }

    fn get_attribute(
        &self,
        _request: Option<&mut RequestState>,
        id: &str,
    ) -> ModuleResult<AttributeValue> {
        self.log.record(format!("{}:get_attribute:{id}", self.name));
        let Some(results) = &self.get_attribute_results else {
            return Err(ModuleError::NotFound);
        };
        match results.lock() {
            Ok(mut queue) => queue.pop_front().unwrap_or(Err(ModuleError::NotFound)),
            Err(_) => Err(ModuleError::NotFound),
        }
    }

    fn set_attribute(
        &self,
        _request: Option<&mut RequestState>,
        _complete: bool,
        id: &str,
        _value: &[u8],
    ) -> ModuleResult<()> {
        self.log.record(format!("{}:set_attribute:{id}", self.name));
        self.scripted(&self.set_result)
    }

    fn delete_attribute(&self, _request: Option<&mut RequestState>, id: &str) -> ModuleResult<()> {
        self.log.record(format!("{}:delete_attribute:{id}", self.name));
        self.scripted(&self.delete_result)
    }

    fn export_attributes(
        &self,
        _request: Option<&mut RequestState>,
    ) -> ModuleResult<Vec<AdElement>> {
        self.log.record(format!("{}:export_attributes", self.name));
        self.scripted(&self.export_result)
    }

    fn export_internal(
        &self,
        _request: Option<&mut RequestState>,
        ad_type: AdType,
    ) -> ModuleResult<InternalRepr> {
        self.log
            .record(format!("{}:export_internal:{ad_type}", self.name));
        match self.export_internal_token {
            Some(token) => Ok(Box::new(token)),
            None => Err(ModuleError::NotFound),
        }
    }

    fn free_internal(
        &self,
        _request: Option<&mut RequestState>,
        ad_type: AdType,
        value: InternalRepr,
    ) {
        self.log
            .record(format!("{}:free_internal:{ad_type}", self.name));
        drop(value);
    }
}

impl Drop for ScriptedModule {
    fn drop(&mut self) {
        self.log.record(format!("{}:fini", self.name));
        self.fini_count.fetch_add(1, Ordering::SeqCst);
    }
}
