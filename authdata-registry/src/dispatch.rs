use authdata_plugin::{
    AdCapability, AdElement, AdType, AttributeTypes, AttributeValue, AuthMaterial, InternalRepr,
    ModuleError, ModuleResult, apply_informational_policy, find_ad_elements,
};
use tracing::debug;

use crate::context::{AdContext, PluginInstance, has_capability};
use crate::merge::merge_append;

/// Error from [`AdContext::export_attributes`] carrying whatever was
/// accumulated before the halt; the caller owns it on every path.
#[derive(Debug, thiserror::Error)]
#[error("attribute export halted: {source}")]
pub struct ExportAttributesError {
    pub exported: Vec<AdElement>,
    #[source]
    pub source: ModuleError,
}

impl AdContext {
    /// Verify the exchange's authorization data across all modules, in
    /// table order.
    ///
    /// An entry is consulted only when the exchange carries elements of
    /// its advertised type. Failures from informational entries are
    /// downgraded; any other failure stops the walk and is returned.
    pub fn verify(&mut self, material: &AuthMaterial, key: Option<&[u8]>) -> ModuleResult<()> {
        for i in 0..self.entries.len() {
            let (ad_type, flags, index) = {
                let entry = &self.entries[i];
                (entry.ad_type, entry.flags, entry.instance)
            };
            let PluginInstance {
                module,
                request_state,
            } = &mut self.instances[index];
            if !has_capability(module.as_ref(), AdCapability::Verify) {
                continue;
            }
            let Some(elements) = find_ad_elements(
                &material.ticket_elements,
                &material.authenticator_elements,
                ad_type,
            ) else {
                continue;
            };
            let result = module.verify(request_state.as_mut(), material, key, &elements);
            apply_informational_policy(flags, result)?;
            // The found collection is released here whatever the outcome.
        }
        Ok(())
    }

    /// Enumerate asserted and verified attribute-type names across all
    /// modules. A module that fails contributes nothing; only merge
    /// exhaustion aborts, and the caller then owns nothing to release.
    pub fn attribute_types(&mut self) -> ModuleResult<AttributeTypes> {
        let mut accumulated = AttributeTypes::default();
        for i in 0..self.entries.len() {
            let index = self.entries[i].instance;
            let PluginInstance {
                module,
                request_state,
            } = &mut self.instances[index];
            if !has_capability(module.as_ref(), AdCapability::GetAttributeTypes) {
                continue;
            }
            let Ok(types) = module.get_attribute_types(request_state.as_mut()) else {
                continue;
            };
            merge_append(&mut accumulated.asserted, types.asserted)?;
            merge_append(&mut accumulated.verified, types.verified)?;
        }
        Ok(accumulated)
    }

    /// Fetch one attribute. The first module to report success is
    /// authoritative and ends the walk; otherwise the last reported code
    /// comes back, initially "not found".
    pub fn get_attribute(&mut self, id: &str) -> ModuleResult<AttributeValue> {
        let mut last = Err(ModuleError::NotFound);
        for i in 0..self.entries.len() {
            let index = self.entries[i].instance;
            let PluginInstance {
                module,
                request_state,
            } = &mut self.instances[index];
            if !has_capability(module.as_ref(), AdCapability::GetAttribute) {
                continue;
            }
            last = module.get_attribute(request_state.as_mut(), id);
            if last.is_ok() {
                break;
            }
        }
        last
    }

    /// Broadcast an attribute write to every module exposing set. "Not
    /// found" never halts the broadcast; any other failure does. The
    /// final code is the last invoked module's ("not found" when none
    /// participated).
    pub fn set_attribute(&mut self, complete: bool, id: &str, value: &[u8]) -> ModuleResult<()> {
        let mut last = Err(ModuleError::NotFound);
        for i in 0..self.entries.len() {
            let index = self.entries[i].instance;
            let PluginInstance {
                module,
                request_state,
            } = &mut self.instances[index];
            if !has_capability(module.as_ref(), AdCapability::SetAttribute) {
                continue;
            }
            last = module.set_attribute(request_state.as_mut(), complete, id, value);
            match &last {
                Ok(()) | Err(ModuleError::NotFound) => {}
                Err(_) => break,
            }
        }
        last
    }

    /// Broadcast an attribute delete, with the same halt policy as
    /// [`set_attribute`](Self::set_attribute), gated on the delete
    /// capability.
    pub fn delete_attribute(&mut self, id: &str) -> ModuleResult<()> {
        let mut last = Err(ModuleError::NotFound);
        for i in 0..self.entries.len() {
            let index = self.entries[i].instance;
            let PluginInstance {
                module,
                request_state,
            } = &mut self.instances[index];
            if !has_capability(module.as_ref(), AdCapability::DeleteAttribute) {
                continue;
            }
            last = module.delete_attribute(request_state.as_mut(), id);
            match &last {
                Ok(()) | Err(ModuleError::NotFound) => {}
                Err(_) => break,
            }
        }
        last
    }

    /// Collect every module's exported authorization-data elements into
    /// one array. "Not found" is tolerated; any other failure halts the
    /// broadcast and surfaces through an error that carries the array
    /// accumulated so far.
    pub fn export_attributes(&mut self) -> Result<Vec<AdElement>, ExportAttributesError> {
        let mut accumulated: Vec<AdElement> = Vec::new();
        let mut last: ModuleResult<()> = Err(ModuleError::NotFound);
        for i in 0..self.entries.len() {
            let index = self.entries[i].instance;
            let PluginInstance {
                module,
                request_state,
            } = &mut self.instances[index];
            if !has_capability(module.as_ref(), AdCapability::ExportAttributes) {
                continue;
            }
            match module.export_attributes(request_state.as_mut()) {
                Ok(elements) => {
                    last = Ok(());
                    if let Err(err) = merge_append(&mut accumulated, elements) {
                        return Err(ExportAttributesError {
                            exported: accumulated,
                            source: err,
                        });
                    }
                }
                Err(ModuleError::NotFound) => {
                    last = Err(ModuleError::NotFound);
                }
                Err(err) => {
                    return Err(ExportAttributesError {
                        exported: accumulated,
                        source: err,
                    });
                }
            }
        }
        match last {
            Ok(()) => Ok(accumulated),
            Err(err) => Err(ExportAttributesError {
                exported: accumulated,
                source: err,
            }),
        }
    }

    /// Export the internal representation held by the first entry whose
    /// type matches and which exposes the capability. Not broadcast.
    pub fn export_internal(&mut self, ad_type: AdType) -> ModuleResult<InternalRepr> {
        for i in 0..self.entries.len() {
            let (entry_type, index) = {
                let entry = &self.entries[i];
                (entry.ad_type, entry.instance)
            };
            if entry_type != ad_type {
                continue;
            }
            let PluginInstance {
                module,
                request_state,
            } = &mut self.instances[index];
            if !has_capability(module.as_ref(), AdCapability::ExportInternal) {
                continue;
            }
            return module.export_internal(request_state.as_mut(), ad_type);
        }
        Err(ModuleError::NotFound)
    }

    /// Hand an exported internal representation back to its module for
    /// release. Routed exactly like
    /// [`export_internal`](Self::export_internal).
    pub fn free_internal(&mut self, ad_type: AdType, value: InternalRepr) -> ModuleResult<()> {
        for i in 0..self.entries.len() {
            let (entry_type, index) = {
                let entry = &self.entries[i];
                (entry.ad_type, entry.instance)
            };
            if entry_type != ad_type {
                continue;
            }
            let PluginInstance {
                module,
                request_state,
            } = &mut self.instances[index];
            if !has_capability(module.as_ref(), AdCapability::FreeInternal) {
                continue;
            }
            module.free_internal(request_state.as_mut(), ad_type, value);
            return Ok(());
        }
        Err(ModuleError::NotFound)
    }

    /// Log every attribute the modules report, one event per value,
    /// following each attribute's has-more chain.
    pub fn dump_attributes(&mut self) {
        let types = match self.attribute_types() {
            Ok(types) => types,
            Err(err) => {
                debug!(%err, "attribute enumeration failed");
                return;
            }
        };
        for (kind, names) in [("asserted", &types.asserted), ("verified", &types.verified)] {
            for name in names {
                self.dump_attribute(kind, name);
            }
        }
    }

    fn dump_attribute(&mut self, kind: &str, id: &str) {
        loop {
            match self.get_attribute(id) {
                Ok(value) => {
                    debug!(
                        kind,
                        attribute = id,
                        value_len = value.value.len(),
                        display = %value.display_value,
                        more = value.has_more,
                        "attribute value"
                    );
                    if !value.has_more {
                        break;
                    }
                }
                Err(err) => {
                    debug!(attribute = id, %err, "attribute fetch failed");
                    break;
                }
            }
        }
    }
}
