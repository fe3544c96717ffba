use authdata_plugin::{AdCapability, ModuleResult, UsageMask, apply_informational_policy};
use tracing::debug;

use crate::context::{AdContext, has_capability};

impl AdContext {
    /// Initialize request-scoped state for the instances whose
    /// primary-entry flags intersect `usage`.
    ///
    /// Request init runs at most once per plugin instance. A failure from
    /// an informational entry counts as success and the walk continues;
    /// any other failure stops the walk and is returned: instances after
    /// the failing one stay uninitialized, instances before it stay live
    /// until [`end_session`](Self::end_session) releases them.
    pub fn begin_session(&mut self, usage: UsageMask) -> ModuleResult<()> {
        for i in 0..self.entries.len() {
            let entry = &self.entries[i];
            if !entry.primary {
                continue;
            }
            let flags = entry.flags;
            if (flags & usage).is_empty() {
                continue;
            }
            let index = entry.instance;
            let instance = &mut self.instances[index];
            if !has_capability(instance.module.as_ref(), AdCapability::RequestInit) {
                continue;
            }
            // Re-entering an active session is a caller error; the live
            // state is kept rather than re-initialized or leaked.
            if instance.request_state.is_some() {
                continue;
            }
            if let Some(state) =
                apply_informational_policy(flags, instance.module.request_init(usage))?
            {
                debug!(entry = i, "request state initialized");
                instance.request_state = Some(state);
            }
        }
        Ok(())
    }

    /// Release request-scoped state. Each live state value is released
    /// exactly once, through request-fini when the module exposes it.
    /// Infallible, idempotent, and safe after a failed or absent
    /// [`begin_session`](Self::begin_session).
    pub fn end_session(&mut self) {
        for instance in &mut self.instances {
            if let Some(state) = instance.request_state.take() {
                if has_capability(instance.module.as_ref(), AdCapability::RequestFini) {
                    instance.module.request_fini(state);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authdata_plugin::testing::{CallLog, ScriptedPlugin};
    use authdata_plugin::{ModuleError, ModuleFlags};
    use std::sync::atomic::Ordering;

    fn ap_req() -> UsageMask {
        ModuleFlags::USAGE_AP_REQ
    }

    #[test]
    fn test_init_gated_by_usage_mask() {
        let selected = ScriptedPlugin::new("selected", &[1])
            .with_flags(1, ModuleFlags::USAGE_AP_REQ)
            .with_request_init(Ok(()));
        let skipped = ScriptedPlugin::new("skipped", &[2])
            .with_flags(2, ModuleFlags::USAGE_KDC_ISSUED)
            .with_request_init(Ok(()));
        let selected_inits = selected.request_init_counter();
        let skipped_inits = skipped.request_init_counter();

        let mut context =
            AdContext::from_descriptors(vec![Box::new(selected), Box::new(skipped)]).unwrap();
        context.begin_session(ap_req()).unwrap();

        assert_eq!(selected_inits.load(Ordering::SeqCst), 1);
        assert_eq!(skipped_inits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_init_runs_once_per_instance_gated_by_primary_flags() {
        // Only the first-registered type's flags matter; the second type
        // carries no usage bits and must not prevent (or repeat) init.
        let plugin = ScriptedPlugin::new("pac", &[128, 141])
            .with_flags(128, ModuleFlags::USAGE_AP_REQ)
            .with_request_init(Ok(()));
        let inits = plugin.request_init_counter();

        let mut context = AdContext::from_descriptors(vec![Box::new(plugin)]).unwrap();
        context.begin_session(ap_req()).unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_init_skipped_when_primary_flags_do_not_match() {
        // Usage bits on a secondary type do not select the instance.
        let plugin = ScriptedPlugin::new("pac", &[128, 141])
            .with_flags(141, ModuleFlags::USAGE_AP_REQ)
            .with_request_init(Ok(()));
        let inits = plugin.request_init_counter();

        let mut context = AdContext::from_descriptors(vec![Box::new(plugin)]).unwrap();
        context.begin_session(ap_req()).unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_informational_init_failure_is_downgraded() {
        let log = CallLog::new();
        let flaky = ScriptedPlugin::new("flaky", &[1])
            .with_log(&log)
            .with_flags(1, ModuleFlags::USAGE_AP_REQ | ModuleFlags::INFORMATIONAL)
            .with_request_init(Err(ModuleError::Failed("no kdc".into())));
        let healthy = ScriptedPlugin::new("healthy", &[2])
            .with_log(&log)
            .with_flags(2, ModuleFlags::USAGE_AP_REQ)
            .with_request_init(Ok(()));
        let healthy_inits = healthy.request_init_counter();

        let mut context =
            AdContext::from_descriptors(vec![Box::new(flaky), Box::new(healthy)]).unwrap();
        context.begin_session(ap_req()).unwrap();
        assert_eq!(healthy_inits.load(Ordering::SeqCst), 1);
        assert_eq!(
            log.events(),
            vec!["flaky:request_init", "healthy:request_init"]
        );
    }

    #[test]
    fn test_hard_init_failure_stops_later_instances() {
        let failing = ScriptedPlugin::new("failing", &[2])
            .with_flags(2, ModuleFlags::USAGE_AP_REQ)
            .with_request_init(Err(ModuleError::Failed("no kdc".into())));
        let early = ScriptedPlugin::new("early", &[1])
            .with_flags(1, ModuleFlags::USAGE_AP_REQ)
            .with_request_init(Ok(()));
        let late = ScriptedPlugin::new("late", &[3])
            .with_flags(3, ModuleFlags::USAGE_AP_REQ)
            .with_request_init(Ok(()));
        let late_inits = late.request_init_counter();
        let early_finis = early.request_fini_counter();

        let mut context = AdContext::from_descriptors(vec![
            Box::new(early),
            Box::new(failing),
            Box::new(late),
        ])
        .unwrap();

        let err = context.begin_session(ap_req()).unwrap_err();
        assert_eq!(err, ModuleError::Failed("no kdc".into()));
        assert_eq!(late_inits.load(Ordering::SeqCst), 0);

        // State initialized before the failure stays live until the
        // session ends, then is released exactly once.
        context.end_session();
        assert_eq!(early_finis.load(Ordering::SeqCst), 1);
        context.end_session();
        assert_eq!(early_finis.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resource_exhaustion_is_never_downgraded() {
        let plugin = ScriptedPlugin::new("oom", &[1])
            .with_flags(1, ModuleFlags::USAGE_AP_REQ | ModuleFlags::INFORMATIONAL)
            .with_request_init(Err(ModuleError::ResourceExhausted("state".into())));

        let mut context = AdContext::from_descriptors(vec![Box::new(plugin)]).unwrap();
        let err = context.begin_session(ap_req()).unwrap_err();
        assert!(err.is_resource_exhaustion());
    }

    #[test]
    fn test_end_session_without_begin_is_a_noop() {
        let plugin = ScriptedPlugin::new("pac", &[128]).with_request_init(Ok(()));
        let finis = plugin.request_fini_counter();
        let mut context = AdContext::from_descriptors(vec![Box::new(plugin)]).unwrap();
        context.end_session();
        assert_eq!(finis.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_state_without_request_fini_is_still_released() {
        let plugin = ScriptedPlugin::new("stateless-fini", &[1])
            .with_flags(1, ModuleFlags::USAGE_AP_REQ)
            .with_request_init(Ok(()))
            .without_request_fini();
        let finis = plugin.request_fini_counter();

        let mut context = AdContext::from_descriptors(vec![Box::new(plugin)]).unwrap();
        context.begin_session(ap_req()).unwrap();
        context.end_session();
        // The module never sees a fini call, but the state slot is
        // cleared and a second end remains a no-op.
        assert_eq!(finis.load(Ordering::SeqCst), 0);
        context.end_session();
        assert_eq!(finis.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_teardown_releases_live_request_state_once() {
        let plugin = ScriptedPlugin::new("pac", &[128, 141])
            .with_flags(128, ModuleFlags::USAGE_AP_REQ)
            .with_request_init(Ok(()));
        let finis = plugin.request_fini_counter();

        let mut context = AdContext::from_descriptors(vec![Box::new(plugin)]).unwrap();
        context.begin_session(ap_req()).unwrap();
        drop(context);
        assert_eq!(finis.load(Ordering::SeqCst), 1);
    }
}
