use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use driftscan_domain::{
    Comparer, Error, ErrorCode, PlatformProvider, ResourceKind, Result, StateProvider,
};

#[derive(Default)]
struct Inner {
    state_providers: HashMap<String, Arc<dyn StateProvider>>,
    platform_providers: HashMap<String, Arc<dyn PlatformProvider>>,
    comparers: HashMap<ResourceKind, Arc<dyn Comparer>>,
}

/// Typed lookup table for the pluggable components. Built once at startup,
/// then read-mostly; registering a duplicate key is an error.
#[derive(Default)]
pub struct ComponentRegistry {
    inner: RwLock<Inner>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_state_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn StateProvider>,
    ) -> Result<()> {
        let name = name.into();
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.state_providers.contains_key(&name) {
            return Err(Error::new(
                ErrorCode::Internal,
                format!("state provider '{name}' is already registered"),
            ));
        }
        inner.state_providers.insert(name, provider);
        Ok(())
    }

    pub fn register_platform_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn PlatformProvider>,
    ) -> Result<()> {
        let name = name.into();
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.platform_providers.contains_key(&name) {
            return Err(Error::new(
                ErrorCode::Internal,
                format!("platform provider '{name}' is already registered"),
            ));
        }
        inner.platform_providers.insert(name, provider);
        Ok(())
    }

    pub fn register_comparer(&self, comparer: Arc<dyn Comparer>) -> Result<()> {
        let kind = comparer.kind();
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.comparers.contains_key(&kind) {
            return Err(Error::new(
                ErrorCode::Internal,
                format!("comparer for kind '{kind}' is already registered"),
            ));
        }
        inner.comparers.insert(kind, comparer);
        Ok(())
    }

    pub fn state_provider(&self, name: &str) -> Result<Arc<dyn StateProvider>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .state_providers
            .get(name)
            .cloned()
            .ok_or_else(|| {
                Error::user(
                    ErrorCode::ConfigValidation,
                    format!("unknown state provider type '{name}'"),
                )
                .with_suggestion("valid state.provider_type values: tfstate, tfhcl")
            })
    }

    pub fn platform_provider(&self, name: &str) -> Result<Arc<dyn PlatformProvider>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .platform_providers
            .get(name)
            .cloned()
            .ok_or_else(|| {
                Error::user(
                    ErrorCode::ConfigValidation,
                    format!("unknown platform provider '{name}'"),
                )
            })
    }

    /// Snapshot of the per-kind comparer table for one run.
    pub fn comparers(&self) -> HashMap<ResourceKind, Arc<dyn Comparer>> {
        self.inner.read().expect("registry lock poisoned").comparers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use driftscan_domain::{AttrMap, AttributeDiff, TaskGroup};

    struct NullComparer;

    #[async_trait]
    impl Comparer for NullComparer {
        fn kind(&self) -> ResourceKind {
            ResourceKind::ComputeInstance
        }

        async fn compare(
            &self,
            _group: &TaskGroup,
            _desired: &AttrMap,
            _actual: &AttrMap,
            _attributes: &[String],
        ) -> Result<Vec<AttributeDiff>> {
            Ok(vec![])
        }
    }

    #[test]
    fn duplicate_comparer_registration_is_an_error() {
        let registry = ComponentRegistry::new();
        registry.register_comparer(Arc::new(NullComparer)).unwrap();
        assert!(registry.register_comparer(Arc::new(NullComparer)).is_err());
        assert_eq!(registry.comparers().len(), 1);
    }

    #[test]
    fn unknown_state_provider_is_user_facing() {
        let registry = ComponentRegistry::new();
        let err = registry.state_provider("nope").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigValidation);
        assert!(err.user_facing);
    }
}
