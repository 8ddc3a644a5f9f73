//! Provider registry for runtime per-platform lookup.

use std::collections::HashMap;
use std::sync::Arc;

use msgdeck_types::account::Platform;

use super::box_transport::BoxTransportProvider;

/// Registry of available transport providers, indexed by platform.
///
/// A platform with no registered provider cannot authenticate; every
/// connect for it fails as unavailable.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Platform, Arc<BoxTransportProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own platform, replacing any previous one.
    pub fn register(&mut self, provider: BoxTransportProvider) {
        self.providers.insert(provider.platform(), Arc::new(provider));
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<BoxTransportProvider>> {
        self.providers.get(&platform).cloned()
    }

    /// Platforms with a provider, in display order.
    pub fn platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.providers.contains_key(p))
            .collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}
