use std::sync::Arc;

use selah_chat::CredentialProbe;
use selah_llm::{BoxFuture, SharedProviderConfig};

use crate::settings::SettingsStore;

/// Reloads the settings file on every probe and pushes provider changes into the
/// adapter's shared config.
pub struct SettingsCredentialProbe {
    settings: Arc<SettingsStore>,
    provider_config: SharedProviderConfig,
}

impl SettingsCredentialProbe {
    pub fn new(settings: Arc<SettingsStore>, provider_config: SharedProviderConfig) -> Self {
        Self {
            settings,
            provider_config,
        }
    }
}

impl CredentialProbe for SettingsCredentialProbe {
    fn probe<'a>(&'a self) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let settings = self.settings.reload();
            let config = settings.provider.to_provider_config();
            let valid = config.has_credential();

            if **self.provider_config.load() != config {
                tracing::info!(
                    provider_id = %config.provider_id,
                    model = %config.model,
                    "provider settings changed"
                );
                self.provider_config.store(Arc::new(config));
            }

            valid
        })
    }
}
