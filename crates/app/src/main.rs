mod error;
mod probe;
mod runner;
mod settings;

use std::sync::Arc;

use arc_swap::ArcSwap;
use selah_chat::{BuiltinLocalizer, ChatController, ChatDependencies, CredentialWatch};
use selah_llm::{SharedProviderConfig, create_provider};
use selah_storage::SqliteStorage;
use snafu::ResultExt;
use tracing_subscriber::EnvFilter;

use crate::error::{AppResult, ProviderSnafu, StorageSnafu};
use crate::probe::SettingsCredentialProbe;
use crate::runner::Runner;
use crate::settings::SettingsStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run().await {
        tracing::error!(error = %error, "selah stopped");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let settings = Arc::new(SettingsStore::load());
    let current = settings.settings();
    tracing::info!(path = ?settings.config_path(), "loaded settings");

    let provider_config: SharedProviderConfig = Arc::new(ArcSwap::from_pointee(
        current.provider.to_provider_config(),
    ));
    let provider = create_provider(provider_config.clone()).context(ProviderSnafu {
        stage: "create-provider",
    })?;

    let database_path = current.chat.database_location(&settings.config_dir());
    let storage = SqliteStorage::open(&database_path.to_string_lossy())
        .await
        .context(StorageSnafu {
            stage: "open-sqlite",
        })?;

    let probe = Arc::new(SettingsCredentialProbe::new(
        settings.clone(),
        provider_config,
    ));
    let credential = Arc::new(CredentialWatch::spawn(
        probe,
        current.chat.credential_poll_interval(),
    ));

    let controller = ChatController::new(
        ChatDependencies {
            store: Arc::new(storage),
            provider,
            credential: credential.clone(),
            localizer: Arc::new(BuiltinLocalizer),
        },
        current.chat.chat_options(),
    );
    let loaded = controller.load_sessions().await;
    tracing::info!(sessions = loaded, provider = %current.provider.provider_id, "chat ready");

    let result = Runner::new(controller, settings).run().await;
    credential.stop();
    result
}
