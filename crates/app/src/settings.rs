use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use selah_chat::{ChatOptions, DEFAULT_STREAM_IDLE_TIMEOUT};
use selah_llm::{DEFAULT_OPENAI_MODEL, ProviderConfig, RIG_OPENAI_PROVIDER_ID};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_CREDENTIAL_POLL_SECS: u64 = 5;
pub const SETTINGS_DIRECTORY_NAME: &str = "selah";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "selah.db";
/// Environment overrides, e.g. `SELAH_CHAT__LANGUAGE=es`.
pub const ENV_PREFIX: &str = "SELAH_";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: None,
        }
    }
}

impl ProviderSettings {
    pub fn to_provider_config(&self) -> ProviderConfig {
        let config = ProviderConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
            &self.model,
        );
        match self.max_tokens {
            Some(max_tokens) => config.with_max_tokens(max_tokens),
            None => config,
        }
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = non_blank(self.provider_id).unwrap_or_else(default_provider_id);
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = non_blank(self.endpoint).unwrap_or_else(default_endpoint);
        self.model = non_blank(self.model).unwrap_or_else(default_model);
        self.max_tokens = self.max_tokens.filter(|value| *value > 0);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub translation_id: Option<String>,
    #[serde(default)]
    pub persona_override: Option<String>,
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
    #[serde(default = "default_credential_poll_secs")]
    pub credential_poll_secs: u64,
    /// Defaults to `selah.db` next to the settings file.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            language: default_language(),
            display_name: None,
            translation_id: None,
            persona_override: None,
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
            credential_poll_secs: default_credential_poll_secs(),
            database_path: None,
        }
    }
}

impl ChatSettings {
    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            language: self.language.clone(),
            display_name: self.display_name.clone(),
            translation_id: self.translation_id.clone(),
            persona_override: self.persona_override.clone(),
            stream_idle_timeout: Duration::from_secs(self.stream_idle_timeout_secs),
        }
    }

    pub fn credential_poll_interval(&self) -> Duration {
        Duration::from_secs(self.credential_poll_secs)
    }

    pub fn database_location(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join(DATABASE_FILE_NAME))
    }

    pub fn normalized(mut self) -> Self {
        self.language = non_blank(self.language).unwrap_or_else(default_language);
        self.display_name = self.display_name.and_then(non_blank);
        self.translation_id = self.translation_id.and_then(non_blank);
        self.persona_override = self.persona_override.and_then(non_blank);
        self.stream_idle_timeout_secs = self.stream_idle_timeout_secs.max(1);
        self.credential_poll_secs = self.credential_poll_secs.max(1);
        self.database_path = self
            .database_path
            .filter(|path| !path.as_os_str().is_empty());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub chat: ChatSettings,
}

impl Settings {
    pub fn normalized(self) -> Self {
        Self {
            provider: self.provider.normalized(),
            chat: self.chat.normalized(),
        }
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".selah"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_dir)
    }

    /// Re-reads the file so edits made while running take effect.
    pub fn reload(&self) -> Arc<Settings> {
        let settings = Arc::new(Self::load_from_disk(&self.config_path));
        let previous = self.settings.swap(settings.clone());
        if previous != settings {
            tracing::debug!(path = ?self.config_path, "settings changed on disk");
        }
        settings
    }

    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> Settings {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::debug!(path = ?path, "settings file not found, using defaults");
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut settings = match figment.extract::<Settings>() {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "failed to parse settings, using defaults");
                Settings::default()
            }
        };

        if settings.provider.api_key.trim().is_empty() {
            if let Ok(api_key) = std::env::var(OPENAI_API_KEY_ENV) {
                settings.provider.api_key = api_key;
            }
        }

        settings.normalized()
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn default_provider_id() -> String {
    RIG_OPENAI_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_stream_idle_timeout_secs() -> u64 {
    DEFAULT_STREAM_IDLE_TIMEOUT.as_secs()
}

fn default_credential_poll_secs() -> u64 {
    DEFAULT_CREDENTIAL_POLL_SECS
}
