use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use murmur_llm::{DEFAULT_OPENAI_MODEL, DEFAULT_SYSTEM_PREAMBLE, ProviderConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::chat::CancelPolicy;

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 50;
pub const SETTINGS_DIRECTORY_NAME: &str = "murmur";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "MURMUR_";

const ENV_API_KEY: &str = "OPENAI_API_KEY";
const ENV_MODEL: &str = "OPENAI_MODEL";
const ENV_BASE_URL: &str = "OPENAI_BASE_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// `0` applies every streamed update immediately.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default)]
    pub cancel_policy: CancelPolicy,
    #[serde(default)]
    pub history_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            update_interval_ms: DEFAULT_UPDATE_INTERVAL_MS,
            cancel_policy: CancelPolicy::default(),
            history_dir: None,
        }
    }
}

/// Provider connection chosen from settings or the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProvider {
    pub config: ProviderConfig,
    pub model: String,
}

impl Settings {
    pub fn is_valid(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn update_interval(&self) -> Option<Duration> {
        (self.update_interval_ms > 0).then(|| Duration::from_millis(self.update_interval_ms))
    }

    pub fn preamble(&self) -> Option<String> {
        let preamble = self.system_prompt.trim();
        (!preamble.is_empty()).then(|| preamble.to_string())
    }

    pub fn history_dir(&self) -> PathBuf {
        self.history_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
                .unwrap_or_else(|| PathBuf::from(".murmur"))
        })
    }

    /// Picks the provider to talk to.
    ///
    /// Settings with an API key win. Otherwise `OPENAI_API_KEY`, `OPENAI_MODEL` and
    /// `OPENAI_BASE_URL` are read through `lookup`.
    pub fn resolve_provider(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Option<ResolvedProvider> {
        if self.is_valid() {
            return Some(ResolvedProvider {
                config: ProviderConfig::new(&self.provider_id, &self.api_key, &self.endpoint),
                model: self.model.clone(),
            });
        }

        let non_blank = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let api_key = non_blank(ENV_API_KEY)?;
        let endpoint = non_blank(ENV_BASE_URL).unwrap_or_else(|| self.endpoint.clone());
        let model = non_blank(ENV_MODEL).unwrap_or_else(|| self.model.clone());
        tracing::debug!("using provider credentials from the environment");

        Some(ResolvedProvider {
            config: ProviderConfig::new(DEFAULT_PROVIDER_ID, &api_key, &endpoint),
            model: model.trim().to_string(),
        })
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = non_blank_or(self.provider_id, default_provider_id);
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = non_blank_or(self.endpoint, default_endpoint);
        self.model = non_blank_or(self.model, default_model);
        self.system_prompt = self.system_prompt.trim().to_string();
        self.history_dir = self
            .history_dir
            .filter(|path| !path.as_os_str().is_empty());
        self
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
            .unwrap_or_else(|| PathBuf::from(".murmur"))
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

    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Applies `change` to a copy of the current settings and persists the result.
    pub fn modify(
        &self,
        change: impl FnOnce(&mut Settings),
    ) -> Result<Arc<Settings>, SettingsError> {
        let mut settings = Settings::clone(&self.settings());
        change(&mut settings);
        self.update(settings)?;
        Ok(self.settings())
    }

    fn load_from_disk(path: &Path) -> Settings {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }
        let figment = figment.merge(Env::prefixed(SETTINGS_ENV_PREFIX));

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                Settings::default()
            }
        }
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

        tracing::info!("saved settings to {:?}", self.config_path);
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

fn non_blank_or(value: String, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PREAMBLE.to_string()
}

fn default_update_interval_ms() -> u64 {
    DEFAULT_UPDATE_INTERVAL_MS
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join(SETTINGS_FILE_NAME));

        let settings = store.settings();
        assert_eq!(settings.provider_id, DEFAULT_PROVIDER_ID);
        assert_eq!(settings.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(settings.update_interval(), Some(Duration::from_millis(50)));
        assert_eq!(settings.cancel_policy, CancelPolicy::Retain);
    }

    #[test]
    fn update_persists_normalized_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);
        let store = SettingsStore::new(path.clone());

        store
            .update(Settings {
                api_key: "  sk-test  ".to_string(),
                model: "   ".to_string(),
                cancel_policy: CancelPolicy::Discard,
                ..Settings::default()
            })
            .expect("update");

        assert_eq!(store.settings().api_key, "sk-test");
        assert_eq!(store.settings().model, DEFAULT_OPENAI_MODEL);
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = SettingsStore::new(path);
        assert_eq!(reloaded.settings().api_key, "sk-test");
        assert_eq!(reloaded.settings().cancel_policy, CancelPolicy::Discard);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{"model":"gpt-4.1","update_interval_ms":0}"#).expect("seed");

        let settings = SettingsStore::new(path).settings();

        assert_eq!(settings.model, "gpt-4.1");
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.update_interval(), None);
    }

    #[test]
    fn modify_swaps_live_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join(SETTINGS_FILE_NAME));
        let before = store.settings();

        let after = store
            .modify(|settings| settings.model = "gpt-4.1-mini".to_string())
            .expect("modify");

        assert_eq!(before.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(after.model, "gpt-4.1-mini");
        assert_eq!(store.settings().model, "gpt-4.1-mini");
    }

    #[test]
    fn settings_key_wins_over_environment() {
        let settings = Settings {
            api_key: "sk-settings".to_string(),
            ..Settings::default()
        };

        let resolved = settings
            .resolve_provider(env(&[(ENV_API_KEY, "sk-env"), (ENV_MODEL, "gpt-env")]))
            .expect("provider");

        assert_eq!(resolved.config.api_key, "sk-settings");
        assert_eq!(resolved.model, DEFAULT_OPENAI_MODEL);
    }

    #[test]
    fn environment_is_the_fallback_provider_source() {
        let resolved = Settings::default()
            .resolve_provider(env(&[
                (ENV_API_KEY, "sk-env"),
                (ENV_MODEL, "gpt-env"),
                (ENV_BASE_URL, "http://localhost:8080/v1"),
            ]))
            .expect("provider");

        assert_eq!(resolved.config.api_key, "sk-env");
        assert_eq!(resolved.config.endpoint, "http://localhost:8080/v1");
        assert_eq!(resolved.model, "gpt-env");
    }

    #[test]
    fn no_key_anywhere_resolves_nothing() {
        assert_eq!(
            Settings::default().resolve_provider(env(&[(ENV_API_KEY, "  ")])),
            None
        );
    }

    #[test]
    fn blank_system_prompt_disables_preamble() {
        let settings = Settings {
            system_prompt: "   ".to_string(),
            ..Settings::default()
        }
        .normalized();

        assert_eq!(settings.preamble(), None);
    }
}
