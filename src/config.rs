//! Layered policy loading for the CLI
//!
//! Layers, lowest first: built-in defaults or a named preset, the YAML file,
//! `QUIESCE__<FIELD>` environment variables, then command-line flags. The
//! preset itself may come from the file (`preset:`), `QUIESCE_PRESET`, or
//! `--preset`, with the same precedence.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_yaml::Value as YamlValue;
use stability_gate::{ConfigOverrides, ConfigurationError, PolicyConfiguration, Preset};
use thiserror::Error;
use tracing::{debug, info};

pub const ENV_PREFIX: &str = "QUIESCE__";
pub const ENV_PRESET: &str = "QUIESCE_PRESET";
pub const ENV_CONFIG_PATH: &str = "QUIESCE_CONFIG";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid {layer} configuration: {source}")]
    Invalid {
        layer: ConfigSource,
        #[source]
        source: ConfigurationError,
    },
}

/// Where a field's effective value came from, lowest layer first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Builtin,
    Preset,
    File,
    Env,
    Cli,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConfigSource::Builtin => "builtin",
            ConfigSource::Preset => "preset",
            ConfigSource::File => "file",
            ConfigSource::Env => "env",
            ConfigSource::Cli => "cli",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Clone)]
pub struct LoadOptions {
    /// Explicit file; falls back to `QUIESCE_CONFIG`, then the user config dir
    pub path: Option<PathBuf>,
    pub preset: Option<Preset>,
    pub include_env: bool,
    pub cli: ConfigOverrides,
}

/// Effective policy plus the provenance of every field
#[derive(Debug, Clone, Serialize)]
pub struct LoadedConfig {
    pub config: PolicyConfiguration,
    #[serde(serialize_with = "serialize_preset")]
    pub preset: Preset,
    pub file: Option<PathBuf>,
    pub provenance: BTreeMap<String, ConfigSource>,
}

fn serialize_preset<S: serde::Serializer>(preset: &Preset, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(preset_name(*preset))
}

pub fn preset_name(preset: Preset) -> &'static str {
    match preset {
        Preset::Default => "default",
        Preset::Strict => "strict",
        Preset::Relaxed => "relaxed",
        Preset::Ci => "ci",
    }
}

/// `~/.config/quiesce/config.yaml` or the platform equivalent
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("quiesce").join("config.yaml"))
}

pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(raw) = env::var(ENV_CONFIG_PATH) {
        if !raw.trim().is_empty() {
            return Some(PathBuf::from(raw.trim()));
        }
    }
    default_config_path()
}

pub fn load_config(options: &LoadOptions) -> Result<LoadedConfig, LoadError> {
    let path = resolve_config_path(options.path.as_deref());

    let file_layer = match &path {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "loading configuration file");
            Some(read_file_layer(path)?)
        }
        Some(path) => {
            // an explicitly requested file must exist
            if options.path.is_some() {
                return Err(LoadError::Io {
                    path: path.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                });
            }
            debug!(path = %path.display(), "no configuration file, using defaults");
            None
        }
        None => None,
    };

    let env_layer = if options.include_env {
        Some(env_layer()?)
    } else {
        None
    };

    let preset = options
        .preset
        .or(env_layer.as_ref().and_then(|layer| layer.preset))
        .or(file_layer.as_ref().and_then(|layer| layer.preset));

    let base = preset.unwrap_or_default().config();
    let base_source = if preset.is_some() {
        ConfigSource::Preset
    } else {
        ConfigSource::Builtin
    };
    let mut provenance: BTreeMap<String, ConfigSource> = field_names(&ConfigOverrides::from(base.clone()))
        .into_iter()
        .map(|field| (field, base_source))
        .collect();

    let layers = [
        (ConfigSource::File, file_layer.map(|layer| layer.overrides)),
        (ConfigSource::Env, env_layer.map(|layer| layer.overrides)),
        (ConfigSource::Cli, Some(options.cli.clone())),
    ];
    let mut merged = ConfigOverrides::default();
    for (source, overrides) in layers {
        let Some(overrides) = overrides else {
            continue;
        };
        for field in field_names(&overrides) {
            provenance.insert(field, source);
        }
        merged = merged.merge(overrides);
    }

    // invariants are checked once, on the fully layered result
    let config = base
        .with_overrides(merged)
        .map_err(|err| LoadError::Invalid {
            layer: blamed_layer(&err, &provenance),
            source: err,
        })?;

    Ok(LoadedConfig {
        config,
        preset: preset.unwrap_or_default(),
        file: path.filter(|path| path.exists()),
        provenance,
    })
}

/// Layer that supplied the field a validation error is about
fn blamed_layer(err: &ConfigurationError, provenance: &BTreeMap<String, ConfigSource>) -> ConfigSource {
    let field = match err {
        ConfigurationError::NotPositive { field } | ConfigurationError::OutOfRange { field, .. } => {
            *field
        }
        ConfigurationError::PollIntervalExceedsTimeout { .. } => {
            let source_of = |field: &str| provenance.get(field).copied().unwrap_or(ConfigSource::Builtin);
            return source_of("poll_interval").max(source_of("timeout"));
        }
        ConfigurationError::InvalidStrictness(_) => "strictness",
        ConfigurationError::InvalidValue { field, .. } => field.as_str(),
        ConfigurationError::InvalidPreset(_) => return ConfigSource::Preset,
    };
    provenance.get(field).copied().unwrap_or(ConfigSource::Cli)
}

struct Layer {
    preset: Option<Preset>,
    overrides: ConfigOverrides,
}

fn read_file_layer(path: &Path) -> Result<Layer, LoadError> {
    let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_file_layer(&content).map_err(|reason| LoadError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse_file_layer(content: &str) -> Result<Layer, String> {
    let mut value: YamlValue = serde_yaml::from_str(content).map_err(|err| err.to_string())?;
    if value.is_null() {
        return Ok(Layer {
            preset: None,
            overrides: ConfigOverrides::default(),
        });
    }

    let preset = match value.as_mapping_mut() {
        Some(map) => match map.remove("preset") {
            Some(YamlValue::String(name)) => Some(name.parse::<Preset>().map_err(|err| err.to_string())?),
            Some(other) => return Err(format!("preset must be a string, got {:?}", other)),
            None => None,
        },
        None => return Err("expected a mapping of configuration fields".to_string()),
    };

    let overrides: ConfigOverrides = serde_yaml::from_value(value).map_err(|err| err.to_string())?;
    Ok(Layer { preset, overrides })
}

fn env_layer() -> Result<Layer, LoadError> {
    env_layer_from(env::vars())
}

fn env_layer_from(vars: impl IntoIterator<Item = (String, String)>) -> Result<Layer, LoadError> {
    let invalid = |source| LoadError::Invalid {
        layer: ConfigSource::Env,
        source,
    };

    let mut preset = None;
    let mut overrides = ConfigOverrides::default();
    for (key, raw) in vars {
        if key == ENV_PRESET {
            preset = Some(raw.parse::<Preset>().map_err(invalid)?);
            continue;
        }
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let field = stripped.to_ascii_lowercase();
        if field.is_empty() {
            continue;
        }
        overrides.set(&field, &raw).map_err(invalid)?;
    }
    Ok(Layer { preset, overrides })
}

/// Names of the fields an override set touches
fn field_names(overrides: &ConfigOverrides) -> Vec<String> {
    match serde_json::to_value(overrides) {
        Ok(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// YAML for a config file that reproduces `config`
pub fn render_yaml(config: &PolicyConfiguration) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use stability_gate::Strictness;
    use std::time::Duration;

    fn options_for(path: &Path) -> LoadOptions {
        LoadOptions {
            path: Some(path.to_path_buf()),
            include_env: false,
            ..LoadOptions::default()
        }
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "timeout: 20\npoll_interval: 250ms\nstrictness: strict\nnetwork_idle_threshold: 1\n",
        )
        .unwrap();

        let loaded = load_config(&options_for(&path)).unwrap();
        assert_eq!(loaded.config.timeout(), Duration::from_secs(20));
        assert_eq!(loaded.config.poll_interval(), Duration::from_millis(250));
        assert_eq!(loaded.config.strictness(), Strictness::Strict);
        assert_eq!(loaded.provenance["timeout"], ConfigSource::File);
        assert_eq!(loaded.provenance["dom_settle_time"], ConfigSource::Builtin);
        assert_eq!(loaded.file.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn file_preset_is_the_base_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "preset: ci\ntimeout: 30s\n").unwrap();

        let loaded = load_config(&options_for(&path)).unwrap();
        assert_eq!(loaded.preset, Preset::Ci);
        assert!(loaded.config.debug_mode());
        assert_eq!(loaded.config.timeout(), Duration::from_secs(30));
        assert_eq!(loaded.provenance["debug_mode"], ConfigSource::Preset);
    }

    #[test]
    fn cli_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "timeout: 20\n").unwrap();

        let mut options = options_for(&path);
        options.cli = ConfigOverrides::new().timeout_secs(3.0);
        options.preset = Some(Preset::Strict);

        let loaded = load_config(&options).unwrap();
        assert_eq!(loaded.config.timeout(), Duration::from_secs(3));
        assert_eq!(loaded.config.strictness(), Strictness::Strict);
        assert_eq!(loaded.provenance["timeout"], ConfigSource::Cli);
    }

    #[test]
    fn invalid_file_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        fs::write(&path, "timeout: 1\npoll_interval: 2\n").unwrap();
        let err = load_config(&options_for(&path)).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Invalid {
                layer: ConfigSource::File,
                source: ConfigurationError::PollIntervalExceedsTimeout { .. }
            }
        ));

        fs::write(&path, "colour: blue\n").unwrap();
        assert!(matches!(
            load_config(&options_for(&path)).unwrap_err(),
            LoadError::Parse { .. }
        ));

        fs::write(&path, "preset: turbo\n").unwrap();
        assert!(load_config(&options_for(&path)).is_err());
    }

    #[test]
    fn layers_are_validated_only_once_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "poll_interval: 6\n").unwrap();

        let mut options = options_for(&path);
        options.preset = Some(Preset::Strict);
        options.cli = ConfigOverrides::new().timeout(Duration::from_secs(30));

        let loaded = load_config(&options).unwrap();
        assert_eq!(loaded.config.timeout(), Duration::from_secs(30));
        assert_eq!(loaded.config.poll_interval(), Duration::from_secs(6));
        assert_eq!(loaded.provenance["poll_interval"], ConfigSource::File);
        assert_eq!(loaded.provenance["timeout"], ConfigSource::Cli);
    }

    #[test]
    fn errors_name_the_layer_that_set_the_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "poll_interval: 2\n").unwrap();

        let mut options = options_for(&path);
        options.cli = ConfigOverrides::new().timeout(Duration::from_secs(1));
        let err = load_config(&options).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Invalid {
                layer: ConfigSource::Cli,
                source: ConfigurationError::PollIntervalExceedsTimeout { .. }
            }
        ));

        fs::write(&path, "timeout: 0\nstrictness: strict\n").unwrap();
        let err = load_config(&options_for(&path)).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Invalid {
                layer: ConfigSource::File,
                source: ConfigurationError::NotPositive { field: "timeout" }
            }
        ));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&options_for(&dir.path().join("absent.yaml"))).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn empty_file_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "").unwrap();
        let loaded = load_config(&options_for(&path)).unwrap();
        assert_eq!(loaded.config, PolicyConfiguration::default());
    }

    #[test]
    fn env_layer_parses_prefixed_fields() {
        let layer = env_layer_from(vec![
            ("QUIESCE__TIMEOUT".to_string(), "2.5".to_string()),
            ("QUIESCE__ANIMATION_DETECTION".to_string(), "false".to_string()),
            ("QUIESCE_PRESET".to_string(), "relaxed".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ])
        .unwrap();
        assert_eq!(layer.preset, Some(Preset::Relaxed));
        assert_eq!(layer.overrides.timeout, Some(2.5));
        assert_eq!(layer.overrides.animation_detection, Some(false));

        let err = env_layer_from(vec![("QUIESCE__STRICTNESS".to_string(), "lax".to_string())])
            .err()
            .unwrap();
        assert!(err.to_string().contains("env"));
    }

    #[test]
    #[serial]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "network_idle_threshold: 1\n").unwrap();

        env::set_var("QUIESCE__NETWORK_IDLE_THRESHOLD", "4");
        let mut options = options_for(&path);
        options.include_env = true;
        let loaded = load_config(&options);
        env::remove_var("QUIESCE__NETWORK_IDLE_THRESHOLD");

        let loaded = loaded.unwrap();
        assert_eq!(loaded.config.network_idle_threshold(), 4);
        assert_eq!(loaded.provenance["network_idle_threshold"], ConfigSource::Env);
    }

    #[test]
    fn rendered_yaml_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = PolicyConfiguration::strict();
        fs::write(&path, render_yaml(&config).unwrap()).unwrap();

        let loaded = load_config(&options_for(&path)).unwrap();
        assert_eq!(loaded.config, config);
    }
}
