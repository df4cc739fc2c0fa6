//! Component declaration
//!
//! The frontend bundle is served either from its release build directory or
//! from a dev server. The choice is read from the environment once, at
//! process start.

use crate::config::ConfigError;
use std::path::PathBuf;

/// Name under which the widget is registered
pub const COMPONENT_NAME: &str = "audio_recorder";

pub const RELEASE_VAR: &str = "AUDIO_RECORDER_RELEASE";
pub const BUILD_DIR_VAR: &str = "AUDIO_RECORDER_BUILD_DIR";
pub const DEV_URL_VAR: &str = "AUDIO_RECORDER_DEV_URL";

const DEFAULT_BUILD_DIR: &str = "frontend/build";
const DEFAULT_DEV_URL: &str = "http://localhost:3001";

/// Where the frontend bundle comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentSource {
    Build(PathBuf),
    DevServer(String),
}

/// Environment settings for the component, resolved once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentEnv {
    pub release: bool,
    pub build_dir: PathBuf,
    pub dev_url: String,
}

impl Default for ComponentEnv {
    fn default() -> Self {
        Self {
            release: true,
            build_dir: PathBuf::from(DEFAULT_BUILD_DIR),
            dev_url: DEFAULT_DEV_URL.to_string(),
        }
    }
}

impl ComponentEnv {
    /// Reads the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Resolves settings through `lookup`, which returns `None` for unset variables
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let release = match lookup(RELEASE_VAR) {
            Some(value) => parse_flag(RELEASE_VAR, &value)?,
            None => defaults.release,
        };
        Ok(Self {
            release,
            build_dir: lookup(BUILD_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.build_dir),
            dev_url: lookup(DEV_URL_VAR).unwrap_or(defaults.dev_url),
        })
    }

    pub fn source(&self) -> ComponentSource {
        if self.release {
            ComponentSource::Build(self.build_dir.clone())
        } else {
            ComponentSource::DevServer(self.dev_url.clone())
        }
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
        }),
    }
}

/// A declared frontend component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredComponent {
    pub name: String,
    pub source: ComponentSource,
}

impl DeclaredComponent {
    pub fn declare(name: &str, env: &ComponentEnv) -> Self {
        let source = env.source();
        match &source {
            ComponentSource::Build(path) => {
                tracing::info!("Component {} served from {}", name, path.display())
            }
            ComponentSource::DevServer(url) => {
                tracing::info!("Component {} served by dev server {}", name, url)
            }
        }
        Self {
            name: name.to_string(),
            source,
        }
    }

    /// The recorder widget
    pub fn audio_recorder(env: &ComponentEnv) -> Self {
        Self::declare(COMPONENT_NAME, env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> Result<ComponentEnv, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ComponentEnv::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn release_build_is_the_default() {
        let env = env_of(&[]).unwrap();
        assert_eq!(env.source(), ComponentSource::Build(PathBuf::from("frontend/build")));
    }

    #[test]
    fn false_flag_switches_to_dev_server() {
        let env = env_of(&[(RELEASE_VAR, "false"), (DEV_URL_VAR, "http://127.0.0.1:9000")]).unwrap();
        assert_eq!(
            env.source(),
            ComponentSource::DevServer("http://127.0.0.1:9000".to_string())
        );

        let env = env_of(&[(RELEASE_VAR, "0")]).unwrap();
        assert_eq!(
            env.source(),
            ComponentSource::DevServer(DEFAULT_DEV_URL.to_string())
        );
    }

    #[test]
    fn unparseable_flag_is_a_config_error() {
        assert_eq!(
            env_of(&[(RELEASE_VAR, "maybe")]),
            Err(ConfigError::InvalidEnv {
                var: RELEASE_VAR,
                value: "maybe".to_string()
            })
        );
    }

    #[test]
    fn declared_component_uses_widget_name() {
        let env = env_of(&[(BUILD_DIR_VAR, "/srv/recorder")]).unwrap();
        let component = DeclaredComponent::audio_recorder(&env);
        assert_eq!(component.name, "audio_recorder");
        assert_eq!(
            component.source,
            ComponentSource::Build(PathBuf::from("/srv/recorder"))
        );
    }
}
