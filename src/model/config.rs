use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    pub general: GeneralConfig,
    pub repository: RepositoryConfig,
    pub applications: ApplicationsConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub root_path: String,
    pub username: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub file: String,
    pub default_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationsConfig {
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub fetch_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub user_agent: String,
}

impl ShellConfig {
    /// Load configuration with layering: defaults → user config.
    pub fn load() -> Result<Self> {
        let user = match directories::ProjectDirs::from("", "", "nullos") {
            Some(proj_dirs) => {
                let config_path = proj_dirs.config_dir().join("config.toml");
                if config_path.exists() {
                    let text = fs::read_to_string(&config_path)
                        .with_context(|| format!("reading {}", config_path.display()))?;
                    Some(text)
                } else {
                    None
                }
            }
            None => None,
        };

        let launch_dir = std::env::current_dir().context("cannot determine working directory")?;
        Self::from_layers(user.as_deref(), &launch_dir)
    }

    /// Merge `user` over the compiled-in defaults and resolve the root path.
    pub fn from_layers(user: Option<&str>, launch_dir: &Path) -> Result<Self> {
        let mut merged: toml::Value = toml::from_str(DEFAULT_CONFIG)?;
        if let Some(user) = user {
            let overlay: toml::Value = toml::from_str(user).context("invalid user config")?;
            merge(&mut merged, overlay);
        }

        let mut config: ShellConfig = merged.try_into()?;

        // Expand ~ in root_path
        if config.general.root_path.starts_with('~') {
            let home = dirs_home().ok_or_else(|| anyhow!("cannot determine home directory"))?;
            let home = home.to_string_lossy();
            config.general.root_path = config.general.root_path.replacen('~', &home, 1);
        }

        let root = Path::new(&config.general.root_path);
        if root.is_relative() {
            config.general.root_path = launch_dir.join(root).to_string_lossy().into_owned();
        }

        Ok(config)
    }

    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(&self.general.root_path)
    }

    pub fn repository_path(&self) -> PathBuf {
        self.root_path().join(&self.repository.file)
    }

    pub fn applications_path(&self) -> PathBuf {
        self.root_path().join(&self.applications.dir)
    }
}

fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}
