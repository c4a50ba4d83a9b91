use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::recommender::{DEFAULT_MODEL, DEFAULT_QUERY_AUGMENTATION};
use crate::storage::BackendLocal;

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_CATALOG_PATH: &str = "catalog.csv";
const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_TOP_K: usize = 5;
const DEFAULT_BATCH_SIZE: usize = 16;
const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Catalog CSV, relative paths resolve against the base directory
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    /// Directory holding vectors.bin, metadata.json and downloaded models
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Words appended to every query before embedding. Empty disables it.
    #[serde(default = "default_query_augmentation")]
    pub query_augmentation: String,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Default minimum similarity score [-1.0, 1.0]
    #[serde(default)]
    pub default_min_score: f32,

    /// Number of catalog records embedded per call while building the cache
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Address for `serve`
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            cache_dir: default_cache_dir(),
            model: default_model(),
            query_augmentation: default_query_augmentation(),
            default_top_k: DEFAULT_TOP_K,
            default_min_score: 0.0,
            batch_size: DEFAULT_BATCH_SIZE,
            listen: default_listen(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_catalog_path() -> String {
    DEFAULT_CATALOG_PATH.to_string()
}

fn default_cache_dir() -> String {
    DEFAULT_CACHE_DIR.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_query_augmentation() -> String {
    DEFAULT_QUERY_AUGMENTATION.to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

/// `AREC_BASE_PATH`, or `~/.local/share/arec`.
pub fn default_base_path() -> anyhow::Result<PathBuf> {
    if let Ok(base_path) = std::env::var("AREC_BASE_PATH") {
        return Ok(PathBuf::from(base_path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/arec"))
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if !(-1.0..=1.0).contains(&self.default_min_score) {
            bail!(
                "default_min_score must be between -1.0 and 1.0, got {}",
                self.default_min_score
            );
        }

        if self.batch_size == 0 {
            bail!("batch_size must be greater than 0");
        }

        if self.model.trim().is_empty() {
            bail!("model must not be empty");
        }

        if self.catalog_path.trim().is_empty() {
            bail!("catalog_path must not be empty");
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults if
    /// missing.
    pub fn load_with(base_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base_path = base_path.as_ref();
        let store = BackendLocal::new(base_path)
            .with_context(|| format!("could not create {}", base_path.display()))?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            log::info!("Creating default config at {}", store.path(CONFIG_FILE).display());
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str =
            String::from_utf8(store.read(CONFIG_FILE)?).context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = BackendLocal::new(&self.base_path)?;
        store.write(CONFIG_FILE, serde_yml::to_string(&self)?.as_bytes())?;
        Ok(())
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.resolve(&self.catalog_path)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.resolve(&self.cache_dir)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }
}
