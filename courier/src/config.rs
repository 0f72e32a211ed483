use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use courier_common::{DeliverySettings, audit::AuditConfig, internal};
use courier_delivery::{
    ConfiguredAccounts, Dispatcher, FsBlobStore, MessageRenderer, SmtpAccountConfig, SmtpTimeouts,
};
use courier_store::{ProjectedCommunications, StoreConfig};
use serde::Deserialize;

/// Where attachment files are read from
#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    /// Root for `/files/` and `/private/files/` URLs
    #[serde(default = "defaults::files_root")]
    pub root: PathBuf,

    /// Stored-file ids mapped to paths, relative ones taken from `root`
    #[serde(default)]
    pub registered: HashMap<String, PathBuf>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: defaults::files_root(),
            registered: HashMap::new(),
        }
    }
}

/// Top-level configuration, read from `courier.config.ron`
///
/// ```ron
/// Courier (
///     store: File((path: "/var/spool/courier")),
///     settings: (site: "mail.example.com", use_ssl: true),
///     accounts: [
///         (
///             name: "Notifications",
///             email: "noreply@example.com",
///             host: "smtp.example.com",
///             port: 587,
///             tls: StartTls,
///             default_outgoing: true,
///         ),
///     ],
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Courier {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub settings: DeliverySettings,

    #[serde(alias = "account", default)]
    pub accounts: Vec<SmtpAccountConfig>,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub files: FilesConfig,

    /// Name announced in EHLO/HELO
    #[serde(default = "defaults::helo_domain")]
    pub helo_domain: String,
}

impl Default for Courier {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            settings: DeliverySettings::default(),
            accounts: Vec::new(),
            timeouts: SmtpTimeouts::default(),
            audit: AuditConfig::default(),
            files: FilesConfig::default(),
            helo_domain: defaults::helo_domain(),
        }
    }
}

impl Courier {
    /// Read and parse a RON configuration file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid configuration
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        Self::from_ron(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
    }

    /// # Errors
    /// Returns an error if `content` is not valid configuration
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    /// Wire the configured store, accounts and renderer into a dispatcher
    ///
    /// # Errors
    /// Returns an error if the record store cannot be initialised
    pub async fn into_dispatcher(self) -> anyhow::Result<Dispatcher> {
        let store = self.store.into_record_store().await?;

        let blobs = FsBlobStore::new(self.files.root);
        for (id, path) in self.files.registered {
            blobs.register(id, path);
        }

        internal!(
            level = DEBUG,
            "Configured {} outgoing account(s)",
            self.accounts.len()
        );

        let accounts = ConfiguredAccounts::new(self.accounts, self.timeouts, self.helo_domain);
        let renderer = MessageRenderer::new(Arc::new(blobs));

        Ok(Dispatcher::builder(store.clone(), Arc::new(accounts), renderer)
            .settings(self.settings)
            .communications(Arc::new(ProjectedCommunications::new(store)))
            .build())
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn files_root() -> PathBuf {
        PathBuf::from("/var/lib/courier")
    }

    pub fn helo_domain() -> String {
        "localhost".to_string()
    }
}
