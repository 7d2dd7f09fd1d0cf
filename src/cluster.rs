//! Kind cluster lifecycle management
//!
//! [`KindCluster`] represents one named local cluster. Construction is
//! cheap and touches neither the network nor any process; the cluster
//! becomes live only after [`create`](KindCluster::create) succeeds.
//! State lives under `<root_dir>/<name>/`: the generated kubeconfig and
//! the cached kind and kubectl binaries. Because those paths derive only
//! from the settings, a handle built in a later process finds and reuses
//! a cluster created by an earlier one.
//!
//! # Example
//!
//! ```no_run
//! use kindling::KindCluster;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cluster = KindCluster::new("my-test");
//!     cluster.create(None).await?;
//!
//!     let version = cluster.kubectl(&["version"]).await?;
//!     println!("{version}");
//!
//!     cluster.delete().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info, instrument, warn};

use crate::binaries::{BinarySpec, BinaryStore, DownloadError, Tool};
use crate::command::{self, CommandError};
use crate::config::ClusterSettings;
use crate::portforward::{PortForward, PortForwardError, PortForwardOptions};

/// Recreate attempts when a cluster comes up without its kubeconfig.
const MAX_CREATE_ATTEMPTS: u32 = 3;

/// Error type for cluster lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    PortForward(#[from] PortForwardError),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to build Kubernetes client: {0}")]
    Client(String),

    #[error("API server query failed: {0}")]
    Api(String),

    #[error("cluster came up without a kubeconfig after {attempts} attempts")]
    Inconsistent { attempts: u32 },

    #[error("cluster has not been created yet")]
    NotCreated,
}

/// Handle to one named kind cluster
pub struct KindCluster {
    settings: ClusterSettings,
    dir: PathBuf,
    kubeconfig_path: PathBuf,
    store: BinaryStore,
    kind: BinarySpec,
    kubectl: BinarySpec,
    client: Option<Client>,
}

impl KindCluster {
    /// Create a handle with default settings
    ///
    /// Performs no I/O of any kind.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(ClusterSettings::new(name))
    }

    /// Create a handle from explicit settings
    ///
    /// Performs no I/O of any kind.
    pub fn with_settings(settings: ClusterSettings) -> Self {
        let dir = settings.root_dir.join(&settings.name);
        let kubeconfig_path = settings
            .kubeconfig
            .clone()
            .unwrap_or_else(|| dir.join("kubeconfig"));
        let store = BinaryStore::new(dir.clone());
        let kind = BinarySpec::current(Tool::Kind, settings.kind_version.clone());
        let kubectl = BinarySpec::current(Tool::Kubectl, settings.kubectl_version.clone());

        Self {
            settings,
            dir,
            kubeconfig_path,
            store,
            kind,
            kubectl,
            client: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    /// State directory for this cluster
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the generated kubeconfig
    pub fn kubeconfig_path(&self) -> &Path {
        &self.kubeconfig_path
    }

    /// Cache path of the kind binary, present only after first use
    pub fn kind_path(&self) -> PathBuf {
        self.store.path_for(&self.kind)
    }

    /// Cache path of the kubectl binary, present only after first use
    pub fn kubectl_path(&self) -> PathBuf {
        self.store.path_for(&self.kubectl)
    }

    /// Kubernetes API client, available once the cluster is live
    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    /// Create the cluster, or reuse it when one with this name exists
    ///
    /// Blocks until the cluster reports ready. When the bootstrapper
    /// claims success but the kubeconfig is missing, the cluster is
    /// deleted and recreated, up to a bounded number of attempts. On
    /// success the API client is constructed from the kubeconfig.
    #[instrument(skip(self, config_file), fields(cluster = %self.settings.name))]
    pub async fn create(&mut self, config_file: Option<&Path>) -> Result<(), ClusterError> {
        let kind = self.ensure_kind().await?;

        std::fs::create_dir_all(&self.dir).map_err(|source| ClusterError::Io {
            path: self.dir.clone(),
            source,
        })?;
        self.touch_kubeconfig()?;

        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            if self.exists(&kind).await? {
                debug!("cluster already exists, reusing");
            } else {
                info!("creating kind cluster");
                let mut args: Vec<String> = vec![
                    "create".into(),
                    "cluster".into(),
                    format!("--name={}", self.settings.name),
                    format!("--kubeconfig={}", self.kubeconfig_path.display()),
                ];
                if let Some(image) = &self.settings.image {
                    args.push(format!("--image={image}"));
                }
                if let Some(config) = config_file {
                    args.push("--config".into());
                    args.push(config.display().to_string());
                }
                command::run(&kind, &args).await?.expect_success("kind")?;
            }

            if self.kubeconfig_path.exists() {
                self.client = Some(self.build_client().await?);
                info!("cluster is live");
                return Ok(());
            }

            // The bootstrapper reported a cluster but left no credentials
            // behind. Tear it down and start over.
            warn!(attempt, "cluster present but kubeconfig missing, recreating");
            self.delete().await?;
        }

        Err(ClusterError::Inconsistent {
            attempts: MAX_CREATE_ATTEMPTS,
        })
    }

    /// Delete the cluster
    ///
    /// Cached binaries and the state directory stay in place.
    #[instrument(skip(self), fields(cluster = %self.settings.name))]
    pub async fn delete(&self) -> Result<(), ClusterError> {
        let kind = self.ensure_kind().await?;
        info!("deleting kind cluster");

        let args = [
            "delete".to_string(),
            "cluster".to_string(),
            format!("--name={}", self.settings.name),
            format!("--kubeconfig={}", self.kubeconfig_path.display()),
        ];
        command::run(&kind, &args).await?.expect_success("kind")?;
        Ok(())
    }

    /// Load a local Docker image into the cluster's nodes
    #[instrument(skip(self), fields(cluster = %self.settings.name, image = %image))]
    pub async fn load_docker_image(&self, image: &str) -> Result<(), ClusterError> {
        let kind = self.ensure_kind().await?;
        info!("loading Docker image into cluster");

        let args = [
            "load",
            "docker-image",
            "--name",
            self.settings.name.as_str(),
            image,
        ];
        command::run(&kind, &args).await?.expect_success("kind")?;
        Ok(())
    }

    /// Run a kubectl command against the cluster and return its stdout
    ///
    /// The cluster's kubeconfig is injected through the `KUBECONFIG`
    /// environment variable. A non-zero exit surfaces as
    /// [`CommandError::NonZeroExit`] with the captured output.
    pub async fn kubectl<S: AsRef<std::ffi::OsStr>>(
        &self,
        args: &[S],
    ) -> Result<String, ClusterError> {
        let kubectl = self.ensure_kubectl().await?;
        let env = self.kubeconfig_env();
        let out = command::run_with_env(&kubectl, args, &env)
            .await?
            .expect_success("kubectl")?;
        Ok(out)
    }

    /// Forward a local port to `target:remote_port` with default options
    pub async fn port_forward(
        &self,
        target: &str,
        remote_port: u16,
    ) -> Result<PortForward, ClusterError> {
        self.port_forward_with(target, remote_port, PortForwardOptions::default())
            .await
    }

    /// Forward a local port to `target:remote_port`
    ///
    /// Runs `kubectl port-forward` in the background and retries with a
    /// fresh local port until the tunnel accepts connections. See
    /// [`PortForwardOptions`] for the knobs.
    pub async fn port_forward_with(
        &self,
        target: &str,
        remote_port: u16,
        opts: PortForwardOptions,
    ) -> Result<PortForward, ClusterError> {
        let kubectl = self.ensure_kubectl().await?;
        let kubeconfig = self.kubeconfig_path.clone();
        let extra_args = opts.extra_args.clone();

        let pf = PortForward::establish(target, remote_port, &opts, move |port| {
            let mut cmd = tokio::process::Command::new(&kubectl);
            cmd.arg("port-forward")
                .arg(target)
                .arg(format!("{port}:{remote_port}"))
                .args(&extra_args)
                .env("KUBECONFIG", &kubeconfig)
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null());
            cmd
        })
        .await?;
        Ok(pf)
    }

    /// Version of the API server, e.g. `v1.30.0`
    pub async fn server_version(&self) -> Result<String, ClusterError> {
        let client = self.client.as_ref().ok_or(ClusterError::NotCreated)?;
        let info = client
            .apiserver_version()
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?;
        Ok(info.git_version)
    }

    async fn ensure_kind(&self) -> Result<PathBuf, DownloadError> {
        self.store
            .ensure(&self.kind, self.settings.kind_download_url.as_deref())
            .await
    }

    async fn ensure_kubectl(&self) -> Result<PathBuf, DownloadError> {
        self.store
            .ensure(&self.kubectl, self.settings.kubectl_download_url.as_deref())
            .await
    }

    /// Whether the bootstrapper lists a cluster with this name
    async fn exists(&self, kind: &Path) -> Result<bool, ClusterError> {
        let out = command::run(kind, &["get", "clusters"])
            .await?
            .expect_success("kind")?;
        Ok(out.lines().any(|line| line.trim() == self.settings.name))
    }

    /// Create the kubeconfig as an empty file with owner-only permissions
    /// when it does not exist yet.
    fn touch_kubeconfig(&self) -> Result<(), ClusterError> {
        if self.kubeconfig_path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.kubeconfig_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ClusterError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        match options.open(&self.kubeconfig_path) {
            Ok(_) => Ok(()),
            // Lost a race against another handle; the file is there.
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(source) => Err(ClusterError::Io {
                path: self.kubeconfig_path.clone(),
                source,
            }),
        }
    }

    fn kubeconfig_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(
            "KUBECONFIG".to_string(),
            self.kubeconfig_path.to_string_lossy().into_owned(),
        );
        env
    }

    async fn build_client(&self) -> Result<Client, ClusterError> {
        let kubeconfig = Kubeconfig::read_from(&self.kubeconfig_path)
            .map_err(|e| ClusterError::Client(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClusterError::Client(e.to_string()))?;
        Client::try_from(config).map_err(|e| ClusterError::Client(e.to_string()))
    }
}
