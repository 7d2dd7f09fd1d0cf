//! Configuration for kindling clusters
//!
//! Settings are plain data passed at construction. The process environment
//! is consulted exactly once, in [`ClusterSettings::from_env`]; nothing else
//! in the crate reads environment variables.
//!
//! # Example
//!
//! ```
//! use kindling::config::ClusterSettings;
//!
//! let settings = ClusterSettings::new("my-test")
//!     .kind_version("v0.23.0")
//!     .image("kindest/node:v1.30.0");
//! ```

use std::path::PathBuf;

/// kind release used when no override is given.
pub const DEFAULT_KIND_VERSION: &str = "v0.23.0";

/// kubectl release used when no override is given.
pub const DEFAULT_KUBECTL_VERSION: &str = "v1.28.9";

/// Cluster name used by the shared test-session harness.
pub const DEFAULT_CLUSTER_NAME: &str = "kindling";

/// Directory under which per-cluster state (kubeconfig, cached binaries) lives.
pub const DEFAULT_ROOT_DIR: &str = ".kindling";

/// Settings for a [`KindCluster`](crate::KindCluster)
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    /// Cluster name
    pub name: String,

    /// Root directory for per-cluster state
    pub root_dir: PathBuf,

    /// kind release tag
    pub kind_version: String,

    /// kubectl release tag
    pub kubectl_version: String,

    /// Full download URL for the kind binary, replacing the default
    pub kind_download_url: Option<String>,

    /// Full download URL for the kubectl binary, replacing the default
    pub kubectl_download_url: Option<String>,

    /// Kubeconfig path, replacing the derived `<root>/<name>/kubeconfig`
    pub kubeconfig: Option<PathBuf>,

    /// Node image passed to `kind create cluster --image`
    pub image: Option<String>,

    /// Skip cluster deletion in the session harness teardown
    pub keep_cluster: bool,
}

impl ClusterSettings {
    /// Create settings with built-in defaults, ignoring the environment
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            kind_version: DEFAULT_KIND_VERSION.to_string(),
            kubectl_version: DEFAULT_KUBECTL_VERSION.to_string(),
            kind_download_url: None,
            kubectl_download_url: None,
            kubeconfig: None,
            image: None,
            keep_cluster: false,
        }
    }

    /// Create settings from the process environment
    ///
    /// Recognized variables: `KINDLING_CLUSTER_NAME`, `KIND_VERSION`,
    /// `KUBECTL_VERSION`, `KIND_DOWNLOAD_URL`, `KUBECTL_DOWNLOAD_URL`,
    /// `KINDLING_KUBECONFIG`, `KINDLING_KEEP_CLUSTER`. This is the only
    /// place the crate touches `std::env`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let name =
            lookup("KINDLING_CLUSTER_NAME").unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string());
        let mut settings = Self::new(name);
        if let Some(version) = lookup("KIND_VERSION") {
            settings.kind_version = version;
        }
        if let Some(version) = lookup("KUBECTL_VERSION") {
            settings.kubectl_version = version;
        }
        settings.kind_download_url = lookup("KIND_DOWNLOAD_URL");
        settings.kubectl_download_url = lookup("KUBECTL_DOWNLOAD_URL");
        settings.kubeconfig = lookup("KINDLING_KUBECONFIG").map(PathBuf::from);
        settings.keep_cluster = lookup("KINDLING_KEEP_CLUSTER")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        settings
    }

    /// Set the root state directory
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = dir.into();
        self
    }

    /// Set the kind release tag
    pub fn kind_version(mut self, version: impl Into<String>) -> Self {
        self.kind_version = version.into();
        self
    }

    /// Set the kubectl release tag
    pub fn kubectl_version(mut self, version: impl Into<String>) -> Self {
        self.kubectl_version = version.into();
        self
    }

    /// Override the kind download URL
    pub fn kind_download_url(mut self, url: impl Into<String>) -> Self {
        self.kind_download_url = Some(url.into());
        self
    }

    /// Override the kubectl download URL
    pub fn kubectl_download_url(mut self, url: impl Into<String>) -> Self {
        self.kubectl_download_url = Some(url.into());
        self
    }

    /// Use a fixed kubeconfig path instead of the derived one
    pub fn kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Set the node image for `kind create cluster`
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Keep the cluster alive through harness teardown
    pub fn keep_cluster(mut self, keep: bool) -> Self {
        self.keep_cluster = keep;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = ClusterSettings::new("test");

        assert_eq!(settings.name, "test");
        assert_eq!(settings.root_dir, PathBuf::from(".kindling"));
        assert_eq!(settings.kind_version, DEFAULT_KIND_VERSION);
        assert_eq!(settings.kubectl_version, DEFAULT_KUBECTL_VERSION);
        assert!(settings.kind_download_url.is_none());
        assert!(settings.kubeconfig.is_none());
        assert!(settings.image.is_none());
        assert!(!settings.keep_cluster);
    }

    #[test]
    fn test_builder_setters() {
        let settings = ClusterSettings::new("test")
            .kind_version("v0.20.0")
            .kubectl_version("v1.27.0")
            .image("kindest/node:v1.27.3")
            .root_dir("/tmp/clusters")
            .kubeconfig("/tmp/kc.yaml")
            .keep_cluster(true);

        assert_eq!(settings.kind_version, "v0.20.0");
        assert_eq!(settings.kubectl_version, "v1.27.0");
        assert_eq!(settings.image, Some("kindest/node:v1.27.3".to_string()));
        assert_eq!(settings.root_dir, PathBuf::from("/tmp/clusters"));
        assert_eq!(settings.kubeconfig, Some(PathBuf::from("/tmp/kc.yaml")));
        assert!(settings.keep_cluster);
    }

    #[test]
    fn test_from_lookup_empty_environment() {
        let settings = ClusterSettings::from_lookup(|_| None);

        assert_eq!(settings.name, DEFAULT_CLUSTER_NAME);
        assert_eq!(settings.kind_version, DEFAULT_KIND_VERSION);
        assert_eq!(settings.kubectl_version, DEFAULT_KUBECTL_VERSION);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("KINDLING_CLUSTER_NAME", "ci-cluster"),
            ("KIND_VERSION", "v0.22.0"),
            ("KUBECTL_VERSION", "v1.29.1"),
            ("KIND_DOWNLOAD_URL", "http://mirror.internal/kind"),
            ("KUBECTL_DOWNLOAD_URL", "http://mirror.internal/kubectl"),
            ("KINDLING_KUBECONFIG", "/var/run/kc"),
            ("KINDLING_KEEP_CLUSTER", "true"),
        ]
        .into_iter()
        .collect();

        let settings = ClusterSettings::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(settings.name, "ci-cluster");
        assert_eq!(settings.kind_version, "v0.22.0");
        assert_eq!(settings.kubectl_version, "v1.29.1");
        assert_eq!(
            settings.kind_download_url,
            Some("http://mirror.internal/kind".to_string())
        );
        assert_eq!(
            settings.kubectl_download_url,
            Some("http://mirror.internal/kubectl".to_string())
        );
        assert_eq!(settings.kubeconfig, Some(PathBuf::from("/var/run/kc")));
        assert!(settings.keep_cluster);
    }

    #[test]
    fn test_keep_cluster_parsing() {
        for (value, expected) in
            [("1", true), ("true", true), ("TRUE", true), ("0", false), ("no", false)]
        {
            let settings = ClusterSettings::from_lookup(|key| {
                (key == "KINDLING_KEEP_CLUSTER").then(|| value.to_string())
            });
            assert_eq!(settings.keep_cluster, expected, "value {value:?}");
        }
    }
}
