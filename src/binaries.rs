//! Versioned cache for the kind and kubectl binaries
//!
//! Binaries are fetched on first use and cached under the cluster's state
//! directory, keyed by tool, release tag, platform, and architecture. A
//! cached binary is never re-downloaded. Downloads stream into a temporary
//! file next to the destination and are renamed into place atomically, so
//! an interrupted transfer never leaves a partial file at the final path.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Error type for binary provisioning
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("request for {url} failed: {source}")]
    Request {
        url: String,
        source: reqwest::Error,
    },

    #[error("download of {url} failed with HTTP status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to move download into place at {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// External tool managed by the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// The kind cluster bootstrapper
    Kind,
    /// The kubectl CLI
    Kubectl,
}

impl Tool {
    pub fn as_str(self) -> &'static str {
        match self {
            Tool::Kind => "kind",
            Tool::Kubectl => "kubectl",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key for one binary: tool, release tag, platform, architecture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySpec {
    pub tool: Tool,
    pub version: String,
    pub platform: String,
    pub arch: String,
}

impl BinarySpec {
    pub fn new(
        tool: Tool,
        version: impl Into<String>,
        platform: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            tool,
            version: version.into(),
            platform: platform.into(),
            arch: arch.into(),
        }
    }

    /// Spec for the host platform and architecture
    pub fn current(tool: Tool, version: impl Into<String>) -> Self {
        Self::new(tool, version, host_platform(), host_arch())
    }

    /// Default download URL for this binary
    ///
    /// kind ships from its GitHub releases, kubectl from the official
    /// Kubernetes release mirror.
    pub fn download_url(&self) -> String {
        match self.tool {
            Tool::Kind => format!(
                "https://github.com/kubernetes-sigs/kind/releases/download/{}/kind-{}-{}",
                self.version, self.platform, self.arch
            ),
            Tool::Kubectl => format!(
                "https://dl.k8s.io/release/{}/bin/{}/{}/kubectl{}",
                self.version,
                self.platform,
                self.arch,
                self.exe_suffix()
            ),
        }
    }

    /// File name the binary is cached under
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}-{}{}",
            self.tool,
            self.version,
            self.platform,
            self.arch,
            self.exe_suffix()
        )
    }

    fn exe_suffix(&self) -> &'static str {
        if self.tool == Tool::Kubectl && self.platform == "windows" {
            ".exe"
        } else {
            ""
        }
    }
}

/// Host OS in the naming used by Kubernetes release artifacts
fn host_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Host architecture in Go naming
fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// On-disk cache of external binaries
///
/// Each [`KindCluster`](crate::KindCluster) owns one store rooted at its
/// state directory; there is no process-wide instance.
#[derive(Debug, Clone)]
pub struct BinaryStore {
    root: PathBuf,
}

impl BinaryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache path for a spec, whether or not the binary is present
    pub fn path_for(&self, spec: &BinarySpec) -> PathBuf {
        self.root.join(spec.file_name())
    }

    /// Return the cached binary, downloading it first if absent
    ///
    /// Concurrent calls for the same spec may download redundantly, but the
    /// atomic rename means the final path is always a complete binary.
    #[instrument(skip(self, url_override), fields(tool = %spec.tool, version = %spec.version))]
    pub async fn ensure(
        &self,
        spec: &BinarySpec,
        url_override: Option<&str>,
    ) -> Result<PathBuf, DownloadError> {
        let dest = self.path_for(spec);
        if dest.exists() {
            debug!(path = %dest.display(), "binary already cached");
            return Ok(dest);
        }

        std::fs::create_dir_all(&self.root).map_err(|source| DownloadError::Io {
            path: self.root.clone(),
            source,
        })?;

        let url = url_override
            .map(str::to_owned)
            .unwrap_or_else(|| spec.download_url());
        info!(%url, "downloading {}", spec.tool);
        download_to(&url, &dest).await?;

        Ok(dest)
    }
}

/// Stream `url` into a temporary file beside `dest`, mark it executable,
/// and rename it into place.
async fn download_to(url: &str, dest: &Path) -> Result<(), DownloadError> {
    let response = reqwest::get(url)
        .await
        .map_err(|source| DownloadError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status,
        });
    }

    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|source| DownloadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| DownloadError::Request {
            url: url.to_string(),
            source,
        })?;
        tmp.write_all(&chunk).map_err(|source| DownloadError::Io {
            path: tmp.path().to_path_buf(),
            source,
        })?;
    }
    tmp.flush().map_err(|source| DownloadError::Io {
        path: tmp.path().to_path_buf(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o755)).map_err(
            |source| DownloadError::Io {
                path: tmp.path().to_path_buf(),
                source,
            },
        )?;
    }

    tmp.persist(dest).map_err(|e| DownloadError::Persist {
        path: dest.to_path_buf(),
        source: e.error,
    })?;

    Ok(())
}
