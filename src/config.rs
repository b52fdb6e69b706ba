//! Configuration for the archive worker client and the rehydration engine.
//!
//! Everything the library would otherwise read from global site settings or
//! the process environment lives in [`ArchiverConfig`]. It is built once via
//! [`ArchiverConfigBuilder`] and handed to [`crate::ArchiveWorkerClient`] and
//! [`crate::Rehydrator`] at construction time. [`ArchiverConfig::from_env`] is
//! the only place that touches environment variables.

use crate::error::ArchiverError;
use crate::pipeline::resolve::origin_of;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable holding the internal host override for image fetches.
///
/// Example: `QUIZ_ARCHIVER_INTERNAL_HOST=http://moodle-internal:8080`
pub const INTERNAL_HOST_ENV: &str = "QUIZ_ARCHIVER_INTERNAL_HOST";

/// Path suffix of the REST webservice endpoint the worker calls back into.
pub const WS_ENDPOINT_SUFFIX: &str = "/webservice/rest/server.php";

/// Path suffix of the upload endpoint the worker pushes artifacts to.
pub const UPLOAD_ENDPOINT_SUFFIX: &str = "/webservice/upload.php";

/// Configuration shared by the worker client and the rehydration engine.
///
/// # Example
/// ```rust
/// use quiz_archiver::ArchiverConfig;
///
/// let config = ArchiverConfig::builder()
///     .wwwroot("https://moodle.example.org")
///     .worker_url("http://archiver-worker:8080/archive")
///     .connect_timeout_secs(5)
///     .build()
///     .unwrap();
/// assert_eq!(
///     config.moodle_ws_url(),
///     "https://moodle.example.org/webservice/rest/server.php"
/// );
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiverConfig {
    /// Public web root of the site, e.g. `https://moodle.example.org`.
    pub wwwroot: String,

    /// Web root the worker should use to reach the site, when it differs from
    /// the public one (container networks, reverse proxies). Optional.
    pub internal_wwwroot: Option<String>,

    /// Enqueue endpoint of the archive worker.
    pub worker_url: String,

    /// TCP connect timeout for the enqueue call in seconds. Default: 10.
    pub connect_timeout_secs: u64,

    /// Total timeout for the enqueue call in seconds. Default: 60.
    pub request_timeout_secs: u64,

    /// Site data directory. Stack plots are read from `<dataroot>/stack/plots`.
    pub dataroot: PathBuf,

    /// Scheme and host (`http://internal:8080`) that replace the public
    /// origin when fetching images. Usually sourced from
    /// [`INTERNAL_HOST_ENV`].
    pub internal_host: Option<String>,

    /// Per-image timeout for generic HTTP fetches in seconds. Default: 30.
    pub image_fetch_timeout_secs: u64,

    /// Skip TLS certificate and hostname verification for generic image
    /// fetches. Default: false.
    ///
    /// Only meant for deployments where the site is reached through an
    /// internal address with a self-signed certificate.
    pub insecure_image_fetch: bool,

    /// Number of images fetched at the same time. Default: 4.
    /// `1` processes images strictly one after another.
    pub concurrency: usize,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            wwwroot: "http://localhost".to_string(),
            internal_wwwroot: None,
            worker_url: "http://localhost:8080".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
            dataroot: PathBuf::from("/var/www/moodledata"),
            internal_host: None,
            image_fetch_timeout_secs: 30,
            insecure_image_fetch: false,
            concurrency: 4,
        }
    }
}

impl ArchiverConfig {
    /// Create a new builder for `ArchiverConfig`.
    pub fn builder() -> ArchiverConfigBuilder {
        ArchiverConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults plus the internal host override from [`INTERNAL_HOST_ENV`].
    pub fn from_env() -> ArchiverConfigBuilder {
        let mut builder = Self::builder();
        if let Ok(host) = std::env::var(INTERNAL_HOST_ENV) {
            if !host.trim().is_empty() {
                builder = builder.internal_host(host.trim());
            }
        }
        builder
    }

    /// Base URL handed to the worker for callbacks, without trailing slash.
    pub fn callback_base(&self) -> &str {
        self.internal_wwwroot
            .as_deref()
            .filter(|root| !root.is_empty())
            .unwrap_or(self.wwwroot.as_str())
            .trim_end_matches('/')
    }

    pub fn moodle_ws_url(&self) -> String {
        format!("{}{}", self.callback_base(), WS_ENDPOINT_SUFFIX)
    }

    pub fn moodle_upload_url(&self) -> String {
        format!("{}{}", self.callback_base(), UPLOAD_ENDPOINT_SUFFIX)
    }

    /// Directory holding cached stack plot images.
    pub fn stack_plot_dir(&self) -> PathBuf {
        self.dataroot.join("stack").join("plots")
    }
}

/// Builder for [`ArchiverConfig`].
#[derive(Debug)]
pub struct ArchiverConfigBuilder {
    config: ArchiverConfig,
}

impl ArchiverConfigBuilder {
    pub fn wwwroot(mut self, wwwroot: impl Into<String>) -> Self {
        self.config.wwwroot = wwwroot.into();
        self
    }

    pub fn internal_wwwroot(mut self, root: impl Into<String>) -> Self {
        self.config.internal_wwwroot = Some(root.into());
        self
    }

    pub fn worker_url(mut self, url: impl Into<String>) -> Self {
        self.config.worker_url = url.into();
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn dataroot(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dataroot = path.into();
        self
    }

    pub fn internal_host(mut self, host: impl Into<String>) -> Self {
        self.config.internal_host = Some(host.into());
        self
    }

    pub fn image_fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.image_fetch_timeout_secs = secs;
        self
    }

    pub fn insecure_image_fetch(mut self, v: bool) -> Self {
        self.config.insecure_image_fetch = v;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ArchiverConfig, ArchiverError> {
        let c = &self.config;
        if !is_http_url(&c.wwwroot) {
            return Err(ArchiverError::InvalidConfig(format!(
                "wwwroot must be an http(s) URL, got '{}'",
                c.wwwroot
            )));
        }
        if let Some(ref root) = c.internal_wwwroot {
            if !root.is_empty() && !is_http_url(root) {
                return Err(ArchiverError::InvalidConfig(format!(
                    "internal wwwroot must be an http(s) URL, got '{root}'"
                )));
            }
        }
        if let Some(ref host) = c.internal_host {
            if !is_http_url(host) {
                return Err(ArchiverError::InvalidConfig(format!(
                    "internal host must look like 'http://host[:port]', got '{host}'"
                )));
            }
        }
        if c.connect_timeout_secs == 0 || c.request_timeout_secs == 0 {
            return Err(ArchiverError::InvalidConfig(
                "Timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.image_fetch_timeout_secs == 0 {
            return Err(ArchiverError::InvalidConfig(
                "Image fetch timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

fn is_http_url(s: &str) -> bool {
    (s.starts_with("http://") || s.starts_with("https://")) && origin_of(s).is_some()
}
