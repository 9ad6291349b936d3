//! Manifest acquisition from local files, URLs and OCI images

use crate::config::ManifestSource;
use crate::utils::container::ContainerRuntime;
use crate::utils::errors::{InstallerError, Result};
use reqwest::StatusCode;
use std::sync::OnceLock;
use std::time::Duration;

/// Blocking `GET`
pub trait HttpFetch {
    fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// Reads one file out of a container image. `Ok(None)` means the image
/// exists but does not carry the file.
pub trait ImageFetch {
    fn fetch_file(&self, image: &str, file_name: &str) -> Result<Option<Vec<u8>>>;
}

pub struct HttpClient {
    client: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("storage-deploy/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| InstallerError::SourceUnreachable {
                location: "http client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl HttpFetch for HttpClient {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let unreachable = |reason: String| InstallerError::SourceUnreachable {
            location: url.to_string(),
            reason,
        };

        tracing::debug!(url, "fetching");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| unreachable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(InstallerError::SourceNotFound(url.to_string())),
            status if !status.is_success() => Err(unreachable(format!("HTTP {status}"))),
            _ => Ok(response
                .bytes()
                .map_err(|e| unreachable(e.to_string()))?
                .to_vec()),
        }
    }
}

/// Container runtime picked on the first image reference, so runs that
/// never use images do not need docker or podman.
#[derive(Debug, Default)]
pub struct LazyRuntime {
    runtime: OnceLock<ContainerRuntime>,
}

impl ImageFetch for LazyRuntime {
    fn fetch_file(&self, image: &str, file_name: &str) -> Result<Option<Vec<u8>>> {
        let runtime = match self.runtime.get() {
            Some(runtime) => *runtime,
            None => {
                let detected = ContainerRuntime::detect()?;
                *self.runtime.get_or_init(|| detected)
            }
        };
        runtime.read_file_from_image(image, file_name)
    }
}

/// Picks the first source that yields a manifest:
/// explicit path, explicit URL, image, then the version-derived default URL.
pub struct SourceResolver {
    http: Box<dyn HttpFetch>,
    images: Box<dyn ImageFetch>,
}

impl SourceResolver {
    pub fn new(http: Box<dyn HttpFetch>, images: Box<dyn ImageFetch>) -> Self {
        Self { http, images }
    }

    pub fn http(&self) -> &dyn HttpFetch {
        self.http.as_ref()
    }

    pub fn resolve(&self, source: &ManifestSource, default_url: &str, file_name: &str) -> Result<Vec<u8>> {
        if let Some(path) = &source.path {
            let bytes = std::fs::read(path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    InstallerError::SourceNotFound(path.display().to_string())
                }
                _ => InstallerError::Io(e),
            })?;
            if bytes.is_empty() {
                return Err(InstallerError::SourceNotFound(path.display().to_string()));
            }
            return Ok(bytes);
        }

        if let Some(url) = &source.url {
            return self.fetch(url);
        }

        if let Some(image) = &source.image {
            let found = self.images.fetch_file(image, file_name).map_err(|e| {
                InstallerError::SourceUnreachable {
                    location: image.clone(),
                    reason: e.to_string(),
                }
            })?;
            match found {
                Some(bytes) if !bytes.is_empty() => return Ok(bytes),
                _ => crate::log_info!(
                    "{} not found in {}, falling back to {}",
                    file_name,
                    image,
                    default_url
                ),
            }
        }

        self.fetch(default_url)
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self.http.get(url)?;
        if bytes.is_empty() {
            return Err(InstallerError::SourceNotFound(url.to_string()));
        }
        Ok(bytes)
    }
}
