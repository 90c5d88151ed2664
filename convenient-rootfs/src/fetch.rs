//! Source downloading with mirror fallback
//!
//! [`HttpDownloader`] tries each mirror URL in order and keeps the first
//! successful download. A file that is already present in the destination
//! directory is never fetched again. The actual byte transfer is delegated to
//! a [`Transport`] so tests can count network requests.

use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while fetching sources
#[derive(Debug, Error)]
pub enum FetchError {
    /// The descriptor lists no mirrors
    #[error("No download URLs given")]
    NoUrls,

    /// The URL has no file name to save under
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Connecting, the request or the transfer failed
    #[error("HTTP download of {url} failed: {message}")]
    Http {
        /// URL being fetched
        url: String,
        /// Transport error text
        message: String,
    },

    /// Writing the download to disk failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Every mirror was tried and none worked
    #[error("All {attempts} mirrors failed, last error: {last}")]
    AllMirrorsFailed {
        /// Number of mirrors tried
        attempts: usize,
        /// Error from the last mirror
        #[source]
        last: Box<FetchError>,
    },
}

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Materializes a source archive from a list of mirrors.
pub trait Downloader {
    /// Download the first reachable URL into `dest_dir` and return the path of
    /// the downloaded file.
    ///
    /// # Errors
    ///
    /// Fails only if every URL fails, carrying the last error.
    fn fetch(&self, urls: &[String], dest_dir: &Path) -> FetchResult<PathBuf>;
}

/// Moves the bytes of one URL into one file.
pub trait Transport {
    /// Download `url` to `dest`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error on any network or I/O failure. `dest` must not exist
    /// afterwards in that case.
    fn download(&self, url: &str, dest: &Path) -> FetchResult<u64>;
}

/// File name a URL downloads to: its last path segment, without query or
/// fragment.
///
/// # Errors
///
/// Returns `FetchError::InvalidUrl` when the URL has no usable file name.
pub fn file_name_from_url(url: &str) -> FetchResult<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    match path.rsplit_once('/') {
        Some((_, name)) if !name.is_empty() && name != ".." && name != "." => {
            Ok(name.to_string())
        }
        _ => Err(FetchError::InvalidUrl(url.to_string())),
    }
}

/// Blocking HTTP transport based on `ureq`, with a progress bar.
///
/// The timeout bounds connecting and each individual read, never the whole
/// transfer, so a large archive on a slow mirror still completes.
/// `file://` URLs are copied from the local filesystem.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    timeout: Duration,
    show_progress: bool,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport")
            .field("timeout", &self.timeout)
            .field("show_progress", &self.show_progress)
            .finish_non_exhaustive()
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl UreqTransport {
    /// Transport with the given connect and read timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        Self {
            agent,
            timeout,
            show_progress: true,
        }
    }

    /// Enable or disable the progress bar.
    #[must_use]
    pub fn progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress_bar(&self, len: Option<u64>, name: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = match len {
            Some(len) => {
                let bar = ProgressBar::new(len);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template(
                            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} \
                             {bytes_per_sec} ({eta})",
                        )
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=>-"),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner} {msg} {bytes} {bytes_per_sec}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        };
        bar.set_message(name.to_string());
        bar
    }
}

impl Transport for UreqTransport {
    fn download(&self, url: &str, dest: &Path) -> FetchResult<u64> {
        if let Some(local) = url.strip_prefix("file://") {
            return Ok(fs::copy(local, dest)?);
        }

        let response = self.agent.get(url).call().map_err(|e| FetchError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let len = response
            .header("Content-Length")
            .and_then(|v| v.parse::<u64>().ok());
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bar = self.progress_bar(len, &name);

        let mut reader = bar.wrap_read(response.into_reader());
        let mut file = fs::File::create(dest)?;
        let copied = io::copy(&mut reader, &mut file);
        bar.finish_and_clear();

        match copied {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(dest);
                Err(e.into())
            }
        }
    }
}

/// Downloader with mirror fallback on top of a [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct HttpDownloader<T = UreqTransport> {
    transport: T,
}

impl<T: Transport> HttpDownloader<T> {
    /// Create a downloader using `transport`.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn fetch_one(&self, url: &str, dest_dir: &Path) -> FetchResult<PathBuf> {
        let name = file_name_from_url(url)?;
        let dest = dest_dir.join(&name);
        let partial = dest_dir.join(format!("{name}.part"));

        info!("⬇️  Fetching {}", url);
        let result = self.transport.download(url, &partial);
        match result {
            Ok(bytes) => {
                fs::rename(&partial, &dest)?;
                info!("Downloaded {} ({} bytes)", dest.display(), bytes);
                Ok(dest)
            }
            Err(e) => {
                let _ = fs::remove_file(&partial);
                Err(e)
            }
        }
    }
}

impl<T: Transport> Downloader for HttpDownloader<T> {
    fn fetch(&self, urls: &[String], dest_dir: &Path) -> FetchResult<PathBuf> {
        if urls.is_empty() {
            return Err(FetchError::NoUrls);
        }
        fs::create_dir_all(dest_dir)?;

        for url in urls {
            if let Ok(name) = file_name_from_url(url) {
                let existing = dest_dir.join(name);
                if existing.is_file() {
                    info!("Source already downloaded: {}", existing.display());
                    return Ok(existing);
                }
            }
        }

        let mut last = FetchError::NoUrls;
        for url in urls {
            match self.fetch_one(url, dest_dir) {
                Ok(path) => return Ok(path),
                Err(e) => {
                    warn!("Mirror {} failed: {}", url, e);
                    last = e;
                }
            }
        }

        debug!("All mirrors exhausted for {}", dest_dir.display());
        Err(FetchError::AllMirrorsFailed {
            attempts: urls.len(),
            last: Box::new(last),
        })
    }
}
