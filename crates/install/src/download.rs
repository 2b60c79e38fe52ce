//! HTTP downloads with retry, resume and checksum verification

use async_trait::async_trait;
use nodekit_core::config::{Credentials, HttpConfig};
use nodekit_core::{DownloadFailure, Error, Result, RetryConfig, with_retry};
use reqwest::{Client, StatusCode, header};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Fetches remote files.
///
/// [`HttpDownloader`] is the production implementation; tests substitute
/// their own to count or fail requests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` to `dest` and return the number of bytes written.
    ///
    /// `dest` either holds the complete file afterwards or is left untouched.
    async fn fetch(&self, url: &str, dest: &Path, expected_sha256: Option<&str>) -> Result<u64>;

    /// Download a small text document.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// Network settings for [`HttpDownloader`]
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_redirects: usize,
    pub proxy_url: Option<String>,
    pub retry: RetryConfig,
    pub user_agent: String,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

impl From<&HttpConfig> for DownloadOptions {
    fn from(http: &HttpConfig) -> Self {
        Self {
            timeout: http.timeout(),
            connect_timeout: http.connect_timeout(),
            max_redirects: http.max_redirects,
            proxy_url: http.proxy_url.clone(),
            retry: http.retry.clone(),
            user_agent: format!("nodekit/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// [`Fetcher`] backed by reqwest
pub struct HttpDownloader {
    client: Client,
    credentials: Option<Credentials>,
    /// Roots whose origin receives `credentials`
    credential_scope: Vec<reqwest::Url>,
    retry: RetryConfig,
}

impl std::fmt::Debug for HttpDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDownloader")
            .field("authenticated", &self.credentials.is_some())
            .field(
                "credential_scope",
                &self
                    .credential_scope
                    .iter()
                    .map(reqwest::Url::as_str)
                    .collect::<Vec<_>>(),
            )
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn classify(error: &reqwest::Error) -> DownloadFailure {
    if error.is_timeout() {
        DownloadFailure::Timeout
    } else if error.is_redirect() {
        DownloadFailure::TooManyRedirects
    } else {
        DownloadFailure::Network(error.to_string())
    }
}

/// Temporary file next to `dest` that receives the body.
fn part_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map_or_else(|| "download".into(), |n| n.to_string_lossy());
    dest.with_file_name(format!(".{name}.{}.part", uuid::Uuid::new_v4()))
}

/// SHA-256 of a file, hex encoded.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| Error::io(e, path, "read"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Find the digest of `file_name` in a `SHASUMS256.txt` listing.
#[must_use]
pub fn parse_shasums(listing: &str, file_name: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let digest = parts.next()?;
        let name = parts.next()?.trim_start_matches('*');
        (name == file_name && digest.len() == 64).then(|| digest.to_ascii_lowercase())
    })
}

impl HttpDownloader {
    /// Build a downloader.
    ///
    /// `credentials` are only sent to the origins named with
    /// [`HttpDownloader::with_credential_scope`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid proxy URL or when the TLS
    /// backend cannot be initialised.
    pub fn new(options: &DownloadOptions, credentials: Option<Credentials>) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(options.max_redirects));
        if let Some(proxy) = &options.proxy_url {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|e| {
                Error::configuration(format!("invalid proxy URL '{proxy}': {e}"))
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            credentials,
            credential_scope: Vec::new(),
            retry: options.retry.clone(),
        })
    }

    /// Send credentials to requests whose origin matches one of `roots`.
    #[must_use]
    pub fn with_credential_scope<'a>(mut self, roots: impl IntoIterator<Item = &'a str>) -> Self {
        self.credential_scope = roots
            .into_iter()
            .filter_map(|root| match reqwest::Url::parse(root) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(root, "Credentials will not be sent to unparsable URL root: {e}");
                    None
                }
            })
            .collect();
        self
    }

    /// Build a downloader from the `[http]` configuration section whose
    /// credentials are scoped to `roots`.
    ///
    /// # Errors
    ///
    /// See [`HttpDownloader::new`] and [`HttpConfig::credentials`].
    pub fn from_config<'a>(
        http: &HttpConfig,
        roots: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        Ok(Self::new(&DownloadOptions::from(http), http.credentials()?)?
            .with_credential_scope(roots))
    }

    fn credentials_for(&self, url: &str) -> Option<&Credentials> {
        let credentials = self.credentials.as_ref()?;
        let target = reqwest::Url::parse(url).ok()?;
        self.credential_scope
            .iter()
            .any(|root| root.origin() == target.origin())
            .then_some(credentials)
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match self.credentials_for(url) {
            Some(Credentials::Basic { username, password }) => {
                let password = password.expose_secret();
                request.basic_auth(
                    username,
                    (!password.is_empty()).then_some(password),
                )
            }
            Some(Credentials::Bearer(token)) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// One attempt, continuing from whatever `part` already holds.
    async fn attempt(&self, url: &str, part: &Path, attempt: u32) -> Result<u64> {
        let offset = tokio::fs::metadata(part).await.map_or(0, |m| m.len());
        let mut request = self.request(url);
        if offset > 0 {
            debug!(url, offset, attempt, "Resuming download");
            request = request.header(header::RANGE, format!("bytes={offset}-"));
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| Error::download(url, classify(&e)))?;
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            // The partial file is unusable; start over on the next attempt.
            let _ = tokio::fs::remove_file(part).await;
            return Err(Error::download(
                url,
                DownloadFailure::Network("server rejected resume request".to_string()),
            ));
        }
        if !status.is_success() {
            return Err(Error::download(url, DownloadFailure::Status(status.as_u16())));
        }

        let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(part)
            .await
            .map_err(|e| Error::io(e, part, "open"))?;
        let mut written = if resumed { offset } else { 0 };
        let expected = response.content_length().map(|len| len + written);

        let streamed = async {
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| Error::download(url, classify(&e)))?
            {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| Error::io(e, part, "write"))?;
                written += chunk.len() as u64;
            }
            Ok::<(), Error>(())
        }
        .await;
        // The next attempt resumes from the on-disk length, so pending writes
        // must land before an error is returned.
        file.flush().await.map_err(|e| Error::io(e, part, "flush"))?;
        if let Err(e) = streamed {
            debug!(url, written, attempt, "Download interrupted");
            return Err(e);
        }
        file.sync_all()
            .await
            .map_err(|e| Error::io(e, part, "sync"))?;

        if let Some(expected) = expected
            && expected != written
        {
            return Err(Error::download(
                url,
                DownloadFailure::Incomplete {
                    expected,
                    actual: written,
                },
            ));
        }
        Ok(written)
    }

    async fn download(&self, url: &str, part: &Path, dest: &Path, expected: Option<&str>) -> Result<u64> {
        let size = with_retry(&self.retry, move |attempt| self.attempt(url, part, attempt)).await?;

        if let Some(expected) = expected {
            let owned = part.to_path_buf();
            let actual = tokio::task::spawn_blocking(move || sha256_file(&owned))
                .await
                .map_err(|e| Error::io_no_path(std::io::Error::other(e), "hash"))??;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(Error::download(
                    url,
                    DownloadFailure::ChecksumMismatch {
                        expected: expected.to_string(),
                        actual,
                    },
                ));
            }
            debug!(url, sha256 = %actual, "Checksum verified");
        }

        tokio::fs::rename(part, dest)
            .await
            .map_err(|e| Error::io(e, dest, "rename"))?;
        Ok(size)
    }
}

#[async_trait]
impl Fetcher for HttpDownloader {
    async fn fetch(&self, url: &str, dest: &Path, expected_sha256: Option<&str>) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        info!(url, dest = %dest.display(), "Downloading");

        let part = part_path(dest);
        let result = self.download(url, &part, dest, expected_sha256).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&part).await;
        }
        let size = result?;
        info!(url, bytes = size, "Download complete");
        Ok(size)
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        with_retry(&self.retry, move |_| async move {
            let response = self
                .request(url)
                .send()
                .await
                .map_err(|e| Error::download(url, classify(&e)))?;
            let status = response.status();
            if !status.is_success() {
                return Err(Error::download(url, DownloadFailure::Status(status.as_u16())));
            }
            response
                .text()
                .await
                .map_err(|e| Error::download(url, classify(&e)))
        })
        .await
    }
}
