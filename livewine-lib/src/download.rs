//! Download system with caching, retries and checksum verification

use crate::error::{InstallerError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_ATTEMPTS: u32 = 3;
/// Installer archives run to several gigabytes
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Download manager
pub struct DownloadManager {
    client: Client,
    cache_dir: PathBuf,
    attempts: u32,
    backoff: Duration,
    cancel: CancellationToken,
}

impl DownloadManager {
    /// Create a new download manager
    pub fn new(cache_dir: PathBuf, request_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(concat!("livewine/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30));
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        std::fs::create_dir_all(&cache_dir)?;

        Ok(Self {
            client,
            cache_dir,
            attempts: DEFAULT_ATTEMPTS,
            backoff: Duration::from_secs(2),
            cancel: CancellationToken::new(),
        })
    }

    /// Abandon transfers and backoff waits when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn until_cancelled<T>(&self, work: impl Future<Output = T>) -> Result<T> {
        tokio::select! {
            out = work => Ok(out),
            _ = self.cancel.cancelled() => Err(InstallerError::Cancelled),
        }
    }

    /// Download a file to the cache, retrying transient failures
    pub async fn fetch(
        &self,
        url: &str,
        filename: &str,
        expected_sha256: Option<&str>,
    ) -> Result<PathBuf> {
        let cache_file = self.cache_dir.join(filename);

        // Check if already cached
        if cache_file.exists() {
            match expected_sha256 {
                Some(expected) if !self.verify_checksum(&cache_file, expected)? => {
                    warn!("Cached {} has the wrong checksum, downloading again", filename);
                    std::fs::remove_file(&cache_file)?;
                }
                _ => {
                    info!("Using cached {}", cache_file.display());
                    return Ok(cache_file);
                }
            }
        }

        let mut last_error = None;
        for attempt in 1..=self.attempts {
            info!("Downloading {} (attempt {}/{})", url, attempt, self.attempts);
            match self.download_once(url, &cache_file, expected_sha256).await {
                Ok(()) => return Ok(cache_file),
                // A bad checksum will not fix itself
                Err(e @ InstallerError::ChecksumMismatch { .. }) => return Err(e),
                Err(e @ InstallerError::Cancelled) => {
                    warn!("Download of {} cancelled", url);
                    let _ = std::fs::remove_file(&cache_file);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Download attempt {} failed: {}", attempt, e);
                    let _ = std::fs::remove_file(&cache_file);
                    last_error = Some(e);
                    if attempt < self.attempts {
                        self.until_cancelled(tokio::time::sleep(self.backoff * attempt))
                            .await?;
                    }
                }
            }
        }

        Err(InstallerError::Download(format!(
            "{} failed after {} attempts: {}",
            url,
            self.attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<()> {
        let mut response = self
            .until_cancelled(self.client.get(url).send())
            .await??
            .error_for_status()?;

        let total_size = response.content_length().unwrap_or(0);

        let pb = if total_size > 0 {
            let pb = ProgressBar::new(total_size);
            let style = ProgressStyle::default_bar()
                .template("{msg} {bar:40.cyan/blue} {bytes}/{total_bytes} {eta}")
                .map_err(|e| {
                    InstallerError::Download(format!("Progress bar template error: {}", e))
                })?;
            pb.set_style(style);
            pb.set_message("Downloading");
            Some(pb)
        } else {
            None
        };

        let mut file = std::fs::File::create(dest)?;
        let mut hasher = Sha256::new();

        while let Some(chunk) = self.until_cancelled(response.chunk()).await?? {
            file.write_all(&chunk)?;
            hasher.update(&chunk);

            if let Some(ref pb) = pb {
                pb.inc(chunk.len() as u64);
            }
        }
        file.sync_all()?;

        if let Some(pb) = pb {
            pb.finish_with_message("Downloaded");
        }

        if let Some(expected) = expected_sha256 {
            let computed = format!("{:x}", hasher.finalize());
            if !computed.eq_ignore_ascii_case(expected) {
                std::fs::remove_file(dest)?;
                return Err(InstallerError::ChecksumMismatch {
                    expected: expected.to_string(),
                    got: computed,
                });
            }
        }

        Ok(())
    }

    /// Verify SHA256 checksum
    pub fn verify_checksum<P: AsRef<Path>>(&self, path: P, expected: &str) -> Result<bool> {
        Ok(sha256_file(path)?.eq_ignore_ascii_case(expected))
    }
}

/// Hex SHA-256 of a file
pub fn sha256_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = std::fs::File::open(path)?;
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Last path segment of a URL, without query or fragment
pub fn filename_from_url(url: &str) -> Option<String> {
    let url = url.split(['?', '#']).next()?;
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    // Everything before the first slash is the host
    let (_, path) = rest.split_once('/')?;
    let name = path.trim_end_matches('/').rsplit('/').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

pub fn is_url(source: &str) -> bool {
    source.starts_with("https://") || source.starts_with("http://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn url_filenames() {
        let url = "https://cdn.example.com/live/ableton_live_suite_12.1.5_64.zip?token=x";
        assert_eq!(
            filename_from_url(url).as_deref(),
            Some("ableton_live_suite_12.1.5_64.zip")
        );
        assert_eq!(
            filename_from_url("https://example.com/yabridge-5.1.1.tar.gz#frag").as_deref(),
            Some("yabridge-5.1.1.tar.gz")
        );
        assert_eq!(filename_from_url("https://example.com/"), None);
    }

    #[test]
    fn url_detection() {
        assert!(is_url("https://example.com/a.zip"));
        assert!(is_url("http://example.com/a.zip"));
        assert!(!is_url("/home/me/a.zip"));
        assert!(!is_url("ftp.zip"));
    }

    // sha256("abc")
    const ABC_SUM: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    fn response(status: &str, body: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
        .into_bytes()
    }

    async fn read_request(stream: &mut TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
    }

    /// Serves `replies` in order, one per connection, repeating the last.
    /// Returns the base URL and the number of requests seen.
    async fn serve(replies: Vec<Vec<u8>>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let n = seen.fetch_add(1, Ordering::SeqCst);
                let reply = replies[n.min(replies.len() - 1)].clone();
                read_request(&mut stream).await;
                let _ = stream.write_all(&reply).await;
                let _ = stream.shutdown().await;
            }
        });
        (url, hits)
    }

    fn manager(dir: &Path) -> DownloadManager {
        let mut manager = DownloadManager::new(dir.to_path_buf(), None).unwrap();
        manager.backoff = Duration::from_millis(10);
        manager
    }

    #[tokio::test]
    async fn cached_file_with_matching_checksum_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DownloadManager::new(dir.path().to_path_buf(), None).unwrap();
        let cached = dir.path().join("live.zip");
        std::fs::write(&cached, b"abc").unwrap();

        // The URL is never contacted when the cache is valid
        let path = manager
            .fetch("http://127.0.0.1:9/live.zip", "live.zip", Some(ABC_SUM))
            .await
            .unwrap();
        assert_eq!(path, cached);
        assert!(manager.verify_checksum(&path, &ABC_SUM.to_uppercase()).unwrap());
    }

    #[tokio::test]
    async fn cached_file_with_a_bad_checksum_is_downloaded_again() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("live.zip"), b"stale").unwrap();
        let (url, hits) = serve(vec![response("200 OK", "abc")]).await;

        let path = manager(dir.path())
            .fetch(&format!("{}/live.zip", url), "live.zip", Some(ABC_SUM))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (url, hits) = serve(vec![
            response("503 Service Unavailable", ""),
            response("200 OK", "abc"),
        ])
        .await;

        let path = manager(dir.path())
            .fetch(&format!("{}/live.zip", url), "live.zip", Some(ABC_SUM))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let (url, hits) = serve(vec![response("500 Internal Server Error", "")]).await;

        let err = manager(dir.path())
            .fetch(&format!("{}/live.zip", url), "live.zip", None)
            .await
            .unwrap_err();
        assert!(matches!(err, InstallerError::Download(_)), "{:?}", err);
        assert_eq!(hits.load(Ordering::SeqCst), DEFAULT_ATTEMPTS as usize);
        assert!(!dir.path().join("live.zip").exists());
    }

    #[tokio::test]
    async fn checksum_mismatch_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (url, hits) = serve(vec![response("200 OK", "abd")]).await;

        let err = manager(dir.path())
            .fetch(&format!("{}/live.zip", url), "live.zip", Some(ABC_SUM))
            .await
            .unwrap_err();
        assert!(matches!(err, InstallerError::ChecksumMismatch { .. }), "{:?}", err);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("live.zip").exists());
    }

    #[tokio::test]
    async fn truncated_transfer_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let short = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: 1000\r\nConnection: close\r\n\r\n{}",
            "x".repeat(100)
        );
        let (url, hits) = serve(vec![short.into_bytes()]).await;

        let mut once = manager(dir.path());
        once.attempts = 1;
        let err = once
            .fetch(&format!("{}/live.zip", url), "live.zip", None)
            .await
            .unwrap_err();
        assert!(matches!(err, InstallerError::Download(_)), "{:?}", err);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("live.zip").exists());
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stalled_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/live.zip", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            read_request(&mut stream).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000000\r\n\r\npartial")
                .await;
            // Hold the connection open without sending the rest
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(stream);
        });

        let cancel = CancellationToken::new();
        let downloads = manager(dir.path()).with_cancel(cancel.clone());
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });

        let fetched = tokio::time::timeout(
            Duration::from_secs(5),
            downloads.fetch(&url, "live.zip", None),
        )
        .await
        .expect("download did not stop after cancellation");
        assert!(matches!(fetched, Err(InstallerError::Cancelled)), "{:?}", fetched);
        assert!(!dir.path().join("live.zip").exists());
        trigger.await.unwrap();
    }
}
