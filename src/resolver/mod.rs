//! Resource resolution.
//!
//! Turns a reference string into a readable stream:
//! - `http://` and `https://` references are fetched over the network
//! - `transfer://<name>/<path>` references are opened inside a transfer directory
//!
//! Files read from READ_AUTO directories are not deleted during composition.
//! Their paths are recorded in a [`PendingDeletes`] ledger, which the sender
//! commits once the message has been handed to the transport.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use mime::Mime;
use tokio::io::AsyncReadExt;

use crate::errors::{CommsError, CommsErrorKind, CommsResult};
use crate::transfer::{TransferDirectory, TransferRegistry};

/// Scheme prefix for transfer directory references.
pub const TRANSFER_SCHEME: &str = "transfer://";

/// Underlying byte source of a resolved resource.
#[derive(Debug)]
pub enum ResourceStream {
    /// An open local file.
    File(tokio::fs::File),
    /// An HTTP response whose body has not been read yet.
    Http(reqwest::Response),
}

/// A resolved reference, ready to be read once.
#[derive(Debug)]
pub struct ResolvedResource {
    reference: String,
    content_type: Mime,
    stream: ResourceStream,
    delete_after_read: Option<PathBuf>,
}

impl ResolvedResource {
    /// Returns the reference this resource was resolved from.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Returns the content type, from the HTTP header or guessed from the path.
    pub fn content_type(&self) -> &Mime {
        &self.content_type
    }

    /// Returns the file to delete after reading; set only for READ_AUTO directories.
    pub fn delete_after_read(&self) -> Option<&Path> {
        self.delete_after_read.as_deref()
    }

    /// Reads the whole stream.
    ///
    /// Once the read has completed the auto-delete path, if any, is recorded
    /// in `pending`. A failed read records nothing.
    pub async fn read_to_end(self, pending: &mut PendingDeletes) -> CommsResult<Vec<u8>> {
        let ResolvedResource {
            reference,
            stream,
            delete_after_read,
            ..
        } = self;

        let bytes = match stream {
            ResourceStream::File(mut file) => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await.map_err(|e| {
                    CommsError::resolution(CommsErrorKind::ResourceIo, "Failed to read resource", &reference)
                        .with_cause(e)
                })?;
                buf
            }
            ResourceStream::Http(response) => response
                .bytes()
                .await
                .map_err(|e| {
                    CommsError::resolution(CommsErrorKind::ResourceFetch, "Failed to read response body", &reference)
                        .with_cause(e)
                })?
                .to_vec(),
        };

        if let Some(path) = delete_after_read {
            pending.schedule(path);
        }

        Ok(bytes)
    }

    /// Reads the whole stream as UTF-8 text.
    pub async fn read_to_string(self, pending: &mut PendingDeletes) -> CommsResult<String> {
        let reference = self.reference.clone();
        let bytes = self.read_to_end(pending).await?;
        String::from_utf8(bytes).map_err(|e| {
            CommsError::resolution(CommsErrorKind::EncodingFailed, "Resource is not valid UTF-8", &reference)
                .with_cause(e)
        })
    }
}

/// Files to delete once a message has been sent.
#[derive(Debug, Default)]
pub struct PendingDeletes {
    paths: Vec<PathBuf>,
}

impl PendingDeletes {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a path. Returns false if it was already recorded.
    pub fn schedule(&mut self, path: PathBuf) -> bool {
        if self.paths.contains(&path) {
            return false;
        }
        self.paths.push(path);
        true
    }

    /// Returns the recorded paths in first-read order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Returns the number of recorded paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// True if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Deletes every recorded file and returns how many were deleted.
    ///
    /// Every path is attempted. If any deletion fails the first failure is
    /// returned as `AutoDeleteFailed`.
    pub async fn commit(self) -> CommsResult<usize> {
        let mut deleted = 0;
        let mut first_error = None;

        for path in self.paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted += 1;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(path = %path.display(), "Deleted READ_AUTO file");
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(path = %path.display(), error = %e, "Failed to delete READ_AUTO file");
                    if first_error.is_none() {
                        first_error = Some(
                            CommsError::new(
                                CommsErrorKind::AutoDeleteFailed,
                                format!("Failed to delete {}", path.display()),
                            )
                            .with_fragment(path.display().to_string())
                            .with_cause(e),
                        );
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(deleted),
        }
    }
}

/// Resolves references to readable resources.
#[derive(Debug, Clone)]
pub struct ResourceResolver {
    registry: Arc<TransferRegistry>,
    http: reqwest::Client,
}

impl ResourceResolver {
    /// Creates a resolver over a transfer registry.
    pub fn new(registry: Arc<TransferRegistry>, fetch_timeout: Duration) -> CommsResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| CommsError::configuration("Failed to build HTTP client").with_cause(e))?;
        Ok(Self { registry, http })
    }

    /// Returns the transfer registry.
    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    /// Resolves a reference.
    pub async fn resolve(&self, reference: &str) -> CommsResult<ResolvedResource> {
        #[cfg(feature = "tracing")]
        tracing::debug!(reference = %reference, "Resolving resource");

        if reference.starts_with("http://") || reference.starts_with("https://") {
            self.fetch(reference).await
        } else if reference.starts_with(TRANSFER_SCHEME) {
            self.open_transfer(reference).await
        } else {
            Err(CommsError::resolution(
                CommsErrorKind::UnsupportedUrlScheme,
                "Unsupported URL scheme",
                reference,
            ))
        }
    }

    /// Maps a `transfer://` reference to its directory and file path without opening it.
    ///
    /// Checks run in order: URL shape, directory lookup, readability, path.
    pub fn locate(&self, reference: &str) -> CommsResult<(&TransferDirectory, PathBuf)> {
        let malformed = || {
            CommsError::resolution(
                CommsErrorKind::MalformedTransferUrl,
                "Expected transfer://<name>/<path>",
                reference,
            )
        };

        let rest = reference.strip_prefix(TRANSFER_SCHEME).ok_or_else(malformed)?;
        let (name, relative) = rest
            .split_once('/')
            .filter(|(name, relative)| !name.is_empty() && !relative.is_empty())
            .ok_or_else(malformed)?;

        let directory = self.registry.get(name).ok_or_else(|| {
            CommsError::resolution(
                CommsErrorKind::UnknownTransferDirectory,
                format!("No transfer directory named {}", name),
                reference,
            )
        })?;

        if !directory.is_readable() {
            return Err(CommsError::resolution(
                CommsErrorKind::DirectoryNotReadable,
                format!("Transfer directory {} is not readable", name),
                reference,
            ));
        }

        let path = directory.resolve_path(relative)?;
        Ok((directory, path))
    }

    async fn open_transfer(&self, reference: &str) -> CommsResult<ResolvedResource> {
        let (directory, path) = self.locate(reference)?;

        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            CommsError::resolution(
                CommsErrorKind::ResourceIo,
                format!("Failed to open {}", path.display()),
                reference,
            )
            .with_cause(e)
        })?;

        Ok(ResolvedResource {
            reference: reference.to_string(),
            content_type: mime_guess::from_path(&path).first_or_octet_stream(),
            stream: ResourceStream::File(file),
            delete_after_read: directory.is_auto_delete().then(|| path.clone()),
        })
    }

    async fn fetch(&self, reference: &str) -> CommsResult<ResolvedResource> {
        let fetch_error = |message: String| {
            CommsError::resolution(CommsErrorKind::ResourceFetch, message, reference)
        };

        let response = self
            .http
            .get(reference)
            .send()
            .await
            .map_err(|e| fetch_error(format!("Request failed: {}", e)).with_cause(e))?;

        if !response.status().is_success() {
            return Err(fetch_error(format!("Server returned {}", response.status())));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Mime>().ok())
            .unwrap_or_else(|| guess_from_url(reference));

        Ok(ResolvedResource {
            reference: reference.to_string(),
            content_type,
            stream: ResourceStream::Http(response),
            delete_after_read: None,
        })
    }
}

fn guess_from_url(reference: &str) -> Mime {
    let path = reference
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or(reference);
    mime_guess::from_path(path).first_or_octet_stream()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferMode;
    use tempfile::TempDir;

    struct Fixture {
        _dirs: Vec<TempDir>,
        resolver: ResourceResolver,
    }

    fn fixture() -> Fixture {
        let default = TempDir::new().unwrap();
        let auto = TempDir::new().unwrap();
        let outbox = TempDir::new().unwrap();
        std::fs::write(default.path().join("hello.html"), "<p>hello</p>").unwrap();
        std::fs::write(auto.path().join("once.txt"), "once").unwrap();

        let registry = TransferRegistry::new([
            TransferDirectory::new("default", default.path(), TransferMode::ReadOnly).unwrap(),
            TransferDirectory::new("auto", auto.path(), TransferMode::ReadAuto).unwrap(),
            TransferDirectory::new("outbox", outbox.path(), TransferMode::WriteOnly).unwrap(),
        ])
        .unwrap();

        Fixture {
            _dirs: vec![default, auto, outbox],
            resolver: ResourceResolver::new(Arc::new(registry), Duration::from_secs(5)).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_resolves_transfer_file() {
        let fx = fixture();
        let resource = fx.resolver.resolve("transfer://default/hello.html").await.unwrap();
        assert_eq!(resource.content_type().essence_str(), "text/html");
        assert!(resource.delete_after_read().is_none());

        let mut pending = PendingDeletes::new();
        let text = resource.read_to_string(&mut pending).await.unwrap();
        assert_eq!(text, "<p>hello</p>");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_read_auto_schedules_delete() {
        let fx = fixture();
        let mut pending = PendingDeletes::new();

        for _ in 0..2 {
            let resource = fx.resolver.resolve("transfer://auto/once.txt").await.unwrap();
            assert!(resource.delete_after_read().is_some());
            resource.read_to_end(&mut pending).await.unwrap();
        }

        assert_eq!(pending.len(), 1);
        let path = pending.paths()[0].clone();
        assert!(path.exists());

        assert_eq!(pending.commit().await.unwrap(), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_commit_reports_missing_file() {
        let tmp = TempDir::new().unwrap();
        let mut pending = PendingDeletes::new();
        pending.schedule(tmp.path().join("gone.txt"));

        let err = pending.commit().await.unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::AutoDeleteFailed);
    }

    #[tokio::test]
    async fn test_resolution_errors() {
        let fx = fixture();
        let cases = [
            ("transfer://default", CommsErrorKind::MalformedTransferUrl),
            ("transfer:///hello.html", CommsErrorKind::MalformedTransferUrl),
            ("transfer://default/", CommsErrorKind::MalformedTransferUrl),
            ("transfer://nowhere/hello.html", CommsErrorKind::UnknownTransferDirectory),
            ("transfer://outbox/hello.html", CommsErrorKind::DirectoryNotReadable),
            ("transfer://default/../../etc/passwd", CommsErrorKind::PathEscapesRoot),
            ("transfer://default/missing.html", CommsErrorKind::ResourceIo),
            ("ftp://files.dilatush.com/a.html", CommsErrorKind::UnsupportedUrlScheme),
            ("hello.html", CommsErrorKind::UnsupportedUrlScheme),
        ];

        for (reference, kind) in cases {
            let err = fx.resolver.resolve(reference).await.unwrap_err();
            assert_eq!(err.kind(), kind, "{}", reference);
        }
    }

    #[tokio::test]
    async fn test_unreadable_checked_before_path() {
        let fx = fixture();
        let err = fx.resolver.resolve("transfer://outbox/../../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::DirectoryNotReadable);
    }

    #[test]
    fn test_guess_from_url() {
        assert_eq!(guess_from_url("https://cdn.dilatush.com/a/logo.png?v=2"), mime::IMAGE_PNG);
        assert_eq!(guess_from_url("https://cdn.dilatush.com/blob"), mime::APPLICATION_OCTET_STREAM);
    }
}
