use crate::client::{Body, HostClient};
use crate::manifest::ManifestReference;
use crate::product::ProductIdentifier;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Read access to the source archive, the seam the fetcher is tested through.
pub trait SourceArchive {
    /// Advertised size of the content at `path`, read from `Content-Length`.
    async fn content_length(&self, path: &str) -> Result<Option<u64>>;

    /// Full content at `path`, `None` when the transfer failed.
    async fn fetch(&self, path: &str, streaming: bool) -> Option<Body>;
}

impl SourceArchive for HostClient {
    async fn content_length(&self, path: &str) -> Result<Option<u64>> {
        HostClient::content_length(self, path).await
    }

    async fn fetch(&self, path: &str, streaming: bool) -> Option<Body> {
        HostClient::fetch(self, path, streaming).await
    }
}

/// Source path and local destination of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    pub source_path: String,
    pub destination: PathBuf,
}

impl FileTarget {
    pub fn new(source_path: String, destination: PathBuf) -> Self {
        Self {
            source_path,
            destination,
        }
    }

    /// Source below `root_node`, destination below `<output_dir>/<title>`.
    pub fn from_reference(
        reference: &ManifestReference,
        id: &ProductIdentifier,
        root_node: &str,
        title: &str,
        output_dir: &Path,
    ) -> Self {
        Self::new(
            reference.node_path(id, root_node),
            reference.destination(output_dir, title),
        )
    }
}

/// Advertised size against the size on disk. Only an exact match of two
/// known sizes counts as cached; this is a size check, not a content check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheProbe {
    pub expected: Option<u64>,
    pub local: Option<u64>,
}

impl CacheProbe {
    pub fn is_fresh(&self) -> bool {
        matches!((self.expected, self.local), (Some(expected), Some(local)) if expected == local)
    }
}

pub fn local_size(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    SkippedCached,
    Downloaded,
    Failed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub skipped: Vec<PathBuf>,
    pub downloaded: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl FetchReport {
    fn record(&mut self, outcome: FileOutcome, path: PathBuf) {
        match outcome {
            FileOutcome::SkippedCached => self.skipped.push(path),
            FileOutcome::Downloaded => self.downloaded.push(path),
            FileOutcome::Failed => self.failed.push(path),
        }
    }

    pub fn total(&self) -> usize {
        self.skipped.len() + self.downloaded.len() + self.failed.len()
    }
}

fn write_file(destination: &Path, body: &Body) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(destination, body.as_bytes())
}

/// Downloads files one after another, skipping those whose local copy has
/// the size the source currently advertises.
pub struct CacheAwareFetcher<'a, S: SourceArchive> {
    source: &'a S,
    use_cache: bool,
    streaming: bool,
}

impl<'a, S: SourceArchive> CacheAwareFetcher<'a, S> {
    pub fn new(source: &'a S, use_cache: bool) -> Self {
        Self {
            source,
            use_cache,
            streaming: false,
        }
    }

    /// Use streamed transfers with progress reporting for the full downloads.
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    async fn probe(&self, target: &FileTarget) -> CacheProbe {
        let expected = match self.source.content_length(&target.source_path).await {
            Ok(size) => size,
            Err(err) => {
                warn!(path = %target.source_path, error = %err, "size probe failed");
                None
            }
        };
        CacheProbe {
            expected,
            local: local_size(&target.destination),
        }
    }

    pub async fn fetch_file(&self, target: &FileTarget) -> FileOutcome {
        if self.use_cache {
            let probe = self.probe(target).await;
            info!(
                path = %target.destination.display(),
                expected = ?probe.expected,
                local = ?probe.local,
                "re-download decision"
            );
            if probe.is_fresh() {
                info!(
                    path = %target.destination.display(),
                    size = probe.local.unwrap_or_default(),
                    "download skipped (cached)"
                );
                return FileOutcome::SkippedCached;
            }
        }

        let body = match self.source.fetch(&target.source_path, self.streaming).await {
            Some(body) if !body.is_empty() => body,
            _ => {
                warn!(path = %target.source_path, "failed to download");
                return FileOutcome::Failed;
            }
        };

        match write_file(&target.destination, &body) {
            Ok(()) => {
                info!(
                    path = %target.destination.display(),
                    size = body.len(),
                    "downloaded"
                );
                FileOutcome::Downloaded
            }
            Err(err) => {
                warn!(path = %target.destination.display(), error = %err, "unable to write file");
                FileOutcome::Failed
            }
        }
    }

    /// Processes every reference in order. Failures are recorded and do not
    /// stop the batch.
    pub async fn fetch_all(
        &self,
        output_dir: &Path,
        id: &ProductIdentifier,
        root_node: &str,
        title: &str,
        references: &[ManifestReference],
    ) -> FetchReport {
        let mut report = FetchReport::default();
        for reference in references {
            let target = FileTarget::from_reference(reference, id, root_node, title, output_dir);
            let outcome = self.fetch_file(&target).await;
            report.record(outcome, target.destination);
        }
        info!(
            downloaded = report.downloaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "metadata files processed"
        );
        report
    }
}
