use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Suffix for in-progress uploads, which are hidden from listings.
const PARTIAL_SUFFIX: &str = ".partial";

static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Storage driver backed by a directory on the local filesystem.
///
/// Objects live at `<root>/<bucket>/b/<path>`. Uploads are written to a
/// sibling temporary file and renamed into place.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn base(&self, bucket: &str) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push("b");
        path
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Utf8PathBuf {
        self.base(bucket).join(remote)
    }

    fn partial(path: &Utf8Path) -> Utf8PathBuf {
        let n = PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = path.file_name().unwrap_or("object");
        path.with_file_name(format!(
            ".{name}.{pid}.{n}{PARTIAL_SUFFIX}",
            pid = std::process::id()
        ))
    }

    fn error(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        context: &str,
        err: std::io::Error,
    ) -> StorageError {
        StorageError::builder(self.name(), StorageErrorKind::from_io(&err), err)
            .bucket(bucket)
            .path(remote.as_str())
            .context(context)
            .build()
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| self.error(bucket, remote, "metadata", err))?;
        if metadata.is_dir() {
            return Err(StorageError::not_found(self.name(), bucket, remote));
        }
        Ok(Metadata {
            size: metadata.len(),
            created: metadata
                .created()
                .or_else(|_| metadata.modified())
                .map_err(|err| self.error(bucket, remote, "timestamp", err))?
                .into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.error(bucket, remote, "remove file", err)),
        }
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);
        let Some(parent) = path.parent() else {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::InvalidRequest,
                format!("no parent directory for {path}"),
            )
            .bucket(bucket)
            .build());
        };

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| self.error(bucket, remote, "create parent directories", err))?;

        let partial = Self::partial(&path);
        let mut writer = tokio::io::BufWriter::new(
            tokio::fs::File::create(&partial)
                .await
                .map_err(|err| self.error(bucket, remote, "create temporary file", err))?,
        );

        let written = async {
            tokio::io::copy(local, &mut writer).await?;
            writer.shutdown().await?;
            tokio::fs::rename(&partial, &path).await
        }
        .await;

        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(self.error(bucket, remote, "write object", err));
        }

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&path)
                .await
                .map_err(|err| self.error(bucket, remote, "open object", err))?,
        );

        tokio::io::copy(&mut reader, local)
            .await
            .map_err(|err| self.error(bucket, remote, "copy", err))?;

        local
            .flush()
            .await
            .map_err(|err| self.error(bucket, remote, "flush writer", err))?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let base = self.base(bucket);
        let start = match prefix {
            Some(prefix) => base.join(prefix),
            None => base.clone(),
        };

        let mut items = tokio::task::spawn_blocking(move || collect_list(&base, &start))
            .in_current_span()
            .await
            .wrap_err("local driver: list task")
            .map_err(StorageError::with(self.name(), StorageErrorKind::Other))?
            .map_err(StorageError::with(self.name(), StorageErrorKind::Io))?;

        items.sort();
        tracing::debug!("Found {} entries", items.len());
        Ok(items.into_iter().map(|p| p.to_string()).collect())
    }
}

#[tracing::instrument(level = "trace")]
fn collect_list(base: &Utf8Path, start: &Utf8Path) -> eyre::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    if start.is_dir() {
        visit(start, &mut files)?;
    } else if start.is_file() {
        files.push(start.to_owned());
    }

    Ok(files
        .into_iter()
        .filter(|p| !p.as_str().ends_with(PARTIAL_SUFFIX))
        .filter_map(|p| p.strip_prefix(base).ok().map(|p| p.to_owned()))
        .collect())
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> eyre::Result<()> {
    for entry in path
        .read_dir_utf8()
        .wrap_err_with(|| format!("read directory {path}"))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}
