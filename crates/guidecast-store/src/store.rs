//! Staging, publishing and pruning of guide versions.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Local;

/// Stable name of the published document.
pub const CURRENT_NAME: &str = "xmltv.xml";

/// Default number of versions kept on disk.
pub const DEFAULT_KEEP: usize = 3;

const VERSION_PREFIX: &str = "guide-";
const VERSION_SUFFIX: &str = ".xml";
const LINK_TMP_NAME: &str = ".xmltv.xml.tmp";

/// Attempts at finding a free version name within the same millisecond.
const MAX_NAME_ATTEMPTS: u32 = 100;

/// A version file being written. Publish it with [`GuideStore::commit`] or
/// drop it with [`GuideStore::discard`].
#[derive(Debug)]
pub struct StagedGuide {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl StagedGuide {
    /// Path of the staged file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and syncs the file, returning its path.
    fn finish(self) -> Result<PathBuf> {
        let file = self
            .writer
            .into_inner()
            .map_err(io::IntoInnerError::into_error)
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", self.path.display()))?;
        Ok(self.path)
    }
}

impl Write for StagedGuide {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Directory of timestamped guide versions with a stable `xmltv.xml` link
/// to the newest validated one.
#[derive(Debug, Clone)]
pub struct GuideStore {
    dir: PathBuf,
    keep: usize,
}

/// Sort key of a version file name: timestamp, then collision counter.
fn version_key(name: &str) -> Option<(String, u32)> {
    let stem = name
        .strip_prefix(VERSION_PREFIX)?
        .strip_suffix(VERSION_SUFFIX)?;
    match stem.split_once('-') {
        Some((stamp, n)) => Some((stamp.to_owned(), n.parse().ok()?)),
        None => Some((stem.to_owned(), 0)),
    }
}

impl GuideStore {
    /// Opens (or creates) the store at `dir`, keeping at least one version.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>, keep: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
        Ok(Self {
            dir,
            keep: keep.max(1),
        })
    }

    /// Store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the stable link.
    #[must_use]
    pub fn current_link(&self) -> PathBuf {
        self.dir.join(CURRENT_NAME)
    }

    /// Creates a new, empty version file.
    ///
    /// # Errors
    ///
    /// Returns an error if no file could be created.
    pub fn stage(&self) -> Result<StagedGuide> {
        let stamp = Local::now().format("%Y%m%d%H%M%S%3f").to_string();
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{VERSION_PREFIX}{stamp}{VERSION_SUFFIX}")
            } else {
                format!("{VERSION_PREFIX}{stamp}-{attempt}{VERSION_SUFFIX}")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    tracing::debug!(path = %path.display(), "Staged new guide version");
                    return Ok(StagedGuide {
                        path,
                        writer: BufWriter::new(file),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to create {}", path.display()));
                }
            }
        }
        bail!("no free version name for timestamp {stamp}")
    }

    /// Publishes a staged version: repoints the link atomically and prunes
    /// old versions. Returns the version's path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be synced or the link replaced.
    pub fn commit(&self, staged: StagedGuide) -> Result<PathBuf> {
        let path = staged.finish()?;
        self.publish(&path)?;
        tracing::info!(path = %path.display(), "Published guide version");

        match self.prune() {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Pruned old guide versions"),
            Err(e) => tracing::warn!(error = %e, "Failed to prune old guide versions"),
        }
        Ok(path)
    }

    /// Deletes a staged version that must not be published.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn discard(&self, staged: StagedGuide) -> Result<()> {
        let StagedGuide { path, writer } = staged;
        drop(writer);
        fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
        tracing::warn!(path = %path.display(), "Discarded guide version");
        Ok(())
    }

    /// Path to read the published document from, if one exists.
    #[must_use]
    pub fn current(&self) -> Option<PathBuf> {
        let link = self.current_link();
        fs::metadata(&link)
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map(|_| link)
    }

    /// Version files, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn versions(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read directory {}", self.dir.display()))?;
        let mut versions: Vec<((String, u32), PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.context("failed to read directory entry")?;
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(version_key) {
                versions.push((key, entry.path()));
            }
        }
        versions.sort();
        Ok(versions.into_iter().map(|(_, path)| path).collect())
    }

    /// Deletes the oldest versions beyond the retention count, never the
    /// published one. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn prune(&self) -> Result<usize> {
        let versions = self.versions()?;
        let published = fs::read_link(self.current_link())
            .ok()
            .and_then(|target| target.file_name().map(ToOwned::to_owned));

        let excess = versions.len().saturating_sub(self.keep);
        let mut removed: usize = 0;
        for path in versions.iter().take(excess) {
            if published.as_deref() == path.file_name() {
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => removed = removed.saturating_add(1),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove old guide version");
                }
            }
        }
        Ok(removed)
    }

    #[cfg(unix)]
    fn publish(&self, path: &Path) -> Result<()> {
        let target = path.file_name().context("version path has no file name")?;
        let tmp = self.dir.join(LINK_TMP_NAME);
        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("failed to clear temporary link"),
        }
        std::os::unix::fs::symlink(target, &tmp).context("failed to create temporary link")?;
        fs::rename(&tmp, self.current_link()).context("failed to replace current guide link")?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn publish(&self, path: &Path) -> Result<()> {
        let tmp = self.dir.join(LINK_TMP_NAME);
        fs::copy(path, &tmp).context("failed to copy guide version")?;
        fs::rename(&tmp, self.current_link()).context("failed to replace current guide copy")?;
        Ok(())
    }
}
