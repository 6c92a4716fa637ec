//! Filesystem helpers for inputs and outputs.
//!
//! Inputs are only ever read. Outputs go through [`prepare_output`], which
//! enforces the no-overwrite rule and creates missing parent directories.
//! Encoders write into a [`StagedOutput`] next to the target, which only
//! takes the target name once the encoder has succeeded.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::fs;

use crate::error::{MediaError, MediaResult, ValidationError};

/// Fail with `MissingFile` unless `path` exists.
pub fn require_file(path: &Path) -> Result<(), ValidationError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ValidationError::MissingFile(path.to_path_buf()))
    }
}

/// Absolute form of `path` without touching the filesystem.
pub fn absolute(path: &Path) -> MediaResult<PathBuf> {
    Ok(std::path::absolute(path)?)
}

/// Make an output path ready to be written.
///
/// Refuses an existing file unless `overwrite` is set, and creates the parent
/// directory if it is absent.
pub async fn prepare_output(path: &Path, overwrite: bool) -> MediaResult<PathBuf> {
    let path = absolute(path)?;

    if !overwrite && fs::try_exists(&path).await? {
        return Err(MediaError::OutputExists(path));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    Ok(path)
}

/// A temporary sibling of an output path.
///
/// The staged file is removed on drop unless [`StagedOutput::commit`] moved
/// it into place, so a failed attempt never leaves anything at the target.
#[derive(Debug)]
pub struct StagedOutput {
    target: PathBuf,
    staged: TempPath,
    overwrite: bool,
}

impl StagedOutput {
    /// Check `target` like [`prepare_output`] and reserve a staging file
    /// beside it with the same extension.
    pub async fn new(target: &Path, overwrite: bool) -> MediaResult<Self> {
        let target = prepare_output(target, overwrite).await?;
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suffix = target
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        let staged = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(&suffix)
            .tempfile_in(dir)?
            .into_temp_path();

        Ok(Self {
            target,
            staged,
            overwrite,
        })
    }

    /// Where the encoder writes. The file already exists, so commands must
    /// be allowed to overwrite it.
    pub fn path(&self) -> &Path {
        &self.staged
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Move the staged file to the target.
    ///
    /// Without `overwrite` the rename refuses a target that appeared while
    /// the encoder ran.
    pub fn commit(self) -> MediaResult<PathBuf> {
        let Self {
            target,
            staged,
            overwrite,
        } = self;

        let persisted = if overwrite {
            staged.persist(&target)
        } else {
            staged.persist_noclobber(&target)
        };

        match persisted {
            Ok(()) => Ok(target),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Err(MediaError::OutputExists(target)),
            Err(e) => Err(e.error.into()),
        }
    }
}

/// Commit staged outputs in order, stopping at the first failure.
pub fn commit_all(staged: Vec<StagedOutput>) -> MediaResult<Vec<PathBuf>> {
    staged.into_iter().map(StagedOutput::commit).collect()
}

/// Create a directory (and parents) if it is absent.
pub async fn ensure_dir(dir: &Path) -> MediaResult<PathBuf> {
    let dir = absolute(dir)?;
    fs::create_dir_all(&dir).await?;
    Ok(dir)
}

/// Size of a file in bytes.
pub async fn file_size(path: &Path) -> MediaResult<u64> {
    Ok(fs::metadata(path).await?.len())
}

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Tries a rename first. On EXDEV it copies to a temporary sibling of `dst`
/// and renames that into place, so `dst` never holds a partial file.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Cross-device rename, falling back to copy"
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// EXDEV is 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = dst.with_extension("partial");

    fs::copy(src, &tmp_dst).await?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(e.into());
    }

    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(src = %src.display(), error = %e, "Failed to remove source after copy");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_prepare_output_refuses_existing() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        fs::write(&out, b"old").await.unwrap();

        let err = prepare_output(&out, false).await.unwrap_err();
        assert!(matches!(err, MediaError::OutputExists(_)));

        let prepared = prepare_output(&out, true).await.unwrap();
        assert!(prepared.is_absolute());
    }

    #[tokio::test]
    async fn test_prepare_output_creates_parent() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested").join("deeper").join("out.mp4");

        prepare_output(&out, false).await.unwrap();
        assert!(out.parent().unwrap().is_dir());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_move_file_to_subdirectory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("render.mp4");
        let dst = dir.path().join("final").join("render.mp4");

        fs::write(&src, b"frames").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"frames");
    }

    #[tokio::test]
    async fn test_staged_output_commits_into_place() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("clip.mp4");

        let staged = StagedOutput::new(&out, false).await.unwrap();
        assert_eq!(staged.path().parent(), out.parent());
        assert_eq!(staged.path().extension().unwrap(), "mp4");
        assert!(!out.exists());

        fs::write(staged.path(), b"encoded").await.unwrap();
        let committed = staged.commit().unwrap();

        assert_eq!(committed, out);
        assert_eq!(fs::read(&out).await.unwrap(), b"encoded");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_stage_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("clip.mp4");

        let staged = StagedOutput::new(&out, false).await.unwrap();
        fs::write(staged.path(), b"partial").await.unwrap();
        drop(staged);

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        StagedOutput::new(&out, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_refuses_target_created_meanwhile() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("clip.mp4");

        let staged = StagedOutput::new(&out, false).await.unwrap();
        fs::write(&out, b"someone else").await.unwrap();

        let err = staged.commit().unwrap_err();
        assert!(matches!(err, MediaError::OutputExists(_)));
        assert_eq!(fs::read(&out).await.unwrap(), b"someone else");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_commit_with_overwrite_replaces_target() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("clip.mp4");
        fs::write(&out, b"old").await.unwrap();

        let staged = StagedOutput::new(&out, true).await.unwrap();
        fs::write(staged.path(), b"new").await.unwrap();
        staged.commit().unwrap();

        assert_eq!(fs::read(&out).await.unwrap(), b"new");
    }

    #[test]
    fn test_require_file() {
        let dir = TempDir::new().unwrap();
        assert!(require_file(dir.path()).is_ok());
        assert_eq!(
            require_file(&dir.path().join("missing.mp4")),
            Err(ValidationError::MissingFile(dir.path().join("missing.mp4")))
        );
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
