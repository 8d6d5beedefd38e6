//! Filesystem helpers for artifacts: concat lists and final promotion.

use nix::errno::Errno;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Write a concat demuxer list referencing `entries` in order.
pub async fn write_concat_list(list_path: &Path, entries: &[PathBuf]) -> MediaResult<()> {
    if entries.is_empty() {
        return Err(MediaError::internal("concat list needs at least one entry"));
    }
    let body: String = entries
        .iter()
        .map(|p| format!("file '{}'\n", escape_concat_path(p)))
        .collect();
    fs::write(list_path, body).await?;
    Ok(())
}

/// Escape a path for a single-quoted concat list entry.
fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "'\\''")
}

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Tries a rename first and falls back to copy-then-delete on EXDEV. The copy
/// lands in a temporary sibling of `dst` and is renamed into place, so `dst`
/// never holds a partial file.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                "Cross-device rename, falling back to copy: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(Errno::EXDEV as i32)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = partial_path(dst);

    if let Err(e) = fs::copy(src, &tmp_dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(e.into());
    }

    if let Err(e) = fs::remove_file(src).await {
        warn!("Failed to remove {} after cross-device move: {}", src.display(), e);
    }
    Ok(())
}

/// `out.mp4` -> `out.mp4.partial`
fn partial_path(dst: &Path) -> PathBuf {
    let mut name = dst.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_to_subdirectory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("final.mp4");
        let dst = dir.path().join("renders").join("out.mp4");

        fs::write(&src, b"frames").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"frames");
    }

    #[tokio::test]
    async fn test_move_file_overwrites_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("new.mp4");
        let dst = dir.path().join("out.mp4");
        fs::write(&src, b"new").await.unwrap();
        fs::write(&dst, b"old").await.unwrap();

        move_file(&src, &dst).await.unwrap();
        assert_eq!(fs::read(&dst).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_cross_device_fallback_copies() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.mp4");
        let dst = dir.path().join("b.mp4");
        fs::write(&src, b"data").await.unwrap();

        copy_and_delete(&src, &dst).await.unwrap();
        assert!(!src.exists());
        assert!(!partial_path(&dst).exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"data");
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(
            Errno::EXDEV as i32
        )));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(
            Errno::ENOENT as i32
        )));
    }

    #[tokio::test]
    async fn test_concat_list_escapes_quotes() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("list.txt");
        let entries = vec![PathBuf::from("/tmp/a.mp4"), PathBuf::from("/tmp/it's.mp4")];

        write_concat_list(&list, &entries).await.unwrap();
        let body = fs::read_to_string(&list).await.unwrap();
        assert_eq!(body, "file '/tmp/a.mp4'\nfile '/tmp/it'\\''s.mp4'\n");

        assert!(write_concat_list(&list, &[]).await.is_err());
    }
}
