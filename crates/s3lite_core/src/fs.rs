//! Local file helpers for the cached database copy.

use std::io;
use std::path::Path;

/// Reads a whole file.
pub async fn read_file(path: &Path) -> io::Result<Vec<u8>> {
    tokio::fs::read(path).await
}

/// Writes `body` to `path`, creating parent directories first.
///
/// The file is truncated and rewritten in place so that an engine holding
/// it open keeps referring to the same file.
pub async fn save_to_file(path: &Path, body: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn save_creates_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/db.sqlite");

        save_to_file(&path, b"contents").await.unwrap();
        assert_eq!(read_file(&path).await.unwrap(), b"contents");

        save_to_file(&path, b"").await.unwrap();
        assert!(read_file(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reading_missing_file_fails() {
        let dir = tempdir().unwrap();
        let result = read_file(&dir.path().join("absent")).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
