//! Millisecond modification times on local files.

use filetime::FileTime;
use std::fs::Metadata;
use std::io;
use std::path::Path;

pub fn modified_millis(meta: &Metadata) -> i64 {
    let ft = FileTime::from_last_modification_time(meta);
    ft.unix_seconds() * 1000 + i64::from(ft.nanoseconds() / 1_000_000)
}

/// Modification time of `path` in milliseconds since the epoch.
pub async fn local_mtime(path: &Path) -> io::Result<i64> {
    let meta = tokio::fs::metadata(path).await?;
    Ok(modified_millis(&meta))
}

pub fn set_mtime(path: &Path, millis: i64) -> io::Result<()> {
    let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
    filetime::set_file_mtime(path, FileTime::from_unix_time(millis.div_euclid(1000), nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_set_and_read_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vhdl");
        std::fs::write(&path, "x").unwrap();

        set_mtime(&path, 1_700_000_000_123).unwrap();
        assert_eq!(local_mtime(&path).await.unwrap(), 1_700_000_000_123);
    }
}
