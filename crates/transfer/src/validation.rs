use std::path::{Component, Path, PathBuf};

use tracing::info;

use crate::{ReceivedFile, TransferError};

/// Gives up looking for a free name after this many suffixes.
const MAX_NAME_SUFFIX: u32 = 10_000;

/// Validates a file name declared by the remote peer.
///
/// Rejects:
/// - Empty or blank names
/// - Path separators (`/`, `\`)
/// - `.` and `..`
/// - Drive prefixes and other `:` forms
/// - NUL bytes
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.trim().is_empty() {
        return Err(TransferError::InvalidFileName("empty name".into()));
    }
    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidFileName(format!(
            "path separators not allowed: {name}"
        )));
    }
    if name.contains([':', '\0']) {
        return Err(TransferError::InvalidFileName(format!(
            "reserved character in name: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidFileName(format!(
            "not a plain file name: {name}"
        ))),
    }
}

/// Writes a received file into `dir` and returns the final path.
///
/// The declared name is validated first. An existing file is never
/// overwritten: `name.ext` becomes `name (1).ext`, `name (2).ext`, ...
/// Content goes to a hidden temporary file that is renamed into place.
pub async fn save_received(dir: &Path, file: &ReceivedFile) -> Result<PathBuf, TransferError> {
    let name = &file.metadata.name;
    validate_file_name(name)?;
    tokio::fs::create_dir_all(dir).await?;

    let target = free_path(dir, name).await?;
    let temp = dir.join(format!(".{name}.part"));
    tokio::fs::write(&temp, &file.data).await?;
    if let Err(e) = tokio::fs::rename(&temp, &target).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }

    info!(path = %target.display(), bytes = file.data.len(), "file saved");
    Ok(target)
}

async fn free_path(dir: &Path, name: &str) -> Result<PathBuf, TransferError> {
    let candidate = dir.join(name);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    for n in 1..=MAX_NAME_SUFFIX {
        let numbered = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(numbered);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(TransferError::InvalidFileName(format!(
        "no free name for {name} in {}",
        dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use peerdrop_protocol::FileMetadata;
    use tempfile::TempDir;

    fn received(name: &str, data: &'static [u8]) -> ReceivedFile {
        ReceivedFile {
            metadata: FileMetadata {
                name: name.into(),
                mime_type: "text/plain".into(),
                size: data.len() as u64,
            },
            data: Bytes::from_static(data),
            sha256: crate::checksum_bytes(data),
        }
    }

    #[test]
    fn rejects_empty_name() {
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("   ").is_err());
    }

    #[test]
    fn rejects_parent_dir() {
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name(".").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_file_name("../../../etc/passwd").is_err());
        assert!(validate_file_name("sub/../escape").is_err());
    }

    #[test]
    fn rejects_absolute_paths() {
        assert!(validate_file_name("/tmp/malicious").is_err());
        assert!(validate_file_name("C:\\Windows\\evil").is_err());
        assert!(validate_file_name("C:evil").is_err());
    }

    #[test]
    fn rejects_subdirectories() {
        assert!(validate_file_name("sub/file.txt").is_err());
    }

    #[test]
    fn accepts_plain_names() {
        assert!(validate_file_name("photo.jpg").is_ok());
        assert!(validate_file_name(".bashrc").is_ok());
        assert!(validate_file_name("my report (final).pdf").is_ok());
        assert!(validate_file_name("..hidden").is_ok());
    }

    #[tokio::test]
    async fn saves_and_numbers_collisions() {
        let dir = TempDir::new().unwrap();
        let first = save_received(dir.path(), &received("a.txt", b"one")).await.unwrap();
        let second = save_received(dir.path(), &received("a.txt", b"two")).await.unwrap();
        let third = save_received(dir.path(), &received("a.txt", b"three")).await.unwrap();

        assert_eq!(first, dir.path().join("a.txt"));
        assert_eq!(second, dir.path().join("a (1).txt"));
        assert_eq!(third, dir.path().join("a (2).txt"));
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&third).unwrap(), b"three");
        assert!(!dir.path().join(".a.txt.part").exists());
    }

    #[tokio::test]
    async fn collision_without_extension() {
        let dir = TempDir::new().unwrap();
        save_received(dir.path(), &received("README", b"x")).await.unwrap();
        let second = save_received(dir.path(), &received("README", b"y")).await.unwrap();
        assert_eq!(second, dir.path().join("README (1)"));
    }

    #[tokio::test]
    async fn refuses_unsafe_name() {
        let dir = TempDir::new().unwrap();
        let result = save_received(dir.path(), &received("../escape.txt", b"x")).await;
        assert!(matches!(result, Err(TransferError::InvalidFileName(_))));
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("downloads");
        let path = save_received(&nested, &received("n.txt", b"z")).await.unwrap();
        assert_eq!(path, nested.join("n.txt"));
    }
}
