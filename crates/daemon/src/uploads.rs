use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use taskpay_core::{new_id, BlobStore};

/// Writes uploads to `<root>/<owner_id>/<ulid>.<ext>` and hands out
/// `upload://<owner_id>/<ulid>.<ext>` references.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Local path behind a reference this store produced.
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let rest = reference.strip_prefix("upload://")?;
        let (owner, file) = rest.split_once('/')?;
        if [owner, file].iter().any(|p| p.is_empty() || p.contains("..") || p.contains('/')) {
            return None;
        }
        Some(self.root.join(owner).join(file))
    }

    /// Content type and bytes behind a reference, or `None` if nothing is stored there.
    pub async fn read(&self, reference: &str) -> Result<Option<(&'static str, Vec<u8>)>> {
        let Some(path) = self.resolve(reference) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some((content_type_for(&path), bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("jpg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

fn extension_for(content_type: &str) -> &'static str {
    let subtype = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match subtype.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/heic" => "heic",
        _ => "bin",
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, owner_id: &str, content_type: &str, bytes: Vec<u8>) -> Result<String> {
        // Account ids are ULIDs; anything else must not become a path component.
        anyhow::ensure!(
            !owner_id.is_empty() && owner_id.chars().all(|c| c.is_ascii_alphanumeric()),
            "invalid owner id for upload"
        );
        let dir = self.root.join(owner_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create {}", dir.display()))?;
        let file = format!("{}.{}", new_id(), extension_for(content_type));
        let path = dir.join(&file);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(format!("upload://{owner_id}/{file}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_under_owner_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf());
        let reference = store.put("01HX0ACCOUNT", "image/png", vec![1, 2, 3]).await.unwrap();
        assert!(reference.starts_with("upload://01HX0ACCOUNT/"));
        assert!(reference.ends_with(".png"));

        let path = store.resolve(&reference).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn refuses_path_like_owner_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf());
        assert!(store.put("../etc", "image/png", vec![1]).await.is_err());
        assert!(store.resolve("upload://../x.png").is_none());
        assert!(store.resolve("https://example.com/x.png").is_none());
    }

    #[tokio::test]
    async fn reads_back_with_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf());
        let reference = store.put("01HX0ACCOUNT", "image/jpeg", vec![9, 8]).await.unwrap();
        assert_eq!(
            store.read(&reference).await.unwrap(),
            Some(("image/jpeg", vec![9, 8]))
        );
        assert_eq!(store.read("upload://01HX0ACCOUNT/missing.png").await.unwrap(), None);
        assert_eq!(store.read("upload://../etc/passwd").await.unwrap(), None);
    }

    #[test]
    fn picks_extension_from_content_type() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("IMAGE/PNG; charset=binary"), "png");
        assert_eq!(extension_for("image/x-unknown"), "bin");
    }
}
