use std::io;
use std::path::{Component, Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;

/// The shared placeholder every profile starts with. It lives outside
/// `profiles/` and is never normalized or removed.
pub const DEFAULT_IMAGE_PATH: &str = "img/def.png";

const PROFILE_DIR: &str = "profiles";
const FILE_ID_LEN: usize = 22;

/// Local blob storage rooted at the media directory. Paths handed in and out
/// are relative to the root, e.g. `profiles/alice/Q2x...k9.png`.
#[derive(Clone, Debug)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage name for a new profile upload. Only the lower-cased extension of
    /// the client's filename survives.
    pub fn upload_path(&self, username: &str, original_filename: &str) -> Option<String> {
        if !is_safe_segment(username) {
            return None;
        }
        let suffix = Path::new(original_filename)
            .extension()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|s| s.to_ascii_lowercase());
        let file_id = generate_file_id();
        let file_name = match suffix {
            Some(suffix) => format!("{}.{}", file_id, suffix),
            None => file_id,
        };
        Some(format!("{}/{}/{}", PROFILE_DIR, username, file_name))
    }

    /// Maps a stored relative name onto the filesystem, refusing anything that
    /// could step outside the root.
    pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let rel = Path::new(relative);
        if relative.is_empty() || rel.is_absolute() {
            return None;
        }
        if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(rel))
    }

    pub fn profile_dir(&self, username: &str) -> Option<PathBuf> {
        if !is_safe_segment(username) {
            return None;
        }
        Some(self.root.join(PROFILE_DIR).join(username))
    }

    pub async fn write(&self, relative: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let target = self.resolve(relative).ok_or_else(|| invalid_path(relative))?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(target)
    }

    pub async fn read(&self, relative: &str) -> io::Result<Vec<u8>> {
        let target = self.resolve(relative).ok_or_else(|| invalid_path(relative))?;
        tokio::fs::read(target).await
    }

    /// Removes a single stored file. `Ok(false)` when it was not there.
    pub async fn remove(&self, relative: &str) -> io::Result<bool> {
        let target = self.resolve(relative).ok_or_else(|| invalid_path(relative))?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Removes `profiles/<username>/`. `Ok(false)` when there was nothing to remove.
    pub async fn remove_profile_dir(&self, username: &str) -> io::Result<bool> {
        let dir = self.profile_dir(username).ok_or_else(|| invalid_path(username))?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn generate_file_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(FILE_ID_LEN)
        .map(char::from)
        .collect()
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(|c: char| c == '/' || c == '\\')
}

fn invalid_path(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("invalid media path: {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn upload_path_keeps_only_lowercased_extension() {
        let media = MediaStorage::new("/srv/media");
        let path = media.upload_path("bob", "../../etc/Holiday Photo.PNG").unwrap();

        let rest = path.strip_prefix("profiles/bob/").unwrap();
        let (id, ext) = rest.split_once('.').unwrap();
        assert_eq!(ext, "png");
        assert_eq!(id.len(), FILE_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(!path.contains("Holiday"));

        let bare = media.upload_path("bob", "noext").unwrap();
        assert!(!bare.contains('.'));
        assert_ne!(media.upload_path("bob", "a.jpg"), media.upload_path("bob", "a.jpg"));
    }

    #[test]
    fn hostile_names_are_rejected() {
        let media = MediaStorage::new("/srv/media");
        assert!(media.upload_path("..", "a.png").is_none());
        assert!(media.profile_dir(".").is_none());
        assert!(media.resolve("profiles/../../etc/passwd").is_none());
        assert!(media.resolve("/etc/passwd").is_none());
        assert_eq!(
            media.resolve("img/def.png"),
            Some(PathBuf::from("/srv/media/img/def.png"))
        );
    }

    #[actix_rt::test]
    async fn write_read_and_remove_profile_dir() {
        let dir = TempDir::new("mentorhub_media").unwrap();
        let media = MediaStorage::new(dir.path());

        media.write("profiles/alice/a.jpg", b"jpeg").await.unwrap();
        assert_eq!(media.read("profiles/alice/a.jpg").await.unwrap(), b"jpeg");

        media.write("profiles/alice/b.jpg", b"jpeg").await.unwrap();
        assert!(media.remove("profiles/alice/b.jpg").await.unwrap());
        assert!(!media.remove("profiles/alice/b.jpg").await.unwrap());
        assert!(media.remove("../outside.jpg").await.is_err());

        assert!(media.remove_profile_dir("alice").await.unwrap());
        assert!(!dir.path().join("profiles/alice").exists());
        assert!(!media.remove_profile_dir("alice").await.unwrap());
    }
}
