use std::path::PathBuf;

use anyhow::Context;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Remembers the selected salesperson between runs.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load_current_user(&self) -> anyhow::Result<Option<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let user = raw.trim();
                Ok((!user.is_empty()).then(|| user.to_string()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("reading session file {}", self.path.display()))
            }
        }
    }

    /// Replaces the session file through a temp file and rename.
    pub async fn save_current_user(&self, user: &str) -> anyhow::Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating session directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".session.{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp session file {}", temp_path.display()))?;
        file.write_all(user.as_bytes())
            .await
            .with_context(|| format!("writing temp session file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp session file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming session file {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        Ok(())
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("removing session file {}", self.path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn round_trips_through_nested_directory() {
        let dir = tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().join(".dealgate").join("session"));
        assert_eq!(store.load_current_user().await.expect("load"), None);

        store.save_current_user("Jordi").await.expect("save");
        store.save_current_user("Matheus").await.expect("overwrite");
        assert_eq!(
            store.load_current_user().await.expect("load").as_deref(),
            Some("Matheus")
        );

        let leftovers = std::fs::read_dir(dir.path().join(".dealgate"))
            .expect("read dir")
            .count();
        assert_eq!(leftovers, 1, "temp files must not linger");
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().join("session"));
        store.save_current_user("Carlos").await.expect("save");
        store.clear().await.expect("clear");
        store.clear().await.expect("clear again");
        assert_eq!(store.load_current_user().await.expect("load"), None);
    }

    #[tokio::test]
    async fn blank_file_means_no_user() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("session");
        std::fs::write(&path, "  \n").expect("write");
        assert_eq!(SessionStore::new(path).load_current_user().await.expect("load"), None);
    }
}
