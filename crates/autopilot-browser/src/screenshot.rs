//! Screenshot files for the operator's review

use autopilot_core::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes PNG screenshots into one directory
#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    dir: PathBuf,
}

impl ScreenshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `png` as `<timestamp>-<label>.png`
    pub async fn save(&self, label: &str, png: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let file_name = format!(
            "{}-{}.png",
            Utc::now().format("%Y%m%d-%H%M%S%3f"),
            sanitize_label(label)
        );
        let path = self.dir.join(file_name);
        tokio::fs::write(&path, png).await?;

        info!("Screenshot stored: {} ({} bytes)", path.display(), png.len());
        Ok(path)
    }
}

/// Lowercase, with anything but letters and digits collapsed to `-`
fn sanitize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "screenshot".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("Return A preview"), "return-a-preview");
        assert_eq!(sanitize_label("  //  "), "screenshot");
        assert_eq!(sanitize_label("GSTR-3B: March"), "gstr-3b-march");
    }

    #[tokio::test]
    async fn test_save_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenshotStore::new(dir.path().join("shots"));

        let path = store.save("payment", b"\x89PNG").await.unwrap();

        assert!(path.starts_with(dir.path().join("shots")));
        assert!(path.to_string_lossy().ends_with("-payment.png"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"\x89PNG");
    }
}
