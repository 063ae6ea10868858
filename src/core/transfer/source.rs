use bytes::Bytes;
use std::path::Path;

/// A file picked for sending, held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    pub name: String,
    pub mime: String,
    pub data: Bytes,
}

impl FileSource {
    /// Wrap in-memory content, guessing the MIME type from the name.
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let mime = mime_guess::from_path(&name)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();
        Self {
            name,
            mime,
            data: data.into(),
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self::new(name, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_guess() {
        assert_eq!(FileSource::new("notes.txt", "x").mime, "text/plain");
        assert_eq!(
            FileSource::new("mystery", "x").mime,
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let file = FileSource::from_path(&path).await.unwrap();
        assert_eq!(file.name, "photo.png");
        assert_eq!(file.mime, "image/png");
        assert_eq!(file.size(), 3);
    }
}
