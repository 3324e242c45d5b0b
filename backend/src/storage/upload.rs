use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One uploaded image as received from the form.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Image exceeds the {limit} byte upload limit")]
    TooLarge { limit: usize },
    #[error("Failed to write transient upload {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Request-scoped copy of an upload on disk. The file is removed when the
/// guard is dropped, whichever way the pipeline exits.
#[derive(Debug)]
pub struct TransientUpload {
    path: PathBuf,
}

impl TransientUpload {
    pub fn persist(dir: &Path, image: &UploadedImage) -> Result<Self, UploadError> {
        let extension = file_extension(image.content_type.as_deref(), &image.file_name);
        let path = dir.join(format!("leaf-{}.{}", Uuid::new_v4(), extension));

        // Guard before writing: a partial file is removed too.
        let guard = Self { path };
        write_new(&guard.path, &image.bytes).map_err(|source| UploadError::Write {
            path: guard.path.clone(),
            source,
        })?;
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientUpload {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed transient upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::error!(
                "Failed to remove transient upload {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

pub fn fingerprint(image_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data);
    hex::encode(hasher.finalize())
}

pub fn validate_image_size(image_data: &[u8], limit: usize) -> Result<(), UploadError> {
    if image_data.len() > limit {
        return Err(UploadError::TooLarge { limit });
    }
    Ok(())
}

/// Declared content type first, then the filename's extension.
pub fn file_extension(content_type: Option<&str>, file_name: &str) -> &'static str {
    let from_mime = match content_type {
        Some("image/jpeg") => Some("jpg"),
        Some("image/png") => Some("png"),
        Some("image/webp") => Some("webp"),
        Some("image/gif") => Some("gif"),
        Some("image/bmp") => Some("bmp"),
        _ => None,
    };
    if let Some(extension) = from_mime {
        return extension;
    }

    let declared = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match declared.as_deref() {
        Some("jpg") | Some("jpeg") => "jpg",
        Some("png") => "png",
        Some("webp") => "webp",
        Some("gif") => "gif",
        Some("bmp") => "bmp",
        _ => "img",
    }
}
