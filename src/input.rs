// input.rs - Turning picked or dropped paths into uploads

use crate::registry::UploadItem;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions the `image` build can decode. AVIF is write-only here.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];

pub fn is_image_file(path: &Path) -> bool {
    match path.extension() {
        Some(ext) => {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

pub fn media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}

/// Image files at `path`: the file itself, or everything below a directory.
pub fn collect_images(path: &Path) -> Vec<PathBuf> {
    let mut images = Vec::new();

    if path.is_file() && is_image_file(path) {
        images.push(path.to_path_buf());
    } else if path.is_dir() {
        for entry in WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() && is_image_file(path) {
                images.push(path.to_path_buf());
            }
        }
    }

    images
}

pub fn load_upload(path: &Path) -> std::io::Result<UploadItem> {
    let data = fs::read(path)?;
    let name = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    Ok(UploadItem::new(name, media_type(path), data))
}

/// Read every image under `paths`, in order. Unreadable files are skipped.
pub async fn load_uploads(paths: Vec<PathBuf>) -> Vec<UploadItem> {
    tokio::task::spawn_blocking(move || {
        let mut uploads = Vec::new();
        for path in paths.iter().flat_map(|p| collect_images(p)) {
            match load_upload(&path) {
                Ok(upload) => uploads.push(upload),
                Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
            }
        }
        uploads
    })
    .await
    .unwrap_or_else(|e| {
        log::error!("Loading images failed: {}", e);
        Vec::new()
    })
}
