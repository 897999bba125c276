// export.rs - File naming and saving of compressed results, one by one or
// bundled into a zip archive.

use crate::compression::OutputFormat;
use crate::error::ExportError;
use crate::registry::Registry;
use std::collections::HashSet;
use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Whitespace runs become `_`, anything outside `[a-zA-Z0-9_-.]` is dropped,
/// the rest is lowercased.
pub fn clean_file_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    let mut in_whitespace = false;
    for c in name.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                cleaned.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
            cleaned.push(c.to_ascii_lowercase());
        }
    }
    cleaned
}

/// Name a compressed file after its upload, with the extension of the format
/// it was actually encoded as.
pub fn export_name(original_name: &str, format: OutputFormat) -> String {
    let cleaned = clean_file_name(original_name);
    let stem = match cleaned.rfind('.') {
        Some(dot) if dot + 1 < cleaned.len() => &cleaned[..dot],
        _ => cleaned.trim_end_matches('.'),
    };
    let stem = if stem.is_empty() { "image" } else { stem };
    format!("{}.{}", stem, format.file_extension())
}

/// Archive entries for every stored result, in registry order. Names that
/// collide get a `-1`, `-2`... suffix before the extension.
pub fn archive_entries(registry: &Registry) -> Vec<(String, Arc<[u8]>)> {
    let mut used = HashSet::new();
    let mut entries = Vec::new();

    for item in registry.items() {
        let Some(result) = registry.result_for(item.id) else {
            continue;
        };
        let name = export_name(&item.name, result.format);
        let mut candidate = name.clone();
        let mut n = 1;
        while !used.insert(candidate.clone()) {
            let (stem, ext) = name.rsplit_once('.').unwrap_or((name.as_str(), ""));
            candidate = format!("{}-{}.{}", stem, n, ext);
            n += 1;
        }
        entries.push((candidate, result.data.clone()));
    }

    entries
}

/// Write entries as a zip archive. Images are already compressed, so entries
/// are stored rather than deflated.
pub fn write_archive<W: Write + Seek>(writer: W, entries: &[(String, Arc<[u8]>)]) -> Result<W, ExportError> {
    let mut zip = zip::ZipWriter::new(writer);
    let options =
        zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    for (name, data) in entries {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(data).map_err(zip::result::ZipError::Io)?;
    }

    Ok(zip.finish()?)
}

pub fn save_archive(path: &Path, entries: &[(String, Arc<[u8]>)]) -> Result<(), ExportError> {
    if entries.is_empty() {
        return Err(ExportError::NothingToExport);
    }
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = fs::File::create(path).map_err(io_err)?;
    let mut file = write_archive(file, entries)?;
    file.flush().map_err(io_err)?;

    log::info!("Saved {} images to {}", entries.len(), path.display());
    Ok(())
}

pub fn save_file(path: &Path, data: &[u8]) -> Result<PathBuf, ExportError> {
    fs::write(path, data).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("Saved {}", path.display());
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CompressionResult, UploadItem};
    use std::io::{Cursor, Read};

    #[test]
    fn test_clean_file_name() {
        assert_eq!(clean_file_name("My Holiday  Photo (1).PNG"), "my_holiday_photo_1.png");
        assert_eq!(clean_file_name("tab\tsep-name_ok.jpg"), "tab_sep-name_ok.jpg");
        assert_eq!(clean_file_name("été.jpg"), "t.jpg");
    }

    #[test]
    fn test_export_name_swaps_extension() {
        assert_eq!(export_name("My Photo.png", OutputFormat::Jpeg), "my_photo.jpeg");
        assert_eq!(export_name("archive.tar.gz", OutputFormat::WebP), "archive.tar.webp");
        assert_eq!(export_name("scan", OutputFormat::Png), "scan.png");
        assert_eq!(export_name("trailing.", OutputFormat::Png), "trailing.png");
        assert_eq!(export_name("写真.jpg", OutputFormat::Avif), "image.avif");
    }

    fn registry_with_results(names: &[&str]) -> Registry {
        let mut registry = Registry::new();
        for (i, name) in names.iter().enumerate() {
            let id = registry.add(UploadItem::new(*name, "image/png", vec![0; 10]));
            registry.store_result(CompressionResult {
                item: id,
                data: vec![i as u8; 3].into(),
                format: OutputFormat::Jpeg,
            });
        }
        registry
    }

    #[test]
    fn test_archive_entries_disambiguate_duplicates() {
        let mut registry = registry_with_results(&["a.png", "A.png", "b.png", "a.png"]);
        registry.add(UploadItem::new("pending.png", "image/png", vec![0; 10]));

        let names: Vec<String> = archive_entries(&registry).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a.jpeg", "a-1.jpeg", "b.jpeg", "a-2.jpeg"]);
    }

    #[test]
    fn test_write_archive_round_trips_entries() {
        let registry = registry_with_results(&["one.png", "two.png"]);
        let entries = archive_entries(&registry);

        let cursor = write_archive(Cursor::new(Vec::new()), &entries).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap();

        assert_eq!(archive.len(), 2);
        let mut content = Vec::new();
        archive.by_name("two.jpeg").unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, vec![1u8; 3]);
    }

    #[test]
    fn test_save_archive_refuses_empty() {
        let path = std::env::temp_dir().join("image-compressor-empty.zip");
        assert!(matches!(save_archive(&path, &[]), Err(ExportError::NothingToExport)));
    }

    #[test]
    fn test_save_file_reports_bad_path() {
        let path = std::env::temp_dir()
            .join("image-compressor-missing-dir")
            .join("nested")
            .join("x.jpeg");
        assert!(matches!(save_file(&path, b"x"), Err(ExportError::Io { .. })));
    }
}
