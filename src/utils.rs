use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use url::Url;

pub fn get_filename_from_url(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str).map_err(|e| Error::config("url", format!("{}: {}", url_str, e)))?;

    if let Some(segments) = url.path_segments() {
        if let Some(filename) = segments.last() {
            if !filename.is_empty() {
                return Ok(filename.to_string());
            }
        }
    }

    // Fallback if no filename found in path
    Ok(format!("download_{}", uuid::Uuid::new_v4()))
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

/// Name of the debris directory for `dest`: its sanitized stem, without
/// leading spaces or trailing dots and spaces.
pub fn debris_dir_name(dest: &Path) -> String {
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = sanitize_filename(stem.trim_start_matches(' ').trim_end_matches(['.', ' ']));
    if name.is_empty() {
        "download".to_string()
    } else {
        name
    }
}

pub fn get_unique_filepath(dir: &Path, filename: &str) -> PathBuf {
    let mut path = dir.join(filename);
    let original = Path::new(filename);
    let file_stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = original
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut counter = 1;

    while path.exists() {
        let new_filename = if extension.is_empty() {
            format!("{}_{}", file_stem, counter)
        } else {
            format!("{}_{}.{}", file_stem, counter, extension)
        };

        path = dir.join(new_filename);
        counter += 1;
    }
    path
}
