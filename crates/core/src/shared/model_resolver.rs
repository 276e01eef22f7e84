use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("configured model not found: {0}")]
    Missing(PathBuf),
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Resolve the detector model file, downloading it on first use.
///
/// Resolution order:
/// 1. Explicitly configured path (must exist)
/// 2. User cache directory
/// 3. Download from `url` into the cache
pub fn resolve(
    name: &str,
    url: &str,
    configured: Option<&Path>,
) -> Result<PathBuf, ModelResolveError> {
    if let Some(path) = configured {
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(ModelResolveError::Missing(path.to_path_buf()))
        };
    }
    resolve_in(&model_cache_dir()?, name, url)
}

fn resolve_in(cache_dir: &Path, name: &str, url: &str) -> Result<PathBuf, ModelResolveError> {
    let cached_path = cache_dir.join(name);
    if cached_path.exists() {
        return Ok(cached_path);
    }

    fs::create_dir_all(cache_dir).map_err(ModelResolveError::CacheDir)?;
    log::info!("Downloading detector model from {url}");
    download(url, &cached_path)?;
    Ok(cached_path)
}

/// Platform cache directory, e.g. `~/.cache/facewatch/models/` on Linux.
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    dirs::cache_dir()
        .map(|d| d.join("facewatch").join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

fn download(url: &str, dest: &Path) -> Result<(), ModelResolveError> {
    let download_err = |source| ModelResolveError::Download {
        url: url.to_string(),
        source,
    };
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(download_err)?;
    let bytes = response.bytes().map_err(download_err)?;

    // Write to a temp file first, then rename for atomicity
    let temp_path = dest.with_extension("part");
    let write_err = |source| ModelResolveError::Write {
        path: temp_path.clone(),
        source,
    };
    let mut file = fs::File::create(&temp_path).map_err(write_err)?;
    file.write_all(&bytes).map_err(write_err)?;
    file.flush().map_err(write_err)?;
    drop(file);

    fs::rename(&temp_path, dest).map_err(|e| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source: e,
    })?;

    log::info!("Saved {} bytes to {}", bytes.len(), dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_configured_path_wins() {
        let tmp = TempDir::new().unwrap();
        let model = tmp.path().join("custom.bin");
        fs::write(&model, b"model").unwrap();

        let resolved = resolve("ignored.bin", "http://invalid.example.com", Some(&model)).unwrap();
        assert_eq!(resolved, model);
    }

    #[test]
    fn test_configured_path_missing_is_error() {
        let result = resolve(
            "ignored.bin",
            "http://invalid.example.com",
            Some(Path::new("/nonexistent/model.bin")),
        );
        assert!(matches!(result, Err(ModelResolveError::Missing(_))));
    }

    #[test]
    fn test_cached_file_is_returned_without_download() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("model.bin"), b"cached").unwrap();

        let resolved = resolve_in(
            tmp.path(),
            "model.bin",
            "http://invalid.nonexistent.example.com/model.bin",
        )
        .unwrap();
        assert_eq!(fs::read(resolved).unwrap(), b"cached");
    }

    #[test]
    fn test_model_cache_dir_is_namespaced() {
        let path = model_cache_dir().unwrap();
        assert!(path.ends_with("facewatch/models"));
    }

    #[test]
    fn test_failed_download_leaves_no_partial_file() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("model.bin");
        let result = download("http://invalid.nonexistent.example.com/model", &dest);
        assert!(matches!(result, Err(ModelResolveError::Download { .. })));
        assert!(!dest.exists());
        assert!(!dest.with_extension("part").exists());
    }
}
