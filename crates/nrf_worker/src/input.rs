//! Input retrieval and boundary decoding.

use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use nrf_spatial::{geojson, FeatureSet};

use crate::error::InputError;

pub type Result<T> = std::result::Result<T, InputError>;

#[async_trait]
pub trait InputStore: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>>;
}

/// Keys resolve to files under `root`. Keys that would leave the root are
/// rejected before touching the filesystem.
#[derive(Debug, Clone)]
pub struct LocalInputStore {
    root: PathBuf,
}

impl LocalInputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty() {
            return Err(InputError::NotFound(key.to_string()));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(InputError::PathTraversal(key.to_string()));
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl InputStore for LocalInputStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        debug!(key = %key, path = %path.display(), "reading input");
        tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                InputError::NotFound(key.to_string())
            } else {
                InputError::Io {
                    key: key.to_string(),
                    source,
                }
            }
        })
    }
}

fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

fn is_geojson(name: &str) -> bool {
    matches!(extension(name).as_str(), "geojson" | "json")
}

/// Decode fetched bytes into a raw boundary according to the key's extension.
pub fn decode_boundary(key: &str, bytes: &[u8]) -> Result<FeatureSet> {
    if is_geojson(key) {
        return Ok(geojson::decode(bytes)?);
    }
    match extension(key).as_str() {
        "zip" => {
            let document = single_geojson_entry(key, bytes)?;
            Ok(geojson::decode(&document)?)
        }
        other => Err(InputError::UnsupportedFormat(other.to_string())),
    }
}

fn single_geojson_entry(key: &str, bytes: &[u8]) -> Result<Vec<u8>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| InputError::archive(key, e.to_string()))?;

    let mut candidates = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| InputError::archive(key, e.to_string()))?;
        if !entry.is_dir() && is_geojson(entry.name()) {
            candidates.push(index);
        }
    }

    let index = match candidates.as_slice() {
        [index] => *index,
        [] => return Err(InputError::archive(key, "no .geojson or .json entry")),
        many => {
            return Err(InputError::archive(
                key,
                format!("{} .geojson/.json entries; expected exactly one", many.len()),
            ))
        }
    };

    let mut entry = archive
        .by_index(index)
        .map_err(|e| InputError::archive(key, e.to_string()))?;
    let mut document = Vec::new();
    entry
        .read_to_end(&mut document)
        .map_err(|e| InputError::archive(key, e.to_string()))?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const SQUARE: &str = r#"{
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "EPSG:27700"}},
        "features": [{
            "type": "Feature",
            "properties": {},
            "geometry": {"type": "Polygon", "coordinates": [[[0,0],[100,0],[100,100],[0,100],[0,0]]]}
        }]
    }"#;

    fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn fetches_files_under_the_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("uploads/site.geojson"), SQUARE).unwrap();

        let store = LocalInputStore::new(dir.path());
        let bytes = store.fetch("uploads/site.geojson").await.unwrap();
        assert_eq!(bytes, SQUARE.as_bytes());

        assert!(matches!(
            store.fetch("uploads/missing.geojson").await,
            Err(InputError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_keys_outside_the_root() {
        let dir = TempDir::new().unwrap();
        let store = LocalInputStore::new(dir.path());
        for key in ["../secret.geojson", "/etc/passwd", "a/../../b.json"] {
            assert!(
                matches!(store.fetch(key).await, Err(InputError::PathTraversal(_))),
                "{key}"
            );
        }
    }

    #[test]
    fn decodes_geojson_and_single_entry_zip() {
        let direct = decode_boundary("site.geojson", SQUARE.as_bytes()).unwrap();
        assert_eq!(direct.len(), 1);

        let zipped = zip_of(&[("readme.txt", "hi"), ("site/boundary.json", SQUARE)]);
        let from_zip = decode_boundary("upload.ZIP", &zipped).unwrap();
        assert_eq!(from_zip, direct);
    }

    #[test]
    fn zip_needs_exactly_one_geojson() {
        let none = zip_of(&[("site.shp", "")]);
        assert!(matches!(
            decode_boundary("a.zip", &none),
            Err(InputError::Archive { .. })
        ));

        let two = zip_of(&[("a.geojson", SQUARE), ("b.geojson", SQUARE)]);
        assert!(matches!(
            decode_boundary("a.zip", &two),
            Err(InputError::Archive { .. })
        ));
    }

    #[test]
    fn other_formats_are_unsupported() {
        assert!(matches!(
            decode_boundary("site.shp", b""),
            Err(InputError::UnsupportedFormat(ext)) if ext == "shp"
        ));
        assert!(matches!(
            decode_boundary("site.geojson", b"{not json"),
            Err(InputError::Boundary(_))
        ));
    }
}
