//! Key-path storage behind `get` / `put`.
//!
//! A key path is a file plus a list of property names (`config.db.host`).
//! Numeric segments index into arrays.  Reading a missing key yields null;
//! writing creates intermediate objects.

use crate::error::{Result, ZenError};
use crate::value::Value;
use log::{debug, info};
use serde_json::{Map, Value as Json};
use std::fs;
use std::path::{Path, PathBuf};

pub trait KeyPathStore {
    fn get(&self, file: &str, path: &[String]) -> Result<Value>;

    fn put(&mut self, file: &str, path: &[String], value: &Value) -> Result<()>;
}

/// Stores documents as pretty-printed JSON files under a base directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    base: PathBuf,
}

impl Default for JsonStore {
    fn default() -> Self {
        Self::new(".")
    }
}

impl JsonStore {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    /// `settings` → `<base>/settings.json`; names with an extension are kept.
    pub fn resolve(&self, file: &str) -> PathBuf {
        let path: PathBuf = self.base.join(file);

        if path.extension().is_none() {
            path.with_extension("json")
        } else {
            path
        }
    }

    fn read_document(&self, file: &str, path: &Path) -> Result<Option<Json>> {
        if !path.exists() {
            return Ok(None);
        }

        let text: String = fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ZenError::store(file, format!("invalid JSON: {}", e)))
    }
}

impl KeyPathStore for JsonStore {
    fn get(&self, file: &str, path: &[String]) -> Result<Value> {
        let location: PathBuf = self.resolve(file);
        debug!("get {} {:?}", location.display(), path);

        let Some(document) = self.read_document(file, &location)? else {
            return Err(ZenError::store(file, "file not found"));
        };

        let mut node: &Json = &document;
        for key in path {
            let next: Option<&Json> = match node {
                Json::Object(map) => map.get(key),
                Json::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };

            match next {
                Some(child) => node = child,
                None => return Ok(Value::Null),
            }
        }

        Ok(Value::from_json(node))
    }

    fn put(&mut self, file: &str, path: &[String], value: &Value) -> Result<()> {
        let location: PathBuf = self.resolve(file);
        info!("put {} {:?} = {}", location.display(), path, value);

        let mut document: Json = self
            .read_document(file, &location)?
            .unwrap_or_else(|| Json::Object(Map::new()));

        if path.is_empty() {
            document = value.to_json();
        } else {
            let mut node: &mut Json = &mut document;

            for key in path {
                let current: &mut Json = node;
                if !current.is_object() && !current.is_array() {
                    *current = Json::Object(Map::new());
                }

                node = match current {
                    Json::Array(items) => {
                        let index: usize = key.parse().map_err(|_| {
                            ZenError::store(file, format!("'{}' is not an array index", key))
                        })?;
                        if index >= items.len() {
                            items.resize(index + 1, Json::Null);
                        }
                        &mut items[index]
                    }
                    Json::Object(map) => map.entry(key.clone()).or_insert(Json::Null),
                    _ => return Err(ZenError::store(file, "path parent is not an object")),
                };
            }

            *node = value.to_json();
        }

        if let Some(dir) = location.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        fs::write(&location, serde_json::to_string_pretty(&document)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_get_a_json_extension() {
        let store = JsonStore::new("data");
        assert_eq!(store.resolve("users"), PathBuf::from("data/users.json"));
        assert_eq!(store.resolve("notes.txt"), PathBuf::from("data/notes.txt"));
    }
}
