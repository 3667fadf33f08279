//! Module source loading for `import`.
//!
//! The evaluator owns caching and symbol binding; a loader only turns an
//! import path into source text.

use crate::error::{Result, ZenError};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// File extensions tried, in order, when an import path has none.
pub const SOURCE_EXTENSIONS: [&str; 2] = ["zen", "zn"];

pub trait ModuleLoader {
    /// Return the source text for `path`.
    fn load(&self, path: &str) -> Result<String>;
}

/// Resolves import paths relative to a base directory.
#[derive(Debug, Clone)]
pub struct FsModuleLoader {
    base: PathBuf,
}

impl Default for FsModuleLoader {
    fn default() -> Self {
        Self::new(".")
    }
}

impl FsModuleLoader {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    fn candidates(&self, path: &str) -> Vec<PathBuf> {
        let direct: PathBuf = self.base.join(path);
        let mut candidates: Vec<PathBuf> = vec![direct.clone()];

        if direct.extension().is_none() {
            for ext in SOURCE_EXTENSIONS {
                candidates.push(direct.with_extension(ext));
            }
        }

        candidates
    }
}

impl ModuleLoader for FsModuleLoader {
    fn load(&self, path: &str) -> Result<String> {
        for candidate in self.candidates(path) {
            if candidate.is_file() {
                debug!("Loading module '{}' from {}", path, candidate.display());
                let bytes: Vec<u8> = fs::read(&candidate)?;
                return Ok(String::from_utf8(bytes)?);
            }
        }

        Err(ZenError::module(
            path,
            format!("not found under {}", display_base(&self.base)),
        ))
    }
}

fn display_base(base: &Path) -> String {
    base.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_candidates_follow_the_bare_path() {
        let loader = FsModuleLoader::new("lib");
        let names: Vec<PathBuf> = loader.candidates("math");

        assert_eq!(
            names,
            vec![
                PathBuf::from("lib/math"),
                PathBuf::from("lib/math.zen"),
                PathBuf::from("lib/math.zn"),
            ]
        );
    }

    #[test]
    fn non_utf8_source_is_reported() {
        let dir: PathBuf = std::env::temp_dir().join(format!("zen-utf8-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("broken.zen"), [0x70, 0xff, 0xfe, 0x0a]).unwrap();

        let result = FsModuleLoader::new(dir.clone()).load("broken");
        let _ = fs::remove_dir_all(&dir);

        assert!(matches!(result, Err(ZenError::Utf8(_))));
    }

    #[test]
    fn missing_module_is_a_module_error() {
        let loader = FsModuleLoader::new("/nonexistent-zen-dir");
        assert!(matches!(
            loader.load("nothing"),
            Err(ZenError::Module { .. })
        ));
    }
}
