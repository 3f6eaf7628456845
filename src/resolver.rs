//! Source file resolution.
//!
//! The debugger reports bare file names; findings and report pages need a
//! readable path. Resolution tries the name as given, then each configured
//! search directory in order, first readable match wins. Both outcomes are
//! cached for the life of the process; a file once marked unresolvable is
//! never retried.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct SourceResolver {
    search_dirs: Vec<PathBuf>,
    cache: BTreeMap<String, Option<PathBuf>>,
}

impl SourceResolver {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            cache: BTreeMap::new(),
        }
    }

    pub fn resolve(&mut self, bare: &str) -> Option<PathBuf> {
        if let Some(cached) = self.cache.get(bare) {
            return cached.clone();
        }
        let resolved = self.lookup(bare);
        if resolved.is_none() {
            tracing::warn!("source file {bare:?} not found in any search directory");
        }
        self.cache.insert(bare.to_string(), resolved.clone());
        resolved
    }

    fn lookup(&self, bare: &str) -> Option<PathBuf> {
        if readable(Path::new(bare)) {
            return Some(PathBuf::from(bare));
        }
        for dir in &self.search_dirs {
            let candidate = dir.join(bare);
            if readable(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

fn readable(path: &Path) -> bool {
    File::open(path).map(|f| f.metadata().map(|m| m.is_file()).unwrap_or(false)).unwrap_or(false)
}
