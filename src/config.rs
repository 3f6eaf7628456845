//! `gdbsearch.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Directories searched for source files reported by the debugger.
    #[serde(default)]
    pub source_dirs: Vec<PathBuf>,

    /// Idle timeout for an ordinary debugger reply, in milliseconds.
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// Idle timeout for the reply to `run`, in milliseconds. The first stop
    /// at the entry breakpoint can take much longer than later replies.
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
}

fn default_reply_timeout_ms() -> u64 {
    1_000
}

fn default_run_timeout_ms() -> u64 {
    8_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dirs: Vec::new(),
            reply_timeout_ms: default_reply_timeout_ms(),
            run_timeout_ms: default_run_timeout_ms(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gdbsearch-config-{name}-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load_optional(Path::new("/nonexistent/gdbsearch.toml"));
        assert!(cfg.source_dirs.is_empty());
        assert_eq!(cfg.reply_timeout_ms, 1_000);
        assert_eq!(cfg.run_timeout_ms, 8_000);
    }

    #[test]
    fn parses_source_dirs() {
        let dir = temp_dir("parse");
        let path = dir.join("gdbsearch.toml");
        std::fs::write(&path, "source_dirs = [\"/usr/src/demo\", \"lib\"]\n").expect("write");
        let cfg = Config::load_optional(&path);
        assert_eq!(
            cfg.source_dirs,
            vec![PathBuf::from("/usr/src/demo"), PathBuf::from("lib")]
        );
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = temp_dir("bad");
        let path = dir.join("gdbsearch.toml");
        std::fs::write(&path, "source_dirs = 7\n").expect("write");
        let cfg = Config::load_optional(&path);
        assert!(cfg.source_dirs.is_empty());
    }
}
