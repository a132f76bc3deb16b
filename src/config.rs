//! Run-time decomposition parameters.

use crate::halo_error::HaloError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the process grid is laid out and where per-process logs go.
///
/// Missing fields take their [`Default`] values when deserialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    /// Processes along each axis; the product must equal the launch size.
    pub extent: [usize; 3],
    pub periodic: [bool; 3],
    /// Merge the per-process logs into the real stdout/stderr at finalize.
    pub concatenate_on_exit: bool,
    /// Directory for the per-process log files. `None` uses the program
    /// path itself as prefix.
    pub log_dir: Option<PathBuf>,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            extent: [1, 1, 1],
            periodic: [false; 3],
            concatenate_on_exit: true,
            log_dir: None,
        }
    }
}

impl DecompositionConfig {
    pub fn new(extent: [usize; 3], periodic: [bool; 3]) -> Self {
        Self {
            extent,
            periodic,
            ..Self::default()
        }
    }

    pub fn with_concatenate(mut self, on_exit: bool) -> Self {
        self.concatenate_on_exit = on_exit;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Number of processes this decomposition needs.
    pub fn expected_process_count(&self) -> usize {
        self.extent.iter().product()
    }

    pub fn from_json_str(s: &str) -> Result<Self, HaloError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, HaloError> {
        let text = std::fs::read_to_string(path).map_err(|e| HaloError::sink(path, e))?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{ "extent": [4, 4, 1], "periodic": [true, false, false] }"#;
        let cfg = DecompositionConfig::from_json_str(json).unwrap();
        assert_eq!(cfg.extent, [4, 4, 1]);
        assert_eq!(cfg.periodic, [true, false, false]);
        assert!(cfg.concatenate_on_exit);
        assert_eq!(cfg.log_dir, None);
        assert_eq!(cfg.expected_process_count(), 16);
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = DecompositionConfig::from_json_str(r#"{ "extent": [4, 4] }"#).unwrap_err();
        assert!(matches!(err, HaloError::Config(_)));
    }

    #[test]
    fn builders_compose() {
        let cfg = DecompositionConfig::new([2, 1, 1], [true; 3])
            .with_concatenate(false)
            .with_log_dir("/tmp/run");
        assert!(!cfg.concatenate_on_exit);
        assert_eq!(cfg.log_dir.as_deref(), Some(Path::new("/tmp/run")));
    }
}
