use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Tunables for a run. Loaded from an optional YAML defaults file, then
/// overridden field by field from the command line.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Hardware block size: the granularity at which bad areas are
    /// isolated and retried.
    pub hardbs: i64,
    /// Preferred read size for the first pass; a multiple of `hardbs`.
    pub softbs: i64,
    /// Capacity hint for the sblock vector.
    pub cluster: usize,
    /// Minimum skip across presumed-bad territory; 0 derives
    /// `max(65536, hardbs)`.
    pub skipbs: i64,
    /// Stop starting new passes once more than this many error areas
    /// exist; negative means unlimited.
    pub max_errors: i64,
    /// Retry passes over bad sectors: 0 skips them, negative retries
    /// forever.
    pub max_retries: i64,
    /// Never grow the map past what an existing mapfile describes.
    pub complete_only: bool,
    /// Skip the splitting pass.
    pub nosplit: bool,
    /// Demote non-split and bad-sector areas back to non-trimmed before
    /// the run.
    pub retrim: bool,
    /// Demote non-split and non-trimmed areas back to non-tried before
    /// the run.
    pub try_again: bool,
    /// Elide writes of all-zero blocks and extend the output at the end.
    pub sparse: bool,
    /// fsync the output after every write.
    pub synchronous: bool,
    /// Grow the output to at least this many bytes at the end of the
    /// run; negative disables.
    pub min_outfile_size: i64,
    /// Seconds between progress lines.
    pub progress_secs: u64,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            hardbs: 512,
            softbs: 65536,
            cluster: 128,
            skipbs: 0,
            max_errors: -1,
            max_retries: 0,
            complete_only: false,
            nosplit: false,
            retrim: false,
            try_again: false,
            sparse: false,
            synchronous: false,
            min_outfile_size: -1,
            progress_secs: 5,
        }
    }
}

impl Settings {
    pub fn effective_skipbs(&self) -> i64 {
        if self.skipbs > 0 {
            self.skipbs.max(self.hardbs)
        } else {
            self.hardbs.max(65536)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hardbs <= 0 {
            bail!("hardbs must be positive");
        }
        if self.softbs < self.hardbs {
            bail!("softbs must be at least hardbs");
        }
        if self.softbs % self.hardbs != 0 {
            bail!("softbs must be a multiple of hardbs");
        }
        if self.cluster == 0 {
            bail!("cluster must be positive");
        }
        Ok(())
    }
}

pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(p) => {
            let bytes = std::fs::read(p)
                .with_context(|| format!("reading settings file {}", p.display()))?;
            let settings: Settings = serde_yaml::from_slice(&bytes)
                .with_context(|| format!("parsing settings file {}", p.display()))?;
            Ok(settings)
        }
        None => Ok(Settings::default()),
    }
}
