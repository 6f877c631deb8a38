//! Saved output helper type.
//!
//! Every completed taskset produces several output files. This module
//! provides a type handling the paths of all of them.

use std::{
    collections::BTreeSet,
    env::current_dir,
    fmt::Display,
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use time::{macros::format_description, OffsetDateTime};

use crate::cli::Cli;

const DIR_PREFIX: &str = "rt-replay";

fn make_unique_result_dir_path(root: &Path) -> Result<Option<PathBuf>> {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());

    let date_format = format_description!("[year]-[month]-[day]-[hour][minute][second]");
    let formatted_date = now.format(&date_format)?;

    let p = root.join(format!("{}-{}", DIR_PREFIX, formatted_date));

    if !p.exists() {
        return Ok(Some(p));
    }

    for c in 'a'..='z' {
        let p = root.join(format!("{}-{}-{}", DIR_PREFIX, formatted_date, c));

        if !p.exists() {
            return Ok(Some(p));
        }
    }

    Ok(None)
}

#[derive(Debug, PartialEq, Eq)]
enum OutputFile {
    Taskset(usize),
    Stats(usize),
}

impl Display for OutputFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFile::Taskset(n) => write!(f, "taskset_{}.json", n),
            OutputFile::Stats(n) => write!(f, "taskset_{}.stats.txt", n),
        }
    }
}

impl TryFrom<&Path> for OutputFile {
    type Error = anyhow::Error;

    fn try_from(path: &Path) -> Result<Self> {
        let Some(fname) = path.file_name().and_then(|f| f.to_str()) else {
            bail!("Path does not point to a file");
        };

        let parse_id = |s: &str| -> Result<usize> {
            s.strip_prefix("taskset_")
                .context("Missing taskset prefix")?
                .parse::<usize>()
                .with_context(|| format!("Invalid taskset id in {}", fname))
        };

        if let Some(stem) = fname.strip_suffix(".stats.txt") {
            return Ok(OutputFile::Stats(parse_id(stem)?));
        }

        if let Some(stem) = fname.strip_suffix(".json") {
            return Ok(OutputFile::Taskset(parse_id(stem)?));
        }

        bail!("Invalid file format: {}", fname);
    }
}

/// An output directory.
///
/// This type provides the main I/O interface for the files produced by the
/// replay.
#[derive(Debug, Clone)]
pub struct OutputDirectory {
    path: PathBuf,
}

impl OutputDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Constructs an `OutputDirectory` pointing to a directory in `root`
    /// with a unique name. This method merely constructs the struct and does
    /// not create the directory in itself. One must invoke the `create_dir()`
    /// method before any other operations.
    pub fn with_default_name(root: &Path) -> Result<Self> {
        match make_unique_result_dir_path(root)? {
            Some(p) => Ok(Self::new(p)),
            None => bail!(
                "Could not create a default output directory in {}",
                root.display()
            ),
        }
    }

    fn file_path(&self, f: &OutputFile) -> PathBuf {
        self.path.join(f.to_string())
    }

    fn create_file(path: &Path) -> Result<File> {
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))
    }

    /// Create and open the export file of taskset `id`.
    /// The file is truncated if it already exists.
    pub fn create_taskset_file(&self, id: usize) -> Result<File> {
        Self::create_file(&self.taskset_file_path(id))
    }

    /// Create and open the statistics file of taskset `id`.
    /// The file is truncated if it already exists.
    pub fn create_stats_file(&self, id: usize) -> Result<File> {
        Self::create_file(&self.stats_file_path(id))
    }

    pub fn taskset_file_path(&self, id: usize) -> PathBuf {
        self.file_path(&OutputFile::Taskset(id))
    }

    pub fn stats_file_path(&self, id: usize) -> PathBuf {
        self.file_path(&OutputFile::Stats(id))
    }

    /// Ids of the tasksets for which some output files already exist.
    pub fn taskset_ids(&self) -> Result<BTreeSet<usize>> {
        let pattern = format!("{}/taskset_*", self.path.to_string_lossy());
        let mut ids = BTreeSet::new();

        for path in glob::glob(&pattern)?.flatten() {
            match OutputFile::try_from(path.as_path()) {
                Ok(OutputFile::Taskset(id) | OutputFile::Stats(id)) => {
                    ids.insert(id);
                }
                Err(_) => continue,
            }
        }

        Ok(ids)
    }

    /// Create the directory pointed by `self.path()` if it does not already
    /// exists.
    pub fn create_dir(&self) -> Result<()> {
        if !self.path.exists() {
            std::fs::create_dir_all(&self.path)
                .with_context(|| format!("Failed to create {}", self.path.display()))?;
        }

        Ok(())
    }

    /// Returns a reference to the path of the represented output directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TryFrom<&Cli> for OutputDirectory {
    type Error = anyhow::Error;

    fn try_from(cli: &Cli) -> Result<Self> {
        match &cli.output_dir {
            Some(p) => Ok(OutputDirectory::new(p)),
            None => {
                let cwd = current_dir().context("Failed to read the current directory")?;

                OutputDirectory::with_default_name(&cwd)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{OutputDirectory, OutputFile};

    #[test]
    fn test_output_file_parsing() {
        let example = Path::new("out/taskset_3.json");
        assert_eq!(OutputFile::try_from(example).unwrap(), OutputFile::Taskset(3));

        let example = Path::new("taskset_12.stats.txt");
        assert_eq!(OutputFile::try_from(example).unwrap(), OutputFile::Stats(12));

        assert!(OutputFile::try_from(Path::new("taskset_x.json")).is_err());
        assert!(OutputFile::try_from(Path::new("events.json")).is_err());
        assert!(OutputFile::try_from(Path::new("taskset_1.svg")).is_err());
    }

    #[test]
    fn test_file_names() {
        let dir = OutputDirectory::new("results");

        assert_eq!(
            dir.taskset_file_path(0),
            Path::new("results").join("taskset_0.json")
        );
        assert_eq!(
            dir.stats_file_path(1),
            Path::new("results").join("taskset_1.stats.txt")
        );
    }

    #[test]
    fn test_default_name() {
        let root = std::env::temp_dir();
        let dir = OutputDirectory::with_default_name(&root).unwrap();

        assert!(dir.path().starts_with(&root));
        assert!(!dir.path().exists());
    }

    #[test]
    fn test_taskset_ids() {
        let dir = OutputDirectory::new(std::env::temp_dir().join("rt-replay-io-test-ids"));

        if dir.path().exists() {
            std::fs::remove_dir_all(dir.path()).unwrap();
        }
        dir.create_dir().unwrap();
        dir.create_taskset_file(0).unwrap();
        dir.create_stats_file(0).unwrap();
        dir.create_stats_file(4).unwrap();
        std::fs::write(dir.path().join("taskset_notes.txt"), "").unwrap();

        let ids: Vec<usize> = dir.taskset_ids().unwrap().into_iter().collect();
        assert_eq!(ids, &[0, 4]);

        std::fs::remove_dir_all(dir.path()).unwrap();
    }
}
