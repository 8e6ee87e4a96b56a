//! Loading recordings of an operating condition into a [`SampleStore`].
//!
//! On disk a condition is a directory named after its identifier
//! (`<root>/CWRU_0/`). Every regular `.csv` or `.txt` file below it is one
//! recording; its class is the leading integer of the file name or, failing
//! that, of the parent directory name (`2_outer_race.csv`,
//! `3_ball/rec01.txt`). Values may be separated by newlines, commas,
//! semicolons or whitespace; rows that do not parse (headers) are skipped.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uda_core::{ConditionId, DomainKind, Error, Result, TrainMode};
use walkdir::WalkDir;

use crate::preprocess::SignalPreprocessor;
use crate::store::SampleStore;

/// Source of labeled windows for one operating condition
pub trait DatasetLoader {
    /// Loads every window of `condition`, tagged with `domain`
    fn load(&self, condition: &ConditionId, domain: DomainKind) -> Result<SampleStore>;
}

/// Reads text/CSV recordings from a directory tree
#[derive(Debug, Clone)]
pub struct SignalDirectoryLoader {
    root_dir: PathBuf,
    preprocessor: SignalPreprocessor,
    num_classes: usize,
    channel: usize,
}

impl SignalDirectoryLoader {
    /// Creates a loader rooted at `root_dir`
    pub fn new(
        root_dir: impl Into<PathBuf>,
        preprocessor: SignalPreprocessor,
        num_classes: usize,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            preprocessor,
            num_classes,
            channel: 0,
        }
    }

    /// Selects the column read from multi-column files
    pub fn with_channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    /// Directory holding a condition's recordings
    pub fn condition_dir(&self, condition: &ConditionId) -> PathBuf {
        self.root_dir.join(condition.to_string())
    }

    /// Recording files below a condition directory, in sorted order
    pub fn scan_recordings(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(Error::NotFound(format!(
                "Condition directory not found: {}",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Dataset(format!("Failed to walk {}: {e}", dir.display())))?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let is_signal = path
                .extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    ext == "csv" || ext == "txt"
                })
                .unwrap_or(false);
            if is_signal {
                files.push(path.to_path_buf());
            }
        }
        Ok(files)
    }

    /// Reads one column of a recording
    pub fn read_signal(&self, path: &Path) -> Result<Vec<f32>> {
        let content = fs::read_to_string(path)?;
        let single_column = content.lines().all(|line| !line.contains([',', ';', '\t']));

        let values: Vec<f32> = if single_column {
            content
                .split_whitespace()
                .filter_map(|token| token.parse::<f32>().ok())
                .collect()
        } else {
            content
                .lines()
                .filter_map(|line| {
                    line.split([',', ';', '\t'])
                        .nth(self.channel)
                        .and_then(|field| field.trim().parse::<f32>().ok())
                })
                .collect()
        };

        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::Dataset(format!(
                "Non-finite sample in {}",
                path.display()
            )));
        }
        Ok(values)
    }
}

/// Leading decimal digits of a file or directory name
fn leading_label(name: &str) -> Option<usize> {
    let digits: String = name.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Class label of a recording from its file stem or parent directory
pub fn label_from_path(path: &Path) -> Option<usize> {
    path.file_stem()
        .and_then(|stem| leading_label(&stem.to_string_lossy()))
        .or_else(|| {
            path.parent()
                .and_then(Path::file_name)
                .and_then(|name| leading_label(&name.to_string_lossy()))
        })
}

impl DatasetLoader for SignalDirectoryLoader {
    fn load(&self, condition: &ConditionId, domain: DomainKind) -> Result<SampleStore> {
        let dir = self.condition_dir(condition);
        let mut store = SampleStore::new(domain, self.num_classes);

        for path in self.scan_recordings(&dir)? {
            let Some(label) = label_from_path(&path) else {
                warn!(path = %path.display(), "Skipping recording without class label");
                continue;
            };
            let signal = self.read_signal(&path)?;
            let windows = self.preprocessor.segment(&signal, label, domain);
            if windows.is_empty() {
                warn!(
                    path = %path.display(),
                    samples = signal.len(),
                    "Recording shorter than one window"
                );
                continue;
            }
            debug!(path = %path.display(), label, windows = windows.len(), "Loaded recording");
            for window in windows {
                store.push(window)?;
            }
        }

        if store.is_empty() {
            return Err(Error::Dataset(format!(
                "No windows found for condition {condition} in {}",
                dir.display()
            )));
        }

        info!(
            %condition,
            %domain,
            windows = store.len(),
            class_counts = ?store.class_counts(),
            "Loaded condition"
        );
        Ok(store)
    }
}

/// Builds the labeled source store for a train mode
pub fn load_source_store(
    loader: &dyn DatasetLoader,
    sources: &[ConditionId],
    mode: TrainMode,
) -> Result<SampleStore> {
    match mode {
        TrainMode::SingleSource => {
            let first = sources.first().ok_or_else(|| {
                Error::Configuration("at least one source condition is required".to_string())
            })?;
            loader.load(first, DomainKind::Source)
        }
        TrainMode::SourceCombine => {
            let stores = sources
                .iter()
                .map(|condition| loader.load(condition, DomainKind::Source))
                .collect::<Result<Vec<_>>>()?;
            SampleStore::concat(stores)
        }
        TrainMode::MultiSource => Err(Error::Configuration(
            "multi_source training is not supported by any aligner".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::PreprocessConfig;
    use tempfile::TempDir;
    use uda_core::Normalization;

    fn loader(root: &Path) -> SignalDirectoryLoader {
        let preprocessor = SignalPreprocessor::new(PreprocessConfig {
            signal_size: 4,
            stride: 4,
            normalization: Normalization::None,
            max_windows: None,
        })
        .unwrap();
        SignalDirectoryLoader::new(root, preprocessor, 3)
    }

    fn write_column(path: &Path, n: usize) {
        let body: String = (0..n).map(|i| format!("{i}\n")).collect();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_label_from_path() {
        assert_eq!(label_from_path(Path::new("a/2_outer.csv")), Some(2));
        assert_eq!(label_from_path(Path::new("a/1_inner/rec.txt")), Some(1));
        assert_eq!(label_from_path(Path::new("a/normal/rec.txt")), None);
    }

    #[test]
    fn test_load_condition() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("CWRU_0");
        fs::create_dir_all(dir.join("2_ball")).unwrap();
        write_column(&dir.join("0_normal.csv"), 12);
        write_column(&dir.join("1_inner.txt"), 9);
        write_column(&dir.join("2_ball").join("rec.txt"), 4);
        fs::write(dir.join("readme.md"), "ignored").unwrap();

        let store = loader(temp.path())
            .load(&ConditionId::new("CWRU", 0), DomainKind::Source)
            .unwrap();
        assert_eq!(store.class_counts(), vec![3, 2, 1]);
        assert_eq!(store.window_len(), Some(4));
        assert_eq!(store.domain(), DomainKind::Source);
    }

    #[test]
    fn test_multi_column_with_header() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("0.csv");
        fs::write(&path, "de,fe\n1.0,10.0\n2.0,20.0\n").unwrap();

        let values = loader(temp.path()).with_channel(1).read_signal(&path).unwrap();
        assert_eq!(values, vec![10.0, 20.0]);
    }

    #[test]
    fn test_missing_condition() {
        let temp = TempDir::new().unwrap();
        let result = loader(temp.path()).load(&ConditionId::new("PU", 3), DomainKind::Target);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_label_out_of_range() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("JNU_1");
        fs::create_dir_all(&dir).unwrap();
        write_column(&dir.join("7_fault.csv"), 8);

        let result = loader(temp.path()).load(&ConditionId::new("JNU", 1), DomainKind::Target);
        assert!(matches!(result, Err(Error::Dataset(_))));
    }

    #[test]
    fn test_source_modes() {
        let temp = TempDir::new().unwrap();
        for condition in ["JNU_0", "JNU_1"] {
            let dir = temp.path().join(condition);
            fs::create_dir_all(&dir).unwrap();
            write_column(&dir.join("0.csv"), 8);
        }
        let loader = loader(temp.path());
        let sources = ConditionId::parse_list("JNU_0,JNU_1").unwrap();

        let single = load_source_store(&loader, &sources, TrainMode::SingleSource).unwrap();
        assert_eq!(single.len(), 2);
        let combined = load_source_store(&loader, &sources, TrainMode::SourceCombine).unwrap();
        assert_eq!(combined.len(), 4);
        assert!(matches!(
            load_source_store(&loader, &sources, TrainMode::MultiSource),
            Err(Error::Configuration(_))
        ));
    }
}
