// src/pipeline.rs

use anyhow::{bail, Context, Result};
use glob::glob;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, error, warn};

use crate::table;

/// Knobs for one trimming run. Defaults match the pupil-tracking exports the
/// tool was written for.
#[derive(Debug, Clone)]
pub struct TrimConfig {
    /// Columns the output is projected down to. When aggregating, the first
    /// entry is the group key and the second the averaged value.
    pub columns_to_keep: Vec<String>,
    /// Appended to the source file stem in the output name.
    pub file_suffix: String,
    /// Folder the outputs land in, created under the pipeline's save dir.
    pub output_folder: String,
    /// Group-and-average instead of keeping individual rows.
    pub aggregate: bool,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            columns_to_keep: vec!["world_index".to_string(), "diameter".to_string()],
            file_suffix: "_trimmed".to_string(),
            output_folder: "trimmed_files".to_string(),
            aggregate: false,
        }
    }
}

/// Reads every `*.csv` under a list of directories, drops incomplete rows,
/// projects to the configured columns, and writes the results under renamed
/// files in a single output folder.
///
/// Outputs always land under `save_dir`, never under the scanned
/// directories, so pointing the collector somewhere else does not scatter
/// output files across the tree.
pub struct TrimPipeline {
    save_dir: PathBuf,
    config: TrimConfig,
    /// Base names of files that lacked a required column, rebuilt each run.
    pub skipped_files: HashSet<String>,
    /// Paths that failed to decode as UTF-8, each reported once per run.
    pub decode_error_files: HashSet<PathBuf>,
}

impl TrimPipeline {
    pub fn new(save_dir: impl Into<PathBuf>, config: TrimConfig) -> Self {
        Self {
            save_dir: save_dir.into(),
            config,
            skipped_files: HashSet::new(),
            decode_error_files: HashSet::new(),
        }
    }

    /// Process every `*.csv` directly inside each of `directories`.
    /// Duplicate directory entries are harmless: the same file just gets
    /// re-trimmed to an identical output, and the bookkeeping sets
    /// deduplicate their entries.
    pub fn run(&mut self, directories: &[PathBuf]) -> Result<()> {
        if self.config.columns_to_keep.is_empty() {
            bail!("columns_to_keep must not be empty");
        }
        if self.config.aggregate && self.config.columns_to_keep.len() < 2 {
            bail!("aggregation needs a group column and a value column in columns_to_keep");
        }

        self.skipped_files.clear();
        self.decode_error_files.clear();

        let out_dir = self.save_dir.join(&self.config.output_folder);
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("creating output folder {}", out_dir.display()))?;

        for dir in directories {
            let pattern = format!("{}/*.csv", dir.display());
            let entries = glob(&pattern)
                .with_context(|| format!("bad glob pattern for {}", dir.display()))?;
            for entry in entries {
                match entry {
                    Ok(csv_file) => self.process_file(&csv_file, dir, &out_dir)?,
                    Err(e) => warn!("unreadable glob entry under {}: {}", dir.display(), e),
                }
            }
        }
        Ok(())
    }

    fn process_file(&mut self, csv_file: &Path, dir: &Path, out_dir: &Path) -> Result<()> {
        let file_name = csv_file
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        let bytes = fs::read(csv_file)
            .with_context(|| format!("reading {}", csv_file.display()))?;
        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text,
            Err(_) => {
                // First sighting gets one log line; repeat scans stay quiet.
                if self.decode_error_files.insert(csv_file.to_path_buf()) {
                    error!(file = %file_name, "error reading file, please try a different encoding");
                }
                return Ok(());
            }
        };

        let batch = table::read_csv(text)
            .with_context(|| format!("parsing {}", csv_file.display()))?;

        if !table::has_columns(&batch, &self.config.columns_to_keep) {
            self.skipped_files.insert(file_name);
            return Ok(());
        }

        // Missing values are dropped across the full row before projection,
        // so a null in a discarded column still removes the row.
        let batch = table::drop_missing_rows(&batch)?;
        let batch = table::project(&batch, &self.config.columns_to_keep)?;
        let batch = if self.config.aggregate {
            table::group_by_mean(
                &batch,
                &self.config.columns_to_keep[0],
                &self.config.columns_to_keep[1],
            )?
        } else {
            batch
        };

        let prefix = dir_prefix(dir);
        let stem = csv_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let new_name = format!("{prefix}_{stem}{}.csv", self.config.file_suffix);
        let out_path = out_dir.join(&new_name);

        // Same prefix + stem from two source dirs collide here; last writer
        // wins, silently.
        table::write_csv(&batch, &out_path)?;
        debug!(file = %file_name, out = %out_path.display(), rows = batch.num_rows(), "trimmed");
        Ok(())
    }
}

/// First `_`-delimited, then first `-`-delimited segment of the directory's
/// base name: `sessionA_2024-05` becomes `sessionA`.
fn dir_prefix(dir: &Path) -> &str {
    let base = dir
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    base.split('_')
        .next()
        .unwrap_or_default()
        .split('-')
        .next()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use arrow::array::{Float64Array, Int64Array};
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = dir.join(name);
        let mut f = fs::File::create(&path)?;
        f.write_all(content)?;
        Ok(path)
    }

    #[test]
    fn clean_input_is_projected_with_row_order_kept() -> Result<()> {
        let tmp = tempdir()?;
        let src = tmp.path().join("sessionA_2024-05");
        fs::create_dir(&src)?;
        write_file(
            &src,
            "eye0.csv",
            b"world_index,diameter,confidence\n1,2.5,0.9\n2,3.5,0.8\n",
        )?;

        let mut pipeline = TrimPipeline::new(tmp.path(), TrimConfig::default());
        pipeline.run(&[src])?;

        let out = tmp.path().join("trimmed_files/sessionA_eye0_trimmed.csv");
        let text = fs::read_to_string(&out)?;
        assert_eq!(text, "world_index,diameter\n1,2.5\n2,3.5\n");
        assert!(pipeline.skipped_files.is_empty());
        assert!(pipeline.decode_error_files.is_empty());
        Ok(())
    }

    #[test]
    fn rows_with_missing_values_are_dropped_before_projection() -> Result<()> {
        let tmp = tempdir()?;
        let src = tmp.path().join("run1");
        fs::create_dir(&src)?;
        // Row 2's null lives in confidence, which the projection discards.
        write_file(
            &src,
            "eye0.csv",
            b"world_index,diameter,confidence\n1,2.5,0.9\n2,3.5,\n",
        )?;

        let mut pipeline = TrimPipeline::new(tmp.path(), TrimConfig::default());
        pipeline.run(&[src])?;

        let text = fs::read_to_string(tmp.path().join("trimmed_files/run1_eye0_trimmed.csv"))?;
        assert_eq!(text, "world_index,diameter\n1,2.5\n");
        Ok(())
    }

    #[test]
    fn missing_columns_skip_once_even_when_scanned_twice() -> Result<()> {
        let tmp = tempdir()?;
        let src = tmp.path().join("run1");
        fs::create_dir(&src)?;
        write_file(&src, "gaze.csv", b"timestamp,x,y\n1,0.5,0.5\n")?;

        let mut pipeline = TrimPipeline::new(tmp.path(), TrimConfig::default());
        pipeline.run(&[src.clone(), src])?;

        assert_eq!(pipeline.skipped_files.len(), 1);
        assert!(pipeline.skipped_files.contains("gaze.csv"));
        assert!(!tmp.path().join("trimmed_files/run1_gaze_trimmed.csv").exists());
        Ok(())
    }

    #[test]
    fn decode_failures_are_recorded_once_and_produce_no_output() -> Result<()> {
        let tmp = tempdir()?;
        let src = tmp.path().join("run1");
        fs::create_dir(&src)?;
        let bad = write_file(&src, "eye0.csv", &[0xFF, 0xFE, 0x00, 0xC3, 0x28])?;

        let mut pipeline = TrimPipeline::new(tmp.path(), TrimConfig::default());
        pipeline.run(&[src.clone(), src])?;

        assert_eq!(pipeline.decode_error_files.len(), 1);
        assert!(pipeline.decode_error_files.contains(&bad));
        assert!(pipeline.skipped_files.is_empty());
        assert!(!tmp.path().join("trimmed_files/run1_eye0_trimmed.csv").exists());
        Ok(())
    }

    #[test]
    fn rerun_is_idempotent() -> Result<()> {
        let tmp = tempdir()?;
        let src = tmp.path().join("sessionB");
        fs::create_dir(&src)?;
        write_file(&src, "eye1.csv", b"world_index,diameter\n5,1.25\n6,1.5\n")?;

        let out = tmp.path().join("trimmed_files/sessionB_eye1_trimmed.csv");
        let mut pipeline = TrimPipeline::new(tmp.path(), TrimConfig::default());

        pipeline.run(&[src.clone()])?;
        let first = fs::read(&out)?;
        pipeline.run(&[src])?;
        let second = fs::read(&out)?;

        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn aggregation_means_per_world_index() -> Result<()> {
        let tmp = tempdir()?;
        let src = tmp.path().join("run1");
        fs::create_dir(&src)?;
        write_file(&src, "eye0.csv", b"world_index,diameter\n1,10\n1,20\n2,5\n")?;

        let config = TrimConfig {
            aggregate: true,
            ..TrimConfig::default()
        };
        let mut pipeline = TrimPipeline::new(tmp.path(), config);
        pipeline.run(&[src])?;

        let text = fs::read_to_string(tmp.path().join("trimmed_files/run1_eye0_trimmed.csv"))?;
        let batch = table::read_csv(&text)?;
        assert_eq!(batch.num_rows(), 2);
        let keys = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        let means = batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!((keys.value(0), means.value(0)), (1, 15.0));
        assert_eq!((keys.value(1), means.value(1)), (2, 5.0));
        Ok(())
    }

    #[test]
    fn aggregate_with_a_single_kept_column_is_rejected() {
        let tmp = tempdir().unwrap();
        let config = TrimConfig {
            columns_to_keep: vec!["world_index".to_string()],
            aggregate: true,
            ..TrimConfig::default()
        };
        let mut pipeline = TrimPipeline::new(tmp.path(), config);
        assert!(pipeline.run(&[]).is_err());
    }

    #[test]
    fn prefix_splits_on_underscore_then_dash() {
        assert_eq!(dir_prefix(Path::new("/data/sessionA_2024-05")), "sessionA");
        assert_eq!(dir_prefix(Path::new("/data/2024-05_sessionA")), "2024");
        assert_eq!(dir_prefix(Path::new("/data/plain")), "plain");
    }

    #[test]
    fn custom_suffix_and_output_folder() -> Result<()> {
        let tmp = tempdir()?;
        let src = tmp.path().join("run1");
        fs::create_dir(&src)?;
        write_file(&src, "eye0.csv", b"world_index,diameter\n1,2.5\n")?;

        let config = TrimConfig {
            file_suffix: "_clean".to_string(),
            output_folder: "clean_files".to_string(),
            ..TrimConfig::default()
        };
        let mut pipeline = TrimPipeline::new(tmp.path(), config);
        pipeline.run(&[src])?;

        assert!(tmp.path().join("clean_files/run1_eye0_clean.csv").exists());
        Ok(())
    }
}
