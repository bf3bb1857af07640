use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Ensure directory exists
pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {:?}", path))?;
    }
    Ok(())
}

/// Format duration as human-readable string
pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

/// Format number with commas
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let mut result = String::with_capacity(digits.len() + digits.len() / 3);
    for (count, c) in digits.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Files written by a training run
#[derive(Debug, Clone)]
pub struct RunOutputs {
    pub dir: PathBuf,
}

impl RunOutputs {
    /// Create the output directory
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        ensure_dir(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn report(&self) -> PathBuf {
        self.dir.join("report.json")
    }

    pub fn losses(&self) -> PathBuf {
        self.dir.join("losses.json")
    }

    pub fn embeddings(&self) -> PathBuf {
        self.dir.join("embeddings.csv")
    }

    /// Model weights; the recorder adds its own extension and the metadata
    /// sidecar lands next to it as `model.json`
    pub fn checkpoint(&self) -> PathBuf {
        self.dir.join("model")
    }

    pub fn experiment_config(&self) -> PathBuf {
        self.dir.join("experiment.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30.0s");
        assert_eq!(format_duration(90.0), "1.5m");
        assert_eq!(format_duration(3600.0), "1.0h");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_run_outputs_layout() {
        let temp_dir = TempDir::new().unwrap();
        let outputs = RunOutputs::create(temp_dir.path().join("run")).unwrap();
        assert!(outputs.dir.is_dir());
        assert_eq!(outputs.report().file_name().unwrap(), "report.json");
        assert_eq!(outputs.checkpoint().with_extension("json").file_name().unwrap(), "model.json");
    }
}
