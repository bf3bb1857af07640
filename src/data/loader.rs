use crate::data::{
    DataConfig, DatasetProvider, ExpressionMatrix, FittedPreprocessor, Metadata, Preprocessor,
    TCGA_PATIENT_PREFIX,
};
use crate::error::{Error, Result};
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Csv,
    Tsv,
    GzippedCsv,
    GzippedTsv,
}

impl FileFormat {
    /// Detect file format from path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str());
        let stem = path.file_stem().and_then(|s| s.to_str());

        match (ext, stem) {
            (Some("gz"), Some(stem)) => {
                if stem.ends_with(".csv") {
                    Ok(FileFormat::GzippedCsv)
                } else if stem.ends_with(".tsv") || stem.ends_with(".txt") {
                    Ok(FileFormat::GzippedTsv)
                } else {
                    Err(Error::Parse(format!(
                        "cannot determine format of gzipped file {:?}",
                        path
                    )))
                }
            }
            (Some("csv"), _) => Ok(FileFormat::Csv),
            (Some("tsv"), _) | (Some("txt"), _) => Ok(FileFormat::Tsv),
            _ => Err(Error::Parse(format!("unsupported file format {:?}", path))),
        }
    }

    /// Get delimiter character
    pub fn delimiter(&self) -> u8 {
        match self {
            FileFormat::Csv | FileFormat::GzippedCsv => b',',
            FileFormat::Tsv | FileFormat::GzippedTsv => b'\t',
        }
    }

    /// Check if format is gzipped
    pub fn is_gzipped(&self) -> bool {
        matches!(self, FileFormat::GzippedCsv | FileFormat::GzippedTsv)
    }
}

/// Data loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum number of samples to load (0 = unlimited)
    pub max_records: usize,
    /// Cell values read as missing
    pub missing_tokens: Vec<String>,
    /// Log progress every this many rows
    pub log_every: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_records: 0,
            missing_tokens: vec!["".into(), "NA".into(), "NaN".into(), "None".into()],
            log_every: 1000,
        }
    }
}

impl LoaderConfig {
    fn is_missing(&self, cell: &str) -> bool {
        self.missing_tokens.iter().any(|t| t.eq_ignore_ascii_case(cell))
    }
}

/// Open a plain or gzipped file behind one reader type
fn open<P: AsRef<Path>>(path: P, format: FileFormat) -> Result<Box<dyn Read>> {
    let file = File::open(path.as_ref())?;
    if format.is_gzipped() {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Parse a samples-by-genes table. The first column holds sample ids and
/// the header names the genes.
pub fn parse_expression<R: Read>(
    reader: R,
    format: FileFormat,
    config: &LoaderConfig,
) -> Result<(ExpressionMatrix, Vec<String>)> {
    let mut csv_reader = ReaderBuilder::new()
        .delimiter(format.delimiter())
        .has_headers(true)
        .flexible(false)
        .from_reader(reader);

    let feature_names: Vec<String> = csv_reader
        .headers()?
        .iter()
        .skip(1)
        .map(|s| s.trim().to_string())
        .collect();
    debug!("Expression header has {} genes", feature_names.len());

    let mut sample_ids = Vec::new();
    let mut values = Vec::new();
    let mut missing = 0usize;

    for (line, result) in csv_reader.records().enumerate() {
        let record = result?;
        let mut fields = record.iter();
        let sample = fields
            .next()
            .ok_or_else(|| Error::Parse(format!("empty row at line {}", line + 2)))?;

        let row = fields
            .map(|cell| {
                let cell = cell.trim();
                if config.is_missing(cell) {
                    missing += 1;
                    return Ok(f32::NAN);
                }
                cell.parse::<f32>().map_err(|_| {
                    Error::Parse(format!(
                        "non-numeric value `{}` for sample {} at line {}",
                        cell,
                        sample,
                        line + 2
                    ))
                })
            })
            .collect::<Result<Vec<f32>>>()?;

        sample_ids.push(sample.trim().to_string());
        values.push(row);

        if config.log_every > 0 && values.len() % config.log_every == 0 {
            debug!("Loaded {} samples...", values.len());
        }
        if config.max_records > 0 && values.len() >= config.max_records {
            warn!("Reached maximum record limit: {}", config.max_records);
            break;
        }
    }

    if missing > 0 {
        debug!("{} missing expression values", missing);
    }

    Ok((ExpressionMatrix::new(sample_ids, values)?, feature_names))
}

/// Parse a patient/subtype table into `id -> subtype`.
///
/// The id column is the first one named `patient`, `sample` or
/// `bcr_patient_barcode` (else column 0); the subtype column is the first
/// whose name contains `subtype` (else column 1).
pub fn parse_subtypes<R: Read>(
    reader: R,
    format: FileFormat,
    config: &LoaderConfig,
) -> Result<HashMap<String, String>> {
    let mut csv_reader = ReaderBuilder::new()
        .delimiter(format.delimiter())
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let id_col = headers
        .iter()
        .position(|h| matches!(h.as_str(), "patient" | "sample" | "bcr_patient_barcode"))
        .unwrap_or(0);
    let subtype_col = headers
        .iter()
        .position(|h| h.contains("subtype"))
        .unwrap_or(1);

    let mut table = HashMap::new();
    for result in csv_reader.records() {
        let record = result?;
        let (Some(id), Some(subtype)) = (record.get(id_col), record.get(subtype_col)) else {
            continue;
        };
        let (id, subtype) = (id.trim(), subtype.trim());
        if id.is_empty() || config.is_missing(subtype) {
            continue;
        }
        table.insert(id.to_string(), subtype.to_string());
    }

    Ok(table)
}

/// Look every sample up by its exact id, then by its TCGA patient prefix
pub fn match_subtypes(
    sample_ids: &[String],
    table: &HashMap<String, String>,
) -> Vec<Option<String>> {
    let by_patient: HashMap<&str, &String> = table
        .iter()
        .filter_map(|(id, subtype)| patient_prefix(id).map(|p| (p, subtype)))
        .collect();

    sample_ids
        .iter()
        .map(|id| {
            table
                .get(id)
                .or_else(|| patient_prefix(id).and_then(|p| by_patient.get(p).copied()))
                .cloned()
        })
        .collect()
}

fn patient_prefix(id: &str) -> Option<&str> {
    id.get(..TCGA_PATIENT_PREFIX)
}

/// Expression matrix plus optional subtype table on disk
#[derive(Debug, Clone)]
pub struct TabularDataset {
    pub expression_path: PathBuf,
    pub subtypes_path: Option<PathBuf>,
    pub loader: LoaderConfig,
    pub preprocessor: Preprocessor,
}

impl TabularDataset {
    pub fn from_config(config: &DataConfig) -> Result<Self> {
        Ok(Self {
            expression_path: config.expression_file()?,
            subtypes_path: config.subtypes_file(),
            loader: config.loader.clone(),
            preprocessor: config.preprocessor(),
        })
    }

    /// Read the raw matrix without preprocessing
    pub fn read_expression(&self) -> Result<(ExpressionMatrix, Vec<String>)> {
        info!("Loading expression matrix from {:?}", self.expression_path);
        let format = FileFormat::from_path(&self.expression_path)?;
        let reader = open(&self.expression_path, format)?;
        parse_expression(reader, format, &self.loader)
    }

    /// Subtype per sample, all `None` without a subtype table
    pub fn read_subtypes(&self, sample_ids: &[String]) -> Result<Vec<Option<String>>> {
        let Some(path) = &self.subtypes_path else {
            warn!("No subtype table, every sample is unlabelled");
            return Ok(vec![None; sample_ids.len()]);
        };

        info!("Loading subtypes from {:?}", path);
        let format = FileFormat::from_path(path)?;
        let table = parse_subtypes(open(path, format)?, format, &self.loader)?;
        let subtypes = match_subtypes(sample_ids, &table);

        let matched = subtypes.iter().filter(|s| s.is_some()).count();
        info!("Matched subtypes for {}/{} samples", matched, sample_ids.len());
        Ok(subtypes)
    }
}

impl DatasetProvider for TabularDataset {
    fn load(&self) -> Result<(ExpressionMatrix, Metadata)> {
        let (matrix, feature_names) = self.read_expression()?;
        if matrix.is_empty() {
            return Err(Error::EmptyDataset(format!(
                "{:?} has no samples or no genes",
                self.expression_path
            )));
        }
        let subtypes = self.read_subtypes(&matrix.sample_ids)?;

        let (matrix, feature_names, stats) = self.preprocessor.apply(matrix, feature_names)?;
        info!(
            "Loaded {} samples x {} genes",
            matrix.n_samples(),
            matrix.n_features()
        );

        Ok((
            matrix,
            Metadata {
                feature_names,
                subtypes,
                preprocessing: Some(FittedPreprocessor {
                    preprocessor: self.preprocessor.clone(),
                    stats,
                }),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    #[test]
    fn test_file_format_detection() {
        assert_eq!(FileFormat::from_path("data.csv").unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::from_path("data.tsv").unwrap(), FileFormat::Tsv);
        assert_eq!(FileFormat::from_path("data.csv.gz").unwrap(), FileFormat::GzippedCsv);
        assert_eq!(FileFormat::from_path("data.tsv.gz").unwrap(), FileFormat::GzippedTsv);
        assert!(FileFormat::from_path("data.parquet").is_err());
    }

    #[test]
    fn test_parse_expression_reads_missing_as_nan() {
        let data = "sample,BRCA1,TP53\nS1,2.5,NA\nS2,1.0,3.0";
        let (matrix, genes) =
            parse_expression(Cursor::new(data), FileFormat::Csv, &LoaderConfig::default()).unwrap();

        assert_eq!(genes, vec!["BRCA1", "TP53"]);
        assert_eq!(matrix.sample_ids, vec!["S1", "S2"]);
        assert_eq!(matrix.values[0][0], 2.5);
        assert!(matrix.values[0][1].is_nan());
        assert_eq!(matrix.values[1][1], 3.0);
    }

    #[test]
    fn test_parse_expression_rejects_text_cells() {
        let data = "sample\tG1\nS1\thigh";
        let err = parse_expression(Cursor::new(data), FileFormat::Tsv, &LoaderConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_subtypes_match_by_patient_prefix() {
        let data = "patient\tsubtype\nTCGA-A1-A0SB\tLumA\nTCGA-A2-A04P\tBasal\nTCGA-A2-A0CM\tNA";
        let table = parse_subtypes(Cursor::new(data), FileFormat::Tsv, &LoaderConfig::default())
            .unwrap();
        assert_eq!(table.len(), 2);

        let samples = vec![
            "TCGA-A1-A0SB-01A-11R-A144-07".to_string(),
            "TCGA-A2-A04P".to_string(),
            "TCGA-A2-A0CM-01A".to_string(),
            "short".to_string(),
        ];
        let subtypes = match_subtypes(&samples, &table);
        assert_eq!(
            subtypes,
            vec![Some("LumA".to_string()), Some("Basal".to_string()), None, None]
        );
    }

    #[test]
    fn test_tabular_dataset_reads_gzipped_cohort() {
        let temp_dir = TempDir::new().unwrap();
        let expression = temp_dir.path().join("expression.tsv.gz");
        let mut encoder = GzEncoder::new(File::create(&expression).unwrap(), Compression::default());
        encoder
            .write_all(b"sample\tG1\tG2\nTCGA-AA-0001-01\t0\t10\nTCGA-AA-0002-01\t4\t20\n")
            .unwrap();
        encoder.finish().unwrap();

        let subtypes = temp_dir.path().join("patient_subtype.tsv");
        std::fs::write(&subtypes, "patient\tsubtype\nTCGA-AA-0001\tHer2\n").unwrap();

        let dataset = TabularDataset {
            expression_path: expression,
            subtypes_path: Some(subtypes),
            loader: LoaderConfig::default(),
            preprocessor: Preprocessor {
                log_transform: false,
                ..Preprocessor::default()
            },
        };
        let (matrix, metadata) = dataset.load().unwrap();

        assert_eq!(metadata.feature_names, vec!["G1", "G2"]);
        assert_eq!(metadata.subtypes, vec![Some("Her2".to_string()), None]);
        // min-max scaled per gene
        assert_eq!(matrix.values, vec![vec![0.0, 0.0], vec![1.0, 1.0]]);

        let fitted = metadata.preprocessing.unwrap();
        assert_eq!(fitted.stats.mins, vec![0.0, 10.0]);
        assert_eq!(fitted.stats.maxs, vec![4.0, 20.0]);
        let single = ExpressionMatrix::new(vec!["new".into()], vec![vec![2.0, 15.0]]).unwrap();
        assert_eq!(fitted.transform(single).unwrap().values, vec![vec![0.5, 0.5]]);
    }
}
