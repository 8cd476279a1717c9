//! Flat CSV dataset of labeled landmark rows.
//!
//! Layout: one header line `label,x0,y0,z0,...,x467,y467,z467` followed by one
//! line per sample with the same 1405 columns. The header is written only
//! when the file is created; an existing file is trusted as-is and never
//! validated against the header.

use crate::types::{Sample, LANDMARK_COUNT};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Columns per record: the label plus x/y/z for every landmark.
pub const COLUMN_COUNT: usize = 1 + 3 * LANDMARK_COUNT;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("dataset I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DatasetError {
    fn io(path: &Path, source: io::Error) -> Self {
        DatasetError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Append-only sink for samples.
///
/// Each `append` must be durable on return: a crash after it cannot lose or
/// corrupt that row or any earlier one.
pub trait SampleWriter {
    fn append(&mut self, sample: &Sample) -> Result<(), DatasetError>;
}

/// Header record, without line terminator.
pub fn header() -> String {
    let mut line = String::with_capacity(COLUMN_COUNT * 6);
    line.push_str("label");
    for i in 0..LANDMARK_COUNT {
        line.push_str(&format!(",x{i},y{i},z{i}"));
    }
    line
}

/// Serialize one sample as `label,x0,y0,z0,x1,...` in point order, without line terminator.
pub fn format_row(sample: &Sample) -> String {
    let mut line = String::with_capacity(COLUMN_COUNT * 12);
    line.push_str(sample.label().as_str());
    for p in sample.landmarks() {
        line.push_str(&format!(",{},{},{}", p.x, p.y, p.z));
    }
    line
}

/// CSV dataset file opened for append, one open-write-sync-close per row.
#[derive(Debug, Clone)]
pub struct CsvDataset {
    path: PathBuf,
}

impl CsvDataset {
    /// Create the file with its header if nothing exists at `path` yet.
    ///
    /// An existing file is left untouched. Missing parent directories are created.
    pub fn ensure_initialized(path: impl Into<PathBuf>) -> Result<Self, DatasetError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| DatasetError::io(parent, e))?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", header())
                    .and_then(|_| file.sync_all())
                    .map_err(|e| DatasetError::io(&path, e))?;
                tracing::info!(path = %path.display(), columns = COLUMN_COUNT, "created dataset");
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::info!(path = %path.display(), "appending to existing dataset");
            }
            Err(e) => return Err(DatasetError::io(&path, e)),
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleWriter for CsvDataset {
    fn append(&mut self, sample: &Sample) -> Result<(), DatasetError> {
        // No `create`: a dataset removed mid-session must not come back headerless.
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DatasetError::io(&self.path, e))?;

        let start = drop_partial_row(&mut file).map_err(|e| DatasetError::io(&self.path, e))?;

        let mut line = format_row(sample);
        line.push('\n');
        if let Err(e) = file
            .write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
        {
            if let Err(undo) = file.set_len(start) {
                tracing::warn!(path = %self.path.display(), error = %undo, "failed to roll back partial row");
            }
            return Err(DatasetError::io(&self.path, e));
        }
        Ok(())
    }
}

/// Cut an unterminated last line left behind by an interrupted write.
///
/// Returns the file length afterwards. A file with no newline at all is left alone.
fn drop_partial_row(file: &mut File) -> io::Result<u64> {
    let len = file.metadata()?.len();
    let mut buf = [0u8; 4096];
    let mut end = len;

    while end > 0 {
        let start = end.saturating_sub(buf.len() as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;

        if end == len && chunk.last() == Some(&b'\n') {
            return Ok(len);
        }
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            let keep = start + pos as u64 + 1;
            tracing::warn!(dropped = len - keep, "discarding unterminated row at end of dataset");
            file.set_len(keep)?;
            return Ok(keep);
        }
        end = start;
    }

    Ok(len)
}

/// Count data rows per label by reading the dataset file.
///
/// The first line is taken as the header and skipped; blank lines are ignored.
/// Labels are reported exactly as stored, including ones outside the vocabulary.
pub fn label_counts(path: &Path) -> Result<BTreeMap<String, u64>, DatasetError> {
    let file = fs::File::open(path).map_err(|e| DatasetError::io(path, e))?;
    let mut counts = BTreeMap::new();

    for line in BufReader::new(file).lines().skip(1) {
        let line = line.map_err(|e| DatasetError::io(path, e))?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let label = line.split(',').next().unwrap_or_default();
        *counts.entry(label.to_string()).or_insert(0) += 1;
    }

    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::Emotion;
    use crate::types::test_mesh;
    use tempfile::tempdir;

    #[test]
    fn test_header_shape() {
        let header = header();
        let fields: Vec<&str> = header.split(',').collect();
        assert_eq!(fields.len(), 1405);
        assert_eq!(&fields[..4], &["label", "x0", "y0", "z0"]);
        assert_eq!(&fields[1402..], &["x467", "y467", "z467"]);
    }

    #[test]
    fn test_ensure_initialized_writes_header_once() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested/dir/data.csv");

        let mut dataset = CsvDataset::ensure_initialized(&path).unwrap();
        dataset
            .append(&Sample::new(Emotion::Sad, test_mesh(0.2)))
            .unwrap();

        // Second initialization must not rewrite the file.
        CsvDataset::ensure_initialized(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], header());
        assert!(lines[1].starts_with("sad,"));
    }

    #[test]
    fn test_unterminated_row_is_dropped_before_append() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("data.csv");
        let mut dataset = CsvDataset::ensure_initialized(&path).unwrap();
        dataset
            .append(&Sample::new(Emotion::Sad, test_mesh(0.1)))
            .unwrap();

        // A write cut short after several kilobytes, with no trailing newline.
        let fragment = format!("happy,{}", "0.25,".repeat(2000));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(fragment.as_bytes()).unwrap();
        drop(file);

        dataset
            .append(&Sample::new(Emotion::Angry, test_mesh(0.3)))
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("sad,"));
        assert!(lines[2].starts_with("angry,"));
        assert!(lines.iter().all(|l| l.split(',').count() == COLUMN_COUNT));
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn test_existing_file_is_trusted() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("legacy.csv");
        fs::write(&path, "label,a,b\nhappy,1,2\n").unwrap();

        let mut dataset = CsvDataset::ensure_initialized(&path).unwrap();
        dataset
            .append(&Sample::new(Emotion::Fear, test_mesh(0.0)))
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("label,a,b\nhappy,1,2\nfear,"));
    }

    #[test]
    fn test_appended_row_is_numeric() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("data.csv");
        let mut dataset = CsvDataset::ensure_initialized(&path).unwrap();
        let mesh = test_mesh(0.25);
        dataset
            .append(&Sample::new(Emotion::Happy, mesh.clone()))
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let row = contents.lines().nth(1).unwrap();
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), COLUMN_COUNT);
        assert_eq!(fields[0], "happy");
        let values: Vec<f32> = fields[1..].iter().map(|f| f.parse().unwrap()).collect();
        assert_eq!(values[0], mesh.points()[0].x);
        assert_eq!(values[4], mesh.points()[1].y);
        assert_eq!(values[1403], mesh.points()[467].z);
    }

    #[test]
    fn test_append_fails_when_file_removed() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("data.csv");
        let mut dataset = CsvDataset::ensure_initialized(&path).unwrap();
        fs::remove_file(&path).unwrap();

        let err = dataset
            .append(&Sample::new(Emotion::Angry, test_mesh(0.0)))
            .unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_label_counts() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("data.csv");
        let mut dataset = CsvDataset::ensure_initialized(&path).unwrap();
        for label in [Emotion::Happy, Emotion::Sad, Emotion::Happy] {
            dataset.append(&Sample::new(label, test_mesh(0.0))).unwrap();
        }

        let counts = label_counts(&path).unwrap();
        assert_eq!(counts.get("happy"), Some(&2));
        assert_eq!(counts.get("sad"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn test_label_counts_tolerates_crlf_and_blank_lines() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("data.csv");
        fs::write(&path, "label,x0\r\nneutral,0.1\r\n\r\nneutral,0.2\r\nodd,1\r\n").unwrap();

        let counts = label_counts(&path).unwrap();
        assert_eq!(
            counts,
            BTreeMap::from([("neutral".to_string(), 2), ("odd".to_string(), 1)])
        );
    }

    #[test]
    fn test_label_counts_header_only() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("data.csv");
        CsvDataset::ensure_initialized(&path).unwrap();
        assert!(label_counts(&path).unwrap().is_empty());
    }
}
