use crate::error::{BlockchainError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only file holding one JSON record per line (chain history, peer list)
#[derive(Debug, Clone)]
pub struct RecordLog {
    path: PathBuf,
}

impl RecordLog {
    pub fn new(path: impl Into<PathBuf>) -> RecordLog {
        RecordLog { path: path.into() }
    }

    pub fn get_path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        self.append_all(std::slice::from_ref(record))
    }

    pub fn append_all<T: Serialize>(&self, records: &[T]) -> Result<()> {
        self.ensure_parent()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        write_lines(&mut writer, records)?;
        writer.flush()?;
        Ok(())
    }

    /// Every record in file order. A missing file is an empty log.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = vec![];
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| {
                BlockchainError::Serialization(format!(
                    "{} line {}: {e}",
                    self.path.display(),
                    number + 1
                ))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    pub fn last<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        Ok(self.read_all::<T>()?.pop())
    }

    /// Replaces the whole log. Written to a sibling file first and renamed over the old one.
    pub fn rewrite<T: Serialize>(&self, records: &[T]) -> Result<()> {
        self.ensure_parent()?;
        let tmp = self.path.with_extension("tmp");
        {
            let file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            write_lines(&mut writer, records)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

fn write_lines<W: Write, T: Serialize>(writer: &mut W, records: &[T]) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        host: String,
        port: u16,
    }

    fn entry(port: u16) -> Entry {
        Entry {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let log = RecordLog::new(dir.path().join("peers.log"));
        assert!(log.read_all::<Entry>().unwrap().is_empty());
        assert!(log.last::<Entry>().unwrap().is_none());
    }

    #[test]
    fn test_append_one_record_per_line() {
        let dir = TempDir::new().unwrap();
        let log = RecordLog::new(dir.path().join("nested").join("peers.log"));
        log.append(&entry(1)).unwrap();
        log.append_all(&[entry(2), entry(3)]).unwrap();

        let raw = fs::read_to_string(log.get_path()).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert_eq!(
            raw.lines().next().unwrap(),
            r#"{"host":"127.0.0.1","port":1}"#
        );
        assert_eq!(log.read_all::<Entry>().unwrap().len(), 3);
        assert_eq!(log.last::<Entry>().unwrap(), Some(entry(3)));
    }

    #[test]
    fn test_blank_lines_skipped_and_garbage_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.log");
        fs::write(&path, "{\"host\":\"a\",\"port\":1}\n\n   \n").unwrap();
        let log = RecordLog::new(&path);
        assert_eq!(log.read_all::<Entry>().unwrap().len(), 1);

        fs::write(&path, "not json\n").unwrap();
        assert!(matches!(
            log.read_all::<Entry>(),
            Err(BlockchainError::Serialization(_))
        ));
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let log = RecordLog::new(dir.path().join("chain.log"));
        log.append_all(&[entry(1), entry(2), entry(3)]).unwrap();
        log.rewrite(&[entry(9)]).unwrap();
        assert_eq!(log.read_all::<Entry>().unwrap(), vec![entry(9)]);
        assert!(!dir.path().join("chain.tmp").exists());
    }
}
