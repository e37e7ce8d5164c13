use crate::domain::entities::Event;
use crate::error::{EventStoreError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Write-ahead log backing the file-based `DataStore`: every event is
/// durable here before the store's own segment files are updated, so a
/// crash between the two leaves a recoverable trail rather than silent loss.
pub struct WriteAheadLog {
    wal_dir: PathBuf,
    current_file: Arc<RwLock<WALFile>>,
    config: WALConfig,
    stats: Arc<RwLock<WALStats>>,
    sequence: Arc<RwLock<u64>>,
}

#[derive(Debug, Clone)]
pub struct WALConfig {
    pub max_file_size: usize,
    pub sync_on_write: bool,
    pub max_wal_files: usize,
}

impl Default for WALConfig {
    fn default() -> Self {
        Self {
            max_file_size: 64 * 1024 * 1024,
            sync_on_write: true,
            max_wal_files: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WALStats {
    pub total_entries: u64,
    pub total_bytes_written: u64,
    pub current_file_size: usize,
    pub files_rotated: u64,
    pub files_cleaned: u64,
    pub recovery_count: u64,
}

/// One logged event plus its integrity checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WALEntry {
    pub sequence: u64,
    pub wal_timestamp: DateTime<Utc>,
    pub event: Event,
    pub checksum: u32,
}

impl WALEntry {
    pub fn new(sequence: u64, event: Event) -> Self {
        let mut entry = Self {
            sequence,
            wal_timestamp: Utc::now(),
            event,
            checksum: 0,
        };
        entry.checksum = entry.calculate_checksum();
        entry
    }

    fn calculate_checksum(&self) -> u32 {
        let data = format!(
            "{}{}{}{}",
            self.sequence,
            self.wal_timestamp,
            self.event.event_type_str(),
            self.event.event_version()
        );
        crc32fast::hash(data.as_bytes())
    }

    pub fn verify(&self) -> bool {
        self.checksum == self.calculate_checksum()
    }
}

struct WALFile {
    writer: BufWriter<File>,
    size: usize,
}

impl WALFile {
    fn new(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EventStoreError::Io(format!("failed to open WAL file: {e}")))?;

        let size = file.metadata().map(|m| m.len() as usize).unwrap_or(0);

        Ok(Self {
            writer: BufWriter::new(file),
            size,
        })
    }

    fn write_entry(&mut self, entry: &WALEntry, sync: bool) -> Result<usize> {
        let json = serde_json::to_string(entry)?;
        let line = format!("{json}\n");
        let bytes_written = line.len();

        self.writer
            .write_all(line.as_bytes())
            .map_err(|e| EventStoreError::Io(format!("failed to write to WAL: {e}")))?;

        if sync {
            self.writer
                .flush()
                .map_err(|e| EventStoreError::Io(format!("failed to flush WAL: {e}")))?;
            self.writer
                .get_ref()
                .sync_all()
                .map_err(|e| EventStoreError::Io(format!("failed to sync WAL: {e}")))?;
        }

        self.size += bytes_written;
        Ok(bytes_written)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| EventStoreError::Io(format!("failed to flush WAL: {e}")))
    }
}

impl WriteAheadLog {
    pub fn new(wal_dir: impl Into<PathBuf>, config: WALConfig) -> Result<Self> {
        let wal_dir = wal_dir.into();
        fs::create_dir_all(&wal_dir)
            .map_err(|e| EventStoreError::Io(format!("failed to create WAL directory: {e}")))?;

        let initial_file_path = Self::generate_wal_filename(&wal_dir, 0);
        let current_file = WALFile::new(initial_file_path)?;

        tracing::info!(dir = %wal_dir.display(), "WAL initialized");

        Ok(Self {
            wal_dir,
            current_file: Arc::new(RwLock::new(current_file)),
            config,
            stats: Arc::new(RwLock::new(WALStats::default())),
            sequence: Arc::new(RwLock::new(0)),
        })
    }

    fn generate_wal_filename(dir: &Path, sequence: u64) -> PathBuf {
        dir.join(format!("wal-{sequence:016x}.log"))
    }

    pub fn append(&self, event: Event) -> Result<u64> {
        let sequence = {
            let mut seq = self.sequence.write();
            *seq += 1;
            *seq
        };

        let entry = WALEntry::new(sequence, event);

        let mut current = self.current_file.write();
        let bytes_written = current.write_entry(&entry, self.config.sync_on_write)?;

        {
            let mut stats = self.stats.write();
            stats.total_entries += 1;
            stats.total_bytes_written += bytes_written as u64;
            stats.current_file_size = current.size;
        }

        let should_rotate = current.size >= self.config.max_file_size;
        drop(current);

        if should_rotate {
            self.rotate()?;
        }

        tracing::trace!(sequence, "WAL entry written");
        Ok(sequence)
    }

    fn rotate(&self) -> Result<()> {
        let seq = *self.sequence.read();
        let new_file_path = Self::generate_wal_filename(&self.wal_dir, seq);
        tracing::debug!(?new_file_path, "rotating WAL");

        let new_file = WALFile::new(new_file_path)?;
        let mut current = self.current_file.write();
        current.flush()?;
        *current = new_file;
        drop(current);

        {
            let mut stats = self.stats.write();
            stats.files_rotated += 1;
            stats.current_file_size = 0;
        }

        self.cleanup_old_files()
    }

    fn cleanup_old_files(&self) -> Result<()> {
        let mut wal_files = self.list_wal_files()?;
        wal_files.sort();

        if wal_files.len() > self.config.max_wal_files {
            let to_remove = wal_files.len() - self.config.max_wal_files;
            for file_path in &wal_files[..to_remove] {
                if let Err(e) = fs::remove_file(file_path) {
                    tracing::warn!(?file_path, error = %e, "failed to remove old WAL file");
                } else {
                    self.stats.write().files_cleaned += 1;
                }
            }
        }

        Ok(())
    }

    fn list_wal_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.wal_dir)
            .map_err(|e| EventStoreError::Io(format!("failed to read WAL directory: {e}")))?;

        let mut wal_files = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| EventStoreError::Io(format!("failed to read directory entry: {e}")))?;
            let path = entry.path();
            if let Some(name) = path.file_name() {
                let name = name.to_string_lossy();
                if name.starts_with("wal-") && name.ends_with(".log") {
                    wal_files.push(path);
                }
            }
        }

        Ok(wal_files)
    }

    /// Replay every intact entry across all segment files in file order.
    /// Corrupted entries (checksum mismatch or parse failure) are skipped,
    /// not fatal — this is the source of the partial-commit recovery story
    /// the repair service completes.
    pub fn recover(&self) -> Result<Vec<Event>> {
        let mut wal_files = self.list_wal_files()?;
        wal_files.sort();

        let mut recovered_events = Vec::new();
        let mut max_sequence = 0u64;
        let mut corrupted_entries = 0u64;

        for wal_file_path in &wal_files {
            let file = File::open(wal_file_path)
                .map_err(|e| EventStoreError::Io(format!("failed to open WAL file: {e}")))?;
            let reader = BufReader::new(file);

            for line in reader.lines() {
                let line = line.map_err(|e| EventStoreError::Io(format!("failed to read WAL line: {e}")))?;
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<WALEntry>(&line) {
                    Ok(entry) if entry.verify() => {
                        max_sequence = max_sequence.max(entry.sequence);
                        recovered_events.push(entry.event);
                    }
                    Ok(_) | Err(_) => corrupted_entries += 1,
                }
            }
        }

        *self.sequence.write() = max_sequence;
        self.stats.write().recovery_count += 1;

        tracing::info!(
            recovered = recovered_events.len(),
            corrupted = corrupted_entries,
            "WAL recovery complete"
        );

        Ok(recovered_events)
    }

    pub fn flush(&self) -> Result<()> {
        self.current_file.write().flush()
    }

    /// Drop all segment files after a successful checkpoint (e.g. a snapshot
    /// that makes the logged events redundant).
    pub fn truncate(&self) -> Result<()> {
        let mut current = self.current_file.write();
        current.flush()?;

        for file_path in self.list_wal_files()? {
            fs::remove_file(&file_path)
                .map_err(|e| EventStoreError::Io(format!("failed to remove WAL file: {e}")))?;
        }

        let new_file_path = Self::generate_wal_filename(&self.wal_dir, 0);
        *current = WALFile::new(new_file_path)?;
        *self.sequence.write() = 0;

        Ok(())
    }

    pub fn stats(&self) -> WALStats {
        self.stats.read().clone()
    }

    pub fn current_sequence(&self) -> u64 {
        *self.sequence.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_event() -> Event {
        Event::stage("test.event", 1, json!({"data": "test"})).unwrap()
    }

    #[test]
    fn wal_creation_succeeds_on_fresh_directory() {
        let temp_dir = TempDir::new().unwrap();
        assert!(WriteAheadLog::new(temp_dir.path(), WALConfig::default()).is_ok());
    }

    #[test]
    fn append_assigns_increasing_sequence_numbers() {
        let temp_dir = TempDir::new().unwrap();
        let wal = WriteAheadLog::new(temp_dir.path(), WALConfig::default()).unwrap();

        assert_eq!(wal.append(test_event()).unwrap(), 1);
        assert_eq!(wal.append(test_event()).unwrap(), 2);
        assert_eq!(wal.stats().total_entries, 2);
    }

    #[test]
    fn recovery_replays_events_after_restart() {
        let temp_dir = TempDir::new().unwrap();
        let wal = WriteAheadLog::new(temp_dir.path(), WALConfig::default()).unwrap();

        for _ in 0..5 {
            wal.append(test_event()).unwrap();
        }
        wal.flush().unwrap();

        let wal2 = WriteAheadLog::new(temp_dir.path(), WALConfig::default()).unwrap();
        let recovered = wal2.recover().unwrap();
        assert_eq!(recovered.len(), 5);
    }

    #[test]
    fn rotation_triggers_past_max_file_size() {
        let temp_dir = TempDir::new().unwrap();
        let config = WALConfig {
            max_file_size: 256,
            ..Default::default()
        };
        let wal = WriteAheadLog::new(temp_dir.path(), config).unwrap();

        for _ in 0..50 {
            wal.append(test_event()).unwrap();
        }

        assert!(wal.stats().files_rotated > 0);
    }

    #[test]
    fn entry_checksum_detects_tampering() {
        let entry = WALEntry::new(1, test_event());
        assert!(entry.verify());

        let mut corrupted = entry.clone();
        corrupted.checksum = 0;
        assert!(!corrupted.verify());
    }

    #[test]
    fn truncate_resets_sequence_and_clears_log() {
        let temp_dir = TempDir::new().unwrap();
        let wal = WriteAheadLog::new(temp_dir.path(), WALConfig::default()).unwrap();

        for _ in 0..5 {
            wal.append(test_event()).unwrap();
        }
        wal.truncate().unwrap();

        assert_eq!(wal.current_sequence(), 0);
        assert_eq!(wal.recover().unwrap().len(), 0);
    }
}
