//! Files of packed records and the operations that work on them at rest.

pub mod convert;
pub mod interleave;
pub mod shuffle;
pub mod stats;

pub use convert::{convert_text, dump_text, ConvertOptions, ConvertSummary, ErrorPolicy};
pub use interleave::interleave;
pub use shuffle::{shuffle, ShuffleOptions};
pub use stats::{collect_stats, DatasetStats};

use crate::error::{DataError, Location};
use crate::record::{codec, PackedRecord, PositionRecord, RECORD_SIZE};
use memmap2::{Mmap, MmapOptions};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Number of records of a dataset file, from its size alone
pub fn count_records(path: impl AsRef<Path>) -> Result<u64, DataError> {
    let path = path.as_ref();
    let metadata = fs::metadata(path).map_err(|e| DataError::resource("read", path, e))?;
    validate_size(path, metadata.len())
}

/// Returns the record count of a file of `bytes` bytes, or a size error
fn validate_size(path: &Path, bytes: u64) -> Result<u64, DataError> {
    if bytes == 0 {
        return Err(DataError::size(path, "dataset is empty"));
    }
    if bytes % RECORD_SIZE as u64 != 0 {
        return Err(DataError::size(
            path,
            format!(
                "{} bytes is not a multiple of the record size ({})",
                bytes, RECORD_SIZE
            ),
        ));
    }
    Ok(bytes / RECORD_SIZE as u64)
}

/// Read-only random access to a dataset file
pub struct Dataset {
    path: PathBuf,
    mmap: Mmap,
    len: u64,
}

impl Dataset {
    pub fn open(path: impl AsRef<Path>) -> Result<Dataset, DataError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| DataError::resource("open", path, e))?;
        let bytes = file
            .metadata()
            .map_err(|e| DataError::resource("read", path, e))?
            .len();
        let len = validate_size(path, bytes)?;

        // the file is treated as immutable while the map is alive
        let mmap = unsafe { MmapOptions::new().map(&file) }
            .map_err(|e| DataError::resource("map", path, e))?;

        Ok(Dataset {
            path: path.to_path_buf(),
            mmap,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records, always at least one
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The packed bytes of a record, `None` past the end
    pub fn raw(&self, index: u64) -> Option<PackedRecord> {
        let start = usize::try_from(index).ok()?.checked_mul(RECORD_SIZE)?;
        let bytes = self.mmap.get(start..start + RECORD_SIZE)?;

        let mut record = [0u8; RECORD_SIZE];
        record.copy_from_slice(bytes);
        Some(record)
    }

    /// Decodes the record at `index`
    pub fn get(&self, index: u64) -> Result<PositionRecord, DataError> {
        let raw = self.raw(index).ok_or_else(|| DataError::Format {
            location: Location::Record(index),
            reason: format!("past the end of a dataset of {} records", self.len),
        })?;
        codec::decode(&raw).map_err(|e| DataError::from_record(e, Location::Record(index)))
    }
}

/// Sequential reader over a dataset file
pub struct RecordReader {
    path: PathBuf,
    reader: BufReader<File>,
    len: u64,
    next_index: u64,
}

impl RecordReader {
    pub fn open(path: impl AsRef<Path>) -> Result<RecordReader, DataError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| DataError::resource("open", path, e))?;
        let bytes = file
            .metadata()
            .map_err(|e| DataError::resource("read", path, e))?
            .len();
        let len = validate_size(path, bytes)?;

        Ok(RecordReader {
            path: path.to_path_buf(),
            reader: BufReader::with_capacity(1 << 20, file),
            len,
            next_index: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records left to read
    pub fn remaining(&self) -> u64 {
        self.len - self.next_index
    }

    /// Index the next record will have
    pub fn position(&self) -> u64 {
        self.next_index
    }

    /// Reads the next record without decoding it
    pub fn read_raw(&mut self) -> Result<Option<PackedRecord>, DataError> {
        if self.next_index == self.len {
            return Ok(None);
        }

        let mut record = [0u8; RECORD_SIZE];
        self.reader
            .read_exact(&mut record)
            .map_err(|e| DataError::resource("read", &self.path, e))?;
        self.next_index += 1;
        Ok(Some(record))
    }

    /// Reads and decodes the next record
    pub fn read_record(&mut self) -> Result<Option<PositionRecord>, DataError> {
        let index = self.next_index;
        match self.read_raw()? {
            Some(raw) => codec::decode(&raw)
                .map(Some)
                .map_err(|e| DataError::from_record(e, Location::Record(index))),
            None => Ok(None),
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<PositionRecord, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Writes records to `<path>.tmp` and moves the file into place on
/// [`RecordWriter::finish`]. A writer dropped before that removes its
/// temporary file, so an aborted run never leaves a partial dataset.
pub struct RecordWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl RecordWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<RecordWriter, DataError> {
        let path = path.as_ref().to_path_buf();
        let tmp_path = tmp_path(&path);
        let file = File::create(&tmp_path).map_err(|e| DataError::resource("create", &tmp_path, e))?;

        Ok(RecordWriter {
            path,
            tmp_path,
            writer: Some(BufWriter::with_capacity(1 << 20, file)),
            written: 0,
        })
    }

    pub fn write_raw(&mut self, record: &PackedRecord) -> Result<(), DataError> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .write_all(record)
                .map_err(|e| DataError::resource("write", &self.tmp_path, e))?;
            self.written += 1;
        }
        Ok(())
    }

    pub fn write_record(&mut self, record: &PositionRecord) -> Result<(), DataError> {
        self.write_raw(&codec::encode(record))
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes and renames the temporary file over the destination
    pub fn finish(mut self) -> Result<u64, DataError> {
        // on any error the writer stays set and drop removes the temporary file
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| DataError::resource("write", &self.tmp_path, e))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| DataError::resource("sync", &self.tmp_path, e))?;
        }

        fs::rename(&self.tmp_path, &self.path)
            .map_err(|e| DataError::resource("rename into", &self.path, e))?;
        self.writer = None;
        Ok(self.written)
    }
}

impl Drop for RecordWriter {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            if let Err(err) = fs::remove_file(&self.tmp_path) {
                if err.kind() != io::ErrorKind::NotFound {
                    log::warn!("could not remove {}: {}", self.tmp_path.display(), err);
                }
            }
        }
    }
}

/// `<path>.tmp`, next to the destination so the final rename stays on one filesystem
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::record::{parse_line, Wdl};

    pub const FENS: [&str; 4] = [
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "4nrk1/3q1pp1/2n1p1p1/8/1P2Q3/7P/PB1N1PP1/2R3K1 w - - 5 26",
        "5r2/1p2ppkp/p2p1nP1/qn6/4P3/2r2B2/1PPQ1PP1/2KR3R w - - 0 21",
        "8/2k5/p1P5/5r2/2K5/8/P7/7R b - - 4 39",
    ];

    /// A record whose eval is its index, so datasets can be checked for order
    pub fn numbered_record(index: u64) -> PositionRecord {
        let fen = FENS[(index % FENS.len() as u64) as usize];
        let wdl = Wdl::ALL[(index % 3) as usize];
        parse_line(&format!("{} | {} | {}", fen, index, wdl.as_text())).unwrap()
    }

    pub fn write_numbered(path: &Path, range: std::ops::Range<u64>) {
        let mut writer = RecordWriter::create(path).unwrap();
        for index in range {
            writer.write_record(&numbered_record(index)).unwrap();
        }
        writer.finish().unwrap();
    }

    /// Evals of every record of a dataset, in file order
    pub fn read_evals(path: &Path) -> Vec<i16> {
        RecordReader::open(path)
            .unwrap()
            .map(|record| record.unwrap().eval())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn test_size_validation() {
        let dir = tempfile::tempdir().unwrap();

        let empty = dir.path().join("empty.bin");
        fs::write(&empty, b"").unwrap();
        assert!(matches!(count_records(&empty), Err(DataError::Size { .. })));
        assert!(matches!(Dataset::open(&empty), Err(DataError::Size { .. })));

        let ragged = dir.path().join("ragged.bin");
        fs::write(&ragged, [0u8; 33]).unwrap();
        assert!(matches!(count_records(&ragged), Err(DataError::Size { .. })));
        assert!(matches!(RecordReader::open(&ragged), Err(DataError::Size { .. })));

        assert!(matches!(
            count_records(dir.path().join("missing.bin")),
            Err(DataError::Resource { .. })
        ));
    }

    #[test]
    fn test_writer_reader_and_random_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        write_numbered(&path, 0..10);

        assert_eq!(count_records(&path).unwrap(), 10);
        assert_eq!(read_evals(&path), (0..10).collect::<Vec<i16>>());

        let dataset = Dataset::open(&path).unwrap();
        assert_eq!(dataset.len(), 10);
        assert_eq!(dataset.get(7).unwrap(), numbered_record(7));
        assert!(dataset.raw(10).is_none());
        assert!(matches!(
            dataset.get(10),
            Err(DataError::Format {
                location: Location::Record(10),
                ..
            })
        ));
    }

    #[test]
    fn test_decode_errors_carry_the_record_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        write_numbered(&path, 0..3);

        let mut bytes = fs::read(&path).unwrap();
        bytes[RECORD_SIZE + 30] = 7; // WDL code of record 1
        fs::write(&path, bytes).unwrap();

        let results: Vec<_> = RecordReader::open(&path).unwrap().collect();
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.location(), Some(&Location::Record(1)));
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_dropped_writer_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut writer = RecordWriter::create(&path).unwrap();
        writer.write_record(&numbered_record(0)).unwrap();
        drop(writer);

        assert!(!path.exists());
        assert!(!tmp_path(&path).exists());
    }
}
