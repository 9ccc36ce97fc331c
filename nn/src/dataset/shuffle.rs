//! Uniform shuffle of a dataset file.
//!
//! Files that fit in `chunk_records` are shuffled in memory. Larger files take
//! two passes: every record is scattered to one of `K = ceil(N / chunk_records)`
//! temporary buckets chosen uniformly at random, then each bucket is loaded,
//! shuffled and appended to the output.
//!
//! The two pass result is still a uniform permutation. For every choice of
//! bucket sizes `n_1..n_K`, exactly one assignment of records to buckets can
//! produce a given output order. That assignment has probability `K^-N` and the
//! inner shuffles then hit the order with probability `1 / (n_1! ... n_K!)`.
//! Summing over the bucket sizes gives `K^-N * sum N! / (n_1! ... n_K!) / N!`,
//! which is `1 / N!` by the multinomial theorem. Bucket sizes vary around
//! `chunk_records`.

use super::{RecordReader, RecordWriter};
use crate::error::DataError;
use crate::record::{PackedRecord, RECORD_SIZE};
use indicatif::ProgressBar;
use log::{debug, info};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Most bucket files open at once during a two pass shuffle
pub const MAX_BUCKETS: u64 = 1024;

#[derive(Clone, Debug)]
pub struct ShuffleOptions {
    /// Records held in memory at a time
    pub chunk_records: usize,
    /// Fixed seed for a reproducible order, OS entropy otherwise
    pub seed: Option<u64>,
}

impl Default for ShuffleOptions {
    fn default() -> Self {
        ShuffleOptions {
            // 1 GiB of records
            chunk_records: 1 << 25,
            seed: None,
        }
    }
}

pub fn shuffle(
    input: &Path,
    output: &Path,
    options: &ShuffleOptions,
    progress: &ProgressBar,
) -> Result<u64, DataError> {
    if options.chunk_records == 0 {
        return Err(DataError::Config("chunk_records must be at least 1".into()));
    }

    let mut rng = match options.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let mut reader = RecordReader::open(input)?;
    let count = reader.len();
    let mut writer = RecordWriter::create(output)?;

    if count <= options.chunk_records as u64 {
        info!("Shuffling {} records in memory", count);
        shuffle_in_memory(&mut reader, &mut writer, &mut rng, progress)?;
    } else {
        let buckets = count.div_ceil(options.chunk_records as u64);
        if buckets > MAX_BUCKETS {
            return Err(DataError::Config(format!(
                "{} records in chunks of {} need {} buckets, at most {} are allowed",
                count, options.chunk_records, buckets, MAX_BUCKETS
            )));
        }
        info!("Shuffling {} records through {} buckets", count, buckets);
        shuffle_in_buckets(&mut reader, &mut writer, buckets as usize, output, &mut rng, progress)?;
    }

    if writer.written() != count {
        return Err(DataError::size(
            output,
            format!("wrote {} records, expected {}", writer.written(), count),
        ));
    }
    writer.finish()
}

fn shuffle_in_memory(
    reader: &mut RecordReader,
    writer: &mut RecordWriter,
    rng: &mut ChaCha8Rng,
    progress: &ProgressBar,
) -> Result<(), DataError> {
    let mut records: Vec<PackedRecord> = Vec::with_capacity(reader.len() as usize);
    while let Some(record) = reader.read_raw()? {
        records.push(record);
        progress.inc(1);
    }

    records.shuffle(rng);

    for record in &records {
        writer.write_raw(record)?;
        progress.inc(1);
    }
    Ok(())
}

fn shuffle_in_buckets(
    reader: &mut RecordReader,
    writer: &mut RecordWriter,
    buckets: usize,
    output: &Path,
    rng: &mut ChaCha8Rng,
    progress: &ProgressBar,
) -> Result<(), DataError> {
    // scratch space next to the output, removed on drop
    let scratch_parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp_dir = tempfile::Builder::new()
        .prefix(".shuffle")
        .tempdir_in(scratch_parent)
        .map_err(|e| DataError::resource("create a scratch directory in", scratch_parent, e))?;
    let bucket_path = |i: usize| temp_dir.path().join(format!("bucket_{}.bin", i));

    // pass 1: scatter
    let mut bucket_writers = (0..buckets)
        .map(|i| {
            let path = bucket_path(i);
            File::create(&path)
                .map(BufWriter::new)
                .map_err(|e| DataError::resource("create", &path, e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    while let Some(record) = reader.read_raw()? {
        let bucket = rng.gen_range(0..buckets);
        bucket_writers[bucket]
            .write_all(&record)
            .map_err(|e| DataError::resource("write", &bucket_path(bucket), e))?;
        progress.inc(1);
    }

    for (i, mut bucket) in bucket_writers.into_iter().enumerate() {
        bucket
            .flush()
            .map_err(|e| DataError::resource("write", &bucket_path(i), e))?;
    }

    // pass 2: shuffle each bucket and append it
    let mut records: Vec<PackedRecord> = Vec::new();
    for i in 0..buckets {
        let path = bucket_path(i);
        let file = File::open(&path).map_err(|e| DataError::resource("open", &path, e))?;
        let mut bucket = BufReader::new(file);
        let mut bytes = Vec::new();
        bucket
            .read_to_end(&mut bytes)
            .map_err(|e| DataError::resource("read", &path, e))?;

        records.clear();
        records.extend(bytes.chunks_exact(RECORD_SIZE).map(|chunk| {
            let mut record = [0u8; RECORD_SIZE];
            record.copy_from_slice(chunk);
            record
        }));
        debug!("bucket {} holds {} records", i, records.len());

        records.shuffle(rng);
        for record in &records {
            writer.write_raw(record)?;
            progress.inc(1);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_util::{read_evals, write_numbered};

    fn run(input: &Path, output: &Path, chunk_records: usize, seed: u64) -> Vec<i16> {
        let options = ShuffleOptions {
            chunk_records,
            seed: Some(seed),
        };
        let written = shuffle(input, output, &options, &ProgressBar::hidden()).unwrap();
        let evals = read_evals(output);
        assert_eq!(written, evals.len() as u64);
        evals
    }

    #[test]
    fn test_in_memory_shuffle_is_a_permutation() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        write_numbered(&input, 0..200);

        let mut evals = run(&input, &dir.path().join("out.bin"), 1000, 1);
        assert_ne!(evals, (0..200).collect::<Vec<i16>>());
        evals.sort();
        assert_eq!(evals, (0..200).collect::<Vec<i16>>());
    }

    #[test]
    fn test_bucket_shuffle_is_a_permutation() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        write_numbered(&input, 0..200);

        let mut evals = run(&input, &dir.path().join("out.bin"), 16, 2);
        assert_ne!(evals, (0..200).collect::<Vec<i16>>());
        evals.sort();
        assert_eq!(evals, (0..200).collect::<Vec<i16>>());

        // only the output is left in the directory
        let mut entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["in.bin", "out.bin"]);
    }

    #[test]
    fn test_seed_makes_it_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        write_numbered(&input, 0..100);

        for chunk_records in [10, 1000] {
            let a = run(&input, &dir.path().join("a.bin"), chunk_records, 7);
            let b = run(&input, &dir.path().join("b.bin"), chunk_records, 7);
            let c = run(&input, &dir.path().join("c.bin"), chunk_records, 8);
            assert_eq!(a, b);
            assert_ne!(a, c);
        }
    }

    #[test]
    fn test_too_many_buckets_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        write_numbered(&input, 0..(MAX_BUCKETS + 1));

        let options = ShuffleOptions {
            chunk_records: 1,
            seed: Some(0),
        };
        let err = shuffle(&input, &output, &options, &ProgressBar::hidden()).unwrap_err();
        assert!(matches!(err, DataError::Config(_)));
        assert!(!output.exists());
    }
}
