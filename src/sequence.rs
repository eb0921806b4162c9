///! File-backed sequences of fixed-size records
///!
///! The out-of-core data model shared by every build stage. A `Sequence<T>`
///! supports append, random indexed read/write, an in-place forward
///! `transform` pass, and an external merge sort that spills runs to a
///! scratch file, so it tolerates datasets larger than RAM. Positioned reads
///! leave no seek state behind, so read-only handles can be shared freely
///! once a stage stops mutating.

use anyhow::{ensure, Context, Result};
use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// A value serializable as a fixed-size little-endian record
pub trait Record: Clone {
    const SIZE: usize;

    /// Encode into `buf`, which is exactly `SIZE` bytes
    fn write_bytes(&self, buf: &mut [u8]);

    /// Decode from `buf`, which is exactly `SIZE` bytes
    fn read_bytes(buf: &[u8]) -> Self;
}

/// Append buffer flush threshold in bytes
const APPEND_BUFFER_BYTES: usize = 1 << 16;

/// Records processed per transform chunk
const TRANSFORM_CHUNK: usize = 4096;

/// Default in-memory sort run size in bytes
const SORT_BUFFER_BYTES: usize = 256 << 20;

pub struct Sequence<T: Record> {
    file: File,
    path: PathBuf,
    /// Records already on disk
    flushed: usize,
    /// Appended records not yet written
    tail: Vec<u8>,
    _marker: PhantomData<T>,
}

impl<T: Record> Sequence<T> {
    /// Create a new, empty sequence, truncating any existing file
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create sequence {}", path.display()))?;
        Ok(Sequence {
            file,
            path: path.to_path_buf(),
            flushed: 0,
            tail: Vec::new(),
            _marker: PhantomData,
        })
    }

    /// Open an existing sequence for reading and in-place updates
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, true)
    }

    /// Open an existing sequence for reading only
    pub fn open_read_only(path: &Path) -> Result<Self> {
        Self::open_with(path, false)
    }

    fn open_with(path: &Path, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .with_context(|| format!("Failed to open sequence {}", path.display()))?;
        let bytes = file.metadata()?.len() as usize;
        ensure!(
            bytes % T::SIZE == 0,
            "Sequence {} is {} bytes, not a multiple of the {}-byte record",
            path.display(),
            bytes,
            T::SIZE
        );
        Ok(Sequence {
            file,
            path: path.to_path_buf(),
            flushed: bytes / T::SIZE,
            tail: Vec::new(),
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.flushed + self.tail.len() / T::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a record; returns the new length
    pub fn push_back(&mut self, value: &T) -> Result<usize> {
        let start = self.tail.len();
        self.tail.resize(start + T::SIZE, 0);
        value.write_bytes(&mut self.tail[start..]);
        if self.tail.len() >= APPEND_BUFFER_BYTES {
            self.flush()?;
        }
        Ok(self.len())
    }

    /// Write any buffered appends out to the file
    pub fn flush(&mut self) -> Result<()> {
        if !self.tail.is_empty() {
            self.file
                .write_all_at(&self.tail, (self.flushed * T::SIZE) as u64)?;
            self.flushed += self.tail.len() / T::SIZE;
            self.tail.clear();
        }
        Ok(())
    }

    /// Random read by position
    pub fn get(&self, index: usize) -> Result<T> {
        ensure!(
            index < self.len(),
            "Sequence {} read at {} past length {}",
            self.path.display(),
            index,
            self.len()
        );
        if index >= self.flushed {
            let start = (index - self.flushed) * T::SIZE;
            Ok(T::read_bytes(&self.tail[start..start + T::SIZE]))
        } else {
            let mut buf = vec![0u8; T::SIZE];
            self.file
                .read_exact_at(&mut buf, (index * T::SIZE) as u64)?;
            Ok(T::read_bytes(&buf))
        }
    }

    /// Random in-place update by position
    pub fn set(&mut self, index: usize, value: &T) -> Result<()> {
        ensure!(
            index < self.len(),
            "Sequence {} write at {} past length {}",
            self.path.display(),
            index,
            self.len()
        );
        if index >= self.flushed {
            let start = (index - self.flushed) * T::SIZE;
            value.write_bytes(&mut self.tail[start..start + T::SIZE]);
        } else {
            let mut buf = vec![0u8; T::SIZE];
            value.write_bytes(&mut buf);
            self.file.write_all_at(&buf, (index * T::SIZE) as u64)?;
        }
        Ok(())
    }

    /// Single forward pass applying `f(position, &mut record)` in place
    pub fn transform<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(usize, &mut T),
    {
        self.flush()?;
        let mut position = 0;
        let mut buf = vec![0u8; TRANSFORM_CHUNK * T::SIZE];
        while position < self.flushed {
            let count = TRANSFORM_CHUNK.min(self.flushed - position);
            let chunk = &mut buf[..count * T::SIZE];
            self.file
                .read_exact_at(chunk, (position * T::SIZE) as u64)?;
            for i in 0..count {
                let slot = &mut chunk[i * T::SIZE..(i + 1) * T::SIZE];
                let mut value = T::read_bytes(slot);
                f(position + i, &mut value);
                value.write_bytes(slot);
            }
            self.file
                .write_all_at(chunk, (position * T::SIZE) as u64)?;
            position += count;
        }
        Ok(())
    }

    /// Reorder the whole sequence by `cmp` with an external merge sort.
    /// All previously held positions are invalidated; callers rebuild their
    /// cross-references afterwards.
    pub fn sort_by<F>(&mut self, cmp: F) -> Result<()>
    where
        F: Fn(&T, &T) -> Ordering,
    {
        let run_records = (SORT_BUFFER_BYTES / T::SIZE).max(1);
        self.sort_with_run_size(cmp, run_records)
    }

    /// Sort with an explicit in-memory run size (records); exposed so the
    /// spill path is exercised by tests
    pub fn sort_with_run_size<F>(&mut self, cmp: F, run_records: usize) -> Result<()>
    where
        F: Fn(&T, &T) -> Ordering,
    {
        self.flush()?;
        let total = self.flushed;
        if total <= 1 {
            return Ok(());
        }

        // Everything fits in one run: sort in memory and write back
        if total <= run_records {
            let mut values = self.read_range(0, total)?;
            values.sort_by(&cmp);
            self.write_range(0, &values)?;
            return Ok(());
        }

        // Spill sorted runs to a scratch file beside the data
        let scratch_path = self.path.with_extension("sort.tmp");
        let scratch = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&scratch_path)
            .with_context(|| format!("Failed to create scratch {}", scratch_path.display()))?;

        let mut runs = Vec::new();
        let mut start = 0;
        while start < total {
            let count = run_records.min(total - start);
            let mut values = self.read_range(start, count)?;
            values.sort_by(&cmp);
            let mut bytes = vec![0u8; count * T::SIZE];
            for (i, v) in values.iter().enumerate() {
                v.write_bytes(&mut bytes[i * T::SIZE..(i + 1) * T::SIZE]);
            }
            scratch.write_all_at(&bytes, (start * T::SIZE) as u64)?;
            runs.push(RunCursor::new(start, start + count));
            start += count;
        }

        // K-way merge back into the data file
        let mut out = Vec::with_capacity(TRANSFORM_CHUNK * T::SIZE);
        let mut out_position = 0usize;
        loop {
            for run in runs.iter_mut() {
                run.fill(&scratch)?;
            }
            let mut best: Option<usize> = None;
            for (i, run) in runs.iter().enumerate() {
                if let Some(head) = run.peek() {
                    best = match best {
                        Some(b) if cmp(runs[b].peek().unwrap(), head) != Ordering::Greater => {
                            Some(b)
                        }
                        _ => Some(i),
                    };
                }
            }
            let Some(winner) = best else { break };
            let value = runs[winner].pop();
            let start = out.len();
            out.resize(start + T::SIZE, 0);
            value.write_bytes(&mut out[start..]);
            if out.len() >= TRANSFORM_CHUNK * T::SIZE {
                self.file
                    .write_all_at(&out, (out_position * T::SIZE) as u64)?;
                out_position += out.len() / T::SIZE;
                out.clear();
            }
        }
        if !out.is_empty() {
            self.file
                .write_all_at(&out, (out_position * T::SIZE) as u64)?;
        }

        drop(scratch);
        std::fs::remove_file(&scratch_path).ok();
        Ok(())
    }

    fn read_range(&self, start: usize, count: usize) -> Result<Vec<T>> {
        let mut bytes = vec![0u8; count * T::SIZE];
        self.file
            .read_exact_at(&mut bytes, (start * T::SIZE) as u64)?;
        Ok((0..count)
            .map(|i| T::read_bytes(&bytes[i * T::SIZE..(i + 1) * T::SIZE]))
            .collect())
    }

    fn write_range(&mut self, start: usize, values: &[T]) -> Result<()> {
        let mut bytes = vec![0u8; values.len() * T::SIZE];
        for (i, v) in values.iter().enumerate() {
            v.write_bytes(&mut bytes[i * T::SIZE..(i + 1) * T::SIZE]);
        }
        self.file.write_all_at(&bytes, (start * T::SIZE) as u64)?;
        Ok(())
    }
}

/// One spilled run during the merge phase, refilled a block at a time
struct RunCursor<T: Record> {
    /// Next unread record in the scratch file
    next: usize,
    end: usize,
    buffer: Vec<T>,
    buffer_pos: usize,
}

const RUN_BUFFER_RECORDS: usize = 1024;

impl<T: Record> RunCursor<T> {
    fn new(start: usize, end: usize) -> Self {
        RunCursor {
            next: start,
            end,
            buffer: Vec::new(),
            buffer_pos: 0,
        }
    }

    /// Refill the lookahead buffer when it runs dry
    fn fill(&mut self, scratch: &File) -> Result<()> {
        if self.buffer_pos < self.buffer.len() || self.next >= self.end {
            return Ok(());
        }
        let count = RUN_BUFFER_RECORDS.min(self.end - self.next);
        let mut bytes = vec![0u8; count * T::SIZE];
        scratch.read_exact_at(&mut bytes, (self.next * T::SIZE) as u64)?;
        self.buffer = (0..count)
            .map(|i| T::read_bytes(&bytes[i * T::SIZE..(i + 1) * T::SIZE]))
            .collect();
        self.buffer_pos = 0;
        self.next += count;
        Ok(())
    }

    fn peek(&self) -> Option<&T> {
        self.buffer.get(self.buffer_pos)
    }

    fn pop(&mut self) -> T {
        let value = self.buffer[self.buffer_pos].clone();
        self.buffer_pos += 1;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    impl Record for u64 {
        const SIZE: usize = 8;

        fn write_bytes(&self, buf: &mut [u8]) {
            buf.copy_from_slice(&self.to_le_bytes());
        }

        fn read_bytes(buf: &[u8]) -> Self {
            u64::from_le_bytes(buf.try_into().unwrap())
        }
    }

    #[test]
    fn test_push_get_set_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seq.bin");
        let mut seq = Sequence::<u64>::create(&path).unwrap();
        for i in 0..100u64 {
            seq.push_back(&(i * 3)).unwrap();
        }
        assert_eq!(seq.len(), 100);
        assert_eq!(seq.get(40).unwrap(), 120);

        seq.set(40, &7).unwrap();
        assert_eq!(seq.get(40).unwrap(), 7);

        // Positions survive a flush and a reopen
        seq.flush().unwrap();
        drop(seq);
        let seq = Sequence::<u64>::open_read_only(&path).unwrap();
        assert_eq!(seq.len(), 100);
        assert_eq!(seq.get(40).unwrap(), 7);
        assert_eq!(seq.get(99).unwrap(), 297);
    }

    #[test]
    fn test_transform_carries_position() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seq.bin");
        let mut seq = Sequence::<u64>::create(&path).unwrap();
        for _ in 0..10 {
            seq.push_back(&1).unwrap();
        }
        seq.transform(|position, v| *v += position as u64).unwrap();
        assert_eq!(seq.get(0).unwrap(), 1);
        assert_eq!(seq.get(9).unwrap(), 10);
    }

    #[test]
    fn test_sort_in_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seq.bin");
        let mut seq = Sequence::<u64>::create(&path).unwrap();
        for v in [5u64, 3, 9, 1, 7, 1] {
            seq.push_back(&v).unwrap();
        }
        seq.sort_by(|a, b| a.cmp(b)).unwrap();
        let sorted: Vec<u64> = (0..seq.len()).map(|i| seq.get(i).unwrap()).collect();
        assert_eq!(sorted, vec![1, 1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_sort_spills_runs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seq.bin");
        let mut seq = Sequence::<u64>::create(&path).unwrap();
        let n = 10_000u64;
        for i in 0..n {
            // A decimating permutation of 0..n
            seq.push_back(&((i * 7919) % n)).unwrap();
        }
        // Force many runs through the scratch file
        seq.sort_with_run_size(|a, b| a.cmp(b), 64).unwrap();
        for i in 0..n as usize {
            assert_eq!(seq.get(i).unwrap(), i as u64);
        }
        // Scratch file is cleaned up
        assert!(!dir.path().join("seq.sort.tmp").exists());
    }

    #[test]
    fn test_sort_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seq.bin");
        let mut seq = Sequence::<u64>::create(&path).unwrap();
        for v in [4u64, 2, 2, 8] {
            seq.push_back(&v).unwrap();
        }
        seq.sort_by(|a, b| a.cmp(b)).unwrap();
        let first: Vec<u64> = (0..seq.len()).map(|i| seq.get(i).unwrap()).collect();
        seq.sort_by(|a, b| a.cmp(b)).unwrap();
        let second: Vec<u64> = (0..seq.len()).map(|i| seq.get(i).unwrap()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_open_rejects_torn_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seq.bin");
        std::fs::write(&path, [0u8; 12]).unwrap();
        assert!(Sequence::<u64>::open(&path).is_err());
    }
}
