//! Seed file sharding
//!
//! Splits a newline-delimited seed file into ordered, non-overlapping shard
//! files, one per worker process. Splitting streams the source line by line,
//! so inputs far larger than memory are fine.
//!
//! Shard files are written next to the source as `<source>_00`,
//! `<source>_01`, ... and are left in place after the run.

use crate::error::{ConfigError, RunError};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Chunk size `split_by_linenum` uses when none is given
pub const DEFAULT_MAX_CHUNK_LINES: usize = 30_000_000;

/// One worker's contiguous slice of the seed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    /// Position of this shard in the source order (0-based)
    pub index: usize,

    /// File holding this shard's seeds
    pub path: PathBuf,

    /// Number of seeds (lines) in the shard
    pub len: usize,
}

/// Count the lines of a file without loading it into memory.
///
/// A final line without a trailing newline still counts.
pub fn count_lines(path: &Path) -> io::Result<usize> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::with_capacity(256);
    let mut count = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        count += 1;
    }

    Ok(count)
}

/// Split `source` into `shards` balanced shard files.
///
/// Shard sizes differ by at most one and never exceed `ceil(total / shards)`;
/// earlier shards take the extra lines. A single shard reuses the source file
/// as is.
///
/// Fails with `ConfigError::TooManyShards` when `shards` exceeds the number
/// of lines, before any file is written.
pub fn split(source: &Path, shards: usize) -> Result<Vec<Shard>, RunError> {
    let total = count_lines(source)?;

    if shards == 0 {
        return Err(ConfigError::InvalidProcessCount {
            count: 0,
            max: crate::config::MAX_PROCESSES,
        }
        .into());
    }

    if shards > total {
        return Err(ConfigError::TooManyShards {
            shards,
            seeds: total,
        }
        .into());
    }

    if shards == 1 {
        return Ok(vec![Shard {
            index: 0,
            path: source.to_path_buf(),
            len: total,
        }]);
    }

    debug!(source = %source.display(), total, shards, "Splitting seed file");
    if total % shards == 0 {
        return Ok(split_by_linenum(source, Some(total / shards))?);
    }
    Ok(write_chunks(source, balanced_sizes(total, shards).into_iter())?)
}

/// Split `source` into chunk files of at most `lines_per_chunk` lines each
/// (`DEFAULT_MAX_CHUNK_LINES` if `None`).
///
/// The last chunk holds the remainder. An empty source produces no chunks.
pub fn split_by_linenum(source: &Path, lines_per_chunk: Option<usize>) -> io::Result<Vec<Shard>> {
    let lines_per_chunk = lines_per_chunk.unwrap_or(DEFAULT_MAX_CHUNK_LINES).max(1);
    write_chunks(source, std::iter::repeat(lines_per_chunk))
}

/// Compute `shards` sizes summing to `total`, differing by at most one.
pub fn balanced_sizes(total: usize, shards: usize) -> Vec<usize> {
    if shards == 0 {
        return Vec::new();
    }
    let base = total / shards;
    let extra = total % shards;
    (0..shards)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect()
}

/// Path of the `index`-th chunk file for `source`
pub fn shard_path(source: &Path, index: usize) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(format!("_{:02}", index));
    PathBuf::from(name)
}

/// Stream `source` into consecutive chunk files sized by `plan`.
///
/// Stops at end of input; a chunk is only created once it has a line.
fn write_chunks(source: &Path, plan: impl Iterator<Item = usize>) -> io::Result<Vec<Shard>> {
    let mut reader = BufReader::new(File::open(source)?);
    let mut buf = Vec::with_capacity(256);
    let mut shards = Vec::new();

    'chunks: for (index, size) in plan.enumerate() {
        let mut writer: Option<BufWriter<File>> = None;
        let path = shard_path(source, index);
        let mut written = 0;

        while written < size {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            if writer.is_none() {
                writer = Some(BufWriter::new(File::create(&path)?));
            }
            if let Some(out) = writer.as_mut() {
                out.write_all(&buf)?;
            }
            written += 1;
        }

        match writer {
            Some(mut out) => {
                out.flush()?;
                shards.push(Shard {
                    index,
                    path,
                    len: written,
                });
                if written < size {
                    break 'chunks;
                }
            }
            None => break 'chunks,
        }
    }

    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_seeds(dir: &Path, count: usize) -> PathBuf {
        let path = dir.join("seeds.txt");
        let body: String = (0..count).map(|i| format!("seed-{}\n", i)).collect();
        fs::write(&path, body).unwrap();
        path
    }

    fn read_all(shards: &[Shard]) -> Vec<String> {
        shards
            .iter()
            .flat_map(|s| {
                fs::read_to_string(&s.path)
                    .unwrap()
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn test_count_lines_without_trailing_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.txt");
        fs::write(&path, "a\nb\nc").unwrap();
        assert_eq!(count_lines(&path).unwrap(), 3);

        fs::write(&path, "").unwrap();
        assert_eq!(count_lines(&path).unwrap(), 0);
    }

    #[test]
    fn test_balanced_sizes() {
        assert_eq!(balanced_sizes(10, 3), vec![4, 3, 3]);
        assert_eq!(balanced_sizes(10, 10), vec![1; 10]);
        assert_eq!(balanced_sizes(10, 6), vec![2, 2, 2, 2, 1, 1]);
        for shards in 1..=10 {
            let sizes = balanced_sizes(10, shards);
            assert_eq!(sizes.len(), shards);
            assert_eq!(sizes.iter().sum::<usize>(), 10);
            let ceil = (10 + shards - 1) / shards;
            assert!(sizes.iter().all(|&s| s >= 1 && s <= ceil));
        }
    }

    #[test]
    fn test_split_preserves_order() {
        let dir = tempdir().unwrap();
        let source = write_seeds(dir.path(), 10);

        let shards = split(&source, 3).unwrap();
        let sizes: Vec<usize> = shards.iter().map(|s| s.len).collect();
        assert_eq!(sizes, vec![4, 3, 3]);

        let expected: Vec<String> = (0..10).map(|i| format!("seed-{}", i)).collect();
        assert_eq!(read_all(&shards), expected);
        assert!(shards[0].path.to_string_lossy().ends_with("seeds.txt_00"));
    }

    #[test]
    fn test_split_too_many_shards() {
        let dir = tempdir().unwrap();
        let source = write_seeds(dir.path(), 10);

        let err = split(&source, 11).unwrap_err();
        assert!(matches!(
            err,
            RunError::Config(ConfigError::TooManyShards { shards: 11, seeds: 10 })
        ));
        assert!(!shard_path(&source, 0).exists());
    }

    #[test]
    fn test_split_single_shard_reuses_source() {
        let dir = tempdir().unwrap();
        let source = write_seeds(dir.path(), 5);

        let shards = split(&source, 1).unwrap();
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].path, source);
        assert_eq!(shards[0].len, 5);
    }

    #[test]
    fn test_split_by_linenum_remainder() {
        let dir = tempdir().unwrap();
        let source = write_seeds(dir.path(), 7);

        let shards = split_by_linenum(&source, Some(3)).unwrap();
        let sizes: Vec<usize> = shards.iter().map(|s| s.len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(read_all(&shards).len(), 7);

        // Exact multiple leaves no empty trailing chunk
        let shards = split_by_linenum(&source, Some(7)).unwrap();
        assert_eq!(shards.len(), 1);
        assert!(!shard_path(&source, 1).exists());

        // Default chunk size keeps a small file whole
        let shards = split_by_linenum(&source, None).unwrap();
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].len, 7);
    }

    #[test]
    fn test_split_even_division() {
        let dir = tempdir().unwrap();
        let source = write_seeds(dir.path(), 12);

        let shards = split(&source, 4).unwrap();
        let sizes: Vec<usize> = shards.iter().map(|s| s.len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 3]);
        let expected: Vec<String> = (0..12).map(|i| format!("seed-{}", i)).collect();
        assert_eq!(read_all(&shards), expected);
    }
}
