// Copyright (c) The wpt-collector Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable, index-addressed persistence for chunked results sets.
//!
//! A [`ChunkStore`] owns one on-disk directory for the lifetime of a run
//! and stores up to `total_chunks` partial results sets, each addressable
//! by chunk index. Replacement is defensive: a chunk may only be
//! overwritten by a results set that describes strictly more completed
//! tests than what is currently stored, so a failed retry can never
//! regress previously-collected data. Summarization and iteration read one
//! chunk at a time, keeping memory bounded for multi-hour runs.

use crate::{
    errors::{ChunkStoreError, InvalidChunkKey, SummarizeError},
    report::{Summary, SummaryCounts, TestReport, TestResult, ZSTD_LEVEL},
};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use std::{fmt, fs, io::Write};

/// The identity of one chunk within a run: `(index, total)` with
/// `0 < index <= total`.
///
/// All chunk-file naming goes through [`ChunkKey::file_name`]; there is no
/// other path-mapping scheme.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ChunkKey {
    index: u32,
    total: u32,
}

impl ChunkKey {
    /// Creates a key, validating that `index` is within `[1, total]`.
    pub fn new(index: u32, total: u32) -> Result<Self, InvalidChunkKey> {
        if index == 0 || index > total {
            return Err(InvalidChunkKey { index, total });
        }
        Ok(Self { index, total })
    }

    /// The chunk index, counting up from 1.
    pub fn index(self) -> u32 {
        self.index
    }

    /// The total number of chunks in the run.
    pub fn total(self) -> u32 {
        self.total
    }

    /// The file name under which this chunk is committed.
    pub fn file_name(self) -> String {
        format!("{}-of-{}.json", self.index, self.total)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-of-{}", self.index, self.total)
    }
}

/// The identity of one run: the revision under test plus the platform the
/// results were collected on. Concurrent runs must use disjoint store
/// directories, which this key guarantees.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RunKey {
    /// The revision of the test suite under test.
    pub revision: String,
    /// The identifier of the browser/OS combination.
    pub platform_id: String,
}

impl RunKey {
    /// The store directory name for this run.
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.revision, self.platform_id)
    }
}

/// The recoverable outcome of [`ChunkStore::load_chunk`].
///
/// `Insufficient` is a retry signal, not an error: the offered results set
/// did not improve on what is already committed, and the stored chunk was
/// left untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum ChunkLoadOutcome {
    /// The results set was committed, replacing any prior content.
    Committed(TestReport),
    /// The results set did not strictly exceed the committed result count.
    Insufficient {
        /// The number of results currently committed.
        committed: usize,
        /// The number of results in the rejected set.
        offered: usize,
    },
}

impl ChunkLoadOutcome {
    /// Returns true if the results set was committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, ChunkLoadOutcome::Committed(_))
    }
}

/// File-backed storage of up to `total_chunks` partial results sets.
#[derive(Debug)]
pub struct ChunkStore {
    dir: Utf8PathBuf,
    total_chunks: u32,
}

impl ChunkStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<Utf8PathBuf>, total_chunks: u32) -> Result<Self, ChunkStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|error| ChunkStoreError::StoreDirCreate {
            dir: dir.clone(),
            error,
        })?;
        Ok(Self { dir, total_chunks })
    }

    /// Creates a store for `run` under `base_dir`, in the directory named
    /// by [`RunKey::dir_name`].
    pub fn for_run(
        base_dir: &Utf8Path,
        run: &RunKey,
        total_chunks: u32,
    ) -> Result<Self, ChunkStoreError> {
        Self::new(base_dir.join(run.dir_name()), total_chunks)
    }

    /// The directory this store owns.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// The total number of chunks this store was created for.
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Loads a results set for the chunk at `index` from `source`.
    ///
    /// An absent or syntactically invalid source file is interpreted as an
    /// empty results set (the runner's known failure mode). The set is
    /// committed only if its result count strictly exceeds the currently
    /// committed count for this chunk; otherwise the stored chunk is left
    /// unchanged and `Insufficient` is returned.
    pub fn load_chunk(
        &self,
        index: u32,
        source: &Utf8Path,
    ) -> Result<ChunkLoadOutcome, ChunkStoreError> {
        let key = ChunkKey::new(index, self.total_chunks)?;
        let current = self.read_committed(key);
        let offered = TestReport::from_file_lenient(source)?;

        if offered.results.len() <= current.results.len() {
            return Ok(ChunkLoadOutcome::Insufficient {
                committed: current.results.len(),
                offered: offered.results.len(),
            });
        }

        let path = self.chunk_path(key);
        let json = serde_json::to_string(&offered).map_err(ChunkStoreError::Serialize)?;
        fs::write(&path, json).map_err(|error| ChunkStoreError::ChunkWrite { path, error })?;
        Ok(ChunkLoadOutcome::Committed(offered))
    }

    /// Folds every committed result into one [`Summary`].
    ///
    /// Never-committed chunks are tolerated as empty. Fails if zero results
    /// were found in total, or if any test identifier recurs across the
    /// committed chunks.
    pub fn summarize(&self) -> Result<Summary, SummarizeError> {
        let mut summary = Summary::new();
        let mut has_results = false;

        for key in self.keys() {
            let chunk = self.read_committed(key);
            for result in &chunk.results {
                has_results = true;
                let counts = SummaryCounts::of(result);
                if summary.insert(result.test.clone(), counts).is_some() {
                    return Err(SummarizeError::DuplicateTest {
                        test: result.test.clone(),
                        key,
                    });
                }
            }
        }

        if !has_results {
            return Err(SummarizeError::NoResults);
        }
        Ok(summary)
    }

    /// Iterates over every committed [`TestResult`] in ascending
    /// chunk-index order.
    ///
    /// One chunk is read, fully iterated, and released before the next is
    /// touched; the full dataset is never held in memory.
    pub fn each_result(&self) -> EachResult<'_> {
        EachResult {
            store: self,
            next_index: 1,
            current: Vec::new().into_iter(),
        }
    }

    /// The chunk keys for which no results set has been committed.
    pub fn missing_chunks(&self) -> Vec<ChunkKey> {
        self.keys()
            .filter(|key| !self.chunk_path(*key).is_file())
            .collect()
    }

    /// The committed chunk files that exist on disk, in index order.
    pub fn committed_chunk_files(&self) -> Vec<Utf8PathBuf> {
        self.keys()
            .map(|key| self.chunk_path(key))
            .filter(|path| path.is_file())
            .collect()
    }

    /// Writes one zstd-compressed JSON file per committed test result
    /// under `out_dir`, named by the test identifier. Returns the number
    /// of files written.
    pub fn write_result_files(&self, out_dir: &Utf8Path) -> Result<usize, ChunkStoreError> {
        let mut written = 0;
        for result in self.each_result() {
            let relative = result.test.trim_start_matches('/');
            let candidate = Utf8Path::new(relative);
            let escapes = relative.is_empty()
                || candidate.components().any(|component| {
                    !matches!(component, Utf8Component::Normal(_) | Utf8Component::CurDir)
                });
            if escapes {
                return Err(ChunkStoreError::UnsafeTestPath { test: result.test });
            }

            let path = out_dir.join(candidate);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|error| ChunkStoreError::ChunkWrite {
                    path: parent.to_owned(),
                    error,
                })?;
            }
            write_compressed_json(&path, &result)?;
            written += 1;
        }
        Ok(written)
    }

    /// Tears down the store directory. Called after a successful
    /// end-to-end run; on failure the directory is retained for forensic
    /// inspection.
    pub fn remove(self) -> Result<(), ChunkStoreError> {
        fs::remove_dir_all(&self.dir).map_err(|error| ChunkStoreError::StoreDirRemove {
            dir: self.dir,
            error,
        })
    }

    fn keys(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        let total = self.total_chunks;
        (1..=total).map(move |index| ChunkKey { index, total })
    }

    fn chunk_path(&self, key: ChunkKey) -> Utf8PathBuf {
        self.dir.join(key.file_name())
    }

    /// Reads whatever is currently committed for `key`, tolerating a
    /// never-committed or unreadable chunk as empty.
    fn read_committed(&self, key: ChunkKey) -> TestReport {
        TestReport::from_file_lenient(&self.chunk_path(key)).unwrap_or_default()
    }
}

fn write_compressed_json(
    path: &Utf8Path,
    result: &TestResult,
) -> Result<(), ChunkStoreError> {
    let json = serde_json::to_vec(result).map_err(ChunkStoreError::Serialize)?;
    let write_err = |error| ChunkStoreError::ChunkWrite {
        path: path.to_owned(),
        error,
    };
    let file = fs::File::create(path).map_err(write_err)?;
    let mut encoder = zstd::stream::Encoder::new(file, ZSTD_LEVEL).map_err(write_err)?;
    encoder.write_all(&json).map_err(write_err)?;
    encoder.finish().map_err(write_err)?;
    Ok(())
}

/// Iterator returned by [`ChunkStore::each_result`].
#[derive(Debug)]
pub struct EachResult<'store> {
    store: &'store ChunkStore,
    next_index: u32,
    current: std::vec::IntoIter<TestResult>,
}

impl Iterator for EachResult<'_> {
    type Item = TestResult;

    fn next(&mut self) -> Option<TestResult> {
        loop {
            if let Some(result) = self.current.next() {
                return Some(result);
            }
            if self.next_index > self.store.total_chunks {
                return None;
            }
            let key = ChunkKey {
                index: self.next_index,
                total: self.store.total_chunks,
            };
            self.next_index += 1;
            self.current = self.store.read_committed(key).results.into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{SubtestOutcome, SubtestStatus, TestStatus};
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;

    fn subtest(name: &str, status: SubtestStatus, message: Option<&str>) -> SubtestOutcome {
        SubtestOutcome {
            name: name.to_owned(),
            status,
            message: message.map(str::to_owned),
        }
    }

    fn result(test: &str, status: TestStatus, subtests: Vec<SubtestOutcome>) -> TestResult {
        TestResult {
            test: test.to_owned(),
            status,
            message: None,
            subtests,
        }
    }

    fn with_statement() -> TestResult {
        result(
            "/js/with-statement.html",
            TestStatus::Ok,
            vec![
                subtest("first", SubtestStatus::Pass, None),
                subtest("second", SubtestStatus::Fail, Some("bad")),
            ],
        )
    }

    fn is_nan() -> TestResult {
        result(
            "/js/isNaN.html",
            TestStatus::Ok,
            vec![
                subtest("first", SubtestStatus::Pass, None),
                subtest("second", SubtestStatus::Fail, Some("bad")),
                subtest("third", SubtestStatus::Pass, None),
            ],
        )
    }

    fn do_while_statement() -> TestResult {
        result(
            "/js/do-while-statement.html",
            TestStatus::Ok,
            vec![subtest("first", SubtestStatus::Pass, None)],
        )
    }

    fn symbol_unscopables() -> TestResult {
        result("/js/symbol-unscopables.html", TestStatus::Timeout, vec![])
    }

    fn void_statement() -> TestResult {
        result(
            "/js/void-statement.html",
            TestStatus::Ok,
            vec![
                subtest("first", SubtestStatus::Pass, None),
                subtest("second", SubtestStatus::Fail, Some("bad")),
                subtest("third", SubtestStatus::Fail, Some("bad")),
                subtest("fourth", SubtestStatus::Fail, Some("bad")),
            ],
        )
    }

    fn write_report(path: &Utf8Path, results: &[TestResult]) {
        let report = TestReport {
            results: results.to_vec(),
            ..TestReport::default()
        };
        std::fs::write(path, serde_json::to_string(&report).unwrap()).unwrap();
    }

    fn counts(passing: u32, total: u32) -> SummaryCounts {
        SummaryCounts { passing, total }
    }

    #[test]
    fn chunk_key_rejects_out_of_range() {
        ChunkKey::new(0, 3).unwrap_err();
        ChunkKey::new(4, 3).unwrap_err();
        ChunkKey::new(1, 0).unwrap_err();
        assert_eq!(ChunkKey::new(3, 3).unwrap().file_name(), "3-of-3.json");
    }

    #[test]
    fn load_chunk_commits_first_results() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 3).unwrap();
        let source = dir.path().join("foo.json");
        write_report(&source, &[with_statement()]);

        let outcome = store.load_chunk(1, &source).unwrap();
        match outcome {
            ChunkLoadOutcome::Committed(report) => {
                assert_eq!(report.results, vec![with_statement()]);
            }
            other => panic!("expected committed outcome, got {other:?}"),
        }
    }

    #[test]
    fn load_chunk_rejects_empty_results() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 3).unwrap();
        let source = dir.path().join("foo.json");
        write_report(&source, &[]);

        assert_eq!(
            store.load_chunk(1, &source).unwrap(),
            ChunkLoadOutcome::Insufficient {
                committed: 0,
                offered: 0,
            },
        );
    }

    #[test]
    fn load_chunk_rejects_fewer_results() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 3).unwrap();
        let source = dir.path().join("foo.json");
        write_report(&source, &[with_statement(), is_nan()]);
        store.load_chunk(1, &source).unwrap();

        write_report(&source, &[with_statement()]);
        assert_eq!(
            store.load_chunk(1, &source).unwrap(),
            ChunkLoadOutcome::Insufficient {
                committed: 2,
                offered: 1,
            },
        );

        // The stored chunk is unchanged.
        let stored: Vec<_> = store.each_result().collect();
        assert_eq!(stored, vec![with_statement(), is_nan()]);
    }

    #[test]
    fn load_chunk_replaces_with_more_results() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 3).unwrap();
        let source = dir.path().join("foo.json");
        write_report(&source, &[with_statement()]);
        store.load_chunk(1, &source).unwrap();

        write_report(&source, &[do_while_statement(), symbol_unscopables()]);
        let outcome = store.load_chunk(1, &source).unwrap();
        assert!(outcome.is_committed());

        let stored: Vec<_> = store.each_result().collect();
        assert_eq!(stored, vec![do_while_statement(), symbol_unscopables()]);
    }

    #[test]
    fn load_chunk_rejects_out_of_range_index() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 3).unwrap();
        let source = dir.path().join("foo.json");
        write_report(&source, &[with_statement()]);

        for index in [0, 4] {
            match store.load_chunk(index, &source).unwrap_err() {
                ChunkStoreError::InvalidKey(key) => {
                    assert_eq!(key.index, index);
                    assert_eq!(key.total, 3);
                }
                other => panic!("expected InvalidKey, got {other:?}"),
            }
        }
    }

    #[test]
    fn load_chunk_treats_missing_source_as_empty() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 3).unwrap();

        assert_eq!(
            store.load_chunk(1, &dir.path().join("absent.json")).unwrap(),
            ChunkLoadOutcome::Insufficient {
                committed: 0,
                offered: 0,
            },
        );
    }

    #[test]
    fn summarize_one_chunk() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 1).unwrap();
        let source = dir.path().join("bar.json");
        write_report(&source, &[with_statement(), is_nan()]);
        store.load_chunk(1, &source).unwrap();

        let summary = store.summarize().unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary.get("/js/with-statement.html"), Some(counts(2, 3)));
        assert_eq!(summary.get("/js/isNaN.html"), Some(counts(3, 4)));
    }

    #[test]
    fn summarize_many_chunks_complete() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 3).unwrap();
        let sources = [
            dir.path().join("foo.json"),
            dir.path().join("bar.json"),
            dir.path().join("baz.json"),
        ];
        write_report(&sources[0], &[with_statement(), is_nan()]);
        write_report(&sources[1], &[do_while_statement(), symbol_unscopables()]);
        write_report(&sources[2], &[void_statement()]);

        store.load_chunk(1, &sources[0]).unwrap();
        store.load_chunk(2, &sources[1]).unwrap();
        store.load_chunk(3, &sources[2]).unwrap();

        let summary = store.summarize().unwrap();
        assert_eq!(summary.len(), 5);
        assert_eq!(summary.get("/js/with-statement.html"), Some(counts(2, 3)));
        assert_eq!(summary.get("/js/isNaN.html"), Some(counts(3, 4)));
        assert_eq!(summary.get("/js/do-while-statement.html"), Some(counts(2, 2)));
        assert_eq!(summary.get("/js/symbol-unscopables.html"), Some(counts(0, 1)));
        assert_eq!(summary.get("/js/void-statement.html"), Some(counts(2, 5)));
    }

    #[test]
    fn summarize_tolerates_never_committed_chunks() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 3).unwrap();
        let sources = [dir.path().join("foo.json"), dir.path().join("baz.json")];
        write_report(&sources[0], &[with_statement()]);
        write_report(&sources[1], &[void_statement()]);

        store.load_chunk(1, &sources[0]).unwrap();
        store.load_chunk(3, &sources[1]).unwrap();

        let summary = store.summarize().unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary.get("/js/with-statement.html"), Some(counts(2, 3)));
        assert_eq!(summary.get("/js/void-statement.html"), Some(counts(2, 5)));
    }

    #[test]
    fn summarize_zero_results() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 3).unwrap();

        match store.summarize().unwrap_err() {
            SummarizeError::NoResults => {}
            other => panic!("expected NoResults, got {other:?}"),
        }
    }

    #[test]
    fn summarize_rejects_repeated_test() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 2).unwrap();
        let sources = [dir.path().join("foo.json"), dir.path().join("baz.json")];
        write_report(&sources[0], &[with_statement()]);
        write_report(&sources[1], &[void_statement(), with_statement()]);

        store.load_chunk(1, &sources[0]).unwrap();
        store.load_chunk(2, &sources[1]).unwrap();

        match store.summarize().unwrap_err() {
            SummarizeError::DuplicateTest { test, key } => {
                assert_eq!(test, "/js/with-statement.html");
                assert_eq!(key, ChunkKey::new(2, 2).unwrap());
            }
            other => panic!("expected DuplicateTest, got {other:?}"),
        }
    }

    #[test]
    fn each_result_iterates_in_chunk_order() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 3).unwrap();
        let sources = [
            dir.path().join("foo.json"),
            dir.path().join("bar.json"),
            dir.path().join("baz.json"),
        ];
        write_report(&sources[0], &[with_statement(), is_nan()]);
        write_report(&sources[1], &[do_while_statement()]);
        write_report(&sources[2], &[symbol_unscopables(), void_statement()]);

        store.load_chunk(1, &sources[0]).unwrap();
        store.load_chunk(2, &sources[1]).unwrap();
        store.load_chunk(3, &sources[2]).unwrap();

        // Deleting the source files must not affect iteration; the store
        // owns its own copies.
        for source in &sources {
            std::fs::remove_file(source).unwrap();
        }

        let all: Vec<_> = store.each_result().collect();
        assert_eq!(
            all,
            vec![
                with_statement(),
                is_nan(),
                do_while_statement(),
                symbol_unscopables(),
                void_statement(),
            ],
        );

        // The iterator is restartable.
        assert_eq!(store.each_result().count(), 5);
    }

    #[test]
    fn missing_chunks_reports_uncommitted_indices() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 3).unwrap();
        let source = dir.path().join("foo.json");
        write_report(&source, &[with_statement()]);
        store.load_chunk(1, &source).unwrap();
        write_report(&source, &[void_statement()]);
        store.load_chunk(3, &source).unwrap();

        assert_eq!(store.missing_chunks(), vec![ChunkKey::new(2, 3).unwrap()]);
        assert_eq!(
            store.committed_chunk_files(),
            vec![
                store.dir().join("1-of-3.json"),
                store.dir().join("3-of-3.json"),
            ],
        );
    }

    #[test]
    fn write_result_files_one_file_per_test() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 1).unwrap();
        let source = dir.path().join("foo.json");
        write_report(&source, &[with_statement(), is_nan()]);
        store.load_chunk(1, &source).unwrap();

        let out_dir = dir.path().join("results");
        assert_eq!(store.write_result_files(&out_dir).unwrap(), 2);

        let compressed = std::fs::read(out_dir.join("js/with-statement.html")).unwrap();
        let decompressed = zstd::decode_all(&compressed[..]).unwrap();
        let parsed: TestResult = serde_json::from_slice(&decompressed).unwrap();
        assert_eq!(parsed, with_statement());
    }

    #[test]
    fn write_result_files_rejects_escaping_paths() {
        let dir = Utf8TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("store"), 1).unwrap();
        let source = dir.path().join("foo.json");
        write_report(
            &source,
            &[result("/../evil.html", TestStatus::Pass, vec![])],
        );
        store.load_chunk(1, &source).unwrap();

        match store.write_result_files(&dir.path().join("results")).unwrap_err() {
            ChunkStoreError::UnsafeTestPath { test } => assert_eq!(test, "/../evil.html"),
            other => panic!("expected UnsafeTestPath, got {other:?}"),
        }
    }

    #[test]
    fn remove_tears_down_store_dir() {
        let dir = Utf8TempDir::new().unwrap();
        let store_dir = dir.path().join("store");
        let store = ChunkStore::new(store_dir.clone(), 1).unwrap();
        let source = dir.path().join("foo.json");
        write_report(&source, &[with_statement()]);
        store.load_chunk(1, &source).unwrap();

        store.remove().unwrap();
        assert!(!store_dir.exists());
    }
}
