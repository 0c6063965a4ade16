// SPDX-License-Identifier: Apache-2.0

//! Source tailers. File mode polls a growing file from the last
//! committed offset and detects rotation; command mode streams the
//! stdout of a long-running subprocess.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{info, warn};

use crate::offset::OffsetStore;

/// One poll never reads more than this many bytes; the remainder is
/// picked up by the next poll. Keeps memory bounded when the tailer
/// first encounters a large pre-existing log.
const MAX_READ_CHUNK_BYTES: u64 = 8 * 1024 * 1024;

/// Complete lines read by one poll, plus the offset just past the last
/// complete line.
#[derive(Debug)]
pub struct LineBatch {
    pub lines: Vec<String>,
    pub next_offset: u64,
}

pub struct FileTailer {
    path: PathBuf,
    offset: u64,
    store: OffsetStore,
    chunk_size: u64,
}

impl FileTailer {
    /// Seeds the in-memory offset from the store; a fresh source starts
    /// at 0.
    pub fn new(path: PathBuf, store: OffsetStore) -> Self {
        let offset = store.load(&path);
        FileTailer {
            path,
            offset,
            store,
            chunk_size: MAX_READ_CHUNK_BYTES,
        }
    }

    #[cfg(test)]
    fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads bytes appended since the last committed offset and splits
    /// them into complete lines. At most one chunk is read per poll;
    /// a backlog larger than the chunk drains over successive polls.
    /// A trailing line not yet terminated by a newline stays unread
    /// until a later poll. A file smaller than the offset means
    /// rotation or truncation: the offset resets to 0 and reading
    /// restarts from the top of the new file.
    pub async fn read_new_lines(&mut self) -> std::io::Result<LineBatch> {
        let metadata = fs::metadata(&self.path).await?;
        let size = metadata.len();

        if size < self.offset {
            info!(
                path = %self.path.display(),
                previous_offset = self.offset,
                current_size = size,
                "file shrank; assuming rotation and restarting from the top"
            );
            self.offset = 0;
        }

        if size == self.offset {
            return Ok(LineBatch {
                lines: Vec::new(),
                next_offset: self.offset,
            });
        }

        let read_end = size.min(self.offset + self.chunk_size);
        let mut file = fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::with_capacity((read_end - self.offset) as usize);
        file.take(read_end - self.offset)
            .read_to_end(&mut buf)
            .await?;

        let mut lines = Vec::new();
        let mut start = 0usize;
        let mut consumed = 0usize;
        for (i, byte) in buf.iter().enumerate() {
            if *byte == b'\n' {
                lines.push(String::from_utf8_lossy(&buf[start..i]).into_owned());
                start = i + 1;
                consumed = start;
            }
        }

        // A single line longer than the chunk would otherwise pin the
        // offset forever. Ship the chunk as a fragment and move on.
        if consumed == 0 && read_end < size {
            warn!(
                path = %self.path.display(),
                offset = self.offset,
                chunk = buf.len(),
                "line exceeds the per-poll read limit; shipping it in fragments"
            );
            consumed = buf.len();
            lines.push(String::from_utf8_lossy(&buf).into_owned());
        }

        Ok(LineBatch {
            lines,
            next_offset: self.offset + consumed as u64,
        })
    }

    /// Advances the committed offset once the batch has been handed to
    /// delivery. A failed state write is logged; the next commit writes
    /// the newer value anyway.
    pub fn commit(&mut self, next_offset: u64) {
        self.offset = next_offset;
        if let Err(e) = self.store.save(&self.path, next_offset) {
            warn!(
                path = %self.path.display(),
                "failed to persist offset {next_offset}: {e}"
            );
        }
    }
}

/// Spawns a long-running command whose stdout is treated as a log
/// stream. The command is split on whitespace; quoting is not
/// supported.
pub fn spawn_command(command: &str) -> std::io::Result<(Child, Lines<BufReader<ChildStdout>>)> {
    let mut parts = command.split_whitespace();
    let program = parts.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line")
    })?;
    let mut child = Command::new(program)
        .args(parts)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("child stdout was not captured"))?;
    Ok((child, BufReader::new(stdout).lines()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store(dir: &tempfile::TempDir) -> OffsetStore {
        OffsetStore::new(dir.path().join("state")).unwrap()
    }

    #[tokio::test]
    async fn yields_appended_lines_exactly_once_with_matching_offset() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        std::fs::write(&log, "one\ntwo\n").unwrap();

        let mut tailer = FileTailer::new(log.clone(), store(&dir));
        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines, vec!["one", "two"]);
        assert_eq!(batch.next_offset, 8);
        tailer.commit(batch.next_offset);

        // Nothing new: no lines, offset unchanged.
        let batch = tailer.read_new_lines().await.unwrap();
        assert!(batch.lines.is_empty());
        assert_eq!(batch.next_offset, 8);

        let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        file.write_all(b"three\n").unwrap();
        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines, vec!["three"]);
        assert_eq!(batch.next_offset, 14);
    }

    #[tokio::test]
    async fn trailing_partial_line_stays_unread() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        std::fs::write(&log, "done\nhalf").unwrap();

        let mut tailer = FileTailer::new(log.clone(), store(&dir));
        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines, vec!["done"]);
        assert_eq!(batch.next_offset, 5);
        tailer.commit(batch.next_offset);

        // The partial line completes on a later poll.
        let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        file.write_all(b"-line\n").unwrap();
        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines, vec!["half-line"]);
    }

    #[tokio::test]
    async fn shrunk_file_resets_offset_and_reads_from_the_top() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        std::fs::write(&log, "old line one\nold line two\n").unwrap();

        let mut tailer = FileTailer::new(log.clone(), store(&dir));
        let batch = tailer.read_new_lines().await.unwrap();
        tailer.commit(batch.next_offset);

        // Rotation: replaced by a smaller file.
        std::fs::write(&log, "fresh\n").unwrap();
        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines, vec!["fresh"]);
        assert_eq!(batch.next_offset, 6);
    }

    #[tokio::test]
    async fn restart_resumes_from_persisted_offset_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        std::fs::write(&log, "before restart\n").unwrap();
        let store = store(&dir);

        let mut tailer = FileTailer::new(log.clone(), store.clone());
        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines.len(), 1);
        tailer.commit(batch.next_offset);
        drop(tailer);

        let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        file.write_all(b"after restart\n").unwrap();

        let mut tailer = FileTailer::new(log.clone(), store);
        assert_eq!(tailer.offset(), 15);
        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines, vec!["after restart"]);
    }

    #[tokio::test]
    async fn backlog_larger_than_the_chunk_drains_over_polls() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        std::fs::write(&log, "one\ntwo\nthree\n").unwrap();

        let mut tailer = FileTailer::new(log.clone(), store(&dir)).with_chunk_size(8);

        // First poll stops at the chunk boundary; "three" is not yet
        // terminated within the chunk.
        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines, vec!["one", "two"]);
        assert_eq!(batch.next_offset, 8);
        tailer.commit(batch.next_offset);

        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines, vec!["three"]);
        assert_eq!(batch.next_offset, 14);
        tailer.commit(batch.next_offset);

        let batch = tailer.read_new_lines().await.unwrap();
        assert!(batch.lines.is_empty());
    }

    #[tokio::test]
    async fn oversized_line_ships_in_fragments_without_stalling() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        std::fs::write(&log, "abcdefghij\nnxt\n").unwrap();

        let mut tailer = FileTailer::new(log.clone(), store(&dir)).with_chunk_size(4);

        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines, vec!["abcd"]);
        assert_eq!(batch.next_offset, 4);
        tailer.commit(batch.next_offset);

        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines, vec!["efgh"]);
        tailer.commit(batch.next_offset);

        // The tail of the long line ends within the chunk, so it is a
        // normal complete line again.
        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines, vec!["ij"]);
        assert_eq!(batch.next_offset, 11);
        tailer.commit(batch.next_offset);

        let batch = tailer.read_new_lines().await.unwrap();
        assert_eq!(batch.lines, vec!["nxt"]);
        assert_eq!(batch.next_offset, 15);
    }

    #[tokio::test]
    async fn missing_file_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let mut tailer = FileTailer::new(dir.path().join("absent.log"), store(&dir));
        assert!(tailer.read_new_lines().await.is_err());
    }

    #[tokio::test]
    async fn spawn_command_streams_stdout_lines() {
        let (mut child, mut lines) = spawn_command("/bin/echo streamed").unwrap();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("streamed"));
        assert_eq!(lines.next_line().await.unwrap(), None);
        let _ = child.wait().await;
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(spawn_command("   ").is_err());
    }
}
