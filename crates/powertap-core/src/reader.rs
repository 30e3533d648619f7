//! Tail the sampler output file and recover the newest complete record.
//!
//! The sampler appends one plist document per interval, separated by NUL
//! bytes, while we read. The last document in the file is often still being
//! written, so fragments are tried newest first and a torn one simply falls
//! through to the one before it.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::record::RawRecord;

/// Result of one poll of the output file.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The newest record that decoded and validated.
    Ready(RawRecord),
    /// Nothing to decode yet: missing, unreadable or empty file.
    NotReady,
    /// Fragments were present but none of them decoded.
    DecodeFailure,
}

impl ReadOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Bounded-memory reader over a sampler output file.
#[derive(Debug, Clone, Copy)]
pub struct RecordReader {
    window_bytes: usize,
}

impl RecordReader {
    pub fn new(window_bytes: usize) -> Self {
        Self {
            window_bytes: window_bytes.max(1),
        }
    }

    pub fn window_bytes(&self) -> usize {
        self.window_bytes
    }

    /// Read the trailing window of `path` and return the newest valid record.
    pub fn read_latest(&self, path: &Path) -> ReadOutcome {
        let window = match self.read_window(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::trace!("output file {} not readable: {e}", path.display());
                return ReadOutcome::NotReady;
            }
        };
        latest_from_window(&window)
    }

    fn read_window(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let window = (self.window_bytes as u64).min(len);
        file.seek(SeekFrom::Start(len - window))?;

        let mut buf = Vec::with_capacity(window as usize);
        file.take(window).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Default for RecordReader {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_READ_WINDOW_BYTES)
    }
}

/// Decode the newest complete record out of a NUL-separated byte window.
pub fn latest_from_window(window: &[u8]) -> ReadOutcome {
    let mut saw_fragment = false;

    for fragment in window.split(|&b| b == 0).rev() {
        let fragment = fragment.trim_ascii();
        if fragment.is_empty() {
            continue;
        }
        saw_fragment = true;
        match RawRecord::from_plist_bytes(fragment) {
            Ok(record) => return ReadOutcome::Ready(record),
            Err(e) => log::trace!("skipping fragment of {} bytes: {e}", fragment.len()),
        }
    }

    if saw_fragment {
        log::debug!("no decodable record in {} byte window", window.len());
        ReadOutcome::DecodeFailure
    } else {
        ReadOutcome::NotReady
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::{RecordBuilder, simple_record};

    fn join(fragments: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for f in fragments {
            out.extend_from_slice(f);
            out.push(0);
        }
        out
    }

    fn timestamp(outcome: &ReadOutcome) -> Option<i64> {
        match outcome {
            ReadOutcome::Ready(r) => Some(r.timestamp),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Window scanning
    // -----------------------------------------------------------------------

    #[test]
    fn test_newest_fragment_wins() {
        let window = join(&[&simple_record(1), &simple_record(2), &simple_record(3)]);
        assert_eq!(timestamp(&latest_from_window(&window)), Some(3));
    }

    #[test]
    fn test_torn_tail_falls_back_to_previous() {
        let valid = simple_record(10);
        let next = simple_record(11);
        let torn = &next[..next.len() / 2];

        let mut window = join(&[&valid]);
        window.extend_from_slice(torn);
        assert_eq!(timestamp(&latest_from_window(&window)), Some(10));
    }

    #[test]
    fn test_torn_then_valid_returns_valid() {
        let older = simple_record(20);
        let torn = &older[..older.len() - 40];
        let window = join(&[torn, &simple_record(21)]);
        assert_eq!(timestamp(&latest_from_window(&window)), Some(21));
    }

    #[test]
    fn test_only_corrupt_fragments() {
        let rec = simple_record(5);
        let window = join(&[&rec[..30], b"garbage"]);
        assert_eq!(latest_from_window(&window), ReadOutcome::DecodeFailure);
        assert!(!latest_from_window(&window).is_ready());
    }

    #[test]
    fn test_fragment_without_clusters_is_skipped() {
        let empty = RecordBuilder::new(99).to_xml();
        let window = join(&[&simple_record(98), &empty]);
        assert_eq!(timestamp(&latest_from_window(&window)), Some(98));
    }

    #[test]
    fn test_whitespace_only_window_is_not_ready() {
        assert_eq!(latest_from_window(b""), ReadOutcome::NotReady);
        assert_eq!(latest_from_window(b"\0\n\0  \0"), ReadOutcome::NotReady);
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let mut window = b"\n\n".to_vec();
        window.extend_from_slice(&simple_record(7));
        window.extend_from_slice(b"\n  \0\n");
        assert_eq!(timestamp(&latest_from_window(&window)), Some(7));
    }

    // -----------------------------------------------------------------------
    // File access
    // -----------------------------------------------------------------------

    #[test]
    fn test_missing_file_is_not_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let reader = RecordReader::default();
        assert_eq!(
            reader.read_latest(&tmp.path().join("absent")),
            ReadOutcome::NotReady
        );
    }

    #[test]
    fn test_empty_file_is_not_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(RecordReader::default().read_latest(&path), ReadOutcome::NotReady);
    }

    #[test]
    fn test_window_only_reads_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out");
        let newest = simple_record(3);

        // Fill the head with junk that would fail to decode if it were read.
        let mut contents = vec![b'x'; 200_000];
        contents.push(0);
        contents.extend_from_slice(&join(&[&simple_record(2), &newest]));
        std::fs::write(&path, &contents).unwrap();

        let reader = RecordReader::new(newest.len() + 8);
        assert_eq!(timestamp(&reader.read_latest(&path)), Some(3));
    }

    #[test]
    fn test_window_cutting_record_in_half() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out");
        let only = simple_record(1);
        std::fs::write(&path, join(&[&only])).unwrap();

        // The window starts mid-document, so the only fragment is torn.
        let reader = RecordReader::new(only.len() / 2);
        assert_eq!(reader.read_latest(&path), ReadOutcome::DecodeFailure);
    }
}
