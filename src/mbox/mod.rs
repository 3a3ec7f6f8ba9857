//! Mbox file format support: tokenizer, rewriter, and the in-memory buffer
//! the sync engine operates against for the duration of one pass.

pub mod format;
pub mod parser;
pub mod rewriter;

pub use format::*;
pub use parser::{MboxParser, Parser, ParsedHeaders, RawMessage};
pub use rewriter::{HeaderRewriter, RewriteRequest, Rewriter};

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::errors::SyncResult;

/// The mbox file, loaded entirely into memory for one sync pass
/// (spec.md §5: the engine reads the whole file up front rather than
/// tracking positional file-descriptor state across the pass; bytes are
/// flushed back in a single write at finalisation).
pub struct MboxFile {
    path: PathBuf,
    buf: Vec<u8>,
    file: File,
}

impl MboxFile {
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(Self { path, buf, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub fn buf_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Replace the bytes in `range` with `replacement`, shifting everything
    /// after it. Used by the space planner's window-flush path when an
    /// in-place rewrite doesn't fit.
    pub fn splice(&mut self, range: std::ops::Range<usize>, replacement: &[u8]) {
        self.buf.splice(range, replacement.iter().copied());
    }

    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Flush the in-memory buffer back to disk: seek to start, write the
    /// whole buffer, truncate to its new length, and fsync (spec.md §4.9
    /// "Finalisation").
    pub fn flush(&mut self) -> SyncResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.buf)?;
        self.file.set_len(self.buf.len() as u64)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Truncate both the in-memory buffer and the on-disk file to zero
    /// bytes (spec.md §7 "disk full writing pseudo message" recovery path).
    pub fn truncate_to_empty(&mut self) -> SyncResult<()> {
        self.buf.clear();
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn raw_file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn open_reads_existing_contents() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"From a@b\nStatus: R\n\nhello\n").unwrap();
        let mbox = MboxFile::open(tmp.path()).unwrap();
        assert_eq!(mbox.buf(), b"From a@b\nStatus: R\n\nhello\n");
    }

    #[test]
    fn flush_writes_back_mutated_buffer() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"From a@b\n\nhello\n").unwrap();
        let mut mbox = MboxFile::open(tmp.path()).unwrap();
        mbox.buf_mut().extend_from_slice(b"more\n");
        mbox.flush().unwrap();

        let mut reread = Vec::new();
        File::open(tmp.path()).unwrap().read_to_end(&mut reread).unwrap();
        assert_eq!(reread, mbox.buf());
    }
}
