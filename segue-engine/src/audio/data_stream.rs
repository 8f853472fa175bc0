//! Byte-level sources consumed by decoders
//!
//! The engine itself never reads bytes; decoders do, through this trait so
//! that non-file sources can be plugged in without touching decoding.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

/// Readable, seekable byte source for one uri
pub trait DataStream: Read + Seek + Send + Sync {
    fn uri(&self) -> &str;

    /// Total length in bytes, if known
    fn length(&self) -> Option<u64>;

    fn is_seekable(&self) -> bool {
        true
    }
}

/// Local file source
#[derive(Debug)]
pub struct FileDataStream {
    uri: String,
    file: File,
    length: Option<u64>,
}

impl FileDataStream {
    pub fn open(uri: &str) -> Result<Self> {
        let path = uri_to_path(uri);
        let file = File::open(&path)
            .map_err(|e| Error::Open(format!("Failed to open file {}: {}", path.display(), e)))?;
        let length = file.metadata().ok().map(|m| m.len());
        Ok(Self {
            uri: uri.to_string(),
            file,
            length,
        })
    }
}

impl Read for FileDataStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileDataStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

impl DataStream for FileDataStream {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn length(&self) -> Option<u64> {
        self.length
    }
}

/// Open the data stream for a uri
///
/// Plain paths and `file://` uris are supported.
pub fn open_data_stream(uri: &str) -> Result<Box<dyn DataStream>> {
    Ok(Box::new(FileDataStream::open(uri)?))
}

/// Filesystem path for a plain path or `file://` uri
pub fn uri_to_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

/// Lowercased file extension of a uri
pub fn uri_extension(uri: &str) -> Option<String> {
    uri_to_path(uri)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_uri_to_path() {
        assert_eq!(uri_to_path("file:///music/a.flac"), PathBuf::from("/music/a.flac"));
        assert_eq!(uri_to_path("/music/b.mp3"), PathBuf::from("/music/b.mp3"));
    }

    #[test]
    fn test_uri_extension() {
        assert_eq!(uri_extension("file:///x/Song.FLAC").as_deref(), Some("flac"));
        assert_eq!(uri_extension("/x/noext"), None);
    }

    #[test]
    fn test_file_stream_reads_and_seeks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        let uri = file.path().to_str().unwrap().to_string();

        let mut stream = open_data_stream(&uri).unwrap();
        assert_eq!(stream.length(), Some(10));
        assert_eq!(stream.uri(), uri);

        stream.seek(SeekFrom::Start(6)).unwrap();
        let mut rest = String::new();
        stream.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "6789");
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let err = FileDataStream::open("/definitely/not/here.wav").unwrap_err();
        assert!(matches!(err, Error::Open(_)));
    }
}
