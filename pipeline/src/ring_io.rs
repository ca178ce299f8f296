//! File backed ring-item streams and the URI dispatch that picks a
//! concrete reader/writer.  Shared-memory ring buffers are an external
//! collaborator; asking for one here is a configuration error.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use common::error::{Error, Result};
use common::ringitem::io::{RingItemReader, RingItemWriter};
use common::ringitem::HEADER_SIZE;

/// Guard against a torn size word claiming gigabytes.
const MAX_ITEM_SIZE: usize = 64 * 1024 * 1024;

pub struct FileItemReader {
    reader: BufReader<File>,
}

impl FileItemReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FileItemReader> {
        Ok(FileItemReader {
            reader: BufReader::new(File::open(path)?),
        })
    }
}

impl RingItemReader for FileItemReader {
    fn read_item(&mut self) -> Result<Option<Vec<u8>>> {
        let mut size_word = [0u8; 4];
        // End of file on an item boundary is the normal end of stream.
        match self.reader.read_exact(&mut size_word) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let size = LittleEndian::read_u32(&size_word) as usize;
        if size < HEADER_SIZE + 4 || size > MAX_ITEM_SIZE {
            return Err(Error::CorruptRecord(format!(
                "ring item claims {} bytes",
                size
            )));
        }
        let mut item = vec![0u8; size];
        item[..4].copy_from_slice(&size_word);
        self.reader.read_exact(&mut item[4..])?;
        Ok(Some(item))
    }
}

pub struct FileItemWriter {
    writer: BufWriter<File>,
}

impl FileItemWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<FileItemWriter> {
        Ok(FileItemWriter {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl RingItemWriter for FileItemWriter {
    fn put_item(&mut self, item: &[u8]) -> Result<()> {
        self.writer.write_all(item)?;
        Ok(())
    }
}

impl Drop for FileItemWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

fn split_uri(uri: &str) -> (&str, &str) {
    match uri.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("file", uri),
    }
}

/// Opens the consumer side of a ring-item stream URI.
pub fn open_source(uri: &str) -> Result<Box<dyn RingItemReader + Send>> {
    match split_uri(uri) {
        ("file", path) => Ok(Box::new(FileItemReader::open(path)?)),
        (scheme, _) => Err(Error::Config(format!(
            "no ring item source for scheme '{}'",
            scheme
        ))),
    }
}

/// Opens the producer side of a ring-item stream URI.
pub fn open_sink(uri: &str) -> Result<Box<dyn RingItemWriter + Send>> {
    match split_uri(uri) {
        ("file", path) => Ok(Box::new(FileItemWriter::create(path)?)),
        (scheme, _) => Err(Error::Config(format!(
            "no ring item sink for scheme '{}'",
            scheme
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ringitem::{RingItemBuilder, BEGIN_RUN, PHYSICS_EVENT};

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("ringflow-{}-{}", std::process::id(), name));
        p
    }

    #[test]
    fn file_round_trip() {
        let path = temp_path("roundtrip.evt");
        let items = vec![
            RingItemBuilder::new(BEGIN_RUN).body_header(1, 2, 1).build(),
            RingItemBuilder::new(PHYSICS_EVENT)
                .body_header(5, 2, 0)
                .u32(99)
                .build(),
        ];
        {
            let mut w = FileItemWriter::create(&path).unwrap();
            for i in &items {
                w.put_item(i).unwrap();
            }
        }
        let mut r = FileItemReader::open(&path).unwrap();
        assert_eq!(r.read_item().unwrap().unwrap(), items[0]);
        assert_eq!(r.read_item().unwrap().unwrap(), items[1]);
        assert!(r.read_item().unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let path = temp_path("truncated.evt");
        std::fs::write(&path, [3u8, 0, 0]).unwrap();
        let mut r = FileItemReader::open(&path).unwrap();
        assert!(r.read_item().unwrap().is_none()); // short size word = EOF
        std::fs::write(&path, 2u32.to_le_bytes()).unwrap();
        let mut r = FileItemReader::open(&path).unwrap();
        assert!(r.read_item().is_err()); // nonsense size
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unknown_scheme_is_a_config_error() {
        assert!(matches!(open_source("tcp://ringhost/a"), Err(Error::Config(_))));
        assert!(matches!(open_sink("ring://local/b"), Err(Error::Config(_))));
    }
}
