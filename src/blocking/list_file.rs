//! Binary domain list files
//!
//! Layout: 2-byte ASCII tag, version byte, little-endian i32 entry count,
//! then one length-prefixed name per entry.

use crate::zone::{Result, ZoneError};
use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, LittleEndian};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const LIST_FILE_VERSION: u8 = 1;

/// Which list a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Allowed,
    Blocked,
}

impl ListKind {
    pub fn tag(self) -> [u8; 2] {
        match self {
            ListKind::Allowed => *b"AZ",
            ListKind::Blocked => *b"BZ",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ListKind::Allowed => "allowed.config",
            ListKind::Blocked => "blocked.config",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ListKind::Allowed => "allowed",
            ListKind::Blocked => "blocked",
        }
    }
}

pub fn write_list<W: Write, S: AsRef<str>>(out: W, kind: ListKind, names: &[S]) -> Result<()> {
    let count = i32::try_from(names.len())
        .map_err(|_| ZoneError::ListFile(format!("too many entries: {}", names.len())))?;

    let mut writer = BitWriter::endian(out, LittleEndian);
    writer.write_bytes(&kind.tag())?;
    writer.write_var::<u8>(8, LIST_FILE_VERSION)?;
    writer.write_var::<u32>(32, count as u32)?;

    for name in names {
        let name = name.as_ref().as_bytes();
        let len = u8::try_from(name.len())
            .map_err(|_| ZoneError::ListFile(format!("entry longer than 255 bytes ({} bytes)", name.len())))?;
        writer.write_var::<u8>(8, len)?;
        writer.write_bytes(name)?;
    }

    writer.into_writer().flush()?;
    Ok(())
}

/// Write the list to `path` through a temporary file so a crash never
/// leaves a truncated list behind
pub fn save_list<S: AsRef<str>>(path: &Path, kind: ListKind, names: &[S]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp = path.with_extension("config.tmp");
    write_list(BufWriter::new(File::create(&temp)?), kind, names)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

/// Streaming reader over the entries of a list file. The header is
/// checked up front; entries are decoded one at a time.
pub struct ListFileReader<R: Read> {
    reader: BitReader<R, LittleEndian>,
    remaining: u32,
}

impl ListFileReader<BufReader<File>> {
    pub fn open(path: &Path, kind: ListKind) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?), kind)
    }
}

impl<R: Read> ListFileReader<R> {
    pub fn new(input: R, kind: ListKind) -> Result<Self> {
        let mut reader = BitReader::endian(input, LittleEndian);

        let mut tag = [0u8; 2];
        reader.read_bytes(&mut tag)?;
        if tag != kind.tag() {
            return Err(ZoneError::ListFile(format!("{} zone file format is invalid", kind.label())));
        }

        let version = reader.read_var::<u8>(8)?;
        if version != LIST_FILE_VERSION {
            return Err(ZoneError::ListFile(format!(
                "{} zone file version {} is not supported",
                kind.label(),
                version
            )));
        }

        let count = reader.read_var::<u32>(32)? as i32;
        if count < 0 {
            return Err(ZoneError::ListFile(format!("negative entry count {}", count)));
        }

        Ok(Self {
            reader,
            remaining: count as u32,
        })
    }

    /// Entries not yet read
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    fn read_entry(&mut self) -> Result<String> {
        let len = self.reader.read_var::<u8>(8)?;
        let mut buf = vec![0; len as usize];
        self.reader.read_bytes(&mut buf)?;
        String::from_utf8(buf).map_err(|_| ZoneError::ListFile("entry is not valid UTF-8".to_string()))
    }
}

impl<R: Read> Iterator for ListFileReader<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let entry = self.read_entry();
        if entry.is_err() {
            self.remaining = 0;
        }
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}
