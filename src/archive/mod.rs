//! Reads the client's on-disk content archives: a paged B-tree of directory
//! nodes indexing file records by a 32-bit id, with optional zlib
//! compression on individual payloads (§4.C).

mod router;

pub use router::archives_for;

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use declio::{Decode, Encode};
use flate2::read::ZlibDecoder;

use crate::constants;
use crate::result::{Error, Result};

/// The archive's fixed super block, read with the same `declio`
/// ctx-is-fixed-endian derive the teacher uses for its own on-disk header
/// structs (§4.C).
#[derive(Debug, Clone, Decode, Encode)]
#[declio(ctx_is = "constants::ENDIANESS")]
struct SuperBlock {
    magic: u32,
    #[allow(dead_code)]
    block_size: u32,
    #[declio(with = "declio::util::byte_array")]
    reserved_a: [u8; 24],
    root_node_offset: u32,
    #[declio(with = "declio::util::byte_array")]
    reserved_b: [u8; 16],
    #[allow(dead_code)]
    dat_pack_version: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FileRecord {
    pub index: u32,
    pub flags: u16,
    pub policy: u16,
    pub file_id: u32,
    pub file_offset: u32,
    pub size: u32,
    pub timestamp: u32,
    pub version: u32,
    pub block_size: u32,
}

impl FileRecord {
    pub fn is_compressed(&self) -> bool {
        self.flags & constants::FILE_FLAG_COMPRESSED != 0
    }
}

#[derive(Debug, Default)]
struct DirectoryNode {
    children: Vec<u32>,
    files: Vec<FileRecord>,
}

/// A single content-archive file: a paged B-tree of directory nodes over a
/// flat seekable file (§4.C).
pub struct ArchiveReader<F> {
    file: F,
    root_offset: u32,
    dirs: HashMap<u32, DirectoryNode>,
}

impl ArchiveReader<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(file)
    }
}

impl<F: Read + Seek> ArchiveReader<F> {
    pub fn new(mut file: F) -> Result<Self> {
        file.seek(SeekFrom::Start(constants::ARCHIVE_HEADER_OFFSET))?;
        let sb = SuperBlock::decode((), &mut file)?;
        if sb.magic != constants::ARCHIVE_MAGIC {
            return Err(Error::archive(format!(
                "bad archive magic {:#06x}",
                sb.magic
            )));
        }
        Ok(Self {
            file,
            root_offset: sb.root_node_offset,
            dirs: HashMap::new(),
        })
    }

    fn ensure_dir(&mut self, offset: u32) -> Result<()> {
        if self.dirs.contains_key(&offset) {
            return Ok(());
        }
        let node = self.read_directory(offset)?;
        self.dirs.insert(offset, node);
        Ok(())
    }

    fn read_directory(&mut self, offset: u32) -> Result<DirectoryNode> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        let _num_extra_blocks = read_u32(&mut self.file)?;
        let _legacy = read_u32(&mut self.file)?;

        self.file
            .seek(SeekFrom::Start(offset as u64 + constants::DIR_FILES_COUNT_OFFSET))?;
        let files_count = read_u32(&mut self.file)?;

        self.file.seek(SeekFrom::Start(offset as u64 + 0x8))?;
        let mut children = Vec::new();
        for _ in 0..=files_count {
            let block_size = read_u32(&mut self.file)?;
            let dir_offset = read_u32(&mut self.file)?;
            if block_size != 0 {
                children.push(dir_offset);
            }
        }

        self.file
            .seek(SeekFrom::Start(offset as u64 + constants::DIR_FILE_RECORDS_OFFSET))?;
        let mut files = Vec::with_capacity(files_count as usize);
        for index in 0..files_count {
            let flags = read_u16(&mut self.file)?;
            let policy = read_u16(&mut self.file)?;
            let file_id = read_u32(&mut self.file)?;
            let file_offset = read_u32(&mut self.file)?;
            let size = read_u32(&mut self.file)?;
            let timestamp = read_u32(&mut self.file)?;
            let version = read_u32(&mut self.file)?;
            let block_size = read_u32(&mut self.file)?;
            let mut reserved = [0u8; 4];
            self.file.read_exact(&mut reserved)?;
            files.push(FileRecord {
                index,
                flags,
                policy,
                file_id,
                file_offset,
                size,
                timestamp,
                version,
                block_size,
            });
        }

        Ok(DirectoryNode { children, files })
    }

    /// Binary-searches down the B-tree for the file record with this id.
    pub fn find_file(&mut self, file_id: u32) -> Result<Option<FileRecord>> {
        let mut offset = self.root_offset;
        loop {
            self.ensure_dir(offset)?;
            let node = &self.dirs[&offset];
            let files = &node.files;
            let mut lower = 0i64;
            let mut upper = files.len() as i64 - 1;
            let mut found = None;
            while lower <= upper {
                let mid = (lower + upper) / 2;
                let candidate = &files[mid as usize];
                if candidate.file_id < file_id {
                    lower = mid + 1;
                } else if candidate.file_id > file_id {
                    upper = mid - 1;
                } else {
                    found = Some(*candidate);
                    break;
                }
            }
            if let Some(record) = found {
                return Ok(Some(record));
            }
            let children = node.children.clone();
            if children.is_empty() {
                return Ok(None);
            }
            let next = *children
                .get(lower as usize)
                .ok_or_else(|| Error::archive("directory child index out of range"))?;
            offset = next;
        }
    }

    /// Loads and, if needed, zlib-decompresses a file's payload, following
    /// its extra-block chain and truncating to the record's declared size.
    pub fn load(&mut self, record: &FileRecord) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(record.file_offset as u64))?;
        let num_extra_blocks = read_u32(&mut self.file)?;
        let _legacy = read_u32(&mut self.file)?;

        let max_first_chunk = record
            .block_size
            .saturating_sub(8)
            .saturating_sub(8 * num_extra_blocks);
        let first_chunk_size = max_first_chunk.min(record.size) as usize;

        let mut data = vec![0u8; first_chunk_size];
        self.file.read_exact(&mut data)?;

        let mut links = Vec::with_capacity(num_extra_blocks as usize);
        for _ in 0..num_extra_blocks {
            let size = read_u32(&mut self.file)?;
            let offset = read_u32(&mut self.file)?;
            links.push((size, offset));
        }
        for (size, offset) in links {
            self.file.seek(SeekFrom::Start(offset as u64))?;
            let mut chunk = vec![0u8; size as usize];
            self.file.read_exact(&mut chunk)?;
            data.extend_from_slice(&chunk);
        }

        data.truncate(record.size as usize);

        if record.is_compressed() {
            if data.len() < 4 {
                return Err(Error::archive("compressed entry shorter than its size prefix"));
            }
            let decompressed_size = u32::from_le_bytes(data[..4].try_into().unwrap()) as usize;
            let mut decoder = ZlibDecoder::new(&data[4..]);
            let mut out = Vec::with_capacity(decompressed_size);
            decoder.read_to_end(&mut out)?;
            if out.len() != decompressed_size {
                return Err(Error::archive("decompressed payload size mismatch"));
            }
            Ok(out)
        } else {
            Ok(data)
        }
    }

    pub fn load_by_id(&mut self, file_id: u32) -> Result<Option<Vec<u8>>> {
        match self.find_file(file_id)? {
            Some(record) => Ok(Some(self.load(&record)?)),
            None => Ok(None),
        }
    }
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u16<R: Read>(r: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;

    fn write_super_block(buf: &mut Vec<u8>, root_offset: u32) {
        buf.resize(constants::ARCHIVE_HEADER_OFFSET as usize, 0);
        buf.extend_from_slice(&constants::ARCHIVE_MAGIC.to_le_bytes());
        buf.extend_from_slice(&4096u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 24]);
        buf.extend_from_slice(&root_offset.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&7u32.to_le_bytes());
    }

    fn write_leaf_dir(buf: &mut Vec<u8>, offset: usize, records: &[(u32, u32, u32, bool)]) {
        if buf.len() < offset {
            buf.resize(offset, 0);
        }
        let mut node = vec![0u8; 0x1FC + records.len() * 32];
        node[0..4].copy_from_slice(&0u32.to_le_bytes());
        node[4..8].copy_from_slice(&0u32.to_le_bytes());
        // terminator block_size = 0 already zeroed at +8
        node[0x1F8..0x1FC].copy_from_slice(&(records.len() as u32).to_le_bytes());
        for (i, (file_id, file_offset, size, compressed)) in records.iter().enumerate() {
            let rec_off = 0x1FC + i * 32;
            let flags: u16 = if *compressed { 1 } else { 0 };
            node[rec_off..rec_off + 2].copy_from_slice(&flags.to_le_bytes());
            node[rec_off + 2..rec_off + 4].copy_from_slice(&0u16.to_le_bytes());
            node[rec_off + 4..rec_off + 8].copy_from_slice(&file_id.to_le_bytes());
            node[rec_off + 8..rec_off + 12].copy_from_slice(&file_offset.to_le_bytes());
            node[rec_off + 12..rec_off + 16].copy_from_slice(&size.to_le_bytes());
            node[rec_off + 16..rec_off + 20].copy_from_slice(&0u32.to_le_bytes());
            node[rec_off + 20..rec_off + 24].copy_from_slice(&0u32.to_le_bytes());
            node[rec_off + 24..rec_off + 28].copy_from_slice(&4096u32.to_le_bytes());
        }
        buf.extend_from_slice(&node);
    }

    #[test]
    fn round_trips_an_uncompressed_entry() {
        let mut buf = Vec::new();
        let root_offset = constants::ARCHIVE_HEADER_OFFSET as u32 + 0x200;
        write_super_block(&mut buf, root_offset);

        let payload_offset = root_offset as usize + 0x300;
        write_leaf_dir(
            &mut buf,
            root_offset as usize,
            &[(42, payload_offset as u32, 5, false)],
        );

        if buf.len() < payload_offset {
            buf.resize(payload_offset, 0);
        }
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"hello");

        let mut reader = ArchiveReader::new(Cursor::new(buf)).unwrap();
        let data = reader.load_by_id(42).unwrap().unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn missing_file_id_returns_none() {
        let mut buf = Vec::new();
        let root_offset = constants::ARCHIVE_HEADER_OFFSET as u32 + 0x200;
        write_super_block(&mut buf, root_offset);
        write_leaf_dir(&mut buf, root_offset as usize, &[]);

        let mut reader = ArchiveReader::new(Cursor::new(buf)).unwrap();
        assert!(reader.find_file(1).unwrap().is_none());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = vec![0u8; constants::ARCHIVE_HEADER_OFFSET as usize + 0x68];
        let _ = Write::write(&mut &mut buf[..], &[0u8; 0]);
        assert!(ArchiveReader::new(Cursor::new(buf)).is_err());
    }
}
