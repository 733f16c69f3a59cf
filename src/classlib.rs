//! The class library resource: class definitions, their attribute schemas,
//! and parent links, read as a sequence of magic-prefixed chunks after a
//! small fixed header (§4.G).

use std::collections::HashMap;
use std::io::{Cursor, Read};

use crate::hash::NameCache;
use crate::reader::BinaryReader;
use crate::result::{Error, Result};

/// Every chunk is wrapped in this four-byte sentinel before its
/// `{chunk_type, size}` header.
const CHUNK_MAGIC: u32 = (-19131852i32) as u32;

const CHUNK_BYTECODE: u32 = 1;
const CHUNK_MESSAGES: u32 = 2;
const CHUNK_CLASS_DEFS: u32 = 16;
const CHUNK_UNKNOWN: u32 = 64;
const CHUNK_CLASS_VARS: u32 = 512;
const CHUNK_PARENTS_MAP: u32 = 1024;

/// A single attribute declared on a class: its hashed name, its position
/// in the class's attribute list, and its wire value type (§4.G, §4.J).
#[derive(Debug, Clone)]
pub struct ClassAttribute {
    pub name_hash: u32,
    pub name: String,
    pub index: u16,
    pub value_type: u8,
}

#[derive(Debug, Clone, Default)]
pub struct ClassInfo {
    pub index: u32,
    pub name: String,
    pub parent_index: Option<u32>,
    pub attributes: Vec<ClassAttribute>,
}

/// The decoded class library: class index -> name/parent/attribute schema,
/// plus a variable-name hash cache shared across every class (§4.G).
#[derive(Debug, Default)]
pub struct ClassLibrary {
    classes: HashMap<u32, ClassInfo>,
    names: NameCache,
    /// Positional order classes were declared in, `None` for an
    /// undefined slot — `ParentsMap` indexes into this list, not into
    /// `classes` directly (§4.G).
    order: Vec<Option<u32>>,
}

impl ClassLibrary {
    pub fn get(&self, index: u32) -> Option<&ClassInfo> {
        self.classes.get(&index)
    }

    pub fn name_for_hash(&self, hash: u32) -> String {
        self.names.get_or_hex(hash)
    }

    /// Decodes a class library resource. Class names aren't present in the
    /// stream at all — they come from `class_names`, a static
    /// `class_index -> name` table built once and handed in (§4.G).
    pub fn decode<R: Read>(bytes: R, class_names: &HashMap<u32, String>) -> Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        let _did = reader.u32()?;
        let stop_code = reader.u32()?;
        reader.skip(8)?; // two reserved u32 fields

        let mut library = Self::default();
        loop {
            let four_cc = match reader.u32() {
                Ok(v) => v,
                Err(_) => break,
            };
            if four_cc == CHUNK_MAGIC {
                let chunk_type = reader.u32()?;
                let size = reader.u32()?;
                let chunk = reader.bytes(size as usize)?;
                let mut chunk_reader = BinaryReader::new(Cursor::new(chunk));
                match chunk_type {
                    CHUNK_CLASS_DEFS => library.decode_class_defs(&mut chunk_reader, class_names)?,
                    CHUNK_CLASS_VARS => library.decode_class_vars(&mut chunk_reader)?,
                    CHUNK_PARENTS_MAP => library.decode_parents_map(&mut chunk_reader)?,
                    CHUNK_BYTECODE | CHUNK_MESSAGES | CHUNK_UNKNOWN => {}
                    other => return Err(Error::decode(format!("unknown class library chunk type {other}"))),
                }
            } else if four_cc == stop_code {
                let marker = reader.i8()?;
                if marker != 1 {
                    return Err(Error::decode("class library stop marker missing its trailing 1 byte"));
                }
                break;
            } else {
                return Err(Error::decode(format!(
                    "unexpected class library chunk four-cc {four_cc:#010x}"
                )));
            }
        }
        Ok(library)
    }

    fn decode_class_defs(
        &mut self,
        reader: &mut BinaryReader<Cursor<Vec<u8>>>,
        class_names: &HashMap<u32, String>,
    ) -> Result<()> {
        let count = reader.vle()?;
        for _ in 0..count {
            if !reader.bool()? {
                self.order.push(None);
                continue;
            }
            let class_index = Self::decode_class_def(reader)?;
            let name = class_names
                .get(&class_index)
                .cloned()
                .unwrap_or_else(|| class_index.to_string());
            self.names.insert(&name);
            self.classes.entry(class_index).or_insert_with(|| ClassInfo {
                index: class_index,
                name,
                ..Default::default()
            });
            self.order.push(Some(class_index));
        }
        Ok(())
    }

    /// Reads one class definition: its index, a raw default-value pair
    /// table, and three reference/offset tables whose contents this crate
    /// has no current consumer for (§4.G).
    fn decode_class_def(reader: &mut BinaryReader<Cursor<Vec<u8>>>) -> Result<u32> {
        let class_index = reader.u16()? as u32;
        let pair_count = reader.u16()?;
        let _raw_size = reader.u32()?;

        for _ in 0..pair_count {
            reader.u32()?; // default value
            reader.u32()?;
        }
        let num_references = reader.vle()?;
        for _ in 0..num_references {
            reader.u16()?;
        }
        let num_offsets = reader.vle()?;
        for _ in 0..num_offsets {
            reader.u32()?;
        }
        let num_offset_indices = reader.vle()?;
        for _ in 0..num_offset_indices {
            reader.u16()?;
        }
        Ok(class_index)
    }

    fn decode_class_vars(&mut self, reader: &mut BinaryReader<Cursor<Vec<u8>>>) -> Result<()> {
        let num_classes = reader.tsize()?;
        for _ in 0..num_classes {
            let class_index = reader.u32()?;
            let num_vars = reader.tsize()?;
            let mut attributes = Vec::with_capacity(num_vars as usize);
            for _ in 0..num_vars {
                let name_hash = reader.u32()?;
                let index = reader.u16()?;
                let value_type = reader.u8()?;
                attributes.push(ClassAttribute {
                    name_hash,
                    name: self.names.get_or_hex(name_hash),
                    index,
                    value_type,
                });
            }
            let entry = self
                .classes
                .get_mut(&class_index)
                .ok_or_else(|| Error::decode(format!("class vars for undeclared class index {class_index:#010x}")))?;
            entry.attributes = attributes;
        }
        Ok(())
    }

    fn decode_parents_map(&mut self, reader: &mut BinaryReader<Cursor<Vec<u8>>>) -> Result<()> {
        let count = reader.u32()?;
        let mut parents = Vec::with_capacity(count as usize);
        for _ in 0..count {
            parents.push(reader.u32()?);
        }
        if parents.len() != self.order.len() {
            return Err(Error::decode("parents map length does not match declared class count"));
        }
        for (position, parent_index) in parents.into_iter().enumerate() {
            if parent_index == 0 {
                continue;
            }
            if let Some(class_index) = self.order[position] {
                if let Some(entry) = self.classes.get_mut(&class_index) {
                    entry.parent_index = Some(parent_index);
                }
            }
        }
        Ok(())
    }
}

/// The static `class_index -> name` table the real client ships as a data
/// file (`PackageNames.json`) rather than in the resource stream itself.
/// That file isn't part of this retrieval pack, so this seeds the handful
/// of class indices the rest of this crate's sub-loader dispatch already
/// names explicitly; an embedding application can build a fuller table the
/// same way and pass it to `ClassLibrary::decode` directly (§4.G).
pub fn known_class_names() -> HashMap<u32, String> {
    let mut names = HashMap::new();
    for (index, name) in [
        (11u32, "AAHash"),
        (35, "AAHash_Ref"),
        (39, "BaseProperty"),
        (57, "DynamicBitset"),
        (160, "Position"),
        (166, "Properties"),
        (199, "StringInfo"),
        (225, "String"),
    ] {
        names.insert(index, name.to_string());
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(marker: u32, body: Vec<u8>) -> Vec<u8> {
        let mut out = CHUNK_MAGIC.to_le_bytes().to_vec();
        out.extend_from_slice(&marker.to_le_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn decodes_class_defs_and_parents() {
        let mut defs_body = vec![1u8]; // vle count: 1
        defs_body.push(1); // is_defined
        defs_body.extend_from_slice(&7u16.to_le_bytes()); // class_index
        defs_body.extend_from_slice(&0u16.to_le_bytes()); // pair_count
        defs_body.extend_from_slice(&0u32.to_le_bytes()); // raw_size
        defs_body.push(0); // num_references (vle)
        defs_body.push(0); // num_offsets (vle)
        defs_body.push(0); // num_offset_indices (vle)

        let mut parents_body = vec![];
        parents_body.extend_from_slice(&1u32.to_le_bytes()); // count
        parents_body.extend_from_slice(&0u32.to_le_bytes()); // no parent

        let stop_code = 0xAAu32;
        let mut bytes = vec![];
        bytes.extend_from_slice(&0x56000000u32.to_le_bytes()); // did
        bytes.extend_from_slice(&stop_code.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.extend_from_slice(&chunk(CHUNK_CLASS_DEFS, defs_body));
        bytes.extend_from_slice(&chunk(CHUNK_PARENTS_MAP, parents_body));
        bytes.extend_from_slice(&stop_code.to_le_bytes());
        bytes.push(1);

        let mut names = HashMap::new();
        names.insert(7, "Creature".to_string());

        let library = ClassLibrary::decode(Cursor::new(bytes), &names).unwrap();
        let info = library.get(7).unwrap();
        assert_eq!(info.name, "Creature");
        assert!(info.parent_index.is_none());
    }

    #[test]
    fn decodes_class_vars() {
        let mut defs_body = vec![1u8, 1];
        defs_body.extend_from_slice(&3u16.to_le_bytes());
        defs_body.extend_from_slice(&0u16.to_le_bytes());
        defs_body.extend_from_slice(&0u32.to_le_bytes());
        defs_body.extend_from_slice(&[0u8; 3]);

        let mut vars_body = vec![0u8, 1]; // tsize: bucket 0, count 1
        vars_body.extend_from_slice(&3u32.to_le_bytes()); // class_index
        vars_body.extend_from_slice(&[0u8, 1]); // tsize: bucket 0, count 1
        vars_body.extend_from_slice(&0xDEADBEEFu32.to_le_bytes()); // name hash
        vars_body.extend_from_slice(&0u16.to_le_bytes()); // index
        vars_body.push(2); // value type

        let stop_code = 0xAAu32;
        let mut bytes = vec![];
        bytes.extend_from_slice(&0x56000000u32.to_le_bytes());
        bytes.extend_from_slice(&stop_code.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.extend_from_slice(&chunk(CHUNK_CLASS_DEFS, defs_body));
        bytes.extend_from_slice(&chunk(CHUNK_CLASS_VARS, vars_body));
        bytes.extend_from_slice(&stop_code.to_le_bytes());
        bytes.push(1);

        let library = ClassLibrary::decode(Cursor::new(bytes), &HashMap::new()).unwrap();
        let info = library.get(3).unwrap();
        assert_eq!(info.attributes.len(), 1);
        assert_eq!(info.attributes[0].value_type, 2);
    }
}
