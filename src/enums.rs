//! Enum tables: named labels attached to integer keys, with optional
//! base-table inheritance and an optional localized `StringInfo` per entry
//! (§4.F).

use std::collections::HashMap;
use std::io::Read;

use crate::hash::bootstrap_known_variables;
use crate::reader::BinaryReader;
use crate::result::Result;
use crate::strings::{decode_string_info, StringInfo};

#[derive(Debug, Clone)]
pub struct EnumTable {
    pub did: u32,
    pub base_did: u32,
    labels: HashMap<u32, String>,
    string_infos: HashMap<u32, StringInfo>,
}

impl EnumTable {
    /// Looks up a key's label, falling back to the base table when this one
    /// doesn't override it (§4.F).
    pub fn label<'a>(&'a self, key: u32, resolve_base: impl Fn(u32) -> Option<&'a EnumTable>) -> Option<&'a str> {
        if let Some(label) = self.labels.get(&key) {
            return Some(label.as_str());
        }
        if self.base_did != 0 {
            if let Some(base) = resolve_base(self.base_did) {
                return base.label(key, resolve_base);
            }
        }
        None
    }

    pub fn string_info(&self, key: u32) -> Option<&StringInfo> {
        self.string_infos.get(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.labels.keys().copied()
    }
}

/// Decodes one enum-table resource: `{did, base_did, tsize raw entries,
/// tsize string-info entries}` (§4.F).
pub fn decode_enum_table<R: Read>(bytes: R) -> Result<EnumTable> {
    let mut reader = BinaryReader::new(bytes);
    let did = reader.u32()?;
    let base_did = reader.u32()?;

    let mut labels = HashMap::new();
    let num_raw = reader.tsize()?;
    for _ in 0..num_raw {
        let key = reader.u32()?;
        let label = reader.pascal_string()?;
        labels.insert(key, label);
    }

    let names = bootstrap_known_variables();
    let mut string_infos = HashMap::new();
    let num_string_infos = reader.tsize()?;
    for _ in 0..num_string_infos {
        let key = reader.u32()?;
        let info = decode_string_info(&mut reader, &names)?;
        string_infos.insert(key, info);
    }

    Ok(EnumTable {
        did,
        base_did,
        labels,
        string_infos,
    })
}

/// Owns every loaded `EnumTable`, keyed by did, resolving base-table
/// inheritance across lookups (§4.F).
#[derive(Debug, Default)]
pub struct EnumRegistry {
    tables: HashMap<u32, EnumTable>,
}

impl EnumRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: EnumTable) {
        self.tables.insert(table.did, table);
    }

    pub fn get(&self, did: u32) -> Option<&EnumTable> {
        self.tables.get(&did)
    }

    pub fn label(&self, did: u32, key: u32) -> Option<&str> {
        let table = self.tables.get(&did)?;
        table.label(key, |base_did| self.tables.get(&base_did))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encoded_table(did: u32, base_did: u32, entries: &[(u32, &str)]) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend_from_slice(&did.to_le_bytes());
        bytes.extend_from_slice(&base_did.to_le_bytes());
        bytes.push(0);
        bytes.push(entries.len() as u8);
        for (key, label) in entries {
            bytes.extend_from_slice(&key.to_le_bytes());
            bytes.push(label.len() as u8);
            bytes.extend_from_slice(label.as_bytes());
        }
        bytes.push(0);
        bytes.push(0);
        bytes
    }

    #[test]
    fn decodes_flat_table() {
        let bytes = encoded_table(1, 0, &[(1, "One"), (2, "Two")]);
        let table = decode_enum_table(Cursor::new(bytes)).unwrap();
        assert_eq!(table.label(2, |_| None), Some("Two"));
    }

    #[test]
    fn falls_back_to_base_table() {
        let base = encoded_table(1, 0, &[(1, "One")]);
        let child = encoded_table(2, 1, &[(2, "Two")]);
        let mut registry = EnumRegistry::new();
        registry.insert(decode_enum_table(Cursor::new(base)).unwrap());
        registry.insert(decode_enum_table(Cursor::new(child)).unwrap());
        assert_eq!(registry.label(2, 1), Some("One"));
        assert_eq!(registry.label(2, 2), Some("Two"));
    }
}
