//! The property system: typed key/value pairs attached to every game
//! object, their registry of definitions, and the codec that can decode a
//! value either from a byte stream or live process memory (§4.E, §4.H).

mod value;

pub use value::{PropertyValue, PropertyValueCodec};

use std::collections::HashMap;
use std::io::Read;

use derive_getters::Getters;

use crate::reader::BinaryReader;
use crate::result::{Error, Result};

/// §3 `PropertyType`: the 22 wire/value kinds a property can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String = 1,
    StringToken = 2,
    Waveform = 3,
    TimeStamp = 4,
    TriState = 5,
    Vector = 6,
    InstanceId = 7,
    EnumMapper = 8,
    Float = 9,
    PropertyId = 10,
    Struct = 11,
    Array = 12,
    StringInfo = 13,
    Bitfield64 = 14,
    Int = 15,
    Color = 16,
    Position = 17,
    Bitfield32 = 18,
    Int64 = 19,
    DataFile = 20,
    Bool = 21,
    Bitfield = 22,
}

impl PropertyType {
    pub fn from_code(code: u32) -> Result<Self> {
        Ok(match code {
            1 => Self::String,
            2 => Self::StringToken,
            3 => Self::Waveform,
            4 => Self::TimeStamp,
            5 => Self::TriState,
            6 => Self::Vector,
            7 => Self::InstanceId,
            8 => Self::EnumMapper,
            9 => Self::Float,
            10 => Self::PropertyId,
            11 => Self::Struct,
            12 => Self::Array,
            13 => Self::StringInfo,
            14 => Self::Bitfield64,
            15 => Self::Int,
            16 => Self::Color,
            17 => Self::Position,
            18 => Self::Bitfield32,
            19 => Self::Int64,
            20 => Self::DataFile,
            21 => Self::Bool,
            22 => Self::Bitfield,
            other => return Err(Error::decode(format!("unknown property type code {other}"))),
        })
    }
}

/// A single property's definition, as parsed out of the master property
/// resource: its id, name, wire type, and optional default/min/max values
/// plus any declared child properties (§4.E).
#[derive(Debug, Clone, Getters)]
pub struct PropertyDefinition {
    pid: u32,
    name: String,
    ptype: PropertyType,
    data: u32,
    default: Option<PropertyValue>,
    min: Option<PropertyValue>,
    max: Option<PropertyValue>,
    children: Vec<u32>,
}

/// All property definitions known to the client, keyed by id and name
/// (§4.E).
#[derive(Debug, Default)]
pub struct PropertyRegistry {
    by_id: HashMap<u32, PropertyDefinition>,
    by_name: HashMap<String, u32>,
}

impl PropertyRegistry {
    pub fn get(&self, pid: u32) -> Option<&PropertyDefinition> {
        self.by_id.get(&pid)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&PropertyDefinition> {
        self.by_name.get(name).and_then(|pid| self.by_id.get(pid))
    }

    #[cfg(test)]
    pub(crate) fn register_for_test(&mut self, pid: u32, name: String, ptype: PropertyType) {
        self.register(pid, name);
        self.by_id.get_mut(&pid).unwrap().ptype = ptype;
    }

    fn register(&mut self, pid: u32, name: String) {
        self.by_name.insert(name.clone(), pid);
        self.by_id.insert(
            pid,
            PropertyDefinition {
                pid,
                name,
                ptype: PropertyType::Int,
                data: 0,
                default: None,
                min: None,
                max: None,
                children: Vec::new(),
            },
        );
    }

    /// Decodes the master property resource (DID `0x34000000`, §4.E).
    pub fn decode<R: Read>(bytes: R) -> Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        let _did = reader.u32()?;
        reader.skip(8)?;

        let mut registry = Self::default();

        let num_names = reader.tsize()?;
        for _ in 0..num_names {
            let pid = reader.u32()?;
            let name = reader.pascal_string()?;
            registry.register(pid, name);
        }

        reader.skip(2)?;
        let num_defs = reader.tsize()?;
        for _ in 0..num_defs {
            let outer_pid = reader.u32()?;
            Self::decode_property_def(&mut reader, outer_pid, &mut registry)?;
        }

        Ok(registry)
    }

    fn decode_property_def<R: Read>(
        reader: &mut BinaryReader<R>,
        outer_pid: u32,
        registry: &mut PropertyRegistry,
    ) -> Result<()> {
        let pid = reader.u32()?;
        if pid != outer_pid {
            return Err(Error::decode(format!(
                "property def body pid {pid} does not match its index {outer_pid}"
            )));
        }
        let ptype = PropertyType::from_code(reader.u32()?)?;
        reader.skip(4)?;
        reader.skip(4)?;
        let data = reader.u32()?;
        reader.skip(4)?;

        let v5 = reader.u32()?;
        let flags = (v5 >> 8) & 0xFF;
        let mut default = None;
        let mut min = None;
        let mut max = None;
        if v5 & 0x800 != 0 {
            default = PropertyValueCodec::decode_def_value(reader, ptype, flags)?;
        }
        if v5 & 0x1000 != 0 {
            min = PropertyValueCodec::decode_def_value(reader, ptype, flags)?;
        }
        if v5 & 0x2000 != 0 {
            max = PropertyValueCodec::decode_def_value(reader, ptype, flags)?;
        }

        let marker = reader.u32()?;
        if marker != crate::constants::PROPERTY_DEF_MARKER {
            return Err(Error::decode(format!(
                "bad property-def marker {marker:#010x} for pid {pid}"
            )));
        }
        reader.skip(5)?;

        let nb_children = reader.u8()?;
        let mut children = Vec::with_capacity(nb_children as usize);
        for _ in 0..nb_children {
            let a = reader.u32()?;
            let b = reader.u32()?;
            if a != b {
                return Err(Error::decode("mismatched child property id pair"));
            }
            children.push(a);
        }

        let nb_unknown = reader.u32()?;
        for _ in 0..nb_unknown {
            reader.u32()?;
        }
        let terminator = reader.u32()?;
        if terminator != 0 {
            return Err(Error::decode("property def missing zero terminator"));
        }

        let def = registry
            .by_id
            .get_mut(&pid)
            .ok_or_else(|| Error::decode(format!("property def for unknown pid {pid:#010x}")))?;
        def.ptype = ptype;
        def.data = data;
        def.default = default;
        def.min = min;
        def.max = max;
        def.children = children;
        Ok(())
    }
}

/// A name -> value map attached to an entity (§3 `Properties`).
#[derive(Debug, Default, Clone)]
pub struct PropertySet {
    values: HashMap<String, PropertyValue>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn property_type_rejects_unknown_codes() {
        assert!(PropertyType::from_code(0).is_err());
        assert!(PropertyType::from_code(23).is_err());
        assert_eq!(PropertyType::from_code(21).unwrap(), PropertyType::Bool);
    }

    #[test]
    fn decodes_master_property_resource_without_defs() {
        let mut bytes = vec![];
        bytes.extend_from_slice(&872415232u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.push(0); // bucket count
        bytes.push(1); // one name
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.push(4);
        bytes.extend_from_slice(b"Name");
        bytes.extend_from_slice(&[0u8; 2]);
        bytes.push(0); // bucket count
        bytes.push(0); // zero property defs

        let registry = PropertyRegistry::decode(Cursor::new(bytes)).unwrap();
        assert_eq!(registry.get_by_name("Name").unwrap().pid, 5);
    }
}
