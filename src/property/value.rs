//! Decodes a property's value, either out of a byte stream (definition
//! defaults/mins/maxes, or a general-purpose nested value) or out of live
//! process memory (§4.H).

use std::io::Read;

use crate::bitset::BitSet;
use crate::mem::{Bitness, ProcessMemory};
use crate::position::{Color, Position, Vector3D};
use crate::reader::BinaryReader;
use crate::result::{Error, Result};
use crate::strings::{decode_string_info, StringInfo};

use super::{PropertyRegistry, PropertyType};

/// A decoded property value, tagged by the wire type that produced it (§3).
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Str(String),
    StringToken(u32),
    Waveform(u32),
    TimeStamp(f64),
    TriState(u8),
    Vector(Vector3D),
    InstanceId(u64),
    EnumMapper(u32),
    Float(f32),
    PropertyId(u32),
    Struct(Vec<(u32, PropertyValue)>),
    Array(Vec<(u32, PropertyValue)>),
    StringInfoVal(StringInfo),
    Bitfield64(u64),
    Int(u32),
    ColorVal(Color),
    PositionVal(Position),
    Bitfield32(u32),
    Int64(i64),
    DataFile(u32),
    Bool(bool),
    Bitfield(BitSet),
}

pub struct PropertyValueCodec;

impl PropertyValueCodec {
    /// Decodes a definition's default/min/max value. `PropertyId`, `Struct`,
    /// `Array`, and `Position` never carry one at definition time — only a
    /// registered property's runtime value does (§4.E).
    pub fn decode_def_value<R: Read>(
        reader: &mut BinaryReader<R>,
        ptype: PropertyType,
        flags: u32,
    ) -> Result<Option<PropertyValue>> {
        match ptype {
            PropertyType::PropertyId | PropertyType::Struct | PropertyType::Array | PropertyType::Position => {
                Ok(None)
            }
            other => Ok(Some(Self::decode_scalar(reader, other, flags)?)),
        }
    }

    /// Decodes a value of known `ptype`, resolving nested `Struct`/`Array`
    /// member types through `registry` (§4.H).
    pub fn decode<R: Read>(
        reader: &mut BinaryReader<R>,
        ptype: PropertyType,
        registry: &PropertyRegistry,
    ) -> Result<PropertyValue> {
        match ptype {
            PropertyType::PropertyId => Ok(PropertyValue::PropertyId(reader.u32()?)),
            PropertyType::Position => Ok(PropertyValue::PositionVal(reader.position()?)),
            PropertyType::Struct => {
                let count = reader.tsize()?;
                let mut members = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let pid = reader.u32()?;
                    let repeated_pid = reader.u32()?;
                    if repeated_pid != pid {
                        return Err(Error::decode("mismatched struct member pid pair"));
                    }
                    let member_type = registry
                        .get(pid)
                        .map(|def| def.ptype)
                        .ok_or_else(|| Error::decode(format!("struct member pid {pid:#010x} unknown")))?;
                    let value = Self::decode(reader, member_type, registry)?;
                    members.push((pid, value));
                }
                Ok(PropertyValue::Struct(members))
            }
            PropertyType::Array => {
                let count = reader.u32()?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let pid = reader.u32()?;
                    let item_type = registry
                        .get(pid)
                        .map(|def| def.ptype)
                        .ok_or_else(|| Error::decode(format!("array element pid {pid:#010x} unknown")))?;
                    let value = Self::decode(reader, item_type, registry)?;
                    items.push((pid, value));
                }
                Ok(PropertyValue::Array(items))
            }
            other => Self::decode_scalar(reader, other, 0),
        }
    }

    /// Decodes a `{pid[, repeated pid], value}` entry the way `wstate`'s
    /// property-carrying sub-loaders do: a zero pid means "no value", and a
    /// handful of them repeat the pid a second time as a sanity check before
    /// the value itself (§4.J).
    pub fn decode_registered<R: Read>(
        reader: &mut BinaryReader<R>,
        registry: &PropertyRegistry,
        double_pid: bool,
    ) -> Result<Option<(u32, PropertyValue)>> {
        let pid = reader.u32()?;
        if pid == 0 {
            return Ok(None);
        }
        if double_pid {
            let repeated = reader.u32()?;
            if repeated != pid {
                return Err(Error::decode("mismatched property id pair"));
            }
        }
        let ptype = registry
            .get(pid)
            .map(|def| def.ptype)
            .ok_or_else(|| Error::decode(format!("property pid {pid:#010x} unknown")))?;
        let value = Self::decode(reader, ptype, registry)?;
        Ok(Some((pid, value)))
    }

    fn decode_scalar<R: Read>(
        reader: &mut BinaryReader<R>,
        ptype: PropertyType,
        _flags: u32,
    ) -> Result<PropertyValue> {
        Ok(match ptype {
            PropertyType::String => PropertyValue::Str(reader.pascal_string()?),
            PropertyType::StringToken => PropertyValue::StringToken(reader.u32()?),
            PropertyType::Waveform => PropertyValue::Waveform(reader.u32()?),
            PropertyType::TimeStamp => PropertyValue::TimeStamp(reader.f64()?),
            PropertyType::TriState => PropertyValue::TriState(reader.u8()?),
            PropertyType::Vector => PropertyValue::Vector(reader.vector3d()?),
            PropertyType::InstanceId => PropertyValue::InstanceId(reader.u64()?),
            PropertyType::EnumMapper => PropertyValue::EnumMapper(reader.u32()?),
            PropertyType::Float => PropertyValue::Float(reader.f32()?),
            PropertyType::StringInfo => {
                let names = crate::hash::bootstrap_known_variables();
                PropertyValue::StringInfoVal(decode_string_info(reader, &names)?)
            }
            PropertyType::Bitfield64 => PropertyValue::Bitfield64(reader.u64()?),
            PropertyType::Int => PropertyValue::Int(reader.u32()?),
            PropertyType::Color => PropertyValue::ColorVal(reader.color()?),
            PropertyType::Bitfield32 => PropertyValue::Bitfield32(reader.u32()?),
            PropertyType::Int64 => PropertyValue::Int64(reader.i64()?),
            PropertyType::DataFile => PropertyValue::DataFile(reader.u32()?),
            PropertyType::Bool => PropertyValue::Bool(reader.bool()?),
            PropertyType::Bitfield => PropertyValue::Bitfield(reader.bitset_stream()?),
            PropertyType::PropertyId | PropertyType::Struct | PropertyType::Array | PropertyType::Position => {
                return Err(Error::decode(format!("{ptype:?} has no scalar encoding")))
            }
        })
    }

    /// Reads a property's value directly out of live process memory at
    /// `ptr + offset`. Pointer-valued types dereference one level before
    /// reading their payload; the rest decode inline (§4.H point 2, §4.K).
    pub fn decode_live(mem: &dyn ProcessMemory, ptr: u64, offset: u64, ptype: PropertyType) -> Result<PropertyValue> {
        let addr = ptr + offset;
        Ok(match ptype {
            PropertyType::Int => PropertyValue::Int(mem.read_u32(addr)?),
            PropertyType::Bool => PropertyValue::Bool(mem.read_bool(addr)?),
            PropertyType::Float => PropertyValue::Float(mem.read_f32(addr)?),
            PropertyType::TriState => PropertyValue::TriState(mem.read_u8(addr)?),
            PropertyType::EnumMapper | PropertyType::StringToken | PropertyType::Waveform => {
                PropertyValue::EnumMapper(mem.read_u32(addr)?)
            }
            PropertyType::PropertyId => PropertyValue::PropertyId(mem.read_u32(addr)?),
            PropertyType::Bitfield32 => PropertyValue::Bitfield32(mem.read_u32(addr)?),
            PropertyType::Bitfield64 | PropertyType::InstanceId => {
                PropertyValue::Bitfield64(mem.read_u64(addr)?)
            }
            PropertyType::Int64 => PropertyValue::Int64(mem.read_i64(addr)?),
            PropertyType::Color => PropertyValue::ColorVal(Color::from_packed(mem.read_u32(addr)?)),
            PropertyType::TimeStamp => PropertyValue::TimeStamp(mem.read_f64(addr)?),
            PropertyType::DataFile => PropertyValue::DataFile(mem.read_u32(addr)?),
            PropertyType::Vector | PropertyType::Position | PropertyType::Struct | PropertyType::Array
            | PropertyType::String | PropertyType::StringInfo | PropertyType::Bitfield => {
                let pointee = mem.read_pointer(addr)?;
                if pointee == 0 {
                    return Err(Error::decode("null pointer for pointer-valued property"));
                }
                Self::decode_live_pointee(mem, pointee, ptype)?
            }
        })
    }

    fn decode_live_pointee(mem: &dyn ProcessMemory, pointee: u64, ptype: PropertyType) -> Result<PropertyValue> {
        Ok(match ptype {
            PropertyType::Position => PropertyValue::PositionVal(Position::from_mem(mem, pointee, 0)?),
            PropertyType::Vector => {
                let x = mem.read_f32(pointee)?;
                let y = mem.read_f32(pointee + 4)?;
                let z = mem.read_f32(pointee + 8)?;
                PropertyValue::Vector(Vector3D::new(x, y, z))
            }
            PropertyType::Bitfield => {
                let pad: u64 = if mem.bitness() == Bitness::Bits64 { 0 } else { 0 };
                let bit_count = mem.read_u32(pointee + pad)? as usize;
                let byte_count = (bit_count + 7) / 8;
                let bytes = mem.read_bytes(pointee + 4, byte_count)?;
                PropertyValue::Bitfield(BitSet::from_bytes(&bytes, bit_count))
            }
            other => {
                return Err(Error::decode(format!(
                    "{other:?} is not supported as a live pointer-valued property yet"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(bytes: &[u8]) -> BinaryReader<Cursor<Vec<u8>>> {
        BinaryReader::new(Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn decodes_scalar_int_default() {
        let value = PropertyValueCodec::decode_def_value(&mut reader(&5u32.to_le_bytes()), PropertyType::Int, 0)
            .unwrap()
            .unwrap();
        assert!(matches!(value, PropertyValue::Int(5)));
    }

    #[test]
    fn struct_and_array_defaults_are_none() {
        assert!(PropertyValueCodec::decode_def_value(&mut reader(&[]), PropertyType::Struct, 0)
            .unwrap()
            .is_none());
        assert!(PropertyValueCodec::decode_def_value(&mut reader(&[]), PropertyType::Array, 0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn decodes_nested_struct_via_registry() {
        let mut registry = PropertyRegistry::default();
        registry.register_for_test(7, "Child".to_string(), PropertyType::Int);

        let mut bytes = vec![0u8, 1]; // tsize: bucket count 0, vle count 1
        bytes.extend_from_slice(&7u32.to_le_bytes()); // member pid
        bytes.extend_from_slice(&7u32.to_le_bytes()); // repeated member pid
        bytes.extend_from_slice(&42u32.to_le_bytes());

        let value = PropertyValueCodec::decode(&mut reader(&bytes), PropertyType::Struct, &registry).unwrap();
        match value {
            PropertyValue::Struct(members) => {
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].0, 7);
                assert!(matches!(members[0].1, PropertyValue::Int(42)));
            }
            _ => panic!("expected a struct value"),
        }
    }
}
