//! Decodes a world-state resource: the imports a bundle of objects depends
//! on, and the single class bundle carried alongside them. A bundle's
//! values are decoded against the *global* class library handed in by the
//! caller — an item belongs to a known class index, or it falls through to
//! one of the ad hoc sub-loaders the client registers by class index for
//! the handful of builtin container/record shapes (§4.J).

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};

use flate2::read::ZlibDecoder;

use crate::bitset::BitSet;
use crate::classlib::ClassLibrary;
use crate::constants::{
    ATTR_TYPE_FLOAT, ATTR_TYPE_INT, ATTR_TYPE_LONG, ATTR_TYPE_REFERENCE, ATTR_TYPE_TIMESTAMP,
    ATTR_TYPE_UNUSED, WSTATE_MARKER_EMBEDDED_A, WSTATE_MARKER_EMBEDDED_B, WSTATE_MARKER_U32,
    WSTATE_MARKER_U64,
};
use crate::position::Position;
use crate::property::{PropertyRegistry, PropertyValue, PropertyValueCodec};
use crate::reader::BinaryReader;
use crate::result::{Error, Result};
use crate::strings::{decode_string_info, StringInfo};

const DBO_TYPE_ENTITY: u32 = 69;
const DBO_TYPE_APPEARANCE: u32 = 78;

#[derive(Debug, Clone)]
pub struct ImportEntry {
    pub dbo_type: u32,
    pub did: u32,
    pub c: u8,
}

#[derive(Debug, Clone)]
pub enum AttributeValue {
    U32(u32),
    Float(f32),
    U64(u64),
    None,
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name_hash: u32,
    pub value_type: u8,
    pub value: AttributeValue,
}

#[derive(Debug, Clone)]
pub struct ClassInstance {
    pub class_index: u32,
    pub attributes: Vec<Attribute>,
}

/// A scalar that's either a raw value or a reference handle pending
/// resolution, depending on the sub-loader variant that produced it (§4.M).
#[derive(Debug, Clone, Copy)]
pub enum ScalarRef {
    Value(i64),
    Reference(i64),
}

/// Everything the class library's builtin sub-loaders can produce for an
/// embedded item whose class index isn't in the class library (§4.J).
#[derive(Debug, Clone)]
pub enum WStateValue {
    AaHash(HashMap<u32, ScalarRef>),
    AaMultiHash(HashMap<u32, Vec<ScalarRef>>),
    IntSet(Vec<u32>),
    IntLongMap(HashMap<u32, i64>),
    Property(Option<(u32, PropertyValue)>),
    Bitset(BitSet),
    LongArray(Vec<i64>),
    LongHashSet(Vec<i64>),
    LongRefMap(HashMap<u64, ScalarRef>),
    NHashSetSummary(String),
    TripleList(Vec<(ScalarRef, u32, ScalarRef)>),
    Position(Position),
    Properties(Vec<(u32, PropertyValue)>),
    WeightTable(HashMap<u32, u32>),
    StringInfo(StringInfo),
    Text(String),
    GeoData(GeoData),
    GameplayOptionsProfile,
    VaultItem {
        item_iid: u64,
        properties: Vec<(u32, PropertyValue)>,
        tooltip: Option<(u32, PropertyValue)>,
    },
    VaultDescriptor {
        chests: Vec<(u32, String)>,
        total_capacity: u32,
        current_quantity: u32,
    },
    Generic(Vec<i64>),
    BankType(u32),
}

#[derive(Debug, Clone, Default)]
pub struct GeoData {
    pub world_positions: Vec<(u32, Vec<Position>)>,
    pub content_layer_positions: Vec<(u32, u32, Vec<Position>)>,
    pub quest_entries: Vec<QuestGeoEntry>,
}

#[derive(Debug, Clone)]
pub struct QuestGeoEntry {
    pub quest_id: u32,
    pub items: Vec<(u32, u32, QuestGeoItem)>,
}

#[derive(Debug, Clone)]
pub struct QuestGeoItem {
    pub did: u32,
    pub position: Position,
    pub radius: f32,
    pub label: String,
    pub sublabel: String,
}

/// An item read out of a class bundle's value list: a bare reference handle,
/// a bare integer, or a class instance / sub-loader result (§4.J, §4.M).
#[derive(Debug, Clone)]
pub enum DataItem {
    Reference(u64),
    Int(u32),
    Embedded(EmbeddedValue),
}

#[derive(Debug, Clone)]
pub enum EmbeddedValue {
    Instance(ClassInstance),
    Loaded(WStateValue),
}

/// The bundle's `references`/`values` lists are parallel: `references[i]` is
/// the handle other attributes point at to reach `values[i]` (§4.M).
#[derive(Debug, Clone, Default)]
pub struct ClassBundle {
    pub references: Vec<u32>,
    pub values: Vec<DataItem>,
}

#[derive(Debug, Default)]
pub struct WState {
    pub imports: Vec<ImportEntry>,
    pub bundle: Option<ClassBundle>,
}

pub struct WStateLoader;

impl WStateLoader {
    pub fn decode<R: Read + Seek>(
        bytes: R,
        class_library: &ClassLibrary,
        registry: &PropertyRegistry,
    ) -> Result<WState> {
        let mut reader = BinaryReader::new(bytes);
        let _idx = reader.u32()?;
        let _class_def_idx = reader.u32()?;

        let mut state = WState::default();
        state.imports = Self::read_imports(&mut reader)?;

        let reserved_a = reader.vle()?;
        let reserved_b = reader.vle()?;
        if reserved_a != 0 || reserved_b != 0 {
            tracing::debug!(reserved_a, reserved_b, "wstate reserved fields were non-zero");
        }
        let _unknown = reader.bool()?;

        let class_chunk_size = reader.u32()?;
        if class_chunk_size > 0 {
            let chunk = reader.bytes(class_chunk_size as usize)?;
            state.bundle = Some(Self::decode_class_bundle(
                Cursor::new(chunk),
                class_library,
                registry,
            )?);
        }

        if reader.bool()? {
            Self::skip_links(&mut reader)?;
        }

        if reader.bool()? {
            let count = reader.tsize()?;
            for _ in 0..count {
                let pid = reader.u32()?;
                let repeated = reader.u32()?;
                if pid != repeated {
                    return Err(Error::decode("mismatched last-pids entry"));
                }
            }
        }

        let available = reader.bytes_available()?;
        if available > 0 {
            tracing::debug!(available, "extra bytes at the end of a wstate resource");
        }

        Ok(state)
    }

    fn read_imports<R: Read>(reader: &mut BinaryReader<R>) -> Result<Vec<ImportEntry>> {
        let count = reader.tsize()?;
        let mut imports = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let dbo_type = reader.u32()?;
            let did = reader.u32()?;
            let c = reader.u8()?;
            match dbo_type {
                DBO_TYPE_ENTITY => {
                    let did_highbits = did >> 24;
                    if !matches!(did_highbits, 112 | 118) {
                        tracing::warn!(did, did_highbits, "wstate entity import did looks invalid");
                    }
                    if !matches!(c, 0 | 16) {
                        tracing::warn!(c, "wstate entity import has an unexpected c value");
                    }
                }
                DBO_TYPE_APPEARANCE => {
                    let did_highbits = did >> 24;
                    if did_highbits != 32 {
                        tracing::warn!(did, did_highbits, "wstate appearance import did looks invalid");
                    }
                    if c != 0 {
                        tracing::warn!(c, "wstate appearance import has an unexpected c value");
                    }
                }
                other => return Err(Error::decode(format!("unhandled wstate import dbo_type {other}"))),
            }
            imports.push(ImportEntry { dbo_type, did, c });
        }
        Ok(imports)
    }

    fn skip_links<R: Read>(reader: &mut BinaryReader<R>) -> Result<()> {
        let count = reader.u32()?;
        for _ in 0..count {
            reader.u8()?;
            reader.u32()?;
            reader.u32()?;
            reader.u32()?;
            let props_count = reader.tsize()?;
            for _ in 0..props_count {
                let pid = reader.u32()?;
                let repeated = reader.u32()?;
                if pid != repeated {
                    return Err(Error::decode("mismatched link property id pair"));
                }
            }
            reader.u8()?;
        }
        Ok(())
    }

    fn decode_class_bundle<R: Read + Seek>(
        bytes: R,
        class_library: &ClassLibrary,
        registry: &PropertyRegistry,
    ) -> Result<ClassBundle> {
        let mut reader = BinaryReader::new(bytes);
        let refs_count = reader.vle()?;
        let mut references = Vec::with_capacity(refs_count as usize);
        for _ in 0..refs_count {
            references.push(reader.u32()?);
        }

        // This class-def table only registers attribute name hashes into the
        // client's name cache for display purposes; the bundle's items are
        // decoded against the caller's own `ClassLibrary`, not this one.
        let class_def_count = reader.u16()?;
        for _ in 0..class_def_count {
            let _class_idx = reader.u16()?;
            let attrs_count = reader.u16()?;
            for _ in 0..attrs_count {
                reader.u32()?;
                reader.u8()?;
            }
        }

        let mut values = Vec::with_capacity(refs_count as usize);
        for _ in 0..refs_count {
            values.push(Self::read_data_item(&mut reader, class_library, registry)?);
        }

        let available = reader.bytes_available()?;
        if available > 0 {
            tracing::debug!(available, "extra bytes at the end of a wstate class bundle");
        }

        Ok(ClassBundle { references, values })
    }

    fn read_data_item<R: Read + Seek>(
        reader: &mut BinaryReader<R>,
        class_library: &ClassLibrary,
        registry: &PropertyRegistry,
    ) -> Result<DataItem> {
        let marker = reader.u32()?;
        match marker {
            WSTATE_MARKER_U64 => Ok(DataItem::Reference(reader.u64()?)),
            WSTATE_MARKER_U32 => Ok(DataItem::Int(reader.u32()?)),
            WSTATE_MARKER_EMBEDDED_A | WSTATE_MARKER_EMBEDDED_B => {
                Ok(DataItem::Embedded(Self::read_embedded(reader, class_library, registry)?))
            }
            other => Err(Error::decode(format!("unmanaged wstate data item marker {other:#010x}"))),
        }
    }

    fn read_embedded<R: Read + Seek>(
        reader: &mut BinaryReader<R>,
        class_library: &ClassLibrary,
        registry: &PropertyRegistry,
    ) -> Result<EmbeddedValue> {
        let class_idx = reader.u16()?;
        if let Some(class_info) = class_library.get(class_idx as u32) {
            let mut attributes = Vec::with_capacity(class_info.attributes.len());
            for attr in &class_info.attributes {
                let value = match attr.value_type {
                    t if t == ATTR_TYPE_REFERENCE || t == ATTR_TYPE_INT => AttributeValue::U32(reader.u32()?),
                    t if t == ATTR_TYPE_FLOAT => AttributeValue::Float(reader.f32()?),
                    t if t == ATTR_TYPE_LONG || t == ATTR_TYPE_UNUSED || t == ATTR_TYPE_TIMESTAMP => {
                        let low = reader.u32()? as u64;
                        let high = reader.u32()? as u64;
                        AttributeValue::U64((high << 32) + low)
                    }
                    _ => AttributeValue::None,
                };
                attributes.push(Attribute {
                    name_hash: attr.name_hash,
                    value_type: attr.value_type,
                    value,
                });
            }
            Ok(EmbeddedValue::Instance(ClassInstance {
                class_index: class_idx as u32,
                attributes,
            }))
        } else {
            let value = Self::decode_class_dispatch(class_idx as u32, reader, registry)?;
            Ok(EmbeddedValue::Loaded(value))
        }
    }

    /// The builtin sub-loader dispatch table, by class index (§4.J).
    fn decode_class_dispatch<R: Read + Seek>(
        class_idx: u32,
        reader: &mut BinaryReader<R>,
        registry: &PropertyRegistry,
    ) -> Result<WStateValue> {
        Ok(match class_idx {
            11 => WStateValue::AaHash(Self::read_aa_hash(reader, false)?),
            35 => WStateValue::AaHash(Self::read_aa_hash(reader, true)?),
            13 | 17 | 25 => WStateValue::AaMultiHash(Self::read_aa_multi_hash(reader, false)?),
            37 | 176 | 182 => WStateValue::AaMultiHash(Self::read_aa_multi_hash(reader, true)?),
            18 => WStateValue::IntSet(Self::read_int_hash_set(reader)?),
            23 => WStateValue::IntLongMap(Self::read_int_long_map(reader)?),
            39 => WStateValue::Property(PropertyValueCodec::decode_registered(reader, registry, true)?),
            57 => WStateValue::Bitset(reader.bitset_stream()?),
            104 => WStateValue::LongArray(Self::read_long_array(reader)?),
            105 => WStateValue::LongHashSet(Self::read_long_hash_set(reader)?),
            97 => WStateValue::LongRefMap(Self::read_long_ref_map(reader, false)?),
            117 => WStateValue::LongRefMap(Self::read_long_ref_map(reader, true)?),
            134 => WStateValue::NHashSetSummary(Self::read_nhash_set(reader)?),
            138 => WStateValue::TripleList(Self::read_triple_list(reader)?),
            160 | 161 => WStateValue::Position(reader.position()?),
            166 => WStateValue::Properties(Self::read_properties(reader, registry)?),
            175 => WStateValue::WeightTable(Self::read_weight_table(reader)?),
            199 => WStateValue::StringInfo(decode_string_info(reader, &crate::hash::bootstrap_known_variables())?),
            225 => WStateValue::Text(reader.prefixed_utf16()?),
            407 => WStateValue::Bitset(Self::read_discovered_map_notes(reader)?),
            415 => {
                Self::skip_gameplay_options_profile(reader)?;
                WStateValue::GameplayOptionsProfile
            }
            2479 => WStateValue::GeoData(Self::read_quest_geo_data(reader)?),
            2567 => {
                let item_iid = reader.u64()?;
                let properties = Self::read_properties(reader, registry)?;
                let tooltip = PropertyValueCodec::decode_registered(reader, registry, true)?;
                WStateValue::VaultItem {
                    item_iid,
                    properties,
                    tooltip,
                }
            }
            3103 => {
                let count = reader.tsize()?;
                let mut chests = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let chest_id = reader.u32()?;
                    let chest_name = reader.prefixed_utf16()?;
                    chests.push((chest_id, chest_name));
                }
                let total_capacity = reader.u32()?;
                let current_quantity = reader.u32()?;
                WStateValue::VaultDescriptor {
                    chests,
                    total_capacity,
                    current_quantity,
                }
            }
            3461 => WStateValue::Generic(vec![
                reader.u32()? as i64,
                reader.u32()? as i64,
                reader.u32()? as i64,
            ]),
            3740 => WStateValue::BankType(reader.u32()?),
            other => return Err(Error::decode(format!("no wstate class loader for class index {other}"))),
        })
    }

    fn read_aa_hash<R: Read>(reader: &mut BinaryReader<R>, use_ref: bool) -> Result<HashMap<u32, ScalarRef>> {
        let count = reader.tsize()?;
        let mut map = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let key = reader.u32()?;
            let val = reader.u32()? as i64;
            map.insert(key, if use_ref { ScalarRef::Reference(val) } else { ScalarRef::Value(val) });
        }
        Ok(map)
    }

    fn read_aa_multi_hash<R: Read>(
        reader: &mut BinaryReader<R>,
        use_ref: bool,
    ) -> Result<HashMap<u32, Vec<ScalarRef>>> {
        let count = reader.tsize()?;
        let mut map: HashMap<u32, Vec<ScalarRef>> = HashMap::new();
        for _ in 0..count {
            let key = reader.u32()?;
            let val = reader.u32()? as i64;
            let scalar = if use_ref { ScalarRef::Reference(val) } else { ScalarRef::Value(val) };
            map.entry(key).or_default().push(scalar);
        }
        Ok(map)
    }

    fn read_int_hash_set<R: Read>(reader: &mut BinaryReader<R>) -> Result<Vec<u32>> {
        let count = reader.u16()?;
        let _padding = reader.u16()?;
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(reader.u32()?);
        }
        Ok(values)
    }

    fn read_int_long_map<R: Read>(reader: &mut BinaryReader<R>) -> Result<HashMap<u32, i64>> {
        let count = reader.tsize()?;
        let mut map = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let key = reader.u32()?;
            let val = reader.i64()?;
            map.insert(key, val);
        }
        Ok(map)
    }

    fn read_long_array<R: Read>(reader: &mut BinaryReader<R>) -> Result<Vec<i64>> {
        let count = reader.u32()?;
        (0..count).map(|_| reader.i64()).collect()
    }

    fn read_long_hash_set<R: Read>(reader: &mut BinaryReader<R>) -> Result<Vec<i64>> {
        let count = reader.u16()?;
        let _padding = reader.u16()?;
        (0..count).map(|_| reader.i64()).collect()
    }

    fn read_long_ref_map<R: Read>(
        reader: &mut BinaryReader<R>,
        use_ref: bool,
    ) -> Result<HashMap<u64, ScalarRef>> {
        let count = reader.tsize()?;
        let mut map = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let key = reader.u64()?;
            let val = reader.u32()? as i64;
            map.insert(key, if use_ref { ScalarRef::Reference(val) } else { ScalarRef::Value(val) });
        }
        Ok(map)
    }

    fn read_nhash_set<R: Read>(reader: &mut BinaryReader<R>) -> Result<String> {
        let count = reader.u16()?;
        let _padding = reader.u16()?;
        for _ in 0..count {
            reader.u32()?;
            reader.u32()?;
            reader.u8()?;
        }
        Ok(format!("NHashSet: size={count}"))
    }

    fn read_triple_list<R: Read>(reader: &mut BinaryReader<R>) -> Result<Vec<(ScalarRef, u32, ScalarRef)>> {
        let count = reader.tsize()?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let v1 = reader.u32()? as i64;
            let v2 = reader.u32()?;
            let v4 = reader.u32()? as i64;
            items.push((ScalarRef::Reference(v1), v2, ScalarRef::Reference(v4)));
        }
        Ok(items)
    }

    fn read_weight_table<R: Read>(reader: &mut BinaryReader<R>) -> Result<HashMap<u32, u32>> {
        let count = reader.u32()?;
        let mut map = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let value = reader.u32()?;
            let weight = reader.u32()?;
            reader.u32()?;
            map.insert(value, weight);
        }
        let terminator = reader.u32()?;
        if terminator != 0 {
            return Err(Error::decode("random selection table missing its trailing zero"));
        }
        Ok(map)
    }

    fn read_properties<R: Read>(
        reader: &mut BinaryReader<R>,
        registry: &PropertyRegistry,
    ) -> Result<Vec<(u32, PropertyValue)>> {
        let count = reader.tsize()?;
        let mut props = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if let Some(entry) = PropertyValueCodec::decode_registered(reader, registry, true)? {
                props.push(entry);
            }
        }
        Ok(props)
    }

    /// The original loader reads a buffer, zlib-inflates it purely to assert
    /// the decompressed size matches, then discards the result — the bit set
    /// that's actually kept is read from the outer stream that continues
    /// right after that whole buffer, not from the decompressed bytes.
    fn read_discovered_map_notes<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<BitSet> {
        let buffer_size = reader.u32()? as usize;
        let buffer = reader.bytes(buffer_size)?;
        let mut inner = BinaryReader::new(Cursor::new(buffer));
        let leading = inner.u32()?;
        if leading != 0 {
            return Err(Error::decode("discovered map-note buffer missing its leading zero"));
        }
        let unpacked_size = inner.u32()?;
        let packed_size = inner.bytes_available()? as usize;
        let packed = inner.bytes(packed_size)?;
        let mut decompressed = Vec::new();
        ZlibDecoder::new(&packed[..]).read_to_end(&mut decompressed)?;
        if decompressed.len() != unpacked_size as usize {
            return Err(Error::decode("discovered map-note buffer decompressed to an unexpected size"));
        }

        let bit_count = packed_size * 8;
        let byte_count = (bit_count + 7) / 8;
        let bytes = reader.bytes(byte_count)?;
        Ok(BitSet::from_bytes(&bytes, bit_count))
    }

    /// Byte-accurate skip: the original loader never builds a usable value
    /// out of this, only prints diagnostics (§4.J).
    fn skip_gameplay_options_profile<R: Read>(reader: &mut BinaryReader<R>) -> Result<()> {
        reader.u32()?;
        reader.u32()?;
        let num_sets = reader.u32()?;
        for _ in 0..num_sets {
            let marker = reader.u32()?;
            if marker != 84 {
                return Err(Error::decode("gameplay options profile set missing its marker"));
            }
            for _ in 0..7 {
                for _ in 0..12 {
                    let shortcut_type = reader.u32()?;
                    match shortcut_type {
                        0 => {}
                        2 => {
                            reader.i64()?;
                            reader.u32()?;
                        }
                        6 | 7 | 9 => {
                            reader.u32()?;
                        }
                        other => return Err(Error::decode(format!("unknown gameplay shortcut type {other}"))),
                    }
                }
            }
        }
        let test1 = reader.u8()?;
        let test2 = reader.u8()?;
        if matches!(test1, 0 | 1) {
            if test2 == 2 {
                reader.skip(24)?;
            } else {
                for _ in 0..test2 {
                    reader.u32()?;
                    reader.u8()?;
                    let elem_count = reader.u8()?;
                    for _ in 0..elem_count {
                        reader.skip(21)?;
                    }
                }
                reader.u16()?;
                for _ in 0..6 {
                    reader.u32()?;
                }
            }
        }
        Ok(())
    }

    fn read_quest_geo_data<R: Read>(reader: &mut BinaryReader<R>) -> Result<GeoData> {
        let mut data = GeoData::default();

        let count = reader.tsize()?;
        for _ in 0..count {
            let did = reader.u32()?;
            let num_positions = reader.u32()?;
            if num_positions > 0 {
                let mut positions = Vec::with_capacity(num_positions as usize);
                for _ in 0..num_positions {
                    positions.push(reader.position()?);
                    reader.u32()?;
                    reader.u8()?;
                }
                data.world_positions.push((did, positions));
            }
        }

        let genus_count = reader.u32()?;
        if genus_count != 7 {
            return Err(Error::decode("quest geo data genus map was not the expected 7 entries"));
        }
        for _ in 0..7 {
            let nb_arrays = reader.tsize()?;
            for _ in 0..nb_arrays {
                reader.u32()?;
                Self::read_u32_prefixed_array(reader)?;
            }
        }

        Self::read_content_layer_positions(reader, &mut data)?;
        Self::read_quest_entries(reader, &mut data)?;

        Ok(data)
    }

    fn read_content_layer_positions<R: Read>(reader: &mut BinaryReader<R>, data: &mut GeoData) -> Result<()> {
        let count = reader.tsize()?;
        for _ in 0..count {
            let did = reader.u32()?;
            let num_positions = reader.u32()?;
            if num_positions == 0 {
                continue;
            }
            let mut per_layer: HashMap<u32, Vec<Position>> = HashMap::new();
            for _ in 0..num_positions {
                let position = reader.position()?;
                reader.u32()?;
                reader.u8()?;
                for layer in Self::read_u32_prefixed_array(reader)? {
                    per_layer.entry(layer).or_default().push(position);
                }
            }
            for (layer, positions) in per_layer {
                data.content_layer_positions.push((did, layer, positions));
            }
        }
        Ok(())
    }

    fn read_quest_entries<R: Read>(reader: &mut BinaryReader<R>, data: &mut GeoData) -> Result<()> {
        let count = reader.tsize()?;
        for _ in 0..count {
            let quest_id = reader.u32()?;
            let mut entry = QuestGeoEntry { quest_id, items: Vec::new() };
            let nb_objectives = reader.tsize()?;
            for _ in 0..nb_objectives {
                let objective_index = reader.u32()?;
                let conditions_count = reader.u32()?;
                for condition_idx in 0..conditions_count {
                    let entries_count = reader.u32()?;
                    for _ in 0..entries_count {
                        let item = Self::read_quest_entry_item(reader)?;
                        entry.items.push((objective_index, condition_idx, item));
                    }
                }
            }
            data.quest_entries.push(entry);
        }
        Ok(())
    }

    fn read_quest_entry_item<R: Read>(reader: &mut BinaryReader<R>) -> Result<QuestGeoItem> {
        let did = reader.u32()?;
        let position = reader.position()?;
        let radius = reader.f32()?;
        let label = reader.pascal_string()?;
        let count = reader.u32()?;
        for _ in 0..count {
            Self::skip_quest_genus_struct(reader)?;
        }
        let sublabel = reader.pascal_string()?;
        Ok(QuestGeoItem { did, position, radius, label, sublabel })
    }

    fn skip_quest_genus_struct<R: Read>(reader: &mut BinaryReader<R>) -> Result<()> {
        let flags = reader.u8()?;
        for bit in [0x01u8, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40] {
            if flags & bit != 0 {
                reader.u32()?;
            }
        }
        Ok(())
    }

    fn read_u32_prefixed_array<R: Read>(reader: &mut BinaryReader<R>) -> Result<Vec<u32>> {
        let count = reader.u32()?;
        (0..count).map(|_| reader.u32()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::io::Cursor;

    fn registry() -> PropertyRegistry {
        PropertyRegistry::default()
    }

    fn library() -> ClassLibrary {
        ClassLibrary::decode(Cursor::new(header_only_class_library()), &Map::new()).unwrap()
    }

    fn header_only_class_library() -> Vec<u8> {
        let stop_code = 0xAAu32;
        let mut bytes = vec![];
        bytes.extend_from_slice(&0x56000000u32.to_le_bytes());
        bytes.extend_from_slice(&stop_code.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.extend_from_slice(&stop_code.to_le_bytes());
        bytes.push(1);
        bytes
    }

    fn base_header(imports: &[u8]) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(imports);
        bytes
    }

    #[test]
    fn decodes_empty_imports_and_no_bundle() {
        let mut bytes = base_header(&[0u8, 0]); // tsize: bucket 0, count 0
        bytes.push(0); // reserved vle a
        bytes.push(0); // reserved vle b
        bytes.push(0); // bool
        bytes.extend_from_slice(&0u32.to_le_bytes()); // class_chunk_size = 0
        bytes.push(0); // links present = false
        bytes.push(0); // last pids present = false

        let state = WStateLoader::decode(Cursor::new(bytes), &library(), &registry()).unwrap();
        assert!(state.imports.is_empty());
        assert!(state.bundle.is_none());
    }

    #[test]
    fn decodes_one_entity_import() {
        let mut imports = vec![0u8, 1]; // tsize: bucket 0, count 1
        imports.extend_from_slice(&DBO_TYPE_ENTITY.to_le_bytes());
        imports.extend_from_slice(&0x70000001u32.to_le_bytes());
        imports.push(0);

        let mut bytes = base_header(&imports);
        bytes.push(0);
        bytes.push(0);
        bytes.push(0);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push(0);
        bytes.push(0);

        let state = WStateLoader::decode(Cursor::new(bytes), &library(), &registry()).unwrap();
        assert_eq!(state.imports.len(), 1);
        assert_eq!(state.imports[0].did, 0x70000001);
    }

    #[test]
    fn decodes_bundle_with_reference_and_int_items() {
        let mut bundle = vec![2u8]; // vle refs_count = 2
        bundle.extend_from_slice(&10u32.to_le_bytes());
        bundle.extend_from_slice(&11u32.to_le_bytes());
        bundle.extend_from_slice(&0u16.to_le_bytes()); // class_def_count = 0
        bundle.extend_from_slice(&WSTATE_MARKER_U64.to_le_bytes());
        bundle.extend_from_slice(&0xDEADBEEFu64.to_le_bytes());
        bundle.extend_from_slice(&0x2000_0000u32.to_le_bytes());
        bundle.extend_from_slice(&7u32.to_le_bytes());

        let mut bytes = base_header(&[0u8, 0]);
        bytes.push(0);
        bytes.push(0);
        bytes.push(0);
        bytes.extend_from_slice(&(bundle.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&bundle);
        bytes.push(0);
        bytes.push(0);

        let state = WStateLoader::decode(Cursor::new(bytes), &library(), &registry()).unwrap();
        let bundle = state.bundle.unwrap();
        assert_eq!(bundle.references, vec![10, 11]);
        assert!(matches!(bundle.values[0], DataItem::Reference(0xDEADBEEF)));
        assert!(matches!(bundle.values[1], DataItem::Int(7)));
    }

    #[test]
    fn weight_table_loader_requires_trailing_zero() {
        let mut bytes = 1u32.to_le_bytes().to_vec(); // count
        bytes.extend_from_slice(&1u32.to_le_bytes()); // value
        bytes.extend_from_slice(&2u32.to_le_bytes()); // weight
        bytes.extend_from_slice(&0u32.to_le_bytes()); // discarded
        bytes.extend_from_slice(&0u32.to_le_bytes()); // terminator
        let mut reader = BinaryReader::new(Cursor::new(bytes));
        let table = WStateLoader::read_weight_table(&mut reader).unwrap();
        assert_eq!(table.get(&1), Some(&2));
    }
}
