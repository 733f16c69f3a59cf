use declio::ctx::Endian;

pub const ENDIANESS: Endian = Endian::Little;

/// Archive header magic ("BT") at file offset 0x140 (§4.C).
pub const ARCHIVE_MAGIC: u32 = 0x5442;
pub const ARCHIVE_HEADER_OFFSET: u64 = 0x140;

/// Directory node layout offsets (§4.C).
pub const DIR_FILES_COUNT_OFFSET: u64 = 0x1F8;
pub const DIR_FILE_RECORDS_OFFSET: u64 = 0x1FC;
pub const DIR_FILE_RECORD_SIZE: u64 = 32;

/// A file record's `flags` bit indicating zlib-compressed payload.
pub const FILE_FLAG_COMPRESSED: u16 = 0x1;

/// DID namespace high bytes (§3).
pub const DID_MASTER_PROPERTY_TABLE: u32 = 0x34000000;
pub const DID_ENUM_TABLES: u32 = 0x56000000;
pub const DID_CLASS_LIBRARY: u32 = 0x56000000;
pub const DID_WORLD_CELLS_BASE: u32 = 0x70000000;

/// Reference handle classification thresholds (§4.M). `0x70000000` decimal
/// is `1879048192`, matching the value the original implementation tests
/// integer handles against directly.
pub const REFERENCE_DID_THRESHOLD: u32 = 0x70000000;

/// A reference-table entry whose bitfield has this bit set decodes through
/// `NativePackageCodec` rather than `WStateLoader` (§3, §4.L).
pub const REFERENCE_NATIVE_BIT: u32 = 0x1000_0000;

/// WState class-bundle value markers (§4.J).
pub const WSTATE_MARKER_U64: u32 = 0x0800_0000;
pub const WSTATE_MARKER_U32: u32 = 0x2000_0000;
pub const WSTATE_MARKER_EMBEDDED_A: u32 = 0x0000_0000;
pub const WSTATE_MARKER_EMBEDDED_B: u32 = 0x1000_0000;

/// Currency native package (403) property keys.
pub const CURRENCY_GOLD_DID: u32 = 0x7000_0128;
pub const CURRENCY_SILVER_DID: u32 = 0x7000_0129;
pub const CURRENCY_COPPER_DID: u32 = 0x7000_012A;

/// Enum consulted when decoding discovered map-notes (package 407).
pub const MAPNOTE_ENUM_DID: u32 = 0x2300_026F;
pub const MAPNOTE_BIT_COUNT: usize = 2048;

/// `PropertyRegistry` property-def body terminator marker (§4.E).
pub const PROPERTY_DEF_MARKER: u32 = 0x3FC0_0000;

/// `AttributeDefinition::type` tags (§3).
pub const ATTR_TYPE_REFERENCE: u8 = 1;
pub const ATTR_TYPE_INT: u8 = 2;
pub const ATTR_TYPE_FLOAT: u8 = 3;
pub const ATTR_TYPE_LONG: u8 = 130;
pub const ATTR_TYPE_UNUSED: u8 = 131;
pub const ATTR_TYPE_TIMESTAMP: u8 = 195;

/// Live-entity/property-source struct offsets (§4.K), 64-bit / 32-bit.
pub const ENTITY_OWE_OFFSET_64: u64 = 0x120;
pub const ENTITY_OWE_OFFSET_32: u64 = 0x98;
pub const ENTITY_OPS_OFFSET_64: u64 = 0xC0;
pub const ENTITY_OPS_OFFSET_32: u64 = 0x60;
pub const ENTITY_OPP_OFFSET_64: u64 = 0x30;
pub const ENTITY_OPP_OFFSET_32: u64 = 0x18;

/// `CharacterType` property value identifying the player character (§4.K).
pub const CHARACTER_TYPE_PLAYER: i64 = 2;
