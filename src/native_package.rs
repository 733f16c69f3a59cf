//! Decodes native (non-WState) package payloads found inline in live
//! memory: scalar/record types, the handful of hashtable-backed containers,
//! and a few domain-specific records (§4.I).

use std::collections::HashMap;

use crate::bitset::BitSet;
use crate::enums::EnumRegistry;
use crate::mem::ProcessMemory;
use crate::position::{Color, Position};
use crate::result::{Error, Result};

/// Package ids this codec recognizes (§4.I), carried verbatim from the
/// native-package dispatch table.
pub mod package_id {
    pub const AA_HASH: u32 = 11;
    pub const AA_MULTIHASH: u32 = 35;
    pub const INTMULTI_HASH: u32 = 13;
    pub const INTMULTI_MULTIHASH: u32 = 37;
    pub const ARRAY: u32 = 17;
    pub const ARRAY_REF: u32 = 176;
    pub const ARRAY_LONG: u32 = 104;
    pub const LIST: u32 = 25;
    pub const LIST_REF: u32 = 182;
    pub const LIST_LONG: u32 = 111;
    pub const INT_TO_LONG_MAP: u32 = 23;
    pub const LONG_TO_INT_MAP: u32 = 117;
    pub const LONG_TO_INT_MAP_REF: u32 = 97;
    pub const INT_SET: u32 = 18;
    pub const LONG_SET: u32 = 105;
    pub const NHASH_SET: u32 = 134;
    pub const NRHASH: u32 = 138;
    pub const PROPERTY: u32 = 39;
    pub const DB_PROPERTIES: u32 = 52;
    pub const DYNAMIC_BITSET: u32 = 57;
    pub const POSITION: u32 = 160;
    pub const PROPERTIES: u32 = 166;
    pub const STRING_INFO: u32 = 199;
    pub const STRING: u32 = 225;
    pub const CURRENCY: u32 = 403;
    pub const MAP_NOTES: u32 = 407;
    pub const FRIENDS: u32 = 414;
    pub const IGNORES: u32 = 433;
    pub const VAULT_ITEM_DESCRIPTOR: u32 = 2567;
    pub const VAULT_DESCRIPTOR: u32 = 3103;
}

#[derive(Debug, Clone)]
pub enum NativeValue {
    Int(i64),
    Uint(u64),
    Str(String),
    Bitset(BitSet),
    Position(Position),
    Color(Color),
    List(Vec<NativeValue>),
    IntMap(HashMap<i64, i64>),
    Currency { gold: u32, silver: u32, copper: u32 },
    MapNotes(Vec<String>),
    Friends(Vec<u64>),
    Ignores(Vec<u64>),
    VaultItem { instance_id: u64, pid: u32 },
    Vault { items: Vec<NativeValue> },
}

/// Layout every hashtable-backed container shares: a bucket array, the head
/// of the first populated bucket, the declared bucket count, and the
/// element count used to cross-check traversal (§4.I).
struct HashtableLayout {
    buckets_ptr: u64,
    nb_buckets: u32,
    nb_elements: u32,
}

fn read_hashtable_layout(mem: &dyn ProcessMemory, addr: u64) -> Result<HashtableLayout> {
    let ptr_size = mem.bitness().pointer_size();
    let buckets_ptr = mem.read_pointer(addr + ptr_size * 2)?;
    let nb_buckets_offset = addr + ptr_size * 4;
    let nb_buckets = mem.read_u32(nb_buckets_offset)?;
    let nb_elements = mem.read_u32(nb_buckets_offset + 4)?;
    Ok(HashtableLayout {
        buckets_ptr,
        nb_buckets,
        nb_elements,
    })
}

/// Walks a bucket array of singly-linked entries, applying `read_entry` to
/// each node's address, and asserts the number visited matches the table's
/// declared element count (§4.I).
fn walk_hashtable<T>(
    mem: &dyn ProcessMemory,
    layout: &HashtableLayout,
    read_entry: impl Fn(&dyn ProcessMemory, u64) -> Result<(T, u64)>,
) -> Result<Vec<T>> {
    let ptr_size = mem.bitness().pointer_size();
    let mut collected = Vec::new();
    for bucket in 0..layout.nb_buckets as u64 {
        let mut node = mem.read_pointer(layout.buckets_ptr + bucket * ptr_size)?;
        while node != 0 {
            let (value, next) = read_entry(mem, node)?;
            collected.push(value);
            node = next;
        }
    }
    if collected.len() as u32 != layout.nb_elements {
        return Err(Error::decode(format!(
            "hashtable traversal collected {} entries, expected {}",
            collected.len(),
            layout.nb_elements
        )));
    }
    Ok(collected)
}

pub struct NativePackageCodec;

impl NativePackageCodec {
    /// Decodes the native package at `addr`, dispatching on `package_id`
    /// (§4.I).
    pub fn decode(mem: &dyn ProcessMemory, addr: u64, package_id: u32, enums: &EnumRegistry) -> Result<NativeValue> {
        use package_id as pid;
        match package_id {
            pid::STRING => {
                let ptr = mem.read_pointer(addr)?;
                Ok(NativeValue::Str(Self::read_c_like_string(mem, ptr)?))
            }
            pid::POSITION => Ok(NativeValue::Position(Position::from_mem(mem, addr, 0)?)),
            pid::DYNAMIC_BITSET => {
                let bit_count = mem.read_u32(addr)? as usize;
                let ptr = mem.read_pointer(addr + 4)?;
                let byte_count = (bit_count + 7) / 8;
                let bytes = mem.read_bytes(ptr, byte_count)?;
                Ok(NativeValue::Bitset(BitSet::from_bytes(&bytes, bit_count)))
            }
            pid::CURRENCY => {
                let gold = mem.read_u32(addr)?;
                let silver = mem.read_u32(addr + 4)?;
                let copper = mem.read_u32(addr + 8)?;
                Ok(NativeValue::Currency { gold, silver, copper })
            }
            pid::MAP_NOTES => {
                let layout = read_hashtable_layout(mem, addr)?;
                let set = Self::decode_bitset_from_layout(mem, &layout)?;
                let labels = set
                    .iter()
                    .filter_map(|key| enums.label(crate::constants::MAPNOTE_ENUM_DID, key as u32))
                    .map(str::to_string)
                    .collect();
                Ok(NativeValue::MapNotes(labels))
            }
            pid::FRIENDS => {
                let layout = read_hashtable_layout(mem, addr)?;
                let ptr_size = mem.bitness().pointer_size();
                let ids = walk_hashtable(mem, &layout, |mem, node| {
                    let instance_id = mem.read_u64(node + ptr_size)?;
                    let next = mem.read_pointer(node)?;
                    Ok((instance_id, next))
                })?;
                Ok(NativeValue::Friends(ids))
            }
            pid::IGNORES => {
                let layout = read_hashtable_layout(mem, addr)?;
                let ptr_size = mem.bitness().pointer_size();
                let ids = walk_hashtable(mem, &layout, |mem, node| {
                    let instance_id = mem.read_u64(node + ptr_size)?;
                    let next = mem.read_pointer(node)?;
                    Ok((instance_id, next))
                })?;
                Ok(NativeValue::Ignores(ids))
            }
            pid::VAULT_ITEM_DESCRIPTOR => {
                let instance_id = mem.read_u64(addr)?;
                let item_pid = mem.read_u32(addr + 8)?;
                Ok(NativeValue::VaultItem {
                    instance_id,
                    pid: item_pid,
                })
            }
            pid::VAULT_DESCRIPTOR => {
                let layout = read_hashtable_layout(mem, addr)?;
                let ptr_size = mem.bitness().pointer_size();
                let items = walk_hashtable(mem, &layout, |mem, node| {
                    let value = Self::decode(mem, node, pid::VAULT_ITEM_DESCRIPTOR, enums)?;
                    let next = mem.read_pointer(node + ptr_size)?;
                    Ok((value, next))
                })?;
                Ok(NativeValue::Vault { items })
            }
            pid::INT_SET | pid::LONG_SET | pid::NHASH_SET | pid::NRHASH => {
                let layout = read_hashtable_layout(mem, addr)?;
                let ptr_size = mem.bitness().pointer_size();
                let values = walk_hashtable(mem, &layout, |mem, node| {
                    let value = mem.read_i64(node + ptr_size)?;
                    let next = mem.read_pointer(node)?;
                    Ok((NativeValue::Int(value), next))
                })?;
                Ok(NativeValue::List(values))
            }
            pid::ARRAY | pid::ARRAY_REF | pid::ARRAY_LONG => {
                let stride = mem.bitness().pointer_size();
                let items_ptr = mem.read_pointer(addr)?;
                let count = mem.read_u32(addr + stride + 4)?;
                let mut items = Vec::with_capacity(count as usize);
                for i in 0..count as u64 {
                    let value = if package_id == pid::ARRAY_LONG {
                        mem.read_i64(items_ptr + i * 8)?
                    } else {
                        mem.read_u32(items_ptr + i * 4)? as i64
                    };
                    items.push(NativeValue::Int(value));
                }
                Ok(NativeValue::List(items))
            }
            pid::LIST | pid::LIST_REF | pid::LIST_LONG => {
                let ptr_size = mem.bitness().pointer_size();
                let count = mem.read_u32(addr + ptr_size * 3)?;
                let mut items = Vec::with_capacity(count as usize);
                let mut node = mem.read_pointer(addr + ptr_size)?;
                while node != 0 {
                    let value = if package_id == pid::LIST_LONG {
                        mem.read_i64(node)?
                    } else {
                        mem.read_u32(node)? as i64
                    };
                    items.push(NativeValue::Int(value));
                    node = mem.read_pointer(node + 4)?;
                }
                Ok(NativeValue::List(items))
            }
            pid::INT_TO_LONG_MAP | pid::LONG_TO_INT_MAP | pid::LONG_TO_INT_MAP_REF | pid::AA_HASH
            | pid::AA_MULTIHASH | pid::INTMULTI_HASH | pid::INTMULTI_MULTIHASH => {
                let layout = read_hashtable_layout(mem, addr)?;
                let ptr_size = mem.bitness().pointer_size();
                let entries = walk_hashtable(mem, &layout, |mem, node| {
                    let key = mem.read_i64(node + ptr_size)?;
                    let value = mem.read_i64(node + ptr_size + 8)?;
                    let next = mem.read_pointer(node)?;
                    Ok(((key, value), next))
                })?;
                Ok(NativeValue::IntMap(entries.into_iter().collect()))
            }
            other => Err(Error::decode(format!("unsupported native package id {other}"))),
        }
    }

    fn decode_bitset_from_layout(mem: &dyn ProcessMemory, layout: &HashtableLayout) -> Result<BitSet> {
        let mut set = BitSet::with_bit_capacity(crate::constants::MAPNOTE_BIT_COUNT);
        let ptr_size = mem.bitness().pointer_size();
        let keys = walk_hashtable(mem, layout, |mem, node| {
            let key = mem.read_i64(node + ptr_size)?;
            let next = mem.read_pointer(node)?;
            Ok((key, next))
        })?;
        for key in keys {
            set.insert(key as usize);
        }
        Ok(set)
    }

    fn read_c_like_string(mem: &dyn ProcessMemory, ptr: u64) -> Result<String> {
        let mut bytes = Vec::new();
        let mut addr = ptr;
        loop {
            let b = mem.read_u8(addr)?;
            if b == 0 || bytes.len() > 4096 {
                break;
            }
            bytes.push(b);
            addr += 1;
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
