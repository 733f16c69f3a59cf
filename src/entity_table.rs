//! Walks the live entity hashtable to enumerate every spawned world object,
//! and extracts each entity's owned-properties/object-properties/object-
//! property-pointer handles (§4.K).

use crate::mem::{Bitness, ProcessMemory};
use crate::property::PropertyValueCodec;
use crate::result::Result;

use crate::constants::{
    CHARACTER_TYPE_PLAYER, ENTITY_OPP_OFFSET_32, ENTITY_OPP_OFFSET_64, ENTITY_OPS_OFFSET_32,
    ENTITY_OPS_OFFSET_64, ENTITY_OWE_OFFSET_32, ENTITY_OWE_OFFSET_64,
};

/// One live entity: its instance id, the world-entity object pointer, and
/// the three property-source pointers the rest of the walker reads through
/// (§4.K).
#[derive(Debug, Clone, Copy)]
pub struct EntityHandle {
    pub instance_id: u64,
    pub world_entity_ptr: u64,
    pub owe: u64,
    pub ops: u64,
    pub opp: u64,
}

fn offsets(bitness: Bitness) -> (u64, u64, u64) {
    match bitness {
        Bitness::Bits64 => (ENTITY_OWE_OFFSET_64, ENTITY_OPS_OFFSET_64, ENTITY_OPP_OFFSET_64),
        Bitness::Bits32 => (ENTITY_OWE_OFFSET_32, ENTITY_OPS_OFFSET_32, ENTITY_OPP_OFFSET_32),
    }
}

/// Walks the entity table's bucket array starting at `table_ptr`, reading
/// `{instance_id, next_offset_field, world_entity_ptr}` triples and
/// resolving each entity's property-source pointers (§4.K).
pub fn walk_entity_table(mem: &dyn ProcessMemory, table_ptr: u64, nb_buckets: u32) -> Result<Vec<EntityHandle>> {
    let ptr_size = mem.bitness().pointer_size();
    let (owe_off, ops_off, opp_off) = offsets(mem.bitness());
    let mut handles = Vec::new();

    for bucket in 0..nb_buckets as u64 {
        let mut node = mem.read_pointer(table_ptr + bucket * ptr_size)?;
        while node != 0 {
            let instance_id = mem.read_u64(node + ptr_size)?;
            let world_entity_ptr = mem.read_pointer(node + ptr_size + 8)?;
            let next = mem.read_pointer(node)?;

            if world_entity_ptr != 0 {
                handles.push(EntityHandle {
                    instance_id,
                    world_entity_ptr,
                    owe: world_entity_ptr + owe_off,
                    ops: world_entity_ptr + ops_off,
                    opp: world_entity_ptr + opp_off,
                });
            }
            node = next;
        }
    }
    Ok(handles)
}

/// Reads the `CharacterType` property off an entity's owned-properties
/// pointer and reports whether it matches the local player's value (§4.K).
pub fn is_player_character(mem: &dyn ProcessMemory, entity: &EntityHandle, character_type_offset: u64) -> Result<bool> {
    let value = PropertyValueCodec::decode_live(
        mem,
        entity.owe,
        character_type_offset,
        crate::property::PropertyType::Int64,
    )?;
    Ok(matches!(value, crate::property::PropertyValue::Int64(v) if v == CHARACTER_TYPE_PLAYER))
}

/// Scans every handle in `handles`, returning the first one identified as
/// the local player character (§4.K).
pub fn find_local_player(
    mem: &dyn ProcessMemory,
    handles: &[EntityHandle],
    character_type_offset: u64,
) -> Result<Option<EntityHandle>> {
    for handle in handles {
        if is_player_character(mem, handle, character_type_offset)? {
            return Ok(Some(*handle));
        }
    }
    Ok(None)
}
