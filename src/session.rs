//! Ties the static-pattern-located tables, the entity table walk, and the
//! live reference table together into one inspection surface over an
//! attached process (§4.O).

use crate::entity_table::{self, EntityHandle};
use crate::enums::EnumRegistry;
use crate::mem::ProcessMemory;
use crate::native_package::NativeValue;
use crate::reference::{ReferenceTable, ResolvedValue};
use crate::result::Result;

/// Client account metadata read from fixed offsets off the
/// `client_account_data` static pointer (§4.B, §4.O).
#[derive(Debug, Clone)]
pub struct ClientAccountData {
    pub server_name: String,
    pub language: String,
    pub account_name: String,
}

/// Everything `ExtractionSession::open` resolves before any property can be
/// read: the entity table's contents, the reference table, and the account
/// metadata block (§4.O).
pub struct ExtractionSession<'m> {
    mem: &'m dyn ProcessMemory,
    entities: Vec<EntityHandle>,
    reference_table: ReferenceTable<'m>,
    character_type_offset: u64,
}

impl<'m> ExtractionSession<'m> {
    pub fn new(
        mem: &'m dyn ProcessMemory,
        entity_table_ptr: u64,
        entity_table_buckets: u32,
        reference_table_ptr: u64,
        reference_entry_stride: u64,
        character_type_offset: u64,
    ) -> Result<Self> {
        let entities = entity_table::walk_entity_table(mem, entity_table_ptr, entity_table_buckets)?;
        let reference_table = ReferenceTable::new(mem, reference_table_ptr, reference_entry_stride);
        Ok(Self {
            mem,
            entities,
            reference_table,
            character_type_offset,
        })
    }

    pub fn entities(&self) -> &[EntityHandle] {
        &self.entities
    }

    pub fn find_local_player(&self) -> Result<Option<EntityHandle>> {
        entity_table::find_local_player(self.mem, &self.entities, self.character_type_offset)
    }

    pub fn is_local_player(&self, entity: &EntityHandle) -> Result<bool> {
        entity_table::is_player_character(self.mem, entity, self.character_type_offset)
    }

    /// Finds every reference-table slot whose resolved native value carries
    /// the given package id, resolving lazily and skipping slots that don't
    /// decode cleanly (§4.O).
    pub fn find_all(&self, package_id: u32, enums: &EnumRegistry, candidate_indices: &[u32]) -> Vec<ResolvedValue> {
        candidate_indices
            .iter()
            .filter_map(|&index| self.reference_table.resolve(index, enums).ok())
            .filter(|value| matches!(value, ResolvedValue::Native(v) if native_value_package_matches(v, package_id)))
            .collect()
    }

    pub fn reference_table(&self) -> &ReferenceTable<'m> {
        &self.reference_table
    }

    /// Reads the client account data block at `addr` (§4.O).
    pub fn read_client_account_data(mem: &dyn ProcessMemory, addr: u64) -> Result<ClientAccountData> {
        let ptr_size = mem.bitness().pointer_size();
        let server_ptr = mem.read_pointer(addr)?;
        let language_ptr = mem.read_pointer(addr + ptr_size)?;
        let account_ptr = mem.read_pointer(addr + ptr_size * 2)?;
        Ok(ClientAccountData {
            server_name: read_c_string(mem, server_ptr)?,
            language: read_c_string(mem, language_ptr)?,
            account_name: read_c_string(mem, account_ptr)?,
        })
    }
}

fn native_value_package_matches(value: &NativeValue, package_id: u32) -> bool {
    use crate::native_package::package_id as pid;
    match value {
        NativeValue::Currency { .. } => package_id == pid::CURRENCY,
        NativeValue::MapNotes(_) => package_id == pid::MAP_NOTES,
        NativeValue::Friends(_) => package_id == pid::FRIENDS,
        NativeValue::Ignores(_) => package_id == pid::IGNORES,
        NativeValue::Vault { .. } => package_id == pid::VAULT_DESCRIPTOR,
        NativeValue::VaultItem { .. } => package_id == pid::VAULT_ITEM_DESCRIPTOR,
        NativeValue::Bitset(_) => package_id == pid::DYNAMIC_BITSET,
        NativeValue::Position(_) => package_id == pid::POSITION,
        NativeValue::Str(_) => package_id == pid::STRING,
        _ => false,
    }
}

fn read_c_string(mem: &dyn ProcessMemory, ptr: u64) -> Result<String> {
    let mut bytes = Vec::new();
    let mut addr = ptr;
    loop {
        let b = mem.read_u8(addr)?;
        if b == 0 || bytes.len() > 256 {
            break;
        }
        bytes.push(b);
        addr += 1;
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
