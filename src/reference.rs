//! Resolves reference handles into decoded values, either against a live
//! process's reference table (memoized, gc-generation aware) or against a
//! loaded `WState`'s index-backed, acyclic reference list (§4.L, §4.M).

use std::cell::RefCell;
use std::collections::HashMap;

use modular_bitfield::prelude::*;

use crate::classlib::ClassLibrary;
use crate::constants::{
    ATTR_TYPE_FLOAT, ATTR_TYPE_INT, ATTR_TYPE_LONG, ATTR_TYPE_REFERENCE, ATTR_TYPE_TIMESTAMP,
    ATTR_TYPE_UNUSED, REFERENCE_DID_THRESHOLD,
};
use crate::enums::EnumRegistry;
use crate::mem::ProcessMemory;
use crate::native_package::{NativePackageCodec, NativeValue};
use crate::result::Result;
use crate::wstate::{AttributeValue, ClassBundle, ClassInstance, DataItem, EmbeddedValue, ScalarRef, WStateValue};

/// A reference-table entry's bitfield: the low bits are reserved, bit 28
/// selects native-package vs class-instance decoding, the top three bits
/// are unused (§3, §4.L).
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct ReferenceBitfield {
    #[skip]
    pub low: B28,
    pub native: bool,
    #[skip]
    pub high: B3,
}

/// Whether a handle names a resource did (archive content) or a live
/// reference-table index (§4.M).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Did,
    TableIndex,
}

pub fn classify_handle(handle: u32) -> HandleKind {
    if handle >= REFERENCE_DID_THRESHOLD {
        HandleKind::Did
    } else {
        HandleKind::TableIndex
    }
}

/// A resolved reference: either a leaf native/scalar value, a did passthrough,
/// a reference handle still awaiting resolution, or a container shape whose
/// elements may themselves need resolving (§4.L, §4.M).
#[derive(Debug, Clone)]
pub enum ResolvedValue {
    Did(u32),
    Pending(u32),
    Native(NativeValue),
    Float(f32),
    ClassInstance {
        class_index: u32,
        fields: HashMap<u32, ResolvedValue>,
    },
    Map(HashMap<i64, ResolvedValue>),
    List(Vec<ResolvedValue>),
    Loaded(WStateValue),
    Unresolved,
}

impl ResolvedValue {
    /// Replaces every `Pending` leaf reachable from `self` with its resolved
    /// value and recurses into map/list/class-instance containers, mirroring
    /// the reference resolver's `dict`/`list`/class-instance walk (§4.M). A
    /// container's non-reference entries are left untouched, matching the
    /// original: only attributes whose declared type is a reference, and
    /// values explicitly wrapped as a reference, are ever resolved.
    pub fn resolve_references(&mut self, resolve: &impl Fn(u32) -> ResolvedValue) {
        match self {
            ResolvedValue::Pending(handle) => {
                *self = resolve(*handle);
                self.resolve_references(resolve);
            }
            ResolvedValue::ClassInstance { fields, .. } => {
                for value in fields.values_mut() {
                    value.resolve_references(resolve);
                }
            }
            ResolvedValue::Map(map) => {
                for value in map.values_mut() {
                    value.resolve_references(resolve);
                }
            }
            ResolvedValue::List(list) => {
                for value in list.iter_mut() {
                    value.resolve_references(resolve);
                }
            }
            _ => {}
        }
    }
}

fn scalar_to_resolved(scalar: &ScalarRef) -> ResolvedValue {
    match scalar {
        ScalarRef::Value(v) => ResolvedValue::Native(NativeValue::Int(*v)),
        ScalarRef::Reference(v) => ResolvedValue::Pending(*v as u32),
    }
}

/// A single entry read from the live reference table: its bitfield (which
/// carries the native-vs-class-instance dispatch bit and the gc generation),
/// the package/class id, and the three pointers the client stores per slot —
/// a construction factory, a WSL-backed class-instance blob, and a native
/// package payload — only one of which is live for a given entry (§4.L).
#[derive(Debug, Clone, Copy)]
struct TableEntry {
    bitfield: u32,
    gc_generation: u32,
    type_id: u32,
    factory_ptr: u64,
    wsl_ptr: u64,
    native_ptr: u64,
}

/// Reads and memoizes entries out of a live process's reference table,
/// re-reading an entry whenever its stored `gc_generation` no longer matches
/// the table's current generation counter for that slot (§4.L).
pub struct ReferenceTable<'m> {
    mem: &'m dyn ProcessMemory,
    table_ptr: u64,
    entry_stride: u64,
    class_library: Option<&'m ClassLibrary>,
    cache: RefCell<HashMap<u32, (u32, ResolvedValue)>>,
}

impl<'m> ReferenceTable<'m> {
    pub fn new(mem: &'m dyn ProcessMemory, table_ptr: u64, entry_stride: u64) -> Self {
        Self {
            mem,
            table_ptr,
            entry_stride,
            class_library: None,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Attaches the class library needed to decode non-native entries'
    /// `ClassInstance` payloads (§4.L). Without one, non-native entries
    /// resolve to `Unresolved` rather than guessing at a schema.
    pub fn with_class_library(mut self, class_library: &'m ClassLibrary) -> Self {
        self.class_library = Some(class_library);
        self
    }

    fn read_entry(&self, index: u32) -> Result<TableEntry> {
        let ptr_size = self.mem.bitness().pointer_size();
        let addr = self.table_ptr + index as u64 * self.entry_stride;
        let pointers_base = addr + 12;
        Ok(TableEntry {
            bitfield: self.mem.read_u32(addr)?,
            gc_generation: self.mem.read_u32(addr + 4)?,
            type_id: self.mem.read_u32(addr + 8)?,
            factory_ptr: self.mem.read_pointer(pointers_base)?,
            wsl_ptr: self.mem.read_pointer(pointers_base + ptr_size)?,
            native_ptr: self.mem.read_pointer(pointers_base + ptr_size * 2)?,
        })
    }

    /// Resolves `index`, using the cache unless the live entry's generation
    /// has advanced since the cached value was captured (§4.L).
    pub fn resolve(&self, index: u32, enums: &EnumRegistry) -> Result<ResolvedValue> {
        let entry = self.read_entry(index)?;

        if let Some((cached_gen, value)) = self.cache.borrow().get(&index) {
            if *cached_gen == entry.gc_generation {
                return Ok(value.clone());
            }
        }

        let is_native = ReferenceBitfield::from_bytes(entry.bitfield.to_le_bytes()).native();
        let value = if is_native {
            if entry.native_ptr == 0 {
                ResolvedValue::Unresolved
            } else {
                NativePackageCodec::decode(self.mem, entry.native_ptr, entry.type_id, enums)
                    .map(ResolvedValue::Native)
                    .unwrap_or(ResolvedValue::Unresolved)
            }
        } else {
            self.resolve_class_instance(&entry)
        };

        self.cache
            .borrow_mut()
            .insert(index, (entry.gc_generation, value.clone()));
        Ok(value)
    }

    /// The non-native path: `factory_ptr` names the class the client
    /// constructed and `wsl_ptr` points at its attribute storage, laid out
    /// the same way `wstate::WStateLoader::read_embedded` reads an embedded
    /// class instance off a byte stream, just read directly out of memory
    /// instead (§4.J, §4.L).
    fn resolve_class_instance(&self, entry: &TableEntry) -> ResolvedValue {
        if entry.factory_ptr == 0 || entry.wsl_ptr == 0 {
            return ResolvedValue::Unresolved;
        }
        let Some(library) = self.class_library else {
            return ResolvedValue::Unresolved;
        };
        let Some(class_info) = library.get(entry.type_id) else {
            return ResolvedValue::Unresolved;
        };

        let mut fields = HashMap::with_capacity(class_info.attributes.len());
        for (slot, attr) in class_info.attributes.iter().enumerate() {
            let base = entry.wsl_ptr + slot as u64 * 8;
            let resolved = match attr.value_type {
                t if t == ATTR_TYPE_REFERENCE => self
                    .mem
                    .read_u32(base)
                    .map(ResolvedValue::Pending)
                    .unwrap_or(ResolvedValue::Unresolved),
                t if t == ATTR_TYPE_INT => self
                    .mem
                    .read_u32(base)
                    .map(|v| ResolvedValue::Native(NativeValue::Int(v as i64)))
                    .unwrap_or(ResolvedValue::Unresolved),
                t if t == ATTR_TYPE_FLOAT => self
                    .mem
                    .read_f32(base)
                    .map(ResolvedValue::Float)
                    .unwrap_or(ResolvedValue::Unresolved),
                t if matches!(t, ATTR_TYPE_LONG | ATTR_TYPE_UNUSED | ATTR_TYPE_TIMESTAMP) => self
                    .mem
                    .read_u64(base)
                    .map(|v| ResolvedValue::Native(NativeValue::Uint(v)))
                    .unwrap_or(ResolvedValue::Unresolved),
                _ => ResolvedValue::Unresolved,
            };
            fields.insert(attr.name_hash, resolved);
        }

        ResolvedValue::ClassInstance {
            class_index: entry.type_id,
            fields,
        }
    }
}

/// Resolves handles against a single loaded `WState`'s class bundle: its
/// `references`/`values` lists are parallel, so a handle resolves by finding
/// its position in `references` and returning the value at that position
/// (§4.M). Bundles can't cycle back on themselves within a single load, so
/// no memoization is needed, but the resolver tracks which references were
/// never dereferenced so callers can report dangling imports.
pub struct WStateResolver<'b> {
    bundle: &'b ClassBundle,
    unused_references: RefCell<Vec<bool>>,
}

impl<'b> WStateResolver<'b> {
    pub fn new(bundle: &'b ClassBundle) -> Self {
        Self {
            bundle,
            unused_references: RefCell::new(vec![true; bundle.references.len()]),
        }
    }

    pub fn bundle(&self) -> &ClassBundle {
        self.bundle
    }

    /// Resolves a handle the way `ReferencesResolver.__resolve` does: a did
    /// passes through unchanged, zero resolves to nothing, and any other
    /// value looks up the matching slot in the bundle's parallel
    /// `references`/`values` lists (§4.M).
    pub fn resolve(&self, handle: u32) -> ResolvedValue {
        if classify_handle(handle) == HandleKind::Did {
            return ResolvedValue::Did(handle);
        }
        if handle == 0 {
            return ResolvedValue::Unresolved;
        }
        let Some(position) = self.bundle.references.iter().position(|&r| r == handle) else {
            return ResolvedValue::Unresolved;
        };
        self.mark_used(position);
        match self.bundle.values.get(position) {
            Some(item) => self.convert(item),
            None => ResolvedValue::Unresolved,
        }
    }

    /// Resolves a handle and then recursively resolves every reference it
    /// transitively reaches, the way `resolve_references_in_val` walks a
    /// decoded tree after the initial lookup (§4.M).
    pub fn resolve_deep(&self, handle: u32) -> ResolvedValue {
        let mut value = self.resolve(handle);
        value.resolve_references(&|h| self.resolve(h));
        value
    }

    fn convert(&self, item: &DataItem) -> ResolvedValue {
        match item {
            DataItem::Reference(v) => ResolvedValue::Native(NativeValue::Uint(*v)),
            DataItem::Int(v) => ResolvedValue::Native(NativeValue::Int(*v as i64)),
            DataItem::Embedded(EmbeddedValue::Instance(instance)) => self.convert_instance(instance),
            DataItem::Embedded(EmbeddedValue::Loaded(value)) => self.convert_loaded(value),
        }
    }

    fn convert_instance(&self, instance: &ClassInstance) -> ResolvedValue {
        let fields = instance
            .attributes
            .iter()
            .map(|attr| {
                let value = match (attr.value_type, &attr.value) {
                    (t, AttributeValue::U32(handle)) if t == ATTR_TYPE_REFERENCE => ResolvedValue::Pending(*handle),
                    (_, AttributeValue::U32(v)) => ResolvedValue::Native(NativeValue::Int(*v as i64)),
                    (_, AttributeValue::Float(f)) => ResolvedValue::Float(*f),
                    (_, AttributeValue::U64(v)) => ResolvedValue::Native(NativeValue::Uint(*v)),
                    (_, AttributeValue::None) => ResolvedValue::Unresolved,
                };
                (attr.name_hash, value)
            })
            .collect();
        ResolvedValue::ClassInstance {
            class_index: instance.class_index,
            fields,
        }
    }

    /// Only the builtin sub-loader shapes that carry reference-wrapped
    /// scalars need a `Map`/`List` translation; everything else is an opaque
    /// leaf the original resolver never descends into either (§4.M).
    fn convert_loaded(&self, value: &WStateValue) -> ResolvedValue {
        match value {
            WStateValue::AaHash(map) => {
                ResolvedValue::Map(map.iter().map(|(k, v)| (*k as i64, scalar_to_resolved(v))).collect())
            }
            WStateValue::AaMultiHash(map) => ResolvedValue::Map(
                map.iter()
                    .map(|(k, vs)| (*k as i64, ResolvedValue::List(vs.iter().map(scalar_to_resolved).collect())))
                    .collect(),
            ),
            WStateValue::IntSet(values) => ResolvedValue::List(
                values.iter().map(|v| ResolvedValue::Native(NativeValue::Int(*v as i64))).collect(),
            ),
            WStateValue::IntLongMap(map) => {
                ResolvedValue::Map(map.iter().map(|(k, v)| (*k as i64, ResolvedValue::Native(NativeValue::Int(*v)))).collect())
            }
            WStateValue::LongArray(values) | WStateValue::LongHashSet(values) => {
                ResolvedValue::List(values.iter().map(|v| ResolvedValue::Native(NativeValue::Int(*v))).collect())
            }
            WStateValue::LongRefMap(map) => {
                ResolvedValue::Map(map.iter().map(|(k, v)| (*k as i64, scalar_to_resolved(v))).collect())
            }
            WStateValue::TripleList(items) => ResolvedValue::List(
                items
                    .iter()
                    .map(|(v1, v2, v4)| {
                        ResolvedValue::List(vec![
                            scalar_to_resolved(v1),
                            ResolvedValue::Native(NativeValue::Int(*v2 as i64)),
                            scalar_to_resolved(v4),
                        ])
                    })
                    .collect(),
            ),
            WStateValue::WeightTable(map) => ResolvedValue::Map(
                map.iter()
                    .map(|(k, v)| (*k as i64, ResolvedValue::Native(NativeValue::Int(*v as i64))))
                    .collect(),
            ),
            other => ResolvedValue::Loaded(other.clone()),
        }
    }

    fn mark_used(&self, position: usize) {
        if let Some(slot) = self.unused_references.borrow_mut().get_mut(position) {
            *slot = false;
        }
    }

    /// Indices into the bundle's reference list never dereferenced by any
    /// resolved value (§4.M).
    pub fn unused_reference_indices(&self) -> Vec<usize> {
        self.unused_references
            .borrow()
            .iter()
            .enumerate()
            .filter_map(|(i, &unused)| unused.then_some(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wstate::Attribute;

    #[test]
    fn classifies_did_vs_table_index() {
        assert_eq!(classify_handle(REFERENCE_DID_THRESHOLD), HandleKind::Did);
        assert_eq!(classify_handle(REFERENCE_DID_THRESHOLD - 1), HandleKind::TableIndex);
    }

    #[test]
    fn unused_references_start_all_marked() {
        let bundle = ClassBundle {
            references: vec![1, 2, 3],
            values: vec![DataItem::Int(1), DataItem::Int(2), DataItem::Int(3)],
        };
        let resolver = WStateResolver::new(&bundle);
        assert_eq!(resolver.unused_reference_indices().len(), 3);
    }

    #[test]
    fn resolves_a_reference_by_position_and_marks_it_used() {
        let bundle = ClassBundle {
            references: vec![10, 20],
            values: vec![DataItem::Int(111), DataItem::Int(222)],
        };
        let resolver = WStateResolver::new(&bundle);
        let value = resolver.resolve(20);
        assert!(matches!(value, ResolvedValue::Native(NativeValue::Int(222))));
        assert_eq!(resolver.unused_reference_indices(), vec![0]);
    }

    #[test]
    fn resolve_deep_follows_a_pending_attribute() {
        let bundle = ClassBundle {
            references: vec![1, 2],
            values: vec![
                DataItem::Embedded(EmbeddedValue::Instance(ClassInstance {
                    class_index: 9,
                    attributes: vec![Attribute {
                        name_hash: 0xAAAA,
                        value_type: crate::constants::ATTR_TYPE_REFERENCE,
                        value: AttributeValue::U32(2),
                    }],
                })),
                DataItem::Int(777),
            ],
        };
        let resolver = WStateResolver::new(&bundle);
        let value = resolver.resolve_deep(1);
        match value {
            ResolvedValue::ClassInstance { fields, .. } => {
                let resolved = fields.get(&0xAAAA).unwrap();
                assert!(matches!(resolved, ResolvedValue::Native(NativeValue::Int(777))));
            }
            other => panic!("expected a class instance, got {other:?}"),
        }
    }
}
