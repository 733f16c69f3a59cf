//! Out-of-process inspector for a live MMO game client: attaches to the
//! process, locates key tables by scanning for byte patterns, walks live
//! entity/reference/property structures, and cross-references the client's
//! on-disk content archives to resolve names, enums, strings and class
//! definitions into a decoded view of the player and world (§1).

pub mod archive;
pub mod bitset;
pub mod classlib;
mod constants;
pub mod entity_table;
pub mod enums;
pub mod hash;
pub mod mem;
pub mod native_package;
pub mod poller;
pub mod position;
pub mod property;
pub mod reader;
pub mod reference;
pub mod result;
pub mod session;
pub mod strings;
pub mod wstate;

pub use result::{Error, Result};

use std::path::{Path, PathBuf};

use archive::ArchiveReader;
use classlib::ClassLibrary;
use enums::{decode_enum_table, EnumRegistry};
use property::PropertyRegistry;
use strings::{decode_string_table, StringTable};

/// Resolves resource dids against the installed content archives and
/// decodes the handful of master resources (property registry, class
/// library, enum tables, string tables) the rest of the crate needs (§4.C,
/// §4.D, §4.E, §4.F, §4.G).
pub struct ContentDatabase {
    root: PathBuf,
}

impl ContentDatabase {
    pub fn open(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Loads the bytes for `did`, trying each archive `archive::archives_for`
    /// names in order until one contains it (§4.D).
    pub fn load_resource(&self, did: u32) -> Result<Vec<u8>> {
        for &name in archive::archives_for(did) {
            let path = self.root.join(format!("{name}.dat"));
            if !path.exists() {
                continue;
            }
            let mut reader = ArchiveReader::open(&path)?;
            if let Some(bytes) = reader.load_by_id(did)? {
                return Ok(bytes);
            }
        }
        Err(Error::ResourceNotFound { did })
    }

    pub fn load_property_registry(&self) -> Result<PropertyRegistry> {
        let bytes = self.load_resource(constants::DID_MASTER_PROPERTY_TABLE)?;
        PropertyRegistry::decode(std::io::Cursor::new(bytes))
    }

    pub fn load_class_library(&self) -> Result<ClassLibrary> {
        let bytes = self.load_resource(constants::DID_CLASS_LIBRARY)?;
        ClassLibrary::decode(std::io::Cursor::new(bytes), &classlib::known_class_names())
    }

    pub fn load_enum_table(&self, did: u32) -> Result<enums::EnumTable> {
        let bytes = self.load_resource(did)?;
        decode_enum_table(std::io::Cursor::new(bytes))
    }

    pub fn load_enum_registry(&self, dids: impl IntoIterator<Item = u32>) -> Result<EnumRegistry> {
        let mut registry = EnumRegistry::new();
        for did in dids {
            registry.insert(self.load_enum_table(did)?);
        }
        Ok(registry)
    }

    pub fn load_string_table(&self, did: u32) -> Result<StringTable> {
        let bytes = self.load_resource(did)?;
        decode_string_table(std::io::Cursor::new(bytes))
    }
}
