use std::io::Cursor;

use assert_matches::assert_matches;
use realm_inspect::archive::ArchiveReader;
use realm_inspect::property::{PropertyRegistry, PropertyValue};
use realm_inspect::result::Result;

const ARCHIVE_HEADER_OFFSET: usize = 0x140;

fn write_super_block(buf: &mut Vec<u8>, root_offset: u32) {
    buf.resize(ARCHIVE_HEADER_OFFSET, 0);
    buf.extend_from_slice(&0x5442u32.to_le_bytes());
    buf.extend_from_slice(&4096u32.to_le_bytes());
    buf.extend_from_slice(&[0u8; 24]);
    buf.extend_from_slice(&root_offset.to_le_bytes());
    buf.extend_from_slice(&[0u8; 16]);
    buf.extend_from_slice(&7u32.to_le_bytes());
}

fn write_leaf_dir(buf: &mut Vec<u8>, offset: usize, file_id: u32, file_offset: u32, size: u32) {
    if buf.len() < offset {
        buf.resize(offset, 0);
    }
    let mut node = vec![0u8; 0x1FC + 32];
    node[0x1F8..0x1FC].copy_from_slice(&1u32.to_le_bytes());
    node[0x1FC..0x1FC + 2].copy_from_slice(&0u16.to_le_bytes());
    node[0x1FC + 4..0x1FC + 8].copy_from_slice(&file_id.to_le_bytes());
    node[0x1FC + 8..0x1FC + 12].copy_from_slice(&file_offset.to_le_bytes());
    node[0x1FC + 12..0x1FC + 16].copy_from_slice(&size.to_le_bytes());
    node[0x1FC + 24..0x1FC + 28].copy_from_slice(&4096u32.to_le_bytes());
    buf.extend_from_slice(&node);
}

fn write_property_resource() -> Vec<u8> {
    let mut bytes = vec![];
    bytes.extend_from_slice(&0x34000000u32.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 8]);

    bytes.push(0); // tsize bucket count
    bytes.push(1); // one name
    bytes.extend_from_slice(&5u32.to_le_bytes());
    bytes.push(6);
    bytes.extend_from_slice(b"Health");

    bytes.extend_from_slice(&[0u8; 2]);
    bytes.push(0); // tsize bucket count
    bytes.push(1); // one property def

    bytes.extend_from_slice(&5u32.to_le_bytes()); // outer pid
    bytes.extend_from_slice(&5u32.to_le_bytes()); // body pid (re-read)
    bytes.extend_from_slice(&15u32.to_le_bytes()); // PropertyType::Int
    bytes.extend_from_slice(&[0u8; 4]);
    bytes.extend_from_slice(&[0u8; 4]);
    bytes.extend_from_slice(&9u32.to_le_bytes()); // data
    bytes.extend_from_slice(&[0u8; 4]);
    bytes.extend_from_slice(&0x0800u32.to_le_bytes()); // flags word: default present
    bytes.extend_from_slice(&100u32.to_le_bytes()); // default value = 100
    bytes.extend_from_slice(&0x3FC00000u32.to_le_bytes()); // terminator marker
    bytes.extend_from_slice(&[0u8; 5]);
    bytes.push(0); // zero children
    bytes.extend_from_slice(&0u32.to_le_bytes()); // zero unknown pids
    bytes.extend_from_slice(&0u32.to_le_bytes()); // terminator

    bytes
}

#[test]
fn loads_a_property_registry_out_of_an_archive() -> Result<()> {
    let property_bytes = write_property_resource();

    let mut buf = Vec::new();
    let root_offset = ARCHIVE_HEADER_OFFSET as u32 + 0x200;
    write_super_block(&mut buf, root_offset);

    let payload_offset = root_offset as usize + 0x300;
    write_leaf_dir(&mut buf, root_offset as usize, 0x34000000, payload_offset as u32, property_bytes.len() as u32);

    if buf.len() < payload_offset {
        buf.resize(payload_offset, 0);
    }
    buf.extend_from_slice(&property_bytes);

    let mut reader = ArchiveReader::new(Cursor::new(buf))?;
    let bytes = reader.load_by_id(0x34000000)?.expect("property resource present");

    let registry = PropertyRegistry::decode(Cursor::new(bytes))?;
    let def = registry.get_by_name("Health").expect("Health registered");
    assert_eq!(def.pid().to_owned(), 5u32);
    assert_matches!(def.default(), Some(PropertyValue::Int(100)));

    Ok(())
}
