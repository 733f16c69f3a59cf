//! Localized string tables and the `StringInfo` handle a property or enum
//! entry uses to point at either a literal or a table entry (§3, §4.F,
//! §4.N).

pub mod format;
mod parser;
mod tags;

use std::collections::HashMap;
use std::io::Read;

use crate::hash::NameCache;
use crate::reader::BinaryReader;
use crate::result::Result;

/// Either a literal string or a pointer into a string table, optionally
/// carrying per-render variable values (§3).
#[derive(Debug, Clone)]
pub enum StringInfo {
    Literal(String),
    TableEntry {
        table_id: u32,
        token_id: u32,
        variables: HashMap<String, StringInfoValue>,
    },
}

#[derive(Debug, Clone)]
pub enum StringInfoValue {
    Integer(i64),
    Float(f32),
    Text(Box<StringInfo>),
}

/// Decodes a `StringInfo` from a stream (§4.E/§4.H `StringInfo` wire
/// format): a literal flag, then either a UTF-16 literal or a
/// `{token, table_id}` pair, optionally followed by a variable schema.
pub fn decode_string_info<R: Read>(
    reader: &mut BinaryReader<R>,
    names: &NameCache,
) -> Result<StringInfo> {
    let is_literal = reader.bool()?;
    if is_literal {
        return Ok(StringInfo::Literal(reader.prefixed_utf16()?));
    }

    let token_id = reader.u32()?;
    let table_id = reader.u32()?;
    let mut variables = HashMap::new();

    let has_strings = reader.bool()?;
    if has_strings {
        for _ in 0..3 {
            reader.pascal_string()?;
        }
        let num_variables = reader.vle()?;
        for _ in 0..num_variables {
            let vartype = reader.i8()?;
            if !matches!(vartype, 0 | 1 | 2 | 4) {
                return Err(crate::result::Error::decode(format!(
                    "unsupported string-info variable type {vartype}"
                )));
            }
            if vartype == 0 {
                continue;
            }
            let variable_token = reader.u32()?;
            let variable_name = names.get_or_hex(variable_token);
            if vartype != 1 {
                let count = reader.i8()?;
                if count != 1 {
                    return Err(crate::result::Error::decode(
                        "string-info variable value count was not 1",
                    ));
                }
            }
            let value = match vartype {
                4 => StringInfoValue::Integer(reader.vle()? as i64),
                1 => StringInfoValue::Text(Box::new(decode_string_info(reader, names)?)),
                2 => StringInfoValue::Float(reader.f32()?),
                _ => unreachable!(),
            };
            variables.insert(variable_name, value);
        }
    } else {
        let remainder1 = reader.i8()?;
        let remainder2 = reader.u8()?;
        if remainder1 != 1 || remainder2 != 0 {
            return Err(crate::result::Error::decode(
                "string-info remainder bytes did not match expected 1,0",
            ));
        }
    }

    Ok(StringInfo::TableEntry {
        table_id,
        token_id,
        variables,
    })
}

/// A single token's label parts, variable slots, and (optionally) the
/// developer-facing variable names (§4.F).
#[derive(Debug, Clone)]
pub struct StringTableEntry {
    pub token: u32,
    pub label_parts: Vec<String>,
    pub variable_ids: Vec<u32>,
    pub variable_names: Option<Vec<String>>,
}

/// One localized string table, keyed by token (§4.F).
#[derive(Debug, Default)]
pub struct StringTable {
    pub did: u32,
    entries: HashMap<u32, StringTableEntry>,
}

impl StringTable {
    pub fn get(&self, token: u32) -> Option<&StringTableEntry> {
        self.entries.get(&token)
    }
}

/// Decodes a string-table resource: `{did, flag, tsize entries}` (§4.F).
pub fn decode_string_table<R: Read>(bytes: R) -> Result<StringTable> {
    let mut reader = BinaryReader::new(bytes);
    let did = reader.u32()?;
    let flag = reader.u32()?;
    if flag != 0 && flag != 1 {
        return Err(crate::result::Error::decode(format!(
            "string table flag {flag} was neither 0 nor 1"
        )));
    }

    let mut table = StringTable {
        did,
        entries: HashMap::new(),
    };

    let num_entries = reader.tsize()?;
    for _ in 0..num_entries {
        let token = reader.u32()?;
        let unused = reader.u32()?;
        if unused != 0 {
            return Err(crate::result::Error::decode("string sublist padding was nonzero"));
        }

        let label_count = reader.u32()?;
        let mut label_parts = Vec::with_capacity(label_count as usize);
        for _ in 0..label_count {
            label_parts.push(reader.prefixed_utf16()?);
        }

        let num_variables = reader.u32()?;
        let mut variable_ids = Vec::with_capacity(num_variables as usize);
        for _ in 0..num_variables {
            variable_ids.push(reader.u32()?);
        }
        if num_variables != label_count.saturating_sub(1) {
            return Err(crate::result::Error::decode(
                "string sublist variable count did not match label part count",
            ));
        }

        let has_names = reader.bool()?;
        let variable_names = if has_names {
            let count = reader.u32()?;
            if count != num_variables {
                return Err(crate::result::Error::decode(
                    "string sublist variable-name count mismatch",
                ));
            }
            let mut names = Vec::with_capacity(count as usize);
            for _ in 0..count {
                names.push(reader.prefixed_utf16()?);
            }
            Some(names)
        } else {
            None
        };

        table.entries.insert(
            token,
            StringTableEntry {
                token,
                label_parts,
                variable_ids,
                variable_names,
            },
        );
    }

    Ok(table)
}

/// Owns the known-variable-name cache and renders `StringInfo` values into
/// display strings, resolving table entries through a lookup callback so it
/// doesn't need to own an archive reader itself (§4.N).
pub struct StringFormatter {
    names: NameCache,
}

impl Default for StringFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl StringFormatter {
    pub fn new() -> Self {
        Self {
            names: crate::hash::bootstrap_known_variables(),
        }
    }

    pub fn names(&self) -> &NameCache {
        &self.names
    }

    /// Builds the format string for a raw table entry.
    pub fn build_format(&self, entry: &StringTableEntry) -> Result<String> {
        format::build_format(entry, &self.names)
    }

    /// Renders a `StringInfo`, looking up table entries via `lookup`
    /// (`(table_id, token_id) -> Option<StringTableEntry>`).
    pub fn render(
        &self,
        info: &StringInfo,
        lookup: &dyn Fn(u32, u32) -> Option<StringTableEntry>,
    ) -> Result<Option<String>> {
        match info {
            StringInfo::Literal(text) => Ok(Some(text.clone())),
            StringInfo::TableEntry {
                table_id,
                token_id,
                variables,
            } => {
                let Some(entry) = lookup(*table_id, *token_id) else {
                    return Ok(None);
                };
                let format = self.build_format(&entry)?;
                if !format.contains("${") {
                    return Ok(Some(format));
                }
                let mut rendered_vars = HashMap::new();
                for (name, value) in variables {
                    let rendered = match value {
                        StringInfoValue::Integer(i) => i.to_string(),
                        StringInfoValue::Float(f) => f.to_string(),
                        StringInfoValue::Text(inner) => {
                            self.render(inner, lookup)?.unwrap_or_default()
                        }
                    };
                    rendered_vars.insert(name.clone(), rendered);
                }
                Ok(Some(format::render(&format, &rendered_vars)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn decodes_literal_string_info() {
        let mut bytes = vec![1u8];
        bytes.push(2);
        bytes.extend_from_slice(&0x0041u16.to_le_bytes());
        bytes.extend_from_slice(&0x0042u16.to_le_bytes());
        let mut reader = BinaryReader::new(Cursor::new(bytes));
        let names = crate::hash::bootstrap_known_variables();
        let info = decode_string_info(&mut reader, &names).unwrap();
        assert!(matches!(info, StringInfo::Literal(s) if s == "AB"));
    }

    #[test]
    fn decodes_empty_string_table() {
        let mut bytes = vec![];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push(0);
        bytes.push(0);
        let table = decode_string_table(Cursor::new(bytes)).unwrap();
        assert_eq!(table.did, 1);
        assert!(table.get(0).is_none());
    }
}
