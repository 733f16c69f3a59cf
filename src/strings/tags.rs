//! The fixed single-letter tag alphabet used by string-table option
//! grammar (`[tag,!tag,…]`), and the small types built from it (§4.N).

use std::collections::HashMap;

use crate::result::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagDefinition {
    pub code: char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub definition: TagDefinition,
    pub negative: bool,
}

impl Tag {
    pub fn name(&self) -> String {
        if self.negative {
            format!("!{}", self.definition.code)
        } else {
            self.definition.code.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionItem {
    pub text: String,
    pub tags: Option<Vec<Tag>>,
}

/// The registry of single-letter tag codes (gender/number/class/race
/// markers) that `[tag,...]` option groups reference.
pub struct TagsManager {
    tags: HashMap<char, TagDefinition>,
}

const TAG_CODES: &[char] = &[
    '1', 'b', 'B', 'C', 'D', 'E', 'f', 'F', 'G', 'H', 'I', 'K', 'L', 'm', 'M', 'n', 'N', 'O', 'p',
    'P', 'R', 'S', 'T', 'U', 'v', 'V', 'W',
];

impl Default for TagsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TagsManager {
    pub fn new() -> Self {
        let tags = TAG_CODES
            .iter()
            .map(|&code| (code, TagDefinition { code }))
            .collect();
        Self { tags }
    }

    pub fn get(&self, code: char) -> Result<TagDefinition> {
        self.tags
            .get(&code)
            .copied()
            .ok_or_else(|| Error::decode(format!("unknown string-format tag code {code:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tag_is_recognized() {
        let mgr = TagsManager::new();
        assert_eq!(mgr.get('E').unwrap().code, 'E');
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let mgr = TagsManager::new();
        assert!(mgr.get('x').is_err());
    }
}
