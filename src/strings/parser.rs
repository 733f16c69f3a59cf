//! Tokenizes a label part's `#N:opt1[tags]|opt2[tags]` grammar into literal
//! and variable-reference parts (§4.N).

use crate::result::Result;
use crate::strings::tags::{OptionItem, Tag, TagsManager};

#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Literal(String),
    Variable {
        index: usize,
        options: Option<Vec<OptionItem>>,
    },
}

pub struct StringParser;

impl StringParser {
    pub fn parse(input: &str) -> Result<Vec<StringPart>> {
        let chars: Vec<char> = input.chars().collect();
        let mut parts = Vec::new();
        let mut index = 0usize;
        while index < chars.len() {
            match Self::parse_variable_reference(&chars, index)? {
                Some((variable, start, end)) => {
                    if start > index {
                        parts.push(StringPart::Literal(chars[index..start].iter().collect()));
                    }
                    parts.push(variable);
                    index = end + 1;
                }
                None => {
                    parts.push(StringPart::Literal(chars[index..].iter().collect()));
                    index = chars.len();
                }
            }
        }
        Ok(parts)
    }

    fn parse_variable_reference(
        chars: &[char],
        from: usize,
    ) -> Result<Option<(StringPart, usize, usize)>> {
        let Some(sharp) = find(chars, '#', from) else {
            return Ok(None);
        };
        let Some(colon) = find(chars, ':', sharp + 1) else {
            return Ok(None);
        };
        let number_str: String = chars[sharp + 1..colon].iter().collect();
        let Ok(number) = number_str.parse::<usize>() else {
            return Ok(None);
        };

        let mut end = colon;
        let mut options = None;
        if let Some(open) = find(chars, '{', colon + 1) {
            if let Some(close) = find(chars, '}', open + 1) {
                end = close;
                let options_str: String = chars[open + 1..close].iter().collect();
                options = Some(Self::parse_options(&options_str)?);
            }
        }

        Ok(Some((
            StringPart::Variable {
                index: number,
                options,
            },
            sharp,
            end,
        )))
    }

    pub fn parse_options(options_str: &str) -> Result<Vec<OptionItem>> {
        options_str
            .split('|')
            .map(Self::parse_option_item)
            .collect()
    }

    fn parse_option_item(item: &str) -> Result<OptionItem> {
        match Self::extract_tags_str(item) {
            Some((tag_str, open_bracket)) => {
                let tags = Self::parse_tags(&tag_str)?;
                let text = item[..open_bracket].to_string();
                Ok(OptionItem {
                    text,
                    tags: Some(tags),
                })
            }
            None => Ok(OptionItem {
                text: item.to_string(),
                tags: None,
            }),
        }
    }

    /// Returns the bracketed tag string and the byte index of its opening
    /// bracket, if this option carries one.
    pub fn extract_tags_str(item: &str) -> Option<(String, usize)> {
        let open = item.find('[')?;
        let close = item[open + 1..].find(']').map(|i| open + 1 + i);
        let close = close.unwrap_or(item.len() - 1);
        Some((item[open + 1..close].to_string(), open))
    }

    fn parse_tags(tag_str: &str) -> Result<Vec<Tag>> {
        let manager = TagsManager::new();
        let mut tags = Vec::new();
        let mut negative = false;
        for ch in tag_str.chars() {
            if ch == ',' {
                continue;
            }
            if ch == '!' {
                negative = true;
                continue;
            }
            tags.push(Tag {
                definition: manager.get(ch)?,
                negative,
            });
            negative = false;
        }
        Ok(tags)
    }
}

fn find(chars: &[char], needle: char, from: usize) -> Option<usize> {
    chars[from.min(chars.len())..]
        .iter()
        .position(|&c| c == needle)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_literal() {
        let parts = StringParser::parse("hello world").unwrap();
        assert_eq!(parts, vec![StringPart::Literal("hello world".to_string())]);
    }

    #[test]
    fn parses_variable_without_options() {
        let parts = StringParser::parse("Hi #1:!").unwrap();
        assert_eq!(
            parts,
            vec![
                StringPart::Literal("Hi ".to_string()),
                StringPart::Variable {
                    index: 1,
                    options: None
                },
                StringPart::Literal("!".to_string()),
            ]
        );
    }

    #[test]
    fn parses_variable_with_tagged_options() {
        let parts = StringParser::parse("#1:{he[m]|she[f]}").unwrap();
        let StringPart::Variable { options, .. } = &parts[0] else {
            panic!("expected a variable part");
        };
        let options = options.as_ref().unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].text, "he");
        assert_eq!(options[0].tags.as_ref().unwrap()[0].definition.code, 'm');
    }
}
