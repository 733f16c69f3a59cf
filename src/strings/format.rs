//! Turns a `StringTableEntry` into a display format string, and renders a
//! format string against a variable value map (§4.N).

use std::collections::HashMap;

use crate::hash::NameCache;
use crate::result::Result;
use crate::strings::parser::{StringParser, StringPart};
use crate::strings::tags::OptionItem;
use crate::strings::StringTableEntry;

/// Builds the `${name}` / `${name:opt1[tags]|opt2[tags]}` format string for
/// a table entry, resolving variable ids through `names` (§4.N).
pub fn build_format(entry: &StringTableEntry, names: &NameCache) -> Result<String> {
    let decoded: Vec<Vec<StringPart>> = entry
        .label_parts
        .iter()
        .map(|part| StringParser::parse(part))
        .collect::<Result<_>>()?;

    let has_variable = decoded
        .iter()
        .flatten()
        .any(|p| matches!(p, StringPart::Variable { .. }));

    if has_variable {
        Ok(render_with_variables(entry, &decoded, names))
    } else {
        Ok(render_without_variables(entry, names))
    }
}

fn render_with_variables(
    entry: &StringTableEntry,
    decoded: &[Vec<StringPart>],
    names: &NameCache,
) -> String {
    let mut index_to_name: HashMap<usize, String> = HashMap::new();
    let mut position = 0usize;
    for parts in decoded {
        for part in parts {
            if let StringPart::Variable { index, .. } = part {
                index_to_name.entry(*index).or_insert_with(|| {
                    let name = entry
                        .variable_ids
                        .get(position)
                        .map(|&id| names.get_or_hex(id))
                        .unwrap_or_default();
                    position += 1;
                    name
                });
            }
        }
    }

    let mut out = String::new();
    for parts in decoded {
        for part in parts {
            match part {
                StringPart::Literal(text) => out.push_str(text),
                StringPart::Variable { index, options } => {
                    let Some(name) = index_to_name.get(index) else {
                        continue;
                    };
                    out.push_str("${");
                    out.push_str(name);
                    if let Some(options) = options {
                        out.push(':');
                        out.push_str(&render_options_format(options));
                    }
                    out.push('}');
                }
            }
        }
    }
    out
}

fn render_without_variables(entry: &StringTableEntry, names: &NameCache) -> String {
    let mut out = String::new();
    if let Some(first) = entry.label_parts.first() {
        out.push_str(first);
    }
    for (i, part) in entry.label_parts.iter().enumerate().skip(1) {
        if let Some(&var_id) = entry.variable_ids.get(i - 1) {
            out.push_str("${");
            out.push_str(&names.get_or_hex(var_id));
            out.push('}');
        }
        out.push_str(part);
    }
    out
}

fn render_options_format(options: &[OptionItem]) -> String {
    let mut out = String::new();
    for (i, option) in options.iter().enumerate() {
        if i > 0 {
            out.push('|');
        }
        out.push_str(&option.text);
        if let Some(tags) = &option.tags {
            out.push('[');
            for (j, tag) in tags.iter().enumerate() {
                if j > 0 {
                    out.push(',');
                }
                out.push_str(&tag.name());
            }
            out.push(']');
        }
    }
    out
}

/// Substitutes `${name}` and `${name:opt1[tags]|opt2[tags]}` placeholders
/// in `format` with values from `variables`, matched by name (§4.N).
pub fn render(format: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::new();
    let mut index = 0usize;
    let chars: Vec<char> = format.chars().collect();
    loop {
        let Some(start) = find(&chars, "${", index) else {
            out.extend(&chars[index..]);
            break;
        };
        out.extend(&chars[index..start]);
        let Some(end) = find(&chars, "}", start + 2) else {
            out.extend(&chars[start..]);
            break;
        };
        let body: String = chars[start + 2..end].iter().collect();
        out.push_str(&render_variable(&body, variables));
        index = end + 1;
    }
    out
}

fn render_variable(body: &str, variables: &HashMap<String, String>) -> String {
    match body.find(':') {
        None => variables.get(body).cloned().unwrap_or_else(|| body.to_string()),
        Some(colon) => {
            let name = &body[..colon];
            let value = variables.get(name).cloned().unwrap_or_default();
            let options_str = &body[colon + 1..];
            let options = StringParser::parse_options(options_str).unwrap_or_default();
            choose_option(&options, &value)
                .map(|o| o.text.clone())
                .unwrap_or_default()
        }
    }
}

fn choose_option<'a>(options: &'a [OptionItem], value: &str) -> Option<&'a OptionItem> {
    let tags_str = StringParser::extract_tags_str(value).map(|(tags, _)| tags);
    let mut best: Option<&OptionItem> = None;
    let mut best_score = 0usize;
    let mut default_option: Option<&OptionItem> = None;
    for option in options {
        if option.tags.is_none() {
            default_option = Some(option);
        }
        let score = count_common_tags(option, value, tags_str.as_deref());
        if best.is_none() || score >= best_score {
            best = Some(option);
            best_score = score;
        }
    }
    if best_score == 0 {
        default_option.or(best)
    } else {
        best
    }
}

fn count_common_tags(option: &OptionItem, value: &str, tags_str: Option<&str>) -> usize {
    let Some(tags) = &option.tags else {
        return 0;
    };
    let mut matches = 0;
    for tag in tags {
        if tag.definition.code == 'E' {
            if !value.is_empty() {
                matches += 1;
            }
            continue;
        }
        let present = tags_str.is_some_and(|s| s.contains(tag.definition.code));
        if tag.negative {
            if !present {
                matches += 1;
            }
        } else if present {
            matches += 1;
        }
    }
    matches
}

fn find(chars: &[char], needle: &str, from: usize) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    if needle.is_empty() || from > chars.len() {
        return None;
    }
    (from..=chars.len().saturating_sub(needle.len())).find(|&start| chars[start..start + needle.len()] == needle[..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::bootstrap_known_variables;

    #[test]
    fn builds_format_without_variables() {
        let entry = StringTableEntry {
            token: 1,
            label_parts: vec!["You gain ".to_string(), " gold.".to_string()],
            variable_ids: vec![788899],
            variable_names: None,
        };
        let names = bootstrap_known_variables();
        let format = build_format(&entry, &names).unwrap();
        assert_eq!(format, "You gain ${CURRENT} gold.");
    }

    #[test]
    fn renders_simple_substitution() {
        let mut vars = HashMap::new();
        vars.insert("PLAYER".to_string(), "Bilbo".to_string());
        assert_eq!(render("Hello ${PLAYER}!", &vars), "Hello Bilbo!");
    }

    #[test]
    fn renders_option_with_matching_tag() {
        let mut vars = HashMap::new();
        vars.insert("RACE".to_string(), "[f]".to_string());
        let rendered = render("${RACE:he[m]|she[f]}", &vars);
        assert_eq!(rendered, "she");
    }

    #[test]
    fn falls_back_to_tagless_default_on_no_match() {
        let mut vars = HashMap::new();
        vars.insert("RACE".to_string(), "thing".to_string());
        let rendered = render("${RACE:it|he[m]|she[f]}", &vars);
        assert_eq!(rendered, "it");
    }
}
