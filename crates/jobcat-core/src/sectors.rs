use serde_json::Value as JsonValue;

/// Normalizes the scraper's sector cell into a list of labels.
///
/// The scraper writes Python list reprs (`['IT','금융']`), so single quotes
/// are swapped for double quotes before decoding. Text that still does not
/// decode is kept whole as a single label.
pub fn parse_sectors(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::Array(items) => items.iter().map(json_label).collect(),
        JsonValue::String(text) => {
            let trimmed = text.trim();
            match serde_json::from_str::<JsonValue>(&trimmed.replace('\'', "\"")) {
                Ok(JsonValue::Array(items)) => items.iter().map(json_label).collect(),
                Ok(other) => vec![json_label(&other)],
                Err(_) => vec![trimmed.to_string()],
            }
        }
        _ => Vec::new(),
    }
}

/// Strings are taken verbatim; any other value keeps its JSON spelling, so a
/// cell reading `None` stays "None" while `null` or `true` stay lowercase.
fn json_label(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
