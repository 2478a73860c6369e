use crossterm::style::Color;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Parse a label selector string ("a=b,c=d") into a BTreeMap.
pub fn parse_labels(sel_str: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for pair in sel_str.split(',') {
        let pair = pair.trim();
        if let Some(eq_pos) = pair.find('=') {
            let key = pair[..eq_pos].to_string();
            let value = pair[eq_pos + 1..].to_string();
            map.insert(key, value);
        }
    }
    map
}

/// Convert a plain label map (as carried by a Service) into a LabelSelector.
pub fn selector_from_labels(labels: BTreeMap<String, String>) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels),
        match_expressions: None,
    }
}

/// Check whether a selector selects nothing at all (no labels, no expressions).
pub fn is_empty_selector(selector: &LabelSelector) -> bool {
    selector.match_labels.as_ref().is_none_or(|l| l.is_empty())
        && selector.match_expressions.as_ref().is_none_or(|e| e.is_empty())
}

/// Render a LabelSelector in the query string syntax understood by the API server.
///
/// Returns an error naming the offending operator when an expression can't be
/// expressed as a selector string.
pub fn selector_to_string(selector: &LabelSelector) -> Result<String, String> {
    let mut parts = Vec::new();
    if let Some(labels) = &selector.match_labels {
        parts.extend(labels.iter().map(|(k, v)| format!("{}={}", k, v)));
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            parts.push(requirement_to_string(expr)?);
        }
    }
    Ok(parts.join(","))
}

fn requirement_to_string(expr: &LabelSelectorRequirement) -> Result<String, String> {
    let values = || expr.values.as_deref().unwrap_or_default().join(",");
    match expr.operator.as_str() {
        "In" => Ok(format!("{} in ({})", expr.key, values())),
        "NotIn" => Ok(format!("{} notin ({})", expr.key, values())),
        "Exists" => Ok(expr.key.clone()),
        "DoesNotExist" => Ok(format!("!{}", expr.key)),
        op => Err(format!("unknown selector operator '{}'", op)),
    }
}

/// Check if pod labels match the given LabelSelector.
pub fn matches_selector(pod_labels: &BTreeMap<String, String>, selector: &LabelSelector) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if pod_labels.get(key) != Some(value) {
                return false;
            }
        }
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let pod_value = pod_labels.get(&expr.key);
            let values = expr.values.as_deref().unwrap_or_default();
            let ok = match expr.operator.as_str() {
                "In" => pod_value.is_some_and(|v| values.contains(v)),
                "NotIn" => pod_value.is_none_or(|v| !values.contains(v)),
                "Exists" => pod_value.is_some(),
                "DoesNotExist" => pod_value.is_none(),
                _ => false, // Unknown operator
            };
            if !ok {
                return false;
            }
        }
    }
    true
}

/// Generate a stable color for a string based on its hash.
pub fn get_color(s: &str) -> Color {
    let colors = [
        Color::Red,
        Color::Green,
        Color::Blue,
        Color::Yellow,
        Color::Magenta,
        Color::Cyan,
        Color::AnsiValue(91),
        Color::AnsiValue(92),
        Color::AnsiValue(94),
        Color::AnsiValue(93),
        Color::AnsiValue(95),
        Color::AnsiValue(96),
    ];
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    let hash = hasher.finish() as u32;
    colors[(hash % colors.len() as u32) as usize]
}
