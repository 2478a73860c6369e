use serde_json::Value;

/// Replaces a JSON log line by the values found at a set of field paths.
///
/// Paths are dot separated (`request.status`), numeric components index into
/// arrays (`items.0.name`). Values are joined with a single space; a missing
/// field contributes an empty string.
#[derive(Debug, Clone, Default)]
pub struct FieldProjection {
    fields: Vec<Vec<String>>,
}

impl FieldProjection {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields = fields
            .into_iter()
            .map(|f| f.as_ref().split('.').map(str::to_string).collect())
            .collect();
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn apply(&self, line: &str) -> String {
        if self.fields.is_empty() {
            return line.to_string();
        }
        let doc: Value = serde_json::from_str(line.trim()).unwrap_or(Value::Null);
        self.fields
            .iter()
            .map(|path| lookup(&doc, path).map(render).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |value, key| match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
