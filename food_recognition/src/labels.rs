use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Class-id to name table owned by a loaded model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn name_of(&self, class_id: u32) -> String {
        match self.labels.get(class_id as usize) {
            Some(label) => label.clone(),
            None => format!("Unknown class {}", class_id),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Reads one label per line. Extra comma-separated columns (e.g. a colour
/// triple) are ignored; blank lines are skipped.
pub fn load_labels_file(filepath: &Path) -> io::Result<ClassLabels> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.split(',').next().unwrap_or_default().trim();
        if label.is_empty() {
            continue;
        }
        labels.push(label.to_string());
    }

    Ok(ClassLabels::new(labels))
}

/// Parses the `names` metadata written by YOLO exporters, a Python dict
/// literal such as `{0: 'person', 1: "teddy bear"}`.
pub fn parse_names_metadata(raw: &str) -> Result<ClassLabels, String> {
    let body = raw
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| format!("names metadata is not a dict: {}", raw))?;

    let mut entries: Vec<(usize, String)> = Vec::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.peek().copied().filter(|c| c.is_ascii_digit()) {
            key.push(c);
            chars.next();
        }
        let id: usize = key
            .parse()
            .map_err(|_| format!("invalid class id near `{}`", key))?;

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.next() != Some(':') {
            return Err(format!("missing `:` after class id {}", id));
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let quote = match chars.next() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(format!("class {} has an unquoted name", id)),
        };
        let mut name = String::new();
        loop {
            match chars.next() {
                Some('\\') => {
                    if let Some(escaped) = chars.next() {
                        name.push(escaped);
                    }
                }
                Some(c) if c == quote => break,
                Some(c) => name.push(c),
                None => return Err(format!("unterminated name for class {}", id)),
            }
        }
        entries.push((id, name));
    }

    entries.sort_by_key(|(id, _)| *id);
    let mut labels = Vec::with_capacity(entries.len());
    for (id, name) in entries {
        if id != labels.len() {
            return Err(format!("class ids are not contiguous at {}", id));
        }
        labels.push(name);
    }

    Ok(ClassLabels::new(labels))
}
