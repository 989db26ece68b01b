use crate::directory::{Change, DirectoryError, Entry};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Join LDIF continuation lines (a line starting with one space continues the previous one).
pub(crate) fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = vec![];
    for raw in text.lines() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        match (raw.strip_prefix(' '), lines.last_mut()) {
            (Some(continuation), Some(previous)) => previous.push_str(continuation),
            _ => lines.push(raw.to_string()),
        }
    }
    lines
}

/// Parse `ldapsearch -LLL` output into entries. Lines before the first `dn:` are ignored.
pub(crate) fn parse_entries(text: &str) -> Result<Vec<Entry>, DirectoryError> {
    let mut entries = vec![];
    let mut current: Option<Entry> = None;

    for line in unfold(text) {
        if line.trim().is_empty() {
            entries.extend(current.take());
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let (attribute, value) = match split_line(&line)? {
            Some(pair) => pair,
            None => continue,
        };

        if attribute.eq_ignore_ascii_case("dn") {
            entries.extend(current.take());
            current = Some(Entry::new(value));
            continue;
        }
        if let Some(entry) = current.as_mut() {
            entry.push_value(&attribute, value);
        }
    }
    entries.extend(current.take());

    Ok(entries)
}

pub(crate) fn render_add(dn: &str, attributes: &[(String, Vec<String>)]) -> String {
    let mut out = String::new();
    push_line(&mut out, "dn", dn);
    out.push_str("changetype: add\n");
    for (attribute, values) in attributes {
        for value in values {
            push_line(&mut out, attribute, value);
        }
    }
    out.push('\n');
    out
}

pub(crate) fn render_modify(dn: &str, changes: &[Change]) -> String {
    let mut out = String::new();
    push_line(&mut out, "dn", dn);
    out.push_str("changetype: modify\n");
    for change in changes {
        let (op, attribute, values) = match change {
            Change::Add { attribute, values } => ("add", attribute, values),
            Change::Replace { attribute, values } => ("replace", attribute, values),
            Change::Delete { attribute, values } => ("delete", attribute, values),
        };
        out.push_str(op);
        out.push_str(": ");
        out.push_str(attribute);
        out.push('\n');
        for value in values {
            push_line(&mut out, attribute, value);
        }
        out.push_str("-\n");
    }
    out.push('\n');
    out
}

fn split_line(line: &str) -> Result<Option<(String, String)>, DirectoryError> {
    let (attribute, rest) = match line.split_once(':') {
        Some(pair) => pair,
        None => return Ok(None),
    };

    let value = if let Some(encoded) = rest.strip_prefix(':') {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| DirectoryError::Malformed(format!("bad base64 value for {}: {}", attribute, e)))?;
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        rest.trim().to_string()
    };

    Ok(Some((attribute.trim().to_string(), value)))
}

fn push_line(out: &mut String, attribute: &str, value: &str) {
    out.push_str(attribute);
    if needs_base64(value) {
        out.push_str(":: ");
        out.push_str(&STANDARD.encode(value.as_bytes()));
    } else {
        out.push_str(": ");
        out.push_str(value);
    }
    out.push('\n');
}

// RFC 2849 SAFE-STRING rules.
fn needs_base64(value: &str) -> bool {
    if value.starts_with(' ') || value.starts_with(':') || value.starts_with('<') || value.ends_with(' ') {
        return true;
    }
    value.chars().any(|c| !c.is_ascii() || c == '\n' || c == '\r' || c == '\0')
}
