//! Minimal LDIF (RFC 2849) reading and writing, enough to drive the OpenLDAP
//! command-line tools.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::client::{DirectoryEntry, Modification};

/// Whether `value` may be written as-is after `attr: `
fn is_safe_string(value: &str) -> bool {
    let Some(first) = value.chars().next() else {
        return true;
    };
    if matches!(first, ' ' | ':' | '<') || value.ends_with(' ') {
        return false;
    }
    value.chars().all(|c| c.is_ascii() && !matches!(c, '\0' | '\n' | '\r'))
}

fn push_line(out: &mut String, attribute: &str, value: &str) {
    if is_safe_string(value) {
        out.push_str(&format!("{}: {}\n", attribute, value));
    } else {
        out.push_str(&format!("{}:: {}\n", attribute, STANDARD.encode(value.as_bytes())));
    }
}

/// LDIF content record for `ldapadd`
pub fn format_add(entry: &DirectoryEntry) -> String {
    let mut out = String::new();
    push_line(&mut out, "dn", &entry.dn);
    for (attribute, values) in &entry.attributes {
        for value in values {
            push_line(&mut out, attribute, value);
        }
    }
    out
}

/// LDIF change record for `ldapmodify`
pub fn format_modify(dn: &str, changes: &[Modification]) -> String {
    let mut out = String::new();
    push_line(&mut out, "dn", dn);
    out.push_str("changetype: modify\n");
    for change in changes {
        match change {
            Modification::Replace { attribute, values } => {
                out.push_str(&format!("replace: {}\n", attribute));
                for value in values {
                    push_line(&mut out, attribute, value);
                }
                out.push_str("-\n");
            }
        }
    }
    out
}

/// Parse search output (`ldapsearch -LLL`) into entries
pub fn parse_entries(text: &str) -> Result<Vec<DirectoryEntry>, String> {
    let mut entries = Vec::new();
    let mut current: Option<DirectoryEntry> = None;

    for line in unfold(text) {
        if line.is_empty() {
            entries.extend(current.take());
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let (attribute, value) = parse_line(&line)?;
        match current.as_mut() {
            None if attribute.eq_ignore_ascii_case("dn") => current = Some(DirectoryEntry::new(value)),
            None => return Err(format!("attribute '{}' before any dn", attribute)),
            Some(entry) => entry.push(&attribute, value),
        }
    }
    entries.extend(current);
    Ok(entries)
}

/// Join folded lines (continuations start with a single space)
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.lines() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        match (raw.strip_prefix(' '), lines.last_mut()) {
            (Some(continuation), Some(previous)) if !previous.is_empty() => previous.push_str(continuation),
            _ => lines.push(raw.to_string()),
        }
    }
    lines
}

fn parse_line(line: &str) -> Result<(String, String), String> {
    let (attribute, rest) = line
        .split_once(':')
        .ok_or_else(|| format!("malformed LDIF line '{}'", line))?;

    let value = if let Some(encoded) = rest.strip_prefix(':') {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("invalid base64 for '{}': {}", attribute, e))?;
        String::from_utf8(bytes).map_err(|_| format!("value of '{}' is not UTF-8", attribute))?
    } else if rest.starts_with('<') {
        return Err(format!("URL values are not supported ('{}')", attribute));
    } else {
        rest.strip_prefix(' ').unwrap_or(rest).to_string()
    };

    Ok((attribute.to_string(), value))
}
