/// Escape a suffix DN so it can be used as the value of a single `cn=` RDN in the mapping tree.
pub fn escape_suffix(suffix: &str) -> String {
    suffix.replace('=', "\\3D").replace(',', "\\2C")
}

/// DN of the replica configuration entry for `suffix`.
pub fn replica_dn(suffix: &str) -> String {
    format!("cn=replica,cn={},cn=mapping tree,cn=config", escape_suffix(suffix))
}

/// DN of an agreement named `name` under the replica entry.
pub fn agreement_dn(name: &str, replica_dn: &str) -> String {
    format!("cn={},{}", name, replica_dn)
}

/// Value of the leading `cn=` RDN, or the whole DN when it doesn't start with one.
pub fn cn_from_dn(dn: &str) -> &str {
    let (rdn, _) = split_first_rdn(dn);
    match rdn.split_once('=') {
        Some((attribute, value)) if attribute.trim().eq_ignore_ascii_case("cn") => value,
        _ => dn,
    }
}

/// The DN one level up, or `None` for a single-RDN DN.
pub fn parent_dn(dn: &str) -> Option<&str> {
    let (_, rest) = split_first_rdn(dn);
    rest
}

/// Escape a value for use inside a search filter assertion.
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Normalize for comparison: lowercase, no whitespace around separators.
pub(crate) fn normalize(dn: &str) -> String {
    let mut normalized = String::with_capacity(dn.len());
    let mut remaining = Some(dn);
    while let Some(current) = remaining {
        let (rdn, rest) = split_first_rdn(current);
        if !normalized.is_empty() {
            normalized.push(',');
        }
        match rdn.split_once('=') {
            Some((attribute, value)) => {
                normalized.push_str(&attribute.trim().to_lowercase());
                normalized.push('=');
                normalized.push_str(&value.trim().to_lowercase());
            }
            None => normalized.push_str(&rdn.trim().to_lowercase()),
        }
        remaining = rest;
    }
    normalized
}

// Split at the first unescaped comma.
fn split_first_rdn(dn: &str) -> (&str, Option<&str>) {
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => return (&dn[..i], Some(&dn[i + 1..])),
            _ => escaped = false,
        }
    }
    (dn, None)
}
