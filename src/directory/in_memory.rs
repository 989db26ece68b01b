use crate::directory::dn::{normalize, parent_dn};
use crate::directory::{Change, Directory, DirectoryError, Entry, Mutation, Scope};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// InMemoryDirectory models the directory service in process memory. It understands the filter
/// subset the replication tooling uses: equality, presence, `&`, `|` and `!`.
///
/// Clones share the same tree, so a test can keep one handle to change entries while the code
/// under test reads through another. Failures can be injected for the whole directory or for
/// reads based at a single DN.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    unavailable: Option<DirectoryError>,
    entry_failures: HashMap<String, DirectoryError>,
    query_count: usize,
    mutations: Vec<(String, Mutation)>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        InMemoryDirectory::default()
    }

    /// Insert or overwrite an entry without going through `mutate()`.
    pub fn put(&self, entry: Entry) {
        self.with_state(|state| {
            state.entries.insert(normalize(entry.dn()), entry);
        })
    }

    pub fn remove(&self, dn: &str) -> Option<Entry> {
        self.with_state(|state| state.entries.remove(&normalize(dn)))
    }

    pub fn get(&self, dn: &str) -> Option<Entry> {
        self.with_state(|state| state.entries.get(&normalize(dn)).cloned())
    }

    /// Replace all values of one attribute on an existing entry. Returns false if there is no such
    /// entry.
    pub fn set_attribute(&self, dn: &str, attribute: &str, values: Vec<String>) -> bool {
        self.with_state(|state| match state.entries.get_mut(&normalize(dn)) {
            Some(entry) => {
                entry.set_values(attribute, values);
                true
            }
            None => false,
        })
    }

    /// Make every operation fail with `error` until cleared with `None`.
    pub fn set_unavailable(&self, error: Option<DirectoryError>) {
        self.with_state(|state| state.unavailable = error)
    }

    /// Make queries based at `dn` fail with `error`.
    pub fn fail_reads_of(&self, dn: &str, error: DirectoryError) {
        self.with_state(|state| {
            state.entry_failures.insert(normalize(dn), error);
        })
    }

    pub fn clear_failures(&self) {
        self.with_state(|state| {
            state.unavailable = None;
            state.entry_failures.clear();
        })
    }

    pub fn query_count(&self) -> usize {
        self.with_state(|state| state.query_count)
    }

    /// Every successful mutation, in order.
    pub fn mutation_log(&self) -> Vec<(String, Mutation)> {
        self.with_state(|state| state.mutations.clone())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut guard = self.state.lock().expect("InMemoryDirectory mutex guard poison");
        f(&mut guard)
    }
}

#[async_trait::async_trait]
impl Directory for InMemoryDirectory {
    async fn query(
        &self,
        scope: Scope,
        base: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError> {
        let filter = Filter::parse(filter)?;

        self.with_state(|state| {
            state.query_count += 1;
            if let Some(error) = &state.unavailable {
                return Err(error.clone());
            }

            let base_key = normalize(base);
            if let Some(error) = state.entry_failures.get(&base_key) {
                return Err(error.clone());
            }
            if !state.entries.contains_key(&base_key) {
                return Err(DirectoryError::NoSuchObject(base.to_string()));
            }

            let results = state
                .entries
                .iter()
                .filter(|(key, _)| in_scope(scope, &base_key, key))
                .map(|(_, entry)| entry)
                .filter(|entry| filter.matches(entry))
                .map(|entry| project(entry, attributes))
                .collect();

            Ok(results)
        })
    }

    async fn mutate(&self, dn: &str, mutation: &Mutation) -> Result<(), DirectoryError> {
        self.with_state(|state| {
            if let Some(error) = &state.unavailable {
                return Err(error.clone());
            }

            let key = normalize(dn);
            match mutation {
                Mutation::Add(attributes) => {
                    if state.entries.contains_key(&key) {
                        return Err(DirectoryError::AlreadyExists(dn.to_string()));
                    }
                    let mut entry = Entry::new(dn);
                    for (attribute, values) in attributes {
                        for value in values {
                            entry.push_value(attribute, value.clone());
                        }
                    }
                    state.entries.insert(key, entry);
                }
                Mutation::Modify(changes) => {
                    let entry = match state.entries.get_mut(&key) {
                        Some(entry) => entry,
                        None => return Err(DirectoryError::NoSuchObject(dn.to_string())),
                    };
                    // Apply to a copy so a failing change leaves the entry untouched.
                    let mut updated = entry.clone();
                    for change in changes {
                        apply_change(&mut updated, change)?;
                    }
                    *entry = updated;
                }
                Mutation::Delete => {
                    if !state.entries.contains_key(&key) {
                        return Err(DirectoryError::NoSuchObject(dn.to_string()));
                    }
                    let has_children = state.entries.keys().any(|other| parent_dn(other) == Some(key.as_str()));
                    if has_children {
                        return Err(DirectoryError::Command {
                            code: 66,
                            message: "Operation not allowed on non-leaf".into(),
                        });
                    }
                    state.entries.remove(&key);
                }
            }

            state.mutations.push((dn.to_string(), mutation.clone()));
            Ok(())
        })
    }
}

fn apply_change(entry: &mut Entry, change: &Change) -> Result<(), DirectoryError> {
    match change {
        Change::Add { attribute, values } => {
            for value in values {
                let exists = entry
                    .values(attribute)
                    .map_or(false, |current| current.iter().any(|v| v.eq_ignore_ascii_case(value)));
                if exists {
                    return Err(DirectoryError::Command {
                        code: 20,
                        message: format!("Type or value exists: {}", attribute),
                    });
                }
                entry.push_value(attribute, value.clone());
            }
        }
        Change::Replace { attribute, values } => entry.set_values(attribute, values.clone()),
        Change::Delete { attribute, values } => {
            let missing = if values.is_empty() {
                !entry.remove_attribute(attribute)
            } else {
                values.iter().any(|value| !entry.remove_value(attribute, value))
            };
            if missing {
                return Err(DirectoryError::Command {
                    code: 16,
                    message: format!("No such attribute: {}", attribute),
                });
            }
        }
    }
    Ok(())
}

fn in_scope(scope: Scope, base_key: &str, key: &str) -> bool {
    match scope {
        Scope::Base => key == base_key,
        Scope::OneLevel => parent_dn(key) == Some(base_key),
        Scope::Subtree => key == base_key || key.ends_with(&format!(",{}", base_key)),
    }
}

fn project(entry: &Entry, attributes: &[&str]) -> Entry {
    if attributes.is_empty() || attributes.contains(&"*") {
        return entry.clone();
    }
    let mut projected = Entry::new(entry.dn());
    for (name, values) in entry.attributes() {
        if attributes.iter().any(|wanted| wanted.eq_ignore_ascii_case(name)) {
            projected.set_values(name, values.to_vec());
        }
    }
    projected
}

#[derive(Debug, PartialEq)]
enum Filter {
    Equals(String, String),
    Present(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    fn parse(text: &str) -> Result<Filter, DirectoryError> {
        let (filter, rest) = Filter::parse_one(text.trim())?;
        if !rest.trim().is_empty() {
            return Err(DirectoryError::Malformed(format!("trailing filter text: {}", rest)));
        }
        Ok(filter)
    }

    fn parse_one(text: &str) -> Result<(Filter, &str), DirectoryError> {
        let malformed = || DirectoryError::Malformed(format!("bad filter: {}", text));

        let inner = text.strip_prefix('(').ok_or_else(malformed)?;
        match inner.chars().next() {
            Some('&') | Some('|') => {
                let mut rest = &inner[1..];
                let mut parts = vec![];
                while rest.starts_with('(') {
                    let (part, remaining) = Filter::parse_one(rest)?;
                    parts.push(part);
                    rest = remaining;
                }
                let rest = rest.strip_prefix(')').ok_or_else(malformed)?;
                let filter = if inner.starts_with('&') {
                    Filter::And(parts)
                } else {
                    Filter::Or(parts)
                };
                Ok((filter, rest))
            }
            Some('!') => {
                let (part, rest) = Filter::parse_one(&inner[1..])?;
                let rest = rest.strip_prefix(')').ok_or_else(malformed)?;
                Ok((Filter::Not(Box::new(part)), rest))
            }
            _ => {
                let end = inner.find(')').ok_or_else(malformed)?;
                let (attribute, value) = inner[..end].split_once('=').ok_or_else(malformed)?;
                let filter = if value == "*" {
                    Filter::Present(attribute.trim().to_string())
                } else {
                    Filter::Equals(attribute.trim().to_string(), unescape_value(value))
                };
                Ok((filter, &inner[end + 1..]))
            }
        }
    }

    fn matches(&self, entry: &Entry) -> bool {
        match self {
            // Every directory entry has an object class.
            Filter::Present(attribute) if attribute.eq_ignore_ascii_case("objectClass") => true,
            Filter::Present(attribute) => entry.has_attribute(attribute),
            Filter::Equals(attribute, expected) => entry
                .values(attribute)
                .map_or(false, |values| values.iter().any(|v| v.eq_ignore_ascii_case(expected))),
            Filter::And(parts) => parts.iter().all(|part| part.matches(entry)),
            Filter::Or(parts) => parts.iter().any(|part| part.matches(entry)),
            Filter::Not(part) => !part.matches(entry),
        }
    }
}

// Decode `\\XX` hex escapes in an assertion value.
fn unescape_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(Ok(byte)) = value.get(i + 1..i + 3).map(|hex| u8::from_str_radix(hex, 16)) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
