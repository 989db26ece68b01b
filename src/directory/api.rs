use std::fmt;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
}

impl Scope {
    /// The `-s` argument understood by `ldapsearch`.
    pub fn as_arg(&self) -> &'static str {
        match self {
            Scope::Base => "base",
            Scope::OneLevel => "one",
            Scope::Subtree => "sub",
        }
    }
}

/// Entry is one directory object. Every attribute is multi-valued: there is no schema telling us
/// which attributes are single-valued, so values are always an ordered sequence of strings.
///
/// Attribute names compare case-insensitively; the first spelling seen is kept.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Entry {
    dn: String,
    attributes: Vec<(String, Vec<String>)>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Entry {
            dn: dn.into(),
            attributes: vec![],
        }
    }

    pub fn with_value(mut self, attribute: &str, value: impl Into<String>) -> Self {
        self.push_value(attribute, value);
        self
    }

    pub fn with_values<I, S>(mut self, attribute: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for value in values {
            self.push_value(attribute, value);
        }
        self
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// All values of `attribute`, or `None` if the entry doesn't carry it at all.
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.position(attribute).map(|i| self.attributes[i].1.as_slice())
    }

    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.position(attribute).is_some()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.attributes
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn push_value(&mut self, attribute: &str, value: impl Into<String>) {
        match self.position(attribute) {
            Some(i) => self.attributes[i].1.push(value.into()),
            None => self.attributes.push((attribute.to_string(), vec![value.into()])),
        }
    }

    pub fn set_values(&mut self, attribute: &str, values: Vec<String>) {
        if values.is_empty() {
            self.remove_attribute(attribute);
            return;
        }
        match self.position(attribute) {
            Some(i) => self.attributes[i].1 = values,
            None => self.attributes.push((attribute.to_string(), values)),
        }
    }

    pub fn remove_attribute(&mut self, attribute: &str) -> bool {
        match self.position(attribute) {
            Some(i) => {
                self.attributes.remove(i);
                true
            }
            None => false,
        }
    }

    /// Remove one value (exact match). Drops the attribute once its last value is gone.
    pub fn remove_value(&mut self, attribute: &str, value: &str) -> bool {
        let i = match self.position(attribute) {
            Some(i) => i,
            None => return false,
        };
        let values = &mut self.attributes[i].1;
        let before = values.len();
        values.retain(|v| v != value);
        let removed = values.len() != before;
        if values.is_empty() {
            self.attributes.remove(i);
        }
        removed
    }

    fn position(&self, attribute: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(attribute))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Change {
    Add { attribute: String, values: Vec<String> },
    Replace { attribute: String, values: Vec<String> },
    /// Empty `values` deletes the whole attribute.
    Delete { attribute: String, values: Vec<String> },
}

impl Change {
    pub fn add(attribute: &str, value: impl Into<String>) -> Self {
        Change::Add {
            attribute: attribute.to_string(),
            values: vec![value.into()],
        }
    }

    pub fn replace(attribute: &str, value: impl Into<String>) -> Self {
        Change::Replace {
            attribute: attribute.to_string(),
            values: vec![value.into()],
        }
    }

    pub fn delete_value(attribute: &str, value: impl Into<String>) -> Self {
        Change::Delete {
            attribute: attribute.to_string(),
            values: vec![value.into()],
        }
    }

    pub fn attribute(&self) -> &str {
        match self {
            Change::Add { attribute, .. } | Change::Replace { attribute, .. } | Change::Delete { attribute, .. } => {
                attribute
            }
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Mutation {
    /// Create an entry with these attributes (the DN's own RDN value is not implied).
    Add(Vec<(String, Vec<String>)>),
    Modify(Vec<Change>),
    Delete,
}

/// Error strings deliberately carry the tool's wording ("Can't contact", "timeout") so that the
/// retry classifier can tell transient faults from definite ones.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DirectoryError {
    #[error("No such object: {0}")]
    NoSuchObject(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Can't contact directory, no usable ldapi or ldaps URL succeeded: {0}")]
    Unreachable(String),

    #[error("LDAP command timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("LDAP command failed rc={code}: {message}")]
    Command { code: i32, message: String },

    #[error("Invalid connection parameters: {0}")]
    InvalidParams(&'static str),

    #[error("Malformed directory response: {0}")]
    Malformed(String),
}

/// Directory is the narrow data-access seam to the directory service: reads return entries with
/// multi-valued attributes, writes are add/modify/delete of one entry. Implementations own their
/// connection handling; callers assume nothing is held between calls.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    async fn query(
        &self,
        scope: Scope,
        base: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError>;

    async fn mutate(&self, dn: &str, mutation: &Mutation) -> Result<(), DirectoryError>;

    /// Read one entry by DN. A missing entry is `Err(NoSuchObject)`.
    async fn read_entry(&self, dn: &str, attributes: &[&str]) -> Result<Entry, DirectoryError> {
        let mut entries = self.query(Scope::Base, dn, "(objectClass=*)", attributes).await?;
        if entries.is_empty() {
            return Err(DirectoryError::NoSuchObject(dn.to_string()));
        }
        Ok(entries.swap_remove(0))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}
