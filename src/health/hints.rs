use std::collections::BTreeSet;

/// Hints accumulated over a whole wait. Kept sorted and unique, so the same problem seen on many
/// cycles is reported once.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HintSet {
    hints: BTreeSet<String>,
}

impl HintSet {
    pub fn new() -> Self {
        HintSet::default()
    }

    pub fn insert(&mut self, hint: impl Into<String>) {
        self.hints.insert(hint.into());
    }

    pub fn extend<I, S>(&mut self, hints: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints.extend(hints.into_iter().map(Into::into));
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.hints.iter().cloned().collect()
    }
}
