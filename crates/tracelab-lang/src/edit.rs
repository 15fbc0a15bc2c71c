//! Text insertions at byte offsets.
//!
//! Rewriters collect insertions while walking the token stream and apply
//! them in one pass. Insertions at the same offset keep the order in which
//! they were recorded.

/// A set of pending insertions into one source text.
#[derive(Debug, Default, Clone)]
pub struct Edits {
    inserts: Vec<(usize, String)>,
}

impl Edits {
    /// Create an empty edit set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `text` before the byte at `offset`.
    pub fn insert(&mut self, offset: usize, text: impl Into<String>) {
        self.inserts.push((offset, text.into()));
    }

    /// Number of recorded insertions.
    pub fn len(&self) -> usize {
        self.inserts.len()
    }

    /// Check if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
    }

    /// Apply every insertion to `source`.
    ///
    /// Offsets past the end are clamped, and offsets inside a multi-byte
    /// character are moved back to its start.
    pub fn apply(mut self, source: &str) -> String {
        self.inserts.sort_by_key(|(offset, _)| *offset);

        let extra: usize = self.inserts.iter().map(|(_, text)| text.len()).sum();
        let mut out = String::with_capacity(source.len() + extra);
        let mut cursor = 0;
        for (offset, text) in self.inserts {
            let mut offset = offset.min(source.len());
            while !source.is_char_boundary(offset) {
                offset -= 1;
            }
            if offset > cursor {
                out.push_str(&source[cursor..offset]);
                cursor = offset;
            }
            out.push_str(&text);
        }
        out.push_str(&source[cursor..]);
        out
    }
}
