//! Incremental content patches for frontend publication.
//!
//! A patch is a common-prefix offset plus the replacement tail:
//! `old[..offset] + patch == new`. Offsets are byte offsets and always fall
//! on a char boundary of both strings.

/// Change from previously published content to new content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patch {
    /// Byte length of the common prefix.
    pub offset: usize,
    /// Content replacing everything in `old` from `offset` on.
    pub patch: String,
    /// Byte length of the new content.
    pub total_length: usize,
}

impl Patch {
    /// Whether the patch carries no new content.
    pub fn is_empty(&self) -> bool {
        self.patch.is_empty()
    }

    /// Reconstruct the new content from the old.
    pub fn apply(&self, old: &str) -> String {
        let mut out = String::with_capacity(self.total_length);
        out.push_str(&old[..self.offset]);
        out.push_str(&self.patch);
        out
    }
}

/// Compute the patch turning `old` into `new`.
pub fn compute_patch(old: &str, new: &str) -> Patch {
    let offset = old
        .char_indices()
        .zip(new.chars())
        .find(|((_, a), b)| a != b)
        .map_or_else(|| old.len().min(new.len()), |((i, _), _)| i);
    Patch {
        offset,
        patch: new[offset..].to_owned(),
        total_length: new.len(),
    }
}
