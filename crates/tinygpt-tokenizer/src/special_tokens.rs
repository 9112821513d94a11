//! Special token handling

/// Special tokens reserved in every trained vocabulary
///
/// They are registered with the BPE trainer before any merge is learned, so
/// they always occupy the lowest ids in the order returned by [`all`](Self::all).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialTokens {
    /// Unknown token
    unk: String,
    /// Classification / start-of-sequence marker
    cls: String,
    /// Separator between segments
    sep: String,
    /// Padding token - used for batching sequences of different lengths
    pad: String,
    /// Mask token
    mask: String,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            unk: "[UNK]".to_string(),
            cls: "[CLS]".to_string(),
            sep: "[SEP]".to_string(),
            pad: "[PAD]".to_string(),
            mask: "[MASK]".to_string(),
        }
    }
}

impl SpecialTokens {
    /// Create a new SpecialTokens instance with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the unknown token
    pub fn unk(&self) -> &str {
        &self.unk
    }

    /// Get the classification token
    pub fn cls(&self) -> &str {
        &self.cls
    }

    /// Get the separator token
    pub fn sep(&self) -> &str {
        &self.sep
    }

    /// Get the padding token
    pub fn pad(&self) -> &str {
        &self.pad
    }

    /// Get the mask token
    pub fn mask(&self) -> &str {
        &self.mask
    }

    /// Get all special tokens in vocabulary order
    pub fn all(&self) -> Vec<&str> {
        vec![self.unk(), self.cls(), self.sep(), self.pad(), self.mask()]
    }

    /// Check if a token is a special token
    pub fn is_special(&self, token: &str) -> bool {
        self.all().contains(&token)
    }
}
