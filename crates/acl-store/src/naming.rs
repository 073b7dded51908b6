//! Bucket name to collection name mapping.

use percent_encoding::percent_decode_str;

use crate::error::{AclStoreError, Result};

/// Turns bucket names into names a document database accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NameSanitizer {
    raw: bool,
}

impl NameSanitizer {
    /// With `raw` set, names are used exactly as given.
    pub fn new(raw: bool) -> Self {
        Self { raw }
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// URL-decode `name` and replace each whitespace or `/` character with `_`.
    ///
    /// Different inputs may sanitize to the same output.
    pub fn sanitize(&self, name: &str) -> Result<String> {
        if self.raw {
            return Ok(name.to_string());
        }

        let decoded = percent_decode_str(name)
            .decode_utf8()
            .map_err(|_| AclStoreError::InvalidEncoding(name.to_string()))?;

        Ok(decoded
            .chars()
            .map(|c| if c == '/' || c.is_whitespace() { '_' } else { c })
            .collect())
    }
}
