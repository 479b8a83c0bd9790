//! Bounded capture of container and build output.

/// Accumulates streamed output up to a byte limit.
///
/// Once the limit is reached further chunks are dropped and the rendered
/// text carries a truncation marker.
#[derive(Debug)]
pub struct CappedOutput {
    buf: String,
    limit: usize,
    truncated: bool,
}

impl CappedOutput {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: String::new(),
            limit,
            truncated: false,
        }
    }

    /// Append a chunk. Returns `false` once the limit has been hit.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if self.truncated {
            return false;
        }

        let text = String::from_utf8_lossy(chunk);
        let remaining = self.limit.saturating_sub(self.buf.len());
        if text.len() <= remaining {
            self.buf.push_str(&text);
            return true;
        }

        let mut cut = remaining;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buf.push_str(&text[..cut]);
        self.truncated = true;
        false
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The captured text, with a marker appended when output was dropped.
    pub fn into_string(self) -> String {
        if self.truncated {
            format!("{}\n[output truncated at {} bytes]", self.buf, self.limit)
        } else {
            self.buf
        }
    }
}
