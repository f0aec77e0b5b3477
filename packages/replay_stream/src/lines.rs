//! Delimiter splitting across chunk boundaries.

/// The record delimiter of the wire format.
pub const DELIMITER: char = '\n';

/// Splits a text stream into delimited segments, buffering the partial
/// segment that follows the last delimiter until more text arrives.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` and return every segment completed by it, in order.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let Some(last) = self.buffer.rfind(DELIMITER) else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last + DELIMITER.len_utf8());
        let complete = std::mem::replace(&mut self.buffer, rest);
        complete[..last]
            .split(DELIMITER)
            .map(str::to_string)
            .collect()
    }

    /// The partial segment waiting for its delimiter.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// End of input. Returns the unterminated trailing segment, which callers
    /// drop: only delimiter-terminated segments are records.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
