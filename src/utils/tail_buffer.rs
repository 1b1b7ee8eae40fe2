// src/utils/tail_buffer.rs
//! Fixed-capacity text window.

/// Retains at most the last `capacity` chars of the text pushed into it.
///
/// Older chars are dropped from the front as new text arrives, so a substring
/// search over `window + next` finds any pattern of at most `capacity` chars
/// that straddles the boundary between pushes.
#[derive(Debug, Clone)]
pub struct TailBuffer {
    text: String,
    chars: usize,
    capacity: usize,
}

impl TailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            capacity,
        }
    }

    pub fn push(&mut self, s: &str) {
        self.text.push_str(s);
        self.chars += s.chars().count();
        if self.chars > self.capacity {
            let excess = self.chars - self.capacity;
            let cut = self
                .text
                .char_indices()
                .nth(excess)
                .map(|(i, _)| i)
                .unwrap_or(self.text.len());
            self.text.drain(..cut);
            self.chars = self.capacity;
        }
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.chars = 0;
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_everything_under_capacity() {
        let mut buf = TailBuffer::new(8);
        buf.push("abc");
        buf.push("de");
        assert_eq!(buf.as_str(), "abcde");
        assert_eq!(buf.char_len(), 5);
    }

    #[test]
    fn drops_oldest_chars_over_capacity() {
        let mut buf = TailBuffer::new(4);
        buf.push("abc");
        buf.push("def");
        assert_eq!(buf.as_str(), "cdef");
        buf.push("0123456789");
        assert_eq!(buf.as_str(), "6789");
        assert_eq!(buf.char_len(), 4);
    }

    #[test]
    fn counts_chars_not_bytes() {
        let mut buf = TailBuffer::new(3);
        buf.push("｜tool▁");
        assert_eq!(buf.as_str(), "ol▁");
        assert_eq!(buf.char_len(), 3);
        assert!(buf.len() > 3);
    }

    #[test]
    fn clear_resets() {
        let mut buf = TailBuffer::new(3);
        buf.push("abcdef");
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.char_len(), 0);
    }
}
