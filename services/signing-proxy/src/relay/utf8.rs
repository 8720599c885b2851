//! UTF-8 carry-over across transport chunks.

/// Holds the trailing bytes of a code point split across two chunks.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    /// Decodes as much of `pending + chunk` as forms complete characters.
    ///
    /// Invalid sequences become U+FFFD; an incomplete tail is kept for
    /// the next call.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut start = 0;

        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    out.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    /// Flushes whatever is left at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(b"hello"), "hello");
        assert!(carry.finish().is_none());
    }

    #[test]
    fn test_split_code_point() {
        let bytes = "héllo".as_bytes();
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(&bytes[..2]), "h");
        assert_eq!(carry.push(&bytes[2..]), "éllo");
    }

    #[test]
    fn test_four_byte_split_three_ways() {
        let bytes = "🦀".as_bytes();
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(&bytes[..1]), "");
        assert_eq!(carry.push(&bytes[1..3]), "");
        assert_eq!(carry.push(&bytes[3..]), "🦀");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn test_truncated_tail_flushed() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(&"é".as_bytes()[..1]), "");
        assert_eq!(carry.finish().as_deref(), Some("\u{fffd}"));
    }
}
