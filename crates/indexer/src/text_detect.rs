/// Bytes inspected when deciding whether a file is text.
pub const TEXT_SAMPLE_SIZE: usize = 4096;

const MAX_CONTROL_RATIO: f64 = 0.3;

/// Heuristic text check over the leading [`TEXT_SAMPLE_SIZE`] bytes.
///
/// Any NUL byte means binary. Otherwise the sample is binary when more than 30% of it is
/// control characters other than tab, LF, CR, form feed and backspace. Empty input is text.
#[must_use]
pub fn is_text_bytes(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(TEXT_SAMPLE_SIZE)];
    if sample.is_empty() {
        return true;
    }
    if sample.contains(&0) {
        return false;
    }
    let control = sample
        .iter()
        .filter(|&&b| b < 32 && !matches!(b, 8 | 9 | 10 | 12 | 13))
        .count();
    (control as f64 / sample.len() as f64) <= MAX_CONTROL_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_text() {
        assert!(is_text_bytes(b""));
    }

    #[test]
    fn nul_byte_is_binary() {
        assert!(!is_text_bytes(b"print('hi')\0"));
    }

    #[test]
    fn whitespace_controls_are_allowed() {
        assert!(is_text_bytes(b"a\tb\r\nc\x0c\x08"));
    }

    #[test]
    fn control_heavy_sample_is_binary() {
        assert!(!is_text_bytes(&[1, 2, 3, b'a']));
        // 3 of 10 bytes is exactly the threshold
        assert!(is_text_bytes(&[1, 2, 3, b'a', b'b', b'c', b'd', b'e', b'f', b'g']));
    }

    #[test]
    fn only_the_leading_sample_counts() {
        let mut bytes = vec![b'a'; TEXT_SAMPLE_SIZE];
        bytes.push(0);
        assert!(is_text_bytes(&bytes));
    }
}
