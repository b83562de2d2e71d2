//! Utilities for handling strings.

use std::fmt::Write;


//------------ append_hex ----------------------------------------------------

/// Appends the hex representation of a bytes slice to a string.
pub fn append_hex(src: &[u8], target: &mut String) {
    for &ch in src {
        write!(target, "{:02x}", ch).expect(
            "appending to string failed"
        );
    }
}


//------------ sanitize_uri --------------------------------------------------

/// Reduces a request target to characters safe to place in a log line.
///
/// Characters outside the set RFC 3986 allows in a URI are dropped and the
/// result is truncated to at most `max_len` characters.
pub fn sanitize_uri(uri: &str, max_len: usize) -> String {
    uri.chars().filter(|ch| is_safe_uri_char(*ch)).take(max_len).collect()
}

/// Returns whether a character may appear in a sanitized URI.
fn is_safe_uri_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(
        ch,
        '!' | '*' | '\'' | '(' | ')' | ';' | ':' | '@' | '&' | '=' | '+'
            | '$' | ',' | '/' | '?' | '#' | '[' | ']' | '-' | '_' | '.'
            | '~' | '%'
    )
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex() {
        let mut target = String::new();
        append_hex(b"\x00\xab\xff", &mut target);
        assert_eq!(target, "00abff");
    }

    #[test]
    fn sanitize() {
        assert_eq!(
            sanitize_uri("/wallet/abc?check=1", 100),
            "/wallet/abc?check=1"
        );
        assert_eq!(
            sanitize_uri("/some\r\npath\twith junk", 100),
            "/somepathwithjunk"
        );
        assert_eq!(sanitize_uri("/aaaaaa", 4), "/aaa");
    }
}
