use base64::{engine::general_purpose, Engine as _};

use crate::storage::types::PayloadEncoding;

const PREVIEW_LEN: usize = 64;

/// Turns captured bytes into the text stored in `raw_payload`.
///
/// Valid UTF-8 is kept verbatim; anything else is base64-encoded and flagged as such.
pub fn encode_payload(data: &[u8]) -> (String, PayloadEncoding) {
    match std::str::from_utf8(data) {
        Ok(text) => (text.to_owned(), PayloadEncoding::Utf8),
        Err(_) => (
            general_purpose::STANDARD.encode(data),
            PayloadEncoding::Base64,
        ),
    }
}

/// Short lossy rendering of a payload for operational logs.
pub fn preview(data: &[u8]) -> String {
    let shown = &data[..data.len().min(PREVIEW_LEN)];
    format!(
        "{}{}",
        String::from_utf8_lossy(shown).escape_debug(),
        if data.len() > PREVIEW_LEN { " ..." } else { "" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_is_kept_verbatim() {
        let (text, encoding) = encode_payload("username=admin&password=test".as_bytes());
        assert_eq!(text, "username=admin&password=test");
        assert_eq!(encoding, PayloadEncoding::Utf8);

        let (text, encoding) = encode_payload("héllo".as_bytes());
        assert_eq!(text, "héllo");
        assert_eq!(encoding, PayloadEncoding::Utf8);
    }

    #[test]
    fn binary_is_base64() {
        let (text, encoding) = encode_payload(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(text, "3q2+7w==");
        assert_eq!(encoding, PayloadEncoding::Base64);
    }

    #[test]
    fn empty_payload_is_empty_text() {
        assert_eq!(encode_payload(b""), (String::new(), PayloadEncoding::Utf8));
    }

    #[test]
    fn preview_is_bounded_and_escaped() {
        let long = vec![b'a'; 200];
        let shown = preview(&long);
        assert!(shown.ends_with(" ..."));
        assert_eq!(shown.len(), PREVIEW_LEN + 4);
        assert_eq!(preview(b"ab\r\n"), "ab\\r\\n");
    }
}
