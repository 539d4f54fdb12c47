use crate::error::MailViewError;
use charset::Charset;
use tracing::debug;

/// data_encoding::BASE64_MIME, despite its name, will not ignore the
/// spaces that show up in real transfer-encoded bodies, so define an
/// alphabet that does.
pub const BASE64_RFC2045: data_encoding::Encoding = data_encoding_macro::new_encoding! {
    symbols: "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/",
    padding: '=',
    ignore: " \r\n\t",
    wrap_width: 76,
    wrap_separator: "\r\n",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentTransferEncoding {
    #[default]
    SevenBit,
    EightBit,
    Binary,
    QuotedPrintable,
    Base64,
    /// Unrecognised labels pass the body through untouched.
    Other,
}

impl ContentTransferEncoding {
    pub fn from_label(label: &str) -> Self {
        let label = label.split(';').next().unwrap_or("").trim();
        if label.is_empty() || label.eq_ignore_ascii_case("7bit") {
            Self::SevenBit
        } else if label.eq_ignore_ascii_case("8bit") {
            Self::EightBit
        } else if label.eq_ignore_ascii_case("binary") {
            Self::Binary
        } else if label.eq_ignore_ascii_case("quoted-printable") {
            Self::QuotedPrintable
        } else if label.eq_ignore_ascii_case("base64") {
            Self::Base64
        } else {
            Self::Other
        }
    }
}

fn try_decode(encoding: ContentTransferEncoding, data: &str) -> crate::Result<Vec<u8>> {
    match encoding {
        ContentTransferEncoding::Base64 => BASE64_RFC2045
            .decode(data.as_bytes())
            .map_err(|err| MailViewError::BodyDecode(format!("base64: {err}"))),
        ContentTransferEncoding::QuotedPrintable => {
            quoted_printable::decode(data.as_bytes(), quoted_printable::ParseMode::Robust)
                .map_err(|err| MailViewError::BodyDecode(format!("quoted-printable: {err}")))
        }
        ContentTransferEncoding::SevenBit
        | ContentTransferEncoding::EightBit
        | ContentTransferEncoding::Binary
        | ContentTransferEncoding::Other => Ok(data.as_bytes().to_vec()),
    }
}

/// Undo the declared transfer encoding. Never fails: bodies that do not
/// decode are passed through as raw octets.
pub fn decode_transfer_encoding(encoding: ContentTransferEncoding, data: &str) -> Vec<u8> {
    match try_decode(encoding, data) {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!("transfer decode failed, passing body through: {err}");
            data.as_bytes().to_vec()
        }
    }
}

/// Decode part octets into text per the declared charset, falling back
/// to a lossy UTF-8 read for unknown or absent labels.
pub fn decode_charset_text(bytes: &[u8], charset_label: &str) -> String {
    let label = charset_label.trim();
    if !label.is_empty() {
        if let Some(charset) = Charset::for_label_no_replacement(label.as_bytes()) {
            let (decoded, _malformed) = charset.decode_without_bom_handling(bytes);
            return decoded.into_owned();
        }
        debug!("unknown charset label {label:?}, falling back to utf-8");
    }
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn base64_ignores_embedded_whitespace() {
        let decoded = decode_transfer_encoding(
            ContentTransferEncoding::Base64,
            "aGVs bG8s\r\nIHdv cmxk\r\n",
        );
        assert_eq!(decoded, b"hello, world");
    }

    #[test]
    fn base64_round_trip() {
        let input: Vec<u8> = (0u8..=255).collect();
        let encoded = BASE64_RFC2045.encode(&input);
        let decoded = decode_transfer_encoding(ContentTransferEncoding::Base64, &encoded);
        assert_eq!(decoded, input);
    }

    #[test]
    fn quoted_printable_soft_breaks() {
        let decoded = decode_transfer_encoding(
            ContentTransferEncoding::QuotedPrintable,
            "one =E2=82=AC, split acr=\r\noss lines",
        );
        assert_eq!(decoded, "one \u{20ac}, split across lines".as_bytes());
    }

    #[test]
    fn quoted_printable_round_trip() {
        let input = b"tabs\tand = signs, and\r\nnewlines";
        let encoded = quoted_printable::encode(input);
        let encoded = String::from_utf8(encoded).unwrap();
        let decoded = decode_transfer_encoding(ContentTransferEncoding::QuotedPrintable, &encoded);
        assert_eq!(decoded, input);
    }

    #[test]
    fn unknown_encoding_is_identity() {
        for label in ["7bit", "8bit", "binary", "x-unknown", ""] {
            let encoding = ContentTransferEncoding::from_label(label);
            assert_eq!(
                decode_transfer_encoding(encoding, "as-is body"),
                b"as-is body"
            );
        }
    }

    #[test]
    fn undecodable_base64_passes_through() {
        let decoded = decode_transfer_encoding(ContentTransferEncoding::Base64, "not base64!!!");
        assert_eq!(decoded, b"not base64!!!");
    }

    #[test]
    fn charset_decoding() {
        assert_eq!(decode_charset_text(b"caf\xe9", "iso-8859-1"), "café");
        assert_eq!(decode_charset_text("café".as_bytes(), "utf-8"), "café");
        assert_eq!(decode_charset_text(b"plain", ""), "plain");
        assert_eq!(decode_charset_text(b"plain", "no-such-charset"), "plain");
    }
}
