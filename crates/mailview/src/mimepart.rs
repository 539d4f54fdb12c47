use crate::encoding::{self, ContentTransferEncoding, BASE64_RFC2045};
use crate::header::{parse_header_block, HeaderBlock};
use crate::message::ProcessingFlags;
use crate::rfc5322::Parser;
use crate::smime::CmsProvider;
use crate::strings::SharedString;
use crate::tnef::TnefDecoder;
use tracing::debug;

/// One decoded leaf of the MIME tree, together with the S/MIME
/// provenance observed on the way down.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MimePart {
    pub name: String,
    pub content_type: String,
    pub charset: String,
    pub content_id: String,
    pub bytes: Vec<u8>,
    pub smime_signed: bool,
    pub smime_encrypted_envelope: bool,
    pub smime_triple_wrapped: bool,
}

pub(crate) fn is_pkcs7_signature(content_type: &str) -> bool {
    content_type.starts_with("application/pkcs7-signature")
        || content_type.starts_with("application/x-pkcs7-signature")
}

pub(crate) fn is_pkcs7_mime(content_type: &str) -> bool {
    content_type.starts_with("application/pkcs7-mime")
        || content_type.starts_with("application/x-pkcs7-mime")
}

/// Strip `;`-separated parameters from a content-type value.
fn strip_parameters(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Scan a structured header value for `key=`, preferring the quoted
/// form and otherwise reading up to the next `;`.
pub(crate) fn lax_parameter(value: &str, key: &str) -> Option<String> {
    let lower = value.to_ascii_lowercase();
    let needle = format!("{key}=");
    let pos = lower.find(&needle)?;
    let after = value[pos + needle.len()..].trim_start();
    if let Some(quoted) = after.strip_prefix('"') {
        Some(quoted.split('"').next().unwrap_or(quoted).to_string())
    } else {
        Some(
            after
                .split(';')
                .next()
                .unwrap_or(after)
                .trim()
                .trim_matches('"')
                .to_string(),
        )
    }
}

fn parameter_of(header_value: &str, key: &str) -> Option<String> {
    match Parser::parse_content_type_header(header_value) {
        Ok(params) => params.get(key),
        Err(_) => None,
    }
    .or_else(|| lax_parameter(header_value, key))
}

pub(crate) fn boundary_of(content_type: &str) -> Option<String> {
    parameter_of(content_type, "boundary").filter(|b| !b.is_empty())
}

pub(crate) fn charset_of(content_type: &str) -> Option<String> {
    parameter_of(content_type, "charset").filter(|c| !c.is_empty())
}

pub(crate) fn strip_angle_brackets(value: &str) -> String {
    let value = value.trim();
    let value = value.strip_prefix('<').unwrap_or(value);
    let value = value.strip_suffix('>').unwrap_or(value);
    value.to_string()
}

/// The RFC 2045 digest of one part's header block.
#[derive(Debug, Default, Clone)]
pub(crate) struct PartInfo {
    /// Content-Type value as written, parameters included.
    pub content_type_full: String,
    /// Content-Type value with parameters stripped.
    pub content_type: String,
    pub charset: String,
    pub transfer_encoding_label: String,
    pub transfer_encoding: ContentTransferEncoding,
    pub file_name: String,
    pub content_id: String,
}

impl PartInfo {
    pub fn from_headers(headers: &HeaderBlock) -> Self {
        let mut info = Self::default();

        if let Some(ct) = headers.value_of("content-type") {
            info.content_type_full = ct.to_string();
            match Parser::parse_content_type_header(ct) {
                Ok(params) => {
                    info.content_type = params.value.clone();
                    info.charset = params.get("charset").unwrap_or_default();
                    info.file_name = params
                        .get("name")
                        .or_else(|| params.get("filename"))
                        .unwrap_or_default();
                }
                Err(err) => {
                    debug!("content-type fell back to lax scanning: {err:?}");
                    info.content_type = strip_parameters(ct);
                    info.charset = lax_parameter(ct, "charset").unwrap_or_default();
                    info.file_name = lax_parameter(ct, "name").unwrap_or_default();
                }
            }
        }

        if let Some(cd) = headers.value_of("content-disposition") {
            let from_disposition = match Parser::parse_content_disposition_header(cd) {
                Ok(params) => params.get("filename").or_else(|| params.get("name")),
                Err(_) => lax_parameter(cd, "name"),
            };
            // the disposition's file name wins over Content-Type's
            if let Some(name) = from_disposition.filter(|n| !n.is_empty()) {
                info.file_name = name;
            }
        }

        if let Some(cte) = headers.value_of("content-transfer-encoding") {
            info.transfer_encoding_label = cte.split(';').next().unwrap_or("").trim().to_string();
            info.transfer_encoding = ContentTransferEncoding::from_label(cte);
        }

        if let Some(cid) = headers.value_of("content-id") {
            info.content_id = strip_angle_brackets(cid);
        }

        info
    }
}

/// Recursive MIME tree walker. Splits multiparts on their boundary,
/// transfer-decodes leaves, and routes the cryptographic and TNEF
/// branches through the injected capabilities.
pub(crate) struct PartExtractor<'p> {
    pub flags: ProcessingFlags,
    pub cms: &'p dyn CmsProvider,
    pub tnef: &'p dyn TnefDecoder,
}

impl PartExtractor<'_> {
    pub fn extract_parts(
        &self,
        content_type: &str,
        transfer_encoding: &str,
        body: &SharedString,
    ) -> Vec<MimePart> {
        let ct = content_type.trim();
        if ct.starts_with("multipart/") {
            self.split_multipart(ct, body)
        } else if ct.starts_with("application/ms-tnef") {
            let data = decode_binary_body(ContentTransferEncoding::Base64, body.as_str());
            self.extract_tnef_parts(&data)
        } else if is_pkcs7_mime(ct) {
            let encoding = ContentTransferEncoding::from_label(transfer_encoding);
            let envelope = decode_binary_body(encoding, body.as_str());
            let mut parts = Vec::new();
            if self
                .flags
                .contains(ProcessingFlags::INCLUDE_SMIME_ENCRYPTED_ENVELOPE_DATA)
            {
                parts.push(MimePart {
                    name: "smime.p7m".to_string(),
                    content_type: strip_parameters(ct),
                    bytes: envelope.clone(),
                    ..Default::default()
                });
            }
            parts.extend(self.extract_envelope_parts(&envelope));
            parts
        } else {
            vec![self.single_part(ct, transfer_encoding, body)]
        }
    }

    /// A lone, non-multipart block. The block may still open with its
    /// own Content-* headers, which then describe the part.
    fn single_part(
        &self,
        content_type: &str,
        transfer_encoding: &str,
        body: &SharedString,
    ) -> MimePart {
        let mut content_type = content_type.to_string();
        let mut encoding = ContentTransferEncoding::from_label(transfer_encoding);
        let mut charset = charset_of(&content_type).unwrap_or_default();
        let mut file_name = String::new();
        let mut content_id = String::new();
        let mut body = body.clone();

        if let Some(split) = body.as_str().find("\r\n\r\n") {
            let headers = parse_header_block(body.slice(0..split));
            let carries_mime_headers = headers.iter().any(|h| {
                ["content-type", "content-transfer-encoding", "content-disposition", "content-id"]
                    .iter()
                    .any(|name| h.is_named(name))
            });
            if carries_mime_headers {
                let info = PartInfo::from_headers(&headers);
                if !info.content_type_full.is_empty() {
                    content_type = info.content_type_full;
                }
                if !info.transfer_encoding_label.is_empty() {
                    encoding = info.transfer_encoding;
                }
                if !info.charset.is_empty() {
                    charset = info.charset;
                }
                file_name = info.file_name;
                content_id = info.content_id;
                body = body.slice(split + 4..body.len());
            }
        }

        MimePart {
            name: file_name,
            content_type: strip_parameters(&content_type),
            charset,
            content_id,
            bytes: encoding::decode_transfer_encoding(encoding, body.as_str()),
            ..Default::default()
        }
    }

    fn split_multipart(&self, content_type: &str, body: &SharedString) -> Vec<MimePart> {
        let Some(boundary) = boundary_of(content_type) else {
            debug!("multipart without usable boundary yields no parts");
            return Vec::new();
        };
        let delimiter = format!("--{boundary}");

        let positions: Vec<usize> =
            memchr::memmem::find_iter(body.as_bytes(), delimiter.as_bytes()).collect();

        let mut parts: Vec<MimePart> = Vec::new();
        let mut mime_blocks: Vec<SharedString> = Vec::new();
        let mut signature_block = None;
        let mut signature_count = 0usize;

        for window in positions.windows(2) {
            let span = body.slice(window[0] + delimiter.len()..window[1]);

            // The remainder of the delimiter line is transport padding;
            // "--" there means this was the closing delimiter and the
            // span is epilogue.
            let first_line_end = span.as_str().find("\r\n");
            let first_line = &span.as_str()[..first_line_end.unwrap_or(span.len())];
            if first_line.starts_with("--") {
                continue;
            }
            let content = match first_line_end {
                Some(i) => span.slice(i + 2..span.len()),
                None => continue,
            };
            // the newline before the next delimiter belongs to it
            let content_len = content
                .as_str()
                .strip_suffix("\r\n")
                .map(str::len)
                .unwrap_or(content.len());
            let content = content.slice(0..content_len);

            let (header_text, sub_body) = match content.as_str().find("\r\n\r\n") {
                Some(i) => (content.slice(0..i), content.slice(i + 4..content.len())),
                None => (SharedString::Borrowed(""), content.clone()),
            };
            mime_blocks.push(sub_body.clone());

            let headers = parse_header_block(header_text);
            let info = PartInfo::from_headers(&headers);

            if info.content_type.starts_with("multipart/") {
                parts.extend(self.extract_parts(
                    &info.content_type_full,
                    &info.transfer_encoding_label,
                    &sub_body,
                ));
            } else if is_pkcs7_signature(&info.content_type) {
                if self.flags.contains(ProcessingFlags::INCLUDE_SMIME_SIGNED_DATA) {
                    parts.push(MimePart {
                        name: non_empty_or(info.file_name, "smime.p7s"),
                        content_type: info.content_type,
                        content_id: info.content_id,
                        bytes: decode_binary_body(info.transfer_encoding, sub_body.as_str()),
                        ..Default::default()
                    });
                }
                signature_block = Some(mime_blocks.len() - 1);
                signature_count += 1;
            } else if is_pkcs7_mime(&info.content_type) {
                let envelope = decode_binary_body(info.transfer_encoding, sub_body.as_str());
                if self
                    .flags
                    .contains(ProcessingFlags::INCLUDE_SMIME_ENCRYPTED_ENVELOPE_DATA)
                {
                    parts.push(MimePart {
                        name: non_empty_or(info.file_name, "smime.p7m"),
                        content_type: info.content_type,
                        content_id: info.content_id,
                        bytes: envelope.clone(),
                        ..Default::default()
                    });
                }
                parts.extend(self.extract_envelope_parts(&envelope));
            } else if info.content_type.starts_with("application/ms-tnef")
                || info.file_name.eq_ignore_ascii_case("winmail.dat")
            {
                let data = decode_binary_body(info.transfer_encoding, sub_body.as_str());
                parts.extend(self.extract_tnef_parts(&data));
            } else {
                parts.push(MimePart {
                    name: info.file_name,
                    content_type: info.content_type,
                    charset: info.charset,
                    content_id: info.content_id,
                    bytes: encoding::decode_transfer_encoding(
                        info.transfer_encoding,
                        sub_body.as_str(),
                    ),
                    ..Default::default()
                });
            }
        }

        // A lone detached signature beside exactly one other block
        // attests every part gathered from this multipart.
        if let (Some(signature_index), 1, 2) =
            (signature_block, signature_count, mime_blocks.len())
        {
            let content = &mime_blocks[1 - signature_index];
            let signature = mime_blocks[signature_index].as_str();
            let signature = signature.strip_suffix("\r\n\r\n").unwrap_or(signature);
            if self
                .cms
                .verify_signature(signature.as_bytes(), content.as_bytes())
            {
                for part in &mut parts {
                    part.smime_signed = true;
                    if part.smime_encrypted_envelope {
                        part.smime_triple_wrapped = true;
                    }
                }
            } else {
                debug!("detached signature did not verify");
            }
        }

        parts
    }

    /// Hand an enveloped-data blob to the CMS capability and, on
    /// success, walk the plaintext as a complete MIME message. Failure
    /// drops the envelope's content.
    fn extract_envelope_parts(&self, envelope: &[u8]) -> Vec<MimePart> {
        let Some(plaintext) = self.cms.decrypt_envelope(envelope) else {
            debug!("envelope decryption declined, dropping encrypted content");
            return Vec::new();
        };

        let text: SharedString = match String::from_utf8(plaintext) {
            Ok(s) => s.into(),
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned().into(),
        };
        let text = crate::header::recover_line_endings(text);
        let (header_text, inner_body, _) = crate::header::split_at_body(&text);
        let headers = parse_header_block(header_text);
        let info = PartInfo::from_headers(&headers);

        let mut parts = self.extract_parts(
            &info.content_type_full,
            &info.transfer_encoding_label,
            &inner_body,
        );
        for part in &mut parts {
            part.smime_encrypted_envelope = true;
        }
        parts
    }

    fn extract_tnef_parts(&self, data: &[u8]) -> Vec<MimePart> {
        let Some(payload) = self.tnef.decode(data) else {
            debug!("tnef payload did not decode, dropping");
            return Vec::new();
        };

        let mut parts = Vec::new();
        if self.flags.contains(ProcessingFlags::INCLUDE_WINMAIL_DATA) {
            if let Some(body) = payload.body.filter(|b| !b.is_empty()) {
                parts.push(MimePart {
                    name: "winmail.dat".to_string(),
                    content_type: payload.body_content_type.clone(),
                    bytes: body.into_bytes(),
                    ..Default::default()
                });
            }
        }
        for attachment in payload.attachments {
            parts.push(MimePart {
                name: attachment.name,
                content_type: attachment.content_type,
                content_id: attachment.content_id,
                bytes: attachment.data,
                ..Default::default()
            });
        }
        parts
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Cryptographic and TNEF blobs ride base64 even when no encoding is
/// declared; decode by the declared encoding when there is one, and
/// attempt base64 otherwise.
fn decode_binary_body(encoding: ContentTransferEncoding, body: &str) -> Vec<u8> {
    match encoding {
        ContentTransferEncoding::Base64 | ContentTransferEncoding::QuotedPrintable => {
            encoding::decode_transfer_encoding(encoding, body)
        }
        _ => BASE64_RFC2045
            .decode(body.trim().as_bytes())
            .unwrap_or_else(|_| body.as_bytes().to_vec()),
    }
}
