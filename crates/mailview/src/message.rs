use crate::encoding;
use crate::header::{parse_header_block, recover_line_endings, split_at_body, HeaderBlock};
use crate::mimepart::{
    charset_of, is_pkcs7_mime, is_pkcs7_signature, strip_angle_brackets, MimePart, PartExtractor,
};
use crate::rfc5322::{decode_unstructured, parse_address_list, Mailbox};
use crate::smime::{CmsProvider, NoOpCms};
use crate::strings::SharedString;
use crate::tnef::{NoOpTnef, TnefDecoder};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

bitflags::bitflags! {
    /// Opt-in retention switches for a parse.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ProcessingFlags: u8 {
        const INCLUDE_RAW_HEADERS = 0b0000_0001;
        const INCLUDE_RAW_BODY = 0b0000_0010;
        const INCLUDE_SMIME_SIGNED_DATA = 0b0000_0100;
        const INCLUDE_SMIME_ENCRYPTED_ENVELOPE_DATA = 0b0000_1000;
        const INCLUDE_WINMAIL_DATA = 0b0001_0000;
    }
}

bitflags::bitflags! {
    /// IMAP system flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MessageFlags: u8 {
        const ANSWERED = 0b0000_0001;
        const DELETED = 0b0000_0010;
        const DRAFT = 0b0000_0100;
        const FLAGGED = 0b0000_1000;
        const RECENT = 0b0001_0000;
        const SEEN = 0b0010_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    fn from_label(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("low") {
            Some(Self::Low)
        } else if value.eq_ignore_ascii_case("normal") {
            Some(Self::Normal)
        } else if value.eq_ignore_ascii_case("high") {
            Some(Self::High)
        } else {
            None
        }
    }
}

/// A non-body leaf of the message, in part-tree order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub content_id: String,
    pub bytes: Vec<u8>,
}

/// Headers beyond the routine envelope set, captured only when
/// extended-header parsing is switched on. One record per message,
/// populated across the whole header walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedProperties {
    pub authentication_results: String,
    pub auto_response_suppress: String,
    pub bounces_to: String,
    pub campaign_id: String,
    pub delivery_context: String,
    pub disposition_notification_to: String,
    pub dkim_signature: String,
    pub errors_to: String,
    pub list_unsubscribe: String,
    pub mail_list_id: String,
    pub mailer: String,
    pub msmail_priority: String,
    pub organization: String,
    pub original_message_id: String,
    pub originating_email: String,
    pub originating_ip: String,
    pub precedence: String,
    pub rcpt_to: String,
    pub received_spf: String,
    pub references: String,
    pub report_abuse: String,
    pub resent_from: String,
    pub resent_message_id: String,
    pub spam_score: String,
    pub thread_index: String,
    pub thread_topic: String,
    pub user_agent: String,
}

/// The read-only product of parsing one raw message. Constructed in one
/// shot and never mutated afterwards, apart from the mailbox-side
/// fields a fetching client fills in (`mailbox`, `imap_uid`, flags...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub from: Option<Mailbox>,
    pub to: Vec<Mailbox>,
    pub cc: Vec<Mailbox>,
    pub bcc: Vec<Mailbox>,
    pub reply_to: Vec<Mailbox>,
    pub sender: Option<Mailbox>,
    pub subject: String,
    pub date: Option<DateTime<FixedOffset>>,

    /// Identifier fields are stored bare, without angle brackets.
    pub message_id: String,
    pub in_reply_to: String,
    pub delivered_to: String,
    pub return_path: String,
    /// Received and X-Received values, in header order.
    pub received_chain: Vec<String>,

    pub content_type: String,
    pub content_transfer_encoding: String,
    pub content_language: String,
    pub charset: String,
    pub importance: String,
    pub priority: Priority,

    pub body_text: String,
    pub is_body_html: bool,

    pub attachments: Vec<Attachment>,

    pub raw_headers: Option<String>,
    pub raw_body: Option<String>,
    /// Octet count of the raw input.
    pub size: usize,

    /// True when every non-cryptographic leaf part carried the
    /// property; vacuously true when there are no such parts.
    pub smime_signed: bool,
    pub smime_encrypted_envelope: bool,
    pub smime_triple_wrapped: bool,

    pub extended: Option<ExtendedProperties>,

    pub mailbox: String,
    pub imap_uid: u32,
    pub pop3_uidl: String,
    pub index: u32,
    pub flags: MessageFlags,
    pub raw_flags: BTreeSet<String>,

    pub subject_encryption: bool,
}

impl ParsedMessage {
    /// Parse with no retention flags, no extended headers and no
    /// cryptographic capabilities.
    pub fn parse(raw: &[u8]) -> Self {
        MessageParser::new().parse(raw)
    }

    /// Fold an IMAP flags string into the message. Returns the number
    /// of space-separated tokens seen.
    pub fn parse_flags(&mut self, flags: &str) -> usize {
        let mut count = 0;
        for token in flags.split(' ') {
            count += 1;
            match token.to_ascii_lowercase().as_str() {
                "\\answered" => self.flags |= MessageFlags::ANSWERED,
                "\\deleted" => self.flags |= MessageFlags::DELETED,
                "\\draft" => self.flags |= MessageFlags::DRAFT,
                "\\flagged" => self.flags |= MessageFlags::FLAGGED,
                "\\recent" => self.flags |= MessageFlags::RECENT,
                "\\seen" => self.flags |= MessageFlags::SEEN,
                _ => {}
            }
            if !token.is_empty() {
                self.raw_flags.insert(token.to_string());
            }
        }
        count
    }
}

static NOOP_CMS: NoOpCms = NoOpCms;
static NOOP_TNEF: NoOpTnef = NoOpTnef;

/// Configured parser front end. The defaults keep nothing optional,
/// parse no extended headers, and decline all cryptographic and TNEF
/// work; hosts inject their own capabilities where they have them.
pub struct MessageParser<'p> {
    flags: ProcessingFlags,
    parse_extended_headers: bool,
    cms: &'p dyn CmsProvider,
    tnef: &'p dyn TnefDecoder,
}

impl Default for MessageParser<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'p> MessageParser<'p> {
    pub fn new() -> Self {
        Self {
            flags: ProcessingFlags::empty(),
            parse_extended_headers: false,
            cms: &NOOP_CMS,
            tnef: &NOOP_TNEF,
        }
    }

    pub fn with_flags(mut self, flags: ProcessingFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_extended_headers(mut self, enabled: bool) -> Self {
        self.parse_extended_headers = enabled;
        self
    }

    pub fn with_cms_provider(mut self, cms: &'p dyn CmsProvider) -> Self {
        self.cms = cms;
        self
    }

    pub fn with_tnef_decoder(mut self, tnef: &'p dyn TnefDecoder) -> Self {
        self.tnef = tnef;
        self
    }

    /// Parse a raw message. Never fails: malformed input produces a
    /// best-effort message rather than an error.
    pub fn parse(&self, raw: &[u8]) -> ParsedMessage {
        let text = recover_line_endings(SharedString::from_bytes_lossy(raw));

        let mut message = ParsedMessage {
            size: raw.len(),
            extended: self.parse_extended_headers.then(ExtendedProperties::default),
            ..Default::default()
        };

        let (header_text, body, _had_delimiter) = split_at_body(&text);
        if self.flags.contains(ProcessingFlags::INCLUDE_RAW_HEADERS) {
            message.raw_headers = Some(header_text.to_string());
        }
        if self.flags.contains(ProcessingFlags::INCLUDE_RAW_BODY) {
            message.raw_body = Some(body.to_string());
        }

        let headers = parse_header_block(header_text);
        assign_envelope(&mut message, &headers);

        let extractor = PartExtractor {
            flags: self.flags,
            cms: self.cms,
            tnef: self.tnef,
        };
        let parts = extractor.extract_parts(
            &message.content_type,
            &message.content_transfer_encoding,
            &body,
        );
        select_body(&mut message, parts, &body);

        message
    }

    /// Parse a message given as separate header and body segments.
    pub fn parse_parts(&self, headers: &str, body: &str) -> ParsedMessage {
        self.parse(format!("{headers}\r\n\r\n{body}").as_bytes())
    }
}

fn assign_envelope(message: &mut ParsedMessage, headers: &HeaderBlock) {
    let mut saw_content_type = false;

    for header in headers.iter() {
        let value = header.get_raw_value();
        match header.get_name().trim().to_ascii_lowercase().as_str() {
            "from" => message.from = parse_address_list(value).into_iter().next(),
            "to" => message.to = parse_address_list(value),
            "cc" => message.cc = parse_address_list(value),
            "bcc" => message.bcc = parse_address_list(value),
            "reply-to" | "replyto" => message.reply_to = parse_address_list(value),
            "sender" | "x-sender" => {
                message.sender = parse_address_list(value).into_iter().next()
            }
            "subject" => message.subject = decode_subject(value),
            "date" => message.date = parse_date(value).or(message.date),
            "resent-date" | "x-original-arrival-time" => {
                if message.date.is_none() {
                    message.date = parse_date(value);
                }
            }
            "message-id" => message.message_id = strip_angle_brackets(value),
            "in-reply-to" => message.in_reply_to = strip_angle_brackets(value),
            "return-path" => message.return_path = strip_angle_brackets(value),
            "delivered-to" => message.delivered_to = value.to_string(),
            "content-type" => {
                // the first occurrence wins
                if !saw_content_type {
                    saw_content_type = true;
                    message.content_type = value.to_string();
                    if let Some(charset) = charset_of(value) {
                        message.charset = charset;
                    }
                }
            }
            "content-transfer-encoding" => {
                message.content_transfer_encoding = value.to_string()
            }
            "content-language" => message.content_language = value.to_string(),
            "importance" => message.importance = value.to_string(),
            "received" | "x-received" => message.received_chain.push(value.to_string()),
            "x-priority" => {
                if let Some(priority) = Priority::from_label(value) {
                    message.priority = priority;
                }
            }
            "x-subject-encryption" => message.subject_encryption = parse_bool(value),
            name => {
                if let Some(extended) = message.extended.as_mut() {
                    assign_extended(extended, name, value);
                }
            }
        }
    }
}

fn assign_extended(extended: &mut ExtendedProperties, name: &str, value: &str) {
    let slot = match name {
        "authentication-results" => &mut extended.authentication_results,
        "x-auto-response-suppress" => &mut extended.auto_response_suppress,
        "bounces-to" | "x-bounces-to" => &mut extended.bounces_to,
        "x-campaign" | "x-campaign-id" | "x-campaignid" => &mut extended.campaign_id,
        "x-delivery-context" => &mut extended.delivery_context,
        "disposition-notification-to" => &mut extended.disposition_notification_to,
        "dkim-signature" | "domainkey-signature" | "x-google-dkim-signature" => {
            &mut extended.dkim_signature
        }
        "errors-to" => &mut extended.errors_to,
        "list-unsubscribe" => &mut extended.list_unsubscribe,
        "mail-list-id" | "x-mail-list-id" => &mut extended.mail_list_id,
        "x-mailer" | "mailer" => &mut extended.mailer,
        "x-msmail-priority" => &mut extended.msmail_priority,
        "organization" | "organisation" | "x-organization" => &mut extended.organization,
        "original-message-id" | "x-original-message-id" => &mut extended.original_message_id,
        "originating-email" | "x-originating-email" => &mut extended.originating_email,
        "originating-ip" | "x-originating-ip" => &mut extended.originating_ip,
        "precedence" => &mut extended.precedence,
        "rcpt-to" => {
            extended.rcpt_to = trim_one_char_each_end(value);
            return;
        }
        "received-spf" => &mut extended.received_spf,
        "references" => &mut extended.references,
        "report-abuse" | "x-report-abuse" | "x-report-abuse-to" => &mut extended.report_abuse,
        "resent-from" => &mut extended.resent_from,
        "resent-message-id" => &mut extended.resent_message_id,
        "spam-score" | "x-spam-score" => &mut extended.spam_score,
        "thread-index" => &mut extended.thread_index,
        "thread-topic" => &mut extended.thread_topic,
        "user-agent" | "useragent" => &mut extended.user_agent,
        _ => return,
    };
    *slot = value.to_string();
}

fn decode_subject(value: &str) -> String {
    decode_unstructured(value)
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect()
}

fn parse_bool(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || value == "1"
}

fn trim_one_char_each_end(value: &str) -> String {
    let mut chars = value.chars();
    chars.next();
    chars.next_back();
    chars.as_str().to_string()
}

/// Best-effort wall-clock parse: a trailing `(comment)` is dropped, and
/// a redundant alphabetic zone after the numeric offset gets a second
/// attempt.
fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let mut value = value.trim();
    if value.ends_with(')') {
        if let Some(open) = value.rfind('(') {
            value = value[..open].trim_end();
        }
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date);
    }
    let stripped = value
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .trim_end();
    if stripped.len() < value.len() {
        if let Ok(date) = DateTime::parse_from_rfc2822(stripped) {
            return Some(date);
        }
    }
    debug!("date did not parse, leaving unset: {value:?}");
    None
}

fn is_cryptographic(content_type: &str) -> bool {
    is_pkcs7_signature(content_type) || is_pkcs7_mime(content_type)
}

/// Pick the canonical text body out of the flat part list, demote the
/// rest to attachments, and fold the per-part S/MIME bits into the
/// message-level booleans.
fn select_body(message: &mut ParsedMessage, parts: Vec<MimePart>, raw_body: &SharedString) {
    let had_parts = !parts.is_empty();
    let mut all_signed = true;
    let mut all_encrypted = true;
    let mut all_triple = true;
    let mut body: Option<MimePart> = None;

    for part in parts {
        if !is_cryptographic(&part.content_type) {
            all_signed &= part.smime_signed;
            all_encrypted &= part.smime_encrypted_envelope;
            all_triple &= part.smime_triple_wrapped;
        }

        let is_text = part.content_type.is_empty() || part.content_type.starts_with("text/");
        if is_text {
            match &body {
                None => body = Some(part),
                Some(current)
                    if !current.content_type.starts_with("text/html")
                        && part.content_type.starts_with("text/html") =>
                {
                    // the displaced pick does not become an attachment
                    body = Some(part);
                }
                Some(_) => {}
            }
        } else {
            message.attachments.push(Attachment {
                name: part.name,
                content_type: part.content_type,
                content_id: part.content_id,
                bytes: part.bytes,
            });
        }
    }

    message.smime_signed = all_signed;
    message.smime_encrypted_envelope = all_encrypted;
    message.smime_triple_wrapped = all_triple;

    if let Some(part) = body {
        message.is_body_html = part.content_type.starts_with("text/html");
        if !part.content_type.is_empty() {
            message.content_type = part.content_type.clone();
        }
        let charset_label = if part.charset.is_empty() {
            message.charset.clone()
        } else {
            message.charset = part.charset.clone();
            part.charset.clone()
        };
        message.body_text = encoding::decode_charset_text(&part.bytes, &charset_label);
    } else if !had_parts && message.content_type.trim().starts_with("multipart/") {
        // a multipart whose boundary never matched keeps its raw body;
        // a dropped encrypted envelope does not
        message.body_text = raw_body.to_string();
    }

    if message.subject_encryption {
        if let Some(rest) = message.body_text.strip_prefix("Subject: ") {
            match rest.find("\r\n") {
                Some(i) => {
                    message.subject = rest[..i].to_string();
                    message.body_text = rest[i + 2..].to_string();
                }
                None => {
                    message.subject = rest.to_string();
                    message.body_text = String::new();
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encoding::BASE64_RFC2045;

    #[test]
    fn minimal_plain_text() {
        let message = ParsedMessage::parse(b"From: a@x\r\nTo: b@y\r\nSubject: hi\r\n\r\nhello");
        assert_eq!(
            message.from,
            Some(Mailbox {
                name: None,
                address: "a@x".to_string()
            })
        );
        assert_eq!(
            message.to,
            vec![Mailbox {
                name: None,
                address: "b@y".to_string()
            }]
        );
        k9::assert_equal!(message.subject, "hi");
        k9::assert_equal!(message.body_text, "hello");
        assert!(!message.is_body_html);
        assert!(!message.smime_signed);
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn size_matches_input() {
        let input = b"Subject: hi\r\n\r\nbody";
        assert_eq!(ParsedMessage::parse(input).size, input.len());
        assert_eq!(ParsedMessage::parse(b"").size, 0);
    }

    #[test]
    fn raw_segments_reconstruct_the_input() {
        let input = b"Subject: hi\r\nTo: x@y\r\n\r\nbody text\r\nwith lines";
        let message = MessageParser::new()
            .with_flags(ProcessingFlags::INCLUDE_RAW_HEADERS | ProcessingFlags::INCLUDE_RAW_BODY)
            .parse(input);
        let rebuilt = format!(
            "{}\r\n\r\n{}",
            message.raw_headers.unwrap(),
            message.raw_body.unwrap()
        );
        assert_eq!(rebuilt.as_bytes(), input);
    }

    #[test]
    fn raw_segments_absent_by_default() {
        let message = ParsedMessage::parse(b"Subject: hi\r\n\r\nbody");
        assert_eq!(message.raw_headers, None);
        assert_eq!(message.raw_body, None);
    }

    #[test]
    fn folded_subject_concatenates() {
        let message = ParsedMessage::parse(b"Subject: AAA\r\n BBB\r\n\r\n");
        assert_eq!(message.subject, "AAABBB");

        let message = ParsedMessage::parse(b"Subject: foo\r\n bar\r\nTo: x@y\r\n\r\n");
        assert_eq!(message.subject, "foobar");
        assert_eq!(message.to[0].address, "x@y");
    }

    #[test]
    fn encoded_word_subject() {
        let message =
            ParsedMessage::parse(b"Subject: =?utf-8?b?4pi6?= =?utf-8?q?and_more?=\r\n\r\n");
        assert_eq!(message.subject, "☺and more");
    }

    #[test]
    fn message_id_loses_angle_brackets() {
        let message = ParsedMessage::parse(b"Message-ID: <abc@d>\r\n\r\n");
        assert_eq!(message.message_id, "abc@d");

        let message =
            ParsedMessage::parse(b"In-Reply-To: <parent@d>\r\nReturn-Path: <bounce@d>\r\n\r\n");
        assert_eq!(message.in_reply_to, "parent@d");
        assert_eq!(message.return_path, "bounce@d");
    }

    #[test]
    fn priority_words() {
        let message = ParsedMessage::parse(b"X-Priority: high\r\n\r\n");
        assert_eq!(message.priority, Priority::High);

        let message = ParsedMessage::parse(b"X-Priority: LOW\r\n\r\n");
        assert_eq!(message.priority, Priority::Low);

        let message = ParsedMessage::parse(b"X-Priority: 1 (Highest)\r\n\r\n");
        assert_eq!(message.priority, Priority::Normal);
    }

    #[test]
    fn received_chain_preserves_order() {
        let message = ParsedMessage::parse(b"Received: hop1\r\nReceived: hop2\r\n\r\n");
        assert_eq!(message.received_chain, vec!["hop1", "hop2"]);

        let message = ParsedMessage::parse(
            b"Received: from a\r\n by b\r\nX-Received: hop2\r\nReceived: hop3\r\n\r\n",
        );
        assert_eq!(
            message.received_chain,
            vec!["from a\r\n by b", "hop2", "hop3"]
        );
    }

    #[test]
    fn date_parsing() {
        let message = ParsedMessage::parse(b"Date: Tue, 1 Jul 2003 10:52:37 +0200\r\n\r\n");
        assert_eq!(
            message.date.unwrap().to_rfc3339(),
            "2003-07-01T10:52:37+02:00"
        );

        let message =
            ParsedMessage::parse(b"Date: Sun, 02 Oct 2016 07:06:22 -0700 (PDT)\r\n\r\n");
        assert_eq!(
            message.date.unwrap().to_rfc3339(),
            "2016-10-02T07:06:22-07:00"
        );

        let message = ParsedMessage::parse(b"Date: not a date at all\r\n\r\n");
        assert_eq!(message.date, None);
    }

    #[test]
    fn later_single_valued_headers_win() {
        let message = ParsedMessage::parse(
            b"Importance: low\r\nImportance: high\r\nContent-Type: text/plain\r\nContent-Type: text/html\r\n\r\n",
        );
        assert_eq!(message.importance, "high");
        // first Content-Type wins
        assert_eq!(message.content_type, "text/plain");
    }

    #[test]
    fn multipart_alternative_prefers_html() {
        let message = ParsedMessage::parse(
            b"Content-Type: multipart/alternative; boundary=\"B\"\r\n\r\n--B\r\nContent-Type: text/plain\r\n\r\nplain\r\n--B\r\nContent-Type: text/html\r\n\r\n<p>html</p>\r\n--B--",
        );
        k9::assert_equal!(message.body_text, "<p>html</p>");
        assert!(message.is_body_html);
        assert!(message.attachments.is_empty());
        k9::assert_equal!(message.content_type, "text/html");
    }

    #[test]
    fn html_first_is_not_displaced() {
        let message = ParsedMessage::parse(
            b"Content-Type: multipart/alternative; boundary=B\r\n\r\n--B\r\nContent-Type: text/html\r\n\r\n<b>first</b>\r\n--B\r\nContent-Type: text/plain\r\n\r\nsecond\r\n--B--",
        );
        assert_eq!(message.body_text, "<b>first</b>");
        assert!(message.is_body_html);
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn non_text_parts_become_attachments() {
        let message = ParsedMessage::parse(
            b"Content-Type: multipart/mixed; boundary=B\r\n\r\n--B\r\nContent-Type: text/plain\r\n\r\nbody\r\n--B\r\nContent-Type: application/octet-stream; name=\"a.bin\"\r\nContent-Transfer-Encoding: base64\r\n\r\nAAECAw==\r\n--B--",
        );
        assert_eq!(message.body_text, "body");
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].name, "a.bin");
        assert_eq!(message.attachments[0].bytes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn multipart_without_boundary_falls_back_to_raw_body() {
        let message =
            ParsedMessage::parse(b"Content-Type: multipart/mixed\r\n\r\nraw body here");
        assert_eq!(message.body_text, "raw body here");
        // no non-cryptographic leaf parts exist, so the conjunctions
        // hold vacuously
        assert!(message.smime_signed);
        assert!(message.smime_encrypted_envelope);
        assert!(message.smime_triple_wrapped);
    }

    #[test]
    fn headers_only_message() {
        let message = ParsedMessage::parse(b"Subject: hi\r\nNo-Delimiter: true");
        assert_eq!(message.subject, "hi");
        assert_eq!(message.body_text, "");
    }

    #[test]
    fn bare_lf_message_is_recovered() {
        let message = ParsedMessage::parse(b"Subject: lf\nTo: x@y\n\nbody line");
        assert_eq!(message.subject, "lf");
        assert_eq!(message.to[0].address, "x@y");
        assert_eq!(message.body_text, "body line");
    }

    #[test]
    fn charset_decoding_of_body() {
        let message = ParsedMessage::parse(
            b"Content-Type: multipart/mixed; boundary=B\r\n\r\n--B\r\nContent-Type: text/plain; charset=iso-8859-1\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\ncaf=E9\r\n--B--",
        );
        assert_eq!(message.body_text, "café");
        assert_eq!(message.charset, "iso-8859-1");
    }

    #[test]
    fn parse_parts_joins_segments() {
        let message = MessageParser::new().parse_parts("Subject: joined", "body here");
        assert_eq!(message.subject, "joined");
        assert_eq!(message.body_text, "body here");
    }

    struct DecryptingCms;
    impl CmsProvider for DecryptingCms {
        fn decrypt_envelope(&self, _envelope: &[u8]) -> Option<Vec<u8>> {
            Some(b"Content-Type: text/plain\r\n\r\nsecret".to_vec())
        }
        fn verify_signature(&self, _signature: &[u8], _signed_content: &[u8]) -> bool {
            false
        }
    }

    fn enveloped_message() -> Vec<u8> {
        format!(
            "Content-Type: application/pkcs7-mime; smime-type=enveloped-data\r\nContent-Transfer-Encoding: base64\r\n\r\n{}",
            BASE64_RFC2045.encode(b"opaque envelope")
        )
        .into_bytes()
    }

    #[test]
    fn cms_envelope_is_opened() {
        let message = MessageParser::new()
            .with_cms_provider(&DecryptingCms)
            .parse(&enveloped_message());
        k9::assert_equal!(message.body_text, "secret");
        assert!(message.smime_encrypted_envelope);
        assert!(!message.smime_signed);
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn cms_decrypt_failure_drops_content() {
        let message = ParsedMessage::parse(&enveloped_message());
        assert_eq!(message.body_text, "");
        assert!(message.attachments.is_empty());
        // the AND holds vacuously over zero non-cryptographic parts
        assert!(message.smime_encrypted_envelope);
    }

    #[test]
    fn envelope_kept_as_attachment_when_requested() {
        let message = MessageParser::new()
            .with_flags(ProcessingFlags::INCLUDE_SMIME_ENCRYPTED_ENVELOPE_DATA)
            .with_cms_provider(&DecryptingCms)
            .parse(&enveloped_message());
        assert_eq!(message.body_text, "secret");
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].name, "smime.p7m");
        assert_eq!(message.attachments[0].bytes, b"opaque envelope");
    }

    struct VerifyingCms {
        expect_content: &'static str,
    }
    impl CmsProvider for VerifyingCms {
        fn decrypt_envelope(&self, _envelope: &[u8]) -> Option<Vec<u8>> {
            None
        }
        fn verify_signature(&self, signature: &[u8], signed_content: &[u8]) -> bool {
            assert_eq!(signature, b"AAECAw==");
            assert_eq!(signed_content, self.expect_content.as_bytes());
            true
        }
    }

    fn signed_message() -> &'static [u8] {
        b"Content-Type: multipart/signed; boundary=\"sig\"\r\n\r\n--sig\r\nContent-Type: text/plain\r\n\r\nhello\r\n--sig\r\nContent-Type: application/pkcs7-signature; name=\"smime.p7s\"\r\nContent-Transfer-Encoding: base64\r\n\r\nAAECAw==\r\n--sig--"
    }

    #[test]
    fn detached_signature_marks_parts_signed() {
        let cms = VerifyingCms {
            expect_content: "hello",
        };
        let message = MessageParser::new()
            .with_cms_provider(&cms)
            .parse(signed_message());
        k9::assert_equal!(message.body_text, "hello");
        assert!(message.smime_signed);
        assert!(!message.smime_encrypted_envelope);
        assert!(!message.smime_triple_wrapped);
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn unverified_signature_leaves_parts_unsigned() {
        let message = ParsedMessage::parse(signed_message());
        assert_eq!(message.body_text, "hello");
        assert!(!message.smime_signed);
    }

    #[test]
    fn signature_kept_as_attachment_when_requested() {
        let cms = VerifyingCms {
            expect_content: "hello",
        };
        let message = MessageParser::new()
            .with_flags(ProcessingFlags::INCLUDE_SMIME_SIGNED_DATA)
            .with_cms_provider(&cms)
            .parse(signed_message());
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].name, "smime.p7s");
        assert_eq!(message.attachments[0].bytes, vec![0, 1, 2, 3]);
    }

    struct TripleWrapCms;
    impl CmsProvider for TripleWrapCms {
        fn decrypt_envelope(&self, _envelope: &[u8]) -> Option<Vec<u8>> {
            Some(b"Content-Type: text/plain\r\n\r\nwrapped secret".to_vec())
        }
        fn verify_signature(&self, _signature: &[u8], _signed_content: &[u8]) -> bool {
            true
        }
    }

    #[test]
    fn signed_envelope_is_triple_wrapped() {
        let input = format!(
            "Content-Type: multipart/signed; boundary=\"sig\"\r\n\r\n--sig\r\nContent-Type: application/pkcs7-mime; smime-type=enveloped-data\r\nContent-Transfer-Encoding: base64\r\n\r\n{}\r\n--sig\r\nContent-Type: application/pkcs7-signature\r\n\r\nc2ln\r\n--sig--",
            BASE64_RFC2045.encode(b"opaque envelope")
        );
        let message = MessageParser::new()
            .with_cms_provider(&TripleWrapCms)
            .parse(input.as_bytes());
        assert_eq!(message.body_text, "wrapped secret");
        assert!(message.smime_signed);
        assert!(message.smime_encrypted_envelope);
        assert!(message.smime_triple_wrapped);
    }

    #[test]
    fn triple_wrap_implies_signed_and_encrypted() {
        let enveloped = enveloped_message();
        for input in [
            b"Subject: x\r\n\r\nplain".as_slice(),
            signed_message(),
            enveloped.as_slice(),
        ] {
            let message = ParsedMessage::parse(input);
            if message.smime_triple_wrapped {
                assert!(message.smime_signed && message.smime_encrypted_envelope);
            }
        }
    }

    #[test]
    fn flag_count_matches_tokens() {
        let mut message = ParsedMessage::default();
        k9::assert_equal!(message.parse_flags("\\Seen \\Flagged custom"), 3);
        assert!(message.flags.contains(MessageFlags::SEEN));
        assert!(message.flags.contains(MessageFlags::FLAGGED));
        assert!(!message.flags.contains(MessageFlags::DELETED));
        assert!(message.raw_flags.contains("\\Seen"));
        assert!(message.raw_flags.contains("custom"));

        let mut message = ParsedMessage::default();
        assert_eq!(message.parse_flags(""), 1);
        assert_eq!(message.flags, MessageFlags::empty());
    }

    #[test]
    fn extended_headers_populate_one_record() {
        let input = b"User-Agent: agent/1.0\r\nX-Mailer: mailer/2\r\nRCPT-To: <r@x>\r\nX-Spam-Score: 5.5\r\nDKIM-Signature: v=1; a=rsa-sha256\r\nList-Unsubscribe: <mailto:u@x>\r\n\r\n";
        let message = MessageParser::new()
            .with_extended_headers(true)
            .parse(input);
        let extended = message.extended.unwrap();
        assert_eq!(extended.user_agent, "agent/1.0");
        assert_eq!(extended.mailer, "mailer/2");
        assert_eq!(extended.rcpt_to, "r@x");
        assert_eq!(extended.spam_score, "5.5");
        assert_eq!(extended.dkim_signature, "v=1; a=rsa-sha256");
        assert_eq!(extended.list_unsubscribe, "<mailto:u@x>");
    }

    #[test]
    fn extended_headers_off_by_default() {
        let message = ParsedMessage::parse(b"User-Agent: agent/1.0\r\n\r\n");
        assert_eq!(message.extended, None);
    }

    #[test]
    fn subject_extracted_from_encrypted_body() {
        let message = ParsedMessage::parse(
            b"X-Subject-Encryption: true\r\nSubject: outer\r\n\r\nSubject: hidden\r\nreal body",
        );
        assert_eq!(message.subject, "hidden");
        assert_eq!(message.body_text, "real body");

        let message = ParsedMessage::parse(
            b"X-Subject-Encryption: false\r\nSubject: outer\r\n\r\nSubject: hidden\r\nreal body",
        );
        assert_eq!(message.subject, "outer");
        assert!(message.body_text.starts_with("Subject: hidden"));
    }

    #[test]
    fn serde_round_trip() {
        let message = MessageParser::new()
            .with_extended_headers(true)
            .parse(b"From: a@x\r\nSubject: hi\r\nDate: Tue, 1 Jul 2003 10:52:37 +0200\r\n\r\nhello");
        let json = serde_json::to_string(&message).unwrap();
        let back: ParsedMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }
}
