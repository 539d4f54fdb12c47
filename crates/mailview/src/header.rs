use crate::strings::SharedString;

/// A single header field, as found in the wire form of the message.
/// Folded continuation lines have already been merged into the value
/// according to the per-header folding class.
#[derive(Debug, Clone, PartialEq)]
pub struct Header<'a> {
    name: SharedString<'a>,
    value: SharedString<'a>,
}

impl<'a> Header<'a> {
    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_raw_value(&self) -> &str {
        &self.value
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.trim().eq_ignore_ascii_case(name)
    }

    fn append_concat(&mut self, line: &str) {
        let merged = format!("{}{}", self.value.as_str(), line.trim_start());
        self.value = merged.into();
    }

    fn append_folded(&mut self, line: &str) {
        let merged = format!("{}\r\n{}", self.value.as_str(), line);
        self.value = merged.into();
    }
}

/// Continuation lines are merged differently depending on the header
/// they extend: address-ish and subject-ish headers are concatenated
/// flat, trace headers keep their folded line structure, and everything
/// else is single-line with continuations dropped.
enum FoldClass {
    Concat,
    JoinCrlf,
    Single,
}

const CONCAT_FOLDED: &[&str] = &[
    "bcc",
    "cc",
    "content-type",
    "delivered-to",
    "from",
    "message-id",
    "reply-to",
    "subject",
    "to",
    "list-unsubscribe",
    "thread-topic",
    "x-report-abuse",
];

const CRLF_FOLDED: &[&str] = &[
    "received",
    "x-received",
    "authentication-results",
    "dkim-signature",
    "domainkey-signature",
    "x-google-dkim-signature",
    "received-spf",
    "references",
    "resent-from",
];

fn fold_class(name: &str) -> FoldClass {
    let name = name.trim();
    if CONCAT_FOLDED.iter().any(|c| name.eq_ignore_ascii_case(c)) {
        FoldClass::Concat
    } else if CRLF_FOLDED.iter().any(|c| name.eq_ignore_ascii_case(c)) {
        FoldClass::JoinCrlf
    } else {
        FoldClass::Single
    }
}

/// An ordered list of headers. There may be multiple headers with the
/// same name; lookup helpers compare names case-insensitively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderBlock<'a> {
    headers: Vec<Header<'a>>,
}

impl<'a> std::ops::Deref for HeaderBlock<'a> {
    type Target = Vec<Header<'a>>;
    fn deref(&self) -> &Vec<Header<'a>> {
        &self.headers
    }
}

impl<'a> HeaderBlock<'a> {
    pub fn get_first<'b>(&'b self, name: &'b str) -> Option<&'b Header<'a>> {
        self.iter_named(name).next()
    }

    pub fn get_last<'b>(&'b self, name: &'b str) -> Option<&'b Header<'a>> {
        self.iter_named(name).last()
    }

    pub fn iter_named<'b>(
        &'b self,
        name: &'b str,
    ) -> impl Iterator<Item = &'b Header<'a>> + 'b {
        self.headers.iter().filter(move |header| header.is_named(name))
    }

    pub fn value_of<'b>(&'b self, name: &'b str) -> Option<&'b str> {
        self.get_first(name).map(|h| h.get_raw_value())
    }
}

/// A line begins a new header when it carries an interior colon: the
/// colon may be neither the first byte nor the last.
fn header_start(line: &str) -> Option<usize> {
    let p = line.find(':')?;
    if p >= 1 && p + 1 < line.len() {
        Some(p)
    } else {
        None
    }
}

/// Recover messages that use bare LF line endings. Only applies when the
/// text contains no CR at all; mixed endings are left alone.
pub(crate) fn recover_line_endings(text: SharedString) -> SharedString {
    if memchr::memchr(b'\r', text.as_bytes()).is_some()
        || memchr::memchr(b'\n', text.as_bytes()).is_none()
    {
        return text;
    }
    text.as_str().replace('\n', "\r\n").into()
}

/// Split a message at the first blank line. When there is none, the
/// whole input counts as headers and the body is empty.
pub(crate) fn split_at_body<'a>(
    text: &SharedString<'a>,
) -> (SharedString<'a>, SharedString<'a>, bool) {
    match text.as_str().find("\r\n\r\n") {
        Some(i) => (text.slice(0..i), text.slice(i + 4..text.len()), true),
        None => (text.clone(), SharedString::Borrowed(""), false),
    }
}

/// Scan a header block into an ordered header list. This scanner never
/// fails: lines that are neither a header start nor a continuation of
/// the previous header are skipped.
pub fn parse_header_block<'a, S: Into<SharedString<'a>>>(block: S) -> HeaderBlock<'a> {
    let block = recover_line_endings(block.into());
    let s = block.as_str();
    let mut headers: Vec<Header> = Vec::new();

    let mut pos = 0;
    while pos < s.len() {
        let line_end = s[pos..].find("\r\n").map(|i| pos + i).unwrap_or(s.len());
        let line = &s[pos..line_end];

        if let Some(colon) = header_start(line) {
            let name = block.slice(pos..pos + colon);
            let mut value_start = pos + colon + 1;
            if s.as_bytes().get(value_start) == Some(&b' ') {
                value_start += 1;
            }
            let value = block.slice(value_start..line_end);
            headers.push(Header { name, value });
        } else if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(header) = headers.last_mut() {
                match fold_class(header.get_name()) {
                    FoldClass::Concat => header.append_concat(line),
                    FoldClass::JoinCrlf => header.append_folded(line),
                    FoldClass::Single => {}
                }
            }
        }

        pos = line_end + 2;
    }

    HeaderBlock { headers }
}
