use crate::encoding::BASE64_RFC2045;
use crate::error::MailViewError;
use crate::Result;
use charset::Charset;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, satisfy};
use nom::combinator::{all_consuming, map, opt, recognize};
use nom::multi::{many0, many1, separated_list1};
use nom::sequence::{delimited, preceded, separated_pair, terminated, tuple};
use serde::{Deserialize, Serialize};
use tracing::debug;

type NomResult<'a, T> = nom::IResult<&'a str, T>;

fn nom_fail(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
}

fn is_utf8_non_ascii(c: char) -> bool {
    let c = c as u32;
    c == 0 || c >= 0x80
}

// ctl = '\u{00}'..'\u{1f}' | '\u{7f}'
fn is_ctl(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{1f}' | '\u{7f}')
}

fn is_char(c: char) -> bool {
    matches!(c, '\u{01}'..='\u{ff}')
}

fn is_especial(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '/' | '[' | ']' | '?' | '.' | '='
    )
}

fn is_token(c: char) -> bool {
    is_char(c) && c != ' ' && !is_especial(c) && !is_ctl(c)
}

// vchar = '\u{21}'..'\u{7e}' | utf8_non_ascii
fn is_vchar(c: char) -> bool {
    let u = c as u32;
    (0x21..=0x7e).contains(&u) || is_utf8_non_ascii(c)
}

fn is_atext(c: char) -> bool {
    match c {
        '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' | '=' | '?' | '^' | '_'
        | '`' | '{' | '|' | '}' | '~' => true,
        c => c.is_ascii_alphanumeric() || is_utf8_non_ascii(c),
    }
}

fn is_obs_no_ws_ctl(c: char) -> bool {
    matches!(c, '\u{01}'..='\u{08}' | '\u{0b}'..='\u{0c}' | '\u{0e}'..='\u{1f}' | '\u{7f}')
}

// ctext = '\u{21}'..'\u{27}' | '\u{2a}'..'\u{5b}' | '\u{5d}'..'\u{7e}' | obs_ctext | utf8_non_ascii
fn is_ctext(c: char) -> bool {
    match c {
        '\u{21}'..='\u{27}' | '\u{2a}'..='\u{5b}' | '\u{5d}'..='\u{7e}' => true,
        c => is_obs_no_ws_ctl(c) || is_utf8_non_ascii(c),
    }
}

// dtext = '\u{21}'..'\u{5a}' | '\u{5e}'..'\u{7e}' | obs_no_ws_ctl | utf8_non_ascii
fn is_dtext(c: char) -> bool {
    match c {
        '\u{21}'..='\u{5a}' | '\u{5e}'..='\u{7e}' => true,
        c => is_obs_no_ws_ctl(c) || is_utf8_non_ascii(c),
    }
}

// qtext = '\u{21}' | '\u{23}'..'\u{5b}' | '\u{5d}'..'\u{7e}' | obs_no_ws_ctl | utf8_non_ascii
fn is_qtext(c: char) -> bool {
    match c {
        '\u{21}' | '\u{23}'..='\u{5b}' | '\u{5d}'..='\u{7e}' => true,
        c => is_obs_no_ws_ctl(c) || is_utf8_non_ascii(c),
    }
}

fn is_tspecial(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']' | '?' | '='
    )
}

fn is_attribute_char(c: char) -> bool {
    match c {
        ' ' | '*' | '\'' | '%' => false,
        _ => is_char(c) && !is_ctl(c) && !is_tspecial(c),
    }
}

fn is_mime_token(c: char) -> bool {
    is_char(c) && c != ' ' && !is_ctl(c) && !is_tspecial(c)
}

fn is_quoted_pair(c: char) -> bool {
    match c {
        '\u{00}' | '\r' | '\n' | ' ' => true,
        c => is_obs_no_ws_ctl(c) || is_vchar(c),
    }
}

fn atext(input: &str) -> NomResult<&str> {
    take_while1(is_atext)(input)
}

// Folding whitespace: any run of linear whitespace, including the bare
// newlines that unfolded header values may still carry.
fn fws(input: &str) -> NomResult<&str> {
    take_while1(|c| c == ' ' || c == '\t' || c == '\r' || c == '\n')(input)
}

// cfws = ((fws? comment)+ fws?) | fws
fn cfws(input: &str) -> NomResult<&str> {
    recognize(alt((
        recognize(tuple((many1(tuple((opt(fws), comment))), opt(fws)))),
        fws,
    )))(input)
}

// comment = "(" (fws? ccontent)* fws? ")"
fn comment(input: &str) -> NomResult<&str> {
    recognize(tuple((
        char('('),
        many0(tuple((opt(fws), ccontent))),
        opt(fws),
        char(')'),
    )))(input)
}

// ccontent = ctext | quoted_pair | comment
fn ccontent(input: &str) -> NomResult<&str> {
    alt((
        recognize(satisfy(is_ctext)),
        recognize(quoted_pair),
        comment,
    ))(input)
}

// quoted_pair = "\" (vchar | wsp | obs_qp)
fn quoted_pair(input: &str) -> NomResult<char> {
    preceded(char('\\'), satisfy(is_quoted_pair))(input)
}

// quoted_string = cfws? '"' (fws? qcontent)* fws? '"' cfws?
fn quoted_string(input: &str) -> NomResult<String> {
    let (loc, (bits, trailer)) = delimited(
        opt(cfws),
        delimited(
            char('"'),
            tuple((many0(tuple((opt(fws), qcontent))), opt(fws))),
            char('"'),
        ),
        opt(cfws),
    )(input)?;

    let mut result = String::new();
    for (a, b) in bits {
        if let Some(a) = a {
            result.push_str(a);
        }
        result.push(b);
    }
    if let Some(t) = trailer {
        result.push_str(t);
    }
    Ok((loc, result))
}

// qcontent = qtext | quoted_pair
fn qcontent(input: &str) -> NomResult<char> {
    alt((satisfy(is_qtext), quoted_pair))(input)
}

// atom = cfws? atext cfws?
fn atom(input: &str) -> NomResult<String> {
    let (loc, text) = delimited(opt(cfws), atext, opt(cfws))(input)?;
    Ok((loc, text.to_string()))
}

// word = atom | quoted_string
fn word(input: &str) -> NomResult<String> {
    alt((atom, quoted_string))(input)
}

// phrase = (encoded_word | word) (encoded_word | word | "." | cfws)*
fn phrase(input: &str) -> NomResult<String> {
    let (loc, (first, rest)) = tuple((
        alt((encoded_word, word)),
        many0(alt((
            map(encoded_word, Some),
            map(word, Some),
            map(char('.'), |dot| Some(dot.to_string())),
            map(cfws, |_| None),
        ))),
    ))(input)?;

    let mut words = vec![first];
    words.extend(rest.into_iter().flatten());
    Ok((loc, words.join(" ")))
}

// dot_atom_text = atext ("." atext)*
fn dot_atom_text(input: &str) -> NomResult<String> {
    let (loc, (a, b)) = tuple((atext, many0(preceded(char('.'), atext))))(input)?;
    let mut result = a.to_string();
    for item in b {
        result.push('.');
        result.push_str(item);
    }
    Ok((loc, result))
}

// dot_atom = cfws? dot_atom_text cfws?
fn dot_atom(input: &str) -> NomResult<String> {
    delimited(opt(cfws), dot_atom_text, opt(cfws))(input)
}

// obs_local_part = word ("." word)*
fn obs_local_part(input: &str) -> NomResult<String> {
    let (loc, (first, dotted)) = tuple((word, many0(preceded(char('.'), word))))(input)?;
    let mut result = first;
    for w in dotted {
        result.push('.');
        result.push_str(&w);
    }
    Ok((loc, result))
}

// local_part = dot_atom | quoted_string | obs_local_part
fn local_part(input: &str) -> NomResult<String> {
    alt((dot_atom, quoted_string, obs_local_part))(input)
}

// domain_literal = cfws? "[" (fws? dtext)* fws? "]" cfws?
fn domain_literal(input: &str) -> NomResult<String> {
    let (loc, bits) = delimited(
        opt(cfws),
        delimited(
            char('['),
            many0(preceded(opt(fws), alt((satisfy(is_dtext), quoted_pair)))),
            preceded(opt(fws), char(']')),
        ),
        opt(cfws),
    )(input)?;

    let mut result = String::new();
    result.push('[');
    for b in bits {
        result.push(b);
    }
    result.push(']');
    Ok((loc, result))
}

// obs_domain = atom ("." atom)*
fn obs_domain(input: &str) -> NomResult<String> {
    let (loc, (first, dotted)) = tuple((atom, many0(preceded(char('.'), atom))))(input)?;
    let mut result = first;
    for a in dotted {
        result.push('.');
        result.push_str(&a);
    }
    Ok((loc, result))
}

// domain = dot_atom | domain_literal | obs_domain
fn domain(input: &str) -> NomResult<String> {
    alt((dot_atom, domain_literal, obs_domain))(input)
}

// addr_spec = local_part "@" domain
fn addr_spec(input: &str) -> NomResult<String> {
    let (loc, (local, domain)) = separated_pair(local_part, char('@'), domain)(input)?;
    Ok((loc, format!("{local}@{domain}")))
}

// obs_route = (cfws | ",")* "@" domain ("," cfws? ("@" domain)?)* ":"
fn obs_route(input: &str) -> NomResult<&str> {
    recognize(terminated(
        tuple((
            many0(alt((cfws, recognize(char(','))))),
            char('@'),
            domain,
            many0(tuple((
                char(','),
                opt(cfws),
                opt(tuple((char('@'), domain))),
            ))),
        )),
        char(':'),
    ))(input)
}

// angle_addr = cfws? "<" obs_route? addr_spec ">" cfws?
fn angle_addr(input: &str) -> NomResult<String> {
    delimited(
        opt(cfws),
        delimited(char('<'), preceded(opt(obs_route), addr_spec), char('>')),
        opt(cfws),
    )(input)
}

// name_addr = display_name? angle_addr
fn name_addr(input: &str) -> NomResult<Mailbox> {
    map(tuple((opt(phrase), angle_addr)), |(name, address)| Mailbox {
        name,
        address,
    })(input)
}

// mailbox = name_addr | addr_spec
fn mailbox(input: &str) -> NomResult<Mailbox> {
    alt((
        name_addr,
        map(addr_spec, |address| Mailbox {
            name: None,
            address,
        }),
    ))(input)
}

// mailbox_list = (mailbox ("," mailbox)*) | obs_mbox_list
fn mailbox_list(input: &str) -> NomResult<Vec<Mailbox>> {
    alt((separated_list1(char(','), mailbox), obs_mbox_list))(input)
}

// obs_mbox_list = ((cfws? ",")* mailbox ("," (mailbox | cfws))*)+
fn obs_mbox_list(input: &str) -> NomResult<Vec<Mailbox>> {
    let (loc, entries) = many1(preceded(
        many0(preceded(opt(cfws), char(','))),
        tuple((
            mailbox,
            many0(preceded(
                char(','),
                alt((map(mailbox, Some), map(cfws, |_| None))),
            )),
        )),
    ))(input)?;

    let mut result = Vec::new();
    for (first, rest) in entries {
        result.push(first);
        result.extend(rest.into_iter().flatten());
    }
    Ok((loc, result))
}

// group = display_name ":" group_list? ";" cfws?
fn group(input: &str) -> NomResult<Address> {
    let (loc, (name, _, entries, _)) = terminated(
        tuple((phrase, char(':'), opt(group_list), char(';'))),
        opt(cfws),
    )(input)?;
    Ok((
        loc,
        Address::Group {
            name,
            entries: entries.unwrap_or_default(),
        },
    ))
}

// group_list = mailbox_list | cfws
fn group_list(input: &str) -> NomResult<Vec<Mailbox>> {
    alt((mailbox_list, map(cfws, |_| Vec::new())))(input)
}

// address = mailbox | group
fn address(input: &str) -> NomResult<Address> {
    alt((map(mailbox, Address::Mailbox), group))(input)
}

// address_list = (address ("," address)*) | obs_addr_list
fn address_list(input: &str) -> NomResult<Vec<Address>> {
    alt((separated_list1(char(','), address), obs_address_list))(input)
}

// obs_addr_list = ((cfws? ",")* address ("," (address | cfws))*)+
fn obs_address_list(input: &str) -> NomResult<Vec<Address>> {
    let (loc, entries) = many1(preceded(
        many0(preceded(opt(cfws), char(','))),
        tuple((
            address,
            many0(preceded(
                char(','),
                alt((map(address, Some), map(cfws, |_| None))),
            )),
        )),
    ))(input)?;

    let mut result = Vec::new();
    for (first, rest) in entries {
        result.push(first);
        result.extend(rest.into_iter().flatten());
    }
    Ok((loc, result))
}

// encoded_word = "=?" charset ("*" language)? "?" encoding "?" encoded_text "?="
fn encoded_word(input: &str) -> NomResult<String> {
    let (loc, (charset, _language, _, encoding, _, text)) = delimited(
        tag("=?"),
        tuple((
            mime_word_token,
            opt(preceded(char('*'), mime_word_token)),
            char('?'),
            mime_word_token,
            char('?'),
            encoded_text,
        )),
        tag("?="),
    )(input)?;

    let bytes = match encoding {
        "B" | "b" => BASE64_RFC2045
            .decode(text.as_bytes())
            .map_err(|_| nom_fail(input))?,
        "Q" | "q" => quoted_printable::decode(
            text.replace('_', " "),
            quoted_printable::ParseMode::Robust,
        )
        .map_err(|_| nom_fail(input))?,
        _ => return Err(nom_fail(input)),
    };

    let charset = Charset::for_label_no_replacement(charset.as_bytes()).ok_or_else(|| {
        nom_fail(input)
    })?;
    let (decoded, _malformed) = charset.decode_without_bom_handling(&bytes);
    Ok((loc, decoded.to_string()))
}

fn mime_word_token(input: &str) -> NomResult<&str> {
    take_while1(|c| c != '*' && is_token(c))(input)
}

// encoded_text = (vchar - " " - "?")+
fn encoded_text(input: &str) -> NomResult<&str> {
    take_while1(|c| is_vchar(c) && c != ' ' && c != '?')(input)
}

// obs_utext = "\u{00}" | obs_no_ws_ctl | vchar
fn obs_utext(input: &str) -> NomResult<char> {
    satisfy(|c| c == '\u{00}' || is_obs_no_ws_ctl(c) || is_vchar(c))(input)
}

// Unstructured header text: RFC 2047 words are decoded, whitespace
// between two encoded words is elided, and remaining whitespace runs
// collapse to a single space.
fn unstructured(input: &str) -> NomResult<String> {
    enum Word {
        Encoded(String),
        UText(char),
        Fws,
    }

    let (loc, words) = many0(alt((
        preceded(
            take_while(|c| c == '\r' || c == '\n'),
            terminated(
                alt((map(encoded_word, Word::Encoded), map(obs_utext, Word::UText))),
                take_while(|c| c == '\r' || c == '\n'),
            ),
        ),
        map(fws, |_| Word::Fws),
    )))(input)?;

    enum Processed {
        Encoded(String),
        Text(String),
        Fws,
    }
    let mut processed: Vec<Processed> = Vec::new();
    for w in words {
        match w {
            Word::Encoded(p) => {
                if processed.len() >= 2
                    && matches!(processed.last(), Some(Processed::Fws))
                    && matches!(processed[processed.len() - 2], Processed::Encoded(_))
                {
                    // whitespace between encoded words is elided
                    processed.pop();
                }
                processed.push(Processed::Encoded(p));
            }
            Word::Fws => {
                if !matches!(processed.last(), Some(Processed::Fws)) {
                    processed.push(Processed::Fws);
                }
            }
            Word::UText(c) => match processed.last_mut() {
                Some(Processed::Text(prior)) => prior.push(c),
                _ => processed.push(Processed::Text(c.to_string())),
            },
        }
    }

    let mut result = String::new();
    for word in processed {
        match word {
            Processed::Encoded(s) | Processed::Text(s) => result.push_str(&s),
            Processed::Fws => result.push(' '),
        }
    }
    Ok((loc, result))
}

// mime_token = (!(" " | ctl | tspecials) char)+
fn mime_token(input: &str) -> NomResult<&str> {
    take_while1(is_mime_token)(input)
}

// RFC 2045 Content-Type, with the RFC 2231 parameter extensions. The
// `;` between parameters is nominally required, but enough producers
// omit it that it is optional here.
fn content_type(input: &str) -> NomResult<MimeParameters> {
    let (loc, (mime_type, _, _, _, mime_subtype, _, parameters)) = preceded(
        opt(cfws),
        tuple((
            mime_token,
            opt(cfws),
            char('/'),
            opt(cfws),
            mime_token,
            opt(cfws),
            many0(preceded(
                preceded(opt(char(';')), opt(cfws)),
                terminated(parameter, opt(cfws)),
            )),
        )),
    )(input)?;

    Ok((
        loc,
        MimeParameters {
            value: format!("{mime_type}/{mime_subtype}"),
            parameters,
        },
    ))
}

// A bare token followed by parameters; fits Content-Transfer-Encoding
// and Content-Disposition values.
fn token_with_parameters(input: &str) -> NomResult<MimeParameters> {
    let (loc, (value, _, parameters)) = preceded(
        opt(cfws),
        tuple((
            mime_token,
            opt(cfws),
            many0(preceded(
                preceded(opt(char(';')), opt(cfws)),
                terminated(parameter, opt(cfws)),
            )),
        )),
    )(input)?;

    Ok((
        loc,
        MimeParameters {
            value: value.to_string(),
            parameters,
        },
    ))
}

// parameter = regular_parameter | extended_parameter
fn parameter(input: &str) -> NomResult<MimeParameter> {
    alt((
        regular_parameter,
        extended_param_with_charset,
        extended_param_no_charset,
    ))(input)
}

fn extended_param_with_charset(input: &str) -> NomResult<MimeParameter> {
    map(
        tuple((
            attribute,
            opt(section),
            char('*'),
            opt(cfws),
            char('='),
            opt(cfws),
            opt(mime_charset_token),
            char('\''),
            opt(mime_charset_token),
            char('\''),
            map(
                recognize(many0(alt((ext_octet, take_while1(is_attribute_char))))),
                |s: &str| s.to_string(),
            ),
        )),
        |(name, section, _, _, _, _, mime_charset, _, mime_language, _, value)| MimeParameter {
            name: name.to_string(),
            section,
            mime_charset: mime_charset.map(|s| s.to_string()),
            mime_language: mime_language.map(|s| s.to_string()),
            uses_encoding: true,
            value,
        },
    )(input)
}

fn extended_param_no_charset(input: &str) -> NomResult<MimeParameter> {
    map(
        tuple((
            attribute,
            opt(section),
            opt(char('*')),
            opt(cfws),
            char('='),
            opt(cfws),
            alt((
                quoted_string,
                map(
                    recognize(many0(alt((ext_octet, take_while1(is_attribute_char))))),
                    |s: &str| s.to_string(),
                ),
            )),
        )),
        |(name, section, star, _, _, _, value)| MimeParameter {
            name: name.to_string(),
            section,
            mime_charset: None,
            mime_language: None,
            uses_encoding: star.is_some(),
            value,
        },
    )(input)
}

fn mime_charset_token(input: &str) -> NomResult<&str> {
    take_while1(|c| is_mime_token(c) && c != '\'')(input)
}

fn ext_octet(input: &str) -> NomResult<&str> {
    recognize(tuple((
        char('%'),
        satisfy(|c| c.is_ascii_hexdigit()),
        satisfy(|c| c.is_ascii_hexdigit()),
    )))(input)
}

// section = "*" digit+
fn section(input: &str) -> NomResult<u32> {
    preceded(char('*'), nom::character::complete::u32)(input)
}

// regular_parameter = attribute cfws? "=" cfws? value
fn regular_parameter(input: &str) -> NomResult<MimeParameter> {
    map(
        tuple((attribute, opt(cfws), char('='), opt(cfws), parameter_value)),
        |(name, _, _, _, value)| MimeParameter {
            name: name.to_string(),
            value,
            section: None,
            uses_encoding: false,
            mime_charset: None,
            mime_language: None,
        },
    )(input)
}

// attribute = (!(" " | ctl | tspecials | "*" | "'" | "%") char)+
fn attribute(input: &str) -> NomResult<&str> {
    take_while1(is_attribute_char)(input)
}

fn parameter_value(input: &str) -> NomResult<String> {
    alt((map(mime_token, |s: &str| s.to_string()), quoted_string))(input)
}

fn parse_with<'a, R, F>(text: &'a str, parser: F) -> Result<R>
where
    F: FnMut(&'a str) -> NomResult<'a, R>,
{
    let (_, result) = all_consuming(parser)(text)
        .map_err(|err| MailViewError::HeaderParse(format!("{err:?}")))?;
    Ok(result)
}

/// A single mail recipient or originator. Group syntax is flattened to
/// its member mailboxes before this type is produced, and an address is
/// kept as one string so that non-conformant input survives the trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Mailbox(Mailbox),
    Group { name: String, entries: Vec<Mailbox> },
}

fn flatten_addresses(addresses: Vec<Address>) -> Vec<Mailbox> {
    let mut result = Vec::new();
    for address in addresses {
        match address {
            Address::Mailbox(mailbox) => result.push(mailbox),
            Address::Group { entries, .. } => result.extend(entries),
        }
    }
    result
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MimeParameter {
    name: String,
    section: Option<u32>,
    mime_charset: Option<String>,
    mime_language: Option<String>,
    uses_encoding: bool,
    value: String,
}

/// A structured header value of the shape `value; name=param; ...`, as
/// carried by Content-Type and Content-Disposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeParameters {
    pub value: String,
    parameters: Vec<MimeParameter>,
}

impl MimeParameters {
    /// Retrieve the value for a named parameter, decoding %-escaped
    /// segments and merging multi-section continuations. Invalid
    /// charsets and encodings are silently ignored.
    pub fn get(&self, name: &str) -> Option<String> {
        let mut elements: Vec<&MimeParameter> = self
            .parameters
            .iter()
            .filter(|p| p.name.eq_ignore_ascii_case(name))
            .collect();
        if elements.is_empty() {
            return None;
        }
        elements.sort_by_key(|p| p.section);

        let mut mime_charset = None;
        let mut result = String::new();
        for element in elements {
            if let Some(label) = element.mime_charset.as_deref() {
                mime_charset = Charset::for_label_no_replacement(label.as_bytes());
            }
            match (&mime_charset, element.uses_encoding) {
                (Some(charset), true) => {
                    let bytes = percent_decode(&element.value);
                    let (decoded, _malformed) = charset.decode_without_bom_handling(&bytes);
                    result.push_str(&decoded);
                }
                _ => result.push_str(&element.value),
            }
        }
        Some(result)
    }

    pub fn is_multipart(&self) -> bool {
        self.value.starts_with("message/") || self.value.starts_with("multipart/")
    }

    pub fn is_text(&self) -> bool {
        self.value.starts_with("text/")
    }
}

fn percent_decode(value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len());
    let push_char = |c: char, bytes: &mut Vec<u8>| {
        let mut buf = [0u8; 4];
        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    };
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            push_char(c, &mut bytes);
            continue;
        }
        let hi = chars.next();
        let lo = chars.next();
        match (
            hi.and_then(|c| c.to_digit(16)),
            lo.and_then(|c| c.to_digit(16)),
        ) {
            (Some(hi), Some(lo)) => bytes.push((hi * 16 + lo) as u8),
            _ => {
                push_char('%', &mut bytes);
                for c in [hi, lo].into_iter().flatten() {
                    push_char(c, &mut bytes);
                }
            }
        }
    }
    bytes
}

pub struct Parser;

impl Parser {
    /// Parse an address-list header (`To`, `Cc`, ...), flattening group
    /// syntax into the member mailboxes.
    pub fn parse_address_list_header(text: &str) -> Result<Vec<Mailbox>> {
        parse_with(text, address_list).map(flatten_addresses)
    }

    pub fn parse_mailbox_header(text: &str) -> Result<Mailbox> {
        parse_with(text, mailbox)
    }

    pub fn parse_unstructured_header(text: &str) -> Result<String> {
        parse_with(text, unstructured)
    }

    pub fn parse_content_type_header(text: &str) -> Result<MimeParameters> {
        parse_with(text, content_type)
    }

    pub fn parse_content_disposition_header(text: &str) -> Result<MimeParameters> {
        parse_with(text, token_with_parameters)
    }
}

/// Fallback splitter for address values the grammar rejects: bare
/// addresses, unquoted punctuation in display names, and similar.
fn split_addresses_lax(text: &str) -> Vec<Mailbox> {
    let mut result = Vec::new();
    for chunk in text.split(',') {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        match (chunk.find('<'), chunk.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                let name = chunk[..open].trim().trim_matches('"').trim();
                result.push(Mailbox {
                    name: if name.is_empty() {
                        None
                    } else {
                        Some(name.to_string())
                    },
                    address: chunk[open + 1..close].trim().to_string(),
                });
            }
            _ => result.push(Mailbox {
                name: None,
                address: chunk.to_string(),
            }),
        }
    }
    result
}

/// Address-list parse that never fails: grammar first, lax split second.
pub fn parse_address_list(text: &str) -> Vec<Mailbox> {
    match Parser::parse_address_list_header(text) {
        Ok(list) => list,
        Err(err) => {
            debug!("address list fell back to lax splitting: {err:?}");
            split_addresses_lax(text)
        }
    }
}

/// Unstructured-header decode that never fails; undecodable input is
/// returned verbatim.
pub fn decode_unstructured(text: &str) -> String {
    match Parser::parse_unstructured_header(text) {
        Ok(decoded) => decoded,
        Err(err) => {
            debug!("unstructured header kept verbatim: {err:?}");
            text.to_string()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simple_addresses() {
        assert_eq!(
            parse_address_list("a@x"),
            vec![Mailbox {
                name: None,
                address: "a@x".to_string()
            }]
        );
        assert_eq!(
            parse_address_list("John Smith <jsmith@example.com>"),
            vec![Mailbox {
                name: Some("John Smith".to_string()),
                address: "jsmith@example.com".to_string()
            }]
        );
        assert_eq!(
            parse_address_list("a@x.example, \"B\" <b@y.example>"),
            vec![
                Mailbox {
                    name: None,
                    address: "a@x.example".to_string()
                },
                Mailbox {
                    name: Some("B".to_string()),
                    address: "b@y.example".to_string()
                },
            ]
        );
    }

    #[test]
    fn group_flattening() {
        assert_eq!(
            parse_address_list("Friends: jane@example.com, joe@example.com;"),
            vec![
                Mailbox {
                    name: None,
                    address: "jane@example.com".to_string()
                },
                Mailbox {
                    name: None,
                    address: "joe@example.com".to_string()
                },
            ]
        );
        assert_eq!(parse_address_list("undisclosed-recipients:;"), vec![]);
    }

    #[test]
    fn comments_and_literals() {
        assert_eq!(
            parse_address_list("art@vandelay.example (Vandelay Industries)"),
            vec![Mailbox {
                name: None,
                address: "art@vandelay.example".to_string()
            }]
        );
        assert_eq!(
            parse_address_list("a@[127.0.0.1]"),
            vec![Mailbox {
                name: None,
                address: "a@[127.0.0.1]".to_string()
            }]
        );
    }

    #[test]
    fn lax_fallback() {
        assert_eq!(
            parse_address_list("not an address"),
            vec![Mailbox {
                name: None,
                address: "not an address".to_string()
            }]
        );
        assert_eq!(
            parse_address_list("Mr. Odd; Name <odd@example.com>"),
            vec![Mailbox {
                name: Some("Mr. Odd; Name".to_string()),
                address: "odd@example.com".to_string()
            }]
        );
        assert_eq!(parse_address_list(""), vec![]);
    }

    #[test]
    fn encoded_word_display_name() {
        assert_eq!(
            parse_address_list("=?UTF-8?Q?John_Sm=C3=AEth?= <john@example.com>"),
            vec![Mailbox {
                name: Some("John Smîth".to_string()),
                address: "john@example.com".to_string()
            }]
        );
    }

    #[test]
    fn unstructured_decoding() {
        assert_eq!(decode_unstructured("hello there"), "hello there");
        assert_eq!(
            decode_unstructured("Why not both? =?utf-8?b?4pi6?="),
            "Why not both? ☺"
        );
        assert_eq!(
            decode_unstructured("=?utf-8?q?one?= =?utf-8?q?two?="),
            "onetwo"
        );
        assert_eq!(decode_unstructured("folded\r\n over"), "folded over");
    }

    #[test]
    fn content_type_parameters() {
        let ct = Parser::parse_content_type_header(
            "multipart/alternative; boundary=\"B\"; charset=utf-8",
        )
        .unwrap();
        k9::assert_equal!(ct.value, "multipart/alternative");
        assert!(ct.is_multipart());
        k9::assert_equal!(ct.get("boundary"), Some("B".to_string()));
        k9::assert_equal!(ct.get("CHARSET"), Some("utf-8".to_string()));
        k9::assert_equal!(ct.get("missing"), None);
    }

    #[test]
    fn rfc2231_continuations() {
        let cd = Parser::parse_content_disposition_header(
            "attachment; filename*0*=UTF-8''caf%C3%A9%20; filename*1*=tables.gif",
        )
        .unwrap();
        k9::assert_equal!(cd.value, "attachment");
        k9::assert_equal!(cd.get("filename"), Some("café tables.gif".to_string()));
    }

    #[test]
    fn unquoted_boundary() {
        let ct = Parser::parse_content_type_header("multipart/mixed; boundary=foobar").unwrap();
        assert_eq!(ct.get("boundary"), Some("foobar".to_string()));
    }
}
