mod encoding;
mod error;
mod header;
mod message;
mod mimepart;
mod rfc5322;
mod smime;
mod strings;
mod tnef;

pub use error::MailViewError;
pub type Result<T> = std::result::Result<T, MailViewError>;

pub use encoding::{decode_charset_text, decode_transfer_encoding, ContentTransferEncoding, BASE64_RFC2045};
pub use header::{parse_header_block, Header, HeaderBlock};
pub use message::{
    Attachment, ExtendedProperties, MessageFlags, MessageParser, ParsedMessage, Priority,
    ProcessingFlags,
};
pub use mimepart::MimePart;
pub use rfc5322::{decode_unstructured, parse_address_list, Mailbox, MimeParameters, Parser};
pub use smime::{CmsProvider, NoOpCms};
pub use strings::SharedString;
pub use tnef::{NoOpTnef, TnefAttachment, TnefDecoder, TnefPayload};
