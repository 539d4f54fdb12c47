use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MailViewError {
    #[error("invalid header: {0}")]
    HeaderParse(String),
    #[error("decoding body: {0}")]
    BodyDecode(String),
}
