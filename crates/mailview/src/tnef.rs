/// The decoded contents of a Transport-Neutral Encapsulation Format
/// bundle (`winmail.dat`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TnefPayload {
    pub body: Option<String>,
    pub body_content_type: String,
    pub attachments: Vec<TnefAttachment>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TnefAttachment {
    pub name: String,
    pub content_type: String,
    pub content_id: String,
    pub data: Vec<u8>,
}

/// TNEF decoding capability, supplied by the host. The format's
/// internals stay out of the parsing layer; the walker only flattens
/// whatever attachments the decoder reports.
pub trait TnefDecoder {
    fn decode(&self, data: &[u8]) -> Option<TnefPayload>;
}

/// Declines every bundle, dropping TNEF content on the floor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpTnef;

impl TnefDecoder for NoOpTnef {
    fn decode(&self, _data: &[u8]) -> Option<TnefPayload> {
        None
    }
}
