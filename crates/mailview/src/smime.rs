/// Cryptographic Message Syntax operations, supplied by the host.
///
/// The parser never touches cryptographic primitives itself: envelope
/// decryption and detached-signature verification are delegated to this
/// capability, which makes the behaviour trivially mockable and keeps
/// certificate and trust policy out of the parsing layer.
pub trait CmsProvider {
    /// Decrypt an enveloped-data blob, returning the plaintext MIME
    /// content, or `None` when decryption is not possible.
    fn decrypt_envelope(&self, envelope: &[u8]) -> Option<Vec<u8>>;

    /// Verify a detached signature over the given content.
    fn verify_signature(&self, signature: &[u8], signed_content: &[u8]) -> bool;
}

/// Declines every operation. Used when the host supplies no CMS
/// capability: encrypted envelopes stay closed and signatures stay
/// unverified, which is the safe reading for both.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpCms;

impl CmsProvider for NoOpCms {
    fn decrypt_envelope(&self, _envelope: &[u8]) -> Option<Vec<u8>> {
        None
    }

    fn verify_signature(&self, _signature: &[u8], _signed_content: &[u8]) -> bool {
        false
    }
}
