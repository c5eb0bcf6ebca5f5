// AUTH handshake plumbing. Key storage and the signature algorithm belong to
// the caller; the protocol only needs something that can sign the device's
// token and hand over a public key.

/// AUTH arg0 values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    Token = 1,
    Signature = 2,
    RsaPublicKey = 3,
}

impl AuthType {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(AuthType::Token),
            2 => Some(AuthType::Signature),
            3 => Some(AuthType::RsaPublicKey),
            _ => None,
        }
    }
}

/// One host key able to answer a device AUTH challenge.
pub trait AuthSigner: Send + Sync {
    /// Signs the device-provided token.
    fn sign(&self, token: &[u8]) -> Vec<u8>;

    /// Public key in the format adbd stores in `adb_keys`.
    fn public_key(&self) -> Vec<u8>;
}
