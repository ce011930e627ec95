use aes::Aes128;
use base64::{Engine as _, engine::general_purpose};
use cbc::cipher::{
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
    block_padding::{NoPadding, Pkcs7},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::models::identity::Identity;

/// The AES block size, which is also the key and IV length.
pub const BLOCK_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Reasons an identity token could not be opened.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not valid base64")]
    Base64,
    #[error("ciphertext is not a multiple of the block size")]
    BlockLength,
    #[error("invalid padding size")]
    Padding,
    #[error("plaintext is not valid UTF-8")]
    Utf8,
    #[error("plaintext is not an identity object: {0}")]
    Json(String),
}

/// A normalised token key that is zeroized on drop.
///
/// The same bytes serve as the CBC initialization vector. That is how the
/// issuing side builds tokens, so it has to be kept for compatibility, but it
/// means identical identities always produce identical tokens and nothing
/// authenticates the ciphertext.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TokenKey([u8; BLOCK_SIZE]);

impl TokenKey {
    /// Normalises a shared secret to the block size: right-padded with
    /// ASCII `'0'` when short, truncated when long.
    pub fn from_secret(secret: &str) -> Self {
        let mut key = [b'0'; BLOCK_SIZE];
        let bytes = secret.as_bytes();
        let n = bytes.len().min(BLOCK_SIZE);
        key[..n].copy_from_slice(&bytes[..n]);
        Self(key)
    }

    /// Returns a reference to the key as a byte array.
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenKey(..)")
    }
}

/// Encrypts `plain` and returns the standard base64 encoding of the ciphertext.
pub fn encrypt(plain: &str, key: &TokenKey) -> String {
    let cipher = Aes128CbcEnc::new(&(*key.as_bytes()).into(), &(*key.as_bytes()).into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
    general_purpose::STANDARD.encode(ciphertext)
}

/// Decrypts a base64 token back into its plaintext.
pub fn decrypt(token: &str, key: &TokenKey) -> Result<String, TokenError> {
    let raw = general_purpose::STANDARD
        .decode(token)
        .map_err(|_| TokenError::Base64)?;

    if raw.len() % BLOCK_SIZE != 0 {
        return Err(TokenError::BlockLength);
    }

    let cipher = Aes128CbcDec::new(&(*key.as_bytes()).into(), &(*key.as_bytes()).into());
    let plain = cipher
        .decrypt_padded_vec_mut::<NoPadding>(&raw)
        .map_err(|_| TokenError::BlockLength)?;
    let plain = unpad(plain)?;

    String::from_utf8(plain).map_err(|_| TokenError::Utf8)
}

/// Strips trailing padding. Only the final byte is consulted, so a token
/// whose padding bytes disagree with each other still opens.
fn unpad(mut data: Vec<u8>) -> Result<Vec<u8>, TokenError> {
    let last = *data.last().ok_or(TokenError::Padding)? as usize;
    if last > data.len() {
        return Err(TokenError::Padding);
    }
    data.truncate(data.len() - last);
    Ok(data)
}

/// Opens a token and parses the `{name, role}` claim inside it.
pub fn decode_identity(token: &str, key: &TokenKey) -> Result<Identity, TokenError> {
    let plain = decrypt(token, key)?;
    sonic_rs::from_str::<Identity>(&plain).map_err(|e| TokenError::Json(e.to_string()))
}

/// Seals an identity claim into a token.
pub fn encode_identity(identity: &Identity, key: &TokenKey) -> String {
    let plain = sonic_rs::to_string(identity).unwrap_or_else(|_| "{}".to_string());
    encrypt(&plain, key)
}
