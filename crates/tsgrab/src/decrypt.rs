use std::str::FromStr;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

use crate::error::{GrabError, GrabResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMethod {
    /// AES-128 in CBC mode with PKCS#7 padding.
    Aes128,
}

impl FromStr for CipherMethod {
    type Err = GrabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES-128" => Ok(Self::Aes128),
            _ => Err(GrabError::UnsupportedCipher(s.to_string())),
        }
    }
}

pub fn decrypt(
    ciphertext: &[u8],
    key: &[u8; 16],
    iv: &[u8; 16],
    method: CipherMethod,
) -> GrabResult<Vec<u8>> {
    Ok(match method {
        CipherMethod::Aes128 => cbc::Decryptor::<aes::Aes128>::new(key.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)?,
    })
}
