//! Big-endian integer packing and single-block DES helpers shared by the
//! command layer, the secure session, and the audio pipeline.

use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use des::Des;

use crate::error::{NetMdError, Result};

pub fn u16_be(n: u16) -> [u8; 2] {
    n.to_be_bytes()
}

pub fn u32_be(n: u32) -> [u8; 4] {
    n.to_be_bytes()
}

pub fn u64_be(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

pub fn read_u16_be(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

pub fn read_u16_le(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}

pub fn read_u32_le(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Reinterprets a stored BCD-like byte's printed hex digits as base-10, e.g.
/// `0x23` -> `23`. This is the wire semantics NetMD capacity/length fields use.
pub fn hex_digits_as_decimal(b: u8) -> u64 {
    let s = format!("{:x}", b);
    s.parse().unwrap_or(0)
}

/// DES-ECB encrypt, one block at a time, no padding. `data.len()` must be a
/// multiple of 8; `key` must be exactly 8 bytes.
pub fn des_ecb_encrypt(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 8 {
        return Err(NetMdError::Crypto("DES key must be 8 bytes".into()).into());
    }
    if data.len() % 8 != 0 {
        return Err(NetMdError::Crypto("DES-ECB input must be a multiple of 8 bytes".into()).into());
    }
    let cipher = ecb::Encryptor::<Des>::new(key.into());
    let mut buf = data.to_vec();
    cipher
        .encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
        .map_err(|e| NetMdError::Crypto(format!("ECB encrypt failed: {}", e)))?;
    Ok(buf)
}

/// DES-ECB decrypt, one block at a time, no padding.
pub fn des_ecb_decrypt(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 8 {
        return Err(NetMdError::Crypto("DES key must be 8 bytes".into()).into());
    }
    if data.len() % 8 != 0 {
        return Err(NetMdError::Crypto("DES-ECB input must be a multiple of 8 bytes".into()).into());
    }
    let cipher = ecb::Decryptor::<Des>::new(key.into());
    let mut buf = data.to_vec();
    cipher
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| NetMdError::Crypto(format!("ECB decrypt failed: {}", e)))?;
    Ok(buf)
}

/// DES-CBC encrypt in place, no padding. `iv` is consumed; callers that need
/// to chain IVs across calls should slice the tail of the ciphertext themselves.
pub fn des_cbc_encrypt(data: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 8 || iv.len() != 8 {
        return Err(NetMdError::Crypto("DES-CBC key/iv must be 8 bytes".into()).into());
    }
    if data.len() % 8 != 0 {
        return Err(NetMdError::Crypto("DES-CBC input must be a multiple of 8 bytes".into()).into());
    }
    let cipher = cbc::Encryptor::<Des>::new(key.into(), iv.into());
    let mut buf = data.to_vec();
    cipher
        .encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
        .map_err(|e| NetMdError::Crypto(format!("CBC encrypt failed: {}", e)))?;
    Ok(buf)
}

/// DES-CBC decrypt in place, no padding.
pub fn des_cbc_decrypt(data: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 8 || iv.len() != 8 {
        return Err(NetMdError::Crypto("DES-CBC key/iv must be 8 bytes".into()).into());
    }
    if data.len() % 8 != 0 {
        return Err(NetMdError::Crypto("DES-CBC input must be a multiple of 8 bytes".into()).into());
    }
    let cipher = cbc::Decryptor::<Des>::new(key.into(), iv.into());
    let mut buf = data.to_vec();
    cipher
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| NetMdError::Crypto(format!("CBC decrypt failed: {}", e)))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_round_trip() {
        for n in [0u16, 1, 0x1234, 0xffff] {
            assert_eq!(read_u16_be(&u16_be(n)), n);
        }
        for n in [0u32, 1, 0x1234_5678, 0xffff_ffff] {
            assert_eq!(u32::from_be_bytes(u32_be(n)), n);
        }
        for n in [0u64, 1, 0x1122_3344_5566_7788, u64::MAX] {
            assert_eq!(u64::from_be_bytes(u64_be(n)), n);
        }
    }

    #[test]
    fn hex_digits_parse() {
        assert_eq!(hex_digits_as_decimal(0x23), 23);
        assert_eq!(hex_digits_as_decimal(0x00), 0);
        assert_eq!(hex_digits_as_decimal(0x59), 59);
    }

    #[test]
    fn des_ecb_round_trip() {
        let key = b"01234567";
        let msg = b"ABCDEFGHIJKLMNOP";
        let ct = des_ecb_encrypt(msg, key).unwrap();
        let pt = des_ecb_decrypt(&ct, key).unwrap();
        assert_eq!(pt, msg);
        assert_ne!(ct, msg);
    }

    #[test]
    fn des_cbc_round_trip() {
        let key = b"01234567";
        let iv = [0u8; 8];
        let msg = b"ABCDEFGHIJKLMNOP";
        let ct = des_cbc_encrypt(msg, key, &iv).unwrap();
        let pt = des_cbc_decrypt(&ct, key, &iv).unwrap();
        assert_eq!(pt, msg);
    }
}
