//! EKB (Electronic Key Block) material, nonce/session-key/KEK exchange, and
//! the secure sub-protocol commands themselves.
//!
//! The cryptographic state used to live as mutable fields on the device
//! handle in the source this crate is modeled on; here it is an explicit
//! [`EkbState`] value owned by the send orchestrator for the duration of one
//! upload, so two uploads to distinct devices can never share state by
//! accident (see DESIGN.md, "global mutable crypto state").

use rand::RngCore;

use crate::codec::{des_cbc_decrypt, des_cbc_encrypt, des_ecb_decrypt, des_ecb_encrypt, read_u16_be, u16_be, u32_be};
use crate::error::{NetMdError, Result};
use crate::request::{submit, ControlStatus};
use crate::usb::RawTransport;

const SECURE_PREFIX: [u8; 10] = [0x18, 0x00, 0x08, 0x00, 0x46, 0xf0, 0x03, 0x01, 0x03, 0x00];

fn secure_prefix(opcode: u8) -> [u8; 10] {
    let mut p = SECURE_PREFIX;
    p[9] = opcode;
    p
}

/// Baked-in host key material plus the per-session values negotiated with
/// the device during an upload.
#[derive(Clone)]
pub struct EkbState {
    pub root_key: [u8; 16],
    pub hash_key: [u8; 8],
    /// 2 encrypted 16-byte chain records (32 bytes total).
    pub chain: [u8; 32],
    pub signature: [u8; 24],
    pub depth: u8,
    pub ekb_id: u32,
    pub content_id: [u8; 20],
    pub kek: [u8; 8],
    pub iv: [u8; 8],
    pub host_nonce: [u8; 8],
    pub device_nonce: Option<[u8; 8]>,
}

impl EkbState {
    /// Builds the fixed host EKB material with freshly drawn, CSPRNG-backed
    /// host nonce and KEK. This is the production constructor: it never
    /// takes caller-supplied randomness.
    pub fn new() -> Self {
        let mut state = Self::with_nonce([0u8; 8]);
        rand::rngs::OsRng.fill_bytes(&mut state.host_nonce);
        rand::rngs::OsRng.fill_bytes(&mut state.kek);
        state
    }

    /// Test/debug seam: builds the host EKB material with a caller-supplied
    /// host nonce instead of drawing one from the CSPRNG, so derivation
    /// fixtures are reproducible.
    pub fn with_nonce(host_nonce: [u8; 8]) -> Self {
        EkbState {
            root_key: FIXED_ROOT_KEY,
            hash_key: FIXED_HASH_KEY,
            chain: FIXED_CHAIN,
            signature: FIXED_SIGNATURE,
            depth: 9,
            ekb_id: 0x0001_0012,
            content_id: FIXED_CONTENT_ID,
            kek: [0u8; 8],
            iv: [0u8; 8],
            host_nonce,
            device_nonce: None,
        }
    }

    /// Generates a fresh 8-byte track key and returns it KEK-encrypted, the
    /// form stored at rest on the `Track` record (see track.rs).
    pub fn create_track_key(&self) -> Result<Vec<u8>> {
        let mut plain = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut plain);
        des_ecb_encrypt(&plain, &self.kek)
    }

    /// Recovers a track's plaintext DES key from its KEK-encrypted form.
    pub fn decrypt_track_key(&self, encrypted: &[u8]) -> Result<Vec<u8>> {
        des_ecb_decrypt(encrypted, &self.kek)
    }

    /// Derives the 8-byte session key ("retail MAC") from the EKB chain and
    /// the host/device nonce pair. Requires `device_nonce` to have been
    /// filled in by [`session_key_exchange`].
    pub fn derive_session_key(&self) -> Result<[u8; 8]> {
        let device_nonce = self
            .device_nonce
            .ok_or_else(|| NetMdError::Crypto("device nonce not yet exchanged".into()))?;

        let mut key16 = self.root_key;
        let mut chain_key = [0u8; 8];
        for record in self.chain.chunks(16) {
            let lo = &record[0..8];
            let hi = &record[8..16];
            let decrypted_hi = ede2_decrypt_block(hi, &key16)?;
            for i in 0..8 {
                chain_key[i] = decrypted_hi[i] ^ lo[i];
            }
            key16[0..8].copy_from_slice(&chain_key);
            key16[8..16].copy_from_slice(&self.hash_key);
        }

        let mut message = [0u8; 16];
        message[0..8].copy_from_slice(&self.host_nonce);
        message[8..16].copy_from_slice(&device_nonce);
        retail_mac(&chain_key, &self.hash_key, &message)
    }
}

/// Two-key (EDE2) DES decrypt of a single 8-byte block: `D(K1, E(K2, D(K1, data)))`.
fn ede2_decrypt_block(data: &[u8], key16: &[u8; 16]) -> Result<[u8; 8]> {
    let k1 = &key16[0..8];
    let k2 = &key16[8..16];
    let step1 = des_ecb_decrypt(data, k1)?;
    let step2 = des_ecb_encrypt(&step1, k2)?;
    let step3 = des_ecb_decrypt(&step2, k1)?;
    let mut out = [0u8; 8];
    out.copy_from_slice(&step3);
    Ok(out)
}

/// ANSI X9.19 / ISO 9797-1 Algorithm 3 retail MAC: single-DES CBC-MAC under
/// `k1` over all 8-byte blocks, then a final decrypt-under-`k2`/encrypt-under-`k1`
/// step on the chaining value.
fn retail_mac(k1: &[u8; 8], k2: &[u8; 8], data: &[u8]) -> Result<[u8; 8]> {
    let mut chaining = [0u8; 8];
    for block in data.chunks(8) {
        let mut b = [0u8; 8];
        b[..block.len()].copy_from_slice(block);
        for i in 0..8 {
            b[i] ^= chaining[i];
        }
        let encrypted = des_ecb_encrypt(&b, k1)?;
        chaining.copy_from_slice(&encrypted);
    }
    let step = des_ecb_decrypt(&chaining, k2)?;
    let result = des_ecb_encrypt(&step, k1)?;
    let mut out = [0u8; 8];
    out.copy_from_slice(&result);
    Ok(out)
}

fn send_secure<T: RawTransport + ?Sized>(
    transport: &mut T,
    opcode: u8,
    expected: ControlStatus,
    payload: &[u8],
) -> Result<Vec<u8>> {
    submit(transport, expected, &secure_prefix(opcode), payload)
}

/// Drops any device-side session state. Tolerated to fail during
/// housekeeping.
pub fn forget_secure_key<T: RawTransport + ?Sized>(transport: &mut T) -> Result<()> {
    send_secure(transport, 0x21, ControlStatus::Accepted, &[0xff, 0x00, 0x00, 0x00])?;
    Ok(())
}

pub fn enter_secure_session<T: RawTransport + ?Sized>(transport: &mut T) -> Result<()> {
    send_secure(transport, 0x80, ControlStatus::Accepted, &[0xff])?;
    Ok(())
}

pub fn leave_secure_session<T: RawTransport + ?Sized>(transport: &mut T) -> Result<()> {
    send_secure(transport, 0x81, ControlStatus::Accepted, &[0xff])?;
    Ok(())
}

/// `flag` 0 = protect, 1 = permit copy. Fails on Sharp devices; callers
/// should ignore the error.
pub fn track_protection<T: RawTransport + ?Sized>(transport: &mut T, flag: u16) -> Result<()> {
    let mut payload = vec![0xff];
    payload.extend_from_slice(&u16_be(flag));
    send_secure(transport, 0x2b, ControlStatus::Accepted, &payload)?;
    Ok(())
}

pub fn send_key_data<T: RawTransport + ?Sized>(transport: &mut T, ekb: &EkbState) -> Result<()> {
    let size: u8 = 72;
    let chain_records = (ekb.chain.len() / 16) as u8;
    let mut payload = vec![0xff, 0x00, size, 0x00, 0x00, 0x00, size, 0x00, 0x00, 0x00, chain_records, 0x00, 0x00, 0x00, ekb.depth];
    payload.extend_from_slice(&u32_be(ekb.ekb_id));
    payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    payload.extend_from_slice(&ekb.chain);
    payload.extend_from_slice(&ekb.signature);
    send_secure(transport, 0x12, ControlStatus::Accepted, &payload)?;
    Ok(())
}

pub fn session_key_exchange<T: RawTransport + ?Sized>(transport: &mut T, ekb: &mut EkbState) -> Result<()> {
    let mut payload = vec![0xff, 0x00, 0x00, 0x00];
    payload.extend_from_slice(&ekb.host_nonce);
    let reply = send_secure(transport, 0x20, ControlStatus::Accepted, &payload)?;
    if reply.len() < 23 {
        return Err(NetMdError::ProtocolMismatch("session_key_exchange reply too short".into()).into());
    }
    let mut device_nonce = [0u8; 8];
    device_nonce.copy_from_slice(&reply[15..23]);
    ekb.device_nonce = Some(device_nonce);
    Ok(())
}

pub fn kek_exchange<T: RawTransport + ?Sized>(transport: &mut T, ekb: &EkbState, session_key: &[u8; 8]) -> Result<()> {
    let mut plain = vec![0x01, 0x01, 0x01, 0x01];
    plain.extend_from_slice(&ekb.content_id);
    plain.extend_from_slice(&ekb.kek);
    let encrypted = des_cbc_encrypt(&plain, session_key, &ekb.iv)?;

    let mut payload = vec![0xff, 0x00, 0x00];
    payload.extend_from_slice(&encrypted);
    send_secure(transport, 0x22, ControlStatus::Accepted, &payload)?;
    Ok(())
}

/// Arms the device for a bulk upload. The first reply is always Interim;
/// the final Accepted reply arrives only once the bulk stream completes
/// (see [`finish_secure_send`]).
pub fn init_secure_send<T: RawTransport + ?Sized>(
    transport: &mut T,
    wire_format: u8,
    disc_format: u8,
    frames: u32,
    total_bytes: u32,
) -> Result<()> {
    let mut payload = vec![0xff, 0x00, 0x01, 0x00, 0x10, 0x01, 0xff, 0xff, 0x00, wire_format, disc_format];
    payload.extend_from_slice(&u32_be(frames));
    payload.extend_from_slice(&u32_be(total_bytes));
    send_secure(transport, 0x28, ControlStatus::Interim, &payload)?;
    Ok(())
}

/// Long-polls for the final Accepted reply to `init_secure_send`'s opcode,
/// which only arrives once the device has consumed the whole bulk stream.
pub fn finish_secure_send<T: RawTransport + ?Sized>(transport: &mut T) -> Result<Vec<u8>> {
    send_secure(transport, 0x28, ControlStatus::Accepted, &[])
}

/// Reads the assigned track number out of `finish_secure_send`'s reply.
pub fn track_number_from_reply(reply: &[u8]) -> Result<u16> {
    if reply.len() < 19 {
        return Err(NetMdError::ProtocolMismatch("finish_secure_send reply too short".into()).into());
    }
    Ok(read_u16_be(&reply[17..19]))
}

pub fn commit_track<T: RawTransport + ?Sized>(transport: &mut T, track: u16, session_key: &[u8; 8]) -> Result<()> {
    let auth = des_ecb_encrypt(&[0u8; 8], session_key)?;
    let mut payload = vec![0xff, 0x00, 0x10, 0x01];
    payload.extend_from_slice(&u16_be(track));
    payload.extend_from_slice(&auth);
    send_secure(transport, 0x48, ControlStatus::Accepted, &payload)?;
    Ok(())
}

/// Part of the Sharp NetMD protocol; likely a no-op on Sony devices.
pub fn acquire<T: RawTransport + ?Sized>(transport: &mut T) -> Result<()> {
    submit(
        transport,
        ControlStatus::Accepted,
        &[0xff, 0x01],
        &[0x0c, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
    )?;
    Ok(())
}

pub fn release<T: RawTransport + ?Sized>(transport: &mut T) -> Result<()> {
    submit(
        transport,
        ControlStatus::Accepted,
        &[0xff, 0x01],
        &[0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
    )?;
    Ok(())
}

pub fn cache_toc<T: RawTransport + ?Sized>(transport: &mut T) -> Result<()> {
    submit(transport, ControlStatus::Accepted, &[0x18, 0x08, 0x10, 0x18, 0x02, 0x03], &[0x00])?;
    Ok(())
}

pub fn sync_toc<T: RawTransport + ?Sized>(transport: &mut T) -> Result<()> {
    submit(transport, ControlStatus::Accepted, &[0x18, 0x08, 0x10, 0x18, 0x02, 0x00], &[0x00])?;
    Ok(())
}

// Fixture host key material. These values are placeholders for the real
// production EKB (the manufacturer-issued chain is not public); swapping
// them for a real chain is a drop-in change confined to this block.
const FIXED_ROOT_KEY: [u8; 16] = [
    0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00,
];
const FIXED_HASH_KEY: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
const FIXED_CHAIN: [u8; 32] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10,
    0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f, 0x20,
];
const FIXED_SIGNATURE: [u8; 24] = [0; 24];
const FIXED_CONTENT_ID: [u8; 20] = [
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01,
];
