//! Parses a RIFF/WAVE (PCM or ATRAC3/LP2) file into a [`Track`]: a CBC-DES
//! encrypted packet sequence plus the KEK-wrapped per-track key the device
//! needs to decrypt it.

use std::convert::TryInto;
use std::fs;
use std::path::Path;

use rand::RngCore;

use crate::codec::{des_cbc_encrypt, read_u16_le, read_u32_le};
use crate::error::{NetMdError, Result};
use crate::secure::EkbState;

const CHUNK_SIZE: usize = 0x8_0000;
const FIRST_CHUNK_RESERVE: usize = 24;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum WireFormat {
    Pcm = 0x00,
    Lp2 = 0x94,
    Lp4 = 0xa8,
}

impl WireFormat {
    pub fn frame_size(self) -> usize {
        match self {
            WireFormat::Pcm => 2048,
            WireFormat::Lp2 => 192,
            WireFormat::Lp4 => 96,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum DiscFormat {
    Lp4 = 0,
    Lp2 = 2,
    MonoSp = 4,
    StereoSp = 6,
}

/// One fixed-size, CBC-DES encrypted chunk of a track's audio payload. The
/// first packet carries `first = true`; the device expects the 24-byte
/// `[length][key][iv]` preamble prepended only to that one on the wire.
#[derive(Clone, Debug)]
pub struct Packet {
    pub first: bool,
    pub data: Vec<u8>,
}

/// A prepared-for-upload audio unit.
pub struct Track {
    pub title: String,
    pub wire_format: WireFormat,
    pub disc_format: DiscFormat,
    pub frames: u32,
    pub padding: u32,
    /// The per-track DES key, encrypted at rest under the session's KEK.
    pub key: Vec<u8>,
    pub packets: Vec<Packet>,
}

impl Track {
    pub fn total_bytes(&self) -> u32 {
        self.frames * self.wire_format.frame_size() as u32 + 24
    }

    /// Parses `path` as a RIFF/WAVE container, normalizes and pads its audio
    /// payload, and encrypts it into packets under a freshly generated
    /// track key (itself stored KEK-wrapped per `ekb.kek`).
    pub fn prepare(path: &Path, title: impl Into<String>, ekb: &EkbState) -> Result<Track> {
        let raw = fs::read(path).map_err(|_| NetMdError::BadContainer)?;
        let (wire_format, disc_format, mut audio) = parse_container(&raw)?;

        match wire_format {
            WireFormat::Pcm => byte_swap_pairs(&mut audio),
            WireFormat::Lp2 => {}
            WireFormat::Lp4 => return Err(NetMdError::UnsupportedFormat.into()),
        }

        let frame_size = wire_format.frame_size();
        let padding = if audio.len() % frame_size != 0 {
            let pad = frame_size - (audio.len() % frame_size);
            audio.extend(std::iter::repeat(0u8).take(pad));
            pad
        } else {
            0
        };
        let frames = (audio.len() / frame_size) as u32;

        let mut track_key = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut track_key);
        let encrypted_key = crate::codec::des_ecb_encrypt(&track_key, &ekb.kek)?;

        let packets = packetize(&audio, &track_key, &ekb.iv)?;

        Ok(Track {
            title: title.into(),
            wire_format,
            disc_format,
            frames,
            padding: padding as u32,
            key: encrypted_key,
            packets,
        })
    }
}

fn packetize(audio: &[u8], track_key: &[u8; 8], initial_iv: &[u8; 8]) -> Result<Vec<Packet>> {
    let mut packets = Vec::new();
    let mut pos = 0usize;
    let mut iv = *initial_iv;

    while pos < audio.len() {
        let mut chunk_size = CHUNK_SIZE;
        if pos == 0 {
            chunk_size -= FIRST_CHUNK_RESERVE;
        }
        if audio.len() - pos < chunk_size {
            chunk_size = audio.len() - pos;
        }

        let plain = &audio[pos..pos + chunk_size];
        let cipher = des_cbc_encrypt(plain, track_key, &iv)?;

        if cipher.len() >= 8 {
            iv.copy_from_slice(&cipher[cipher.len() - 8..]);
        }

        packets.push(Packet { first: pos == 0, data: cipher });
        pos += chunk_size;
    }

    Ok(packets)
}

fn byte_swap_pairs(data: &mut [u8]) {
    let mut i = 0;
    while i + 1 < data.len() {
        data.swap(i, i + 1);
        i += 2;
    }
}

/// Parses the RIFF/WAVE header, dispatches on format, and returns the raw
/// (not yet normalized) audio payload along with the wire/disc format pair.
fn parse_container(raw: &[u8]) -> Result<(WireFormat, DiscFormat, Vec<u8>)> {
    if raw.len() < 36 || &raw[0..4] != b"RIFF" {
        return Err(NetMdError::BadContainer.into());
    }

    let format_tag = read_u16_le(&raw[20..22]);
    let channels = read_u16_le(&raw[22..24]);
    let sample_rate = read_u32_le(&raw[24..28]);
    let bits_per_sample = read_u16_le(&raw[34..36]);

    let (wire_format, disc_format) = match format_tag {
        1 => {
            if sample_rate != 44100 || bits_per_sample != 16 {
                return Err(NetMdError::UnsupportedPcm.into());
            }
            let disc_format = if channels == 1 { DiscFormat::MonoSp } else { DiscFormat::StereoSp };
            (WireFormat::Pcm, disc_format)
        }
        624 => {
            let block_size = read_u16_le(&raw[32..34]);
            if block_size != 384 {
                return Err(NetMdError::UnsupportedAtrac.into());
            }
            (WireFormat::Lp2, DiscFormat::Lp2)
        }
        _ => return Err(NetMdError::UnsupportedFormat.into()),
    };

    let data_offset = find_marker(raw, b"data").ok_or(NetMdError::CorruptContainer)?;
    let mut audio = raw[data_offset + 8..].to_vec();

    if let Some(list_offset) = find_marker(&audio, b"LIST") {
        if list_offset > 0 {
            audio.truncate(list_offset - 1);
        } else {
            audio.clear();
        }
    }

    Ok((wire_format, disc_format, audio))
}

fn find_marker(haystack: &[u8], marker: &[u8; 4]) -> Option<usize> {
    if haystack.len() < marker.len() {
        return None;
    }
    (0..=haystack.len() - marker.len()).find(|&i| &haystack[i..i + 4] == marker)
}
