//! Every vendor command the device accepts outside of the secure
//! sub-protocol: disc/track metadata, capacity, erase, move.
//!
//! Each command shares the `[0x00][opcode-prefix][payload]` skeleton; the
//! opcode/offset table lives here, in one place, rather than scattered
//! across ad hoc byte-slicing at each call site (see DESIGN.md).

use crate::codec::{hex_digits_as_decimal, read_u16_be, u16_be};
use crate::error::{NetMdError, Result};
use crate::request::{submit, ControlStatus};
use crate::usb::RawTransport;

/// Disc capacity in recorded/total/available seconds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DiscCapacity {
    pub recorded: u64,
    pub total: u64,
    pub available: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RecordingParameters {
    pub encoding: u8,
    pub channels: u8,
}

pub fn request_status<T: RawTransport + ?Sized>(transport: &mut T) -> Result<bool> {
    let reply = submit(
        transport,
        ControlStatus::Accepted,
        &[0x18, 0x09, 0x80, 0x01, 0x02, 0x30],
        &[0x88, 0x00, 0x00, 0x30, 0x88, 0x04, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00],
    )?;
    if reply.len() <= 26 {
        return Err(NetMdError::ProtocolMismatch("RequestStatus reply too short".into()).into());
    }
    Ok(reply[26] == 0x40)
}

pub fn request_disc_capacity<T: RawTransport + ?Sized>(transport: &mut T) -> Result<DiscCapacity> {
    let reply = submit(
        transport,
        ControlStatus::Accepted,
        &[0x18, 0x06, 0x02, 0x10, 0x10, 0x00],
        &[0x30, 0x80, 0x03, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00],
    )?;
    if reply.len() < 45 {
        return Err(NetMdError::ProtocolMismatch("RequestDiscCapacity reply too short".into()).into());
    }
    Ok(DiscCapacity {
        recorded: hms_seconds(reply[29], reply[30], reply[31]),
        total: hms_seconds(reply[35], reply[36], reply[37]),
        available: hms_seconds(reply[42], reply[43], reply[44]),
    })
}

fn hms_seconds(h: u8, m: u8, s: u8) -> u64 {
    hex_digits_as_decimal(h) * 3600 + hex_digits_as_decimal(m) * 60 + hex_digits_as_decimal(s)
}

pub fn recording_parameters<T: RawTransport + ?Sized>(transport: &mut T) -> Result<RecordingParameters> {
    let reply = submit(
        transport,
        ControlStatus::Accepted,
        &[0x18, 0x09, 0x80, 0x01, 0x03, 0x30],
        &[0x88, 0x01, 0x00, 0x30, 0x88, 0x05, 0x00, 0x30, 0x88, 0x07, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00],
    )?;
    if reply.len() <= 35 {
        return Err(NetMdError::ProtocolMismatch("RecordingParameters reply too short".into()).into());
    }
    Ok(RecordingParameters { encoding: reply[34], channels: reply[35] })
}

pub fn request_disc_header<T: RawTransport + ?Sized>(transport: &mut T) -> Result<String> {
    let reply = submit(
        transport,
        ControlStatus::Accepted,
        &[0x18, 0x06, 0x02, 0x20, 0x18, 0x01],
        &[0x00, 0x00, 0x30, 0x00, 0x0a, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00],
    )?;
    title_from_reply(&reply)
}

fn title_from_reply(reply: &[u8]) -> Result<String> {
    if reply.len() <= 25 {
        return Ok(String::new());
    }
    Ok(String::from_utf8_lossy(&reply[25..]).into_owned())
}

pub fn set_disc_header<T: RawTransport + ?Sized>(transport: &mut T, title: &str) -> Result<()> {
    let old = request_disc_header(transport)?;
    let payload = set_title_payload(title, old.len());

    cache_toc(transport)?;
    submit(transport, ControlStatus::Accepted, &[0x18, 0x07, 0x02, 0x20, 0x18, 0x01], &payload)?;
    sync_toc(transport)?;
    Ok(())
}

fn set_title_payload(title: &str, old_len: usize) -> Vec<u8> {
    let mut payload = vec![0x00, 0x00, 0x30, 0x00, 0x0a, 0x00, 0x50, 0x00];
    payload.extend_from_slice(&u16_be(title.len() as u16));
    payload.extend_from_slice(&[0x00, 0x00]);
    payload.extend_from_slice(&u16_be(old_len as u16));
    payload.extend_from_slice(title.as_bytes());
    payload
}

pub fn request_track_count<T: RawTransport + ?Sized>(transport: &mut T) -> Result<u16> {
    let reply = submit(
        transport,
        ControlStatus::Accepted,
        &[0x18, 0x06, 0x02, 0x10, 0x10, 0x01],
        &[0x30, 0x00, 0x10, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00],
    )?;
    if reply.len() < 25 {
        return Err(NetMdError::ProtocolMismatch("RequestTrackCount reply too short".into()).into());
    }
    Ok(read_u16_be(&reply[23..25]))
}

pub fn request_track_title<T: RawTransport + ?Sized>(transport: &mut T, track: u16) -> Result<String> {
    let mut payload = vec![0x00];
    payload.push((track & 0xff) as u8);
    payload.extend_from_slice(&[0x30, 0x00, 0x0a, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00]);
    let reply = submit(transport, ControlStatus::Accepted, &[0x18, 0x06, 0x02, 0x20, 0x18, 0x02], &payload)?;
    title_from_reply(&reply)
}

/// Sets a track's title. When `is_new` is true (a freshly uploaded track),
/// the TOC cache/sync bracket is skipped since the device has not yet
/// published the track in its table of contents.
pub fn set_track_title<T: RawTransport + ?Sized>(transport: &mut T, track: u16, title: &str, is_new: bool) -> Result<()> {
    let old_len = if is_new { 0 } else { request_track_title(transport, track)?.len() };

    let mut full = vec![0x00, (track & 0xff) as u8];
    full.extend_from_slice(&[0x30, 0x00, 0x0a, 0x00, 0x50, 0x00]);
    full.extend_from_slice(&u16_be(title.len() as u16));
    full.extend_from_slice(&[0x00, 0x00]);
    full.extend_from_slice(&u16_be(old_len as u16));
    full.extend_from_slice(title.as_bytes());

    if !is_new {
        cache_toc(transport)?;
    }
    submit(transport, ControlStatus::Accepted, &[0x18, 0x07, 0x02, 0x20, 0x18, 0x02], &full)?;
    if !is_new {
        sync_toc(transport)?;
    }
    Ok(())
}

pub fn request_track_length<T: RawTransport + ?Sized>(transport: &mut T, track: u16) -> Result<u64> {
    let mut payload = u16_be(track).to_vec();
    payload.extend_from_slice(&[0x30, 0x00, 0x01, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00]);
    let reply = submit(transport, ControlStatus::Accepted, &[0x18, 0x06, 0x02, 0x20, 0x10, 0x01], &payload)?;
    if reply.len() < 30 {
        return Err(NetMdError::ProtocolMismatch("RequestTrackLength reply too short".into()).into());
    }
    Ok(hms_seconds(reply[27], reply[28], reply[29]))
}

pub fn request_track_encoding<T: RawTransport + ?Sized>(transport: &mut T, track: u16) -> Result<u8> {
    let mut payload = u16_be(track).to_vec();
    payload.extend_from_slice(&[0x30, 0x80, 0x07, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00]);
    let reply = submit(transport, ControlStatus::Accepted, &[0x18, 0x06, 0x02, 0x20, 0x10, 0x01], &payload)?;
    if reply.len() < 2 {
        return Err(NetMdError::ProtocolMismatch("RequestTrackEncoding reply too short".into()).into());
    }
    Ok(reply[reply.len() - 2])
}

pub fn erase_track<T: RawTransport + ?Sized>(transport: &mut T, track: u16) -> Result<()> {
    let mut payload = vec![0xff, 0x01, 0x00, 0x20, 0x10, 0x01];
    payload.extend_from_slice(&u16_be(track));
    submit(transport, ControlStatus::Accepted, &[0x18, 0x40], &payload)?;
    Ok(())
}

pub fn move_track<T: RawTransport + ?Sized>(transport: &mut T, from: u16, to: u16) -> Result<()> {
    let mut payload = vec![0xff, 0x00, 0x00, 0x20, 0x10, 0x01];
    payload.extend_from_slice(&u16_be(from));
    payload.extend_from_slice(&[0x20, 0x10, 0x01]);
    payload.extend_from_slice(&u16_be(to));
    submit(transport, ControlStatus::Accepted, &[0x18, 0x43], &payload)?;
    Ok(())
}

pub fn cache_toc<T: RawTransport + ?Sized>(transport: &mut T) -> Result<()> {
    crate::secure::cache_toc(transport)
}

pub fn sync_toc<T: RawTransport + ?Sized>(transport: &mut T) -> Result<()> {
    crate::secure::sync_toc(transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::RawTransport;
    use std::collections::VecDeque;

    struct MockTransport {
        responses: VecDeque<Vec<u8>>,
        pub sent: Vec<Vec<u8>>,
    }

    impl MockTransport {
        fn new(responses: Vec<Vec<u8>>) -> Self {
            Self { responses: responses.into(), sent: Vec::new() }
        }
    }

    impl RawTransport for MockTransport {
        fn send_request(&mut self, buf: &[u8]) -> Result<()> {
            self.sent.push(buf.to_vec());
            Ok(())
        }
        fn poll_status(&mut self) -> Result<i32> {
            Ok(if self.responses.is_empty() { -1 } else { self.responses[0].len() as i32 })
        }
        fn read_response(&mut self, n: usize) -> Result<Vec<u8>> {
            let buf = self.responses.pop_front().unwrap();
            assert_eq!(buf.len(), n);
            Ok(buf)
        }
        fn bulk_write(&mut self, buf: &[u8]) -> Result<usize> {
            Ok(buf.len())
        }
    }

    fn accepted_reply(check: &[u8], rest_len: usize) -> Vec<u8> {
        let mut r = vec![0x09];
        r.extend_from_slice(check);
        r.extend(std::iter::repeat(0u8).take(rest_len));
        r
    }

    #[test]
    fn disc_capacity_decoding() {
        let check = [0x18, 0x06, 0x02, 0x10, 0x10, 0x00];
        let mut reply = accepted_reply(&check, 45);
        reply[29] = 0x00;
        reply[30] = 0x05;
        reply[31] = 0x30;
        reply[35] = 0x01;
        reply[36] = 0x14;
        reply[37] = 0x00;
        reply[42] = 0x01;
        reply[43] = 0x08;
        reply[44] = 0x30;
        let mut transport = MockTransport::new(vec![reply]);
        let cap = request_disc_capacity(&mut transport).unwrap();
        assert_eq!(cap.recorded, 330);
        assert_eq!(cap.total, 4440);
        assert_eq!(cap.available, 4110);
    }

    #[test]
    fn disc_header_parses_title_with_groups() {
        let check = [0x18, 0x06, 0x02, 0x20, 0x18, 0x01];
        let title = "0;Demo//1-3;Rock//4-4;Jazz//";
        let mut reply = vec![0x09];
        reply.extend_from_slice(&check);
        reply.extend(std::iter::repeat(0u8).take(25 - reply.len()));
        reply.extend_from_slice(title.as_bytes());
        let mut transport = MockTransport::new(vec![reply]);
        let header = request_disc_header(&mut transport).unwrap();
        assert_eq!(header, title);

        let parsed = crate::group::DiscHeader::parse(&header);
        assert_eq!(parsed.title, "Demo");
        assert_eq!(parsed.search_group(1).unwrap().title, "Rock");
        assert_eq!(parsed.search_group(3).unwrap().title, "Jazz");
        assert!(parsed.search_group(4).is_none());
    }

    #[test]
    fn set_track_title_brackets_with_toc_cache_sync_when_not_new() {
        // RequestTrackTitle reply (old title lookup), then set_title reply,
        // then cache/sync replies.
        let title_check = [0x18, 0x06, 0x02, 0x20, 0x18, 0x02];
        let old_title_reply = {
            let mut r = vec![0x09];
            r.extend_from_slice(&title_check);
            r.extend(std::iter::repeat(0u8).take(25 - r.len()));
            r.extend_from_slice(b"Old");
            r
        };
        let cache_reply = accepted_reply(&[0x18, 0x08, 0x10, 0x18, 0x02, 0x03], 0);
        let set_check = [0x18, 0x07, 0x02, 0x20, 0x18, 0x02];
        let set_reply = accepted_reply(&set_check, 0);
        let sync_reply = accepted_reply(&[0x18, 0x08, 0x10, 0x18, 0x02, 0x00], 0);

        let mut transport = MockTransport::new(vec![old_title_reply, cache_reply, set_reply, sync_reply]);
        set_track_title(&mut transport, 2, "New Title", false).unwrap();

        let sent_checks: Vec<Vec<u8>> = transport
            .sent
            .iter()
            .map(|buf| buf[1..].to_vec())
            .collect();
        assert_eq!(sent_checks.len(), 4); // lookup + cache + set + sync
    }

    #[test]
    fn rejected_reply_bubbles_up() {
        let mut transport = MockTransport::new(vec![vec![0x0a, 0x18, 0x09]]);
        let err = request_status(&mut transport);
        assert!(err.is_err());
    }
}
