//! Orchestrates a complete track upload: secure session setup, key
//! exchange, bulk streaming, and TOC commit, reporting progress through a
//! bounded channel so a caller (the CLI, or any embedder) never blocks the
//! transfer waiting on a slow UI.

use std::path::Path;
use std::sync::mpsc::SyncSender;

use log::info;

use crate::commands;
use crate::error::Result;
use crate::secure::{self, EkbState};
use crate::track::Track;
use crate::usb::RawTransport;

/// A progress notification emitted during [`send_track`].
#[derive(Clone, Debug)]
pub enum TransferEvent {
    /// Secure session negotiation has started.
    Setup,
    /// `transferred` bytes of the bulk stream have gone out so far.
    Send { transferred: u64 },
    /// Waiting on the device to finish ingesting the stream.
    Poll,
    /// The device has assigned the uploaded track this number.
    Track { track_number: u16 },
}

fn notify(sink: Option<&SyncSender<TransferEvent>>, event: TransferEvent) {
    let sink = match sink {
        Some(sink) => sink,
        None => return,
    };
    match event {
        TransferEvent::Send { .. } | TransferEvent::Poll => {
            let _ = sink.try_send(event);
        }
        _ => {
            let _ = sink.send(event);
        }
    }
}

/// Encodes `path` and uploads it to the device, renaming it to `title` and
/// returning the track number the device assigned. `progress`, if given, is
/// fed [`TransferEvent`]s as the transfer proceeds; a full channel drops
/// high-frequency `Send`/`Poll` events rather than stalling the upload.
pub fn send_track<T: RawTransport + ?Sized>(
    transport: &mut T,
    path: &Path,
    title: &str,
    progress: Option<&SyncSender<TransferEvent>>,
) -> Result<u16> {
    notify(progress, TransferEvent::Setup);

    let mut ekb = EkbState::new();
    let track = Track::prepare(path, title, &ekb)?;

    let _ = secure::acquire(transport);
    let _ = secure::forget_secure_key(transport);
    let _ = secure::track_protection(transport, 1);

    secure::enter_secure_session(transport)?;
    secure::send_key_data(transport, &ekb)?;

    secure::session_key_exchange(transport, &mut ekb)?;
    let session_key = ekb.derive_session_key()?;
    secure::kek_exchange(transport, &ekb, &session_key)?;

    secure::init_secure_send(
        transport,
        track.wire_format as u8,
        track.disc_format as u8,
        track.frames,
        track.total_bytes(),
    )?;

    let mut transferred: u64 = 0;
    for packet in &track.packets {
        if packet.first {
            let audio_len = track.frames as u64 * track.wire_format.frame_size() as u64;
            let mut preamble = Vec::with_capacity(24 + packet.data.len());
            preamble.extend_from_slice(&audio_len.to_be_bytes());
            preamble.extend_from_slice(&ekb.decrypt_track_key(&track.key)?);
            preamble.extend_from_slice(&ekb.iv);
            preamble.extend_from_slice(&packet.data);
            transport.bulk_write(&preamble)?;
            transferred += preamble.len() as u64;
        } else {
            transport.bulk_write(&packet.data)?;
            transferred += packet.data.len() as u64;
        }
        notify(progress, TransferEvent::Send { transferred });
    }

    notify(progress, TransferEvent::Poll);
    let reply = secure::finish_secure_send(transport)?;
    let track_number = secure::track_number_from_reply(&reply)?;

    commands::cache_toc(transport)?;
    commands::set_track_title(transport, track_number, title, true)?;
    commands::sync_toc(transport)?;
    transport.wait_idle()?;
    secure::commit_track(transport, track_number, &session_key)?;

    secure::forget_secure_key(transport)?;
    secure::leave_secure_session(transport)?;
    secure::release(transport)?;

    info!("uploaded \"{}\" as track {}", title, track_number);
    notify(progress, TransferEvent::Track { track_number });
    Ok(track_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::mpsc::sync_channel;

    struct ScriptedTransport {
        responses: VecDeque<Vec<u8>>,
        pub bulk_writes: Vec<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Vec<u8>>) -> Self {
            Self { responses: responses.into(), bulk_writes: Vec::new() }
        }
    }

    impl RawTransport for ScriptedTransport {
        fn send_request(&mut self, _buf: &[u8]) -> Result<()> {
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
            self.bulk_writes.push(buf.to_vec());
            Ok(buf.len())
        }
        fn read_status_raw(&mut self) -> Result<[u8; 4]> {
            // This test doesn't exercise wait_idle's retry loop, only that
            // it's called in the right place; report idle immediately.
            Ok([0u8; 4])
        }
    }

    fn accepted(check: &[u8], rest_len: usize) -> Vec<u8> {
        let mut r = vec![0x09];
        r.extend_from_slice(check);
        r.extend(std::iter::repeat(0u8).take(rest_len));
        r
    }

    fn interim(check: &[u8], rest_len: usize) -> Vec<u8> {
        let mut r = vec![0x0f];
        r.extend_from_slice(check);
        r.extend(std::iter::repeat(0u8).take(rest_len));
        r
    }

    fn minimal_pcm_wav(samples: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&44100u32.to_le_bytes());
        buf.extend_from_slice(&176400u32.to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&(samples.len() as u32).to_le_bytes());
        buf.extend_from_slice(samples);
        buf
    }

    #[test]
    fn full_upload_happy_path_reports_track_number() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("netmd-send-test-{}.wav", std::process::id()));
        let samples: Vec<u8> = (0..2048u32).map(|i| i as u8).collect();
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(&minimal_pcm_wav(&samples)).unwrap();
        }

        fn secure_check(opcode: u8) -> [u8; 10] {
            [0x18, 0x00, 0x08, 0x00, 0x46, 0xf0, 0x03, 0x01, 0x03, opcode]
        }

        let responses = vec![
            accepted(&[0xff, 0x01], 0),                    // acquire (best-effort)
            accepted(&secure_check(0x21), 0),              // forget_secure_key (best-effort, start)
            accepted(&secure_check(0x2b), 0),              // track_protection (best-effort)
            accepted(&secure_check(0x80), 0),              // enter_secure_session
            accepted(&secure_check(0x12), 0),              // send_key_data
            accepted(&secure_check(0x20), 23),             // session_key_exchange
            accepted(&secure_check(0x22), 0),              // kek_exchange
            interim(&secure_check(0x28), 0),               // init_secure_send
            { let mut r = accepted(&secure_check(0x28), 0); r.extend(std::iter::repeat(0u8).take(19 - r.len())); r.push(0); r.push(7); r }, // finish_secure_send -> track 7
            accepted(&[0x18, 0x08, 0x10, 0x18, 0x02, 0x03], 0), // cache_toc
            accepted(&[0x18, 0x07, 0x02, 0x20, 0x18, 0x02], 0), // set_track_title (is_new: no lookup, no inner bracket)
            accepted(&[0x18, 0x08, 0x10, 0x18, 0x02, 0x00], 0), // sync_toc
            accepted(&secure_check(0x48), 0),              // commit_track
            accepted(&secure_check(0x21), 0),              // forget_secure_key (teardown)
            accepted(&secure_check(0x81), 0),              // leave_secure_session
            accepted(&[0xff, 0x01], 0),                    // release
        ];
        let mut transport = ScriptedTransport::new(responses);
        let (tx, rx) = sync_channel(8);

        let track_number = send_track(&mut transport, &path, "My Track", Some(&tx)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(track_number, 7);
        assert!(!transport.bulk_writes.is_empty());

        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(TransferEvent::Setup)));
        assert!(events.iter().any(|e| matches!(e, TransferEvent::Track { track_number: 7 })));
    }
}
