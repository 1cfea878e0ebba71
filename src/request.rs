//! Shapes a request, submits it, and demultiplexes the device's response
//! against an expected control status and opcode prefix.

use std::convert::TryFrom;
use std::thread::sleep;
use std::time::Duration;

use log::{debug, trace};
use num_enum::TryFromPrimitive;

use crate::error::{NetMdError, Result};
use crate::usb::RawTransport;

const MAX_TRIES: u32 = 300;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Control status byte a device response can carry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ControlStatus {
    Accepted = 0x09,
    Rejected = 0x0a,
    Interim = 0x0f,
    Stub = 0x08,
}

/// Submits `check_prefix ++ payload` as a command and waits for a reply whose
/// leading bytes match `check_prefix` and whose control status equals
/// `expected`. Stale responses (mismatched prefix) are discarded and waited
/// past, per the NetMD demultiplexing contract.
pub fn submit<T: RawTransport + ?Sized>(
    transport: &mut T,
    expected: ControlStatus,
    check_prefix: &[u8],
    payload: &[u8],
) -> Result<Vec<u8>> {
    // Best-effort flush of anything already queued from earlier traffic.
    let _ = transport.poll_status();

    let mut request = Vec::with_capacity(1 + check_prefix.len() + payload.len());
    request.push(0x00);
    request.extend_from_slice(check_prefix);
    request.extend_from_slice(payload);
    trace!("submit: sending {} bytes", request.len());
    transport.send_request(&request)?;

    for _ in 0..MAX_TRIES {
        let len = transport.poll_status()?;
        if len < 0 {
            sleep(POLL_INTERVAL);
            continue;
        }
        let buf = transport.read_response(len as usize)?;
        if buf.len() < 1 + check_prefix.len() {
            sleep(POLL_INTERVAL);
            continue;
        }
        if &buf[1..1 + check_prefix.len()] != check_prefix {
            trace!("submit: stale response discarded");
            sleep(POLL_INTERVAL);
            continue;
        }
        let status = match ControlStatus::try_from(buf[0]) {
            Ok(s) => s,
            Err(_) => {
                sleep(POLL_INTERVAL);
                continue;
            }
        };
        match status {
            ControlStatus::Accepted | ControlStatus::Interim => {
                if status == expected {
                    debug!("submit: matched {:?}", status);
                    return Ok(buf);
                }
                sleep(POLL_INTERVAL);
            }
            ControlStatus::Rejected => return Err(NetMdError::Rejected.into()),
            ControlStatus::Stub => return Ok(buf),
        }
    }
    Err(NetMdError::Timeout.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// A scripted in-memory transport for exercising the request engine
    /// without a real device attached.
    struct MockTransport {
        responses: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
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
            if self.responses.is_empty() {
                Ok(-1)
            } else {
                Ok(self.responses[0].len() as i32)
            }
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

    #[test]
    fn demultiplexes_stale_response() {
        // An unrelated response (different check prefix) arrives first,
        // followed by the real match.
        let mut transport = MockTransport::new(vec![
            vec![0x09, 0xaa, 0xbb, 0x01],
            vec![0x09, 0x18, 0x06, 0x42],
        ]);
        let reply = submit(&mut transport, ControlStatus::Accepted, &[0x18, 0x06], &[]).unwrap();
        assert_eq!(reply, vec![0x09, 0x18, 0x06, 0x42]);
    }

    #[test]
    fn rejected_does_not_retry() {
        let mut transport = MockTransport::new(vec![vec![0x0a, 0x18, 0x06]]);
        let err = submit(&mut transport, ControlStatus::Accepted, &[0x18, 0x06], &[]);
        assert!(err.is_err());
    }

    #[test]
    fn stub_returns_immediately() {
        let mut transport = MockTransport::new(vec![vec![0x08, 0x18, 0x06]]);
        let reply = submit(&mut transport, ControlStatus::Accepted, &[0x18, 0x06], &[]).unwrap();
        assert_eq!(reply[0], 0x08);
    }
}
