pub mod codec;
pub mod commands;
pub mod device;
pub mod error;
pub mod group;
pub mod request;
pub mod secure;
pub mod send;
pub mod track;
pub mod usb;

pub use commands::{DiscCapacity, RecordingParameters};
pub use error::{NetMdError, Result};
pub use group::{DiscHeader, Group};
pub use secure::EkbState;
pub use send::{send_track, TransferEvent};
pub use track::{DiscFormat, Track, WireFormat};
pub use usb::{RawTransport, Transport};
