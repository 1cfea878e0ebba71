use failure_derive::Fail;

/// Errors produced by the NetMD driver.
#[derive(Fail, Debug)]
pub enum NetMdError {
    #[fail(display = "USB error: {}", _0)]
    UsbIo(#[cause] rusb::Error),

    #[fail(display = "No NetMD device found")]
    DeviceNotFound,

    #[fail(display = "Device returned Rejected for the last command")]
    Rejected,

    #[fail(display = "Timed out waiting for a matching device response")]
    Timeout,

    #[fail(display = "Device response did not match the expected shape: {}", _0)]
    ProtocolMismatch(String),

    #[fail(display = "Not a RIFF/WAVE container")]
    BadContainer,

    #[fail(display = "Unsupported PCM parameters (require 44100Hz/16-bit)")]
    UnsupportedPcm,

    #[fail(display = "Unsupported ATRAC3 block size")]
    UnsupportedAtrac,

    #[fail(display = "Unsupported wav format tag")]
    UnsupportedFormat,

    #[fail(display = "Corrupt or truncated RIFF container")]
    CorruptContainer,

    #[fail(display = "Cryptographic operation failed: {}", _0)]
    Crypto(String),
}

impl From<rusb::Error> for NetMdError {
    fn from(error: rusb::Error) -> Self {
        NetMdError::UsbIo(error)
    }
}

pub type Result<T> = std::result::Result<T, failure::Error>;
