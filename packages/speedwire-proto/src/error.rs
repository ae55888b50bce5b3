use thiserror::Error;

/// Decode failure of a Speedwire frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// Buffer ends before the structure it should contain.
    #[error("frame too short: {len} bytes, need {need}")]
    TooShort { len: usize, need: usize },

    /// Envelope does not start with the `"SMA\0"` magic.
    #[error("invalid envelope header: {found}")]
    InvalidMagic { found: String },

    /// DeviceData word-length prefix disagrees with the frame size.
    #[error("declared length {declared} does not match frame size {actual}")]
    SizeMismatch { declared: usize, actual: usize },
}

pub(crate) fn check_len(data: &[u8], need: usize) -> Result<(), ProtoError> {
    if data.len() < need {
        return Err(ProtoError::TooShort {
            len: data.len(),
            need,
        });
    }
    Ok(())
}
