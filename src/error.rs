use thiserror::Error;

/// Error taxonomy for the decoder. Framing and record-parse errors are
/// usually recovered locally by the caller (partial results plus a flag);
/// crypto errors are all-or-nothing and must be surfaced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("invalid hex string")]
    InvalidHex,

    #[error("frame shorter than the minimum for any recognised form")]
    ShortFrame,

    #[error("framing error: {0}")]
    FramingError(String),

    #[error("DIB/VIB chain or value overruns payload end")]
    TruncatedRecord,

    #[error("manufacturer code outside the 5-bit range")]
    InvalidManufacturer,

    #[error("BCD nibble greater than 9")]
    InvalidBcdNibble,

    #[error("date/time field outside calendar range")]
    InvalidDateTime,

    #[error("encrypted frame has no key in the store")]
    MissingKey,

    #[error("decryption failed: {0}")]
    DecryptError(String),

    #[error("CMAC verification failed")]
    MacVerifyFailed,

    #[error("unsupported VIF: 0x{0:02x}")]
    UnsupportedVif(u8),
}
