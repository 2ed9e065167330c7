//! Frame recognition and link-layer header extraction (§4.3).

use crate::codec::{mbus_crc, unpack_manufacturer};
use crate::error::DecodeError;
use crate::types::{DeviceType, FrameType, Header};
use log::{debug, warn};

/// Offset at which the (possibly encrypted) payload starts in a
/// wireless-APL frame: `L C M M A A A A Version DeviceType`.
pub const WIRELESS_PAYLOAD_OFFSET: usize = 10;

/// Recognise the framing form and extract the link-layer header.
/// Returns `Ok(None)` is never produced: a frame that fails a structural
/// check is an error, per §4.3 ("the caller treats this as not a valid
/// telegram").
pub fn parse_header(raw: &[u8]) -> Result<Header, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::ShortFrame);
    }

    if raw.len() == 1 && raw[0] == 0xE5 {
        debug!("single-character ACK frame");
        return Ok(Header {
            frame_type: FrameType::SingleChar,
            length: 0,
            control: 0,
            manufacturer: String::new(),
            identification: String::new(),
            version: 0,
            device_type: DeviceType::Other,
            ci_field: None,
            encrypted: false,
        });
    }

    if raw[0] == 0x10 {
        return parse_short_frame(raw);
    }

    if raw[0] == 0x68 {
        return parse_long_frame(raw);
    }

    if raw.len() >= 2 && raw[1] & 0xF0 == 0x40 {
        return parse_wireless_apl(raw);
    }

    Err(DecodeError::FramingError(format!("unrecognised start byte 0x{:02x}", raw[0])))
}

fn parse_short_frame(raw: &[u8]) -> Result<Header, DecodeError> {
    if raw.len() < 5 {
        return Err(DecodeError::ShortFrame);
    }
    let (control, address, crc, stop) = (raw[1], raw[2], raw[3], raw[4]);
    if stop != 0x16 {
        return Err(DecodeError::FramingError("missing short-frame end byte".into()));
    }
    let computed = mbus_crc(&[control, address]);
    if computed != crc {
        return Err(DecodeError::FramingError("short-frame CRC mismatch".into()));
    }
    Ok(Header {
        frame_type: FrameType::Short,
        length: 5,
        control,
        manufacturer: String::new(),
        identification: format!("{:02x}", address),
        version: 0,
        device_type: DeviceType::Other,
        ci_field: None,
        encrypted: control & 0x05 != 0,
    })
}

fn parse_long_frame(raw: &[u8]) -> Result<Header, DecodeError> {
    if raw.len() < 6 {
        return Err(DecodeError::ShortFrame);
    }
    let len1 = raw[1];
    let len2 = raw[2];
    if len1 != len2 {
        return Err(DecodeError::FramingError("long-frame length mismatch".into()));
    }
    if raw[3] != 0x68 {
        return Err(DecodeError::FramingError("missing second long-frame start byte".into()));
    }
    let total = 6 + len1 as usize;
    if raw.len() < total {
        return Err(DecodeError::ShortFrame);
    }
    if raw[total - 1] != 0x16 {
        return Err(DecodeError::FramingError("missing long-frame end byte".into()));
    }
    let body = &raw[4..4 + len1 as usize - 1];
    let crc = raw[total - 2];
    if mbus_crc(body) != crc {
        return Err(DecodeError::FramingError("long-frame CRC mismatch".into()));
    }
    let control = body[0];
    let address = body[1];
    let ci_field = body.get(2).copied();
    Ok(Header {
        frame_type: FrameType::Long,
        length: len1,
        control,
        manufacturer: String::new(),
        identification: format!("{:02x}", address),
        version: 0,
        device_type: DeviceType::Other,
        ci_field,
        encrypted: control & 0x05 != 0,
    })
}

fn parse_wireless_apl(raw: &[u8]) -> Result<Header, DecodeError> {
    if raw.len() < WIRELESS_PAYLOAD_OFFSET {
        return Err(DecodeError::ShortFrame);
    }
    let length = raw[0];
    let control = raw[1];
    let m_field = u16::from_le_bytes([raw[2], raw[3]]);
    let manufacturer = unpack_manufacturer(m_field).unwrap_or_else(|_| {
        warn!("manufacturer code outside 5-bit range, using raw hex");
        format!("{:04X}", m_field)
    });
    // A-field bytes 4..8, little endian; identification is rendered big-endian hex.
    let identification = format!("{:02x}{:02x}{:02x}{:02x}", raw[7], raw[6], raw[5], raw[4]);
    let version = raw[8];
    let device_type = DeviceType::from_code(raw[9]);
    let ci_field = raw.get(WIRELESS_PAYLOAD_OFFSET).copied();

    Ok(Header {
        frame_type: FrameType::WirelessApl,
        length,
        control,
        manufacturer,
        identification,
        version,
        device_type,
        ci_field,
        encrypted: control & 0x05 != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_char_ack() {
        let header = parse_header(&[0xE5]).unwrap();
        assert_eq!(header.frame_type, FrameType::SingleChar);
    }

    #[test]
    fn short_frame_with_correct_crc() {
        let header = parse_header(&[0x10, 0x40, 0x05, 0x45, 0x16]).unwrap();
        assert_eq!(header.frame_type, FrameType::Short);
        assert_eq!(header.control, 0x40);
        assert_eq!(header.identification, "05");
    }

    #[test]
    fn nine_byte_frame_is_short_frame_error() {
        // High nibble 0x4 on the C field (byte 1) is recognised as a
        // wireless-APL frame, but 9 bytes is shorter than the 10-byte
        // minimum header (§4.3).
        let raw = [0x44u8; 9];
        let err = parse_header(&raw).unwrap_err();
        assert!(matches!(err, DecodeError::ShortFrame));
    }

    #[test]
    fn long_frame_length_mismatch() {
        let raw = [0x68u8, 0x03, 0x04, 0x68, 0x40, 0x05, 0x00, 0x00, 0x16];
        let err = parse_header(&raw).unwrap_err();
        assert!(matches!(err, DecodeError::FramingError(_)));
    }

    #[test]
    fn kamstrup_wireless_header() {
        // Worked scenario from the Multical 21 capture: a contiguous
        // wireless-APL frame with no interleaved block CRCs.
        let hex = "374493444836351218067ac70000200c13911900004c1391170000426cbf2c\
cc081391170000c2086cbf2c02bb560000326cffff046d1e02de21fed0";
        let raw = hex::decode(hex).unwrap();
        let header = parse_header(&raw).unwrap();
        assert_eq!(header.frame_type, FrameType::WirelessApl);
        // Identification renders the little-endian A-field as big-endian hex.
        assert_eq!(header.identification, "12353648");
        assert_eq!(header.version, 0x18);
        assert_eq!(header.device_type.code(), 0x06);
    }
}
