//! Telegram façade: ties frame, record, and security decoding together
//! into a single entry point for callers (§4.5).

use crate::codec;
use crate::error::DecodeError;
use crate::frame::{parse_header, WIRELESS_PAYLOAD_OFFSET};
use crate::record::{parse_records, DataRecord};
use crate::security::{decrypt_cbc, KeyStore};
use crate::types::Header;
use log::{debug, info};

/// CI codes whose TPL header is the short form: access number (1 byte),
/// status (1 byte), configuration field (2 bytes) — 4 bytes total before
/// the DIB/VIB stream starts. EN 13757-3 Annex D.2.
const TPL_SHORT_HEADER_CI: [u8; 10] = [0x67, 0x6E, 0x74, 0x7A, 0x7D, 0x7F, 0x88, 0x9E, 0xC1, 0xC4];

/// CI codes whose TPL header is the long form: the short header's 4 bytes
/// plus the meter's own identification (4 bytes), manufacturer (2 bytes),
/// version (1 byte) and device type (1 byte) — used when the sending
/// gateway's address differs from the meter's own, per EN 13757-3 Annex
/// D.2. 12 bytes total before the DIB/VIB stream starts.
const TPL_LONG_HEADER_CI: [u8; 9] = [0x68, 0x6F, 0x72, 0x75, 0x7C, 0x7E, 0x9F, 0xC2, 0xC5];

const TPL_SHORT_HEADER_LEN: usize = 4;
const TPL_LONG_HEADER_LEN: usize = 12;

/// A decoded telegram: header plus the (possibly still-encrypted) payload
/// that follows it. Records are parsed lazily and memoised on first
/// access, since not every caller needs them (§4.5).
#[derive(Debug, Clone)]
pub struct Telegram {
    pub header: Header,
    payload: Vec<u8>,
    records: Option<Vec<DataRecord>>,
}

impl Telegram {
    /// Parse the link-layer header out of `raw` and keep the remaining
    /// bytes as payload. Does not decrypt and does not parse records.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, DecodeError> {
        let header = parse_header(raw)?;
        let mut payload_start = match header.frame_type {
            crate::types::FrameType::SingleChar => raw.len(),
            crate::types::FrameType::Short => raw.len(),
            crate::types::FrameType::Long => (4 + 2).min(raw.len()),
            crate::types::FrameType::WirelessApl => (WIRELESS_PAYLOAD_OFFSET + 1).min(raw.len()),
        };
        // The CI field selects a transport-layer header shape that sits
        // between the link-layer header and the DIB/VIB stream; skip it
        // by its table rather than assuming any single CI value.
        if let Some(ci) = header.ci_field {
            if TPL_SHORT_HEADER_CI.contains(&ci) {
                payload_start = (payload_start + TPL_SHORT_HEADER_LEN).min(raw.len());
            } else if TPL_LONG_HEADER_CI.contains(&ci) {
                payload_start = (payload_start + TPL_LONG_HEADER_LEN).min(raw.len());
            }
        }
        let payload = raw.get(payload_start..).unwrap_or_default().to_vec();
        debug!(
            "telegram from {:?} frame, {} payload byte(s), encrypted={}",
            header.frame_type,
            payload.len(),
            header.encrypted
        );
        Ok(Telegram { header, payload, records: None })
    }

    /// Convenience entry point accepting a hex string (whitespace
    /// tolerated), mirroring the common "paste a captured telegram"
    /// workflow (§6).
    pub fn from_hex(text: &str) -> Result<Self, DecodeError> {
        let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let raw = hex::decode(&cleaned).map_err(|_| DecodeError::InvalidHex)?;
        Self::from_bytes(&raw)
    }

    pub fn is_encrypted(&self) -> bool {
        self.header.encrypted
    }

    /// Decrypt the payload in place with the given key/iv. Clears any
    /// memoised records so a subsequent `records()` call re-parses the
    /// plaintext. All-or-nothing: on failure the telegram is left
    /// untouched (§7).
    pub fn decrypt(&mut self, key: &[u8; 16], iv: &[u8; 16]) -> Result<(), DecodeError> {
        let plain = decrypt_cbc(&self.payload, key, iv)?;
        self.payload = plain;
        self.header.encrypted = false;
        self.records = None;
        info!("telegram for {} decrypted", self.header.identification);
        Ok(())
    }

    /// Look the meter's key up in `store`, synthesise the IV from the
    /// header, and decrypt — the façade-level counterpart of
    /// [`Telegram::decrypt`] that matches §4.5's `decrypt(key)` contract:
    /// a no-op if the frame was never marked encrypted, `MissingKey` if
    /// the store has nothing for this identification.
    pub fn decrypt_with_store(&mut self, store: &KeyStore) -> Result<(), DecodeError> {
        match store.decrypt_payload(&self.header, &self.payload)? {
            None => Ok(()),
            Some(plain) => {
                self.payload = plain;
                self.header.encrypted = false;
                self.records = None;
                info!("telegram for {} decrypted via key store", self.header.identification);
                Ok(())
            }
        }
    }

    /// Strip periodic block CRCs from the payload before record parsing,
    /// for raw captures that still carry them (§4.1).
    pub fn strip_block_crc(&mut self) -> Result<(), DecodeError> {
        self.payload = codec::strip_block_crc(&self.payload)?;
        self.records = None;
        Ok(())
    }

    /// Parsed data records, computed once and cached. Returns an error
    /// if the payload is still encrypted.
    pub fn records(&mut self) -> Result<&[DataRecord], DecodeError> {
        if self.header.encrypted {
            return Err(DecodeError::MissingKey);
        }
        if self.records.is_none() {
            self.records = Some(parse_records(&self.payload));
        }
        Ok(self.records.as_deref().unwrap())
    }

    pub fn raw_payload(&self) -> &[u8] {
        &self.payload
    }

    /// Summarise the telegram for discovery/analysis tooling (§4.5,
    /// §6 "Analysis report"). Pure and infallible: an encrypted or
    /// otherwise unparseable payload is reflected in `error`/`records`
    /// rather than propagated as a `Result`.
    pub fn analyze(&mut self) -> AnalysisReport {
        let header = self.header.clone();
        let (mfct, id, version, device_type_code, type_name, ci_field) =
            if header.frame_type == crate::types::FrameType::WirelessApl {
                (
                    Some(header.manufacturer.clone()),
                    Some(header.identification.clone()),
                    Some(header.version),
                    Some(header.device_type.code()),
                    Some(header.device_type.name().to_string()),
                    header.ci_field,
                )
            } else {
                (None, None, None, None, None, header.ci_field)
            };

        let suggested_drivers = vec![crate::driver::suggest_driver(&header.manufacturer, &header.device_type).to_string()];

        let (records, error) = match self.records() {
            Ok(records) => (records.iter().map(RecordSummary::of).collect(), None),
            Err(err) => (Vec::new(), Some(err.to_string())),
        };

        AnalysisReport {
            valid: true,
            length: self.payload.len(),
            mfct,
            id,
            version,
            device_type_code,
            type_name,
            ci_field,
            encrypted: header.encrypted,
            records,
            suggested_drivers,
            error,
        }
    }
}

/// One record's summary, as surfaced in an [`AnalysisReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSummary {
    pub description: String,
    pub unit: String,
    pub storage: u32,
    pub tariff: u16,
}

impl RecordSummary {
    fn of(record: &DataRecord) -> Self {
        Self {
            description: record.description.clone(),
            unit: record.unit.clone(),
            storage: record.storage,
            tariff: record.tariff,
        }
    }
}

/// Pure, never-throwing summary of a telegram, for discovery/analysis
/// tooling outside the core (§6 "Analysis report").
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub valid: bool,
    pub length: usize,
    pub mfct: Option<String>,
    pub id: Option<String>,
    pub version: Option<u8>,
    pub device_type_code: Option<u8>,
    pub type_name: Option<String>,
    pub ci_field: Option<u8>,
    pub encrypted: bool,
    pub records: Vec<RecordSummary>,
    pub suggested_drivers: Vec<String>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unencrypted_kamstrup_telegram_yields_records() {
        let hex = "374493444836351218067ac70000200c13911900004c1391170000426cbf2c\
cc081391170000c2086cbf2c02bb560000326cffff046d1e02de21fed0";
        let mut telegram = Telegram::from_hex(hex).unwrap();
        assert!(!telegram.is_encrypted());
        let records = telegram.records().unwrap();
        assert!(!records.is_empty());
    }

    #[test]
    fn records_before_decrypt_is_an_error() {
        let mut telegram = Telegram::from_bytes(&[0xE5]).unwrap();
        telegram.header.encrypted = true;
        assert!(telegram.records().is_err());
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(Telegram::from_hex("not hex at all").is_err());
    }

    #[test]
    fn short_header_ci_table_covers_more_than_0x7a() {
        // Same Kamstrup capture with its CI byte swapped from 0x7A to 0x74
        // (another short-header CI, Annex D.2): the 4-byte access/status/
        // config skip must still apply and yield the same first record.
        let mut raw = hex::decode(
            "374493444836351218067ac70000200c13911900004c1391170000426cbf2c\
cc081391170000c2086cbf2c02bb560000326cffff046d1e02de21fed0",
        )
        .unwrap();
        raw[10] = 0x74;
        let mut telegram = Telegram::from_bytes(&raw).unwrap();
        let records = telegram.records().unwrap();
        assert_eq!(records[0].description, "Volume");
    }

    #[test]
    fn long_header_ci_skips_twelve_bytes() {
        // CI 0x72 (long TPL header): access no, status, config field, then
        // the meter's own identification/manufacturer/version/device type
        // (8 more bytes) before the DIB/VIB stream.
        let mut raw = vec![0u8; WIRELESS_PAYLOAD_OFFSET + 1 + TPL_LONG_HEADER_LEN];
        raw[0] = 0x44; // high nibble 0x4 marks a wireless-APL frame
        raw[1] = 0x44;
        raw[10] = 0x72;
        raw.extend_from_slice(&[0x0Cu8, 0x13, 0x91, 0x19, 0x00, 0x00]); // DIF/VIF/value after the long header
        let mut telegram = Telegram::from_bytes(&raw).unwrap();
        let records = telegram.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].description, "Volume");
    }

    #[test]
    fn analyze_reports_header_fields_and_suggested_driver() {
        let hex = "374493444836351218067ac70000200c13911900004c1391170000426cbf2c\
cc081391170000c2086cbf2c02bb560000326cffff046d1e02de21fed0";
        let mut telegram = Telegram::from_hex(hex).unwrap();
        let report = telegram.analyze();
        assert!(report.valid);
        assert_eq!(report.mfct.as_deref(), Some("KAM"));
        assert_eq!(report.id.as_deref(), Some("12353648"));
        assert!(!report.encrypted);
        assert!(report.error.is_none());
        assert!(!report.records.is_empty());
        assert_eq!(report.suggested_drivers, vec!["multical21".to_string()]);
    }

    #[test]
    fn analyze_on_encrypted_telegram_reports_error_not_panic() {
        let mut telegram = Telegram::from_bytes(&[0x00, 0x44, 0x2D, 0x2C, 0x04, 0x03, 0x02, 0x01, 0x05, 0x07]).unwrap();
        assert!(telegram.is_encrypted());
        let report = telegram.analyze();
        assert!(report.valid);
        assert!(report.encrypted);
        assert!(report.error.is_some());
        assert!(report.records.is_empty());
    }

    #[test]
    fn decrypt_with_store_is_noop_when_not_encrypted() {
        let hex = "374493444836351218067ac70000200c13911900004c1391170000426cbf2c\
cc081391170000c2086cbf2c02bb560000326cffff046d1e02de21fed0";
        let mut telegram = Telegram::from_hex(hex).unwrap();
        let store = KeyStore::new();
        assert!(telegram.decrypt_with_store(&store).is_ok());
    }

    #[test]
    fn decrypt_with_store_reports_missing_key() {
        let mut telegram = Telegram::from_bytes(&[0x00, 0x44, 0x2D, 0x2C, 0x04, 0x03, 0x02, 0x01, 0x05, 0x07]).unwrap();
        let store = KeyStore::new();
        assert!(matches!(telegram.decrypt_with_store(&store), Err(DecodeError::MissingKey)));
    }
}
