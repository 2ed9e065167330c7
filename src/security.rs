//! Security layer: key storage, IV synthesis, AES-CBC payload decryption,
//! and master-key derivation (§4.4).

use aes::cipher::{
    block_padding::NoPadding, generic_array::GenericArray, BlockDecryptMut, BlockEncrypt, KeyInit, KeyIvInit,
};
use log::{debug, warn};
use std::collections::HashMap;

use crate::error::DecodeError;
use crate::types::Header;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// In-memory map from meter identification to its 16-byte key. Library
/// level only: reading keys from a file is a configuration-file concern
/// that stays outside the core (§1).
#[derive(Debug, Default, Clone)]
pub struct KeyStore {
    keys: HashMap<String, [u8; 16]>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self { keys: HashMap::new() }
    }

    /// Insert a key given as 32 hex characters (whitespace tolerated).
    pub fn insert_hex(&mut self, identification: &str, key_hex: &str) -> Result<(), DecodeError> {
        let cleaned: String = key_hex.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(&cleaned).map_err(|_| DecodeError::InvalidHex)?;
        if bytes.len() != 16 {
            return Err(DecodeError::InvalidHex);
        }
        let mut key = [0u8; 16];
        key.copy_from_slice(&bytes);
        self.keys.insert(identification.to_string(), key);
        Ok(())
    }

    pub fn insert(&mut self, identification: &str, key: [u8; 16]) {
        self.keys.insert(identification.to_string(), key);
    }

    pub fn get(&self, identification: &str) -> Option<&[u8; 16]> {
        self.keys.get(identification)
    }
}

/// Synthesise the OMS-aligned 16-byte initialisation vector: manufacturer
/// ASCII (3 bytes), little-endian identification (4 bytes), version,
/// device type, and a zero-filled remainder — the default, testable
/// contract (§4.4; Open Question 1 in DESIGN.md covers non-zero access
/// counters).
pub fn synthesize_iv(header: &Header) -> [u8; 16] {
    let mut iv = [0u8; 16];
    let mfct = header.manufacturer.as_bytes();
    iv[0] = mfct.first().copied().unwrap_or(0);
    iv[1] = mfct.get(1).copied().unwrap_or(0);
    iv[2] = mfct.get(2).copied().unwrap_or(0);

    // identification is stored big-endian hex; re-derive the little-endian
    // A-field bytes for the IV.
    if let Ok(bytes) = hex::decode(&header.identification) {
        if bytes.len() == 4 {
            iv[3] = bytes[3];
            iv[4] = bytes[2];
            iv[5] = bytes[1];
            iv[6] = bytes[0];
        }
    }
    iv[7] = header.version;
    iv[8] = header.device_type.code();
    iv
}

/// Same IV layout but with the access-counter tail repeated into bytes
/// 9..16, matching OMS security profiles that key the IV off the
/// transmission counter instead of zero-filling it. Callers must opt into
/// this explicitly (Open Question 1): the zero-fill variant above is the
/// default contract.
pub fn synthesize_iv_with_access_counter(header: &Header, access_no: u8) -> [u8; 16] {
    let mut iv = synthesize_iv(header);
    for slot in iv.iter_mut().skip(9) {
        *slot = access_no;
    }
    iv
}

/// Decrypt `ciphertext` with AES-128-CBC under `key`/`iv`, using
/// `NoPadding` throughout: OMS telegrams are not guaranteed to pad their
/// payload to a block boundary, so no padding scheme is assumed or
/// silently stripped. "Ciphertext isn't a block multiple" and "AES
/// itself failed" are reported as distinct cases rather than collapsed
/// into one (§9 Open Question 3).
pub fn decrypt_cbc(ciphertext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<Vec<u8>, DecodeError> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(DecodeError::DecryptError("ciphertext is not a multiple of the block size".into()));
    }
    let k = GenericArray::clone_from_slice(key);
    let i = GenericArray::clone_from_slice(iv);
    let decryptor = Aes128CbcDec::new(&k, &i);
    match decryptor.decrypt_padded_vec_mut::<NoPadding>(ciphertext) {
        Ok(plain) => Ok(plain),
        Err(_) => {
            warn!("AES-CBC decrypt failed under NoPadding");
            Err(DecodeError::DecryptError("AES block decrypt failed".into()))
        }
    }
}

impl KeyStore {
    /// Look up the key for `identification`, synthesise the IV from
    /// `header`, and decrypt. `Ok(None)` means the frame was not marked
    /// encrypted (no-op, per §4.5); `Err(MissingKey)` means the frame is
    /// encrypted but no key is on file.
    pub fn decrypt_payload(&self, header: &Header, ciphertext: &[u8]) -> Result<Option<Vec<u8>>, DecodeError> {
        if !header.encrypted {
            return Ok(None);
        }
        let key = self.get(&header.identification).ok_or(DecodeError::MissingKey)?;
        let iv = synthesize_iv(header);
        decrypt_cbc(ciphertext, key, &iv).map(Some)
    }
}

/// Derive a per-meter key from a master key: `AES-ECB(master,
/// cipher_field ∥ manufacturer_ascii ∥ identification_bytes)`, the
/// derivation block zero-padded to 16 bytes.
pub fn derive_key(master: &[u8; 16], cipher_field: u8, manufacturer: &str, identification: &str) -> Result<[u8; 16], DecodeError> {
    let mut derivation = vec![cipher_field];
    derivation.extend_from_slice(manufacturer.as_bytes());
    if let Ok(id_bytes) = hex::decode(identification) {
        derivation.extend_from_slice(&id_bytes);
    }
    derivation.resize(16, 0);

    let k = GenericArray::clone_from_slice(master);
    let mut block = GenericArray::clone_from_slice(&derivation);
    let cipher = aes::Aes128::new(&k);
    cipher.encrypt_block(&mut block);

    let mut out = [0u8; 16];
    out.copy_from_slice(&block);
    debug!("derived meter key for {manufacturer}/{identification}");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceType, FrameType};
    use aes::cipher::{generic_array::GenericArray as GA, BlockEncryptMut};

    fn header(manufacturer: &str, id: &str, version: u8, device_type: u8) -> Header {
        Header {
            frame_type: FrameType::WirelessApl,
            length: 0,
            control: 0x44,
            manufacturer: manufacturer.to_string(),
            identification: id.to_string(),
            version,
            device_type: DeviceType::from_code(device_type),
            ci_field: None,
            encrypted: true,
        }
    }

    #[test]
    fn iv_synthesis_zero_fills_remainder() {
        let h = header("XYZ", "01020304", 0x05, 0x07);
        let iv = synthesize_iv(&h);
        assert_eq!(&iv[0..3], b"XYZ");
        assert_eq!(&iv[3..7], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(iv[7], 0x05);
        assert_eq!(iv[8], 0x07);
        assert_eq!(&iv[9..16], &[0u8; 7]);
    }

    #[test]
    fn decrypt_round_trips_with_manual_encrypt() {
        let key = [0x42u8; 16];
        let iv = [0x11u8; 16];
        let plaintext = b"0123456789ABCDEF".to_vec(); // 16 bytes, one block

        type Enc = cbc::Encryptor<aes::Aes128>;
        let k = GA::clone_from_slice(&key);
        let i = GA::clone_from_slice(&iv);
        let mut block = GA::clone_from_slice(&plaintext);
        Enc::new(&k, &i).encrypt_block_mut(&mut block);
        let ciphertext = block.to_vec();

        let decrypted = decrypt_cbc(&ciphertext, &key, &iv).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn key_store_rejects_malformed_hex() {
        let mut store = KeyStore::new();
        assert!(store.insert_hex("01020304", "not-hex").is_err());
        assert!(store.insert_hex("01020304", "00112233445566778899AABBCCDDEE").is_err()); // 31 chars
    }
}
