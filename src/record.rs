//! DIB/VIB parser: walks the payload one DIF(+DIFE chain) and one
//! VIF(+VIFE chain) at a time, producing a typed, unit-bearing record.

use crate::codec::{decode_bcd, decode_date, decode_datetime, read_f32_le, read_int_le, DateTimeValue};
use crate::error::DecodeError;
use log::{debug, trace, warn};

/// Tagged union over the value a record can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    I64(i64),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(DateTimeValue),
    DateTime(DateTimeValue),
}

/// The `0x30` function bits of the DIF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFunction {
    Instantaneous,
    Maximum,
    Minimum,
    Error,
}

impl RecordFunction {
    fn from_dif(dif: u8) -> Self {
        match (dif & 0x30) >> 4 {
            0 => RecordFunction::Instantaneous,
            1 => RecordFunction::Maximum,
            2 => RecordFunction::Minimum,
            _ => RecordFunction::Error,
        }
    }
}

/// One decoded data record.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub dif_type: u8,
    pub vif_base: u8,
    pub storage: u32,
    pub tariff: u16,
    pub subunit: u8,
    pub function: RecordFunction,
    pub raw_value: Vec<u8>,
    pub parsed: Value,
    pub unit: String,
    pub description: String,
    pub dife_chain: Vec<u8>,
    pub vife_chain: Vec<u8>,
}

struct VifMeta {
    description: &'static str,
    unit: &'static str,
    multiplier: f64,
    special: Special,
}

#[derive(Clone, Copy, PartialEq)]
enum Special {
    None,
    TimePoint,
    Duration,
    Binary,
}

/// Coded like "On Time"/"Operating Time": nn = 00 seconds, 01 minutes,
/// 10 hours, 11 days.
fn duration_scale(vif_low_bits: u8) -> f64 {
    match vif_low_bits & 0x3 {
        0 => 1.0,
        1 => 60.0,
        2 => 3600.0,
        _ => 86400.0,
    }
}

fn vif_primary(vif: u8) -> (usize, VifMeta) {
    let base: f64 = 10.0;
    let v = vif & 0x7F;
    let meta = match v {
        0b0000_0000..=0b0000_0111 => VifMeta { description: "Energy", unit: "Wh", multiplier: base.powi((v & 0x7) as i32 - 3), special: Special::None },
        0b0000_1000..=0b0000_1111 => VifMeta { description: "Energy", unit: "J", multiplier: base.powi((v & 0x7) as i32 - 3), special: Special::None },
        0b0001_0000..=0b0001_0111 => VifMeta { description: "Volume", unit: "m³", multiplier: base.powi((v & 0x7) as i32 - 6), special: Special::None },
        0b0001_1000..=0b0001_1111 => VifMeta { description: "Mass", unit: "kg", multiplier: base.powi((v & 0x7) as i32 - 3), special: Special::None },
        0b0010_0000..=0b0010_0011 => VifMeta { description: "On Time", unit: "s", multiplier: duration_scale(v), special: Special::Duration },
        0b0010_0100..=0b0010_0111 => VifMeta { description: "Operating Time", unit: "s", multiplier: duration_scale(v), special: Special::Duration },
        0b0010_1000..=0b0010_1111 => VifMeta { description: "Power", unit: "W", multiplier: base.powi((v & 0x7) as i32 - 3), special: Special::None },
        0b0011_0000..=0b0011_0111 => VifMeta { description: "Power", unit: "J/h", multiplier: base.powi((v & 0x7) as i32), special: Special::None },
        0b0011_1000..=0b0011_1111 => VifMeta { description: "Volume Flow", unit: "m³/h", multiplier: base.powi((v & 0x7) as i32 - 6), special: Special::None },
        0b0100_0000..=0b0100_0111 => VifMeta { description: "Volume Flow", unit: "m³/min", multiplier: base.powi((v & 0x7) as i32 - 7), special: Special::None },
        0b0100_1000..=0b0100_1111 => VifMeta { description: "Volume Flow", unit: "m³/s", multiplier: base.powi((v & 0x7) as i32 - 9), special: Special::None },
        0b0101_0000..=0b0101_0111 => VifMeta { description: "Mass Flow", unit: "kg/h", multiplier: base.powi((v & 0x7) as i32 - 3), special: Special::None },
        0b0101_1000..=0b0101_1011 => VifMeta { description: "Flow Temperature", unit: "°C", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0101_1100..=0b0101_1111 => VifMeta { description: "Return Temperature", unit: "°C", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0110_0000..=0b0110_0011 => VifMeta { description: "Temperature Difference", unit: "K", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0110_0100..=0b0110_0111 => VifMeta { description: "External Temperature", unit: "°C", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0110_1000..=0b0110_1011 => VifMeta { description: "Pressure", unit: "bar", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0110_1100..=0b0110_1101 => VifMeta { description: "Time Point", unit: "", multiplier: 1.0, special: Special::TimePoint },
        0b0110_1110 => VifMeta { description: "Units for H.C.A.", unit: "", multiplier: 1.0, special: Special::None },
        0b0111_0000..=0b0111_0011 => VifMeta { description: "Averaging Duration", unit: "s", multiplier: duration_scale(v), special: Special::Duration },
        0b0111_0100..=0b0111_0111 => VifMeta { description: "Actuality Duration", unit: "s", multiplier: duration_scale(v), special: Special::Duration },
        _ => VifMeta { description: "Unknown VIF", unit: "", multiplier: 1.0, special: Special::None },
    };
    (1, meta)
}

fn vif_extension_fb(second: u8) -> VifMeta {
    let base: f64 = 10.0;
    let v = second & 0x7F;
    match v {
        0b0000_0000..=0b0000_0001 => VifMeta { description: "Energy", unit: "MWh", multiplier: base.powi(v as i32 - 1), special: Special::None },
        0b0000_1000..=0b0000_1001 => VifMeta { description: "Energy", unit: "GJ", multiplier: base.powi((v & 1) as i32 - 1), special: Special::None },
        0b0001_0000..=0b0001_0001 => VifMeta { description: "Volume", unit: "m³", multiplier: base.powi((v & 1) as i32 + 2), special: Special::None },
        0b0001_1000..=0b0001_1001 => VifMeta { description: "Mass", unit: "t", multiplier: base.powi((v & 1) as i32 + 2), special: Special::None },
        0b0010_0001 => VifMeta { description: "Volume", unit: "feet³", multiplier: 0.1, special: Special::None },
        0b0010_0010 => VifMeta { description: "Volume", unit: "american_gallon", multiplier: 0.1, special: Special::None },
        0b0010_0011 => VifMeta { description: "Volume", unit: "american_gallon", multiplier: 1.0, special: Special::None },
        0b0010_0100 => VifMeta { description: "Volume Flow", unit: "american_gallon/min", multiplier: 0.001, special: Special::None },
        0b0010_0101 => VifMeta { description: "Volume Flow", unit: "american_gallon/min", multiplier: 1.0, special: Special::None },
        0b0010_0110 => VifMeta { description: "Volume Flow", unit: "american_gallon/h", multiplier: 1.0, special: Special::None },
        0b0010_1000..=0b0010_1001 => VifMeta { description: "Power", unit: "MW", multiplier: base.powi((v & 1) as i32 - 1), special: Special::None },
        0b0011_0000..=0b0011_0001 => VifMeta { description: "Power", unit: "GJ/h", multiplier: base.powi((v & 1) as i32 - 1), special: Special::None },
        0b0101_1000..=0b0101_1011 => VifMeta { description: "Flow Temperature", unit: "°F", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0101_1100..=0b0101_1111 => VifMeta { description: "Return Temperature", unit: "°F", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0110_0000..=0b0110_0011 => VifMeta { description: "Temperature Difference", unit: "°F", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0110_0100..=0b0110_0111 => VifMeta { description: "External Temperature", unit: "°F", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0111_0000..=0b0111_0011 => VifMeta { description: "Cold/Warm Temperature Limit", unit: "°F", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0111_0100..=0b0111_0111 => VifMeta { description: "Cold/Warm Temperature Limit", unit: "°C", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0111_1000..=0b0111_1111 => VifMeta { description: "Cumulative Count Max Power", unit: "W", multiplier: base.powi((v & 0x7) as i32 - 3), special: Special::None },
        _ => VifMeta { description: "Unknown VIF (FB)", unit: "", multiplier: 1.0, special: Special::None },
    }
}

fn vif_extension_fd(second: u8) -> VifMeta {
    let base: f64 = 10.0;
    let v = second & 0x7F;
    match v {
        0b0000_0000..=0b0000_0011 => VifMeta { description: "Credit", unit: "currency_units", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0000_0100..=0b0000_0111 => VifMeta { description: "Debit", unit: "currency_units", multiplier: base.powi((v & 0x3) as i32 - 3), special: Special::None },
        0b0000_1000 => VifMeta { description: "Access Number", unit: "count", multiplier: 1.0, special: Special::None },
        0b0000_1001 => VifMeta { description: "Medium", unit: "", multiplier: 1.0, special: Special::None },
        0b0000_1010 => VifMeta { description: "Manufacturer", unit: "", multiplier: 1.0, special: Special::None },
        0b0000_1011 => VifMeta { description: "Parameter Set Identification", unit: "", multiplier: 1.0, special: Special::None },
        0b0000_1100 => VifMeta { description: "Model / Version", unit: "", multiplier: 1.0, special: Special::None },
        0b0000_1101 => VifMeta { description: "Hardware Version", unit: "", multiplier: 1.0, special: Special::None },
        0b0000_1110 => VifMeta { description: "Firmware Version", unit: "", multiplier: 1.0, special: Special::None },
        0b0000_1111 => VifMeta { description: "Software Version", unit: "", multiplier: 1.0, special: Special::None },
        0b0001_0000 => VifMeta { description: "Customer Location", unit: "", multiplier: 1.0, special: Special::None },
        0b0001_0001 => VifMeta { description: "Customer", unit: "", multiplier: 1.0, special: Special::None },
        0b0001_0010 => VifMeta { description: "Access Code User", unit: "", multiplier: 1.0, special: Special::None },
        0b0001_0011 => VifMeta { description: "Access Code Operator", unit: "", multiplier: 1.0, special: Special::None },
        0b0001_0100 => VifMeta { description: "Access Code System Operator", unit: "", multiplier: 1.0, special: Special::None },
        0b0001_0101 => VifMeta { description: "Access Code Developer", unit: "", multiplier: 1.0, special: Special::None },
        0b0001_0110 => VifMeta { description: "Password", unit: "", multiplier: 1.0, special: Special::None },
        0b0001_0111 => VifMeta { description: "Error Flags", unit: "", multiplier: 1.0, special: Special::Binary },
        0b0001_1000 => VifMeta { description: "Error Mask", unit: "", multiplier: 1.0, special: Special::None },
        0b0001_1010 => VifMeta { description: "Digital Output", unit: "", multiplier: 1.0, special: Special::Binary },
        0b0001_1011 => VifMeta { description: "Digital Input", unit: "", multiplier: 1.0, special: Special::Binary },
        0b0001_1100 => VifMeta { description: "Baudrate", unit: "Baud", multiplier: 1.0, special: Special::None },
        0b0001_1101 => VifMeta { description: "Response Delay Time", unit: "bittimes", multiplier: 1.0, special: Special::None },
        0b0001_1110 => VifMeta { description: "Retry", unit: "", multiplier: 1.0, special: Special::None },
        0b0010_0000 => VifMeta { description: "First Storage For Cyclic Storage", unit: "", multiplier: 1.0, special: Special::None },
        0b0010_0001 => VifMeta { description: "Last Storage For Cyclic Storage", unit: "", multiplier: 1.0, special: Special::None },
        0b0010_0010 => VifMeta { description: "Size of Storage Block", unit: "", multiplier: 1.0, special: Special::None },
        0b0010_0100..=0b0010_0111 => VifMeta { description: "Storage Interval", unit: "time", multiplier: 1.0, special: Special::None },
        0b0010_1000 => VifMeta { description: "Storage Interval", unit: "months", multiplier: 1.0, special: Special::None },
        0b0010_1001 => VifMeta { description: "Storage Interval", unit: "years", multiplier: 1.0, special: Special::None },
        0b0010_1100..=0b0010_1111 => VifMeta { description: "Duration Since Last Readout", unit: "time", multiplier: 1.0, special: Special::None },
        0b0011_0000 => VifMeta { description: "Start of Tariff", unit: "datetime", multiplier: 1.0, special: Special::None },
        0b0011_0001..=0b0011_0011 => VifMeta { description: "Duration of Tariff", unit: "time", multiplier: 1.0, special: Special::None },
        0b0011_0100..=0b0011_0111 => VifMeta { description: "Period of Tariff", unit: "time", multiplier: 1.0, special: Special::None },
        0b0011_1000 => VifMeta { description: "Period of Tariff", unit: "months", multiplier: 1.0, special: Special::None },
        0b0011_1001 => VifMeta { description: "Period of Tariff", unit: "years", multiplier: 1.0, special: Special::None },
        0b0011_1010 => VifMeta { description: "Dimensionless", unit: "", multiplier: 1.0, special: Special::None },
        0b0100_0000..=0b0100_1111 => VifMeta { description: "Voltage", unit: "V", multiplier: base.powi((v & 0xF) as i32 - 9), special: Special::None },
        0b0101_0000..=0b0101_1111 => VifMeta { description: "Current", unit: "A", multiplier: base.powi((v & 0xF) as i32 - 12), special: Special::None },
        _ => VifMeta { description: "Unknown VIF (FD)", unit: "", multiplier: 1.0, special: Special::None },
    }
}

/// Result of walking one DIF(+DIFE) / VIF(+VIFE) group.
enum DifOutcome {
    /// Regular data field: value width in bytes, whether it is BCD, whether it is variable length.
    Fixed { bytes: usize, bcd: bool },
    Variable,
    /// Readout-selection marker (`0x08`): no value bytes, no record emitted.
    NoData,
    /// Manufacturer-specific (`0x0F`/`0x1F`): stop standard parsing.
    ManufacturerSpecific,
}

fn dif_outcome(dif_low: u8) -> DifOutcome {
    match dif_low {
        0x0 => DifOutcome::NoData,
        0x1 => DifOutcome::Fixed { bytes: 1, bcd: false },
        0x2 => DifOutcome::Fixed { bytes: 2, bcd: false },
        0x3 => DifOutcome::Fixed { bytes: 3, bcd: false },
        0x4 => DifOutcome::Fixed { bytes: 4, bcd: false },
        0x5 => DifOutcome::Fixed { bytes: 4, bcd: false }, // float32, handled by caller
        0x6 => DifOutcome::Fixed { bytes: 6, bcd: false },
        0x7 => DifOutcome::Fixed { bytes: 8, bcd: false },
        0x8 => DifOutcome::NoData,
        0x9 => DifOutcome::Fixed { bytes: 1, bcd: true },
        0xA => DifOutcome::Fixed { bytes: 2, bcd: true },
        0xB => DifOutcome::Fixed { bytes: 3, bcd: true },
        0xC => DifOutcome::Fixed { bytes: 4, bcd: true },
        0xD => DifOutcome::Variable,
        0xE => DifOutcome::Fixed { bytes: 6, bcd: true },
        0xF => DifOutcome::ManufacturerSpecific,
        _ => unreachable!("nibble is 4 bits"),
    }
}

/// Parse a decrypted payload into an ordered list of data records.
/// On a truncated DIF/DIFE chain or value, parsing stops and whatever
/// was already produced is returned (§4.2 edge cases).
pub fn parse_records(payload: &[u8]) -> Vec<DataRecord> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < payload.len() {
        let dif = payload[pos];

        if dif == 0x2F {
            trace!("idle filler DIF at {pos}");
            pos += 1;
            continue;
        }

        pos += 1;
        let dif_low = dif & 0x0F;

        // DIFE chain. A record with no DIFEs has storage/tariff/subunit all
        // zero (§3 invariant); the DIF byte's own bits 4-7 are function and
        // extension, not a seed for these fields.
        let mut storage: u32 = 0;
        let mut tariff: u16 = 0;
        let mut subunit: u8 = 0;
        let mut dife_chain = Vec::new();
        let mut more = dif & 0x80 != 0;
        let mut n: u32 = 0;
        while more {
            if pos >= payload.len() {
                warn!("DIFE chain truncated, discarding remaining payload");
                return records;
            }
            let dife = payload[pos];
            pos += 1;
            dife_chain.push(dife);
            storage |= ((dife & 0x0F) as u32) << (4 * n);
            tariff |= (((dife >> 4) & 0x03) as u16) << (2 * n);
            subunit |= ((dife >> 6) & 0x01) << n.min(7);
            more = dife & 0x80 != 0;
            n += 1;
        }

        match dif_outcome(dif_low) {
            DifOutcome::NoData => continue,
            DifOutcome::ManufacturerSpecific => {
                debug!("manufacturer-specific DIF 0x{dif:02x}, terminating standard parsing");
                if pos < payload.len() {
                    records.push(DataRecord {
                        dif_type: dif,
                        vif_base: 0,
                        storage,
                        tariff,
                        subunit,
                        function: RecordFunction::from_dif(dif),
                        raw_value: payload[pos..].to_vec(),
                        parsed: Value::Bytes(payload[pos..].to_vec()),
                        unit: String::new(),
                        description: "Manufacturer specific".to_string(),
                        dife_chain,
                        vife_chain: Vec::new(),
                    });
                }
                return records;
            }
            DifOutcome::Variable => {
                let (vif_consumed, vif_chain, meta) = match read_vif(payload, pos) {
                    Some(v) => v,
                    None => {
                        warn!("VIF truncated after DIF(E)");
                        return records;
                    }
                };
                let vif_base = payload[pos];
                pos += vif_consumed;

                if pos >= payload.len() {
                    warn!("variable-length record truncated (missing length prefix)");
                    return records;
                }
                let len = payload[pos] as usize;
                pos += 1;
                if pos + len > payload.len() {
                    warn!("variable-length record overruns payload end");
                    return records;
                }
                let raw = payload[pos..pos + len].to_vec();
                pos += len;

                let text = String::from_utf8_lossy(&raw).to_string();
                records.push(DataRecord {
                    dif_type: dif,
                    vif_base,
                    storage,
                    tariff,
                    subunit,
                    function: RecordFunction::from_dif(dif),
                    raw_value: raw,
                    parsed: Value::Text(text),
                    unit: meta.unit.to_string(),
                    description: describe(&meta, &vif_chain),
                    dife_chain,
                    vife_chain: vif_chain,
                });
            }
            DifOutcome::Fixed { bytes, bcd } => {
                let (vif_consumed, vif_chain, meta) = match read_vif(payload, pos) {
                    Some(v) => v,
                    None => {
                        warn!("VIF truncated after DIF(E)");
                        return records;
                    }
                };
                let vif_base = payload[pos];
                pos += vif_consumed;

                if pos + bytes > payload.len() {
                    warn!("value of {bytes} bytes truncates payload, discarding record");
                    return records;
                }
                let raw = payload[pos..pos + bytes].to_vec();
                pos += bytes;

                let parsed = build_value(dif_low, bcd, &raw, &meta);
                records.push(DataRecord {
                    dif_type: dif,
                    vif_base,
                    storage,
                    tariff,
                    subunit,
                    function: RecordFunction::from_dif(dif),
                    raw_value: raw,
                    parsed,
                    unit: meta.unit.to_string(),
                    description: describe(&meta, &vif_chain),
                    dife_chain,
                    vife_chain: vif_chain,
                });
            }
        }
    }

    records
}

/// Render a VIF's final description, logging the §7 `UnsupportedVif`
/// cause when the table fell through to its catch-all arm instead of
/// silently carrying the placeholder text forward. `chain` is the VIF
/// byte or `[extension-marker, code]` pair the description was derived
/// from, so the reported hex reflects the byte that was actually
/// unrecognised rather than the leading 0xFB/0xFD marker.
fn describe(meta: &VifMeta, chain: &[u8]) -> String {
    if meta.description.starts_with("Unknown VIF") {
        let code = *chain.last().unwrap_or(&0);
        let cause = DecodeError::UnsupportedVif(code);
        warn!("{cause}");
        format!("Unknown VIF: 0x{code:02x}")
    } else {
        meta.description.to_string()
    }
}

fn read_vif(payload: &[u8], pos: usize) -> Option<(usize, Vec<u8>, VifMeta)> {
    if pos >= payload.len() {
        return None;
    }
    let first = payload[pos];
    if first == 0xFB || first == 0xFD {
        if pos + 1 >= payload.len() {
            return None;
        }
        let second = payload[pos + 1];
        let meta = if first == 0xFB { vif_extension_fb(second) } else { vif_extension_fd(second) };
        let mut consumed = 2;
        let mut chain = vec![first, second];
        // Consume any further VIFE continuation bytes (traceability only).
        let mut cursor = pos + 2;
        while cursor < payload.len() && payload[cursor - 1] & 0x80 != 0 {
            chain.push(payload[cursor]);
            consumed += 1;
            cursor += 1;
        }
        return Some((consumed, chain, meta));
    }

    let (mut consumed, meta) = vif_primary(first);
    let mut chain = vec![first];
    let mut cursor = pos + 1;
    while first & 0x80 != 0 && cursor < payload.len() && payload[cursor] & 0x80 != 0 {
        chain.push(payload[cursor]);
        consumed += 1;
        cursor += 1;
        break; // one level of VIFE is enough for the classes this table covers
    }
    Some((consumed, chain, meta))
}

fn build_value(dif_low: u8, bcd: bool, raw: &[u8], meta: &VifMeta) -> Value {
    if meta.special == Special::TimePoint {
        return if raw.len() >= 4 {
            Value::DateTime(decode_datetime(raw[0], raw[1], raw[2], raw[3]))
        } else if raw.len() >= 2 {
            Value::Date(decode_date(raw[0], raw[1]))
        } else {
            Value::Null
        };
    }

    let numeric: Option<f64> = if bcd {
        let (value, valid) = decode_bcd(raw);
        if !valid {
            warn!("invalid BCD nibble in record, clamped");
        }
        Some(value as f64)
    } else if dif_low == 0x5 {
        read_f32_le(raw).ok().map(|f| f as f64)
    } else {
        let width = (raw.len() * 8) as u8;
        read_int_le(raw, width).ok().map(|v| v as f64)
    };

    let Some(value) = numeric else {
        return Value::Bytes(raw.to_vec());
    };

    if meta.special == Special::Duration {
        return Value::I64((value * meta.multiplier) as i64);
    }

    if meta.special == Special::Binary {
        return Value::Text(format!("{:X}", value as i64));
    }

    if meta.multiplier != 1.0 {
        Value::F64(value * meta.multiplier)
    } else if value.fract() == 0.0 {
        Value::I64(value as i64)
    } else {
        Value::F64(value)
    }
}
