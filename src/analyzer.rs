//! Stateful per-meter analysis: interval tracking and telegram diffing,
//! grounded in the reference `TelegramWatcher` (§4.7).

use crate::record::{DataRecord, Value};
use crate::types::{Header, MeterRegistration};
use std::collections::{HashMap, VecDeque};

const SUMMARY_HISTORY: usize = 5;
const FULL_HISTORY: usize = 100;
const INTERVAL_EMA_WEIGHT: f64 = 0.2;

/// Per-meter running state the analyzer keeps between telegrams (§3).
#[derive(Debug, Clone)]
pub struct MeterState {
    pub identification: String,
    pub registration: Option<MeterRegistration>,
    pub last_header: Option<Header>,
    pub signal_strength: Option<f64>,
    pub telegram_count: u64,
    pub last_seen_at: Option<f64>,
    pub mean_interval_secs: Option<f64>,
    summary_history: VecDeque<Vec<DataRecord>>,
    full_history: VecDeque<Vec<DataRecord>>,
}

impl MeterState {
    fn new(identification: &str) -> Self {
        Self {
            identification: identification.to_string(),
            registration: None,
            last_header: None,
            signal_strength: None,
            telegram_count: 0,
            last_seen_at: None,
            mean_interval_secs: None,
            summary_history: VecDeque::with_capacity(SUMMARY_HISTORY),
            full_history: VecDeque::with_capacity(FULL_HISTORY),
        }
    }

    /// Last `n` sets of records kept for this meter, most recent last.
    pub fn recent(&self, n: usize) -> Vec<&Vec<DataRecord>> {
        self.full_history.iter().rev().take(n).collect::<Vec<_>>().into_iter().rev().collect()
    }

    pub fn latest(&self) -> Option<&Vec<DataRecord>> {
        self.full_history.back()
    }
}

/// A single difference between two telegrams for the same meter, keyed
/// by the record's description/unit/storage/tariff identity (§4.7).
#[derive(Debug, Clone, PartialEq)]
pub enum RecordDiff {
    Unchanged { key: RecordKey, value: String },
    Changed { key: RecordKey, before: String, after: String },
    FirstOnly { key: RecordKey, value: String },
    SecondOnly { key: RecordKey, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub description: String,
    pub unit: String,
    pub storage: u32,
    pub tariff: u16,
}

impl RecordKey {
    fn of(record: &DataRecord) -> Self {
        Self {
            description: record.description.clone(),
            unit: record.unit.clone(),
            storage: record.storage,
            tariff: record.tariff,
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::I64(v) => v.to_string(),
        Value::F64(v) => format!("{v}"),
        Value::Text(v) => v.clone(),
        Value::Bytes(v) => hex::encode(v),
        Value::Date(d) | Value::DateTime(d) => d.to_iso8601(),
        Value::Null => "null".to_string(),
    }
}

/// Compare two record sets keyed by (description, unit, storage, tariff),
/// the identity the reference comparator uses for "is this the same
/// reading slot across telegrams" (§4.7).
pub fn diff_records(before: &[DataRecord], after: &[DataRecord]) -> Vec<RecordDiff> {
    let mut before_map: HashMap<RecordKey, &DataRecord> = HashMap::new();
    for record in before {
        before_map.insert(RecordKey::of(record), record);
    }
    let mut after_map: HashMap<RecordKey, &DataRecord> = HashMap::new();
    for record in after {
        after_map.insert(RecordKey::of(record), record);
    }

    let mut diffs = Vec::new();

    for (key, record) in &before_map {
        match after_map.get(key) {
            Some(other) => {
                let before_text = render(&record.parsed);
                let after_text = render(&other.parsed);
                if before_text == after_text {
                    diffs.push(RecordDiff::Unchanged { key: key.clone(), value: before_text });
                } else {
                    diffs.push(RecordDiff::Changed { key: key.clone(), before: before_text, after: after_text });
                }
            }
            None => diffs.push(RecordDiff::FirstOnly { key: key.clone(), value: render(&record.parsed) }),
        }
    }

    for (key, record) in &after_map {
        if !before_map.contains_key(key) {
            diffs.push(RecordDiff::SecondOnly { key: key.clone(), value: render(&record.parsed) });
        }
    }

    diffs
}

/// Tracks per-meter state across a stream of telegrams: arrival
/// intervals (exponential moving average) and bounded record history,
/// and produces diffs against the previous reading.
#[derive(Debug, Default)]
pub struct Analyzer {
    meters: HashMap<String, MeterState>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self { meters: HashMap::new() }
    }

    /// Bind a stable user-facing registration (name, driver, link mode,
    /// key) to a meter identification, creating its state if this is the
    /// first time the meter has been seen (§3 `MeterRegistration`).
    pub fn register(&mut self, registration: MeterRegistration) {
        let state = self
            .meters
            .entry(registration.identification.clone())
            .or_insert_with(|| MeterState::new(&registration.identification));
        state.registration = Some(registration);
    }

    /// Like [`Analyzer::observe`], but also records the decoded header and
    /// an optional signal-strength reading supplied by the receiving
    /// radio hardware (§3 `MeterState.last_header`/`signal_strength`).
    pub fn observe_telegram(
        &mut self,
        header: &Header,
        timestamp_secs: f64,
        signal_strength: Option<f64>,
        records: Vec<DataRecord>,
    ) -> Option<Vec<RecordDiff>> {
        let diff = self.observe(&header.identification, timestamp_secs, records);
        if let Some(state) = self.meters.get_mut(&header.identification) {
            state.last_header = Some(header.clone());
            state.signal_strength = signal_strength;
        }
        diff
    }

    /// Record a telegram's data for `identification`, observed at
    /// `timestamp_secs` (a monotonic or wall-clock seconds value supplied
    /// by the caller — the analyzer does not read the clock itself).
    /// Returns the diff against the immediately preceding telegram for
    /// the same meter, if any.
    pub fn observe(&mut self, identification: &str, timestamp_secs: f64, records: Vec<DataRecord>) -> Option<Vec<RecordDiff>> {
        let state = self.meters.entry(identification.to_string()).or_insert_with(|| MeterState::new(identification));

        if let Some(last) = state.last_seen_at {
            let interval = (timestamp_secs - last).max(0.0);
            state.mean_interval_secs = Some(match state.mean_interval_secs {
                Some(mean) => mean + INTERVAL_EMA_WEIGHT * (interval - mean),
                None => interval,
            });
        }
        state.last_seen_at = Some(timestamp_secs);
        state.telegram_count += 1;

        let previous = state.full_history.back().cloned();

        if state.summary_history.len() >= SUMMARY_HISTORY {
            state.summary_history.pop_front();
        }
        state.summary_history.push_back(records.clone());

        if state.full_history.len() >= FULL_HISTORY {
            state.full_history.pop_front();
        }
        state.full_history.push_back(records.clone());

        previous.map(|prev| diff_records(&prev, &records))
    }

    pub fn meter(&self, identification: &str) -> Option<&MeterState> {
        self.meters.get(identification)
    }

    pub fn meter_count(&self) -> usize {
        self.meters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordFunction;

    fn record(description: &str, value: i64) -> DataRecord {
        DataRecord {
            dif_type: 0,
            vif_base: 0,
            storage: 0,
            tariff: 0,
            subunit: 0,
            function: RecordFunction::Instantaneous,
            raw_value: vec![],
            parsed: Value::I64(value),
            unit: "m³".to_string(),
            description: description.to_string(),
            dife_chain: vec![],
            vife_chain: vec![],
        }
    }

    #[test]
    fn first_observation_has_no_diff() {
        let mut analyzer = Analyzer::new();
        let diff = analyzer.observe("123", 0.0, vec![record("Volume", 1)]);
        assert!(diff.is_none());
        assert_eq!(analyzer.meter("123").unwrap().telegram_count, 1);
    }

    #[test]
    fn second_observation_reports_changed_value() {
        let mut analyzer = Analyzer::new();
        analyzer.observe("123", 0.0, vec![record("Volume", 1)]);
        let diff = analyzer.observe("123", 10.0, vec![record("Volume", 2)]).unwrap();
        assert_eq!(diff.len(), 1);
        match &diff[0] {
            RecordDiff::Changed { before, after, .. } => {
                assert_eq!(before, "1");
                assert_eq!(after, "2");
            }
            other => panic!("expected Changed, got {other:?}"),
        }
    }

    #[test]
    fn mean_interval_tracks_ema() {
        let mut analyzer = Analyzer::new();
        analyzer.observe("123", 0.0, vec![]);
        analyzer.observe("123", 10.0, vec![]);
        let mean = analyzer.meter("123").unwrap().mean_interval_secs.unwrap();
        assert!((mean - 10.0).abs() < 1e-9);
        analyzer.observe("123", 20.0, vec![]);
        let mean2 = analyzer.meter("123").unwrap().mean_interval_secs.unwrap();
        // EMA after a second identical 10s interval stays at 10s.
        assert!((mean2 - 10.0).abs() < 1e-9);
    }

    #[test]
    fn history_is_bounded() {
        let mut analyzer = Analyzer::new();
        for i in 0..150 {
            analyzer.observe("123", i as f64, vec![record("Volume", i)]);
        }
        let state = analyzer.meter("123").unwrap();
        assert_eq!(state.full_history.len(), FULL_HISTORY);
        assert_eq!(state.telegram_count, 150);
    }

    #[test]
    fn first_only_and_second_only_keys_are_reported() {
        let before = vec![record("Volume", 1)];
        let after = vec![record("Power", 2)];
        let diffs = diff_records(&before, &after);
        assert!(diffs.iter().any(|d| matches!(d, RecordDiff::FirstOnly { .. })));
        assert!(diffs.iter().any(|d| matches!(d, RecordDiff::SecondOnly { .. })));
    }

    #[test]
    fn register_binds_registration_before_any_telegram() {
        use crate::types::LinkMode;
        let mut analyzer = Analyzer::new();
        analyzer.register(MeterRegistration {
            name: "Kitchen water".to_string(),
            identification: "12353648".to_string(),
            driver_name: "multical21".to_string(),
            link_mode: LinkMode::T1,
            key: None,
        });
        let state = analyzer.meter("12353648").unwrap();
        assert_eq!(state.registration.as_ref().unwrap().name, "Kitchen water");
        assert_eq!(state.telegram_count, 0);
    }

    #[test]
    fn observe_telegram_tracks_header_and_signal_strength() {
        use crate::types::{DeviceType, FrameType};
        let mut analyzer = Analyzer::new();
        let header = Header {
            frame_type: FrameType::WirelessApl,
            length: 0,
            control: 0x44,
            manufacturer: "KAM".to_string(),
            identification: "12353648".to_string(),
            version: 0x18,
            device_type: DeviceType::WarmWater,
            ci_field: None,
            encrypted: false,
        };
        analyzer.observe_telegram(&header, 0.0, Some(-72.5), vec![record("Volume", 1)]);
        let state = analyzer.meter("12353648").unwrap();
        assert_eq!(state.last_header.as_ref().unwrap().manufacturer, "KAM");
        assert_eq!(state.signal_strength, Some(-72.5));
    }
}
