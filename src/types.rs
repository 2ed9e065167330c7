use serde::{Deserialize, Serialize};

/// Radio/wired mode a meter registration expects. Influences framing
/// expectations held by the caller, not decoding of a well-formed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkMode {
    S1,
    S1M,
    S2,
    T1,
    T2,
    C1,
    C2,
    F1,
    F2,
    Mbus,
}

/// EN 13757-3 device/medium type. Unknown codes are carried rather than
/// rejected: an unrecognised device type is still a valid header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Other,
    Oil,
    Electricity,
    Gas,
    Heat,
    Steam,
    WarmWater,
    Water,
    HeatCostAllocator,
    CoolingLoadMeter,
    HeatCoolingLoadMeter,
    HotWater,
    ColdWater,
    RoomSensor,
    Unknown(u8),
}

impl DeviceType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => DeviceType::Other,
            0x01 => DeviceType::Oil,
            0x02 => DeviceType::Electricity,
            0x03 => DeviceType::Gas,
            0x04 => DeviceType::Heat,
            0x05 => DeviceType::Steam,
            0x06 => DeviceType::WarmWater,
            0x07 => DeviceType::Water,
            0x08 => DeviceType::HeatCostAllocator,
            0x0A => DeviceType::CoolingLoadMeter,
            0x0D => DeviceType::HeatCoolingLoadMeter,
            0x11 => DeviceType::HotWater,
            0x12 => DeviceType::ColdWater,
            0x17 => DeviceType::RoomSensor,
            other => DeviceType::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            DeviceType::Other => 0x00,
            DeviceType::Oil => 0x01,
            DeviceType::Electricity => 0x02,
            DeviceType::Gas => 0x03,
            DeviceType::Heat => 0x04,
            DeviceType::Steam => 0x05,
            DeviceType::WarmWater => 0x06,
            DeviceType::Water => 0x07,
            DeviceType::HeatCostAllocator => 0x08,
            DeviceType::CoolingLoadMeter => 0x0A,
            DeviceType::HeatCoolingLoadMeter => 0x0D,
            DeviceType::HotWater => 0x11,
            DeviceType::ColdWater => 0x12,
            DeviceType::RoomSensor => 0x17,
            DeviceType::Unknown(code) => *code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceType::Other => "Other",
            DeviceType::Oil => "Oil",
            DeviceType::Electricity => "Electricity",
            DeviceType::Gas => "Gas",
            DeviceType::Heat => "Heat",
            DeviceType::Steam => "Steam",
            DeviceType::WarmWater => "Warm water",
            DeviceType::Water => "Water",
            DeviceType::HeatCostAllocator => "Heat cost allocator",
            DeviceType::CoolingLoadMeter => "Cooling load meter",
            DeviceType::HeatCoolingLoadMeter => "Heat/cooling load meter",
            DeviceType::HotWater => "Hot water",
            DeviceType::ColdWater => "Cold water",
            DeviceType::RoomSensor => "Room sensor",
            DeviceType::Unknown(_) => "Unknown",
        }
    }
}

/// Three framing forms recognised by the frame parser (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    SingleChar,
    Short,
    Long,
    WirelessApl,
}

/// Link-layer header decoded from the first bytes of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub frame_type: FrameType,
    pub length: u8,
    pub control: u8,
    pub manufacturer: String,
    pub identification: String,
    pub version: u8,
    pub device_type: DeviceType,
    pub ci_field: Option<u8>,
    pub encrypted: bool,
}

/// A stable user-facing binding from a meter identification to a driver
/// and its key, owned by the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterRegistration {
    pub name: String,
    pub identification: String,
    pub driver_name: String,
    pub link_mode: LinkMode,
    pub key: Option<[u8; 16]>,
}
