//! Typed parameter identifiers and the narrow store interface.
//!
//! The wire namespace is `/wfs/{input|output|reverb}/<name> [ch] value`
//! for channelled parameters and `/wfs/<name> value` for global
//! configuration. The table below is the single source of truth for the
//! bidirectional address mapping used by the router.

use std::sync::Arc;

/// Channel counts of the rig
pub const NUM_INPUT_CHANNELS: u16 = 64;
pub const NUM_OUTPUT_CHANNELS: u16 = 64;
pub const NUM_REVERB_BUSES: u16 = 4;

/// Sentinel for an input channel with no tracker assigned
pub const TRACKING_UNASSIGNED: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Input,
    Output,
    Reverb,
    Config,
}

impl Scope {
    pub fn segment(self) -> &'static str {
        match self {
            Scope::Input => "input",
            Scope::Output => "output",
            Scope::Reverb => "reverb",
            Scope::Config => "",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "input" => Some(Scope::Input),
            "output" => Some(Scope::Output),
            "reverb" => Some(Scope::Reverb),
            _ => None,
        }
    }

    pub fn channels(self) -> u16 {
        match self {
            Scope::Input => NUM_INPUT_CHANNELS,
            Scope::Output => NUM_OUTPUT_CHANNELS,
            Scope::Reverb => NUM_REVERB_BUSES,
            Scope::Config => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    // Input channels
    PositionX,
    PositionY,
    PositionZ,
    InputGain,
    InputMute,
    Attenuation,
    Doppler,
    Spread,
    ReverbSend,
    TrackingId,
    // Output channels
    OutputGain,
    OutputMute,
    OutputDelay,
    // Reverb buses
    ReverbGain,
    RoomSize,
    Damping,
    Predelay,
    LowCut,
    HighCut,
    // Global configuration
    MasterGain,
    StageWidth,
    StageDepth,
    SpeakerSpacing,
    ClusterCount,
}

/// Every parameter, in table order. Drives full-state resend and the
/// reverse wire lookup.
pub const ALL_PARAMS: [ParamId; 24] = [
    ParamId::PositionX,
    ParamId::PositionY,
    ParamId::PositionZ,
    ParamId::InputGain,
    ParamId::InputMute,
    ParamId::Attenuation,
    ParamId::Doppler,
    ParamId::Spread,
    ParamId::ReverbSend,
    ParamId::TrackingId,
    ParamId::OutputGain,
    ParamId::OutputMute,
    ParamId::OutputDelay,
    ParamId::ReverbGain,
    ParamId::RoomSize,
    ParamId::Damping,
    ParamId::Predelay,
    ParamId::LowCut,
    ParamId::HighCut,
    ParamId::MasterGain,
    ParamId::StageWidth,
    ParamId::StageDepth,
    ParamId::SpeakerSpacing,
    ParamId::ClusterCount,
];

impl ParamId {
    pub fn scope(self) -> Scope {
        match self {
            ParamId::PositionX
            | ParamId::PositionY
            | ParamId::PositionZ
            | ParamId::InputGain
            | ParamId::InputMute
            | ParamId::Attenuation
            | ParamId::Doppler
            | ParamId::Spread
            | ParamId::ReverbSend
            | ParamId::TrackingId => Scope::Input,
            ParamId::OutputGain | ParamId::OutputMute | ParamId::OutputDelay => Scope::Output,
            ParamId::ReverbGain
            | ParamId::RoomSize
            | ParamId::Damping
            | ParamId::Predelay
            | ParamId::LowCut
            | ParamId::HighCut => Scope::Reverb,
            ParamId::MasterGain
            | ParamId::StageWidth
            | ParamId::StageDepth
            | ParamId::SpeakerSpacing
            | ParamId::ClusterCount => Scope::Config,
        }
    }

    /// Wire name, unique within a scope.
    pub fn name(self) -> &'static str {
        match self {
            ParamId::PositionX => "positionX",
            ParamId::PositionY => "positionY",
            ParamId::PositionZ => "positionZ",
            ParamId::InputGain => "gain",
            ParamId::InputMute => "mute",
            ParamId::Attenuation => "attenuation",
            ParamId::Doppler => "doppler",
            ParamId::Spread => "spread",
            ParamId::ReverbSend => "reverbSend",
            ParamId::TrackingId => "trackingId",
            ParamId::OutputGain => "gain",
            ParamId::OutputMute => "mute",
            ParamId::OutputDelay => "delay",
            ParamId::ReverbGain => "gain",
            ParamId::RoomSize => "roomSize",
            ParamId::Damping => "damping",
            ParamId::Predelay => "predelay",
            ParamId::LowCut => "lowCut",
            ParamId::HighCut => "highCut",
            ParamId::MasterGain => "masterGain",
            ParamId::StageWidth => "stageWidth",
            ParamId::StageDepth => "stageDepth",
            ParamId::SpeakerSpacing => "speakerSpacing",
            ParamId::ClusterCount => "clusterCount",
        }
    }

    pub fn channelled(self) -> bool {
        self.scope() != Scope::Config
    }

    pub fn default_value(self) -> f32 {
        match self {
            ParamId::InputGain | ParamId::OutputGain | ParamId::ReverbGain => 0.0,
            ParamId::TrackingId => TRACKING_UNASSIGNED,
            ParamId::RoomSize => 0.5,
            ParamId::Damping => 0.5,
            ParamId::LowCut => 20.0,
            ParamId::HighCut => 20_000.0,
            ParamId::StageWidth => 20.0,
            ParamId::StageDepth => 12.0,
            ParamId::SpeakerSpacing => 0.2,
            ParamId::ClusterCount => 1.0,
            _ => 0.0,
        }
    }

    pub fn from_wire(scope: Scope, name: &str) -> Option<Self> {
        ALL_PARAMS
            .iter()
            .copied()
            .find(|p| p.scope() == scope && p.name() == name)
    }
}

/// Narrow accessor over the host's parameter tree. The networking core
/// never touches the store through anything wider than this.
pub trait ParameterStore: Send + Sync {
    fn get(&self, id: ParamId, channel: u16) -> f32;
    fn set(&self, id: ParamId, channel: u16, value: f32);
}

pub type SharedStore = Arc<dyn ParameterStore>;
