//! Types exposés au guest : signaux, attributs, formats et codes de retour

use super::handler::ByteOrder;
use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Types de signal actifs sur un micro
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SignalTypes: u8 {
        const DSP = 1;
        const AUX = 2;
        const RAW = 4;
    }
}

/// Un flux de sortie unique
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Raw,
    Dsp,
    Aux,
}

impl SignalType {
    pub fn flag(self) -> SignalTypes {
        match self {
            SignalType::Raw => SignalTypes::RAW,
            SignalType::Dsp => SignalTypes::DSP,
            SignalType::Aux => SignalTypes::AUX,
        }
    }
}

/// Attributs de périphérique réglables par le guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAttr {
    Led = 9,
    Gain = 10,
    Volume = 201,
    Agc = 202,
    ChannelVolume = 301,
    DspType = 302,
}

impl TryFrom<u32> for DeviceAttr {
    type Error = MicError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            9 => Ok(DeviceAttr::Led),
            10 => Ok(DeviceAttr::Gain),
            201 => Ok(DeviceAttr::Volume),
            202 => Ok(DeviceAttr::Agc),
            301 => Ok(DeviceAttr::ChannelVolume),
            302 => Ok(DeviceAttr::DspType),
            _ => Err(MicError::InvalidParameter),
        }
    }
}

/// Valeurs des attributs (stockées sans effet sur le signal)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAttributes {
    pub gain: u32,
    pub volume: u32,
    pub agc: u32,
    pub channel_volume: [u32; 2],
    pub led: u32,
    pub dsp_type: u32,
}

impl Default for DeviceAttributes {
    fn default() -> Self {
        Self {
            gain: 3,
            volume: 145,
            agc: 0,
            channel_volume: [145, 145],
            led: 0,
            dsp_type: 0,
        }
    }
}

/// Description du format d'un flux
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFormat {
    pub channel_num: u8,
    pub subframe_size: u8,
    pub bit_resolution: u8,
    pub data_type: ByteOrder,
    pub sample_rate: u32,
}

/// Type de périphérique rapporté au guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicType {
    Undefined = -1,
    Unknown = 0,
    EyeToy1 = 1,
    EyeToy2 = 2,
    UsbAudio = 3,
    Bluetooth = 4,
    A2dp = 5,
}

/// États de signal interrogeables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    LocalTalk = 0,
    FarTalk = 1,
    NoiseSuppression = 3,
    Agc = 4,
    MicEnergy = 5,
    SpeakerEnergy = 6,
}

/// Valeur d'un état de signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalStateValue {
    /// Niveau de 0 (silence) à 10 (quelqu'un parle)
    Level(u32),
    Decibels(f32),
    /// Non émulé
    Unknown,
}

/// Erreurs rapportées au guest
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicError {
    #[error("Sous-système micro déjà initialisé")]
    AlreadyInitialized,

    #[error("Sous-système micro non initialisé")]
    NotInitialized,

    #[error("Paramètre invalide")]
    InvalidParameter,

    #[error("Micro déjà ouvert")]
    AlreadyOpen,

    #[error("Micro non ouvert")]
    NotOpen,

    #[error("Micro introuvable")]
    DeviceNotFound,

    #[error("Erreur fatale du backend de capture")]
    Fatal,

    #[error("Périphérique non supporté")]
    DeviceNotSupported,
}

impl MicError {
    /// Code de retour de la console
    pub fn code(self) -> u32 {
        match self {
            MicError::AlreadyInitialized => 0x8014_0101,
            MicError::NotInitialized => 0x8014_0103,
            MicError::InvalidParameter => 0x8014_0104,
            MicError::AlreadyOpen => 0x8014_0106,
            MicError::NotOpen => 0x8014_0107,
            MicError::DeviceNotFound => 0x8014_010e,
            MicError::Fatal => 0x8014_010f,
            MicError::DeviceNotSupported => 0x8014_0110,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_attribute_is_invalid() {
        assert_eq!(DeviceAttr::try_from(301), Ok(DeviceAttr::ChannelVolume));
        assert_eq!(DeviceAttr::try_from(11), Err(MicError::InvalidParameter));
    }

    #[test]
    fn error_codes() {
        assert_eq!(MicError::NotOpen.code(), 0x80140107);
        assert_eq!(MicError::DeviceNotSupported.code(), 0x80140110);
    }

    #[test]
    fn signal_mask_truncates_unknown_bits() {
        let mask = SignalTypes::from_bits_truncate(0xFF);
        assert_eq!(mask, SignalTypes::DSP | SignalTypes::AUX | SignalTypes::RAW);
    }
}
