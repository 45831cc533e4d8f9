//! Familles de micros et transcodage des échantillons capturés
//!
//! Le backend livre du PCM little-endian. Chaque famille transforme les
//! buffers de staging vers le format attendu par le guest :
//! - `Standard` : conversion big-endian sous-trame par sous-trame
//! - `Singstar` : deux micros physiques mélangés comme deux canaux
//! - `RealSingstar` : copie directe

use std::fmt;
use std::str::FromStr;

/// Famille de micro émulée
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MicrophoneHandler {
    /// Aucun micro configuré
    #[default]
    Null,
    /// Micro générique, un périphérique physique
    Standard,
    /// Paire de micros physiques présentée comme un micro stéréo
    Singstar,
    /// Vrai périphérique Singstar, données transmises telles quelles
    RealSingstar,
}

impl MicrophoneHandler {
    /// Force le nombre de canaux supporté par la famille
    ///
    /// La capture est limitée à la stéréo ; un Singstar a toujours deux
    /// canaux, un par micro physique.
    pub fn clamp_channels(self, channels: u8) -> u8 {
        if self == MicrophoneHandler::Singstar || channels > 2 {
            2
        } else {
            channels
        }
    }

    /// Ordre des octets livrés au guest
    pub fn byte_order(self) -> ByteOrder {
        match self {
            MicrophoneHandler::Singstar | MicrophoneHandler::RealSingstar => ByteOrder::Little,
            MicrophoneHandler::Null | MicrophoneHandler::Standard => ByteOrder::Big,
        }
    }

    /// Transcode `out.len()` octets depuis les buffers de staging
    ///
    /// `secondary` n'est utilisé que par la famille `Singstar`.
    pub fn transcode(
        self,
        primary: &[u8],
        secondary: Option<&[u8]>,
        bit_resolution: u8,
        out: &mut [u8],
    ) {
        match self {
            MicrophoneHandler::RealSingstar => copy_raw(primary, out),
            MicrophoneHandler::Standard | MicrophoneHandler::Null => {
                swap_subframes(primary, (bit_resolution / 8) as usize, out)
            }
            MicrophoneHandler::Singstar => mix_dual(primary, secondary, out),
        }
    }
}

impl fmt::Display for MicrophoneHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MicrophoneHandler::Null => "Null",
            MicrophoneHandler::Standard => "Standard",
            MicrophoneHandler::Singstar => "Singstar",
            MicrophoneHandler::RealSingstar => "Real Singstar",
        };
        f.write_str(name)
    }
}

impl FromStr for MicrophoneHandler {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "null" | "none" => Ok(MicrophoneHandler::Null),
            "standard" => Ok(MicrophoneHandler::Standard),
            "singstar" => Ok(MicrophoneHandler::Singstar),
            "real_singstar" => Ok(MicrophoneHandler::RealSingstar),
            other => Err(format!("type de micro inconnu: {}", other)),
        }
    }
}

/// Ordre des octets d'une sous-trame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little = 0,
    Big = 1,
}

/// Copie octet pour octet
pub fn copy_raw(src: &[u8], out: &mut [u8]) {
    out.copy_from_slice(&src[..out.len()]);
}

/// Inverse l'ordre des octets de chaque sous-trame de `width` octets
///
/// Seules les sous-trames de 2 et 4 octets sont converties ; les autres
/// largeurs sont copiées telles quelles.
pub fn swap_subframes(src: &[u8], width: usize, out: &mut [u8]) {
    let src = &src[..out.len()];
    match width {
        2 | 4 => {
            for (dst, sub) in out.chunks_exact_mut(width).zip(src.chunks_exact(width)) {
                for (d, s) in dst.iter_mut().zip(sub.iter().rev()) {
                    *d = *s;
                }
            }
        }
        _ => out.copy_from_slice(src),
    }
}

/// Mélange deux flux mono 16 bits en un flux stéréo de 4 octets par échantillon
///
/// Sans second micro, le deuxième canal est rempli de zéros.
pub fn mix_dual(primary: &[u8], secondary: Option<&[u8]>, out: &mut [u8]) {
    debug_assert_eq!(out.len() % 4, 0, "Singstar attend des échantillons de 4 octets");

    for (i, frame) in out.chunks_exact_mut(4).enumerate() {
        frame[..2].copy_from_slice(&primary[2 * i..2 * i + 2]);
        match secondary {
            Some(second) => frame[2..].copy_from_slice(&second[2 * i..2 * i + 2]),
            None => frame[2..].fill(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_16_bit_little_to_big() {
        let src = [0x34, 0x12, 0x78, 0x56];
        let mut out = [0u8; 4];
        swap_subframes(&src, 2, &mut out);
        assert_eq!(out, [0x12, 0x34, 0x56, 0x78]);

        let mut back = [0u8; 4];
        swap_subframes(&out, 2, &mut back);
        assert_eq!(back, src);
    }

    #[test]
    fn swap_32_bit_subframes() {
        let src = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut out = [0u8; 8];
        swap_subframes(&src, 4, &mut out);
        assert_eq!(out, [4, 3, 2, 1, 8, 7, 6, 5]);
    }

    #[test]
    fn dual_mix_interleaves_both_mics() {
        let a = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5];
        let b = [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5];
        let mut out = [0u8; 12];
        mix_dual(&a, Some(&b), &mut out);

        for i in 0..3 {
            assert_eq!(out[4 * i..4 * i + 2], a[2 * i..2 * i + 2]);
            assert_eq!(out[4 * i + 2..4 * i + 4], b[2 * i..2 * i + 2]);
        }
    }

    #[test]
    fn dual_mix_zero_fills_missing_mic() {
        let a = [1, 2, 3, 4];
        let mut out = [0xFFu8; 8];
        mix_dual(&a, None, &mut out);
        assert_eq!(out, [1, 2, 0, 0, 3, 4, 0, 0]);
    }

    #[test]
    fn real_singstar_copies_bytes() {
        let src = [9, 8, 7, 6, 5];
        let mut out = [0u8; 4];
        MicrophoneHandler::RealSingstar.transcode(&src, None, 16, &mut out);
        assert_eq!(out, [9, 8, 7, 6]);
    }

    #[test]
    fn channel_clamping() {
        assert_eq!(MicrophoneHandler::Standard.clamp_channels(1), 1);
        assert_eq!(MicrophoneHandler::Standard.clamp_channels(6), 2);
        assert_eq!(MicrophoneHandler::Singstar.clamp_channels(1), 2);
        assert_eq!(MicrophoneHandler::RealSingstar.clamp_channels(2), 2);
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(
            "real singstar".parse::<MicrophoneHandler>(),
            Ok(MicrophoneHandler::RealSingstar)
        );
        assert_eq!("Standard".parse(), Ok(MicrophoneHandler::Standard));
        assert!("eyetoy".parse::<MicrophoneHandler>().is_err());
        assert_eq!(MicrophoneHandler::RealSingstar.to_string(), "Real Singstar");
    }
}
