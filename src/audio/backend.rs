//! Interface du backend de capture de l'hôte
//!
//! Le coeur ne connaît les micros physiques qu'à travers ce trait : ouverture
//! par nom, démarrage/arrêt, et récupération des échantillons capturés.

use std::fmt;
use thiserror::Error;

/// Identifiant opaque d'un périphérique de capture ouvert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureHandle(pub u32);

impl fmt::Display for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Format de canaux demandé au backend (toujours PCM 16 bits little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFormat {
    Mono16,
    Stereo16,
}

impl ChannelFormat {
    /// Nombre de canaux entrelacés
    pub fn channels(self) -> u16 {
        match self {
            ChannelFormat::Mono16 => 1,
            ChannelFormat::Stereo16 => 2,
        }
    }

    /// Taille d'un échantillon (tous canaux confondus) en octets
    pub fn frame_size(self) -> usize {
        self.channels() as usize * 2
    }
}

/// Erreurs remontées par le backend de capture
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Périphérique de capture introuvable: {0}")]
    DeviceNotFound(String),

    #[error("Erreur de configuration: {0}")]
    ConfigError(String),

    #[error("Erreur de stream: {0}")]
    StreamError(String),

    #[error("Handle de capture inconnu: {0}")]
    InvalidHandle(CaptureHandle),

    #[error("Thread de capture terminé")]
    Disconnected,
}

/// Backend de capture audio de l'hôte
///
/// `capture` écrit exactement `count` échantillons dans `dest`, au format
/// demandé à l'ouverture. L'appelant garantit que `count` ne dépasse pas
/// la valeur rendue par `samples_available`.
#[cfg_attr(test, mockall::automock)]
pub trait CaptureBackend: Send {
    /// Ouvre un périphérique de capture par son nom
    fn open(
        &mut self,
        device_name: &str,
        sample_rate: u32,
        format: ChannelFormat,
        buffer_size: u32,
    ) -> Result<CaptureHandle, CaptureError>;

    /// Ferme le périphérique et libère ses ressources
    fn close(&mut self, handle: CaptureHandle) -> Result<(), CaptureError>;

    /// Démarre la capture
    fn start(&mut self, handle: CaptureHandle) -> Result<(), CaptureError>;

    /// Arrête la capture
    fn stop(&mut self, handle: CaptureHandle) -> Result<(), CaptureError>;

    /// Nombre d'échantillons prêts à être lus
    fn samples_available(&mut self, handle: CaptureHandle) -> Result<u32, CaptureError>;

    /// Copie `count` échantillons capturés dans `dest`
    fn capture(&mut self, handle: CaptureHandle, dest: &mut [u8], count: u32);
}
