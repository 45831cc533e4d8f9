//! Configuration des micros émulés

use crate::mic::MicrophoneHandler;

/// Variable d'environnement : famille de micro
pub const HANDLER_ENV: &str = "MICEMU_HANDLER";
/// Variable d'environnement : noms des périphériques, séparés par `;`
pub const DEVICES_ENV: &str = "MICEMU_DEVICES";

/// Configuration lue au démarrage de la session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MicSettings {
    /// Famille de micro émulée
    pub handler: MicrophoneHandler,
    /// Noms des périphériques de capture de l'hôte, séparés par `;`
    pub devices: String,
}

impl MicSettings {
    /// Lit la configuration depuis l'environnement
    ///
    /// Une famille inconnue est ignorée (avec un warning) au profit de `Null`.
    pub fn from_env() -> Self {
        let handler = match std::env::var(HANDLER_ENV) {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                tracing::warn!("{}: {}", HANDLER_ENV, e);
                MicrophoneHandler::Null
            }),
            Err(_) => MicrophoneHandler::Null,
        };

        Self {
            handler,
            devices: std::env::var(DEVICES_ENV).unwrap_or_default(),
        }
    }

    /// Noms des périphériques, sans entrées vides
    pub fn device_list(&self) -> Vec<String> {
        self.devices
            .split(';')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect()
    }
}
