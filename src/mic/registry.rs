//! Registre des micros d'une session
//!
//! Regroupe le backend de capture, les micros configurés (indexés par leur
//! numéro 0..=255) et la clé de la file d'événements du guest. Tout accès
//! passe par le verrou unique de la session.

use super::device::MicDevice;
use super::handler::MicrophoneHandler;
use super::types::MicError;
use crate::audio::CaptureBackend;
use crate::config::MicSettings;
use std::collections::BTreeMap;

/// Nombre maximal de micros adressables
pub const MAX_DEVICES: usize = 256;

pub struct MicRegistry {
    backend: Box<dyn CaptureBackend>,
    devices: BTreeMap<u8, MicDevice>,
    /// Clé de la file d'événements (0 = aucune)
    pub(crate) event_queue_key: u64,
}

impl MicRegistry {
    pub fn new(backend: Box<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            devices: BTreeMap::new(),
            event_queue_key: 0,
        }
    }

    /// Construit les micros décrits par la configuration
    pub fn from_settings(settings: &MicSettings, backend: Box<dyn CaptureBackend>) -> Self {
        let mut registry = Self::new(backend);
        let names = settings.device_list();

        let Some(first) = names.first() else {
            return registry;
        };

        match settings.handler {
            MicrophoneHandler::Null => {}
            MicrophoneHandler::Standard => {
                if names.len() > MAX_DEVICES {
                    tracing::warn!(
                        "{} micros configurés, seuls les {} premiers sont utilisés",
                        names.len(),
                        MAX_DEVICES
                    );
                }
                for (index, name) in names.iter().take(MAX_DEVICES).enumerate() {
                    registry.insert(
                        index as u8,
                        MicDevice::new(MicrophoneHandler::Standard, vec![name.clone()]),
                    );
                }
            }
            MicrophoneHandler::Singstar => {
                let pair = names.iter().take(2).cloned().collect();
                registry.insert(0, MicDevice::new(MicrophoneHandler::Singstar, pair));
            }
            MicrophoneHandler::RealSingstar => {
                registry.insert(
                    0,
                    MicDevice::new(MicrophoneHandler::RealSingstar, vec![first.clone()]),
                );
            }
        }

        tracing::info!(
            "{} micro(s) configuré(s) en mode {}",
            registry.devices.len(),
            settings.handler
        );
        registry
    }

    pub fn insert(&mut self, dev_num: u8, device: MicDevice) {
        self.devices.insert(dev_num, device);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Numéros des micros configurés, dans l'ordre
    pub fn device_numbers(&self) -> Vec<u8> {
        self.devices.keys().copied().collect()
    }

    pub fn device(&self, dev_num: u32) -> Result<&MicDevice, MicError> {
        u8::try_from(dev_num)
            .ok()
            .and_then(|n| self.devices.get(&n))
            .ok_or(MicError::DeviceNotFound)
    }

    /// Micro et backend, empruntés ensemble
    pub fn device_mut(
        &mut self,
        dev_num: u32,
    ) -> Result<(&mut MicDevice, &mut dyn CaptureBackend), MicError> {
        let device = u8::try_from(dev_num)
            .ok()
            .and_then(|n| self.devices.get_mut(&n))
            .ok_or(MicError::DeviceNotFound)?;
        Ok((device, self.backend.as_mut()))
    }

    /// Capture et transcode une période pour chaque micro démarré
    pub fn process_period(&mut self) {
        for device in self.devices.values_mut() {
            device.process(self.backend.as_mut());
        }
    }

    /// Micros ayant des données non lues sur un flux actif
    pub fn pending_devices(&self) -> Vec<u8> {
        self.devices
            .iter()
            .filter(|(_, device)| device.has_pending_data())
            .map(|(&dev_num, _)| dev_num)
            .collect()
    }

    /// Ferme tous les micros ouverts
    pub fn close_all(&mut self) {
        for device in self.devices.values_mut().filter(|d| d.is_opened()) {
            device.close(self.backend.as_mut());
        }
    }
}
