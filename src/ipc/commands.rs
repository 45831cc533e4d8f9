//! Commandes du guest
//!
//! Point d'entrée des appels du guest : validation des paramètres puis
//! application sur le registre de la session, sous son verrou.

use super::events::{EventQueueLookup, MicCommand};
use crate::audio::CaptureBackend;
use crate::config::MicSettings;
use crate::mic::{
    DeviceAttr, InputFormat, MicDevice, MicError, MicRegistry, MicType, SignalState,
    SignalStateValue, SignalType, SignalTypes,
};
use crate::pipeline::{CapturePipeline, EmulatorClock, PipelineStatus, IDLE_WAIT};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Fabrique du backend de capture, appelée à chaque initialisation
pub type BackendFactory = Box<dyn Fn() -> Box<dyn CaptureBackend> + Send + Sync>;

/// Session active : registre et tâche de capture
struct MicSession {
    registry: Arc<Mutex<MicRegistry>>,
    status: Arc<RwLock<PipelineStatus>>,
    task: JoinHandle<()>,
}

/// État du sous-système micro (au plus une session à la fois)
pub struct MicState {
    session: Mutex<Option<MicSession>>,
    backend_factory: BackendFactory,
    clock: Arc<dyn EmulatorClock>,
    event_queues: Arc<dyn EventQueueLookup>,
}

impl MicState {
    pub fn new(
        backend_factory: BackendFactory,
        clock: Arc<dyn EmulatorClock>,
        event_queues: Arc<dyn EventQueueLookup>,
    ) -> Self {
        Self {
            session: Mutex::new(None),
            backend_factory,
            clock,
            event_queues,
        }
    }

    async fn registry(&self) -> Result<Arc<Mutex<MicRegistry>>, MicError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| Arc::clone(&session.registry))
            .ok_or(MicError::NotInitialized)
    }

    /// Vrai si une session est active
    pub async fn is_initialized(&self) -> bool {
        self.session.lock().await.is_some()
    }

    // Initialisation / arrêt

    /// Crée la session et lance la tâche de capture
    pub async fn init(&self, settings: &MicSettings) -> Result<(), MicError> {
        tracing::debug!("init(handler={}, devices={:?})", settings.handler, settings.devices);

        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(MicError::AlreadyInitialized);
        }

        let registry = MicRegistry::from_settings(settings, (self.backend_factory)());
        let registry = Arc::new(Mutex::new(registry));

        let pipeline = CapturePipeline::new(
            Arc::clone(&registry),
            Arc::clone(&self.clock),
            Arc::clone(&self.event_queues),
        );
        let status = pipeline.status();
        let task = tokio::spawn(pipeline.run());

        *session = Some(MicSession {
            registry,
            status,
            task,
        });
        Ok(())
    }

    /// Arrête la tâche de capture et détruit la session
    ///
    /// Bloque jusqu'à ce que la tâche ait fermé tous les micros.
    pub async fn end(&self) -> Result<(), MicError> {
        tracing::debug!("end()");

        let mut session = self.session.lock().await;
        let Some(active) = session.as_ref() else {
            return Err(MicError::NotInitialized);
        };

        if !request_abort(&active.status).await {
            tracing::debug!("Pipeline déjà terminé");
        }

        loop {
            tokio::time::sleep(IDLE_WAIT).await;

            if *active.status.read().await == PipelineStatus::Finished {
                break;
            }
            if active.task.is_finished() {
                tracing::warn!("Tâche de capture terminée sans fermer les micros");
                break;
            }
        }

        *session = None;
        tracing::info!("Session micro terminée");
        Ok(())
    }

    // Ouverture / fermeture

    /// Ouvre un micro en mode DSP seul
    pub async fn open(&self, dev_num: u32, sample_rate: u32) -> Result<(), MicError> {
        tracing::trace!("open(dev_num={}, sample_rate={})", dev_num, sample_rate);

        self.open_with(dev_num, |mic| {
            mic.dsp_sample_rate = sample_rate;
            mic.signal_types = SignalTypes::DSP;
        })
        .await
    }

    /// Ouvre un micro en mode raw + DSP
    pub async fn open_raw(
        &self,
        dev_num: u32,
        sample_rate: u32,
        max_channels: u32,
    ) -> Result<(), MicError> {
        tracing::trace!(
            "open_raw(dev_num={}, sample_rate={}, max_channels={})",
            dev_num,
            sample_rate,
            max_channels
        );
        let channels = channel_count(max_channels)?;

        self.open_with(dev_num, |mic| {
            mic.dsp_sample_rate = sample_rate;
            mic.raw_sample_rate = sample_rate;
            mic.num_channels = channels;
            mic.signal_types = SignalTypes::DSP | SignalTypes::RAW;
        })
        .await
    }

    /// Ouvre un micro avec des paramètres explicites par flux
    pub async fn open_ex(
        &self,
        dev_num: u32,
        raw_sample_rate: u32,
        raw_channels: u32,
        dsp_sample_rate: u32,
        buffer_ms: u32,
        signal_types: SignalTypes,
    ) -> Result<(), MicError> {
        tracing::trace!(
            "open_ex(dev_num={}, raw_sample_rate={}, raw_channels={}, dsp_sample_rate={}, buffer_ms={}, signal_types={:?})",
            dev_num,
            raw_sample_rate,
            raw_channels,
            dsp_sample_rate,
            buffer_ms,
            signal_types
        );
        let channels = channel_count(raw_channels)?;

        self.open_with(dev_num, |mic| {
            mic.raw_sample_rate = raw_sample_rate;
            mic.dsp_sample_rate = dsp_sample_rate;
            mic.num_channels = channels;
            mic.buffer_ms = buffer_ms;
            mic.signal_types = signal_types;
        })
        .await
    }

    async fn open_with<F>(&self, dev_num: u32, configure: F) -> Result<(), MicError>
    where
        F: FnOnce(&mut MicDevice),
    {
        let registry = self.registry().await?;
        let mut registry = registry.lock().await;
        let (mic, backend) = registry.device_mut(dev_num)?;

        if mic.is_opened() {
            return Err(MicError::AlreadyOpen);
        }

        configure(mic);
        mic.open(backend)
    }

    /// Vrai si le micro est ouvert (faux s'il n'existe pas)
    pub async fn is_open(&self, dev_num: u32) -> bool {
        tracing::trace!("is_open(dev_num={})", dev_num);

        let Ok(registry) = self.registry().await else {
            return false;
        };
        let registry = registry.lock().await;
        registry
            .device(dev_num)
            .map(|mic| mic.is_opened())
            .unwrap_or(false)
    }

    /// Les micros configurés sont toujours branchés
    pub async fn is_attached(&self, dev_num: u32) -> bool {
        tracing::trace!("is_attached(dev_num={})", dev_num);
        true
    }

    pub async fn close(&self, dev_num: u32) -> Result<(), MicError> {
        tracing::trace!("close(dev_num={})", dev_num);

        let registry = self.registry().await?;
        let mut registry = registry.lock().await;
        let (mic, backend) = registry.device_mut(dev_num)?;

        if !mic.is_opened() {
            return Err(MicError::NotOpen);
        }

        mic.close(backend);
        Ok(())
    }

    // Démarrage / arrêt

    pub async fn start(&self, dev_num: u32) -> Result<(), MicError> {
        tracing::trace!("start(dev_num={})", dev_num);

        let registry = self.registry().await?;
        let mut registry = registry.lock().await;
        let (mic, backend) = registry.device_mut(dev_num)?;

        if !mic.is_opened() {
            return Err(MicError::NotOpen);
        }

        mic.start(backend)
    }

    /// Comme `start` ; les flags ne sont pas émulés
    pub async fn start_ex(&self, dev_num: u32, flags: u32) -> Result<(), MicError> {
        tracing::debug!("start_ex(dev_num={}, flags={:#x}): flags ignorés", dev_num, flags);
        self.start(dev_num).await
    }

    pub async fn stop(&self, dev_num: u32) -> Result<(), MicError> {
        tracing::trace!("stop(dev_num={})", dev_num);

        let registry = self.registry().await?;
        let mut registry = registry.lock().await;
        let (mic, backend) = registry.device_mut(dev_num)?;

        if !mic.is_opened() {
            return Err(MicError::NotOpen);
        }

        if mic.is_started() {
            mic.stop(backend);
        }
        Ok(())
    }

    // Attributs et états

    /// Lit un attribut ; le volume par canal renvoie les deux canaux
    pub async fn get_device_attr(&self, dev_num: u32, attr: u32) -> Result<(u32, u32), MicError> {
        tracing::trace!("get_device_attr(dev_num={}, attr={})", dev_num, attr);

        let registry = self.registry().await?;
        let registry = registry.lock().await;
        let mic = registry.device(dev_num)?;
        let attrs = &mic.attributes;

        let value = match DeviceAttr::try_from(attr)? {
            DeviceAttr::Led => (attrs.led, 0),
            DeviceAttr::Gain => (attrs.gain, 0),
            DeviceAttr::Volume => (attrs.volume, 0),
            DeviceAttr::Agc => (attrs.agc, 0),
            DeviceAttr::ChannelVolume => (attrs.channel_volume[0], attrs.channel_volume[1]),
            DeviceAttr::DspType => (attrs.dsp_type, 0),
        };
        Ok(value)
    }

    /// Écrit un attribut ; pour le volume par canal `arg1` est le canal
    pub async fn set_device_attr(
        &self,
        dev_num: u32,
        attr: u32,
        arg1: u32,
        arg2: u32,
    ) -> Result<(), MicError> {
        tracing::trace!(
            "set_device_attr(dev_num={}, attr={}, arg1={}, arg2={})",
            dev_num,
            attr,
            arg1,
            arg2
        );

        let registry = self.registry().await?;
        let mut registry = registry.lock().await;
        let (mic, _) = registry.device_mut(dev_num)?;
        let attrs = &mut mic.attributes;

        match DeviceAttr::try_from(attr)? {
            DeviceAttr::ChannelVolume => {
                let channel = attrs
                    .channel_volume
                    .get_mut(arg1 as usize)
                    .ok_or(MicError::InvalidParameter)?;
                *channel = arg2;
            }
            DeviceAttr::Led => attrs.led = arg1,
            DeviceAttr::Gain => attrs.gain = arg1,
            DeviceAttr::Volume => attrs.volume = arg1,
            DeviceAttr::Agc => attrs.agc = arg1,
            DeviceAttr::DspType => attrs.dsp_type = arg1,
        }
        Ok(())
    }

    /// États de signal (valeurs fixes, le traitement n'est pas émulé)
    pub async fn get_signal_state(
        &self,
        dev_num: u32,
        state: SignalState,
    ) -> Result<SignalStateValue, MicError> {
        tracing::trace!("get_signal_state(dev_num={}, state={:?})", dev_num, state);

        let registry = self.registry().await?;
        registry.lock().await.device(dev_num)?;

        let value = match state {
            // Quelqu'un parle probablement
            SignalState::LocalTalk => SignalStateValue::Level(9),
            SignalState::MicEnergy => SignalStateValue::Decibels(40.0),
            SignalState::FarTalk
            | SignalState::NoiseSuppression
            | SignalState::Agc
            | SignalState::SpeakerEnergy => SignalStateValue::Unknown,
        };
        Ok(value)
    }

    pub async fn get_type(&self, dev_num: u32) -> Result<MicType, MicError> {
        tracing::trace!("get_type(dev_num={})", dev_num);
        Ok(MicType::UsbAudio)
    }

    pub async fn get_format_raw(&self, dev_num: u32) -> Result<InputFormat, MicError> {
        self.get_format(dev_num, SignalType::Raw).await
    }

    pub async fn get_format_dsp(&self, dev_num: u32) -> Result<InputFormat, MicError> {
        self.get_format(dev_num, SignalType::Dsp).await
    }

    pub async fn get_format_aux(&self, dev_num: u32) -> Result<InputFormat, MicError> {
        self.get_format(dev_num, SignalType::Aux).await
    }

    /// Format d'un flux (little-endian pour Singstar, big-endian sinon)
    pub async fn get_format(
        &self,
        dev_num: u32,
        signal: SignalType,
    ) -> Result<InputFormat, MicError> {
        tracing::trace!("get_format(dev_num={}, signal={:?})", dev_num, signal);

        let registry = self.registry().await?;
        let registry = registry.lock().await;
        Ok(registry.device(dev_num)?.input_format(signal))
    }

    // Files d'événements

    /// Enregistre la file d'événements et signale chaque micro configuré
    pub async fn set_notify_event_queue(&self, key: u64) -> Result<(), MicError> {
        tracing::trace!("set_notify_event_queue(key={:#x})", key);

        let registry = self.registry().await?;
        let mut registry = registry.lock().await;
        registry.event_queue_key = key;

        match self.event_queues.find(key) {
            Some(queue) => {
                for dev_num in registry.device_numbers() {
                    queue.send(0, MicCommand::Attach, dev_num as u64, 0);
                }
            }
            None => tracing::warn!("File d'événements introuvable: {:#x}", key),
        }
        Ok(())
    }

    /// Variante avec source : un seul événement de branchement
    pub async fn set_notify_event_queue2(&self, key: u64, source: u64) -> Result<(), MicError> {
        tracing::debug!(
            "set_notify_event_queue2(key={:#x}, source={:#x}): source ignorée",
            key,
            source
        );

        let registry = self.registry().await?;
        let mut registry = registry.lock().await;

        match self.event_queues.find(key) {
            Some(queue) => queue.send(0, MicCommand::Attach, 0, 0),
            None => tracing::warn!("File d'événements introuvable: {:#x}", key),
        }
        registry.event_queue_key = key;
        Ok(())
    }

    pub async fn remove_notify_event_queue(&self, key: u64) -> Result<(), MicError> {
        tracing::trace!("remove_notify_event_queue(key={:#x})", key);

        let registry = self.registry().await?;
        registry.lock().await.event_queue_key = 0;
        Ok(())
    }

    // Lecture

    /// Lit le flux DSP
    pub async fn read(&self, dev_num: u32, data: &mut [u8]) -> Result<usize, MicError> {
        self.read_stream(dev_num, SignalType::Dsp, data).await
    }

    pub async fn read_raw(&self, dev_num: u32, data: &mut [u8]) -> Result<usize, MicError> {
        self.read_stream(dev_num, SignalType::Raw, data).await
    }

    pub async fn read_dsp(&self, dev_num: u32, data: &mut [u8]) -> Result<usize, MicError> {
        self.read_stream(dev_num, SignalType::Dsp, data).await
    }

    /// Le flux aux n'est jamais alimenté : toujours 0 octet
    pub async fn read_aux(&self, dev_num: u32, data: &mut [u8]) -> Result<usize, MicError> {
        self.read_stream(dev_num, SignalType::Aux, data).await
    }

    async fn read_stream(
        &self,
        dev_num: u32,
        signal: SignalType,
        data: &mut [u8],
    ) -> Result<usize, MicError> {
        tracing::trace!(
            "read(dev_num={}, signal={:?}, max_bytes={})",
            dev_num,
            signal,
            data.len()
        );

        let registry = self.registry().await?;
        let mut registry = registry.lock().await;
        let (mic, _) = registry.device_mut(dev_num)?;
        mic.read(signal, data)
    }
}

/// Demande l'arrêt du pipeline, sauf s'il est déjà terminé
async fn request_abort(status: &RwLock<PipelineStatus>) -> bool {
    let mut status = status.write().await;
    if *status == PipelineStatus::Finished {
        return false;
    }
    *status = PipelineStatus::Aborting;
    true
}

/// Nombre de canaux demandé par le guest (au moins un)
fn channel_count(channels: u32) -> Result<u8, MicError> {
    match channels {
        0 => Err(MicError::InvalidParameter),
        n => Ok(n.min(u8::MAX as u32) as u8),
    }
}
