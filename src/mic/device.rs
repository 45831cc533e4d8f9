//! Micro virtuel
//!
//! Machine d'état `fermé → ouvert → démarré → ouvert → fermé`. Un micro
//! possède un ou deux périphériques de capture de l'hôte, leurs buffers de
//! staging et un ring buffer par type de signal.

use super::handler::MicrophoneHandler;
use super::types::{DeviceAttributes, InputFormat, MicError, SignalType, SignalTypes};
use crate::audio::{CaptureBackend, CaptureHandle, ChannelFormat, RingBuffer};

/// Taille du buffer d'entrée par défaut (octets)
pub const DEFAULT_INBUF_SIZE: u32 = 400_000;
/// Fréquence par défaut de tous les flux
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Un périphérique de capture ouvert et son buffer de staging
#[derive(Debug)]
struct CaptureInput {
    handle: CaptureHandle,
    staging: Vec<u8>,
}

/// Micro virtuel exposé au guest
#[derive(Debug)]
pub struct MicDevice {
    handler: MicrophoneHandler,
    device_names: Vec<String>,

    // Paramètres fournis à l'ouverture
    pub(crate) raw_sample_rate: u32,
    pub(crate) dsp_sample_rate: u32,
    pub(crate) aux_sample_rate: u32,
    pub(crate) bit_resolution: u8,
    pub(crate) num_channels: u8,
    pub(crate) signal_types: SignalTypes,
    pub(crate) buffer_ms: u32,
    inbuf_size: u32,

    /// Octets par échantillon, calculé à l'ouverture
    sample_size: u32,

    opened: bool,
    started: bool,

    pub(crate) attributes: DeviceAttributes,

    inputs: [Option<CaptureInput>; 2],
    temp_buf: Vec<u8>,

    rbuf_raw: RingBuffer,
    rbuf_dsp: RingBuffer,
    rbuf_aux: RingBuffer,
}

impl MicDevice {
    /// Crée un micro fermé pour un ou deux noms de périphérique
    pub fn new(handler: MicrophoneHandler, device_names: Vec<String>) -> Self {
        Self {
            handler,
            device_names,
            raw_sample_rate: DEFAULT_SAMPLE_RATE,
            dsp_sample_rate: DEFAULT_SAMPLE_RATE,
            aux_sample_rate: DEFAULT_SAMPLE_RATE,
            bit_resolution: 16,
            num_channels: 2,
            signal_types: SignalTypes::empty(),
            buffer_ms: 0,
            inbuf_size: DEFAULT_INBUF_SIZE,
            sample_size: 0,
            opened: false,
            started: false,
            attributes: DeviceAttributes::default(),
            inputs: [None, None],
            temp_buf: Vec::new(),
            rbuf_raw: RingBuffer::default(),
            rbuf_dsp: RingBuffer::default(),
            rbuf_aux: RingBuffer::default(),
        }
    }

    /// Taille du buffer d'entrée (octets)
    pub fn with_inbuf_size(mut self, inbuf_size: u32) -> Self {
        self.inbuf_size = inbuf_size;
        self
    }

    pub fn handler(&self) -> MicrophoneHandler {
        self.handler
    }

    pub fn device_names(&self) -> &[String] {
        &self.device_names
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn signal_types(&self) -> SignalTypes {
        self.signal_types
    }

    pub fn num_channels(&self) -> u8 {
        self.num_channels
    }

    /// Durée de buffer demandée par le guest (non appliquée)
    pub fn buffer_ms(&self) -> u32 {
        self.buffer_ms
    }

    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    /// Nombre de périphériques physiques ouverts
    pub fn input_count(&self) -> usize {
        self.inputs.iter().flatten().count()
    }

    /// Fréquence de capture demandée à l'hôte
    fn capture_rate(&self) -> u32 {
        if self.signal_types.contains(SignalTypes::RAW) || !self.signal_types.contains(SignalTypes::DSP)
        {
            self.raw_sample_rate
        } else {
            self.dsp_sample_rate
        }
    }

    /// Ouvre le ou les périphériques de capture
    pub fn open(&mut self, backend: &mut dyn CaptureBackend) -> Result<(), MicError> {
        self.num_channels = self.handler.clamp_channels(self.num_channels);

        let format = if self.num_channels == 2 && self.handler != MicrophoneHandler::Singstar {
            ChannelFormat::Stereo16
        } else {
            ChannelFormat::Mono16
        };

        let primary_name = self
            .device_names
            .first()
            .ok_or(MicError::DeviceNotSupported)?;

        let handle = backend
            .open(primary_name, self.capture_rate(), format, self.inbuf_size)
            .map_err(|e| {
                tracing::error!(
                    "Erreur d'ouverture du périphérique de capture {}: {}",
                    primary_name,
                    e
                );
                MicError::DeviceNotSupported
            })?;

        let inbuf_size = self.inbuf_size as usize;
        self.inputs[0] = Some(CaptureInput {
            handle,
            staging: vec![0; inbuf_size],
        });
        self.temp_buf = vec![0; inbuf_size];

        if self.signal_types.contains(SignalTypes::RAW) {
            self.rbuf_raw.set_capacity(inbuf_size);
        }
        if self.signal_types.contains(SignalTypes::DSP) {
            self.rbuf_dsp.set_capacity(inbuf_size);
        }
        if self.signal_types.contains(SignalTypes::AUX) {
            self.rbuf_aux.set_capacity(inbuf_size);
        }

        if self.handler == MicrophoneHandler::Singstar {
            if let Some(second_name) = self.device_names.get(1) {
                match backend.open(
                    second_name,
                    self.capture_rate(),
                    ChannelFormat::Mono16,
                    self.inbuf_size,
                ) {
                    Ok(handle) => {
                        self.inputs[1] = Some(CaptureInput {
                            handle,
                            staging: vec![0; inbuf_size],
                        });
                    }
                    Err(e) => {
                        tracing::error!(
                            "Erreur d'ouverture du second micro Singstar {}: {}",
                            second_name,
                            e
                        );
                    }
                }
            }
        }

        self.sample_size = (self.bit_resolution as u32 / 8) * self.num_channels as u32;
        self.opened = true;

        tracing::debug!(
            "Micro ouvert: {:?} ({}, {} périphérique(s), {} octets/échantillon)",
            self.device_names,
            self.handler,
            self.input_count(),
            self.sample_size
        );
        Ok(())
    }

    /// Ferme le micro, en l'arrêtant d'abord si nécessaire
    pub fn close(&mut self, backend: &mut dyn CaptureBackend) {
        if self.started {
            self.stop(backend);
        }

        for input in self.inputs.iter_mut().filter_map(Option::take) {
            if let Err(e) = backend.close(input.handle) {
                tracing::error!("Erreur de fermeture du périphérique de capture: {}", e);
            }
        }

        self.temp_buf = Vec::new();
        self.rbuf_raw = RingBuffer::default();
        self.rbuf_dsp = RingBuffer::default();
        self.rbuf_aux = RingBuffer::default();

        self.opened = false;
        tracing::debug!("Micro fermé: {:?}", self.device_names);
    }

    /// Démarre la capture sur tous les périphériques ouverts
    pub fn start(&mut self, backend: &mut dyn CaptureBackend) -> Result<(), MicError> {
        let handles: Vec<CaptureHandle> = self.inputs.iter().flatten().map(|i| i.handle).collect();

        for handle in handles {
            if let Err(e) = backend.start(handle) {
                tracing::error!("Erreur de démarrage de la capture: {}", e);
                self.stop(backend);
                return Err(MicError::Fatal);
            }
        }

        self.started = true;
        Ok(())
    }

    /// Arrête la capture (les erreurs du backend sont seulement loggées)
    pub fn stop(&mut self, backend: &mut dyn CaptureBackend) {
        for input in self.inputs.iter().flatten() {
            if let Err(e) = backend.stop(input.handle) {
                tracing::error!("Erreur d'arrêt de la capture: {}", e);
            }
        }

        self.started = false;
    }

    /// Vide les périphériques de capture dans les buffers de staging
    ///
    /// Retourne le nombre d'échantillons récupérés, identique pour tous les
    /// périphériques. Une erreur du backend compte comme zéro échantillon.
    pub fn capture(&mut self, backend: &mut dyn CaptureBackend) -> u32 {
        if self.sample_size == 0 {
            return 0;
        }

        let mut num_samples = self.inbuf_size / self.sample_size;

        for input in self.inputs.iter().flatten() {
            match backend.samples_available(input.handle) {
                Ok(available) => num_samples = num_samples.min(available),
                Err(e) => {
                    tracing::error!("Erreur de lecture du nombre d'échantillons capturés: {}", e);
                    return 0;
                }
            }
        }

        if num_samples == 0 {
            return 0;
        }

        for input in self.inputs.iter_mut().flatten() {
            backend.capture(input.handle, &mut input.staging, num_samples);
        }

        num_samples
    }

    /// Transcode les échantillons de staging vers le ring buffer du signal
    pub fn transcode(&mut self, signal: SignalType, num_samples: u32) {
        let len = (num_samples * self.sample_size) as usize;
        let Some(primary) = self.inputs[0].as_ref() else {
            return;
        };
        let secondary = self.inputs[1].as_ref().map(|i| i.staging.as_slice());
        let out = &mut self.temp_buf[..len];

        self.handler
            .transcode(&primary.staging, secondary, self.bit_resolution, out);

        let rbuf = match signal {
            SignalType::Raw => &mut self.rbuf_raw,
            SignalType::Dsp => &mut self.rbuf_dsp,
            SignalType::Aux => &mut self.rbuf_aux,
        };
        rbuf.write(out);
    }

    /// Traite une période : capture puis écriture des flux raw et DSP
    pub fn process(&mut self, backend: &mut dyn CaptureBackend) {
        if !self.opened || !self.started || self.signal_types.is_empty() {
            return;
        }

        let num_samples = self.capture(backend);
        if num_samples == 0 {
            return;
        }

        if self.signal_types.contains(SignalTypes::RAW) {
            self.transcode(SignalType::Raw, num_samples);
        }
        if self.signal_types.contains(SignalTypes::DSP) {
            self.transcode(SignalType::Dsp, num_samples);
        }
    }

    /// Vrai si un flux actif contient des données non lues
    pub fn has_pending_data(&self) -> bool {
        self.opened
            && self.started
            && ((self.signal_types.contains(SignalTypes::RAW) && !self.rbuf_raw.is_empty())
                || (self.signal_types.contains(SignalTypes::DSP) && !self.rbuf_dsp.is_empty()))
    }

    /// Lit un flux ; `NotOpen` si le micro est fermé ou le signal inactif
    pub fn read(&mut self, signal: SignalType, dest: &mut [u8]) -> Result<usize, MicError> {
        if !self.opened || !self.signal_types.contains(signal.flag()) {
            return Err(MicError::NotOpen);
        }

        let rbuf = match signal {
            SignalType::Raw => &mut self.rbuf_raw,
            SignalType::Dsp => &mut self.rbuf_dsp,
            SignalType::Aux => &mut self.rbuf_aux,
        };
        Ok(rbuf.read(dest))
    }

    /// Format du flux tel que vu par le guest
    ///
    /// Raw et DSP sont alimentés par la même capture : ils annoncent la
    /// fréquence à laquelle le périphérique de l'hôte a été ouvert.
    pub fn input_format(&self, signal: SignalType) -> InputFormat {
        let sample_rate = match signal {
            SignalType::Raw | SignalType::Dsp => self.capture_rate(),
            SignalType::Aux => self.aux_sample_rate,
        };

        InputFormat {
            channel_num: self.num_channels,
            subframe_size: self.bit_resolution / 8,
            bit_resolution: self.bit_resolution,
            data_type: self.handler.byte_order(),
            sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::handler::ByteOrder;
    use super::*;
    use crate::audio::{CaptureError, MockCaptureBackend};
    use mockall::predicate::*;

    fn standard(signal_types: SignalTypes) -> MicDevice {
        let mut mic = MicDevice::new(MicrophoneHandler::Standard, vec!["testmic".into()]);
        mic.signal_types = signal_types;
        mic
    }

    #[test]
    fn open_failure_is_device_not_supported() {
        let mut backend = MockCaptureBackend::new();
        backend
            .expect_open()
            .returning(|name, _, _, _| Err(CaptureError::DeviceNotFound(name.to_string())));

        let mut mic = standard(SignalTypes::RAW);
        assert_eq!(mic.open(&mut backend), Err(MicError::DeviceNotSupported));
        assert!(!mic.is_opened());
    }

    #[test]
    fn open_requests_stereo_at_raw_rate() {
        let mut backend = MockCaptureBackend::new();
        backend
            .expect_open()
            .with(eq("testmic"), eq(32_000), eq(ChannelFormat::Stereo16), eq(DEFAULT_INBUF_SIZE))
            .times(1)
            .returning(|_, _, _, _| Ok(CaptureHandle(7)));

        let mut mic = standard(SignalTypes::RAW | SignalTypes::DSP);
        mic.raw_sample_rate = 32_000;
        mic.num_channels = 4;
        mic.open(&mut backend).unwrap();

        assert!(mic.is_opened());
        assert_eq!(mic.num_channels(), 2);
        assert_eq!(mic.sample_size(), 4);
    }

    #[test]
    fn singstar_tolerates_missing_second_mic() {
        let mut backend = MockCaptureBackend::new();
        backend
            .expect_open()
            .with(eq("mic-a"), always(), eq(ChannelFormat::Mono16), always())
            .returning(|_, _, _, _| Ok(CaptureHandle(1)));
        backend
            .expect_open()
            .with(eq("mic-b"), always(), eq(ChannelFormat::Mono16), always())
            .returning(|_, _, _, _| Err(CaptureError::StreamError("busy".into())));

        let mut mic = MicDevice::new(
            MicrophoneHandler::Singstar,
            vec!["mic-a".into(), "mic-b".into()],
        );
        mic.signal_types = SignalTypes::RAW;
        mic.num_channels = 1;
        mic.open(&mut backend).unwrap();

        assert_eq!(mic.input_count(), 1);
        assert_eq!(mic.num_channels(), 2);
        assert_eq!(mic.sample_size(), 4);
    }

    #[test]
    fn start_failure_stops_and_is_fatal() {
        let mut backend = MockCaptureBackend::new();
        backend
            .expect_open()
            .returning(|_, _, _, _| Ok(CaptureHandle(3)));
        backend
            .expect_start()
            .returning(|_| Err(CaptureError::StreamError("no clock".into())));
        backend.expect_stop().times(1).returning(|_| Ok(()));

        let mut mic = standard(SignalTypes::DSP);
        mic.open(&mut backend).unwrap();

        assert_eq!(mic.start(&mut backend), Err(MicError::Fatal));
        assert!(!mic.is_started());
    }

    #[test]
    fn second_mic_start_failure_stops_both() {
        let mut backend = MockCaptureBackend::new();
        let mut seq = mockall::Sequence::new();
        backend
            .expect_open()
            .returning(|name, _, _, _| match name {
                "mic-a" => Ok(CaptureHandle(1)),
                _ => Ok(CaptureHandle(2)),
            });
        backend
            .expect_start()
            .with(eq(CaptureHandle(1)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        backend
            .expect_start()
            .with(eq(CaptureHandle(2)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(CaptureError::StreamError("busy".into())));
        backend
            .expect_stop()
            .with(eq(CaptureHandle(1)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        backend
            .expect_stop()
            .with(eq(CaptureHandle(2)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut mic = MicDevice::new(
            MicrophoneHandler::Singstar,
            vec!["mic-a".into(), "mic-b".into()],
        );
        mic.signal_types = SignalTypes::RAW;
        mic.open(&mut backend).unwrap();
        assert_eq!(mic.input_count(), 2);

        assert_eq!(mic.start(&mut backend), Err(MicError::Fatal));
        assert!(!mic.is_started());
        assert!(mic.is_opened());
    }

    #[test]
    fn close_while_started_stops_first() {
        let mut backend = MockCaptureBackend::new();
        let mut seq = mockall::Sequence::new();
        backend
            .expect_open()
            .returning(|_, _, _, _| Ok(CaptureHandle(3)));
        backend.expect_start().returning(|_| Ok(()));
        backend
            .expect_stop()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(CaptureError::Disconnected));
        backend
            .expect_close()
            .with(eq(CaptureHandle(3)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut mic = standard(SignalTypes::DSP);
        mic.open(&mut backend).unwrap();
        mic.start(&mut backend).unwrap();
        mic.close(&mut backend);

        assert!(!mic.is_started());
        assert!(!mic.is_opened());
        assert_eq!(mic.input_count(), 0);
        assert_eq!(mic.rbuf_dsp.capacity(), 0);
        assert!(mic.temp_buf.is_empty());
    }

    #[test]
    fn sample_count_error_yields_no_data() {
        let mut backend = MockCaptureBackend::new();
        backend
            .expect_open()
            .returning(|_, _, _, _| Ok(CaptureHandle(0)));
        backend.expect_start().returning(|_| Ok(()));
        backend
            .expect_samples_available()
            .returning(|_| Err(CaptureError::Disconnected));
        backend.expect_capture().never();

        let mut mic = standard(SignalTypes::RAW);
        mic.open(&mut backend).unwrap();
        mic.start(&mut backend).unwrap();
        mic.process(&mut backend);

        assert!(!mic.has_pending_data());
    }

    #[test]
    fn process_byte_swaps_into_raw_and_dsp() {
        let mut backend = MockCaptureBackend::new();
        backend
            .expect_open()
            .returning(|_, _, _, _| Ok(CaptureHandle(0)));
        backend.expect_start().returning(|_| Ok(()));
        backend.expect_samples_available().returning(|_| Ok(2));
        backend.expect_capture().returning(|_, dest, count| {
            for (i, b) in dest[..count as usize * 4].iter_mut().enumerate() {
                *b = i as u8;
            }
        });

        let mut mic = standard(SignalTypes::RAW | SignalTypes::DSP);
        mic.open(&mut backend).unwrap();
        mic.start(&mut backend).unwrap();
        mic.process(&mut backend);
        assert!(mic.has_pending_data());

        let mut raw = [0u8; 16];
        assert_eq!(mic.read(SignalType::Raw, &mut raw), Ok(8));
        assert_eq!(&raw[..8], &[1, 0, 3, 2, 5, 4, 7, 6]);

        let mut dsp = [0u8; 16];
        assert_eq!(mic.read(SignalType::Dsp, &mut dsp), Ok(8));
        assert_eq!(&dsp[..8], &raw[..8]);
        assert!(!mic.has_pending_data());
    }

    #[test]
    fn read_requires_enabled_signal() {
        let mut backend = MockCaptureBackend::new();
        backend
            .expect_open()
            .returning(|_, _, _, _| Ok(CaptureHandle(0)));

        let mut mic = standard(SignalTypes::DSP);
        let mut buf = [0u8; 4];
        assert_eq!(mic.read(SignalType::Dsp, &mut buf), Err(MicError::NotOpen));

        mic.open(&mut backend).unwrap();
        assert_eq!(mic.read(SignalType::Dsp, &mut buf), Ok(0));
        assert_eq!(mic.read(SignalType::Raw, &mut buf), Err(MicError::NotOpen));
    }

    #[test]
    fn input_format_byte_order_follows_handler() {
        let standard = standard(SignalTypes::RAW);
        let format = standard.input_format(SignalType::Raw);
        assert_eq!(format.data_type, ByteOrder::Big);
        assert_eq!(format.subframe_size, 2);
        assert_eq!(format.sample_rate, DEFAULT_SAMPLE_RATE);

        let singstar = MicDevice::new(MicrophoneHandler::Singstar, vec!["a".into()]);
        assert_eq!(singstar.input_format(SignalType::Dsp).data_type, ByteOrder::Little);
    }

    #[test]
    fn dsp_format_reports_capture_rate() {
        let mut backend = MockCaptureBackend::new();
        backend
            .expect_open()
            .with(eq("testmic"), eq(44_100), always(), always())
            .times(1)
            .returning(|_, _, _, _| Ok(CaptureHandle(0)));

        let mut mic = standard(SignalTypes::RAW | SignalTypes::DSP);
        mic.raw_sample_rate = 44_100;
        mic.dsp_sample_rate = 16_000;
        mic.open(&mut backend).unwrap();

        assert_eq!(mic.input_format(SignalType::Raw).sample_rate, 44_100);
        assert_eq!(mic.input_format(SignalType::Dsp).sample_rate, 44_100);
        assert_eq!(mic.input_format(SignalType::Aux).sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn dsp_only_format_reports_dsp_rate() {
        let mut backend = MockCaptureBackend::new();
        backend
            .expect_open()
            .with(eq("testmic"), eq(16_000), always(), always())
            .times(1)
            .returning(|_, _, _, _| Ok(CaptureHandle(0)));

        let mut mic = standard(SignalTypes::DSP);
        mic.dsp_sample_rate = 16_000;
        mic.open(&mut backend).unwrap();

        assert_eq!(mic.input_format(SignalType::Dsp).sample_rate, 16_000);
    }
}
