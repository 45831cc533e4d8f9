//! Capture audio depuis les microphones de l'hôte
//!
//! Utilise cpal pour la capture cross-platform et ringbuf pour le buffering.
//! Chaque périphérique ouvert vit dans un thread dédié qui possède le stream
//! cpal ; le backend ne garde que le consommateur du ring buffer.

use super::backend::{CaptureBackend, CaptureError, CaptureHandle, ChannelFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::collections::HashMap;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Commandes envoyées au thread de capture
enum StreamCommand {
    Start,
    Stop,
    Close,
}

type Reply = mpsc::Sender<Result<(), CaptureError>>;

/// Un périphérique ouvert côté hôte
struct OpenStream {
    command_tx: mpsc::Sender<(StreamCommand, Reply)>,
    consumer: HeapCons<i16>,
    format: ChannelFormat,
    /// Échantillons dépilés, réutilisé d'une capture à l'autre
    scratch: Vec<i16>,
    thread_handle: Option<JoinHandle<()>>,
}

impl OpenStream {
    fn send(&self, command: StreamCommand) -> Result<(), CaptureError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.command_tx
            .send((command, reply_tx))
            .map_err(|_| CaptureError::Disconnected)?;
        reply_rx.recv().map_err(|_| CaptureError::Disconnected)?
    }
}

/// Backend de capture basé sur cpal
#[derive(Default)]
pub struct CpalBackend {
    streams: HashMap<u32, OpenStream>,
    next_handle: u32,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Liste les périphériques d'entrée disponibles
    pub fn list_devices() -> Vec<String> {
        let host = cpal::default_host();
        host.input_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }

    fn stream_mut(&mut self, handle: CaptureHandle) -> Result<&mut OpenStream, CaptureError> {
        self.streams
            .get_mut(&handle.0)
            .ok_or(CaptureError::InvalidHandle(handle))
    }
}

impl CaptureBackend for CpalBackend {
    fn open(
        &mut self,
        device_name: &str,
        sample_rate: u32,
        format: ChannelFormat,
        buffer_size: u32,
    ) -> Result<CaptureHandle, CaptureError> {
        // Capacité en échantillons i16, tous canaux confondus
        let capacity = (buffer_size as usize / 2).max(format.frame_size());
        let rb = HeapRb::<i16>::new(capacity);
        let (producer, consumer) = rb.split();

        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let name = device_name.to_string();

        let thread_handle = thread::Builder::new()
            .name(format!("mic-capture-{}", device_name))
            .spawn(move || {
                run_capture_thread(name, sample_rate, format, producer, command_rx, ready_tx)
            })
            .map_err(|e| CaptureError::StreamError(e.to_string()))?;

        let mut stream = OpenStream {
            command_tx,
            consumer,
            format,
            scratch: Vec::new(),
            thread_handle: Some(thread_handle),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                join(&mut stream);
                return Err(e);
            }
            Err(_) => {
                join(&mut stream);
                return Err(CaptureError::Disconnected);
            }
        }

        let handle = CaptureHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.streams.insert(handle.0, stream);

        tracing::info!(
            "Périphérique de capture ouvert: {} ({}Hz, {:?}) -> {}",
            device_name,
            sample_rate,
            format,
            handle
        );
        Ok(handle)
    }

    fn close(&mut self, handle: CaptureHandle) -> Result<(), CaptureError> {
        let mut stream = self
            .streams
            .remove(&handle.0)
            .ok_or(CaptureError::InvalidHandle(handle))?;
        let result = stream.send(StreamCommand::Close);
        join(&mut stream);
        result
    }

    fn start(&mut self, handle: CaptureHandle) -> Result<(), CaptureError> {
        self.stream_mut(handle)?.send(StreamCommand::Start)
    }

    fn stop(&mut self, handle: CaptureHandle) -> Result<(), CaptureError> {
        self.stream_mut(handle)?.send(StreamCommand::Stop)
    }

    fn samples_available(&mut self, handle: CaptureHandle) -> Result<u32, CaptureError> {
        let stream = self.stream_mut(handle)?;
        let channels = stream.format.channels() as usize;
        Ok((stream.consumer.occupied_len() / channels) as u32)
    }

    fn capture(&mut self, handle: CaptureHandle, dest: &mut [u8], count: u32) {
        let Ok(stream) = self.stream_mut(handle) else {
            tracing::warn!("Capture sur un handle inconnu: {}", handle);
            return;
        };

        let wanted = count as usize * stream.format.channels() as usize;
        drain_le(&mut stream.consumer, &mut stream.scratch, dest, wanted);
    }
}

/// Dépile jusqu'à `wanted` échantillons vers `dest` en PCM 16 bits
/// little-endian, canaux entrelacés. Retourne le nombre d'échantillons lus.
fn drain_le(
    consumer: &mut HeapCons<i16>,
    scratch: &mut Vec<i16>,
    dest: &mut [u8],
    wanted: usize,
) -> usize {
    let wanted = wanted.min(dest.len() / 2);
    if scratch.len() < wanted {
        scratch.resize(wanted, 0);
    }

    let read = consumer.pop_slice(&mut scratch[..wanted]);
    for (out, sample) in dest.chunks_exact_mut(2).zip(&scratch[..read]) {
        out.copy_from_slice(&sample.to_le_bytes());
    }
    read
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        for (_, mut stream) in self.streams.drain() {
            let _ = stream.send(StreamCommand::Close);
            join(&mut stream);
        }
    }
}

fn join(stream: &mut OpenStream) {
    if let Some(handle) = stream.thread_handle.take() {
        let _ = handle.join();
    }
}

/// Recherche un périphérique d'entrée par nom (vide ou "default" = défaut)
fn find_device(name: &str) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();

    if name.is_empty() || name.eq_ignore_ascii_case("default") {
        return host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()));
    }

    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::ConfigError(e.to_string()))?;

    devices
        .into_iter()
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))
}

fn build_stream(
    name: &str,
    sample_rate: u32,
    format: ChannelFormat,
    mut producer: HeapProd<i16>,
) -> Result<Stream, CaptureError> {
    let device = find_device(name)?;

    let sample_format = device
        .default_input_config()
        .map_err(|e| CaptureError::ConfigError(e.to_string()))?
        .sample_format();

    let stream_config = StreamConfig {
        channels: format.channels(),
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let on_error = |err: cpal::StreamError| {
        tracing::error!("Erreur stream audio: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                // Les échantillons en trop sont perdus si le guest ne lit pas
                let _ = producer.push_slice(data);
            },
            on_error,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    let converted = (sample * i16::MAX as f32)
                        .clamp(i16::MIN as f32, i16::MAX as f32)
                        as i16;
                    let _ = producer.try_push(converted);
                }
            },
            on_error,
            None,
        ),
        other => {
            return Err(CaptureError::ConfigError(format!(
                "format d'échantillon non supporté: {:?}",
                other
            )))
        }
    };

    stream.map_err(|e| CaptureError::StreamError(e.to_string()))
}

/// Boucle du thread de capture (possède le stream cpal)
fn run_capture_thread(
    name: String,
    sample_rate: u32,
    format: ChannelFormat,
    producer: HeapProd<i16>,
    command_rx: mpsc::Receiver<(StreamCommand, Reply)>,
    ready_tx: Reply,
) {
    let stream = match build_stream(&name, sample_rate, format, producer) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    while let Ok((command, reply)) = command_rx.recv() {
        let result = match command {
            StreamCommand::Start => stream
                .play()
                .map_err(|e| CaptureError::StreamError(e.to_string())),
            StreamCommand::Stop => stream
                .pause()
                .map_err(|e| CaptureError::StreamError(e.to_string())),
            StreamCommand::Close => {
                let _ = reply.send(Ok(()));
                break;
            }
        };
        let _ = reply.send(result);
    }

    tracing::debug!("Thread de capture terminé: {}", name);
}
