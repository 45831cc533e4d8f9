//! Source de temps de l'émulateur
//!
//! Le pipeline ne lit jamais l'horloge système directement : l'émulateur
//! fournit son temps, son état (en marche, en pause, arrêté) et la durée
//! cumulée passée en pause.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// État de l'émulateur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    Running = 0,
    Paused = 1,
    Stopped = 2,
}

impl EmulatorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EmulatorState::Running,
            1 => EmulatorState::Paused,
            _ => EmulatorState::Stopped,
        }
    }
}

/// Horloge et état de l'émulateur vus par le pipeline
pub trait EmulatorClock: Send + Sync {
    /// Temps monotone courant
    fn now(&self) -> Duration;

    /// Durée cumulée passée en pause
    fn pause_time(&self) -> Duration;

    fn state(&self) -> EmulatorState;
}

/// Horloge de l'hôte, avec suivi des pauses
pub struct HostClock {
    origin: Instant,
    state: AtomicU8,
    paused: Mutex<PauseBook>,
}

#[derive(Default)]
struct PauseBook {
    since: Option<Instant>,
    total: Duration,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: AtomicU8::new(EmulatorState::Running as u8),
            paused: Mutex::new(PauseBook::default()),
        }
    }

    pub fn pause(&self) {
        let mut book = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        if book.since.is_none() {
            book.since = Some(Instant::now());
            self.state.store(EmulatorState::Paused as u8, Ordering::SeqCst);
        }
    }

    pub fn resume(&self) {
        let mut book = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(since) = book.since.take() {
            book.total += since.elapsed();
            self.state.store(EmulatorState::Running as u8, Ordering::SeqCst);
        }
    }

    pub fn stop(&self) {
        self.state.store(EmulatorState::Stopped as u8, Ordering::SeqCst);
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatorClock for HostClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn pause_time(&self) -> Duration {
        let book = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        book.total + book.since.map(|s| s.elapsed()).unwrap_or_default()
    }

    fn state(&self) -> EmulatorState {
        EmulatorState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// Horloge pilotée à la main (tests, exécution pas à pas)
///
/// Le temps qui s'écoule pendant une pause est ajouté au temps de pause,
/// comme le fait l'émulateur.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
    pause_us: AtomicU64,
    state: AtomicU8,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Avance le temps de `delta`
    pub fn advance(&self, delta: Duration) {
        let delta_us = delta.as_micros() as u64;
        self.now_us.fetch_add(delta_us, Ordering::SeqCst);
        if self.state() == EmulatorState::Paused {
            self.pause_us.fetch_add(delta_us, Ordering::SeqCst);
        }
    }

    pub fn set_state(&self, state: EmulatorState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl EmulatorClock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.now_us.load(Ordering::SeqCst))
    }

    fn pause_time(&self) -> Duration {
        Duration::from_micros(self.pause_us.load(Ordering::SeqCst))
    }

    fn state(&self) -> EmulatorState {
        EmulatorState::from_u8(self.state.load(Ordering::SeqCst))
    }
}
