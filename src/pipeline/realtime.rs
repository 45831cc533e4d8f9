//! Pipeline de capture temps réel
//!
//! Une tâche unique par session se réveille toutes les 256 échantillons à
//! 48 kHz de temps émulé, vide les périphériques de capture de chaque micro
//! démarré, transcode vers les ring buffers et notifie la file d'événements
//! du guest.

use super::clock::{EmulatorClock, EmulatorState};
use crate::ipc::{EventQueueLookup, MicCommand};
use crate::mic::MicRegistry;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Duration;

/// Échantillons par période
pub const PERIOD_SAMPLES: u64 = 256;
/// Fréquence de référence de la cadence
pub const REFERENCE_RATE: u64 = 48_000;
/// Attente entre deux vérifications quand rien n'est à faire
pub const IDLE_WAIT: Duration = Duration::from_millis(1);

/// Instant de début de la période `index`, relatif au démarrage
pub fn period_start(index: u64) -> Duration {
    Duration::from_micros(index * PERIOD_SAMPLES * 1_000_000 / REFERENCE_RATE)
}

/// État du pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Pipeline en cours d'exécution
    Running,
    /// Émulateur en pause, aucun traitement
    Paused,
    /// Arrêt demandé, pris en compte au prochain tour de boucle
    Aborting,
    /// Micros fermés, tâche terminée
    Finished,
}

/// Résultat d'un tour de boucle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Rien à faire, attendre avant de réessayer
    Idle,
    /// Une période a été traitée
    Period,
    /// Le pipeline est terminé
    Finished,
}

/// Pipeline de capture d'une session
pub struct CapturePipeline {
    registry: Arc<Mutex<MicRegistry>>,
    clock: Arc<dyn EmulatorClock>,
    event_queues: Arc<dyn EventQueueLookup>,
    status: Arc<RwLock<PipelineStatus>>,
    start_time: Duration,
    pause_base: Duration,
    counter: u64,
}

impl CapturePipeline {
    /// Crée un pipeline dont le temps démarre maintenant
    pub fn new(
        registry: Arc<Mutex<MicRegistry>>,
        clock: Arc<dyn EmulatorClock>,
        event_queues: Arc<dyn EventQueueLookup>,
    ) -> Self {
        let start_time = clock.now();
        let pause_base = clock.pause_time();

        Self {
            registry,
            clock,
            event_queues,
            status: Arc::new(RwLock::new(PipelineStatus::Running)),
            start_time,
            pause_base,
            counter: 0,
        }
    }

    /// Statut partagé avec le demandeur de l'arrêt
    pub fn status(&self) -> Arc<RwLock<PipelineStatus>> {
        Arc::clone(&self.status)
    }

    /// Nombre de périodes traitées
    pub fn periods(&self) -> u64 {
        self.counter
    }

    /// Temps émulé écoulé depuis le démarrage, pauses exclues
    fn elapsed(&self) -> Duration {
        let paused = self.clock.pause_time().saturating_sub(self.pause_base);
        self.clock
            .now()
            .saturating_sub(self.start_time)
            .saturating_sub(paused)
    }

    async fn set_status(&self, status: PipelineStatus) {
        let mut current = self.status.write().await;
        if *current != status && *current != PipelineStatus::Aborting {
            *current = status;
        }
    }

    /// Un tour de boucle
    pub async fn tick(&mut self) -> Tick {
        let aborting = *self.status.read().await == PipelineStatus::Aborting;
        let state = self.clock.state();

        if aborting || state == EmulatorState::Stopped {
            self.shutdown().await;
            return Tick::Finished;
        }

        if state == EmulatorState::Paused {
            self.set_status(PipelineStatus::Paused).await;
            return Tick::Idle;
        }
        self.set_status(PipelineStatus::Running).await;

        if period_start(self.counter) >= self.elapsed() {
            return Tick::Idle;
        }
        self.counter += 1;

        let mut registry = self.registry.lock().await;
        registry.process_period();

        if registry.event_queue_key == 0 {
            return Tick::Period;
        }
        let Some(queue) = self.event_queues.find(registry.event_queue_key) else {
            return Tick::Period;
        };

        for dev_num in registry.pending_devices() {
            queue.send(0, MicCommand::Data, dev_num as u64, 0);
        }

        Tick::Period
    }

    /// Ferme tous les micros et passe à `Finished`
    async fn shutdown(&mut self) {
        self.registry.lock().await.close_all();
        *self.status.write().await = PipelineStatus::Finished;
        tracing::info!("Pipeline micro arrêté après {} périodes", self.counter);
    }

    /// Boucle de la tâche de capture
    pub async fn run(mut self) {
        tracing::info!("Pipeline micro démarré");

        loop {
            match self.tick().await {
                Tick::Finished => break,
                Tick::Idle => tokio::time::sleep(IDLE_WAIT).await,
                Tick::Period => tokio::task::yield_now().await,
            }
        }
    }
}
