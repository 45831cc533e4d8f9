//! Files d'événements du guest
//!
//! Le sous-système micro notifie une seule file, retrouvée par sa clé.
//! L'implémentation fournie publie les événements sur un canal broadcast
//! tokio par clé.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Type de message envoyé au guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicCommand {
    /// Un micro est branché
    Attach = 2,
    /// Des données sont disponibles
    Data = 5,
}

/// Message déposé dans une file d'événements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicEvent {
    pub source: u64,
    pub command: MicCommand,
    /// Numéro du micro concerné
    pub data1: u64,
    pub data2: u64,
}

/// Une file d'événements du guest
pub trait EventQueue: Send + Sync {
    fn send(&self, source: u64, command: MicCommand, data1: u64, data2: u64);
}

/// Recherche des files d'événements par clé
pub trait EventQueueLookup: Send + Sync {
    fn find(&self, key: u64) -> Option<Arc<dyn EventQueue>>;
}

impl EventQueue for broadcast::Sender<MicEvent> {
    fn send(&self, source: u64, command: MicCommand, data1: u64, data2: u64) {
        let event = MicEvent {
            source,
            command,
            data1,
            data2,
        };
        // Personne n'écoute : l'événement est perdu, comme sur une file pleine
        if broadcast::Sender::send(self, event).is_err() {
            tracing::trace!("Événement sans destinataire: {:?}", event);
        }
    }
}

/// Files d'événements basées sur des canaux broadcast
#[derive(Default)]
pub struct BroadcastEventQueues {
    queues: RwLock<HashMap<u64, Arc<broadcast::Sender<MicEvent>>>>,
}

impl BroadcastEventQueues {
    /// Capacité d'une file (la file micro de la console en contient 4)
    pub const QUEUE_CAPACITY: usize = 32;

    pub fn new() -> Self {
        Self::default()
    }

    /// Crée (ou rejoint) la file `key` et s'y abonne
    pub fn subscribe(&self, key: u64) -> broadcast::Receiver<MicEvent> {
        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
        queues
            .entry(key)
            .or_insert_with(|| Arc::new(broadcast::channel(Self::QUEUE_CAPACITY).0))
            .subscribe()
    }

    /// Détruit la file `key`
    pub fn destroy(&self, key: u64) {
        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
        queues.remove(&key);
    }
}

impl EventQueueLookup for BroadcastEventQueues {
    fn find(&self, key: u64) -> Option<Arc<dyn EventQueue>> {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        queues
            .get(&key)
            .map(|sender| Arc::clone(sender) as Arc<dyn EventQueue>)
    }
}
