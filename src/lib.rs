//! micemu - Émulation du sous-système micro d'une console
//!
//! Capture audio de l'hôte, transcodage au format attendu par le guest et
//! livraison cadencée sur le temps émulé.

pub mod audio;
pub mod config;
pub mod ipc;
pub mod mic;
pub mod pipeline;
