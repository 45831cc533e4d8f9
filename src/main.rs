//! micemu - Démonstration du sous-système micro émulé
//!
//! Ouvre le premier micro configuré, capture pendant une seconde de temps
//! réel et affiche le volume de données livré au guest.

use micemu::audio::{CaptureBackend, CpalBackend};
use micemu::config::{MicSettings, DEVICES_ENV, HANDLER_ENV};
use micemu::ipc::{BroadcastEventQueues, MicCommand, MicState};
use micemu::pipeline::HostClock;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Clé de la file d'événements de démonstration
const EVENT_QUEUE_KEY: u64 = 0x8000_0001;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialiser le logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "micemu=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("micemu v{}", env!("CARGO_PKG_VERSION"));

    let devices = CpalBackend::list_devices();
    tracing::info!("Périphériques de capture détectés: {:?}", devices);

    let settings = MicSettings::from_env();
    if settings.device_list().is_empty() {
        println!("Aucun micro configuré.");
        println!("Définir {} (standard, singstar, real_singstar)", HANDLER_ENV);
        println!("et {} (noms séparés par ';', 'default' accepté).", DEVICES_ENV);
        println!();
        println!("Périphériques de capture:");
        for device in &devices {
            println!("  - {}", device);
        }
        return Ok(());
    }

    let queues = Arc::new(BroadcastEventQueues::new());
    let mut events = queues.subscribe(EVENT_QUEUE_KEY);
    let state = MicState::new(
        Box::new(|| Box::new(CpalBackend::new()) as Box<dyn CaptureBackend>),
        Arc::new(HostClock::new()),
        queues.clone(),
    );

    state.init(&settings).await?;
    state.set_notify_event_queue(EVENT_QUEUE_KEY).await?;

    state.open_raw(0, 48_000, 2).await?;
    state.start(0).await?;

    let format = state.get_format_raw(0).await?;
    tracing::info!("Format raw: {:?}", format);

    let mut buffer = vec![0u8; 64 * 1024];
    let mut total = 0;
    let mut notifications = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);

    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(50), events.recv()).await {
            Ok(Ok(event)) if event.command == MicCommand::Data => {
                notifications += 1;
                total += state.read_raw(event.data1 as u32, &mut buffer).await?;
            }
            Ok(Ok(event)) => tracing::debug!("Événement: {:?}", event),
            Ok(Err(e)) => tracing::warn!("File d'événements: {}", e),
            Err(_) => {}
        }
    }

    println!(
        "{} octets lus en {} notifications ({} Hz, {} canaux)",
        total, notifications, format.sample_rate, format.channel_num
    );

    state.stop(0).await?;
    state.end().await?;
    Ok(())
}
