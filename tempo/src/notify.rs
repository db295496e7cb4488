//! Sound and desktop alert side effects.

use async_trait::async_trait;
use std::sync::Mutex;
use tempo_ipc::SoundId;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to send notification: {0}")]
    Backend(String),
}

/// Opaque sound and alert capability.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn play_sound(&self, sound: SoundId, looped: bool, volume: u8) -> Result<(), NotifyError>;

    async fn stop_sound(&self) -> Result<(), NotifyError>;

    async fn show_alert(&self, title: &str, message: &str) -> Result<(), NotifyError>;
}

/// Shows alerts through the desktop notification daemon.
///
/// Audio playback is outside this crate: sound requests are logged and the
/// latest one is remembered so a player can pick it up.
pub struct DesktopNotifier {
    app_name: String,
    last_sound: Mutex<Option<(SoundId, u8)>>,
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            last_sound: Mutex::new(None),
        }
    }

    pub fn last_sound(&self) -> Option<(SoundId, u8)> {
        *self.last_sound.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl NotificationPort for DesktopNotifier {
    async fn play_sound(&self, sound: SoundId, looped: bool, volume: u8) -> Result<(), NotifyError> {
        if sound.is_silent() {
            return Ok(());
        }
        info!(?sound, looped, volume, "playing sound");
        *self.last_sound.lock().unwrap_or_else(|p| p.into_inner()) = Some((sound, volume));
        Ok(())
    }

    async fn stop_sound(&self) -> Result<(), NotifyError> {
        if self.last_sound.lock().unwrap_or_else(|p| p.into_inner()).take().is_some() {
            debug!("sound stopped");
        }
        Ok(())
    }

    async fn show_alert(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let app_name = self.app_name.clone();
        let title = title.to_string();
        let message = message.to_string();
        // notify-rust blocks on the session bus
        tokio::task::spawn_blocking(move || {
            notify_rust::Notification::new()
                .summary(&title)
                .body(&message)
                .appname(&app_name)
                .show()
                .map(drop)
                .map_err(|e| NotifyError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| NotifyError::Backend(e.to_string()))?
    }
}
