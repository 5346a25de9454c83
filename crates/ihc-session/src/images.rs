//! Background loading of device-type images.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ihc_protocol::{DeviceType, Header, OutboundCommand};
use ihc_transport::{SendFlags, Transport};
use tokio::sync::mpsc;

use crate::Notification;
use crate::manager::SessionEvents;

/// Fetches one image at a time. A failed load is logged and not retried
/// until the type is queued again by a later listing.
pub(crate) struct ImageLoader<T: Transport> {
    transport: Arc<T>,
    events: Arc<SessionEvents>,
    timeout: Duration,
}

impl<T: Transport> ImageLoader<T> {
    pub(crate) fn new(transport: Arc<T>, events: Arc<SessionEvents>, timeout: Duration) -> Self {
        Self {
            transport,
            events,
            timeout,
        }
    }

    pub(crate) async fn run(self, mut queue: mpsc::UnboundedReceiver<Arc<DeviceType>>) {
        while let Some(device_type) = queue.recv().await {
            if !self.events.is_enabled() {
                break;
            }
            // Queued twice, or loaded since.
            let loaded = self
                .events
                .registry()
                .get(device_type.id)
                .is_some_and(|current| current.is_image_loaded());
            if loaded {
                continue;
            }

            match self.load(&device_type).await {
                Ok(bytes) => {
                    let len = bytes.len();
                    if self.events.registry().set_image(device_type.id, bytes) {
                        tracing::debug!(type_id = device_type.id, len, "type image loaded");
                        self.events.publish(Notification::TypeImageLoaded {
                            type_id: device_type.id,
                        });
                    }
                }
                Err(error) => {
                    tracing::warn!(type_id = device_type.id, %error, "type image failed");
                }
            }
        }
        tracing::debug!("image loader stopped");
    }

    async fn load(&self, device_type: &DeviceType) -> Result<Vec<u8>, String> {
        let filename = device_type
            .image_filename
            .as_deref()
            .ok_or("type has no image")?;

        let command = OutboundCommand::load_type_image(filename);
        self.transport
            .send(command.header(), command.payload(), SendFlags::NONE)
            .await
            .map_err(|e| e.to_string())?;

        let reply = self
            .transport
            .poll(Header::LOAD_TYPE_IMAGE, self.timeout)
            .await
            .ok_or_else(|| format!("no image for {filename} within {:?}", self.timeout))?;

        decode_image(&reply.payload).map_err(|e| format!("{filename}: {e}"))
    }
}

/// Decodes a base64 image payload. Line breaks and other whitespace the
/// server wraps the text with are ignored.
pub(crate) fn decode_image(payload: &[u8]) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: Vec<u8> = payload
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(compact)
}
