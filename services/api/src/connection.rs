//! One browser connection driving one panel at a time.

use crate::protocol::{ClientMessage, ServerMessage};
use panel_core::Command;
use panel_core::session_state::{PanelError, PanelStateMachine, Phase};
use panel_core::speech::TranscriptBuffer;
use panel_service::runtime::PanelFactory;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no interview has been started on this connection")]
    NotStarted,
    #[error(transparent)]
    Panel(#[from] PanelError),
}

struct ActivePanel {
    panel: PanelStateMachine,
    speech: Arc<TranscriptBuffer>,
}

pub struct Connection {
    factory: PanelFactory,
    commands: mpsc::Sender<Command>,
    outbound: mpsc::Sender<ServerMessage>,
    active: Option<ActivePanel>,
}

impl Connection {
    /// Commands of every panel built on this connection go to `commands`;
    /// snapshots and errors go to `outbound`.
    pub fn new(
        factory: PanelFactory,
        commands: mpsc::Sender<Command>,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            factory,
            commands,
            outbound,
            active: None,
        }
    }

    fn active(&self) -> Result<&ActivePanel, GatewayError> {
        self.active.as_ref().ok_or(GatewayError::NotStarted)
    }

    /// Applies one client message, then reports the resulting session or the error.
    pub async fn handle(&mut self, message: ClientMessage) {
        // Transcript streaming is silent; `end` reports once feedback is in.
        let quiet = matches!(
            message,
            ClientMessage::Interim { .. } | ClientMessage::Final { .. } | ClientMessage::End
        );
        match self.apply(message).await {
            Ok(()) if quiet => {}
            Ok(()) => self.send_snapshot().await,
            Err(e) => {
                tracing::debug!("Client message rejected: {}", e);
                self.send(ServerMessage::Error {
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn apply(&mut self, message: ClientMessage) -> Result<(), GatewayError> {
        match message {
            ClientMessage::Start {
                config,
                user_id,
                speech_supported,
            } => {
                if let Some(active) = &self.active {
                    if active.panel.snapshot().await.phase != Phase::Intro {
                        // Let the machine refuse it.
                        return Ok(active.panel.start().await?);
                    }
                    active.panel.abandon().await;
                }
                let speech = Arc::new(if speech_supported {
                    TranscriptBuffer::new()
                } else {
                    TranscriptBuffer::unsupported()
                });
                let user_id = user_id.unwrap_or_else(|| self.factory.config().user_id.clone());
                let panel =
                    self.factory
                        .panel(config, speech.clone(), self.commands.clone(), &user_id);
                let active = self.active.insert(ActivePanel { panel, speech });
                active.panel.start().await?;
            }
            ClientMessage::ToggleCapture => {
                self.active()?.panel.toggle_capture().await?;
            }
            ClientMessage::Interim { text } => self.active()?.speech.push_interim(&text),
            ClientMessage::Final { text } => self.active()?.speech.push_final(&text),
            ClientMessage::SpeechDenied { reason } => self.active()?.speech.deny(reason),
            ClientMessage::End => {
                let panel = self.active()?.panel.clone();
                let outbound = self.outbound.clone();
                // Synthesis can take a while; keep reading so the client can still abandon.
                tokio::spawn(async move {
                    match panel.end().await {
                        Ok(_) => {
                            let session = panel.snapshot().await;
                            let _ = outbound.send(ServerMessage::Session { session }).await;
                        }
                        Err(e) => {
                            let _ = outbound
                                .send(ServerMessage::Error {
                                    message: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }
            ClientMessage::Reset => self.active()?.panel.reset().await?,
            ClientMessage::Abandon => self.active()?.panel.abandon().await,
        }
        Ok(())
    }

    /// Tears down whatever panel is running; called when the socket closes.
    pub async fn close(&mut self) {
        if let Some(active) = self.active.take() {
            active.panel.abandon().await;
            active.panel.settled().await;
        }
    }

    async fn send_snapshot(&self) {
        if let Some(active) = &self.active {
            let session = active.panel.snapshot().await;
            self.send(ServerMessage::Session { session }).await;
        }
    }

    async fn send(&self, message: ServerMessage) {
        if let Err(e) = self.outbound.send(message).await {
            tracing::warn!("Failed to queue message for client: {}", e);
        }
    }
}
