//! The background worker owning all network and audio work for the chat
//! window.
//!
//! The GUI thread never does I/O: it pushes commands into the worker channel
//! and drains UI events on each frame. Replies are queued for speech behind a
//! single consumer, so two rapid replies play back-to-back instead of
//! fighting over the output device and the avatar's speaking state.

use crate::speech::SpeechBridge;
use aituber_core::ChatSession;
use eframe::egui;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Commands from the presentation layer to the worker.
#[derive(Debug)]
pub enum WorkerCommand {
    UserMessage(String),
}

/// Events from the worker back to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Reply(String),
    ChatFailed(String),
}

/// Delivers worker results to the GUI thread: a channel send plus a repaint
/// request, never direct widget access.
#[derive(Clone)]
pub struct UiSink {
    tx: std::sync::mpsc::Sender<UiEvent>,
    repaint: Option<egui::Context>,
}

impl UiSink {
    pub fn new(tx: std::sync::mpsc::Sender<UiEvent>, repaint: Option<egui::Context>) -> Self {
        Self { tx, repaint }
    }

    pub fn send(&self, event: UiEvent) {
        let _ = self.tx.send(event);
        if let Some(ctx) = &self.repaint {
            ctx.request_repaint();
        }
    }
}

/// Runs the command loop: one chat exchange at a time.
pub async fn run(
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    session: ChatSession,
    speech_queue: mpsc::UnboundedSender<String>,
    ui: UiSink,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WorkerCommand::UserMessage(text) => {
                handle_user_message(&session, &speech_queue, &ui, &text).await;
            }
        }
    }
    info!("worker command channel closed");
}

async fn handle_user_message(
    session: &ChatSession,
    speech_queue: &mpsc::UnboundedSender<String>,
    ui: &UiSink,
    text: &str,
) {
    match session.ask(text).await {
        Ok(reply) => {
            ui.send(UiEvent::Reply(reply.clone()));
            // Playback happens behind the queue so the next message is never
            // blocked on audio.
            if speech_queue.send(reply).is_err() {
                error!("speech queue is gone; the reply will not be spoken");
            }
        }
        Err(err) => {
            error!(error = ?err, "chat completion failed");
            ui.send(UiEvent::ChatFailed(err.to_string()));
        }
    }
}

/// Drains queued replies through the speech bridge, serializing playback.
pub async fn run_speech_queue(mut queue: mpsc::UnboundedReceiver<String>, bridge: Arc<SpeechBridge>) {
    while let Some(text) = queue.recv().await {
        if let Err(err) = bridge.speak(&text).await {
            error!(%err, "speech playback failed");
        }
    }
    info!("speech queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use aituber_core::ChatBackend;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct ScriptedBackend {
        reply: Result<String, String>,
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, _preamble: &str, _user_message: &str) -> anyhow::Result<String> {
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(reason) => Err(anyhow!("{reason}")),
            }
        }
    }

    fn session(reply: Result<String, String>) -> ChatSession {
        ChatSession::new(Arc::new(ScriptedBackend { reply }), "persona".into())
    }

    #[tokio::test]
    async fn replies_reach_the_ui_and_the_speech_queue() {
        let (speech_tx, mut speech_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = std::sync::mpsc::channel();
        let ui = UiSink::new(event_tx, None);

        let session = session(Ok("hi there".into()));
        handle_user_message(&session, &speech_tx, &ui, "hello").await;

        assert_eq!(event_rx.try_recv(), Ok(UiEvent::Reply("hi there".into())));
        assert_eq!(speech_rx.try_recv(), Ok("hi there".into()));
    }

    #[tokio::test]
    async fn chat_failures_surface_inline_and_skip_synthesis() {
        let (speech_tx, mut speech_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = std::sync::mpsc::channel();
        let ui = UiSink::new(event_tx, None);

        let session = session(Err("rate limited".into()));
        handle_user_message(&session, &speech_tx, &ui, "hello").await;

        match event_rx.try_recv() {
            Ok(UiEvent::ChatFailed(reason)) => assert!(reason.contains("rate limited")),
            other => panic!("expected a chat failure event, got {other:?}"),
        }
        assert!(
            speech_rx.try_recv().is_err(),
            "no synthesis may be queued for a failed exchange"
        );
    }
}
