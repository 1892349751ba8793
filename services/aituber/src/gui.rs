//! The chat window: a transcript, an input field, and a send action.

use crate::worker::{UiEvent, WorkerCommand};
use eframe::egui;
use std::sync::mpsc::Receiver;
use tokio::sync::mpsc::UnboundedSender;

enum EntryKind {
    User,
    Assistant,
    Error,
}

struct TranscriptEntry {
    kind: EntryKind,
    text: String,
}

pub struct ChatApp {
    commands: UnboundedSender<WorkerCommand>,
    events: Receiver<UiEvent>,
    input: String,
    transcript: Vec<TranscriptEntry>,
}

impl ChatApp {
    pub fn new(commands: UnboundedSender<WorkerCommand>, events: Receiver<UiEvent>) -> Self {
        Self {
            commands,
            events,
            input: String::new(),
            transcript: Vec::new(),
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            let entry = match event {
                UiEvent::Reply(text) => TranscriptEntry {
                    kind: EntryKind::Assistant,
                    text,
                },
                UiEvent::ChatFailed(reason) => TranscriptEntry {
                    kind: EntryKind::Error,
                    text: reason,
                },
            };
            self.transcript.push(entry);
        }
    }

    fn send_current_input(&mut self) {
        let message = self.input.trim().to_owned();
        if message.is_empty() {
            return;
        }
        self.transcript.push(TranscriptEntry {
            kind: EntryKind::User,
            text: message.clone(),
        });
        if self.commands.send(WorkerCommand::UserMessage(message)).is_err() {
            self.transcript.push(TranscriptEntry {
                kind: EntryKind::Error,
                text: "background worker is gone".into(),
            });
        }
        self.input.clear();
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();

        egui::TopBottomPanel::bottom("input_bar").show(ctx, |ui| {
            ui.add_space(4.0);
            ui.horizontal(|ui| {
                let input = ui.add_sized(
                    [ui.available_width() - 64.0, 24.0],
                    egui::TextEdit::singleline(&mut self.input).hint_text("Say something..."),
                );
                let submitted =
                    input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                if ui.button("Send").clicked() || submitted {
                    self.send_current_input();
                    input.request_focus();
                }
            });
            ui.add_space(4.0);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical()
                .stick_to_bottom(true)
                .auto_shrink([false, false])
                .show(ui, |ui| {
                    for entry in &self.transcript {
                        match entry.kind {
                            EntryKind::User => {
                                ui.label(
                                    egui::RichText::new(format!("You: {}", entry.text)).strong(),
                                );
                            }
                            EntryKind::Assistant => {
                                ui.label(format!("AI: {}", entry.text));
                            }
                            EntryKind::Error => {
                                ui.colored_label(
                                    egui::Color32::from_rgb(220, 80, 80),
                                    format!("AI error: {}", entry.text),
                                );
                            }
                        }
                        ui.add_space(4.0);
                    }
                });
        });
    }
}

/// Window options for the chat front end.
pub fn native_options() -> eframe::NativeOptions {
    eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([420.0, 560.0])
            .with_always_on_top(),
        ..Default::default()
    }
}
