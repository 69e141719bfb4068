use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::chat::{Role, SessionChange, SessionController, SessionNotification};
use crate::settings::{SettingsError, SettingsStore};

const HELP: &str = "commands: /stop, /reset, /model <id>, /quit";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("settings failed on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
}

pub type AppResult<T> = Result<T, AppError>;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Stop,
    Reset,
    Model(String),
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };

        let (name, argument) = command
            .split_once(char::is_whitespace)
            .map(|(name, argument)| (name, argument.trim()))
            .unwrap_or((command, ""));

        match name {
            "stop" => Self::Stop,
            "reset" | "clear" => Self::Reset,
            "model" if !argument.is_empty() => Self::Model(argument.to_string()),
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Open model line: which message it echoes and how many bytes are on screen.
#[derive(Debug, Clone, Copy)]
struct EchoCursor {
    index: usize,
    printed: usize,
}

/// Drives a [`SessionController`] from line input and echoes history to `out`.
pub struct TerminalApp<W> {
    controller: SessionController,
    notifications: broadcast::Receiver<SessionNotification>,
    settings: SettingsStore,
    out: W,
    cursor: Option<EchoCursor>,
}

impl<W> TerminalApp<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(controller: SessionController, settings: SettingsStore, out: W) -> Self {
        let notifications = controller.subscribe();
        Self {
            controller,
            notifications,
            settings,
            out,
            cursor: None,
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn into_output(self) -> W {
        self.out
    }

    pub async fn run<R>(&mut self, input: R) -> AppResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        self.print_history().await?;
        let mut lines = input.lines();

        loop {
            let streaming = self.controller.active_handle().is_some();
            let flow = tokio::select! {
                line = lines.next_line() => {
                    match line.context(ReadInputSnafu { stage: "read-input-line" })? {
                        Some(line) => self.handle_line(&line).await?,
                        None => Flow::Quit,
                    }
                }
                // Rendering is driven by the notifications this publishes.
                _ = self.controller.next_change(), if streaming => Flow::Continue,
            };

            self.render_notifications().await?;
            if flow == Flow::Quit {
                break;
            }
        }

        self.controller.stop();
        self.render_notifications().await
    }

    async fn handle_line(&mut self, line: &str) -> AppResult<Flow> {
        match Command::parse(line) {
            Command::Send(text) => {
                if let Some(handle) = self.controller.send_user(&text) {
                    tracing::debug!(%handle, "user message sent");
                }
            }
            Command::Stop => {
                if !self.controller.stop() {
                    self.write_line("(nothing to stop)").await?;
                }
            }
            Command::Reset => self.controller.reset(),
            Command::Model(model_id) => self.switch_model(model_id).await?,
            Command::Help => self.write_line(HELP).await?,
            Command::Quit => return Ok(Flow::Quit),
            Command::Empty => {}
            Command::Unknown(line) => {
                self.write_line(&format!("unknown command `{line}`; {HELP}"))
                    .await?
            }
        }

        Ok(Flow::Continue)
    }

    async fn switch_model(&mut self, model_id: String) -> AppResult<()> {
        self.controller.set_model(model_id.clone());

        let persisted = self
            .settings
            .modify(|settings| settings.model = model_id.clone())
            .context(SettingsSnafu {
                stage: "persist-model-choice",
            });
        match persisted {
            Ok(_) => self.write_line(&format!("(model set to {model_id})")).await,
            Err(error) => {
                tracing::warn!(error = %error, "model choice not persisted");
                self.write_line(&format!("(model set to {model_id} for this session)"))
                    .await
            }
        }
    }

    async fn render_notifications(&mut self) -> AppResult<()> {
        loop {
            match self.notifications.try_recv() {
                Ok(notification) => self.render(notification.change).await?,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "terminal fell behind session notifications");
                    self.redraw_history().await?;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        self.flush().await
    }

    async fn render(&mut self, change: SessionChange) -> AppResult<()> {
        match change {
            SessionChange::UserAppended { .. } => Ok(()),
            SessionChange::ModelUpdated { index } => self.echo_model(index).await,
            SessionChange::Completed => self.close_echo().await,
            SessionChange::Failed { index } => {
                self.close_echo().await?;
                let Some(text) = self.message_text(index) else {
                    return Ok(());
                };
                self.write_line(&format!("assistant: {text}")).await
            }
            SessionChange::Stopped => {
                self.close_echo().await?;
                self.write_line("(stopped)").await
            }
            SessionChange::Reset => {
                self.cursor = None;
                self.write_line("(history cleared)").await
            }
        }
    }

    async fn echo_model(&mut self, index: usize) -> AppResult<()> {
        let Some(text) = self.message_text(index) else {
            return Ok(());
        };

        let printed = match self.cursor {
            Some(cursor) if cursor.index == index => cursor.printed,
            _ => {
                self.close_echo().await?;
                self.write("assistant: ").await?;
                0
            }
        };

        // Updates carry the whole text; only the new tail goes to the terminal.
        if printed <= text.len() && text.is_char_boundary(printed) {
            self.write(&text[printed..]).await?;
        } else {
            self.write("\n").await?;
            self.write(&text).await?;
        }

        self.cursor = Some(EchoCursor {
            index,
            printed: text.len(),
        });
        Ok(())
    }

    async fn close_echo(&mut self) -> AppResult<()> {
        if self.cursor.take().is_some() {
            self.write("\n").await?;
        }
        Ok(())
    }

    fn message_text(&self, index: usize) -> Option<String> {
        self.controller
            .history()
            .get(index)
            .map(|message| message.text.clone())
    }

    /// Replaces missed notifications with a full redraw of the current history.
    async fn redraw_history(&mut self) -> AppResult<()> {
        // The history already reflects everything still queued.
        loop {
            match self.notifications.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        self.close_echo().await?;
        self.write_line("(output fell behind; redrawing history)")
            .await?;
        self.print_history().await
    }

    /// Prints every message; a message still streaming is left open for further echo.
    async fn print_history(&mut self) -> AppResult<()> {
        let messages = self.controller.history().to_vec();

        for (index, message) in messages.into_iter().enumerate() {
            match message.role {
                Role::User => self.write_line(&format!("you: {}", message.text)).await?,
                Role::Model if message.in_progress => {
                    self.write(&format!("assistant: {}", message.text)).await?;
                    self.cursor = Some(EchoCursor {
                        index,
                        printed: message.text.len(),
                    });
                }
                Role::Model => {
                    self.write_line(&format!("assistant: {}", message.text))
                        .await?
                }
            }
        }
        self.flush().await
    }

    async fn write_line(&mut self, line: &str) -> AppResult<()> {
        self.write(line).await?;
        self.write("\n").await
    }

    async fn write(&mut self, text: &str) -> AppResult<()> {
        self.out
            .write_all(text.as_bytes())
            .await
            .context(WriteOutputSnafu {
                stage: "write-output",
            })
    }

    async fn flush(&mut self) -> AppResult<()> {
        self.out.flush().await.context(WriteOutputSnafu {
            stage: "flush-output",
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use murmur_storage::{HistoryStore, MemoryKeyValueStore};

    use super::*;
    use crate::chat::{ControllerOptions, SessionStore};
    use crate::settings::state::SETTINGS_FILE_NAME;

    fn offline_app(dir: &tempfile::TempDir) -> TerminalApp<Vec<u8>> {
        let history = HistoryStore::new(Arc::new(MemoryKeyValueStore::new()));
        let controller = SessionController::new(
            SessionStore::restore(history),
            None,
            ControllerOptions::default(),
        );
        let settings = SettingsStore::new(dir.path().join(SETTINGS_FILE_NAME));
        TerminalApp::new(controller, settings, Vec::new())
    }

    fn output(app: TerminalApp<Vec<u8>>) -> String {
        String::from_utf8(app.into_output()).expect("utf8 output")
    }

    #[test]
    fn parses_commands_and_plain_text() {
        assert_eq!(Command::parse("  hello there "), Command::Send("hello there".to_string()));
        assert_eq!(Command::parse("/stop"), Command::Stop);
        assert_eq!(Command::parse("/reset"), Command::Reset);
        assert_eq!(
            Command::parse("/model   gpt-4.1 "),
            Command::Model("gpt-4.1".to_string())
        );
        assert_eq!(Command::parse("/model"), Command::Unknown("/model".to_string()));
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[tokio::test]
    async fn unconfigured_provider_is_reported_as_chat_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = offline_app(&dir);

        app.run(&b"hello\n/quit\n"[..]).await.expect("run");

        let history = app.controller().history().to_vec();
        assert_eq!(history.len(), 2);
        assert!(history[1].text.starts_with("Error: Provider is not configured"));
        assert!(output(app).contains("assistant: Error: Provider is not configured"));
    }

    #[tokio::test]
    async fn model_command_persists_choice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = offline_app(&dir);

        app.run(&b"/model gpt-4.1\n"[..]).await.expect("run");

        assert_eq!(app.controller().options().model_id, "gpt-4.1");
        let reloaded = SettingsStore::new(dir.path().join(SETTINGS_FILE_NAME));
        assert_eq!(reloaded.settings().model, "gpt-4.1");
        assert!(output(app).contains("(model set to gpt-4.1)"));
    }

    #[tokio::test]
    async fn lagged_notifications_redraw_history_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = offline_app(&dir);

        // Two notifications per send overflow the notification buffer.
        for turn in 0..150 {
            app.controller.send_user(&format!("turn {turn}"));
        }
        app.render_notifications().await.expect("render");
        app.controller.send_user("after the redraw");
        app.render_notifications().await.expect("render");

        let printed = output(app);
        assert_eq!(printed.matches("(output fell behind; redrawing history)").count(), 1);
        assert_eq!(printed.matches("you: turn ").count(), 150);
        assert!(printed.contains("you: turn 0\n"));
        assert!(printed.contains("you: turn 149\n"));
        assert_eq!(
            printed.matches("assistant: Error: Provider is not configured").count(),
            151
        );
    }

    #[tokio::test]
    async fn reset_and_idle_stop_are_acknowledged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = offline_app(&dir);

        app.run(&b"hi\n/stop\n/reset\n"[..]).await.expect("run");

        assert!(app.controller().history().is_empty());
        let printed = output(app);
        assert!(printed.contains("(nothing to stop)"));
        assert!(printed.contains("(history cleared)"));
    }
}
