use crate::args::CommandLineArgs;
use crate::buffer::TerminalBuffer;
use crate::client::ReplicateFactory;
use crate::dispatcher::Dispatcher;
use crate::editor::{KeyOutcome, LineEditor, Pointer, SystemClipboard};
use crate::profile::ProfileStore;
use crate::view::View;

use anyhow::{Context, Result};
use crossterm::{
    event::{
        DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture,
        Event, EventStream, MouseButton, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen, SetTitle},
};
use futures_util::{future::BoxFuture, StreamExt};
use std::io;
use tokio::sync::mpsc::{self, UnboundedSender};

const TITLE: &str = "GraniteShell";

/// Raw mode, alternate screen, mouse capture and bracketed paste for the
/// lifetime of the value. Dropping it restores the terminal, also on error
/// paths.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        let guard = TerminalGuard;
        execute!(
            io::stdout(),
            EnterAlternateScreen,
            EnableMouseCapture,
            EnableBracketedPaste,
            SetTitle(TITLE)
        )
        .context("Failed to prepare the terminal")?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(
            io::stdout(),
            DisableBracketedPaste,
            DisableMouseCapture,
            LeaveAlternateScreen
        );
        let _ = terminal::disable_raw_mode();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Idle,
    Redraw,
    Quit,
}

struct App {
    buf: TerminalBuffer,
    editor: LineEditor,
    dispatcher: Dispatcher,
    view: View,
    replies: UnboundedSender<String>,
}

impl App {
    fn handle_event(&mut self, event: Event) -> Flow {
        let locked = self.dispatcher.is_busy();
        let outcome = match event {
            Event::Key(key) => self.editor.handle_key(&mut self.buf, key, locked),
            Event::Paste(text) => self.editor.handle_paste(&mut self.buf, &text, locked),
            Event::Mouse(mouse) => match pointer_for(mouse, &self.view, &self.buf) {
                Some(pointer) => self.editor.handle_pointer(&mut self.buf, pointer, locked),
                None => KeyOutcome::Ignored,
            },
            Event::Resize(..) => return Flow::Redraw,
            _ => KeyOutcome::Ignored,
        };

        match outcome {
            KeyOutcome::Ignored => Flow::Idle,
            KeyOutcome::Rejected | KeyOutcome::Changed => Flow::Redraw,
            KeyOutcome::Scroll(scroll) => {
                self.view.scroll(scroll);
                Flow::Redraw
            }
            KeyOutcome::Submitted(line) => {
                if let Some(reply) = self.dispatcher.handle_command(&line, &mut self.buf) {
                    self.spawn_reply(reply);
                }
                Flow::Redraw
            }
            KeyOutcome::Quit => Flow::Quit,
        }
    }

    /// Runs the AI call off the UI loop. A panicking request still produces a
    /// reply so the session leaves its waiting state.
    fn spawn_reply(&self, reply: BoxFuture<'static, String>) {
        let tx = self.replies.clone();
        tokio::spawn(async move {
            let text = match tokio::spawn(reply).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "AI request task failed");
                    format!(
                        "Error communicating with Replicate API. The model may be incompatible or another issue occurred. \nDetails: {e}"
                    )
                }
            };
            let _ = tx.send(text);
        });
    }

    fn status_line(&self) -> String {
        let mut status = format!(
            " {TITLE} | {} | mode: {} | model: {}",
            self.dispatcher.session().profile.username,
            self.dispatcher.mode(),
            self.dispatcher.model_name().unwrap_or("not connected")
        );
        if self.dispatcher.has_context() {
            status.push_str(" | context loaded");
        }
        if self.dispatcher.is_busy() {
            status.push_str(" | waiting for reply...");
        }
        status.push_str(" | Ctrl+Q quits");
        status
    }
}

fn pointer_for(mouse: MouseEvent, view: &View, buf: &TerminalBuffer) -> Option<Pointer> {
    let at = || view.offset_at(buf, mouse.column, mouse.row);
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => Some(Pointer::Press(at())),
        MouseEventKind::Drag(MouseButton::Left) => Some(Pointer::Drag(at())),
        MouseEventKind::Up(MouseButton::Left) => Some(Pointer::Release),
        MouseEventKind::Down(MouseButton::Right) => Some(Pointer::Secondary),
        MouseEventKind::ScrollUp => Some(Pointer::WheelUp),
        MouseEventKind::ScrollDown => Some(Pointer::WheelDown),
        _ => None,
    }
}

pub async fn run(args: &CommandLineArgs, token: Option<String>) -> Result<()> {
    let store = ProfileStore::new(args.profile());
    tracing::info!(profile = %store.path().display(), api_base = %args.api_base(), "session starting");

    let mut dispatcher = Dispatcher::new(
        store,
        Box::new(ReplicateFactory::new(args.api_base())),
        token,
    );
    let mut buf = TerminalBuffer::new("");
    dispatcher.boot(&mut buf);

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut app = App {
        buf,
        editor: LineEditor::new(Box::new(SystemClipboard::new())),
        dispatcher,
        view: View::new(),
        replies: tx,
    };

    let _guard = TerminalGuard::enter()?;
    let mut stdout = io::stdout();
    let mut events = EventStream::new();
    let mut dirty = true;

    loop {
        if dirty {
            let size = terminal::size().context("Failed to read the terminal size")?;
            let status = app.status_line();
            app.view
                .render(&mut stdout, &mut app.buf, &status, size)
                .context("Failed to draw the screen")?;
            dirty = false;
        }

        tokio::select! {
            maybe_event = events.next() => {
                let Some(event) = maybe_event else { break };
                let event = event.context("Failed to read a terminal event")?;
                match app.handle_event(event) {
                    Flow::Quit => break,
                    Flow::Redraw => dirty = true,
                    Flow::Idle => {}
                }
            }
            Some(reply) = rx.recv() => {
                app.dispatcher.apply_ai_response(reply, &mut app.buf);
                dirty = true;
            }
        }
    }

    tracing::info!("session ended");
    Ok(())
}
