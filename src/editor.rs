//! Key, paste and pointer routing for the live input line.
//!
//! Every event is checked against the buffer's protection model before any
//! default editing happens. Submit is checked first so Enter always works,
//! even while the cursor rests inside a hint.

use crate::buffer::{Style, TerminalBuffer};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

pub trait Clipboard {
    fn get(&mut self) -> Option<String>;
    fn set(&mut self, text: String);
}

/// Process-local clipboard. Also backs [`SystemClipboard`] when no system
/// clipboard is reachable (e.g. over SSH).
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    content: Option<String>,
}

impl Clipboard for MemoryClipboard {
    fn get(&mut self) -> Option<String> {
        self.content.clone()
    }

    fn set(&mut self, text: String) {
        self.content = Some(text);
    }
}

pub struct SystemClipboard {
    system: Option<arboard::Clipboard>,
    local: MemoryClipboard,
}

impl SystemClipboard {
    pub fn new() -> Self {
        let system = match arboard::Clipboard::new() {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(error = %e, "system clipboard unavailable, using a local one");
                None
            }
        };
        SystemClipboard {
            system,
            local: MemoryClipboard::default(),
        }
    }
}

impl Default for SystemClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Clipboard for SystemClipboard {
    fn get(&mut self) -> Option<String> {
        if let Some(system) = self.system.as_mut() {
            match system.get_text() {
                Ok(text) => return Some(text),
                Err(e) => tracing::debug!(error = %e, "clipboard read failed"),
            }
        }
        self.local.get()
    }

    fn set(&mut self, text: String) {
        if let Some(system) = self.system.as_mut() {
            if let Err(e) = system.set_text(text.clone()) {
                tracing::debug!(error = %e, "clipboard write failed");
            }
        }
        self.local.set(text);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scroll {
    PageUp,
    PageDown,
    LineUp,
    LineDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Not an editing event; nothing changed.
    Ignored,
    /// Vetoed by the protection guard. The cursor may have been moved back
    /// to a safe position.
    Rejected,
    Changed,
    Submitted(String),
    Scroll(Scroll),
    Quit,
}

/// Pointer events already mapped to buffer offsets by the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer {
    Press(usize),
    Drag(usize),
    Release,
    Secondary,
    WheelUp,
    WheelDown,
}

pub struct LineEditor {
    clipboard: Box<dyn Clipboard>,
    drag_origin: Option<usize>,
}

impl LineEditor {
    pub fn new(clipboard: Box<dyn Clipboard>) -> Self {
        LineEditor {
            clipboard,
            drag_origin: None,
        }
    }

    /// Routes one key. `locked` is set while an AI reply is pending: only
    /// navigation, scrolling, copy and quit are honoured then.
    pub fn handle_key(&mut self, buf: &mut TerminalBuffer, key: KeyEvent, locked: bool) -> KeyOutcome {
        if key.kind == KeyEventKind::Release {
            return KeyOutcome::Ignored;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        if key.code == KeyCode::Enter && key.modifiers.is_empty() {
            if locked {
                return KeyOutcome::Ignored;
            }
            return self.submit(buf);
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Char('d') if ctrl => return KeyOutcome::Quit,
            KeyCode::Char('c') if ctrl => return self.copy(buf),
            KeyCode::Char('a') if ctrl => {
                let end = buf.input_end();
                buf.select(buf.input_boundary(), end);
                return KeyOutcome::Changed;
            }
            KeyCode::Char('v') if ctrl => {
                let text = self.clipboard.get();
                return self.paste(buf, text.as_deref(), locked);
            }
            KeyCode::PageUp => return KeyOutcome::Scroll(Scroll::PageUp),
            KeyCode::PageDown => return KeyOutcome::Scroll(Scroll::PageDown),
            _ => {}
        }

        if locked {
            return if is_navigation(key.code) {
                navigate(buf, key)
            } else {
                KeyOutcome::Ignored
            };
        }

        let boundary = buf.input_boundary();

        if let Some(sel) = buf.selection() {
            if buf.overlaps_protected(sel.start, sel.end) {
                buf.clear_selection();
                buf.set_cursor(boundary);
                return KeyOutcome::Rejected;
            }
        }

        if buf.is_protected(buf.cursor()) {
            if is_navigation(key.code) {
                return navigate(buf, key);
            }
            buf.clear_selection();
            buf.set_cursor(boundary);
            return KeyOutcome::Rejected;
        }

        if is_navigation(key.code) {
            return navigate(buf, key);
        }

        let starts_before = buf
            .selection()
            .map_or(buf.cursor() < boundary, |sel| sel.start < boundary);
        if starts_before {
            buf.move_to_end();
            return KeyOutcome::Rejected;
        }

        let changed = match key.code {
            KeyCode::Backspace => {
                if buf.selection().is_none() && buf.cursor() <= boundary {
                    return KeyOutcome::Rejected;
                }
                buf.delete_backward()
            }
            KeyCode::Delete => buf.delete_forward(),
            KeyCode::Char(c) if !ctrl && !key.modifiers.contains(KeyModifiers::ALT) => {
                buf.insert_text(c.encode_utf8(&mut [0; 4]))
            }
            _ => return KeyOutcome::Ignored,
        };

        if changed {
            KeyOutcome::Changed
        } else {
            KeyOutcome::Rejected
        }
    }

    /// Inserts external text (bracketed paste or clipboard) under the same
    /// guard as typing.
    pub fn handle_paste(&mut self, buf: &mut TerminalBuffer, text: &str, locked: bool) -> KeyOutcome {
        self.paste(buf, Some(text), locked)
    }

    pub fn handle_pointer(&mut self, buf: &mut TerminalBuffer, pointer: Pointer, locked: bool) -> KeyOutcome {
        match pointer {
            Pointer::Press(pos) => {
                buf.clear_selection();
                buf.set_cursor(pos);
                if buf.is_protected(buf.cursor()) {
                    buf.set_cursor(buf.input_boundary());
                }
                self.drag_origin = Some(buf.cursor());
                KeyOutcome::Changed
            }
            Pointer::Drag(pos) => match self.drag_origin {
                Some(origin) => {
                    buf.select(origin, pos);
                    KeyOutcome::Changed
                }
                None => KeyOutcome::Ignored,
            },
            Pointer::Release => {
                self.drag_origin = None;
                KeyOutcome::Ignored
            }
            Pointer::Secondary => {
                if buf.selection().is_some() {
                    self.copy(buf)
                } else {
                    let text = self.clipboard.get();
                    self.paste(buf, text.as_deref(), locked)
                }
            }
            Pointer::WheelUp => KeyOutcome::Scroll(Scroll::LineUp),
            Pointer::WheelDown => KeyOutcome::Scroll(Scroll::LineDown),
        }
    }

    fn submit(&mut self, buf: &mut TerminalBuffer) -> KeyOutcome {
        let command = buf.input_line().trim().to_string();

        buf.move_to_end();
        buf.append("\n", Style::Plain);
        buf.move_to_end();

        if !command.is_empty() || buf.prompt_label().is_empty() {
            tracing::debug!(command = %command, "line submitted");
            KeyOutcome::Submitted(command)
        } else {
            buf.show_prompt();
            KeyOutcome::Changed
        }
    }

    fn copy(&mut self, buf: &TerminalBuffer) -> KeyOutcome {
        match buf.selected_text() {
            Some(text) => {
                self.clipboard.set(text);
                KeyOutcome::Changed
            }
            None => KeyOutcome::Ignored,
        }
    }

    fn paste(&mut self, buf: &mut TerminalBuffer, text: Option<&str>, locked: bool) -> KeyOutcome {
        let Some(text) = text else {
            return KeyOutcome::Ignored;
        };
        if locked || text.is_empty() {
            return KeyOutcome::Ignored;
        }

        let boundary = buf.input_boundary();
        let start = buf.selection().map_or(buf.cursor(), |sel| sel.start);
        if start < boundary {
            // text pasted over scrollback lands at the end of the live input
            buf.clear_selection();
            buf.set_cursor(buf.input_end());
        }
        if let Some(sel) = buf.selection() {
            if buf.overlaps_protected(sel.start, sel.end) {
                buf.clear_selection();
                buf.set_cursor(boundary);
                return KeyOutcome::Rejected;
            }
        }
        if buf.is_protected(buf.cursor()) {
            buf.set_cursor(boundary);
            return KeyOutcome::Rejected;
        }

        // the live line stays a single line
        let flat = text.replace("\r\n", " ").replace(['\n', '\r'], " ");
        if buf.insert_text(&flat) {
            KeyOutcome::Changed
        } else {
            KeyOutcome::Rejected
        }
    }
}

fn is_navigation(code: KeyCode) -> bool {
    matches!(
        code,
        KeyCode::Left
            | KeyCode::Right
            | KeyCode::Up
            | KeyCode::Down
            | KeyCode::Home
            | KeyCode::End
            | KeyCode::PageUp
            | KeyCode::PageDown
    )
}

/// Moves the cursor (extending the selection with Shift). Moves that would
/// land before the input boundary from the live region are refused.
fn navigate(buf: &mut TerminalBuffer, key: KeyEvent) -> KeyOutcome {
    let cursor = buf.cursor();
    let boundary = buf.input_boundary();

    let target = match key.code {
        KeyCode::Left => cursor.checked_sub(1),
        KeyCode::Right => (cursor < buf.len()).then_some(cursor + 1),
        KeyCode::Home => {
            let start = buf.line_start(cursor);
            Some(if cursor >= boundary { start.max(boundary) } else { start })
        }
        KeyCode::End => Some(buf.line_end(cursor)),
        KeyCode::Up => {
            let start = buf.line_start(cursor);
            (start > 0).then(|| {
                let prev_start = buf.line_start(start - 1);
                (prev_start + (cursor - start)).min(start - 1)
            })
        }
        KeyCode::Down => {
            let end = buf.line_end(cursor);
            (end < buf.len()).then(|| {
                let next_start = end + 1;
                let column = cursor - buf.line_start(cursor);
                (next_start + column).min(buf.line_end(next_start))
            })
        }
        _ => None,
    };

    let Some(target) = target else {
        return KeyOutcome::Ignored;
    };
    if cursor >= boundary && target < boundary {
        return KeyOutcome::Rejected;
    }

    if key.modifiers.contains(KeyModifiers::SHIFT) {
        let anchor = buf.anchor().unwrap_or(cursor);
        buf.select(anchor, target);
    } else {
        buf.clear_selection();
        buf.set_cursor(target);
    }
    KeyOutcome::Changed
}
