//! Terminal-like text buffer with a live input line.
//!
//! Everything before `input_boundary` is scrollback and can no longer be
//! edited. Hints rendered after the boundary are recorded as protected ranges
//! so they stay immutable while the user keeps typing on the input line.

use std::ops::Range;

const TAB_WIDTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Style {
    #[default]
    Plain,
    Prompt,
    Hint,
    Error,
    Accent,
    Banner,
    Rule,
    CodeHeader,
    CodeBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub style: Style,
}

impl Span {
    pub fn new(text: impl Into<String>, style: Style) -> Self {
        Span {
            text: text.into(),
            style,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Span::new(text, Style::Plain)
    }
}

#[derive(Debug, Default)]
pub struct TerminalBuffer {
    text: Vec<char>,
    styles: Vec<Style>,
    input_boundary: usize,
    protected: Vec<Range<usize>>,
    cursor: usize,
    anchor: Option<usize>,
    prompt: String,
    scroll_request: bool,
}

impl TerminalBuffer {
    pub fn new(prompt: impl Into<String>) -> Self {
        TerminalBuffer {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn text(&self) -> String {
        self.text.iter().collect()
    }

    pub fn slice(&self, range: Range<usize>) -> String {
        let end = range.end.min(self.text.len());
        let start = range.start.min(end);
        self.text[start..end].iter().collect()
    }

    pub fn chars(&self) -> &[char] {
        &self.text
    }

    pub fn style_at(&self, pos: usize) -> Style {
        self.styles.get(pos).copied().unwrap_or_default()
    }

    pub fn input_boundary(&self) -> usize {
        self.input_boundary
    }

    pub fn protected_ranges(&self) -> &[Range<usize>] {
        &self.protected
    }

    pub fn prompt_label(&self) -> &str {
        &self.prompt
    }

    pub fn set_prompt_label(&mut self, label: impl Into<String>) {
        self.prompt = label.into();
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, pos: usize) {
        self.cursor = pos.min(self.text.len());
    }

    pub fn move_to_end(&mut self) {
        self.cursor = self.text.len();
        self.anchor = None;
    }

    pub fn anchor(&self) -> Option<usize> {
        self.anchor
    }

    /// Selects from `anchor` to `cursor`, leaving the cursor at `cursor`.
    pub fn select(&mut self, anchor: usize, cursor: usize) {
        self.anchor = Some(anchor.min(self.text.len()));
        self.set_cursor(cursor);
    }

    pub fn clear_selection(&mut self) {
        self.anchor = None;
    }

    /// Normalised, non-empty selection.
    pub fn selection(&self) -> Option<Range<usize>> {
        let anchor = self.anchor?;
        let (start, end) = if anchor <= self.cursor {
            (anchor, self.cursor)
        } else {
            (self.cursor, anchor)
        };
        (start < end).then_some(start..end)
    }

    pub fn selected_text(&self) -> Option<String> {
        self.selection().map(|r| self.slice(r))
    }

    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.scroll_request)
    }

    pub fn is_protected(&self, pos: usize) -> bool {
        self.protected.iter().any(|r| r.start <= pos && pos < r.end)
    }

    pub fn overlaps_protected(&self, start: usize, end: usize) -> bool {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        self.protected.iter().any(|r| start < r.end && end > r.start)
    }

    /// True when `pos` holds the line break that a hint was appended after.
    fn anchors_protected(&self, pos: usize) -> bool {
        self.text.get(pos) == Some(&'\n') && self.protected.iter().any(|r| r.start == pos + 1)
    }

    /// The edit guard: may the characters in `range` be replaced?
    ///
    /// An empty range is an insertion point. It is allowed at or after the
    /// boundary and outside protected text. A non-empty range must lie
    /// entirely after the boundary, must not touch protected text and must
    /// not remove the line break a hint hangs from.
    pub fn can_edit(&self, range: Range<usize>) -> bool {
        if range.start < self.input_boundary || range.end > self.text.len() {
            return false;
        }
        if range.is_empty() {
            return !self.is_protected(range.start);
        }
        !self.overlaps_protected(range.start, range.end)
            && !range.clone().any(|p| self.anchors_protected(p))
    }

    pub fn line_start(&self, pos: usize) -> usize {
        let pos = pos.min(self.text.len());
        self.text[..pos]
            .iter()
            .rposition(|c| *c == '\n')
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    pub fn line_end(&self, pos: usize) -> usize {
        let pos = pos.min(self.text.len());
        self.text[pos..]
            .iter()
            .position(|c| *c == '\n')
            .map(|i| pos + i)
            .unwrap_or(self.text.len())
    }

    /// End of the live input line: the end of the boundary's line, or the
    /// start of a protected range that begins on it, whichever comes first.
    pub fn input_end(&self) -> usize {
        let line_end = self.line_end(self.input_boundary);
        self.protected
            .iter()
            .map(|r| r.start)
            .filter(|s| *s >= self.input_boundary && *s < line_end)
            .min()
            .unwrap_or(line_end)
    }

    pub fn input_line(&self) -> String {
        self.slice(self.input_boundary..self.input_end())
    }

    /// Inserts `text` at the cursor, replacing the selection if any.
    /// Returns false, leaving the buffer untouched, when the guard vetoes it.
    pub fn insert_text(&mut self, text: &str) -> bool {
        let target = self.selection().unwrap_or(self.cursor..self.cursor);
        if !self.can_edit(target.clone()) {
            return false;
        }
        if !target.is_empty() {
            self.remove(target.clone());
        }
        let inserted = self.insert_at(target.start, text, Style::Plain);
        self.anchor = None;
        self.cursor = target.start + inserted;
        true
    }

    /// Backspace: removes the selection, or the character before the cursor.
    pub fn delete_backward(&mut self) -> bool {
        let target = match self.selection() {
            Some(r) => r,
            None if self.cursor == 0 => return false,
            None => self.cursor - 1..self.cursor,
        };
        self.delete(target)
    }

    /// Delete: removes the selection, or the character under the cursor.
    pub fn delete_forward(&mut self) -> bool {
        let target = match self.selection() {
            Some(r) => r,
            None if self.cursor >= self.text.len() => return false,
            None => self.cursor..self.cursor + 1,
        };
        self.delete(target)
    }

    fn delete(&mut self, target: Range<usize>) -> bool {
        if !self.can_edit(target.clone()) {
            return false;
        }
        self.remove(target.clone());
        self.anchor = None;
        self.cursor = target.start;
        true
    }

    /// Appends `label` as the prompt and moves the boundary after it.
    pub fn show_prompt(&mut self) {
        let label = self.prompt.clone();
        self.append(&label, Style::Prompt);
        self.input_boundary = self.text.len();
        self.move_to_end();
        self.scroll_request = true;
    }

    /// Raw-input prompt used by setup steps: `"{label}: "` with an empty
    /// prompt label, so empty submissions are still delivered.
    pub fn add_raw_text(&mut self, label: &str) {
        self.prompt.clear();
        self.append(&format!("{label}: "), Style::Plain);
        self.input_boundary = self.text.len();
        self.move_to_end();
        self.scroll_request = true;
    }

    /// Appends an immutable hint on its own line without moving the cursor.
    pub fn add_hint(&mut self, text: &str) {
        let cursor = self.cursor;
        let anchor = self.anchor;

        self.append("\n", Style::Plain);
        let start = self.text.len();
        self.append(text, Style::Hint);
        let end = self.text.len();
        if start < end {
            self.protected.push(start..end);
        }

        // appends never shift earlier offsets, so the saved cursor is still valid
        self.cursor = cursor.min(self.text.len());
        self.anchor = anchor;
        self.scroll_request = true;
    }

    pub fn add_output(&mut self, text: &str, show_prompt: bool) {
        self.add_styled(&[Span::plain(text)], show_prompt);
    }

    pub fn add_error(&mut self, text: &str, show_prompt: bool) {
        self.add_styled(&[Span::new(text, Style::Error)], show_prompt);
    }

    /// Appends styled output on a fresh line, then a line break and, if asked,
    /// a new prompt.
    pub fn add_styled(&mut self, spans: &[Span], show_prompt: bool) {
        if self.text.last().is_some_and(|c| *c != '\n') {
            self.append("\n", Style::Plain);
        }
        for span in spans {
            self.append(&span.text, span.style);
        }
        self.append("\n", Style::Plain);
        self.move_to_end();
        if show_prompt {
            self.show_prompt();
        }
        self.scroll_request = true;
    }

    pub fn append(&mut self, text: &str, style: Style) {
        let end = self.text.len();
        self.insert_at(end, text, style);
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.styles.clear();
        self.protected.clear();
        self.input_boundary = 0;
        self.cursor = 0;
        self.anchor = None;
        self.scroll_request = true;
    }

    /// Raw insertion. Protected ranges starting at or after `pos` move with
    /// their content.
    fn insert_at(&mut self, pos: usize, text: &str, style: Style) -> usize {
        let chars = sanitize(text);
        let n = chars.len();
        if n == 0 {
            return 0;
        }

        self.text.splice(pos..pos, chars);
        self.styles.splice(pos..pos, std::iter::repeat_n(style, n));
        for r in self.protected.iter_mut().filter(|r| r.start >= pos) {
            r.start += n;
            r.end += n;
        }
        if self.input_boundary > pos {
            self.input_boundary += n;
        }
        n
    }

    fn remove(&mut self, range: Range<usize>) {
        let n = range.len();
        self.text.drain(range.clone());
        self.styles.drain(range.clone());
        for r in self.protected.iter_mut().filter(|r| r.start >= range.end) {
            r.start -= n;
            r.end -= n;
        }
    }
}

/// Drops carriage returns, expands tabs and replaces other control
/// characters so nothing in the buffer can reach the terminal as an escape
/// sequence.
pub fn sanitize(text: &str) -> Vec<char> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\r' => {}
            '\t' => out.extend(std::iter::repeat_n(' ', TAB_WIDTH)),
            '\n' => out.push('\n'),
            c if c.is_control() => out.push('\u{FFFD}'),
            c => out.push(c),
        }
    }
    out
}
