use crate::buffer::{Style, TerminalBuffer};
use crate::editor::Scroll;

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    queue,
    style::{Attribute, Color, ContentStyle, PrintStyledContent, Stylize},
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};
use std::ops::Range;
use unicode_width::UnicodeWidthChar;

const CODE_HEADER_BG: Color = Color::Rgb { r: 56, g: 62, b: 74 };
const CODE_BODY_BG: Color = Color::Rgb { r: 44, g: 49, b: 58 };

fn char_width(c: char) -> usize {
    c.width().unwrap_or(0)
}

/// Visual rows of the buffer after soft wrapping. Each row is a range of
/// buffer offsets without its trailing line break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    width: usize,
    rows: Vec<Range<usize>>,
}

impl Layout {
    pub fn build(chars: &[char], width: usize) -> Self {
        let width = width.max(1);
        let mut rows = Vec::new();
        let mut start = 0;
        let mut col = 0;

        for (i, &c) in chars.iter().enumerate() {
            if c == '\n' {
                rows.push(start..i);
                start = i + 1;
                col = 0;
                continue;
            }
            let w = char_width(c);
            if col + w > width && col > 0 {
                rows.push(start..i);
                start = i;
                col = 0;
            }
            col += w;
        }
        rows.push(start..chars.len());

        Layout { width, rows }
    }

    pub fn rows(&self) -> &[Range<usize>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row_of(&self, offset: usize) -> usize {
        self.rows
            .partition_point(|r| r.start <= offset)
            .saturating_sub(1)
    }

    pub fn position_of(&self, chars: &[char], offset: usize) -> (usize, usize) {
        let row = self.row_of(offset);
        let range = &self.rows[row];
        let end = offset.clamp(range.start, range.end);
        let col = chars[range.start..end].iter().map(|c| char_width(*c)).sum();
        (row, col)
    }

    /// Offset of the character under `(row, col)`. Columns past the end of a
    /// row land at its end.
    pub fn offset_at(&self, chars: &[char], row: usize, col: usize) -> usize {
        let Some(range) = self.rows.get(row.min(self.rows.len() - 1)) else {
            return 0;
        };
        let mut x = 0;
        for i in range.clone() {
            x += char_width(chars[i]);
            if x > col {
                return i;
            }
        }
        range.end
    }
}

/// Full-screen renderer: scrollback area plus one status line.
#[derive(Debug)]
pub struct View {
    top: usize,
    follow: bool,
    layout: Layout,
    text_height: usize,
}

impl Default for View {
    fn default() -> Self {
        View {
            top: 0,
            follow: true,
            layout: Layout::build(&[], 1),
            text_height: 1,
        }
    }
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn top(&self) -> usize {
        self.top
    }

    pub fn scroll(&mut self, scroll: Scroll) {
        let page = self.text_height.saturating_sub(1).max(1);
        let max_top = self.max_top();
        self.top = match scroll {
            Scroll::PageUp => self.top.saturating_sub(page),
            Scroll::LineUp => self.top.saturating_sub(1),
            Scroll::PageDown => (self.top + page).min(max_top),
            Scroll::LineDown => (self.top + 1).min(max_top),
        };
        self.follow = self.top == max_top;
    }

    fn max_top(&self) -> usize {
        self.layout.row_count().saturating_sub(self.text_height)
    }

    /// Maps a screen cell to a buffer offset using the last rendered layout.
    pub fn offset_at(&self, buf: &TerminalBuffer, column: u16, row: u16) -> usize {
        let row = self.top + row as usize;
        self.layout
            .offset_at(buf.chars(), row, column as usize)
            .min(buf.len())
    }

    fn update(&mut self, buf: &mut TerminalBuffer, width: usize, height: usize) {
        self.layout = Layout::build(buf.chars(), width);
        self.text_height = height.saturating_sub(1).max(1);

        if buf.take_scroll_request() {
            self.follow = true;
        }
        if self.follow {
            let (cursor_row, _) = self.layout.position_of(buf.chars(), buf.cursor());
            if cursor_row >= self.top + self.text_height {
                self.top = cursor_row + 1 - self.text_height;
            } else if cursor_row < self.top {
                self.top = cursor_row;
            }
            self.top = self.top.max(self.max_top());
        }
        self.top = self.top.min(self.max_top());
    }

    pub fn render<W: Write>(
        &mut self,
        out: &mut W,
        buf: &mut TerminalBuffer,
        status: &str,
        size: (u16, u16),
    ) -> io::Result<()> {
        let (width, height) = (size.0.max(1) as usize, size.1.max(2) as usize);
        self.update(buf, width, height);

        let chars = buf.chars();
        let selection = buf.selection().unwrap_or(0..0);
        queue!(out, Hide)?;

        for screen_row in 0..self.text_height {
            queue!(out, MoveTo(0, screen_row as u16), Clear(ClearType::UntilNewLine))?;
            let Some(range) = self.layout.rows().get(self.top + screen_row) else {
                continue;
            };

            let mut run = String::new();
            let mut run_style = None;
            for i in range.clone() {
                let style = (buf.style_at(i), selection.contains(&i));
                if run_style.is_some_and(|s| s != style) {
                    flush_run(out, &mut run, run_style)?;
                }
                run_style = Some(style);
                run.push(chars[i]);
            }
            flush_run(out, &mut run, run_style)?;
        }

        let status: String = fit_width(status, width);
        queue!(
            out,
            MoveTo(0, (height - 1) as u16),
            Clear(ClearType::CurrentLine),
            PrintStyledContent(ContentStyle::new().reverse().apply(status))
        )?;

        let (cursor_row, cursor_col) = self.layout.position_of(chars, buf.cursor());
        if (self.top..self.top + self.text_height).contains(&cursor_row) {
            let col = cursor_col.min(width - 1) as u16;
            queue!(out, MoveTo(col, (cursor_row - self.top) as u16), Show)?;
        }
        out.flush()
    }
}

fn flush_run<W: Write>(out: &mut W, run: &mut String, style: Option<(Style, bool)>) -> io::Result<()> {
    if run.is_empty() {
        return Ok(());
    }
    let (style, selected) = style.unwrap_or((Style::Plain, false));
    let content = content_style(style, selected).apply(std::mem::take(run));
    queue!(out, PrintStyledContent(content))
}

fn content_style(style: Style, selected: bool) -> ContentStyle {
    let base = ContentStyle::new();
    let styled = match style {
        Style::Plain => base,
        Style::Prompt => base.green().bold(),
        Style::Hint => base.dark_grey().italic(),
        Style::Error => base.red(),
        Style::Accent => base.cyan(),
        Style::Banner => base.blue().bold(),
        Style::Rule => base.dark_grey(),
        Style::CodeHeader => base.white().on(CODE_HEADER_BG),
        Style::CodeBody => base.yellow().on(CODE_BODY_BG),
    };
    if selected {
        styled.attribute(Attribute::Reverse)
    } else {
        styled
    }
}

/// Truncates or pads `text` to exactly `width` columns.
fn fit_width(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = char_width(c);
        if used + w > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.extend(std::iter::repeat_n(' ', width - used));
    out
}
