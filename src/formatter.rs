use crate::buffer::{sanitize, Span, Style};

pub const RESPONSE_PREFIX: &str = "ai_agent> ";
pub const DEFAULT_EXTENSION: &str = ".txt";
const RULE_WIDTH: usize = 72;
const FENCE: &str = "```";

const EXTENSIONS: &[(&str, &str)] = &[
    ("python", ".py"),
    ("java", ".java"),
    ("javascript", ".js"),
    ("html", ".html"),
    ("css", ".css"),
    ("cpp", ".cpp"),
    ("rust", ".rs"),
    ("typescript", ".ts"),
    ("go", ".go"),
    ("c", ".c"),
    ("bash", ".sh"),
    ("sh", ".sh"),
    ("json", ".json"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Text(String),
    Code { language: String, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StyledDocument {
    pub blocks: Vec<Block>,
}

impl StyledDocument {
    pub fn code_cards(&self) -> impl Iterator<Item = (&str, &str)> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Code { language, body } => Some((language.as_str(), body.as_str())),
            Block::Text(_) => None,
        })
    }

    /// Rule, prefix, blocks one per line, rule.
    pub fn to_spans(&self) -> Vec<Span> {
        let rule = "-".repeat(RULE_WIDTH);
        let mut spans = vec![
            Span::new(rule.clone(), Style::Rule),
            Span::plain("\n"),
            Span::new(RESPONSE_PREFIX, Style::Accent),
        ];

        for (i, block) in self.blocks.iter().enumerate() {
            match block {
                Block::Text(text) => {
                    if i > 0 {
                        spans.push(Span::plain("\n"));
                    }
                    spans.push(Span::plain(text.clone()));
                }
                Block::Code { language, body } => {
                    spans.push(Span::plain("\n"));
                    spans.push(Span::new(format!(" {language} "), Style::CodeHeader));
                    spans.push(Span::plain("\n"));
                    spans.push(Span::new(body.clone(), Style::CodeBody));
                }
            }
        }

        spans.push(Span::plain("\n"));
        spans.push(Span::new(rule, Style::Rule));
        spans
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub code: String,
    pub docs: String,
    pub extension: &'static str,
    pub language: String,
}

impl Extraction {
    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
    }
}

pub fn extension_for(language: &str) -> &'static str {
    let language = language.to_lowercase();
    EXTENSIONS
        .iter()
        .find(|(name, _)| *name == language)
        .map(|(_, ext)| *ext)
        .unwrap_or(DEFAULT_EXTENSION)
}

pub fn placeholder(extension: &str) -> String {
    format!("[See code in {extension} file]")
}

/// Splits a raw reply into text paragraphs and code cards.
///
/// A card is three backticks, an optional word-character language tag, a
/// newline, the body, a newline and three backticks. Matching is leftmost and
/// non-greedy: the body ends at the first `"\n```"`.
pub fn format_for_display(raw: &str) -> StyledDocument {
    let text = raw.strip_prefix(RESPONSE_PREFIX).unwrap_or(raw).trim();

    let mut blocks = Vec::new();
    let push_text = |blocks: &mut Vec<Block>, part: &str| {
        let part = part.trim();
        if !part.is_empty() {
            blocks.push(Block::Text(escape(part)));
        }
    };

    let mut pos = 0;
    while let Some(fence) = find_display_fence(text, pos) {
        push_text(&mut blocks, &text[pos..fence.start]);
        blocks.push(Block::Code {
            language: capitalize(fence.language).unwrap_or_else(|| "Code".to_string()),
            body: escape(fence.body.trim()),
        });
        pos = fence.end;
    }
    push_text(&mut blocks, &text[pos..]);

    StyledDocument { blocks }
}

/// Pulls the first fenced block out of a reply.
///
/// The opening fence may be followed by whitespace spanning several lines and
/// the closing fence need not sit on its own line. The docs keep the rest of
/// the reply with that one block replaced by a placeholder naming the file
/// extension.
pub fn extract_code_and_docs(raw: &str) -> Extraction {
    match find_extract_fence(raw) {
        Some(fence) => {
            let language = fence.language.to_lowercase();
            let extension = extension_for(&language);
            let docs = format!(
                "{}\n{}\n{}",
                &raw[..fence.start],
                placeholder(extension),
                &raw[fence.end..]
            );
            Extraction {
                code: fence.body.trim().to_string(),
                docs,
                extension,
                language,
            }
        }
        None => Extraction {
            code: String::new(),
            docs: raw.to_string(),
            extension: DEFAULT_EXTENSION,
            language: String::new(),
        },
    }
}

#[derive(Debug, Clone, Copy)]
struct Fence<'a> {
    start: usize,
    end: usize,
    language: &'a str,
    body: &'a str,
}

fn fence_starts(text: &str, from: usize) -> impl Iterator<Item = usize> + '_ {
    let mut search = from;
    std::iter::from_fn(move || {
        let rel = text.get(search..)?.find(FENCE)?;
        let start = search + rel;
        search = start + 1;
        Some(start)
    })
}

fn word_len(s: &str) -> usize {
    s.char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map_or(s.len(), |(i, _)| i)
}

fn find_display_fence(text: &str, from: usize) -> Option<Fence<'_>> {
    fence_starts(text, from).find_map(|start| {
        let tag_start = start + FENCE.len();
        let tag_end = tag_start + word_len(&text[tag_start..]);
        if !text[tag_end..].starts_with('\n') {
            return None;
        }
        let body_start = tag_end + 1;
        let close = text[body_start..].find("\n```")?;
        let body_end = body_start + close;
        Some(Fence {
            start,
            end: body_end + 1 + FENCE.len(),
            language: &text[tag_start..tag_end],
            body: &text[body_start..body_end],
        })
    })
}

fn find_extract_fence(text: &str) -> Option<Fence<'_>> {
    fence_starts(text, 0).find_map(|start| {
        let tag_start = start + FENCE.len();
        let tag_end = tag_start + word_len(&text[tag_start..]);
        let rest = &text[tag_end..];
        let ws_len = rest
            .char_indices()
            .find(|(_, c)| !c.is_whitespace())
            .map_or(rest.len(), |(i, _)| i);
        // the body starts after the last newline of the whitespace run
        let newline = rest[..ws_len].rfind('\n')?;
        let body_start = tag_end + newline + 1;
        let close = body_start + text[body_start..].find(FENCE)?;
        Some(Fence {
            start,
            end: close + FENCE.len(),
            language: &text[tag_start..tag_end],
            body: &text[body_start..close],
        })
    })
}

fn capitalize(s: &str) -> Option<String> {
    let mut chars = s.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect())
}

/// Display escaping for a terminal: control characters never reach the
/// screen as escape sequences.
fn escape(s: &str) -> String {
    sanitize(s).into_iter().collect()
}
