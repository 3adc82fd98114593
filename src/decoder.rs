//! Document decoder
//!
//! A small typed parser for the block layout the encoder writes. It accepts
//! exactly three kinds of top-level keys (`options`, `vba`, and entry keys
//! ending in `: |`) and validates everything it needs instead of loading a
//! generic key/value tree.

use log::warn;

use crate::document::{
    relative_path_from_key, ContentKind, Document, EntryBody, MacroModule, Options, BLOCK_SUFFIX,
    CODE_INDENT, ENTRY_INDENT, OPTIONS_KEY, VBA_KEY,
};
use crate::error::{Error, Result};

/// Parser state: which top-level block the current line belongs to
enum Block {
    Start,
    Options,
    Macro {
        line: usize,
        filename: Option<String>,
        code: Option<Vec<String>>,
    },
    Entry {
        key: String,
        line: usize,
        lines: Vec<String>,
    },
}

#[derive(Default)]
struct PartialOptions {
    extension: Option<String>,
    compress_binary: Option<bool>,
}

/// Decodes a document
pub struct Decoder {}

impl Decoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self {}
    }

    /// Decode a document from a string
    pub fn decode(&self, input: &str) -> Result<Document> {
        let mut options: Option<PartialOptions> = None;
        let mut macros = Vec::new();
        let mut entries: Vec<(String, EntryBody)> = Vec::new();
        let mut block = Block::Start;

        for (index, line) in input.lines().enumerate() {
            let line_num = index + 1;

            if line.trim().is_empty() {
                // Blank lines belong to whatever block scalar is open
                match &mut block {
                    Block::Entry { lines, .. } => lines.push(String::new()),
                    Block::Macro { code: Some(code), .. } => code.push(String::new()),
                    _ => {}
                }
                continue;
            }

            if !line.starts_with(' ') {
                let finished = std::mem::replace(&mut block, Block::Start);
                self.finish_block(finished, &mut macros, &mut entries)?;
                block = self.open_block(line.trim_end(), line_num, &mut options)?;
                continue;
            }

            match &mut block {
                Block::Start => return Err(malformed(line_num, "indented line outside of any block")),
                Block::Options => {
                    let partial = options.get_or_insert_with(PartialOptions::default);
                    self.parse_option(line, line_num, partial)?;
                }
                Block::Macro { filename, code, .. } => {
                    if let (Some(code), Some(rest)) = (code.as_mut(), line.strip_prefix(CODE_INDENT)) {
                        code.push(rest.to_string());
                        continue;
                    }
                    let (key, value) = split_field(line, line_num)?;
                    match key {
                        "filename" => *filename = Some(unquote(value)),
                        "code" if value == "|" => *code = Some(Vec::new()),
                        _ => return Err(malformed(line_num, format!("unexpected vba field '{}'", key))),
                    }
                }
                Block::Entry { lines, .. } => {
                    let Some(rest) = line.strip_prefix(ENTRY_INDENT) else {
                        return Err(malformed(line_num, "entry content must be indented two spaces"));
                    };
                    lines.push(rest.to_string());
                }
            }
        }

        self.finish_block(block, &mut macros, &mut entries)?;

        let options = options.ok_or_else(|| Error::MalformedDocument("missing options".into()))?;
        let extension = options
            .extension
            .ok_or_else(|| Error::MalformedDocument("missing options.extension".into()))?;

        let mut document = Document::new(Options {
            extension,
            compress_binary: options.compress_binary.unwrap_or(false),
        });
        document.options.bare_extension()?;
        document.macros = macros;
        for (path, body) in entries {
            document.push_entry(path, body)?;
        }
        Ok(document)
    }

    /// Start a new top-level block from its key line
    fn open_block(&self, key_line: &str, line_num: usize, options: &mut Option<PartialOptions>) -> Result<Block> {
        let key = key_line.strip_suffix(':').map(str::trim_end);

        if key == Some(OPTIONS_KEY) {
            if options.is_some() {
                return Err(malformed(line_num, "duplicate options block"));
            }
            *options = Some(PartialOptions::default());
            return Ok(Block::Options);
        }

        if options.is_none() {
            return Err(malformed(line_num, "document must start with an options block"));
        }

        if key == Some(VBA_KEY) {
            return Ok(Block::Macro {
                line: line_num,
                filename: None,
                code: None,
            });
        }

        match key_line.strip_suffix(BLOCK_SUFFIX) {
            Some(entry_key) if !entry_key.is_empty() => Ok(Block::Entry {
                key: entry_key.to_string(),
                line: line_num,
                lines: Vec::new(),
            }),
            _ => Err(malformed(line_num, format!("unrecognized key line '{}'", key_line))),
        }
    }

    fn parse_option(&self, line: &str, line_num: usize, options: &mut PartialOptions) -> Result<()> {
        let (key, value) = split_field(line, line_num)?;
        match key {
            "extension" => options.extension = Some(unquote(value)),
            "compress_binary" => {
                let flag = match unquote(value).as_str() {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(malformed(
                            line_num,
                            format!("compress_binary must be true or false, got '{}'", other),
                        ))
                    }
                };
                options.compress_binary = Some(flag);
            }
            other => warn!("line {}: ignoring unknown option '{}'", line_num, other),
        }
        Ok(())
    }

    /// Close a block, validating it and moving its content into the model
    fn finish_block(
        &self,
        block: Block,
        macros: &mut Vec<MacroModule>,
        entries: &mut Vec<(String, EntryBody)>,
    ) -> Result<()> {
        match block {
            Block::Start | Block::Options => Ok(()),
            Block::Macro { line, filename, code } => {
                let filename = filename.ok_or_else(|| malformed(line, "vba block without filename"))?;
                let code = code.ok_or_else(|| malformed(line, "vba block without code"))?;
                macros.push(MacroModule::new(filename, join_block(code)));
                Ok(())
            }
            Block::Entry { key, line, lines } => {
                let path = relative_path_from_key(&key)
                    .map_err(|e| malformed(line, e.to_string()))?;
                let body = match ContentKind::classify(&path) {
                    ContentKind::Markup => EntryBody::Markup(join_block(lines)),
                    ContentKind::Binary => {
                        EntryBody::Binary(lines.iter().map(|l| l.trim()).collect::<String>())
                    }
                };
                if entries.iter().any(|(existing, _)| *existing == path) {
                    return Err(malformed(line, format!("duplicate entry '{}'", key)));
                }
                entries.push((path, body));
                Ok(())
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Join block lines with clip chomping: one final newline, trailing blank
/// lines dropped.
fn join_block(mut lines: Vec<String>) -> String {
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    if lines.is_empty() {
        return String::new();
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Split an indented `key: value` line
fn split_field(line: &str, line_num: usize) -> Result<(&str, &str)> {
    let field = line.trim();
    let (key, value) = field
        .split_once(':')
        .ok_or_else(|| malformed(line_num, format!("expected 'key: value', got '{}'", field)))?;
    Ok((key.trim(), value.trim()))
}

/// Strip double quotes and undo `\"` / `\\` escapes. Plain scalars are
/// returned as-is.
fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn malformed(line: usize, reason: impl std::fmt::Display) -> Error {
    Error::MalformedDocument(format!("line {}: {}", line, reason))
}
