//! Document data structures

use std::path::Path;

use crate::error::{Error, Result};

// Document format constants
pub const OPTIONS_KEY: &str = "options";
pub const VBA_KEY: &str = "vba";
pub const BLOCK_SUFFIX: &str = ": |";
pub const ENTRY_INDENT: &str = "  ";
pub const CODE_INDENT: &str = "    ";

/// Leading segment of every entry key. Keys are paths relative to the
/// scratch directory, so they start with the name of the scratch root.
pub const SCRATCH_ROOT: &str = "output_dir";

/// Extension of the macro-enabled workbook variant.
pub const MACRO_EXTENSION: &str = ".xlsm";

const MARKUP_EXTENSIONS: [&str; 3] = ["xml", "vml", "rels"];

/// How an entry is represented inside the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Canonicalized, indented markup text
    Markup,
    /// Base64 (optionally gzip-compressed first)
    Binary,
}

impl ContentKind {
    /// Classify an entry from its path alone.
    ///
    /// `xml`, `vml` and `rels` extensions are markup, as is a bare `.rels`
    /// file. Everything else is binary. The decoder relies on this giving the
    /// same answer for the same path, so it must never look at content.
    pub fn classify(path: &str) -> Self {
        let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        let (stem, extension) = match name.rfind('.') {
            Some(0) | None => (name, None),
            Some(dot) => (&name[..dot], Some(&name[dot + 1..])),
        };

        if extension.is_some_and(|ext| MARKUP_EXTENSIONS.contains(&ext)) || stem == ".rels" {
            ContentKind::Markup
        } else {
            ContentKind::Binary
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Markup => "markup",
            ContentKind::Binary => "binary",
        }
    }
}

/// One member of a package, addressed by its `/`-separated relative path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub data: Vec<u8>,
}

impl Entry {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: normalize_separators(&path.into()),
            data: data.into(),
        }
    }

    pub fn kind(&self) -> ContentKind {
        ContentKind::classify(&self.path)
    }

    /// The document key for this entry, e.g. `output_dir/xl/workbook.xml`.
    pub fn key(&self) -> String {
        entry_key(&self.path)
    }
}

/// Build the document key for a relative entry path.
pub fn entry_key(relative: &str) -> String {
    format!("{}/{}", SCRATCH_ROOT, normalize_separators(relative))
}

/// Recover the relative entry path from a document key.
///
/// The key is split on the path separator and its leading scratch-root
/// segment dropped. Keys that would land outside the scratch tree are
/// rejected.
pub fn relative_path_from_key(key: &str) -> Result<String> {
    let normalized = normalize_separators(key);
    let mut segments = normalized.split('/');

    match segments.next() {
        Some(SCRATCH_ROOT) => {}
        _ => {
            return Err(Error::MalformedDocument(format!(
                "entry key '{}' does not start with '{}/'",
                key, SCRATCH_ROOT
            )))
        }
    }

    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() || rest.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
        return Err(Error::MalformedDocument(format!(
            "entry key '{}' is not a plain relative path",
            key
        )));
    }
    if rest[0].contains(':') {
        return Err(Error::MalformedDocument(format!(
            "entry key '{}' names a drive or scheme",
            key
        )));
    }

    Ok(rest.join("/"))
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// The options record written at the top of every document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Extension of the original package, with its leading dot
    pub extension: String,
    /// Whether binary entries were gzip-compressed before base64 encoding
    pub compress_binary: bool,
}

impl Options {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            compress_binary: false,
        }
    }

    /// Only the macro-enabled package type can carry a VBA project.
    pub fn supports_macros(&self) -> bool {
        self.extension.eq_ignore_ascii_case(MACRO_EXTENSION)
    }

    /// Extension without the leading dot, validated for use in a file name.
    pub fn bare_extension(&self) -> Result<&str> {
        let bare = self.extension.strip_prefix('.').ok_or_else(|| {
            Error::MalformedDocument(format!(
                "options.extension '{}' must start with '.'",
                self.extension
            ))
        })?;
        if bare.is_empty() || bare.contains(['/', '\\', '.']) {
            return Err(Error::MalformedDocument(format!(
                "options.extension '{}' is not a file extension",
                self.extension
            )));
        }
        Ok(bare)
    }
}

/// Text form of one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryBody {
    Markup(String),
    Binary(String),
}

impl EntryBody {
    pub fn kind(&self) -> ContentKind {
        match self {
            EntryBody::Markup(_) => ContentKind::Markup,
            EntryBody::Binary(_) => ContentKind::Binary,
        }
    }
}

/// A macro module kept for independent diffing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroModule {
    /// Declared filename, e.g. `Module1.bas`
    pub filename: String,
    /// Full module source, boilerplate lines included
    pub code: String,
}

impl MacroModule {
    pub fn new(filename: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            code: code.into(),
        }
    }
}

/// The single text artifact describing a whole package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub options: Options,
    pub macros: Vec<MacroModule>,
    /// Relative entry path and body, in scratch-tree traversal order
    pub entries: Vec<(String, EntryBody)>,
}

impl Document {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            macros: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Add an entry. Returns an error if the path is already present.
    pub fn push_entry(&mut self, path: impl Into<String>, body: EntryBody) -> Result<()> {
        let path = normalize_separators(&path.into());
        if self.entries.iter().any(|(existing, _)| *existing == path) {
            return Err(Error::MalformedDocument(format!("duplicate entry: {}", path)));
        }
        self.entries.push((path, body));
        Ok(())
    }

    pub fn entry(&self, path: &str) -> Option<&EntryBody> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == path)
            .map(|(_, body)| body)
    }
}

/// Extension of a package path with its leading dot, e.g. `.xlsx`.
pub fn package_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
}
