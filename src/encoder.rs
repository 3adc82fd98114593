//! Document encoder

use log::debug;

use crate::document::{
    ContentKind, Document, Entry, EntryBody, MacroModule, Options, BLOCK_SUFFIX, CODE_INDENT,
    ENTRY_INDENT, OPTIONS_KEY, VBA_KEY,
};
use crate::error::Result;
use crate::markup;
use crate::transcode::Transcoder;

/// Turn one decomposed entry into its document body.
///
/// Markup is canonicalized; everything else goes through the transcoder.
/// Pure with respect to the filesystem, so it can be exercised entry by entry.
pub fn transform_entry(entry: &Entry, transcoder: &Transcoder) -> Result<EntryBody> {
    let body = match entry.kind() {
        ContentKind::Markup => EntryBody::Markup(markup::canonicalize(&entry.path, &entry.data)?),
        ContentKind::Binary => EntryBody::Binary(transcoder.encode(&entry.data)?),
    };
    debug!("{} -> {} ({} bytes)", entry.path, body.kind().as_str(), entry.data.len());
    Ok(body)
}

/// Build a document from decomposed entries and extracted macros.
pub fn build_document(options: Options, entries: &[Entry], macros: Vec<MacroModule>) -> Result<Document> {
    let transcoder = Transcoder::new(options.compress_binary);
    let mut document = Document::new(options);
    for entry in entries {
        document.push_entry(entry.path.clone(), transform_entry(entry, &transcoder)?)?;
    }
    document.macros = macros;
    Ok(document)
}

/// Encodes a document into its text form
pub struct Encoder {
    // Currently stateless, but reserved for future options
}

impl Encoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {}
    }

    /// Encode a document to a string
    pub fn encode(&self, document: &Document) -> String {
        let mut output = String::new();

        self.encode_options(&mut output, &document.options);
        for module in &document.macros {
            self.encode_macro(&mut output, module);
        }
        for (path, body) in &document.entries {
            self.encode_entry(&mut output, path, body);
        }

        output
    }

    /// Encode only the macro blocks, for the separate macro artifact
    pub fn encode_macros(&self, macros: &[MacroModule]) -> String {
        let mut output = String::new();
        for module in macros {
            self.encode_macro(&mut output, module);
        }
        output
    }

    fn encode_options(&self, output: &mut String, options: &Options) {
        output.push_str(OPTIONS_KEY);
        output.push_str(": \n");
        output.push_str(&format!("{}extension: {}\n", ENTRY_INDENT, quote(&options.extension)));
        output.push_str(&format!("{}compress_binary: {}\n", ENTRY_INDENT, options.compress_binary));
    }

    fn encode_macro(&self, output: &mut String, module: &MacroModule) {
        output.push_str(VBA_KEY);
        output.push_str(": \n");
        output.push_str(&format!("{}filename: {}\n", ENTRY_INDENT, quote(&module.filename)));
        output.push_str(&format!("{}code{}\n", ENTRY_INDENT, BLOCK_SUFFIX));
        // Code is emitted verbatim, trailing whitespace included
        for line in module.code.lines() {
            output.push_str(CODE_INDENT);
            output.push_str(line);
            output.push('\n');
        }
    }

    fn encode_entry(&self, output: &mut String, path: &str, body: &EntryBody) {
        output.push_str(&crate::document::entry_key(path));
        output.push_str(BLOCK_SUFFIX);
        output.push('\n');

        match body {
            EntryBody::Markup(text) => output.push_str(&markup::indent_lines(text, ENTRY_INDENT)),
            EntryBody::Binary(base64) => {
                output.push_str(ENTRY_INDENT);
                output.push_str(base64);
                output.push('\n');
            }
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Double-quote a scalar, escaping `\` and `"`.
pub(crate) fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> Document {
        let mut document = Document::new(Options::new(".xlsm"));
        document
            .push_entry(
                "xl/workbook.xml",
                EntryBody::Markup("<workbook>\n  <sheets/>\n</workbook>\n".into()),
            )
            .unwrap();
        document
            .push_entry("xl/media/image1.png", EntryBody::Binary("/9j/".into()))
            .unwrap();
        document.macros.push(MacroModule::new(
            "Module1.bas",
            "Attribute VB_Name = \"Module1\"\r\nSub Foo()\r\nEnd Sub\r\n",
        ));
        document
    }

    #[test]
    fn test_encode_layout() {
        let text = Encoder::new().encode(&sample_document());
        let expected = concat!(
            "options: \n",
            "  extension: \".xlsm\"\n",
            "  compress_binary: false\n",
            "vba: \n",
            "  filename: \"Module1.bas\"\n",
            "  code: |\n",
            "    Attribute VB_Name = \"Module1\"\n",
            "    Sub Foo()\n",
            "    End Sub\n",
            "output_dir/xl/workbook.xml: |\n",
            "  <workbook>\n",
            "    <sheets/>\n",
            "  </workbook>\n",
            "output_dir/xl/media/image1.png: |\n",
            "  /9j/\n",
        );
        pretty_assertions::assert_eq!(text, expected);
    }

    #[test]
    fn test_encode_macros_only() {
        let text = Encoder::new().encode_macros(&sample_document().macros);
        assert!(text.starts_with("vba: \n  filename: \"Module1.bas\"\n  code: |\n"));
        assert!(!text.contains("options"));
        assert!(!text.contains("output_dir"));
    }

    #[test]
    fn test_transform_entry_by_kind() {
        let transcoder = Transcoder::new(false);
        let markup = Entry::new("_rels/.rels", b"<Relationships><Relationship Id=\"rId1\"/></Relationships>".to_vec());
        match transform_entry(&markup, &transcoder).unwrap() {
            EntryBody::Markup(text) => assert!(text.contains("  <Relationship Id=\"rId1\"/>")),
            other => panic!("expected markup, got {other:?}"),
        }

        let binary = Entry::new("xl/media/image1.jpg", vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(
            transform_entry(&binary, &transcoder).unwrap(),
            EntryBody::Binary("/9j/".into())
        );
    }

    #[test]
    fn test_transform_entry_rejects_bad_markup() {
        let entry = Entry::new("xl/styles.xml", b"<styleSheet>".to_vec());
        assert!(transform_entry(&entry, &Transcoder::default()).is_err());
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("Module1.bas"), "\"Module1.bas\"");
        assert_eq!(quote("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }
}
