//! # xlsx-yml
//!
//! Flatten spreadsheet packages (`.xlsx`, `.xlsm`) into one line-oriented text
//! document that diffs and merges well under version control, and rebuild a
//! working package from that document.
//!
//! ## Document Format
//!
//! ```text
//! options:
//!   extension: ".xlsm"
//!   compress_binary: false
//! vba:
//!   filename: "Module2.bas"
//!   code: |
//!     Attribute VB_Name = "Module2"
//!     Sub Foo()
//!     End Sub
//! output_dir/xl/workbook.xml: |
//!   <?xml version="1.0" encoding="UTF-8" standalone="yes"?>
//!   <workbook>
//!     <sheets/>
//!   </workbook>
//! output_dir/xl/media/image1.png: |
//!   iVBORw0KGgoAAAANSUhEUgAA...
//! ```
//!
//! The `options` block always comes first. `vba` blocks carry a readable copy
//! of each macro module that holds real code; they are ignored when the
//! package is rebuilt, since the project itself travels in the
//! `xl/vbaProject.bin` entry.
//!
//! ## Entry Classification
//!
//! An entry is markup when its extension is `xml`, `vml` or `rels` (the bare
//! `.rels` file counts). Markup is stored pretty-printed, two spaces per
//! level; everything else is base64, optionally gzip-compressed first.
//!
//! ## Lock Safety
//!
//! An existing output that cannot be removed is reported as
//! [`Error::FileLocked`] and left exactly as it was. Scratch trees live in a
//! temporary directory and are removed on every exit path.

pub mod batch;
pub mod convert;
pub mod decoder;
pub mod document;
pub mod encoder;
pub mod error;
pub mod macros;
pub mod markup;
pub mod ovba;
pub mod package;
pub mod settings;
pub mod transcode;

pub use batch::{BatchReport, Direction, FileResult};
pub use convert::{convert_to_package, convert_to_text, ConvertOptions, TextOutcome};
pub use decoder::Decoder;
pub use document::{ContentKind, Document, Entry, EntryBody, MacroModule, Options};
pub use encoder::Encoder;
pub use error::{Error, Result};
pub use markup::canonicalize;
pub use settings::Settings;
pub use transcode::Transcoder;
