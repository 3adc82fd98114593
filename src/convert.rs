//! Conversion entry points: package to document and back.
//!
//! Each call owns one scratch tree for its whole lifetime. Every step runs
//! inside it and the tree is dropped before the call returns, whether the
//! conversion succeeded or not.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::decoder::Decoder;
use crate::document::{package_extension, Document, EntryBody, Options};
use crate::encoder::{build_document, Encoder};
use crate::error::{Error, IoContext, Result};
use crate::macros;
use crate::package::{self, Scratch};
use crate::transcode::Transcoder;

/// Suffix appended to a package path to name its document.
pub const DOCUMENT_SUFFIX: &str = ".yml";
/// Extension of the separate macro-source artifact.
pub const MACRO_FILE_EXTENSION: &str = "vba";

/// Resolved options for one conversion
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Also write the macro blocks to `<package stem>.vba`
    pub separate_macro_file: bool,
    /// Gzip binary entries before base64 encoding (forward direction only;
    /// decoding follows what the document records)
    pub compress_binary: bool,
    /// Where to create scratch trees; the system temp dir when unset
    pub scratch_parent: Option<PathBuf>,
}

/// Artifacts produced by [`convert_to_text`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextOutcome {
    pub document: PathBuf,
    /// Set when a separate macro file was requested and macros were found
    pub macro_file: Option<PathBuf>,
    pub entries: usize,
    pub macro_modules: usize,
}

/// `Book1.xlsx` -> `Book1.xlsx.yml`
pub fn document_path_for(package_path: &Path) -> PathBuf {
    let mut name: OsString = package_path.as_os_str().to_owned();
    name.push(DOCUMENT_SUFFIX);
    PathBuf::from(name)
}

/// `Book1.xlsm` -> `Book1.vba`
pub fn macro_path_for(package_path: &Path) -> PathBuf {
    package_path.with_extension(MACRO_FILE_EXTENSION)
}

/// `Book1.xlsx.yml` + `.xlsm` -> `Book1.xlsm`
pub fn package_path_for(document_path: &Path, options: &Options) -> Result<PathBuf> {
    let extension = options.bare_extension()?;
    let base = match document_path.extension() {
        Some(ext) if ext == &DOCUMENT_SUFFIX[1..] => document_path.with_extension(""),
        _ => document_path.to_path_buf(),
    };
    Ok(base.with_extension(extension))
}

/// Remove a previous output so it can be replaced.
///
/// A missing file is fine. Any failure to remove an existing one (open in
/// another process, permissions, a directory in the way) is reported as
/// [`Error::FileLocked`] and leaves the file untouched.
pub fn remove_stale_output(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        _ => {}
    }
    fs::remove_file(path).map_err(|e| {
        warn!("cannot remove {}: {}", path.display(), e);
        Error::FileLocked {
            path: path.to_path_buf(),
        }
    })
}

/// Flatten a package into its document, plus the macro file if requested.
pub fn convert_to_text(package_path: &Path, options: &ConvertOptions) -> Result<TextOutcome> {
    let document_path = document_path_for(package_path);
    remove_stale_output(&document_path)?;

    let macro_path = options
        .separate_macro_file
        .then(|| macro_path_for(package_path));
    if let Some(path) = &macro_path {
        remove_stale_output(path)?;
    }

    let extension = package_extension(package_path).ok_or_else(|| {
        Error::io(
            format!("{} has no file extension", package_path.display()),
            io::Error::new(io::ErrorKind::InvalidInput, "missing extension"),
        )
    })?;
    let doc_options = Options {
        extension,
        compress_binary: options.compress_binary,
    };

    let scratch = Scratch::new(options.scratch_parent.as_deref())?;
    let entries = package::decompose(package_path, scratch.root())?;
    let modules = if doc_options.supports_macros() {
        macros::extract(package_path)?
    } else {
        Vec::new()
    };
    let document = build_document(doc_options, &entries, modules)?;

    let encoder = Encoder::new();
    let macro_file = macro_path.filter(|_| !document.macros.is_empty());
    let mut outputs = vec![(document_path.clone(), encoder.encode(&document))];
    if let Some(path) = &macro_file {
        outputs.push((path.clone(), encoder.encode_macros(&document.macros)));
    }
    write_outputs(&outputs)?;

    scratch.close()?;

    info!(
        "{} -> {} ({} entries, {} macro modules)",
        package_path.display(),
        document_path.display(),
        document.entries.len(),
        document.macros.len()
    );
    Ok(TextOutcome {
        document: document_path,
        macro_file,
        entries: document.entries.len(),
        macro_modules: document.macros.len(),
    })
}

/// Rebuild a package from its document. Returns the package path.
///
/// The macro blocks are informational copies; the project itself travels
/// in the `vbaProject.bin` entry.
pub fn convert_to_package(document_path: &Path, options: &ConvertOptions) -> Result<PathBuf> {
    let text = fs::read_to_string(document_path)
        .io_context(|| format!("read {}", document_path.display()))?;
    let document = Decoder::new().decode(&text)?;

    let package_path = package_path_for(document_path, &document.options)?;
    remove_stale_output(&package_path)?;

    let scratch = Scratch::new(options.scratch_parent.as_deref())?;
    materialize(&document, scratch.root())?;
    package::compose(scratch.root(), &package_path)?;
    scratch.close()?;

    info!(
        "{} -> {} ({} entries)",
        document_path.display(),
        package_path.display(),
        document.entries.len()
    );
    Ok(package_path)
}

/// Write every document entry into the scratch tree.
pub fn materialize(document: &Document, root: &Path) -> Result<()> {
    let transcoder = Transcoder::new(document.options.compress_binary);
    for (path, body) in &document.entries {
        let data = match body {
            EntryBody::Markup(text) => text.as_bytes().to_vec(),
            EntryBody::Binary(base64) => transcoder
                .decode(base64)
                .map_err(|e| Error::MalformedDocument(format!("entry {}: {}", path, e)))?,
        };
        debug!("materialize {} ({} bytes)", path, data.len());
        package::write_entry(root, path, &data)?;
    }
    Ok(())
}

/// Write every output in order. If one write fails, the outputs written so
/// far and the failed one are removed again.
fn write_outputs(outputs: &[(PathBuf, String)]) -> Result<()> {
    for (i, (path, contents)) in outputs.iter().enumerate() {
        if let Err(e) = fs::write(path, contents) {
            for (written, _) in &outputs[..=i] {
                let _ = fs::remove_file(written);
            }
            return Err(Error::io(format!("write {}", path.display()), e));
        }
    }
    Ok(())
}
