//! Macro source extraction from the original package.
//!
//! The VBA project lives in a `vbaProject.bin` part, an OLE compound file
//! holding a compressed `VBA/dir` stream and one stream per module. Only
//! modules with real code survive: a module whose every line is an
//! `Attribute ...` declaration (Excel writes those for every sheet) is
//! dropped.

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use log::{debug, warn};
use zip::ZipArchive;

use crate::document::MacroModule;
use crate::error::{Error, Result};
use crate::ovba::{self, DirStream};

/// Lines starting with this keyword do not count as code.
pub const BOILERPLATE_KEYWORD: &str = "Attribute";

const VBA_PROJECT_PART: &str = "vbaproject.bin";
const DIR_STREAM: &str = "VBA/dir";

/// Extract the non-boilerplate macro modules of a macro-enabled package,
/// in discovery order. A package without a VBA project yields no modules;
/// a project that exists but cannot be read is an error.
pub fn extract(package_path: &Path) -> Result<Vec<MacroModule>> {
    let Some(project) = read_project_part(package_path)? else {
        debug!("{}: no VBA project part", package_path.display());
        return Ok(Vec::new());
    };

    let modules = parse_project(&project)?;
    let total = modules.len();
    let kept: Vec<MacroModule> = modules
        .into_iter()
        .filter(|module| {
            let keep = contains_code(&module.code);
            if !keep {
                warn!("skipping boilerplate-only module {}", module.filename);
            }
            keep
        })
        .collect();

    debug!(
        "{}: kept {} of {} macro modules",
        package_path.display(),
        kept.len(),
        total
    );
    Ok(kept)
}

/// True if at least one line is not a boilerplate declaration.
pub fn contains_code(code: &str) -> bool {
    code.lines()
        .any(|line| !line.trim_start().starts_with(BOILERPLATE_KEYWORD))
}

/// Read every module of a `vbaProject.bin` image, boilerplate included.
pub fn parse_project(vba_project_bin: &[u8]) -> Result<Vec<MacroModule>> {
    let mut ole = cfb::CompoundFile::open(Cursor::new(vba_project_bin)).map_err(Error::macro_parse)?;

    let dir_bytes = read_stream(&mut ole, DIR_STREAM)?;
    let dir_decompressed = ovba::decompress_container(&dir_bytes).map_err(Error::macro_parse)?;
    let dir = DirStream::parse(&dir_decompressed).map_err(Error::macro_parse)?;
    let encoding = dir.encoding();
    debug!(
        "VBA project {}: {} modules, codepage {:?}",
        dir.project_name.as_deref().unwrap_or("<unnamed>"),
        dir.modules.len(),
        dir.codepage
    );

    let mut modules = Vec::with_capacity(dir.modules.len());
    for record in &dir.modules {
        let stream = read_stream(&mut ole, &format!("VBA/{}", record.stream_name))?;
        let source = stream.get(record.text_offset..).ok_or_else(|| {
            Error::macro_parse(format!(
                "module {} text offset {} is past the end of its stream",
                record.name, record.text_offset
            ))
        })?;
        let source = ovba::decompress_container(source)
            .map_err(|e| Error::macro_parse(format!("module {}: {}", record.name, e)))?;

        modules.push(MacroModule::new(
            format!("{}.{}", record.name, record.kind.file_extension()),
            ovba::decode(&source, encoding),
        ));
    }
    Ok(modules)
}

fn read_stream<F: Read + std::io::Seek>(ole: &mut cfb::CompoundFile<F>, path: &str) -> Result<Vec<u8>> {
    let mut stream = ole
        .open_stream(path)
        .map_err(|e| Error::macro_parse(format!("missing stream {}: {}", path, e)))?;
    let mut bytes = Vec::new();
    stream
        .read_to_end(&mut bytes)
        .map_err(|e| Error::macro_parse(format!("read stream {}: {}", path, e)))?;
    Ok(bytes)
}

/// Pull the `vbaProject.bin` bytes out of the package, if there is one.
fn read_project_part(package_path: &Path) -> Result<Option<Vec<u8>>> {
    let file = fs::File::open(package_path)
        .map_err(|e| Error::io(format!("open {}", package_path.display()), e))?;
    let mut zip = ZipArchive::new(file).map_err(|source| Error::CorruptArchive {
        path: package_path.to_path_buf(),
        source,
    })?;

    let Some(name) = zip
        .file_names()
        .find(|name| is_project_part(name))
        .map(str::to_string)
    else {
        return Ok(None);
    };

    let mut part = zip.by_name(&name).map_err(|source| Error::CorruptArchive {
        path: package_path.to_path_buf(),
        source,
    })?;
    let mut bytes = Vec::with_capacity(part.size() as usize);
    part.read_to_end(&mut bytes).map_err(|e| {
        warn!("{}: unreadable VBA project part {}", package_path.display(), name);
        Error::macro_parse(format!("read {}: {}", name, e))
    })?;
    Ok(Some(bytes))
}

fn is_project_part(name: &str) -> bool {
    name.rsplit('/')
        .next()
        .is_some_and(|file| file.eq_ignore_ascii_case(VBA_PROJECT_PART))
}
