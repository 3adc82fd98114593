//! Package decomposition and composition over a scratch tree

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::document::{Entry, SCRATCH_ROOT};
use crate::error::{Error, IoContext, Result};

/// Deflate level used for every rebuilt package.
pub const COMPRESSION_LEVEL: i64 = 9;

const SCRATCH_PREFIX: &str = "xlsx-yml-";

/// Temporary directory scoped to one conversion.
///
/// Entries live under `<tempdir>/output_dir/`, so paths relative to the
/// temporary directory match the document's entry keys. Dropping the value
/// removes the whole tree, on success and on every error path.
#[derive(Debug)]
pub struct Scratch {
    dir: TempDir,
    root: PathBuf,
}

impl Scratch {
    /// Create a scratch tree in `parent`, or in the system temp dir.
    pub fn new(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .io_context(|| "create scratch directory")?;

        let root = dir.path().join(SCRATCH_ROOT);
        fs::create_dir(&root).io_context(|| format!("create {}", root.display()))?;
        debug!("scratch tree at {}", root.display());
        Ok(Self { dir, root })
    }

    /// Directory holding the entries.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove the tree now, reporting failures instead of ignoring them.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .io_context(|| format!("remove scratch directory {}", path.display()))
    }
}

/// Extract every member of the package into `root`, then read the tree back
/// as entries in traversal order.
pub fn decompose(package_path: &Path, root: &Path) -> Result<Vec<Entry>> {
    let corrupt = |source| Error::CorruptArchive {
        path: package_path.to_path_buf(),
        source,
    };

    let file = fs::File::open(package_path)
        .io_context(|| format!("open {}", package_path.display()))?;
    let mut zip = ZipArchive::new(file).map_err(corrupt)?;

    for i in 0..zip.len() {
        let mut member = zip.by_index(i).map_err(corrupt)?;
        let relative = member.enclosed_name().ok_or_else(|| Error::UnsafeMember {
            path: package_path.to_path_buf(),
            member: member.name().to_string(),
        })?;
        let target = root.join(relative);

        // Directory members carry no content and have no document entry;
        // the rebuilt package lists files only
        if member.is_dir() {
            debug!("{}: dropping directory member {}", package_path.display(), member.name());
            fs::create_dir_all(&target).io_context(|| format!("create {}", target.display()))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).io_context(|| format!("create {}", parent.display()))?;
        }

        let mut out = fs::File::create(&target).io_context(|| format!("create {}", target.display()))?;
        io::copy(&mut member, &mut out).map_err(|e| {
            // Deflate and CRC failures surface here as io errors
            Error::CorruptArchive {
                path: package_path.to_path_buf(),
                source: zip::result::ZipError::Io(e),
            }
        })?;
    }

    read_tree(root)
}

/// Read every file under `root` as an entry, lexicographic by path.
pub fn read_tree(root: &Path) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for path in walk_files(root)? {
        let relative = relative_name(root, &path)?;
        let data = fs::read(&path).io_context(|| format!("read {}", path.display()))?;
        entries.push(Entry::new(relative, data));
    }
    Ok(entries)
}

/// Write `data` at `relative` under `root`, creating parent directories.
pub fn write_entry(root: &Path, relative: &str, data: &[u8]) -> Result<()> {
    let target = root.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).io_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&target, data).io_context(|| format!("write {}", target.display()))
}

/// Pack every file under `root` into a new archive at `dest`.
///
/// A partially written archive is removed before the error is returned.
pub fn compose(root: &Path, dest: &Path) -> Result<()> {
    let result = write_archive(root, dest);
    if result.is_err() {
        let _ = fs::remove_file(dest);
    }
    result
}

fn write_archive(root: &Path, dest: &Path) -> Result<()> {
    let zip_error = |e: zip::result::ZipError| {
        Error::io(
            format!("write archive {}", dest.display()),
            io::Error::new(io::ErrorKind::Other, e),
        )
    };

    let file = fs::File::create(dest).io_context(|| format!("create {}", dest.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::<()>::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));

    for path in walk_files(root)? {
        let name = relative_name(root, &path)?;
        writer.start_file(name.as_str(), options).map_err(zip_error)?;
        let mut input = fs::File::open(&path).io_context(|| format!("open {}", path.display()))?;
        io::copy(&mut input, &mut writer).io_context(|| format!("pack {}", name))?;
    }

    writer.finish().map_err(zip_error)?;
    Ok(())
}

/// All regular files below `root`, sorted by file name within each directory
/// so every run visits them in the same order.
fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let context = format!("walk {}", root.display());
            Error::io(context, e.into())
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        Error::io(
            format!("{} is outside {}", path.display(), root.display()),
            io::Error::new(io::ErrorKind::InvalidInput, "path outside scratch tree"),
        )
    })?;
    Ok(relative.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let mut writer = ZipWriter::new(fs::File::create(path).unwrap());
        let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_decompose_sorted_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let package = tmp.path().join("Book1.xlsx");
        write_zip(
            &package,
            &[
                ("xl/workbook.xml", b"<workbook/>"),
                ("[Content_Types].xml", b"<Types/>"),
                ("_rels/.rels", b"<Relationships/>"),
                ("xl/media/image1.png", &[0x89, b'P', b'N', b'G']),
            ],
        );

        let scratch = Scratch::new(Some(tmp.path())).unwrap();
        let entries = decompose(&package, scratch.root()).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["[Content_Types].xml", "_rels/.rels", "xl/media/image1.png", "xl/workbook.xml"]
        );
        assert_eq!(entries[2].data, vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn test_decompose_rejects_non_zip() {
        let tmp = tempfile::tempdir().unwrap();
        let package = tmp.path().join("Book1.xlsx");
        fs::write(&package, b"this is not a zip file").unwrap();

        let scratch = Scratch::new(Some(tmp.path())).unwrap();
        let err = decompose(&package, scratch.root()).unwrap_err();
        assert!(matches!(err, Error::CorruptArchive { .. }));
    }

    #[test]
    fn test_compose_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = Scratch::new(Some(tmp.path())).unwrap();
        write_entry(scratch.root(), "xl/worksheets/sheet1.xml", b"<worksheet/>").unwrap();
        write_entry(scratch.root(), "docProps/app.xml", b"<Properties/>").unwrap();

        let dest = tmp.path().join("out.xlsx");
        compose(scratch.root(), &dest).unwrap();

        let mut zip = ZipArchive::new(fs::File::open(&dest).unwrap()).unwrap();
        let names: Vec<&str> = zip.file_names().collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"docProps/app.xml"));
        let mut sheet = String::new();
        io::Read::read_to_string(&mut zip.by_name("xl/worksheets/sheet1.xml").unwrap(), &mut sheet)
            .unwrap();
        assert_eq!(sheet, "<worksheet/>");

        for i in 0..zip.len() {
            assert_eq!(zip.by_index(i).unwrap().compression(), CompressionMethod::Deflated);
        }
    }

    #[test]
    fn test_directory_members_are_not_rebuilt() {
        let tmp = tempfile::tempdir().unwrap();
        let package = tmp.path().join("Book1.xlsx");
        let mut writer = ZipWriter::new(fs::File::create(&package).unwrap());
        writer.add_directory("xl/", FileOptions::<()>::default()).unwrap();
        writer.start_file("xl/workbook.xml", FileOptions::<()>::default()).unwrap();
        writer.write_all(b"<workbook/>").unwrap();
        writer.finish().unwrap();

        let scratch = Scratch::new(Some(tmp.path())).unwrap();
        let entries = decompose(&package, scratch.root()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "xl/workbook.xml");

        let dest = tmp.path().join("out.xlsx");
        compose(scratch.root(), &dest).unwrap();
        let zip = ZipArchive::new(fs::File::open(&dest).unwrap()).unwrap();
        assert_eq!(zip.file_names().collect::<Vec<_>>(), vec!["xl/workbook.xml"]);
    }

    #[test]
    fn test_scratch_removed_on_drop_and_close() {
        let tmp = tempfile::tempdir().unwrap();

        let scratch = Scratch::new(Some(tmp.path())).unwrap();
        let root = scratch.root().to_path_buf();
        write_entry(&root, "a/b.xml", b"<b/>").unwrap();
        drop(scratch);
        assert!(!root.exists());

        let scratch = Scratch::new(Some(tmp.path())).unwrap();
        let root = scratch.root().to_path_buf();
        scratch.close().unwrap();
        assert!(!root.exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
