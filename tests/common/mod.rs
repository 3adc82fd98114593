#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use xlsx_yml::ovba::compress_container;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const WORKBOOK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

pub const SHEET_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t xml:space="preserve">hello  world</t></is></c><c r="B1"><v>42</v></c></row></sheetData></worksheet>"#;

pub const RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

/// PNG signature followed by bytes that are not valid UTF-8.
pub const IMAGE_PNG: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0xFF, 0xFE, 0x80, 0x00,
];

pub fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
    let mut writer = ZipWriter::new(fs::File::create(path).unwrap());
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

pub fn read_zip(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut zip = ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    let mut members = BTreeMap::new();
    for i in 0..zip.len() {
        let mut member = zip.by_index(i).unwrap();
        if member.is_dir() {
            continue;
        }
        let mut data = Vec::new();
        member.read_to_end(&mut data).unwrap();
        members.insert(member.name().to_string(), data);
    }
    members
}

/// The three-entry workbook used across the round-trip tests.
pub fn write_simple_workbook(path: &Path) {
    write_zip(
        path,
        &[
            ("xl/workbook.xml", WORKBOOK_XML.as_bytes()),
            ("xl/worksheets/sheet1.xml", SHEET_XML.as_bytes()),
            ("xl/media/image1.png", IMAGE_PNG),
        ],
    );
}

fn push_record(out: &mut Vec<u8>, id: u16, data: &[u8]) {
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
}

/// Build a minimal `vbaProject.bin` holding one procedural module per
/// `(name, source)` pair.
pub fn vba_project(modules: &[(&str, &str)]) -> Vec<u8> {
    let mut dir = Vec::new();
    push_record(&mut dir, 0x0003, &1252u16.to_le_bytes());
    push_record(&mut dir, 0x0004, b"VBAProject");
    for (name, _) in modules {
        push_record(&mut dir, 0x0019, name.as_bytes());
        push_record(&mut dir, 0x001A, name.as_bytes());
        push_record(&mut dir, 0x0021, &[]);
        push_record(&mut dir, 0x0031, &0u32.to_le_bytes());
    }

    let mut ole = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
    ole.create_storage("VBA").unwrap();
    {
        let mut stream = ole.create_stream("VBA/dir").unwrap();
        stream.write_all(&compress_container(&dir)).unwrap();
    }
    for (name, source) in modules {
        let mut stream = ole.create_stream(format!("VBA/{name}")).unwrap();
        stream.write_all(&compress_container(source.as_bytes())).unwrap();
    }
    ole.into_inner().into_inner()
}

/// Structural comparison: element names, attributes and non-blank text.
pub fn same_markup(left: &[u8], right: &[u8]) -> bool {
    let left = std::str::from_utf8(left).unwrap();
    let right = std::str::from_utf8(right).unwrap();
    let left = roxmltree::Document::parse(left).unwrap();
    let right = roxmltree::Document::parse(right).unwrap();
    same_node(left.root_element(), right.root_element())
}

fn same_node(left: roxmltree::Node, right: roxmltree::Node) -> bool {
    if left.tag_name() != right.tag_name() || attributes(left) != attributes(right) {
        return false;
    }
    let (lc, rc) = (significant_children(left), significant_children(right));
    lc.len() == rc.len()
        && lc.iter().zip(&rc).all(|(l, r)| match (l.is_element(), r.is_element()) {
            (true, true) => same_node(*l, *r),
            (false, false) => l.text() == r.text(),
            _ => false,
        })
}

fn attributes(node: roxmltree::Node) -> Vec<(Option<String>, String, String)> {
    node.attributes()
        .map(|a| (a.namespace().map(str::to_string), a.name().to_string(), a.value().to_string()))
        .collect()
}

fn significant_children<'a, 'input>(node: roxmltree::Node<'a, 'input>) -> Vec<roxmltree::Node<'a, 'input>> {
    node.children()
        .filter(|c| c.is_element() || (c.is_text() && !c.text().unwrap_or("").trim().is_empty()))
        .collect()
}

pub fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).unwrap().next().is_none()
}
