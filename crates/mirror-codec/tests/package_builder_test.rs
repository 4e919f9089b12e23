use mirror_codec::{
    Error, PackageAction, PackageBuilder, StreamCodec, UpdatePackage, MANIFEST_ENTRY,
};
use std::fs::File;
use std::io::Write;
use tempfile::TempDir;
use zip::{write::FileOptions, ZipWriter};

#[test]
fn package_builder_creates_valid_archive() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("1005.zip");

    let codec = StreamCodec::default();
    let encrypted = codec
        .encode(mirror_codec::PayloadKind::Generic, [5, 6], b"png bytes", b"")
        .unwrap();

    PackageBuilder::new()
        .with_version(5)
        .with_file("a/b.png", "store/x1", encrypted.clone())
        .with_deletion("c/d.png")
        .write_to(&path)
        .unwrap();

    let mut package = UpdatePackage::open(&path).unwrap();
    assert_eq!(package.manifest().version, 5);
    assert_eq!(package.manifest().records.len(), 2);
    assert!(package.contains("store/x1"));
    assert!(!package.contains("c/d.png"));

    let raw = package.read_entry("store/x1").unwrap();
    assert_eq!(raw, encrypted);
    assert_eq!(&codec.decode(&raw).unwrap()[..], b"png bytes");

    let names: Vec<String> = package
        .entries()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec![MANIFEST_ENTRY.to_string(), "store/x1".to_string()]);
}

#[test]
fn dangling_record_is_listed_but_absent() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dangling.zip");

    PackageBuilder::new()
        .with_version(9)
        .with_dangling_record("ui/missing.png", "ff/0000")
        .write_to(&path)
        .unwrap();

    let mut package = UpdatePackage::open(&path).unwrap();
    assert_eq!(
        package.manifest().records[0].action,
        PackageAction::Upsert {
            physical_path: "ff/0000".to_string()
        }
    );
    assert!(!package.contains("ff/0000"));
    let err = package.read_entry("ff/0000").unwrap_err();
    assert!(matches!(err, Error::MissingEntry(name) if name == "ff/0000"));
}

#[test]
fn package_missing_manifest_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("no-manifest.zip");

    let file = File::create(&path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options: FileOptions<()> =
        FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file("store/x1", options).unwrap();
    zip.write_all(b"data").unwrap();
    zip.finish().unwrap();

    let err = UpdatePackage::open(&path).expect_err("missing manifest must fail");
    assert!(matches!(err, Error::MissingEntry(entry) if entry == MANIFEST_ENTRY));
}

#[test]
fn package_with_bad_version_line_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bad-version.zip");

    let file = File::create(&path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options: FileOptions<()> =
        FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file(MANIFEST_ENTRY, options).unwrap();
    zip.write_all(b"release five\n\n").unwrap();
    zip.finish().unwrap();

    let err = UpdatePackage::open(&path).expect_err("bad version must fail");
    assert!(matches!(err, Error::InvalidManifest(_)));
}

#[test]
fn extract_zip_materialises_entries() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.zip");

    let file = File::create(&path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options: FileOptions<()> =
        FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    zip.start_file("gameConfig.db", options).unwrap();
    zip.write_all(b"SQLite format 3\0").unwrap();
    zip.finish().unwrap();

    let out = temp.path().join("out");
    mirror_codec::extract_zip(&path, &out).unwrap();
    assert_eq!(
        std::fs::read(out.join("gameConfig.db")).unwrap(),
        b"SQLite format 3\0"
    );
}
