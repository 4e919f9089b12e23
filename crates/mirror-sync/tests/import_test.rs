use mirror_codec::{PayloadKind, StreamCodec};
use mirror_sync::{
    resolve_client, ClientPaths, Error, ImportStages, Importer, RenameStats,
};
use rayon::ThreadPoolBuilder;
use rusqlite::{params, Connection};
use serde_json::json;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::{write::FileOptions, ZipWriter};

fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options: FileOptions<()> =
        FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn assets_db_bytes(dir: &Path, rows: &[(&str, &str)]) -> Vec<u8> {
    let path = dir.join("assets-src.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE assets (path TEXT, version INTEGER, physical TEXT, \
         size INTEGER, hash TEXT, external INTEGER)",
    )
    .unwrap();
    for (logical, physical) in rows {
        conn.execute(
            "INSERT INTO assets VALUES (?1, 1, ?2, 0, '', 0)",
            params![logical, physical],
        )
        .unwrap();
    }
    drop(conn);
    fs::read(&path).unwrap()
}

/// A bundle with one OBB of stored assets and a base APK.
fn write_xapk(dir: &Path) -> PathBuf {
    let codec = StreamCodec::default();
    let secret = codec
        .encode(PayloadKind::Generic, [1, 2], b"decoded image", b"")
        .unwrap();

    let obb = zip_bytes(&[
        ("ff/0001", secret),
        ("aa/0002", b"plain sound".to_vec()),
    ]);
    let apk = zip_bytes(&[
        ("assets/release/res/extra.bin", b"leftover".to_vec()),
        ("assets/release/script.luac", b"bytecode".to_vec()),
        ("assets/release/.packres_success", Vec::new()),
        (
            "assets/64/assets.db",
            assets_db_bytes(
                dir,
                &[
                    ("ui/logo.png", "ff/0001"),
                    ("ui/logo_copy.png", "ff/0001"),
                    ("sound/bgm.ogg", "aa/0002"),
                    ("ui/missing.png", "ee/9999"),
                ],
            ),
        ),
        (
            "assets/cocos_app.conf",
            br#"{"captainUrl":"http://captain.test","packJobId":1}"#.to_vec(),
        ),
        ("classes.dex", b"dex".to_vec()),
    ]);
    let manifest = json!({
        "package_name": "com.superprism.illusion",
        "expansions": [ { "file": "Android/obb/main.obb", "install_path": "x" } ],
        "split_apks": [ { "file": "base.apk", "id": "base" } ]
    });

    let xapk = dir.join("game.xapk");
    fs::write(
        &xapk,
        zip_bytes(&[
            ("manifest.json", serde_json::to_vec(&manifest).unwrap()),
            ("Android/obb/main.obb", obb),
            ("base.apk", apk),
        ]),
    )
    .unwrap();
    xapk
}

#[test]
fn client_is_read_from_bundle() {
    let temp = TempDir::new().unwrap();
    let xapk = write_xapk(temp.path());

    assert_eq!(resolve_client(None, Some(xapk.as_path())).unwrap().id, "EN");
    assert_eq!(resolve_client(Some("JP"), Some(xapk.as_path())).unwrap().id, "JP");
    assert!(matches!(
        resolve_client(Some("XX"), None),
        Err(Error::UnknownClient(_))
    ));
    assert!(matches!(resolve_client(None, None), Err(Error::Import(_))));
}

#[test]
fn full_import_builds_asset_tree() {
    let temp = TempDir::new().unwrap();
    let xapk = write_xapk(temp.path());
    let paths = ClientPaths::with_defaults(temp.path().join("en-US"));

    // Left over from an earlier run.
    fs::create_dir_all(&paths.asset_dir).unwrap();
    fs::write(paths.asset_dir.join("stale.txt"), b"x").unwrap();

    let error_log = temp.path().join("rename_errors.log");
    let report = Importer::new(paths.clone())
        .with_xapk(&xapk)
        .with_thread_pool(ThreadPoolBuilder::new().num_threads(2).build().unwrap())
        .with_error_log(&error_log, 10)
        .run()
        .unwrap();

    let decoded = report.decoded.unwrap();
    assert_eq!(decoded.decoded, 1);
    assert_eq!(decoded.failed, 0);
    assert_eq!(report.renamed, Some(RenameStats { moved: 2, copied: 1 }));
    assert_eq!(report.catalog_issues, 1);
    assert_eq!(report.tables_converted, None);
    assert_eq!(report.decompiled, None);

    let assets = &paths.asset_dir;
    assert!(!assets.join("stale.txt").exists());
    assert_eq!(fs::read(assets.join("ui/logo.png")).unwrap(), b"decoded image");
    assert_eq!(
        fs::read(assets.join("ui/logo_copy.png")).unwrap(),
        b"decoded image"
    );
    assert_eq!(fs::read(assets.join("sound/bgm.ogg")).unwrap(), b"plain sound");
    assert!(paths.app_config().exists());

    assert_eq!(
        fs::read(paths.remain_dir.join("extra.bin")).unwrap(),
        b"leftover"
    );
    assert!(!paths.remain_dir.join("script.luac").exists());
    assert!(!paths.unpack_dir.exists());
    assert!(!error_log.exists());
}

#[test]
fn stage_combinations_are_validated() {
    let temp = TempDir::new().unwrap();
    let paths = ClientPaths::with_defaults(temp.path().join("en-US"));

    let err = Importer::new(paths.clone()).run().unwrap_err();
    assert!(matches!(err, Error::Import(_)));

    let stages = ImportStages {
        extract: false,
        rename: false,
        ..ImportStages::default()
    };
    let err = Importer::new(paths).with_stages(stages).run().unwrap_err();
    assert!(matches!(err, Error::Import(_)));
}

#[test]
fn gameconfig_stage_without_archive_is_skipped() {
    let temp = TempDir::new().unwrap();
    let paths = ClientPaths::with_defaults(temp.path().join("en-US"));
    fs::create_dir_all(&paths.asset_dir).unwrap();

    let stages = ImportStages {
        clear: false,
        extract: false,
        rename: false,
        tidy: false,
        gameconfig: true,
        decompile: true,
    };
    let report = Importer::new(paths).with_stages(stages).run().unwrap();
    assert_eq!(report.tables_converted, None);
    assert_eq!(report.decompiled, None);
    assert_eq!(report.renamed, None);
}
