use mirror_sync::{
    apply_rename_plan, build_rename_plan, read_asset_entries, CatalogIssue, ErrorLedger,
    RenameStats,
};
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_assets_db(path: &Path, rows: &[(&str, &str)]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE assets (path TEXT, version INTEGER, physical TEXT, \
         size INTEGER, hash TEXT, external INTEGER)",
    )
    .unwrap();
    for (logical, physical) in rows {
        conn.execute(
            "INSERT INTO assets VALUES (?1, 3, ?2, 10, 'abc', 0)",
            params![logical, physical],
        )
        .unwrap();
    }
}

#[test]
fn shared_physical_file_lands_at_every_logical_path() {
    let temp = TempDir::new().unwrap();
    let unpack = temp.path().join("unpack");
    let assets = temp.path().join("assets");
    fs::create_dir_all(unpack.join("ff")).unwrap();
    fs::write(unpack.join("ff/0001"), b"shared bytes").unwrap();

    let db = temp.path().join("assets.db");
    write_assets_db(
        &db,
        &[
            ("ui/a.png", "ff/0001"),
            ("ui/b.png", "ff/0001"),
            ("fx/deep/c.png", "ff/0001"),
        ],
    );

    let entries = read_asset_entries(&db).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].version, 3);
    assert!(!entries[0].external);

    let plan = build_rename_plan(&entries);
    let mut errors = ErrorLedger::new(temp.path().join("errors.log"), 10);
    let stats = apply_rename_plan(&plan, &unpack, &assets, &mut errors).unwrap();

    assert_eq!(stats, RenameStats { moved: 1, copied: 2 });
    assert!(errors.is_empty());
    assert!(!unpack.join("ff/0001").exists());
    for logical in ["ui/a.png", "ui/b.png", "fx/deep/c.png"] {
        assert_eq!(fs::read(assets.join(logical)).unwrap(), b"shared bytes");
    }
}

#[test]
fn missing_sources_and_conflicts_are_collected() {
    let temp = TempDir::new().unwrap();
    let unpack = temp.path().join("unpack");
    let assets = temp.path().join("assets");
    fs::create_dir_all(unpack.join("aa")).unwrap();
    fs::write(unpack.join("aa/0002"), b"fresh").unwrap();
    fs::create_dir_all(assets.join("ui")).unwrap();
    fs::write(assets.join("ui/taken.png"), b"keep me").unwrap();

    let db = temp.path().join("assets.db");
    write_assets_db(
        &db,
        &[
            ("ui/taken.png", "aa/0002"),
            ("ui/free.png", "aa/0002"),
            ("ui/gone.png", "ee/9999"),
        ],
    );

    let plan = build_rename_plan(&read_asset_entries(&db).unwrap());
    let mut errors = ErrorLedger::new(temp.path().join("errors.log"), 10);
    let stats = apply_rename_plan(&plan, &unpack, &assets, &mut errors).unwrap();

    assert_eq!(stats, RenameStats { moved: 0, copied: 1 });
    assert_eq!(fs::read(assets.join("ui/taken.png")).unwrap(), b"keep me");
    assert_eq!(fs::read(assets.join("ui/free.png")).unwrap(), b"fresh");
    assert!(!assets.join("ui/gone.png").exists());

    assert_eq!(errors.len(), 2);
    assert!(matches!(
        &errors.issues()[0],
        CatalogIssue::TargetConflict { target, .. } if target.ends_with("ui/taken.png")
    ));
    assert!(matches!(
        &errors.issues()[1],
        CatalogIssue::MissingSource { logical_path, .. } if logical_path == "ui/gone.png"
    ));

    // Within the threshold nothing is written.
    assert_eq!(errors.flush().unwrap(), None);
    assert!(!temp.path().join("errors.log").exists());
}

#[test]
fn issues_above_threshold_go_to_log_file() {
    let temp = TempDir::new().unwrap();
    let log = temp.path().join("errors.log");
    let mut errors = ErrorLedger::new(&log, 1);
    for name in ["a.png", "b.png"] {
        errors.push(CatalogIssue::MissingSource {
            source: temp.path().join("ff/01"),
            logical_path: name.to_string(),
        });
    }

    assert_eq!(errors.flush().unwrap(), Some(log.clone()));
    let text = fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("# 2 catalog issues, "));
    assert!(lines[1].ends_with("of a.png can not be found"));
    assert!(lines[2].ends_with("of b.png can not be found"));
}
