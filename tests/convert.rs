use rusqlite::{Connection, params};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiz2md::importer::{parse_timestamp, to_system_time};
use wiz2md::ledger::Ledger;
use wiz2md::pipeline::{RunSummary, execute};
use wiz2md::utils::ConvertConfig;
use zip::write::SimpleFileOptions;

const SCHEMA: &str = "
    CREATE TABLE WIZ_DOCUMENT (
        DOCUMENT_GUID TEXT PRIMARY KEY, DOCUMENT_TITLE TEXT, DOCUMENT_LOCATION TEXT,
        DOCUMENT_NAME TEXT, DOCUMENT_TYPE TEXT, DT_CREATED TEXT, DT_MODIFIED TEXT,
        DT_ACCESSED TEXT, DOCUMENT_URL TEXT, DOCUMENT_ATTACHEMENT_COUNT INTEGER
    );
    CREATE TABLE WIZ_DOCUMENT_ATTACHMENT (
        ATTACHMENT_GUID TEXT PRIMARY KEY, DOCUMENT_GUID TEXT,
        ATTACHMENT_NAME TEXT, DT_DATA_MODIFIED TEXT
    );
    CREATE TABLE WIZ_TAG (TAG_GUID TEXT PRIMARY KEY, TAG_NAME TEXT, TAG_GROUP_GUID TEXT);
    CREATE TABLE WIZ_DOCUMENT_TAG (DOCUMENT_GUID TEXT, TAG_GUID TEXT);";

const SOURCE_MODIFIED: &str = "2024-03-04 05:06:07";

const SOURCE_BODY: &str = r#"<html><head><title>Source</title></head><body>
<h1>Notes</h1>
<p><img src="index_files/pic.png"></p>
<p>See <a href="wiz://open_document?guid=note-a&amp;kbguid=&amp;private_kbguid=kb">the target</a>.</p>
<p><a href="wiz://open_attachment?guid=att-1">report</a></p>
</body></html>"#;

fn write_package(path: &Path, entries: &[(&str, &[u8])]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, body) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(body).unwrap();
    }
    zip.finish().unwrap();
}

/// A WizNote data directory with four notes: a link target, a note with an
/// image, an attachment and links, one whose package is gone and one that is
/// not a zip.
fn wiz_fixture(root: &Path) -> PathBuf {
    let wiz = root.join("wiz");
    fs::create_dir_all(&wiz).unwrap();

    let conn = Connection::open(wiz.join("index.db")).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn.execute_batch(
        "INSERT INTO WIZ_TAG VALUES ('t-lang', 'Lang', NULL);
         INSERT INTO WIZ_TAG VALUES ('t-rust', 'Rust', 't-lang');
         INSERT INTO WIZ_DOCUMENT_TAG VALUES ('note-b', 't-rust');
         INSERT INTO WIZ_DOCUMENT_ATTACHMENT VALUES ('att-1', 'note-b', 'report.pdf', '2024-03-01 10:00:00');",
    )
    .unwrap();
    let insert = "INSERT INTO WIZ_DOCUMENT VALUES (?1, ?2, ?3, ?4, 'document',
                  '2024-01-01 08:00:00', ?5, NULL, ?6, ?7)";
    conn.execute(
        insert,
        params!["note-a", "Target Note", "/Work/", "Target Note.ziw", "2024-02-01 09:00:00", None::<String>, 0],
    )
    .unwrap();
    conn.execute(
        insert,
        params!["note-b", "Source: B", "/Work/Sub/", "Source B.ziw", SOURCE_MODIFIED, "https://example.com/clip", 1],
    )
    .unwrap();
    conn.execute(
        insert,
        params!["note-c", "Vanished", "/Work/", "Vanished.ziw", "2024-02-01 09:00:00", None::<String>, 0],
    )
    .unwrap();
    conn.execute(
        insert,
        params!["note-d", "Locked", "/Work/", "Locked.ziw", "2024-02-01 09:00:00", None::<String>, 0],
    )
    .unwrap();
    drop(conn);

    write_package(
        &wiz.join("Work/Target Note.ziw"),
        &[("index.html", b"<p>target body</p>")],
    );
    write_package(
        &wiz.join("Work/Sub/Source B.ziw"),
        &[("index.html", SOURCE_BODY.as_bytes()), ("index_files/pic.png", b"png")],
    );
    fs::create_dir_all(wiz.join("Work/Sub/Source B_Attachments")).unwrap();
    fs::write(wiz.join("Work/Sub/Source B_Attachments/report.pdf"), b"pdf").unwrap();
    fs::write(wiz.join("Work/Locked.ziw"), b"encrypted content ".repeat(8)).unwrap();

    wiz
}

fn config(root: &TempDir) -> ConvertConfig {
    let mut config = ConvertConfig::new(wiz_fixture(root.path()));
    config.output_dir = root.path().join("output/notes");
    config.temp_dir = root.path().join("output/temp");
    config.ledger_path = root.path().join("output/convertor.db");
    config
}

#[test]
fn converts_a_wiz_directory() {
    let root = tempfile::tempdir().unwrap();
    let config = config(&root);

    let summary = execute(&config).unwrap();
    assert_eq!(
        summary,
        RunSummary {
            total: 4,
            converted: 2,
            skipped: 0,
            missing: 1,
            unreadable: 1,
            failed: 0,
        }
    );

    let out = &config.output_dir;
    let source_md = out.join("Work/Sub/Source： B.md");
    let text = fs::read_to_string(&source_md).unwrap();

    assert!(text.starts_with("---\nwiz-guid: note-b\n"), "{text}");
    assert!(text.contains("Lang/Rust"), "{text}");
    assert!(text.contains("cdate:"), "{text}");
    assert!(text.contains("aliases:"), "{text}");
    assert!(text.contains("source:"), "{text}");
    assert!(text.contains("https://example.com/clip"), "{text}");
    assert!(text.contains("# Notes"), "{text}");
    assert!(text.contains("![[Work/Sub/Source： B_Attachments/pic.png]]"), "{text}");
    assert!(text.contains("[[/Work/Target Note|the target]]"), "{text}");
    assert!(text.contains("[[Work/Sub/Source： B_Attachments/report.pdf]]"), "{text}");
    assert!(!text.contains("wiz://"), "{text}");

    let attachments = out.join("Work/Sub/Source： B_Attachments");
    assert_eq!(fs::read(attachments.join("pic.png")).unwrap(), b"png");
    assert_eq!(fs::read(attachments.join("report.pdf")).unwrap(), b"pdf");

    let expected = to_system_time(parse_timestamp(SOURCE_MODIFIED).unwrap()).unwrap();
    assert_eq!(fs::metadata(&source_md).unwrap().modified().unwrap(), expected);

    let target = fs::read_to_string(out.join("Work/Target Note.md")).unwrap();
    assert!(target.ends_with("\ntarget body\n"), "{target}");
    assert!(!target.contains("aliases"), "{target}");

    assert!(!out.join("Work/Vanished.md").exists());
    assert!(!out.join("Work/Locked.md").exists());
}

#[test]
fn second_run_is_a_no_op() {
    let root = tempfile::tempdir().unwrap();
    let config = config(&root);
    execute(&config).unwrap();

    let source_md = config.output_dir.join("Work/Sub/Source： B.md");
    let written = fs::metadata(&source_md).unwrap().modified().unwrap();
    let extracted = Ledger::open(&config.ledger_path)
        .unwrap()
        .entry("note-b")
        .unwrap()
        .unwrap()
        .extract_time;

    let summary = execute(&config).unwrap();
    assert_eq!(summary.converted, 0);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.failed, 0);

    assert_eq!(fs::metadata(&source_md).unwrap().modified().unwrap(), written);
    let entry = Ledger::open(&config.ledger_path)
        .unwrap()
        .entry("note-b")
        .unwrap()
        .unwrap();
    assert_eq!(entry.extract_time, extracted);
    assert!(entry.success);
}

#[test]
fn missing_database_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let mut config = ConvertConfig::new(root.path().join("nowhere"));
    config.ledger_path = root.path().join("convertor.db");
    assert!(execute(&config).is_err());
}
