use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn bookshelf_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("bookshelf");
    path
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let catalog_dir = root.join("catalog");
    fs::create_dir_all(catalog_dir.join("2018")).unwrap();
    fs::write(
        catalog_dir.join("programming.csv"),
        "书名,作者,出版社,语种,出版年份,文件格式,文件编号\n\
         Go in Action,Kennedy,Manning,en,2015,pdf,F-001\n\
         Rust Basics,Klabnik,No Starch,en,2018,epub,F-002\n\
         Programmation Rust,Blandy,O'Reilly,fr,2019.0,pdf,F-003\n",
    )
    .unwrap();
    fs::write(
        catalog_dir.join("2018").join("misc.tsv"),
        "title\tauthor\tlanguage\tyear\n\
         Data Pipelines\tKennedy\ten\t2018\n\
         Unknown Origins\tnan\t\tN/A\n",
    )
    .unwrap();
    // Office lock file; never loaded.
    fs::write(catalog_dir.join("~$programming.csv"), "garbage").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/bookshelf.sqlite"

[ingest]
batch_size = 2
max_workers = 4

[search]
default_per_page = 10
max_per_page = 50

[server]
bind = "127.0.0.1:6399"
"#,
        root.display()
    );

    let config_path = config_dir.join("bookshelf.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, catalog_dir)
}

fn run_bookshelf(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = bookshelf_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run bookshelf binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn load(config_path: &Path, dir: &Path, extra: &[&str]) -> (String, String, bool) {
    let mut args = vec!["load", dir.to_str().unwrap(), "--progress", "off"];
    args.extend_from_slice(extra);
    run_bookshelf(config_path, &args)
}

fn search_json(config_path: &Path, args: &[&str]) -> serde_json::Value {
    let mut full = vec!["search", "--json"];
    full.extend_from_slice(args);
    let (stdout, stderr, success) = run_bookshelf(config_path, &full);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path, _) = setup_test_env();

    let (stdout, stderr, success) = run_bookshelf(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/bookshelf.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, _, success1) = run_bookshelf(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_bookshelf(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_load_directory() {
    let (_tmp, config_path, catalog) = setup_test_env();

    run_bookshelf(&config_path, &["init"]);
    let (stdout, stderr, success) = load(&config_path, &catalog, &[]);
    assert!(success, "load failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files attempted: 2"));
    assert!(stdout.contains("files succeeded: 2"));
    assert!(stdout.contains("rows written: 5"));
    assert!(stdout.trim_end().ends_with("ok"));
}

#[test]
fn test_load_idempotent() {
    let (_tmp, config_path, catalog) = setup_test_env();

    load(&config_path, &catalog, &[]);
    let (stdout, _, success) = load(&config_path, &catalog, &[]);
    assert!(success);
    assert!(stdout.contains("files skipped: 2"));
    assert!(stdout.contains("rows written: 0"));

    let page = search_json(&config_path, &["--author", "kennedy"]);
    assert_eq!(page["total"], 2);
}

#[test]
fn test_copied_file_is_not_loaded_twice() {
    let (_tmp, config_path, catalog) = setup_test_env();

    load(&config_path, &catalog, &[]);
    fs::copy(
        catalog.join("programming.csv"),
        catalog.join("programming (copy).csv"),
    )
    .unwrap();

    let (stdout, _, success) = load(&config_path, &catalog, &[]);
    assert!(success);
    assert!(stdout.contains("files attempted: 3"));
    assert!(stdout.contains("files skipped: 3"));

    let page = search_json(&config_path, &["--title", "rust"]);
    assert_eq!(page["total"], 2);
}

#[test]
fn test_force_reload() {
    let (_tmp, config_path, catalog) = setup_test_env();

    load(&config_path, &catalog, &[]);
    let (stdout, _, success) = load(&config_path, &catalog, &["--force"]);
    assert!(success);
    assert!(stdout.contains("files succeeded: 2"));
    assert!(stdout.contains("rows written: 5"));

    let page = search_json(&config_path, &["--language", "en"]);
    assert_eq!(page["total"], 3);
}

#[test]
fn test_search_by_field() {
    let (_tmp, config_path, catalog) = setup_test_env();
    load(&config_path, &catalog, &[]);

    let page = search_json(&config_path, &["--author", "Kennedy", "--year", "2015"]);
    assert_eq!(page["total"], 1);
    assert_eq!(page["records"][0]["title"], "Go in Action");
    assert_eq!(page["records"][0]["publisher"], "Manning");
    assert_eq!(page["records"][0]["file_id"], "F-001");
    assert_eq!(page["records"][0]["source_file"], "programming.csv");

    let page = search_json(&config_path, &["--year", "2019"]);
    assert_eq!(page["records"][0]["title"], "Programmation Rust");

    let page = search_json(&config_path, &["--language", "de"]);
    assert_eq!(page["total"], 0);
    assert_eq!(page["records"].as_array().unwrap().len(), 0);
}

#[test]
fn test_null_markers_load_as_absent() {
    let (_tmp, config_path, catalog) = setup_test_env();
    load(&config_path, &catalog, &[]);

    let page = search_json(&config_path, &["--title", "Unknown Origins"]);
    assert_eq!(page["total"], 1);
    assert!(page["records"][0]["author"].is_null());
    assert!(page["records"][0]["language"].is_null());
    assert!(page["records"][0]["publish_year"].is_null());
}

#[test]
fn test_search_pagination() {
    let (_tmp, config_path, catalog) = setup_test_env();
    load(&config_path, &catalog, &[]);

    let first = search_json(&config_path, &["--language", "en", "--per-page", "2"]);
    assert_eq!(first["total"], 3);
    assert_eq!(first["total_pages"], 2);
    assert_eq!(first["records"].as_array().unwrap().len(), 2);

    let second = search_json(
        &config_path,
        &["--language", "en", "--per-page", "2", "--page", "2"],
    );
    assert_eq!(second["records"].as_array().unwrap().len(), 1);
    assert!(second["records"][0]["id"].as_i64() > first["records"][1]["id"].as_i64());

    let capped = search_json(&config_path, &["--language", "en", "--per-page", "1000"]);
    assert_eq!(capped["per_page"], 50);
}

#[test]
fn test_search_human_output() {
    let (_tmp, config_path, catalog) = setup_test_env();
    load(&config_path, &catalog, &[]);

    let (stdout, _, success) = run_bookshelf(&config_path, &["search", "--author", "klabnik"]);
    assert!(success);
    assert!(stdout.contains("1. Rust Basics / Klabnik"));
    assert!(stdout.contains("page 1 of 1 (1 matches)"));

    let (stdout, _, success) = run_bookshelf(&config_path, &["search", "--author", "nobody"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_without_fields_errors() {
    let (_tmp, config_path, _) = setup_test_env();
    run_bookshelf(&config_path, &["init"]);

    let (_, stderr, success) = run_bookshelf(&config_path, &["search"]);
    assert!(!success, "search without any field should fail");
    assert!(stderr.contains("at least one search field"));
}

#[test]
fn test_search_invalid_page_errors() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, stderr, success) =
        run_bookshelf(&config_path, &["search", "--title", "x", "--page", "0"]);
    assert!(!success);
    assert!(stderr.contains("invalid pagination"));
}

#[test]
fn test_load_missing_directory_errors() {
    let (tmp, config_path, _) = setup_test_env();

    let missing = tmp.path().join("nope");
    let (_, stderr, success) = load(&config_path, &missing, &[]);
    assert!(!success);
    assert!(stderr.contains("not a directory"));
}

#[test]
fn test_load_empty_directory_errors() {
    let (tmp, config_path, _) = setup_test_env();

    let empty = tmp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();
    let (_, stderr, success) = load(&config_path, &empty, &[]);
    assert!(!success);
    assert!(stderr.contains("no input files"));
}

#[test]
fn test_stats() {
    let (_tmp, config_path, catalog) = setup_test_env();
    load(&config_path, &catalog, &[]);

    let (stdout, stderr, success) = run_bookshelf(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Books:       5"));
    assert!(stdout.contains("Files:       2"));
    assert!(stdout.contains("programming.csv"));
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_bookshelf(&tmp.path().join("absent.toml"), &["init"]);
    assert!(!success);
    assert!(!stderr.is_empty());
}
