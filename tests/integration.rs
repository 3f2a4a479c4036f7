use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use tempfile::TempDir;

const MBOX: &str = "From alice@example.org Fri Oct 18 10:00:00 2024
Message-ID: <root@example.org>
From: Alice Dev <alice@example.org>
Subject: [PATCH net-next] net: fix refcount leak
Date: Fri, 18 Oct 2024 10:00:00 +0000

The refcount is never dropped on the error path.

From bob@example.org Fri Oct 18 11:00:00 2024
Message-ID: <reply1@example.org>
From: Bob Reviewer <bob@example.org>
Subject: Re: [PATCH net-next] net: fix refcount leak
Date: Fri, 18 Oct 2024 11:00:00 +0000
In-Reply-To: <root@example.org>
References: <root@example.org>

Looks good.

From carol@example.org Fri Oct 18 12:00:00 2024
Message-ID: <other@example.org>
From: Carol <carol@example.org>
Subject: [RFC] mm: new allocator hint
Date: Fri, 18 Oct 2024 12:00:00 +0000

Thoughts welcome.
";

fn ldg_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ldg");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let archives = root.join("archives");
    fs::create_dir_all(&archives).unwrap();
    fs::write(archives.join("2024-10-18.mbox"), MBOX).unwrap();

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(MBOX.as_bytes()).unwrap();
    fs::write(archives.join("2024-10-18.mbox.gz"), gz.finish().unwrap()).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ldg.sqlite"

[llm]
provider = "disabled"

[logging]
level = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("ldg.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ldg(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ldg_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(["--progress", "off"])
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ldg binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn archive(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("archives")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ldg(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_ldg(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_ldg(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_mbox() {
    let (_tmp, config_path) = setup_test_env();
    run_ldg(&config_path, &["init"]);

    let path = archive(&config_path, "2024-10-18.mbox");
    let (stdout, stderr, success) = run_ldg(&config_path, &["ingest", &path]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("emails inserted:   3"));
    assert!(stdout.contains("threads created:   2"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_twice_is_a_no_op() {
    let (_tmp, config_path) = setup_test_env();
    run_ldg(&config_path, &["init"]);

    let path = archive(&config_path, "2024-10-18.mbox");
    run_ldg(&config_path, &["ingest", &path]);
    let (stdout, _, success) = run_ldg(&config_path, &["ingest", &path]);
    assert!(success);
    assert!(stdout.contains("emails inserted:   0"));
    assert!(stdout.contains("emails duplicate:  3"));
    assert!(stdout.contains("threads created:   0"));
    assert!(stdout.contains("links created:     0"));
}

#[test]
fn test_ingest_gzipped_archive() {
    let (_tmp, config_path) = setup_test_env();
    run_ldg(&config_path, &["init"]);

    let path = archive(&config_path, "2024-10-18.mbox.gz");
    let (stdout, stderr, success) = run_ldg(&config_path, &["ingest", &path]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("emails inserted:   3"));
}

#[test]
fn test_ingest_unknown_format_errors() {
    let (_tmp, config_path) = setup_test_env();
    run_ldg(&config_path, &["init"]);

    let path = archive(&config_path, "2024-10-18.mbox");
    let (_, stderr, success) = run_ldg(&config_path, &["ingest", &path, "--format", "pdf"]);
    assert!(!success);
    assert!(stderr.contains("Unknown archive format"));
}

#[test]
fn test_stats_after_ingest() {
    let (_tmp, config_path) = setup_test_env();
    run_ldg(&config_path, &["init"]);
    let path = archive(&config_path, "2024-10-18.mbox");
    run_ldg(&config_path, &["ingest", &path]);

    let (stdout, stderr, success) = run_ldg(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Emails:      3"));
    assert!(stdout.contains("Threads:     2 (1 with replies)"));
}

#[test]
fn test_summarize_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();
    run_ldg(&config_path, &["init"]);

    let (_, stderr, success) = run_ldg(&config_path, &["summarize", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_digest_rejects_bad_date() {
    let (_tmp, config_path) = setup_test_env();
    run_ldg(&config_path, &["init"]);

    let (_, stderr, success) = run_ldg(&config_path, &["digest", "daily", "18/10/2024"]);
    assert!(!success);
    assert!(stderr.contains("expected YYYY-MM-DD"));
}
