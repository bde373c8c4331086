use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ferretero_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ferretero");
    path
}

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/catalog.xml")
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Port 9 (discard) is closed on test machines, so remote calls fail fast.
    let config_content = format!(
        r#"[db]
path = "{root}/data/catalog.sqlite"

[server]
bind = "127.0.0.1:7341"

[admin]
token = "secret"

[client]
base_url = "http://127.0.0.1:9"
timeout_secs = 2

[seed]
cursor_path = "{root}/data/seed_cursor.txt"
max_attempts = 2
retry_delay_secs = 0
batch_delay_secs = 0
batches = ["broca,disco", "llave"]

[monitor]
recent_limit = 3
"#,
        root = root.display()
    );

    let config_path = config_dir.join("ferretero.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ferretero(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ferretero_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("MIGRATION_TOKEN")
        .env_remove("DATERIUM_USER_ID")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ferretero binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn init_and_load(config_path: &Path) {
    let (_, stderr, success) = run_ferretero(config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    let xml = fixture();
    let (stdout, stderr, success) =
        run_ferretero(config_path, &["ingest", "--xml", xml.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ferretero(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_ferretero(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ferretero(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_xml_dump() {
    let (_tmp, config_path) = setup_test_env();
    run_ferretero(&config_path, &["init"]);

    let xml = fixture();
    let (stdout, stderr, success) =
        run_ferretero(&config_path, &["ingest", "--xml", xml.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("upserted products: 3"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_reingest_does_not_duplicate() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);
    init_and_load(&config_path);

    let (stdout, _, success) = run_ferretero(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Products:    3"), "stats: {}", stdout);
}

#[test]
fn test_search_partial_name() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (stdout, stderr, success) = run_ferretero(&config_path, &["search", "brock"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("No results."));

    let (stdout, _, success) = run_ferretero(&config_path, &["search", "broc"]);
    assert!(success);
    assert!(stdout.contains("Broca HSS metal 6mm"));
    assert!(stdout.contains("familia: Brocas > Brocas metal"));
    assert!(!stdout.contains("Disco"));
}

#[test]
fn test_search_matches_description_and_brand() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (stdout, _, success) = run_ferretero(&config_path, &["search", "vanadio"]);
    assert!(success);
    assert!(stdout.contains("Llave combinada 10mm"));

    let (stdout, _, success) = run_ferretero(&config_path, &["search", "bosch"]);
    assert!(success);
    assert!(stdout.contains("Disco de corte inox 125mm"));
}

#[test]
fn test_search_short_query_returns_nothing() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (stdout, _, success) = run_ferretero(&config_path, &["search", "b"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_get_product() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (stdout, stderr, success) = run_ferretero(&config_path, &["get", "1"]);
    assert!(success, "get failed: {}", stderr);
    assert!(stdout.contains("daterium_id:  501"));
    assert!(stdout.contains("ean:          8412345678901"));
    assert!(stdout.contains("pvp:          4.95"));
    assert!(stdout.contains("https://img.example/501-l.jpg (primary)"));
    assert!(stdout.contains("sku:          TIV-0600"));
    assert!(stdout.contains("--- EANs (2) ---"));
    assert!(stdout.contains("8412345678901  unit x1 (primary)"));
    assert!(stdout.contains("08412345678918  box x10"));
}

#[test]
fn test_ingest_cleans_html_entities() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (stdout, stderr, success) = run_ferretero(&config_path, &["get", "3"]);
    assert!(success, "get failed: {}", stderr);
    assert!(stdout.contains("cromo vanadio – acabado satinado"), "get: {}", stdout);
    assert!(!stdout.contains("&ndash;"));
}

#[test]
fn test_get_missing_product() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (_, stderr, success) = run_ferretero(&config_path, &["get", "999"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_stats_reports_missing_ean() {
    let (_tmp, config_path) = setup_test_env();
    init_and_load(&config_path);

    let (stdout, _, success) = run_ferretero(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Brands:      3"));
    assert!(stdout.contains("With EAN:    1 / 3"));
    assert!(stdout.contains("xml_dump"));
}

#[test]
fn test_seed_unreachable_service_keeps_cursor() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_ferretero(&config_path, &["seed", "--progress", "human"]);
    assert!(success, "seed should not fail the process: {}", stderr);
    assert!(stdout.contains("failed:     2"), "stdout: {}", stdout);
    assert!(stdout.contains("partial"));
    assert!(stdout.contains("catalog:    (count unavailable)"));
    assert!(stderr.contains("attempt 2/2"));
    assert!(!stderr.contains("attempt 3/2"));
    assert!(!tmp.path().join("data/seed_cursor.txt").exists());
}

#[test]
fn test_seed_cursor_past_end_is_noop() {
    let (tmp, config_path) = setup_test_env();
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("seed_cursor.txt"), "2\n").unwrap();

    let (stdout, _, success) = run_ferretero(&config_path, &["seed", "--progress", "off"]);
    assert!(success);
    assert!(stdout.contains("processed:  0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_seed_unknown_strategy_errors() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_ferretero(&config_path, &["seed", "--strategy", "colors"]);
    assert!(!success);
    assert!(stderr.contains("unknown term strategy"));
}

#[test]
fn test_monitor_once_marks_unavailable_endpoints() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ferretero(&config_path, &["monitor", "--once"]);
    assert!(success, "monitor failed: {}", stderr);
    assert_eq!(stdout.matches("(endpoint no disponible)").count(), 3);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("max_attempts = 2", "max_attempts = 0")).unwrap();

    let (_, stderr, success) = run_ferretero(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("max_attempts"));
}
