use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use ulid::Ulid;

struct Workspace {
    root: PathBuf,
}

impl Workspace {
    fn new(prefix: &str) -> Self {
        let root = std::env::temp_dir().join(format!("{prefix}-{}", Ulid::new()));
        fs::create_dir_all(&root)
            .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", root.display()));
        let config = format!(
            "database_path = {db:?}\n\
             validation_export_dir = {exports:?}\n\
             preregistration_dir = {prereg:?}\n\
             last_import_dir = {cache:?}\n\
             last_import_metadata = {meta:?}\n\
             auto_import_file = {auto:?}\n\
             default_expiration = \"31/12/2026\"\n",
            db = path_str(&root.join("app.db")),
            exports = path_str(&root.join("Validation")),
            prereg = path_str(&root.join("Preinscriptions")),
            cache = path_str(&root.join("last_import")),
            meta = path_str(&root.join("last_import.json")),
            auto = path_str(&root.join("deja_imprimes.csv")),
        );
        fs::write(root.join("labelkit.toml"), config)
            .unwrap_or_else(|err| panic!("failed to write config: {err}"));
        Self { root }
    }

    fn file(&self, name: &str, body: &str) -> PathBuf {
        let path = self.root.join(name);
        fs::write(&path, body)
            .unwrap_or_else(|err| panic!("failed to write {}: {err}", path.display()));
        path
    }

    fn run<I, S>(&self, args: I) -> Output
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(env!("CARGO_BIN_EXE_lk"))
            .arg("--config")
            .arg(self.root.join("labelkit.toml"))
            .args(args)
            .env_remove("LABELKIT_CONFIG")
            .output()
            .unwrap_or_else(|err| panic!("failed to execute lk binary: {err}"))
    }

    fn json<I, S>(&self, args: I) -> Value
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(args);
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            panic!(
                "lk command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
                output.status, stdout, stderr
            );
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        serde_json::from_str(&stdout)
            .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

#[test]
fn db_commands_carry_contract_version() {
    let ws = Workspace::new("lk-db");
    let dry_run = ws.json(["db", "migrate", "--dry-run"]);
    assert_eq!(as_str(&dry_run, "contract_version"), "cli.v1");
    assert_eq!(dry_run["would_apply_versions"], serde_json::json!([1, 2, 3]));

    let migrated = ws.json(["db", "migrate"]);
    assert_eq!(as_i64(&migrated, "after_version"), 3);

    let status = ws.json(["db", "schema-version"]);
    assert_eq!(status["up_to_date"], Value::Bool(true));

    let integrity = ws.json(["db", "integrity-check"]);
    assert_eq!(integrity["quick_check_ok"], Value::Bool(true));

    let backup = ws.root.join("backup.sqlite3");
    let result = ws.json(["db", "backup", "--out", path_str(&backup)]);
    assert_eq!(as_str(&result, "status"), "ok");
    assert!(backup.exists());
}

#[test]
fn recorded_prints_drive_roster_classification() {
    let ws = Workspace::new("lk-roster");
    let roster = ws.file(
        "adherents.csv",
        "Nom;Prénom;Date de naissance;Expire le\nDupont;Elise;01/02/1990;31/12/2026\nMartin;Paul;;31/12/2026\n",
    );

    let recorded = ws.json([
        "print",
        "record",
        "--surname",
        "dupont",
        "--given-name",
        "élise",
        "--dob",
        "1990-02-01",
        "--amount",
        "45,5",
    ]);
    assert!(as_i64(&recorded, "id") > 0);
    ws.json([
        "print",
        "record",
        "--surname",
        "Martin",
        "--given-name",
        "Paul",
        "--status",
        "simulated",
    ]);

    let listed = ws.json(["print", "list", "--expiration", "2026-12-31"]);
    assert_eq!(as_i64(&listed, "count"), 2);

    let to_print = ws.json(["roster", "refresh", "--roster", path_str(&roster)]);
    let rows = to_print["rows"].as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 1);
    assert_eq!(as_str(&rows[0], "surname"), "MARTIN");

    let printed =
        ws.json(["roster", "refresh", "--roster", path_str(&roster), "--mode", "already-printed"]);
    let rows = printed["rows"].as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 1);
    assert_eq!(as_str(&rows[0], "surname"), "DUPONT");
    assert_eq!(as_i64(&rows[0], "print_count"), 1);
}

#[test]
fn line_extraction_feeds_validation_statuses() {
    let ws = Workspace::new("lk-extract");
    let listing = ws.file(
        "paiements.txt",
        "DUPONT Elise\nPayé par AUBER Yann\nMontant : 45,5 €\nMARTIN Paul\nPayé par AUBER Yann\nMontant : 30 €\n",
    );
    let extracted = ws.json(["extract", "lines", "--file", path_str(&listing)]);
    assert_eq!(as_i64(&extracted, "count"), 2);
    assert!(as_str(&extracted, "export_path").ends_with("paiements_validation.csv"));

    let roster = ws.file(
        "adherents.csv",
        "Nom;Prénom;Expire le\nDupont;Elise;31/12/2026\nMartin;Paul;31/12/2026\n",
    );
    ws.json(["print", "record", "--surname", "Dupont", "--given-name", "Elise"]);

    let report = ws.json(["roster", "refresh", "--roster", path_str(&roster), "--mode", "all"]);
    assert_eq!(as_i64(&report, "validation_rows"), 2);
    let rows = report["rows"].as_array().cloned().unwrap_or_default();
    let status_of = |surname: &str| {
        rows.iter()
            .find(|row| row["surname"] == surname)
            .map(|row| as_str(row, "status").to_string())
    };
    assert_eq!(status_of("DUPONT").as_deref(), Some("green"));
    assert_eq!(status_of("MARTIN").as_deref(), Some("unset"));
}

#[test]
fn name_import_and_attestation() {
    let ws = Workspace::new("lk-import");
    let names = ws.file("deja_imprimes.csv", "nom;prenom\nDupont;Elise\n;\n");
    let summary = ws.json(["import", "names", "--file", path_str(&names)]);
    assert_eq!(as_i64(&summary, "imported"), 1);
    assert_eq!(as_i64(&summary, "skipped"), 1);

    let missing = ws.json(["attestation", "--surname", "Inconnu", "--given-name", "Luc"]);
    assert_eq!(missing["found"], Value::Bool(false));

    ws.json([
        "print",
        "record",
        "--surname",
        "Dupont",
        "--given-name",
        "Elise",
        "--email",
        "elise@example.org",
    ]);
    let preview = ws.json(["attestation", "--surname", "Dupont", "--given-name", "Elise"]);
    assert_eq!(preview["found"], Value::Bool(true));
    assert_eq!(as_str(&preview, "file_stem"), "DUPONT_ELISE_attestation_2025_2026");
}

#[test]
fn config_is_taken_from_environment() {
    let ws = Workspace::new("lk-env");
    let output = Command::new(env!("CARGO_BIN_EXE_lk"))
        .args(["db", "migrate"])
        .env("LABELKIT_CONFIG", ws.root.join("labelkit.toml"))
        .output()
        .unwrap_or_else(|err| panic!("failed to execute lk binary: {err}"));
    assert!(output.status.success(), "stderr:\n{}", String::from_utf8_lossy(&output.stderr));
    assert!(ws.root.join("app.db").exists());
}

#[test]
fn split_reports_both_halves() {
    let ws = Workspace::new("lk-split");
    let split = ws.json(["split", "--name", "LE GALL Marie Claire"]);
    assert_eq!(as_str(&split, "surname"), "LE GALL");
    assert_eq!(as_str(&split, "given_name"), "Marie Claire");
}

#[test]
fn unreadable_roster_fails_with_message() {
    let ws = Workspace::new("lk-errors");
    let output = ws.run(["roster", "refresh", "--roster", "/nonexistent/adherents.csv"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read"), "stderr:\n{stderr}");
}
