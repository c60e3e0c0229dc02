use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn cmd() -> Command {
    let mut c = Command::cargo_bin("depsight").unwrap();
    c.env_remove("DEPSIGHT_INDEX_URL").env_remove("DEPSIGHT_JOBS");
    c
}

fn gate_cmd() -> Command {
    let mut c = Command::cargo_bin("depsight-gate").unwrap();
    c.env_remove("DEPSIGHT_INDEX_URL").env_remove("DEPSIGHT_JOBS");
    c
}

/// A `file://` index laid out like PyPI's `<name>/json` API.
fn index(base: &Path, latest: &[(&str, &str)]) -> String {
    let root = base.join("index");
    for (name, version) in latest {
        fs::create_dir_all(root.join(name)).unwrap();
        fs::write(
            root.join(name).join("json"),
            format!(r#"{{"info": {{"name": "{}", "version": "{}"}}}}"#, name, version),
        )
        .unwrap();
    }
    format!("file://{}", root.display())
}

fn project(base: &Path, requirements: &str) -> std::path::PathBuf {
    let p = base.join("proj");
    fs::create_dir_all(&p).unwrap();
    fs::write(p.join("requirements.txt"), requirements).unwrap();
    p
}

fn site_packages(base: &Path, dists: &[(&str, &str)]) -> std::path::PathBuf {
    let sp = base.join("site-packages");
    for (name, version) in dists {
        let d = sp.join(format!("{}-{}.dist-info", name, version));
        fs::create_dir_all(&d).unwrap();
        fs::write(d.join("METADATA"), format!("Name: {}\nVersion: {}\n", name, version)).unwrap();
    }
    sp
}

#[test]
fn gate_fails_on_outdated_pin() {
    let tmp = TempDir::new().unwrap();
    let url = index(tmp.path(), &[("requests", "2.32.0"), ("numpy", "2.0.0")]);
    let proj = project(tmp.path(), "requests==2.31.0\nnumpy>=1.26\n");
    fs::write(proj.join("main.py"), "import requests\n").unwrap();

    cmd()
        .args(["gate", "--project"])
        .arg(&proj)
        .args(["--index-url", &url, "--fail-if-outdated"])
        .assert()
        .code(2)
        .stdout(contains("\"outdated\": 1"))
        .stdout(contains("\"unused\": 1"))
        .stderr(contains("1 outdated dependencies"));
}

#[test]
fn ignored_distribution_passes_the_gate() {
    let tmp = TempDir::new().unwrap();
    let url = index(tmp.path(), &[("requests", "2.32.0")]);
    let proj = project(tmp.path(), "requests==2.31.0\n");
    fs::write(proj.join("main.py"), "import requests\n").unwrap();

    gate_cmd()
        .arg("--project")
        .arg(&proj)
        .args(["--index-url", &url, "--fail-if-outdated", "--ignore", "Requests"])
        .assert()
        .success()
        .stdout(contains("\"outdated\": 0"));
}

#[test]
fn installed_mode_reads_site_packages() {
    let tmp = TempDir::new().unwrap();
    let url = index(tmp.path(), &[("requests", "2.32.0"), ("numpy", "1.26.0")]);
    let sp = site_packages(tmp.path(), &[("requests", "2.31.0"), ("numpy", "1.26.0")]);
    let proj = tmp.path().join("empty");
    fs::create_dir_all(&proj).unwrap();

    cmd()
        .args(["gate", "--mode", "installed", "--project"])
        .arg(&proj)
        .arg("--site-packages")
        .arg(&sp)
        .args(["--index-url", &url, "--fail-if-outdated"])
        .assert()
        .code(2)
        .stdout(contains("\"mode\": \"installed\""))
        .stdout(contains("\"declared\": 2"))
        .stdout(contains("\"outdated\": 1"));
}

#[test]
fn unused_spans_every_source_root() {
    let tmp = TempDir::new().unwrap();
    let proj = project(tmp.path(), "requests\nrich\n");
    fs::create_dir_all(proj.join("src")).unwrap();
    fs::create_dir_all(proj.join("tests")).unwrap();
    fs::write(proj.join("src/app.py"), "import requests\n").unwrap();
    fs::write(proj.join("tests/test_app.py"), "from rich import print\n").unwrap();

    cmd()
        .args(["unused", "--project"])
        .arg(&proj)
        .arg("--src")
        .arg(proj.join("src"))
        .assert()
        .success()
        .stdout(contains("rich"));

    cmd()
        .args(["unused", "--project"])
        .arg(&proj)
        .arg("--src")
        .arg(proj.join("src"))
        .arg("--src")
        .arg(proj.join("tests"))
        .assert()
        .success()
        .stdout(contains("\"unused\": []"));
}

#[test]
fn report_lands_in_the_project_by_default() {
    let tmp = TempDir::new().unwrap();
    let url = index(tmp.path(), &[("requests", "2.32.0")]);
    let proj = project(tmp.path(), "requests==2.32.0\n");

    cmd()
        .args(["report", "--project"])
        .arg(&proj)
        .args(["--index-url", &url])
        .assert()
        .success()
        .stdout(contains("report.json"));
    let body = fs::read_to_string(proj.join("report.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["summary"]["declared"], 1);
    assert_eq!(json["unused"][0], "requests");
}

#[test]
fn check_reports_unknown_without_failing() {
    let tmp = TempDir::new().unwrap();
    let url = index(tmp.path(), &[]);
    let proj = project(tmp.path(), "private-lib==1.0\n");

    cmd()
        .args(["check", "--project"])
        .arg(&proj)
        .args(["--index-url", &url])
        .assert()
        .success()
        .stdout(contains("private-lib"))
        .stdout(contains("\"outdated\": []"));
}

#[test]
fn missing_manifest_is_a_tool_error() {
    let tmp = TempDir::new().unwrap();
    cmd()
        .args(["gate", "--project"])
        .arg(tmp.path())
        .assert()
        .code(1)
        .stderr(contains("depsight:"));
}

#[test]
fn bad_flag_is_a_tool_error() {
    cmd().args(["gate", "--max-unused", "many"]).assert().code(1);
    cmd().arg("--version").assert().success().stdout(contains("depsight"));
}

#[test]
fn scan_in_installed_mode_needs_no_interpreter() {
    let tmp = TempDir::new().unwrap();
    let proj = project(tmp.path(), "requests\n");
    fs::write(proj.join("main.py"), "import requests\n").unwrap();

    cmd()
        .args(["scan", "--mode", "installed", "--python", "/definitely/not/a/python", "--project"])
        .arg(&proj)
        .assert()
        .success()
        .stdout(contains("requests"));
}
