use std::time::Duration;

use ensemble::{config::GlobalConfig, AppError};

fn sample_toml(projects_dir: &str) -> String {
    format!(
        r#"
projects_dir = '{projects_dir}'
ipc_name = "ensembled-test"
default_project_name = "Session"

[tasks]
timeout_seconds = 120
poll_seconds = 2
"#
    )
}

fn strip_unc(p: &std::path::Path) -> std::path::PathBuf {
    p.to_str()
        .and_then(|s| s.strip_prefix(r"\\?\"))
        .map_or_else(|| p.to_path_buf(), std::path::PathBuf::from)
}

#[test]
fn parses_valid_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = sample_toml(temp.path().to_str().expect("utf8 path"));

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");

    assert_eq!(config.ipc_name, "ensembled-test");
    assert_eq!(config.default_project_name, "Session");
    assert_eq!(config.tasks.timeout(), Some(Duration::from_secs(120)));
    assert_eq!(config.tasks.poll_interval(), Duration::from_secs(2));

    let expected_root = strip_unc(&temp.path().canonicalize().expect("canonicalize temp path"));
    assert_eq!(strip_unc(&config.projects_dir), expected_root);
}

#[test]
fn applies_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "projects_dir = '{}'\n",
        temp.path().to_str().expect("utf8 path")
    );

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    assert_eq!(config.ipc_name, "ensembled");
    assert_eq!(config.default_project_name, "Untitled");
    assert_eq!(config.tasks.timeout_seconds, 300);
    assert_eq!(config.tasks.poll_seconds, 5);
}

#[test]
fn zero_timeout_disables_forced_completion() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "projects_dir = '{}'\n[tasks]\ntimeout_seconds = 0\n",
        temp.path().to_str().expect("utf8 path")
    );

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    assert_eq!(config.tasks.timeout(), None);
}

#[test]
fn rejects_missing_projects_dir() {
    let result = GlobalConfig::from_toml_str("ipc_name = \"x\"\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn rejects_nonexistent_projects_dir() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("does-not-exist");
    let toml = format!("projects_dir = '{}'\n", missing.to_str().expect("utf8"));

    let err = GlobalConfig::from_toml_str(&toml).expect_err("missing dir rejected");
    assert!(err.to_string().contains("projects_dir"), "got {err}");
}

#[test]
fn rejects_empty_ipc_name() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "projects_dir = '{}'\nipc_name = \"  \"\n",
        temp.path().to_str().expect("utf8")
    );

    assert!(matches!(
        GlobalConfig::from_toml_str(&toml),
        Err(AppError::Config(_))
    ));
}

#[test]
fn rejects_zero_poll_interval() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "projects_dir = '{}'\n[tasks]\npoll_seconds = 0\n",
        temp.path().to_str().expect("utf8")
    );

    assert!(GlobalConfig::from_toml_str(&toml).is_err());
}

#[test]
fn rejects_invalid_field_type() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "projects_dir = '{}'\n[tasks]\ntimeout_seconds = \"soon\"\n",
        temp.path().to_str().expect("utf8")
    );

    let err = GlobalConfig::from_toml_str(&toml).expect_err("type error");
    assert!(err.to_string().starts_with("config: invalid config"), "got {err}");
}

#[test]
fn override_projects_dir_revalidates() {
    let first = tempfile::tempdir().expect("tempdir");
    let second = tempfile::tempdir().expect("tempdir");
    let mut config =
        GlobalConfig::from_toml_str(&sample_toml(first.path().to_str().expect("utf8")))
            .expect("config parses");

    config
        .override_projects_dir(second.path().to_path_buf())
        .expect("override accepted");
    assert_eq!(
        strip_unc(&config.projects_dir),
        strip_unc(&second.path().canonicalize().expect("canonicalize"))
    );
    assert_eq!(config.project_dir("Live"), config.projects_dir.join("Live"));

    let missing = second.path().join("gone");
    assert!(config.override_projects_dir(missing).is_err());
}

#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.toml");
    std::fs::write(&path, sample_toml(temp.path().to_str().expect("utf8"))).expect("write");

    let config = GlobalConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.ipc_name, "ensembled-test");

    let missing = GlobalConfig::load_from_path(temp.path().join("nope.toml"));
    assert!(matches!(missing, Err(AppError::Config(_))));
}
