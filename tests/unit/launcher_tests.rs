use std::path::PathBuf;
use std::time::Duration;

use ensemble::services::launcher::{LaunchSpec, Launcher, ProcessLauncher};
use ensemble::AppError;
use uuid::Uuid;

fn spec(argv: &[&str]) -> LaunchSpec {
    LaunchSpec {
        client_id: Uuid::new_v4(),
        project: "Live".into(),
        class: "test".into(),
        working_dir: PathBuf::new(),
        argv: argv.iter().map(|s| (*s).to_owned()).collect(),
    }
}

#[tokio::test]
async fn empty_command_line_is_a_launch_error() {
    let mut launcher = ProcessLauncher::new("ensembled-test");
    let err = launcher.launch(&spec(&[])).expect_err("no argv");
    assert!(matches!(err, AppError::Launch(_)));
}

#[tokio::test]
async fn missing_program_is_a_launch_error() {
    let mut launcher = ProcessLauncher::new("ensembled-test");
    let err = launcher
        .launch(&spec(&["/nonexistent/ensemble-test-binary"]))
        .expect_err("spawn fails");
    assert!(matches!(err, AppError::Launch(_)));
    assert_eq!(launcher.running(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn reap_collects_exited_children() {
    let mut launcher = ProcessLauncher::new("ensembled-test");
    let spec = spec(&["sh", "-c", "exit 0"]);
    let pid = launcher.launch(&spec).expect("spawned");
    assert!(pid > 0);
    assert_eq!(launcher.running(), 1);

    let mut reaped = Vec::new();
    for _ in 0..50 {
        reaped = launcher.reap();
        if !reaped.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].0, spec.client_id);
    assert!(reaped[0].1.is_some_and(|status| status.success()));
    assert_eq!(launcher.running(), 0);
}
