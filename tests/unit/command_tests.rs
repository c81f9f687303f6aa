use ensemble::models::client::ClientFlags;
use ensemble::orchestrator::command::Command;
use uuid::Uuid;

#[test]
fn parses_control_commands() {
    let command: Command =
        serde_json::from_str(r#"{"command": "save_project", "project": "Live"}"#).expect("parse");
    assert_eq!(
        command,
        Command::SaveProject {
            project: "Live".into()
        }
    );
    assert_eq!(command.name(), "save_project");

    let command: Command = serde_json::from_str(r#"{"command": "new_project"}"#).expect("parse");
    assert_eq!(command, Command::NewProject { name: None });
}

#[test]
fn parses_register_with_announcement() {
    let command: Command = serde_json::from_str(
        r#"{"command": "register", "announcement": {"class": "synth", "pid": 77, "flags": 2}}"#,
    )
    .expect("parse");

    let Command::Register {
        project,
        announcement,
    } = command
    else {
        panic!("expected register");
    };
    assert!(project.is_none());
    assert_eq!(announcement.class, "synth");
    assert_eq!(announcement.pid, 77);
    assert_eq!(announcement.flags, ClientFlags::HAS_CONFIG_FILE);
}

#[test]
fn parses_progress_report() {
    let id = Uuid::new_v4();
    let raw = format!(r#"{{"command": "progress", "client_id": "{id}", "task_id": 9, "percent": 50}}"#);
    let command: Command = serde_json::from_str(&raw).expect("parse");
    assert_eq!(
        command,
        Command::Progress {
            client_id: id,
            task_id: 9,
            percent: 50
        }
    );
}

#[test]
fn rejects_unknown_command() {
    assert!(serde_json::from_str::<Command>(r#"{"command": "explode"}"#).is_err());
}
