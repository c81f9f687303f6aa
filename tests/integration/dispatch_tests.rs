//! Dispatch loop, command execution and the task watchdog.

use std::time::{Duration, Instant};

use ensemble::bus::{ClientRequest, Signal};
use ensemble::orchestrator::command::Command;
use ensemble::orchestrator::daemon::Daemon;
use ensemble::orchestrator::dispatch::{self, Endpoint, Event, Reply, EVENT_CAPACITY};
use ensemble::orchestrator::task_watchdog::spawn_task_watchdog;
use ensemble::AppError;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::test_helpers::{channel_services, file_client, test_config, test_services};

async fn send(events: &mpsc::Sender<Event>, command: Command, endpoint: Option<Endpoint>) -> Reply {
    let (reply, outcome) = oneshot::channel();
    events
        .send(Event::Command {
            command,
            endpoint,
            reply,
        })
        .await
        .expect("dispatch loop running");
    outcome.await.expect("reply sent")
}

#[test]
fn execute_maps_commands_to_replies() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (svc, _bus, _) = test_services();
    let mut daemon = Daemon::new(test_config(temp.path()), svc);

    let created = dispatch::execute(&mut daemon, Command::NewProject { name: None }, None)
        .expect("created");
    assert_eq!(created, json!({ "project": "Untitled" }));

    let status = dispatch::execute(
        &mut daemon,
        Command::Status {
            project: Some("Untitled".into()),
        },
        None,
    )
    .expect("status");
    assert_eq!(status["name"], "Untitled");
    assert_eq!(status["task"], "idle");

    let saved = dispatch::execute(&mut daemon, Command::SaveAll, None).expect("saved");
    assert_eq!(saved, json!({ "failed": [] }));

    let listed = dispatch::execute(&mut daemon, Command::ListProjects, None).expect("listed");
    assert_eq!(listed["projects"][0]["name"], "Untitled");

    assert!(matches!(
        dispatch::execute(
            &mut daemon,
            Command::OpenProject {
                name: "Nowhere".into()
            },
            None
        ),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        dispatch::execute(
            &mut daemon,
            Command::Disconnect {
                client_id: Uuid::new_v4()
            },
            None
        ),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn tick_abandons_overdue_rounds() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (svc, bus, _) = test_services();
    let mut daemon = Daemon::new(test_config(temp.path()), svc);
    let (project, _) = daemon
        .register_client(None, file_client("synth"), None)
        .expect("registered");
    daemon.save_project(&project).expect("saved");

    dispatch::tick(&mut daemon, Instant::now() + Duration::from_secs(5));

    assert!(daemon.project(&project).expect("loaded").task().is_idle());
    assert_eq!(
        bus.count(|s| matches!(s, Signal::TaskTimedOut { .. })),
        1
    );
}

#[tokio::test]
async fn registered_endpoint_receives_its_load_request() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (svc, sender, _) = channel_services();
    let mut signals = sender.subscribe();
    let mut daemon = Daemon::new(test_config(temp.path()), svc);

    daemon.new_project(Some("Gig")).expect("created");
    let (_, id) = daemon
        .register_client(Some("Gig"), file_client("sampler"), None)
        .expect("registered");
    daemon.save_project("Gig").expect("saved");
    let task_id = daemon.services().last_task_id();
    daemon.client_progress(id, task_id, 100).expect("saved");
    daemon.client_lost(id).expect("lost");

    let ct = CancellationToken::new();
    let (events, rx) = mpsc::channel(EVENT_CAPACITY);
    let handle = tokio::spawn(dispatch::run(daemon, rx, ct.clone()));

    let (mailbox, mut requests) = mpsc::unbounded_channel();
    let endpoint = Endpoint {
        name: "ipc-test".into(),
        mailbox,
    };
    let reply = send(
        &events,
        Command::Register {
            project: Some("Gig".into()),
            announcement: file_client("sampler"),
        },
        Some(endpoint),
    )
    .await
    .expect("registered");
    assert_eq!(reply["client_id"], json!(id));
    assert_eq!(reply["project"], "Gig");
    assert_eq!(reply["name"], "sampler");

    let request = requests.try_recv().expect("load request delivered");
    let task_id = match request {
        ClientRequest::Load { task_id, .. } => task_id,
        other => panic!("expected a file load, got {other:?}"),
    };

    let progress = send(
        &events,
        Command::Progress {
            client_id: id,
            task_id,
            percent: 100,
        },
        None,
    )
    .await
    .expect("progress accepted");
    assert_eq!(progress, Value::Null);

    let stale = send(
        &events,
        Command::Progress {
            client_id: id,
            task_id,
            percent: 100,
        },
        None,
    )
    .await;
    assert!(matches!(stale, Err(AppError::Rejected(_))));

    ct.cancel();
    let daemon = handle.await.expect("dispatch task");
    assert!(daemon.projects().is_empty());

    let mut seen = Vec::new();
    while let Ok(signal) = signals.try_recv() {
        seen.push(signal);
    }
    assert!(seen.contains(&Signal::ClientAppeared {
        client_id: id,
        project: "Gig".into(),
        name: Some("sampler".into()),
    }));
    assert!(seen.contains(&Signal::Quit {
        project: "Gig".into()
    }));
}

#[tokio::test]
async fn run_stops_when_every_sender_is_gone() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (svc, _bus, _) = test_services();
    let mut daemon = Daemon::new(test_config(temp.path()), svc);
    daemon.new_project(Some("Gig")).expect("created");

    let (events, rx) = mpsc::channel(EVENT_CAPACITY);
    let handle = tokio::spawn(dispatch::run(daemon, rx, CancellationToken::new()));
    drop(events);

    let daemon = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop finished")
        .expect("dispatch task");
    assert!(daemon.projects().is_empty());
}

#[tokio::test]
async fn watchdog_sends_ticks_until_cancelled() {
    let (events, mut rx) = mpsc::channel(EVENT_CAPACITY);
    let ct = CancellationToken::new();
    let handle = spawn_task_watchdog(events, Duration::from_millis(10), ct.clone());

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("tick in time");
    assert!(matches!(event, Some(Event::Tick)));

    ct.cancel();
    handle.await.expect("watchdog stopped");
}
