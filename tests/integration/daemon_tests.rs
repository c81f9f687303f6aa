//! Daemon-wide project registry and client routing.

use std::fs;
use std::time::{Duration, Instant};

use ensemble::bus::{ClientRequest, Signal};
use ensemble::models::client::{ClientFlags, Membership};
use ensemble::models::patch::PatchSet;
use ensemble::orchestrator::daemon::Daemon;
use ensemble::project::ProjectTaskKind;
use ensemble::AppError;
use uuid::Uuid;

use super::test_helpers::{announce, file_client, test_config, test_services, BusLog, LaunchLog};

fn daemon(temp: &tempfile::TempDir) -> (Daemon, BusLog, LaunchLog) {
    let (svc, bus, launches) = test_services();
    (Daemon::new(test_config(temp.path()), svc), bus, launches)
}

fn pending_task(daemon: &Daemon, id: Uuid) -> u64 {
    daemon
        .project_of(id)
        .and_then(|p| p.client(id))
        .map(|c| c.pending_task)
        .expect("client known")
}

#[test]
fn unnamed_projects_get_numbered_default_names() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, bus, _) = daemon(&temp);

    assert_eq!(daemon.new_project(None).expect("first"), "Untitled");
    assert_eq!(daemon.new_project(None).expect("second"), "Untitled 2");
    assert!(daemon.config().projects_dir.join("Untitled 2").is_dir());
    assert_eq!(
        bus.count(|s| matches!(s, Signal::ProjectAppeared { .. })),
        2
    );

    for bad in ["Untitled", "", "..", "a/b"] {
        assert!(
            matches!(daemon.new_project(Some(bad)), Err(AppError::Rejected(_))),
            "{bad:?} must be rejected"
        );
    }
    assert_eq!(daemon.projects().len(), 2);
}

#[test]
fn registering_without_a_project_creates_one() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, _bus, _) = daemon(&temp);

    let (project, id) = daemon
        .register_client(None, file_client("synth"), None)
        .expect("registered");
    assert_eq!(project, "Untitled");
    assert!(daemon
        .project("Untitled")
        .is_some_and(|p| p.has_active_client(id)));

    let (joined, _) = daemon
        .register_client(None, file_client("drums"), None)
        .expect("registered");
    assert_eq!(joined, "Untitled", "joins the last opened project");
    assert_eq!(daemon.projects().len(), 1);

    assert!(matches!(
        daemon.register_client(Some("Nowhere"), file_client("bass"), None),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn closed_project_reopens_and_relaunches_its_clients() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, bus, launches) = daemon(&temp);
    daemon.new_project(Some("Gig")).expect("created");

    let (_, synth) = daemon
        .register_client(Some("Gig"), file_client("synth"), None)
        .expect("registered");
    let (_, drums) = daemon
        .register_client(Some("Gig"), file_client("drums"), None)
        .expect("registered");

    daemon.save_project("Gig").expect("saved");
    let task_id = bus.last_save_task().expect("save signalled");
    daemon.client_progress(synth, task_id, 100).expect("synth saved");
    daemon.client_progress(drums, task_id, 100).expect("drums saved");
    assert_eq!(
        bus.count(|s| matches!(s, Signal::ProjectSaved { .. })),
        1
    );

    daemon.close_project("Gig").expect("closed");
    assert!(daemon.project("Gig").is_none());
    assert!(daemon.list_projects().iter().any(|p| p.name == "Gig"));
    assert!(bus.signals().contains(&Signal::ProjectDisappeared {
        project: "Gig".into()
    }));
    bus.clear();

    daemon.open_project("Gig").expect("opened");
    assert!(matches!(
        daemon.open_project("Gig"),
        Err(AppError::Rejected(_))
    ));
    let project = daemon.project("Gig").expect("loaded");
    assert_eq!(project.task().kind, ProjectTaskKind::Load);
    assert_eq!(project.task().total, 2);
    assert_eq!(launches.ids(), vec![synth, drums]);

    for (class, id) in [("synth", synth), ("drums", drums)] {
        let pid = launches.pid_of(id).expect("launched");
        let (_, resumed) = daemon
            .register_client(
                Some("Gig"),
                announce(class, pid, ClientFlags::HAS_CONFIG_FILE),
                None,
            )
            .expect("resumed");
        assert_eq!(resumed, id);
    }
    assert_eq!(
        bus.calls()
            .iter()
            .filter(|(_, request)| matches!(request, ClientRequest::Load { .. }))
            .count(),
        2
    );

    for id in [synth, drums] {
        let task = pending_task(&daemon, id);
        daemon.client_progress(id, task, 100).expect("restored");
    }
    assert_eq!(
        bus.count(|s| matches!(s, Signal::ProjectLoaded { .. })),
        1
    );
    assert!(daemon.project("Gig").expect("loaded").task().is_idle());
}

#[test]
fn file_clients_restore_in_a_single_load_round() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, bus, launches) = daemon(&temp);
    daemon.new_project(Some("Studio")).expect("created");

    let mut ids = Vec::new();
    for class in ["synth", "drums", "bass"] {
        let (_, id) = daemon
            .register_client(Some("Studio"), file_client(class), None)
            .expect("registered");
        ids.push((class, id));
    }
    daemon.save_project("Studio").expect("saved");
    let task_id = bus.last_save_task().expect("save signalled");
    for (_, id) in &ids {
        daemon.client_progress(*id, task_id, 100).expect("saved");
    }
    daemon.close_project("Studio").expect("closed");

    daemon.open_project("Studio").expect("opened");
    daemon
        .set_description("Studio", "tracking day")
        .expect("described");
    assert!(daemon.project("Studio").expect("loaded").is_modified());
    bus.clear();

    for (class, id) in &ids {
        let pid = launches.pid_of(*id).expect("launched");
        daemon
            .register_client(
                Some("Studio"),
                announce(class, pid, ClientFlags::HAS_CONFIG_FILE),
                None,
            )
            .expect("resumed");
    }

    for (index, (_, id)) in ids.iter().enumerate() {
        assert_eq!(
            bus.count(|s| matches!(s, Signal::ProjectLoaded { .. })),
            0,
            "round still waits before report {index}"
        );
        let task = pending_task(&daemon, *id);
        daemon.client_progress(*id, task, 100).expect("restored");
    }

    assert_eq!(
        bus.count(|s| matches!(s, Signal::ProjectLoaded { .. })),
        1
    );
    let project = daemon.project("Studio").expect("loaded");
    assert!(project.task().is_idle());
    assert!(!project.is_modified());
    daemon.save_project("Studio").expect("saving allowed again");
}

#[test]
fn clients_with_nothing_to_restore_finish_their_part_of_the_load_round() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, bus, launches) = daemon(&temp);
    daemon.new_project(Some("Rig")).expect("created");

    let (_, meter) = daemon
        .register_client(Some("Rig"), announce("meter", 0, ClientFlags::empty()), None)
        .expect("registered");
    let (_, synth) = daemon
        .register_client(Some("Rig"), file_client("synth"), None)
        .expect("registered");
    daemon.save_project("Rig").expect("saved");
    let task_id = bus.last_save_task().expect("save signalled");
    daemon.client_progress(meter, task_id, 100).expect("meter saved");
    daemon.client_progress(synth, task_id, 100).expect("synth saved");
    daemon.close_project("Rig").expect("closed");

    daemon.open_project("Rig").expect("opened");
    daemon.set_notes("Rig", "patch bay B").expect("notes");
    bus.clear();

    let meter_pid = launches.pid_of(meter).expect("launched");
    daemon
        .register_client(Some("Rig"), announce("meter", meter_pid, ClientFlags::empty()), None)
        .expect("resumed");
    assert_eq!(pending_task(&daemon, meter), 0);
    assert!(!bus
        .calls()
        .iter()
        .any(|(_, request)| matches!(request, ClientRequest::Load { .. })));
    assert_eq!(daemon.project("Rig").expect("loaded").task().pending, 1);

    let synth_pid = launches.pid_of(synth).expect("launched");
    daemon
        .register_client(
            Some("Rig"),
            announce("synth", synth_pid, ClientFlags::HAS_CONFIG_FILE),
            None,
        )
        .expect("resumed");
    let task = pending_task(&daemon, synth);
    daemon.client_progress(synth, task, 100).expect("restored");

    assert_eq!(
        bus.count(|s| matches!(s, Signal::ProjectLoaded { .. })),
        1
    );
    let project = daemon.project("Rig").expect("loaded");
    assert!(project.task().is_idle());
    assert!(!project.is_modified());
}

#[test]
fn lone_client_without_state_completes_the_load_round_on_resume() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, bus, launches) = daemon(&temp);
    daemon.new_project(Some("Solo")).expect("created");

    let (_, meter) = daemon
        .register_client(Some("Solo"), announce("meter", 0, ClientFlags::empty()), None)
        .expect("registered");
    daemon.save_project("Solo").expect("saved");
    let task_id = bus.last_save_task().expect("save signalled");
    daemon.client_progress(meter, task_id, 100).expect("saved");
    daemon.close_project("Solo").expect("closed");

    daemon.open_project("Solo").expect("opened");
    bus.clear();
    let pid = launches.pid_of(meter).expect("launched");
    daemon
        .register_client(Some("Solo"), announce("meter", pid, ClientFlags::empty()), None)
        .expect("resumed");

    assert_eq!(
        bus.count(|s| matches!(s, Signal::ProjectLoaded { .. })),
        1
    );
    assert!(daemon.project("Solo").expect("loaded").task().is_idle());
}

#[test]
fn project_names_stay_unique() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, bus, _) = daemon(&temp);
    daemon.new_project(Some("A")).expect("created");
    daemon.new_project(Some("B")).expect("created");

    assert!(matches!(
        daemon.rename_project("A", "B"),
        Err(AppError::Rejected(_))
    ));
    assert!(matches!(
        daemon.rename_project("Missing", "C"),
        Err(AppError::NotFound(_))
    ));

    daemon.rename_project("A", "C").expect("renamed");
    assert!(daemon.project("C").is_some());
    assert!(daemon.project("A").is_none());
    assert!(bus.signals().contains(&Signal::ProjectNameChanged {
        old_name: "A".into(),
        new_name: "C".into(),
    }));
    assert!(daemon.project("C").expect("c").is_modified());
}

#[test]
fn description_and_notes_route_to_the_project() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, bus, _) = daemon(&temp);
    daemon.new_project(Some("Gig")).expect("created");

    daemon.set_description("Gig", "outdoor").expect("described");
    daemon.set_notes("Gig", "bring cables").expect("noted");

    let info = daemon.project_info("Gig").expect("info");
    assert_eq!(info.description, "outdoor");
    assert_eq!(info.notes, "bring cables");
    assert!(info.modified);
    assert_eq!(
        bus.count(|s| matches!(s, Signal::ProjectModifiedStatusChanged { modified: true, .. })),
        1
    );
    assert!(matches!(
        daemon.set_notes("Other", "x"),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn overdue_round_is_abandoned() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, bus, _) = daemon(&temp);
    let (project, id) = daemon
        .register_client(None, file_client("synth"), None)
        .expect("registered");
    daemon.save_project(&project).expect("saved");

    assert!(daemon.expire_stalled_tasks(Instant::now()).is_empty());
    let expired = daemon.expire_stalled_tasks(Instant::now() + Duration::from_secs(2));

    assert_eq!(expired, vec![project.clone()]);
    assert!(bus.signals().contains(&Signal::TaskTimedOut { project }));
    assert_eq!(pending_task(&daemon, id), 0);
}

#[test]
fn exited_child_forgets_its_pid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, bus, launches) = daemon(&temp);
    daemon.new_project(Some("Gig")).expect("created");
    let (_, id) = daemon
        .register_client(Some("Gig"), file_client("synth"), None)
        .expect("registered");
    daemon.save_project("Gig").expect("saved");
    let task_id = bus.last_save_task().expect("save signalled");
    daemon.client_progress(id, task_id, 100).expect("saved");
    daemon.close_project("Gig").expect("closed");

    daemon.open_project("Gig").expect("opened");
    assert!(pid_of(&daemon, id) > 0);

    launches.exit(id);
    daemon.reap_children();
    assert_eq!(pid_of(&daemon, id), 0);
}

fn pid_of(daemon: &Daemon, id: Uuid) -> u32 {
    daemon
        .project_of(id)
        .and_then(|p| p.client(id))
        .map(|c| c.pid)
        .expect("client known")
}

#[test]
fn patches_are_accepted_only_from_running_clients() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, _bus, _) = daemon(&temp);
    let (project, id) = daemon
        .register_client(None, file_client("synth"), None)
        .expect("registered");
    let sets = vec![PatchSet::new("jack", vec!["synth:out -> system:in".into()])];

    daemon.set_client_patches(id, sets.clone()).expect("recorded");
    assert_eq!(daemon.services().patches.snapshot(id), sets);
    assert!(daemon.project(&project).expect("project").is_modified());

    daemon.client_lost(id).expect("lost");
    assert!(matches!(
        daemon.set_client_patches(id, sets),
        Err(AppError::Rejected(_))
    ));
    assert_eq!(
        daemon
            .project(&project)
            .and_then(|p| p.client(id))
            .map(|c| c.membership),
        Some(Membership::Lost)
    );
}

#[test]
fn scan_finds_only_directories_with_a_document() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, _bus, _) = daemon(&temp);
    daemon.new_project(Some("One")).expect("created");
    daemon.new_project(Some("Two")).expect("created");
    daemon.save_project("One").expect("saved");
    daemon.save_project("Two").expect("saved");
    fs::create_dir_all(daemon.config().projects_dir.join("junk")).expect("mkdir");

    assert_eq!(daemon.scan_projects().expect("scanned"), 2);
    let names: Vec<String> = daemon.list_projects().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["One", "Two"]);
}

#[test]
fn shutdown_unloads_everything() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (mut daemon, bus, _) = daemon(&temp);
    daemon.new_project(Some("One")).expect("created");
    daemon.new_project(Some("Two")).expect("created");
    bus.clear();

    daemon.shutdown();

    assert!(daemon.projects().is_empty());
    assert_eq!(bus.count(|s| matches!(s, Signal::Quit { .. })), 2);
    assert_eq!(
        bus.count(|s| matches!(s, Signal::ProjectDisappeared { .. })),
        2
    );
    assert!(!daemon.config().projects_dir.join("One").exists());
}
