#![forbid(unsafe_code)]

//! `ensemble-ctl`: local CLI companion for `ensembled`.
//!
//! Connects to the IPC socket and sends JSON commands to the daemon.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(
    name = "ensemble-ctl",
    about = "Local CLI for the ensembled session daemon",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "ensembled")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List projects found on disk.
    List,

    /// Re-read the projects directory.
    Scan,

    /// Show loaded projects and their clients.
    Status {
        /// Limit to one project.
        project: Option<String>,
    },

    /// Create an empty project.
    New {
        /// Project name; derived from the configured default when omitted.
        name: Option<String>,
    },

    /// Load a project and relaunch its clients.
    Open {
        /// Project name.
        name: String,
    },

    /// Unload a project, telling its clients to quit.
    Close {
        /// Project name.
        project: String,
    },

    /// Save a project, or every loaded project when none is given.
    Save {
        /// Project name.
        project: Option<String>,
    },

    /// Move a project directory.
    Move {
        /// Project name.
        project: String,
        /// New directory.
        directory: PathBuf,
    },

    /// Rename a project.
    Rename {
        /// Current name.
        project: String,
        /// New name.
        new_name: String,
    },

    /// Replace a project's description.
    Describe {
        /// Project name.
        project: String,
        /// Description text.
        description: String,
    },

    /// Replace a project's notes.
    Notes {
        /// Project name.
        project: String,
        /// Notes text.
        notes: String,
    },

    /// Rename a client.
    RenameClient {
        /// Client id.
        client_id: String,
        /// New display name.
        name: String,
    },

    /// Make a client wait for another when the project is opened.
    Depend {
        /// Dependent client id.
        client_id: String,
        /// Prerequisite client id.
        dependency: String,
    },

    /// Drop a client dependency.
    Undepend {
        /// Dependent client id.
        client_id: String,
        /// Prerequisite client id.
        dependency: String,
    },

    /// Print daemon signals as they happen.
    Monitor,
}

impl Command {
    fn to_request(&self) -> Value {
        match self {
            Self::List => json!({ "command": "list_projects" }),
            Self::Scan => json!({ "command": "scan_projects" }),
            Self::Status { project } => json!({ "command": "status", "project": project }),
            Self::New { name } => json!({ "command": "new_project", "name": name }),
            Self::Open { name } => json!({ "command": "open_project", "name": name }),
            Self::Close { project } => json!({ "command": "close_project", "project": project }),
            Self::Save { project: Some(project) } => {
                json!({ "command": "save_project", "project": project })
            }
            Self::Save { project: None } => json!({ "command": "save_all" }),
            Self::Move { project, directory } => {
                json!({ "command": "move_project", "project": project, "directory": directory })
            }
            Self::Rename { project, new_name } => {
                json!({ "command": "rename_project", "project": project, "new_name": new_name })
            }
            Self::Describe {
                project,
                description,
            } => json!({
                "command": "set_description",
                "project": project,
                "description": description,
            }),
            Self::Notes { project, notes } => {
                json!({ "command": "set_notes", "project": project, "notes": notes })
            }
            Self::RenameClient { client_id, name } => {
                json!({ "command": "rename_client", "client_id": client_id, "name": name })
            }
            Self::Depend {
                client_id,
                dependency,
            } => json!({
                "command": "add_dependency",
                "client_id": client_id,
                "dependency": dependency,
            }),
            Self::Undepend {
                client_id,
                dependency,
            } => json!({
                "command": "remove_dependency",
                "client_id": client_id,
                "dependency": dependency,
            }),
            Self::Monitor => json!({ "command": "subscribe" }),
        }
    }
}

fn main() {
    let args = Cli::parse();
    let request = args.command.to_request();

    let result = if matches!(args.command, Command::Monitor) {
        monitor(&args.ipc_name, &request)
    } else {
        send_ipc_command(&args.ipc_name, &request).map(|response| print_response(&response))
    };

    if let Err(err) = result {
        eprintln!("Failed to talk to daemon: {err}");
        eprintln!("Is ensembled running with ipc_name '{}'?", args.ipc_name);
        std::process::exit(1);
    }
}

fn print_response(response: &Value) {
    let Some(obj) = response.as_object() else {
        println!("{response}");
        return;
    };

    let ok = obj.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if ok {
        match obj.get("data") {
            Some(Value::Null) | None => println!("OK"),
            Some(data) => println!("{}", serde_json::to_string_pretty(data).unwrap_or_default()),
        }
    } else {
        let err_msg = obj
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        eprintln!("Error: {err_msg}");
        std::process::exit(1);
    }
}

type CtlResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn connect(ipc_name: &str, request: &Value) -> CtlResult<BufReader<Stream>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    Ok(BufReader::new(stream))
}

/// Send one command and read its response line.
fn send_ipc_command(ipc_name: &str, request: &Value) -> CtlResult<Value> {
    let mut reader = connect(ipc_name, request)?;
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;
    Ok(serde_json::from_str(response_line.trim())?)
}

/// Subscribe and print every signal until the daemon goes away.
fn monitor(ipc_name: &str, request: &Value) -> CtlResult<()> {
    let reader = connect(ipc_name, request)?;
    let mut lines = reader.lines();

    let Some(first) = lines.next() else {
        return Err("daemon closed the connection".into());
    };
    let response: Value = serde_json::from_str(first?.trim())?;
    if response.get("ok").and_then(Value::as_bool) != Some(true) {
        print_response(&response);
        return Ok(());
    }

    for line in lines {
        let line = line?;
        if !line.trim().is_empty() {
            println!("{line}");
        }
    }
    Ok(())
}
