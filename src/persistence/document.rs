//! Project document codec.
//!
//! A saved project is described by `project.xml`:
//!
//! ```xml
//! <ensemble_project>
//!   <version>1.0</version>
//!   <name>Live set</name>
//!   <description/>
//!   <client>
//!     <class>synth</class>
//!     <id>5b0c…</id>
//!     <name>synth 01</name>
//!     <flags>66</flags>
//!     <working_directory>/home/me</working_directory>
//!     <arg_set><arg>synth</arg><arg>--hidden</arg></arg_set>
//!     <patch_set backend="jack"><patch>synth:out -> system:playback_1</patch></patch_set>
//!     <dependencies><id>77e1…</id></dependencies>
//!   </client>
//! </ensemble_project>
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;

use quick_xml::events::{BytesCData, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::client::{Client, ClientFlags, Membership};
use crate::models::dependency::DependencySet;
use crate::models::patch::PatchSet;
use crate::{AppError, Result};

/// File name of the project document inside the project directory.
pub const PROJECT_FILE: &str = "project.xml";
/// Root element name.
pub const ROOT_ELEMENT: &str = "ensemble_project";
/// Schema version written by this daemon.
pub const DOCUMENT_VERSION: &str = "1.0";

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Serialized form of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "ensemble_project")]
pub struct ProjectDocument {
    /// Schema version tag.
    #[serde(default)]
    pub version: String,
    /// Project name; a document without one is rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Description text.
    #[serde(default)]
    pub description: String,
    /// Clients in save order.
    #[serde(rename = "client", default)]
    pub clients: Vec<ClientElement>,
}

/// One persisted client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientElement {
    /// Application class.
    pub class: String,
    /// Client id string.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Capability bitmask.
    #[serde(default)]
    pub flags: u32,
    /// Working directory.
    #[serde(default)]
    pub working_directory: String,
    /// Launch command line.
    #[serde(default)]
    pub arg_set: ArgSet,
    /// Backend connection blobs.
    #[serde(rename = "patch_set", default, skip_serializing_if = "Vec::is_empty")]
    pub patch_sets: Vec<PatchSetElement>,
    /// Declared prerequisites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<DependencyList>,
}

/// Command-line container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSet {
    /// Arguments in order.
    #[serde(rename = "arg", default)]
    pub args: Vec<String>,
}

/// Patch blob container for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSetElement {
    /// Backend name.
    #[serde(rename = "@backend")]
    pub backend: String,
    /// Connection descriptions.
    #[serde(rename = "patch", default)]
    pub patches: Vec<String>,
}

/// Dependency id container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyList {
    /// Prerequisite client ids.
    #[serde(rename = "id", default)]
    pub ids: Vec<String>,
}

impl ClientElement {
    /// Capture a client for saving along with its current `patches`.
    #[must_use]
    pub fn capture(client: &Client, patches: &[PatchSet]) -> Self {
        let patch_sets = patches
            .iter()
            .map(|set| PatchSetElement {
                backend: set.backend.clone(),
                patches: set.patches.clone(),
            })
            .collect();

        let dependencies = (!client.dependencies.is_empty()).then(|| DependencyList {
            ids: client
                .dependencies
                .declared()
                .iter()
                .map(Uuid::to_string)
                .collect(),
        });

        Self {
            class: client.class.clone(),
            id: client.id().to_string(),
            name: client.name.clone().unwrap_or_default(),
            flags: client.flags.bits(),
            working_directory: client.working_dir.display().to_string(),
            arg_set: ArgSet {
                args: client.argv.clone(),
            },
            patch_sets,
            dependencies,
        }
    }

    /// Rebuild a lost client record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Document` if the id or a dependency id is not a
    /// valid UUID.
    pub fn restore(&self) -> Result<Client> {
        let id = parse_uuid(&self.id)?;
        let mut client = Client::with_id(id, self.class.clone(), Membership::Lost);
        client.name = (!self.name.is_empty()).then(|| self.name.clone());
        client.flags = ClientFlags::from_bits(self.flags);
        client.working_dir = self.working_directory.clone().into();
        client.argv.clone_from(&self.arg_set.args);
        client.patches = self
            .patch_sets
            .iter()
            .map(|set| PatchSet::new(set.backend.clone(), set.patches.clone()))
            .collect();

        if let Some(deps) = &self.dependencies {
            let ids = deps
                .ids
                .iter()
                .map(|raw| parse_uuid(raw))
                .collect::<Result<Vec<_>>>()?;
            client.dependencies = DependencySet::from_declared(ids);
        }

        Ok(client)
    }
}

impl ProjectDocument {
    /// Serialize to XML text including the declaration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Document` if serialization fails.
    pub fn to_xml(&self) -> Result<String> {
        let mut body = String::from(XML_DECLARATION);
        let mut serializer = quick_xml::se::Serializer::new(&mut body);
        serializer.indent(' ', 2);
        self.serialize(serializer)
            .map_err(|err| AppError::Document(format!("failed to serialize project: {err}")))?;
        body.push('\n');
        Ok(body)
    }

    /// Parse XML text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Document` if the root element is missing, the
    /// text is malformed, or the document carries no name.
    pub fn from_xml(raw: &str) -> Result<Self> {
        if !has_root_element(raw)? {
            return Err(AppError::Document(format!(
                "no {ROOT_ELEMENT} root element in project document"
            )));
        }

        let document: Self = quick_xml::de::from_str(&protect_leaf_text(raw)?)
            .map_err(|err| AppError::Document(format!("malformed project document: {err}")))?;

        if document.name.as_deref().is_none_or(str::is_empty) {
            return Err(AppError::Document(
                "no name element in project document".into(),
            ));
        }

        Ok(document)
    }

    /// Read and parse the document stored in `project_dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read and
    /// `AppError::Document` if it cannot be parsed.
    pub fn read_from(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(PROJECT_FILE);
        let raw = fs::read_to_string(&path)
            .map_err(|err| AppError::Io(format!("cannot read {}: {err}", path.display())))?;
        Self::from_xml(&raw)
    }

    /// Write the document into `project_dir`, replacing any previous one
    /// atomically.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Document` if serialization fails and
    /// `AppError::Io` if the file cannot be written.
    pub fn write_to(&self, project_dir: &Path) -> Result<()> {
        let body = self.to_xml()?;
        let path = project_dir.join(PROJECT_FILE);

        let mut staged = tempfile::NamedTempFile::new_in(project_dir)
            .map_err(|err| AppError::Io(format!("cannot stage {}: {err}", path.display())))?;
        staged
            .write_all(body.as_bytes())
            .map_err(|err| AppError::Io(format!("cannot stage {}: {err}", path.display())))?;
        staged
            .persist(&path)
            .map_err(|err| AppError::Io(format!("cannot save {}: {err}", path.display())))?;
        Ok(())
    }
}

/// Rewrite the text of every leaf element as CDATA. The serde
/// deserializer trims text content but keeps CDATA verbatim, and names,
/// arguments and descriptions must survive with their whitespace.
fn protect_leaf_text(raw: &str) -> Result<String> {
    let malformed = |err: &dyn std::fmt::Display| {
        AppError::Document(format!("malformed project document: {err}"))
    };

    let mut reader = Reader::from_str(raw);
    let mut writer = Writer::new(Vec::with_capacity(raw.len()));
    let mut pending: Option<BytesText<'_>> = None;
    let mut after_start = false;

    loop {
        let event = reader.read_event().map_err(|err| malformed(&err))?;
        let written = match event {
            Event::Eof => break,
            Event::Text(text) if after_start && pending.is_none() => {
                pending = Some(text);
                continue;
            }
            Event::End(end) => {
                if let Some(text) = pending.take() {
                    let content = text.unescape().map_err(|err| malformed(&err))?;
                    for cdata in BytesCData::escaped(&content) {
                        writer
                            .write_event(Event::CData(cdata))
                            .map_err(|err| malformed(&err))?;
                    }
                }
                after_start = false;
                writer.write_event(Event::End(end))
            }
            other => {
                if let Some(text) = pending.take() {
                    writer
                        .write_event(Event::Text(text))
                        .map_err(|err| malformed(&err))?;
                }
                after_start = matches!(other, Event::Start(_));
                writer.write_event(other)
            }
        };
        written.map_err(|err| malformed(&err))?;
    }

    String::from_utf8(writer.into_inner()).map_err(|err| malformed(&err))
}

fn has_root_element(raw: &str) -> Result<bool> {
    let mut reader = Reader::from_str(raw);
    loop {
        match reader.read_event() {
            Ok(Event::Start(element) | Event::Empty(element)) => {
                return Ok(element.name().as_ref() == ROOT_ELEMENT.as_bytes());
            }
            Ok(Event::Eof) => return Ok(false),
            Ok(_) => {}
            Err(err) => {
                return Err(AppError::Document(format!(
                    "malformed project document: {err}"
                )))
            }
        }
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|err| AppError::Document(format!("invalid client id '{raw}': {err}")))
}
