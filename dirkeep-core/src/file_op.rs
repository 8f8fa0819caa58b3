use notify::{
    event::{ModifyKind, RenameMode},
    EventKind,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// What the remote side should eventually do with a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Remove,
}

impl Action {
    /// Literal token stored in the durable queue.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Remove => "remove",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Action::Add),
            "remove" => Ok(Action::Remove),
            other => Err(other.to_string()),
        }
    }
}

/// Latest known disposition of one path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileChangeIntent {
    pub path: PathBuf,
    pub action: Action,
}

impl FileChangeIntent {
    pub fn add(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            action: Action::Add,
        }
    }

    pub fn remove(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            action: Action::Remove,
        }
    }
}

/// Opaque identifier linking the two halves of a move, as supplied by the watch backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub usize);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Create,
    Write,
    Remove,
    MovedFrom,
    MovedTo,
}

/// A single change notification from the watch service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawKind,
    pub path: PathBuf,
    /// Only meaningful for `MovedFrom` / `MovedTo`.
    pub correlation: Option<CorrelationId>,
}

impl RawEvent {
    pub fn new(kind: RawKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            correlation: None,
        }
    }

    pub fn moved(kind: RawKind, path: impl Into<PathBuf>, token: usize) -> Self {
        Self {
            kind,
            path: path.into(),
            correlation: Some(CorrelationId(token)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Convert a notify::Event into zero or more raw events.
pub fn event_to_raw(event: notify::Event) -> Vec<RawEvent> {
    let tracker = event.tracker();
    let kind = match event.kind {
        EventKind::Create(_) => RawKind::Create,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            RawKind::Write
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => RawKind::MovedFrom,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => RawKind::MovedTo,
        // The separate From/To halves already carry this rename.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => return Vec::new(),
        // Backends without move correlation: settle each path on whether it still exists.
        EventKind::Modify(ModifyKind::Name(_)) => {
            return event
                .paths
                .into_iter()
                .map(|p| {
                    let kind = if p.exists() {
                        RawKind::Write
                    } else {
                        RawKind::Remove
                    };
                    RawEvent::new(kind, p)
                })
                .collect();
        }
        EventKind::Remove(_) => RawKind::Remove,
        _ => return Vec::new(),
    };
    let correlation = match kind {
        RawKind::MovedFrom | RawKind::MovedTo => tracker.map(CorrelationId),
        _ => None,
    };
    event
        .paths
        .into_iter()
        .map(|path| RawEvent {
            kind,
            path,
            correlation,
        })
        .collect()
}
