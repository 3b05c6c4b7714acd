//! Scripted scenarios: replay host and editor actions against a fresh store.
//!
//! A scenario file describes the starting document, the subtree a controller
//! is bound to, and a list of steps. Every handler call and every host value
//! outcome is recorded as a [`ScenarioEvent`].
//!
//! ```yaml
//! name: typing then commit
//! initial: []
//! steps:
//!   - op: replace
//!     children: [{ id: a, type: core/paragraph }]
//!     provisional: true
//!   - op: echo
//!   - op: commit
//! ```

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use blocksync_core::{BlockId, BlockList, ReplaceOptions, SelectionAnchor, SelectionRange, SubtreeId, TreeStore};

use crate::controller::{SyncConfig, SyncController, SyncHandle, SyncOptions, SyncStats, ValueOutcome};
use crate::error::{io_err, scenario_err, SyncError};

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub name: Option<String>,
    pub options: SyncOptions,
    /// Store document before the controller is bound.
    pub document: BlockList,
    /// Bound subtree; omitted or `null` means the root.
    pub subtree: SubtreeId,
    /// Host value at bind time. `None` leaves the store as the source of truth.
    pub initial: Option<BlockList>,
    /// Hand every reported value straight back from inside the handler.
    pub echo_back: bool,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// The host supplies a value it built itself.
    Supply {
        value: Option<BlockList>,
        #[serde(default)]
        selection: Option<SelectionRange>,
    },
    /// The host hands back the most recently reported value.
    Echo,
    /// A local edit replacing the children of `subtree` (default: the bound one).
    Replace {
        #[serde(default)]
        subtree: Option<SubtreeId>,
        children: BlockList,
        #[serde(default)]
        provisional: bool,
    },
    /// Replace the whole document.
    Reset { document: BlockList },
    UpdateAttributes {
        id: BlockId,
        attributes: BTreeMap<String, Value>,
    },
    /// Mark the last change persistent.
    Commit,
    Select {
        start: SelectionAnchor,
        end: SelectionAnchor,
    },
    Teardown,
}

impl Step {
    fn label(&self) -> &'static str {
        match self {
            Step::Supply { .. } => "supply",
            Step::Echo => "echo",
            Step::Replace { .. } => "replace",
            Step::Reset { .. } => "reset",
            Step::UpdateAttributes { .. } => "update_attributes",
            Step::Commit => "commit",
            Step::Select { .. } => "select",
            Step::Teardown => "teardown",
        }
    }
}

/// Load a scenario from YAML or JSON, chosen by extension.
pub fn load(path: &Path) -> Result<Scenario, SyncError> {
    let text = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let scenario = if is_json {
        serde_json::from_str(&text)?
    } else {
        serde_yaml::from_str(&text)?
    };
    tracing::debug!(path = %path.display(), "loaded scenario");
    Ok(scenario)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Input,
    Change,
    Echo,
    Reset,
    Unchanged,
    Uncontrolled,
    TornDown,
}

impl From<ValueOutcome> for EventKind {
    fn from(outcome: ValueOutcome) -> Self {
        match outcome {
            ValueOutcome::Unchanged => EventKind::Unchanged,
            ValueOutcome::Uncontrolled => EventKind::Uncontrolled,
            ValueOutcome::Echo => EventKind::Echo,
            ValueOutcome::Reset => EventKind::Reset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioEvent {
    /// Zero-based step index; bind-time events use `None`.
    pub step: Option<usize>,
    pub kind: EventKind,
    /// Top-level block ids of the value involved, when there is one.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<BlockId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: Option<String>,
    pub events: Vec<ScenarioEvent>,
    pub stats: SyncStats,
    pub pending: usize,
    pub revision: u64,
    /// Children of the bound subtree after the last step.
    pub final_children: BlockList,
}

impl ScenarioReport {
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Trace {
    step: Cell<Option<usize>>,
    events: RefCell<Vec<ScenarioEvent>>,
    last_output: RefCell<Option<BlockList>>,
    handle: RefCell<Option<SyncHandle>>,
    echo_back: bool,
}

impl Trace {
    fn record(&self, kind: EventKind, value: Option<&BlockList>) {
        let blocks = value
            .map(|list| list.iter().map(|b| b.id.clone()).collect())
            .unwrap_or_default();
        self.events.borrow_mut().push(ScenarioEvent {
            step: self.step.get(),
            kind,
            blocks,
        });
    }

    fn on_output(&self, kind: EventKind, value: &BlockList) {
        self.record(kind, Some(value));
        *self.last_output.borrow_mut() = Some(value.clone());
        if !self.echo_back {
            return;
        }
        let handle = self.handle.borrow().clone();
        if let Some(handle) = handle {
            match handle.set_value(Some(value.clone()), None) {
                Ok(outcome) => self.record(outcome.into(), Some(value)),
                Err(e) => tracing::warn!(error = %e, "echo from handler failed"),
            }
        }
    }
}

/// Execute every step of `scenario` against a fresh store.
pub fn run(scenario: &Scenario) -> Result<ScenarioReport, SyncError> {
    let store = TreeStore::with_document(scenario.document.clone());
    let trace = Rc::new(Trace {
        echo_back: scenario.echo_back,
        ..Trace::default()
    });

    let mut config = SyncConfig::new(scenario.subtree.clone()).options(scenario.options);
    if let Some(initial) = &scenario.initial {
        config = config.value(initial.clone());
    }
    let on_change = Rc::clone(&trace);
    let on_input = Rc::clone(&trace);
    config = config
        .on_change(move |blocks, _| on_change.on_output(EventKind::Change, blocks))
        .on_input(move |blocks, _| on_input.on_output(EventKind::Input, blocks));

    let mut controller = Some(SyncController::bind(&store, config)?);
    *trace.handle.borrow_mut() = controller.as_ref().map(SyncController::handle);
    let mut stats = SyncStats::default();

    for (index, step) in scenario.steps.iter().enumerate() {
        trace.step.set(Some(index));
        tracing::debug!(step = index, op = step.label(), "running scenario step");
        match step {
            Step::Supply { value, selection } => {
                let ctl = controller
                    .as_ref()
                    .ok_or_else(|| scenario_err(index, "controller already torn down"))?;
                let outcome = ctl.set_value(value.clone(), selection.clone())?;
                trace.record(outcome.into(), value.as_ref());
            }
            Step::Echo => {
                let ctl = controller
                    .as_ref()
                    .ok_or_else(|| scenario_err(index, "controller already torn down"))?;
                let value = trace
                    .last_output
                    .borrow()
                    .clone()
                    .ok_or_else(|| scenario_err(index, "nothing has been reported yet"))?;
                let outcome = ctl.set_value(Some(value.clone()), None)?;
                trace.record(outcome.into(), Some(&value));
            }
            Step::Replace {
                subtree,
                children,
                provisional,
            } => {
                let target = subtree.as_ref().unwrap_or(&scenario.subtree);
                let options = if *provisional {
                    ReplaceOptions::provisional()
                } else {
                    ReplaceOptions::persistent()
                };
                store.replace_children(target, children.clone(), options)?;
            }
            Step::Reset { document } => store.reset_document(document.clone()),
            Step::UpdateAttributes { id, attributes } => {
                store.update_block_attributes(id, attributes.clone())?;
            }
            Step::Commit => store.mark_last_change_persistent(),
            Step::Select { start, end } => store.set_selection(start.clone(), end.clone()),
            Step::Teardown => {
                let ctl = controller
                    .take()
                    .ok_or_else(|| scenario_err(index, "controller already torn down"))?;
                stats = ctl.stats();
                ctl.teardown();
                trace.record(EventKind::TornDown, None);
            }
        }
    }

    let pending = controller.as_ref().map_or(0, SyncController::pending_len);
    if let Some(ctl) = &controller {
        stats = ctl.stats();
    }
    let report = ScenarioReport {
        name: scenario.name.clone(),
        events: trace.events.borrow().clone(),
        stats,
        pending,
        revision: store.revision(),
        final_children: store.children(&scenario.subtree),
    };
    tracing::debug!(
        events = report.events.len(),
        revision = report.revision,
        "scenario finished"
    );
    Ok(report)
}
