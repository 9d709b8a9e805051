use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::debugger::DebuggerState;
use crate::host::TabId;

/// Recording state of one target tab
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TabRecordingState {
    pub recording: bool,
    pub debugger: DebuggerState,
}

/// Tab state owned by the dispatcher
///
/// Holds the per-tab recording flags and debugger sub-states, plus the
/// one-to-one recorder tab -> target tab mapping. Nothing outside the
/// dispatcher touches this directly.
///
/// A recorder is retired once its run is over or its tab is gone. Host tab
/// ids are never reused, so a retired recorder stays retired.
#[derive(Debug, Default)]
pub struct TabRegistry {
    tabs: HashMap<TabId, TabRecordingState>,
    recorders: HashMap<TabId, TabId>,
    retired: HashSet<TabId>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, tab: TabId) -> TabRecordingState {
        self.tabs.get(&tab).copied().unwrap_or_default()
    }

    pub fn is_recording(&self, tab: TabId) -> bool {
        self.state(tab).recording
    }

    /// Set the recording flag. Returns true when the flag actually changed.
    pub fn set_recording(&mut self, tab: TabId, recording: bool) -> bool {
        let entry = self.tabs.entry(tab).or_default();
        let changed = entry.recording != recording;
        entry.recording = recording;
        changed
    }

    pub fn debugger_state(&self, tab: TabId) -> DebuggerState {
        self.state(tab).debugger
    }

    pub fn set_debugger_state(&mut self, tab: TabId, state: DebuggerState) {
        self.tabs.entry(tab).or_default().debugger = state;
    }

    /// Move from `from` to `to` only if the tab is still in `from`.
    /// A host detach can land between the two ends of a capture.
    pub fn transition_debugger(
        &mut self,
        tab: TabId,
        from: DebuggerState,
        to: DebuggerState,
    ) -> bool {
        let entry = self.tabs.entry(tab).or_default();
        if entry.debugger == from {
            entry.debugger = to;
            true
        } else {
            false
        }
    }

    /// Install the recorder -> target mapping, evicting any earlier recorder
    /// bound to the same target. Returns the evicted recorder tab.
    pub fn register_recorder(&mut self, recorder: TabId, target: TabId) -> Option<TabId> {
        let previous = self.recorder_for_target(target).filter(|r| *r != recorder);
        if let Some(previous) = previous {
            self.recorders.remove(&previous);
        }
        self.recorders.insert(recorder, target);
        previous
    }

    pub fn target_of(&self, recorder: TabId) -> Option<TabId> {
        self.recorders.get(&recorder).copied()
    }

    pub fn recorder_for_target(&self, target: TabId) -> Option<TabId> {
        self.recorders
            .iter()
            .find(|(_, t)| **t == target)
            .map(|(recorder, _)| *recorder)
    }

    /// Drop the recorder's mapping and mark it as finished. Returns the
    /// target it was bound to.
    pub fn retire_recorder(&mut self, recorder: TabId) -> Option<TabId> {
        self.retired.insert(recorder);
        self.recorders.remove(&recorder)
    }

    pub fn is_retired(&self, recorder: TabId) -> bool {
        self.retired.contains(&recorder)
    }

    /// Forget everything about a tab that no longer exists
    pub fn forget_tab(&mut self, tab: TabId) -> Option<TabRecordingState> {
        self.tabs.remove(&tab)
    }

    pub fn recording_tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self
            .tabs
            .iter()
            .filter(|(_, s)| s.recording)
            .map(|(tab, _)| *tab)
            .collect();
        tabs.sort();
        tabs
    }
}
