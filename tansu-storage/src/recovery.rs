//! # Recovery State Machine
//!
//! Startup state machine driving crash recovery:
//!
//! ```text
//! UNINITIALIZED -> ANALYZING -> {CLEAN, RECOVERY_NEEDED, CORRUPTED}
//!   RECOVERY_NEEDED -> RECOVERING -> {RECOVERED, CORRUPTED, FAILED}
//!   RECOVERED -> READY        CLEAN -> READY
//!   CORRUPTED -> {REPAIR, FAILED}     REPAIR -> {RECOVERED, FAILED}
//!   FAILED -> ERROR           ERROR -> ANALYZING (manual intervention)
//! ```
//!
//! Illegal transitions are refused and logged; the machine stays put.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use tansu_core::error::Result;

use crate::snapshot::probe_snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Uninitialized,
    Analyzing,
    Clean,
    RecoveryNeeded,
    Recovering,
    Recovered,
    Corrupted,
    Failed,
    Repair,
    Ready,
    Error,
}

impl RecoveryState {
    pub fn name(&self) -> &'static str {
        match self {
            RecoveryState::Uninitialized => "UNINITIALIZED",
            RecoveryState::Analyzing => "ANALYZING",
            RecoveryState::Clean => "CLEAN",
            RecoveryState::RecoveryNeeded => "RECOVERY_NEEDED",
            RecoveryState::Recovering => "RECOVERING",
            RecoveryState::Recovered => "RECOVERED",
            RecoveryState::Corrupted => "CORRUPTED",
            RecoveryState::Failed => "FAILED",
            RecoveryState::Repair => "REPAIR",
            RecoveryState::Ready => "READY",
            RecoveryState::Error => "ERROR",
        }
    }
}

/// Events that move the machine between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEvent {
    StartAnalysis,
    AnalysisComplete,
    RecoveryStart,
    RecoveryComplete,
    CorruptionDetected,
    FailureDetected,
    RepairStart,
    ManualIntervention,
}

/// What analysis concluded about the on-disk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisOutcome {
    #[default]
    Clean,
    RecoveryNeeded,
    Corrupted,
}

/// Analysis results carried through recovery and exposed to callers.
#[derive(Debug, Clone, Default)]
pub struct RecoveryInfo {
    pub outcome: AnalysisOutcome,
    /// Valid snapshot found during analysis, if any
    pub snapshot_file: Option<PathBuf>,
    /// Sequence embedded in that snapshot (0 when replaying from scratch)
    pub snapshot_sequence: u64,
    /// WAL segments present at analysis time
    pub log_files: Vec<PathBuf>,
    /// Sequence of the last record replayed
    pub last_replayed_sequence: u64,
    pub error_message: Option<String>,
}

pub struct RecoveryStateMachine {
    state: RecoveryState,
    entered_at: Instant,
    info: RecoveryInfo,
}

impl Default for RecoveryStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryStateMachine {
    pub fn new() -> Self {
        Self {
            state: RecoveryState::Uninitialized,
            entered_at: Instant::now(),
            info: RecoveryInfo::default(),
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == RecoveryState::Ready
    }

    pub fn is_error(&self) -> bool {
        matches!(self.state, RecoveryState::Error | RecoveryState::Failed)
    }

    pub fn time_in_current_state(&self) -> Duration {
        self.entered_at.elapsed()
    }

    pub fn info(&self) -> &RecoveryInfo {
        &self.info
    }

    pub fn set_info(&mut self, info: RecoveryInfo) {
        self.info = info;
    }

    pub fn set_last_replayed(&mut self, sequence: u64) {
        self.info.last_replayed_sequence = sequence;
    }

    fn can_transition(from: RecoveryState, to: RecoveryState) -> bool {
        use RecoveryState::*;
        match from {
            Uninitialized => to == Analyzing,
            Analyzing => matches!(to, Clean | RecoveryNeeded | Corrupted),
            Clean => to == Ready,
            RecoveryNeeded => to == Recovering,
            Recovering => matches!(to, Recovered | Corrupted | Failed),
            Recovered => to == Ready,
            Corrupted => matches!(to, Repair | Failed),
            Failed => to == Error,
            Repair => matches!(to, Recovered | Failed),
            Ready => false,
            Error => to == Analyzing,
        }
    }

    /// Target state for an event in the current state, if the pair is
    /// meaningful at all.
    fn target_for(&self, event: RecoveryEvent) -> Option<RecoveryState> {
        use RecoveryEvent::*;
        use RecoveryState::*;
        match (self.state, event) {
            (Uninitialized, StartAnalysis) => Some(Analyzing),
            (Analyzing, AnalysisComplete) => Some(match self.info.outcome {
                AnalysisOutcome::Clean => Clean,
                AnalysisOutcome::RecoveryNeeded => RecoveryNeeded,
                AnalysisOutcome::Corrupted => Corrupted,
            }),
            (Analyzing, CorruptionDetected) => Some(Corrupted),
            (Clean, RecoveryComplete) => Some(Ready),
            (RecoveryNeeded, RecoveryStart) => Some(Recovering),
            (Recovering, RecoveryComplete) => Some(Recovered),
            (Recovering, CorruptionDetected) => Some(Corrupted),
            (Recovering, FailureDetected) => Some(Failed),
            (Recovered, RecoveryComplete) => Some(Ready),
            (Corrupted, RepairStart) => Some(Repair),
            (Corrupted, FailureDetected) => Some(Failed),
            (Repair, RecoveryComplete) => Some(Recovered),
            (Repair, FailureDetected) => Some(Failed),
            (Failed, FailureDetected) => Some(Error),
            (Failed, ManualIntervention) => Some(Error),
            (Error, ManualIntervention) => Some(Analyzing),
            _ => None,
        }
    }

    /// Apply an event. Returns true when a transition happened; refused
    /// events leave the state unchanged and are logged.
    pub fn process_event(&mut self, event: RecoveryEvent) -> bool {
        let Some(target) = self.target_for(event) else {
            warn!(
                state = self.state.name(),
                ?event,
                "refused recovery event with no transition"
            );
            return false;
        };
        if !Self::can_transition(self.state, target) {
            warn!(
                from = self.state.name(),
                to = target.name(),
                "refused illegal recovery transition"
            );
            return false;
        }
        info!(from = self.state.name(), to = target.name(), "recovery transition");
        self.state = target;
        self.entered_at = Instant::now();
        true
    }
}

/// Analyze on-disk state.
///
/// - Valid snapshot header -> recovery needed from its embedded sequence
/// - Snapshot present but invalid -> recovery needed from sequence 0 (the
///   snapshot is discarded and the full WAL is replayed)
/// - No snapshot, but WAL segments exist -> recovery needed from sequence 0
/// - Nothing on disk -> clean
pub fn analyze_disk_state(data_dir: &Path, log_dir: &Path) -> Result<RecoveryInfo> {
    let snapshot_path = data_dir.join("main.db");
    let log_files = list_log_files(log_dir)?;

    if snapshot_path.exists() {
        match probe_snapshot(&snapshot_path)? {
            Some(sequence) => {
                info!(sequence, "analysis: valid snapshot found");
                return Ok(RecoveryInfo {
                    outcome: AnalysisOutcome::RecoveryNeeded,
                    snapshot_file: Some(snapshot_path),
                    snapshot_sequence: sequence,
                    log_files,
                    last_replayed_sequence: 0,
                    error_message: None,
                });
            }
            None => {
                warn!("analysis: snapshot present but invalid; it will be discarded");
                return Ok(RecoveryInfo {
                    outcome: AnalysisOutcome::RecoveryNeeded,
                    snapshot_file: None,
                    snapshot_sequence: 0,
                    log_files,
                    last_replayed_sequence: 0,
                    error_message: Some("invalid snapshot header".to_string()),
                });
            }
        }
    }

    if !log_files.is_empty() {
        info!(segments = log_files.len(), "analysis: WAL segments without snapshot");
        return Ok(RecoveryInfo {
            outcome: AnalysisOutcome::RecoveryNeeded,
            snapshot_file: None,
            snapshot_sequence: 0,
            log_files,
            last_replayed_sequence: 0,
            error_message: None,
        });
    }

    Ok(RecoveryInfo {
        outcome: AnalysisOutcome::Clean,
        ..RecoveryInfo::default()
    })
}

fn list_log_files(log_dir: &Path) -> Result<Vec<PathBuf>> {
    if !log_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("commit.log."))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive_to_ready(machine: &mut RecoveryStateMachine, outcome: AnalysisOutcome) {
        assert!(machine.process_event(RecoveryEvent::StartAnalysis));
        machine.set_info(RecoveryInfo {
            outcome,
            ..RecoveryInfo::default()
        });
        assert!(machine.process_event(RecoveryEvent::AnalysisComplete));
    }

    #[test]
    fn clean_path_reaches_ready() {
        let mut machine = RecoveryStateMachine::new();
        drive_to_ready(&mut machine, AnalysisOutcome::Clean);
        assert_eq!(machine.state(), RecoveryState::Clean);
        assert!(machine.process_event(RecoveryEvent::RecoveryComplete));
        assert!(machine.is_ready());
    }

    #[test]
    fn recovery_path_reaches_ready() {
        let mut machine = RecoveryStateMachine::new();
        drive_to_ready(&mut machine, AnalysisOutcome::RecoveryNeeded);
        assert_eq!(machine.state(), RecoveryState::RecoveryNeeded);
        assert!(machine.process_event(RecoveryEvent::RecoveryStart));
        assert_eq!(machine.state(), RecoveryState::Recovering);
        assert!(machine.process_event(RecoveryEvent::RecoveryComplete));
        assert_eq!(machine.state(), RecoveryState::Recovered);
        assert!(machine.process_event(RecoveryEvent::RecoveryComplete));
        assert!(machine.is_ready());
    }

    #[test]
    fn failure_path_reaches_error() {
        let mut machine = RecoveryStateMachine::new();
        drive_to_ready(&mut machine, AnalysisOutcome::RecoveryNeeded);
        machine.process_event(RecoveryEvent::RecoveryStart);
        assert!(machine.process_event(RecoveryEvent::FailureDetected));
        assert_eq!(machine.state(), RecoveryState::Failed);
        assert!(machine.process_event(RecoveryEvent::FailureDetected));
        assert_eq!(machine.state(), RecoveryState::Error);
        assert!(machine.is_error());
        // Manual intervention restarts analysis.
        assert!(machine.process_event(RecoveryEvent::ManualIntervention));
        assert_eq!(machine.state(), RecoveryState::Analyzing);
    }

    #[test]
    fn illegal_events_are_refused() {
        let mut machine = RecoveryStateMachine::new();
        // Not analyzing yet: completing analysis is meaningless.
        assert!(!machine.process_event(RecoveryEvent::AnalysisComplete));
        assert_eq!(machine.state(), RecoveryState::Uninitialized);

        drive_to_ready(&mut machine, AnalysisOutcome::Clean);
        machine.process_event(RecoveryEvent::RecoveryComplete);
        assert!(machine.is_ready());
        // READY is terminal.
        for event in [
            RecoveryEvent::StartAnalysis,
            RecoveryEvent::RecoveryStart,
            RecoveryEvent::FailureDetected,
        ] {
            assert!(!machine.process_event(event));
            assert!(machine.is_ready());
        }
    }

    #[test]
    fn corruption_repair_path() {
        let mut machine = RecoveryStateMachine::new();
        drive_to_ready(&mut machine, AnalysisOutcome::RecoveryNeeded);
        machine.process_event(RecoveryEvent::RecoveryStart);
        assert!(machine.process_event(RecoveryEvent::CorruptionDetected));
        assert_eq!(machine.state(), RecoveryState::Corrupted);
        assert!(machine.process_event(RecoveryEvent::RepairStart));
        assert_eq!(machine.state(), RecoveryState::Repair);
        assert!(machine.process_event(RecoveryEvent::RecoveryComplete));
        assert_eq!(machine.state(), RecoveryState::Recovered);
    }

    #[test]
    fn analysis_of_empty_directories_is_clean() {
        let dir = tempfile::TempDir::new().unwrap();
        let info = analyze_disk_state(&dir.path().join("data"), &dir.path().join("logs")).unwrap();
        assert_eq!(info.outcome, AnalysisOutcome::Clean);
        assert!(info.log_files.is_empty());
    }
}
