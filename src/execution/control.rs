use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, ConversionResult};

/// Lifecycle phase of one conversion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Idle,
    Discovery,
    /// Discovery finished and `auto_continue` is off; waiting for an explicit continue.
    AwaitingSchema,
    Conversion,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl Phase {
    /// `Completed`, `Cancelled` and `Failed` end a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Cancelled | Phase::Failed)
    }

    /// Phases with a record loop running.
    pub fn is_running(self) -> bool {
        matches!(self, Phase::Discovery | Phase::Conversion)
    }

    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Cancelled | Failed) => true,
            (Idle, Discovery) => true,
            (Discovery, AwaitingSchema | Conversion | Paused) => true,
            (AwaitingSchema, Conversion) => true,
            (Conversion, Paused | Completed) => true,
            (Paused, Discovery | Conversion) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::Discovery => "discovery",
            Phase::AwaitingSchema => "awaiting-schema",
            Phase::Conversion => "conversion",
            Phase::Paused => "paused",
            Phase::Completed => "completed",
            Phase::Cancelled => "cancelled",
            Phase::Failed => "failed",
        })
    }
}

#[derive(Debug)]
struct ControlState {
    phase: Phase,
    /// Phase to return to when a pause is lifted.
    resume_to: Option<Phase>,
    cancel_requested: bool,
}

impl ControlState {
    fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            resume_to: None,
            cancel_requested: false,
        }
    }

    /// The phase the run is logically in, looking through a pause.
    fn effective(&self) -> Phase {
        match (self.phase, self.resume_to) {
            (Phase::Paused, Some(phase)) => phase,
            (phase, _) => phase,
        }
    }
}

/// Shared phase, pause and cancel state of a run.
///
/// Control requests arrive from another thread and take effect at the next
/// [`RunControl::checkpoint`], which the record loops call between records. A paused loop blocks
/// on a condition variable instead of polling.
#[derive(Debug)]
pub struct RunControl {
    state: Mutex<ControlState>,
    cv: Condvar,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlState::idle()),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current observable phase.
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn is_cancelled(&self) -> bool {
        let st = self.lock();
        st.cancel_requested || st.phase == Phase::Cancelled
    }

    /// Enter discovery for a new run. A finished (or never started) control is reset first;
    /// a run that is already in discovery is left alone.
    ///
    /// Returns `true` when the phase changed.
    pub fn begin(&self) -> bool {
        let mut st = self.lock();
        if st.phase == Phase::Idle || st.phase.is_terminal() {
            *st = ControlState::idle();
            st.phase = Phase::Discovery;
            true
        } else {
            false
        }
    }

    /// Validated transition requested by the pipeline itself. Fails with
    /// [`ConversionError::Cancelled`] once cancellation was requested.
    ///
    /// While paused, entering another running phase is deferred: the run stays paused and
    /// resumes into `next`. Returns the phase to report, or `None` when nothing observable changed.
    pub fn advance(&self, next: Phase) -> ConversionResult<Option<Phase>> {
        let mut st = self.lock();
        if st.cancel_requested {
            return Err(ConversionError::Cancelled);
        }
        let from = st.effective();
        if from == next && st.phase != Phase::Paused {
            return Ok(None);
        }
        if !from.can_transition_to(next) {
            return Err(ConversionError::InvalidTransition { from, to: next });
        }
        if st.phase == Phase::Paused && next.is_running() {
            st.resume_to = Some(next);
            return Ok(None);
        }
        st.phase = next;
        st.resume_to = None;
        self.cv.notify_all();
        Ok(Some(next))
    }

    /// Force a terminal phase while unwinding. Returns `false` if the run had already ended.
    pub fn settle(&self, terminal: Phase) -> bool {
        let mut st = self.lock();
        if st.phase.is_terminal() {
            return false;
        }
        st.phase = terminal;
        st.resume_to = None;
        self.cv.notify_all();
        true
    }

    /// Pause a running loop at its next checkpoint.
    pub fn request_pause(&self) -> ConversionResult<Phase> {
        let mut st = self.lock();
        match st.phase {
            Phase::Paused => Ok(Phase::Paused),
            phase if phase.is_running() && !st.cancel_requested => {
                st.resume_to = Some(phase);
                st.phase = Phase::Paused;
                Ok(Phase::Paused)
            }
            from => Err(ConversionError::InvalidTransition {
                from,
                to: Phase::Paused,
            }),
        }
    }

    /// Lift a pause. Returns the phase the run resumes into.
    pub fn request_resume(&self) -> ConversionResult<Phase> {
        let mut st = self.lock();
        match (st.phase, st.resume_to) {
            (Phase::Paused, Some(phase)) => {
                st.phase = phase;
                st.resume_to = None;
                self.cv.notify_all();
                Ok(phase)
            }
            (from, target) => Err(ConversionError::InvalidTransition {
                from,
                to: target.unwrap_or(Phase::Conversion),
            }),
        }
    }

    /// Request cooperative cancellation.
    ///
    /// With no record loop running (idle or awaiting schema) the run is cancelled immediately and
    /// `Cancelled` is returned. Otherwise the current phase is returned and the loop acknowledges
    /// at its next checkpoint; a paused loop is woken up for that.
    pub fn request_cancel(&self) -> ConversionResult<Phase> {
        let mut st = self.lock();
        if st.phase.is_terminal() {
            return Err(ConversionError::InvalidTransition {
                from: st.phase,
                to: Phase::Cancelled,
            });
        }
        st.cancel_requested = true;
        if matches!(st.phase, Phase::Idle | Phase::AwaitingSchema) {
            st.phase = Phase::Cancelled;
            st.resume_to = None;
        }
        self.cv.notify_all();
        Ok(st.phase)
    }

    /// Called by record loops between records: blocks while paused and fails with
    /// [`ConversionError::Cancelled`] once cancellation was requested.
    pub fn checkpoint(&self) -> ConversionResult<()> {
        let mut st = self.lock();
        loop {
            if st.cancel_requested || st.phase == Phase::Cancelled {
                return Err(ConversionError::Cancelled);
            }
            if st.phase != Phase::Paused {
                return Ok(());
            }
            st = self.cv.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Back to `Idle`, clearing pending requests.
    pub fn reset(&self) {
        *self.lock() = ControlState::idle();
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::{Phase, RunControl};
    use crate::error::ConversionError;

    #[test]
    fn transition_table() {
        assert!(Phase::Idle.can_transition_to(Phase::Discovery));
        assert!(Phase::Discovery.can_transition_to(Phase::AwaitingSchema));
        assert!(Phase::Paused.can_transition_to(Phase::Discovery));
        assert!(Phase::AwaitingSchema.can_transition_to(Phase::Cancelled));
        assert!(!Phase::Idle.can_transition_to(Phase::Paused));
        assert!(!Phase::AwaitingSchema.can_transition_to(Phase::Paused));
        assert!(!Phase::Completed.can_transition_to(Phase::Cancelled));
        assert!(!Phase::Cancelled.can_transition_to(Phase::Failed));
    }

    #[test]
    fn pause_only_from_running_phases_and_resumes_into_the_same_phase() {
        let ctl = RunControl::new();
        assert!(matches!(
            ctl.request_pause(),
            Err(ConversionError::InvalidTransition { from: Phase::Idle, .. })
        ));

        assert!(ctl.begin());
        assert_eq!(ctl.request_pause().unwrap(), Phase::Paused);
        assert_eq!(ctl.request_resume().unwrap(), Phase::Discovery);

        assert_eq!(ctl.advance(Phase::Conversion).unwrap(), Some(Phase::Conversion));
        ctl.request_pause().unwrap();
        assert_eq!(ctl.request_resume().unwrap(), Phase::Conversion);
        assert!(ctl.request_resume().is_err());
    }

    #[test]
    fn entering_conversion_while_paused_is_deferred() {
        let ctl = RunControl::new();
        ctl.begin();
        ctl.request_pause().unwrap();
        assert_eq!(ctl.advance(Phase::Conversion).unwrap(), None);
        assert_eq!(ctl.phase(), Phase::Paused);
        assert_eq!(ctl.request_resume().unwrap(), Phase::Conversion);
    }

    #[test]
    fn checkpoint_blocks_while_paused() {
        let ctl = Arc::new(RunControl::new());
        ctl.begin();
        ctl.request_pause().unwrap();

        let worker = {
            let ctl = Arc::clone(&ctl);
            thread::spawn(move || ctl.checkpoint())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!worker.is_finished());

        ctl.request_resume().unwrap();
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn cancel_wakes_a_paused_loop() {
        let ctl = Arc::new(RunControl::new());
        ctl.begin();
        ctl.request_pause().unwrap();

        let worker = {
            let ctl = Arc::clone(&ctl);
            thread::spawn(move || ctl.checkpoint())
        };
        assert_eq!(ctl.request_cancel().unwrap(), Phase::Paused);
        assert!(matches!(worker.join().unwrap(), Err(ConversionError::Cancelled)));
        assert!(ctl.settle(Phase::Cancelled));
        assert!(ctl.request_cancel().is_err());
    }

    #[test]
    fn cancel_without_a_running_loop_is_immediate() {
        let ctl = RunControl::new();
        ctl.begin();
        ctl.advance(Phase::AwaitingSchema).unwrap();
        assert_eq!(ctl.request_cancel().unwrap(), Phase::Cancelled);
        assert!(ctl.is_cancelled());
        assert!(!ctl.settle(Phase::Cancelled));

        assert!(ctl.begin());
        assert!(!ctl.is_cancelled());
        assert!(ctl.checkpoint().is_ok());
    }
}
