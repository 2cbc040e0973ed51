//! The allocate → verify → lock loop and its terminal parked state.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::backend::DeviceMemory;
use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::reclaim::{EXHAUSTED_STATUS, Exhaustion, reclaim_on_exhaustion};
use crate::registry::Registry;
use crate::report::Report;
use crate::screen::Screen;
use crate::slice::{Outcome, SliceState};
use crate::verify::{ScratchBuffers, Verdict, verify_slice};

/// How long the parked process sleeps between wake-ups.
pub const PARK_INTERVAL: Duration = Duration::from_secs(60 * 60);

const PARKED_NOTE: &str = "Sleeping forever holding only faulty VRAM allocations.";

/// Where the session loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    FinalizedParked,
}

/// A running validation session over one device.
pub struct Session<B: DeviceMemory> {
    backend: B,
    registry: Registry<B::Handle>,
    scratch: ScratchBuffers,
    device_index: u32,
    slice_mib: u32,
    columns: usize,
    started: Instant,
    last_status: String,
    last_verdict: Option<Verdict>,
    exhaustion: Option<Exhaustion>,
}

impl<B: DeviceMemory> Session<B> {
    /// Start a session on an initialised backend.
    ///
    /// Both scratch buffers are allocated here, once, at full slice size.
    pub fn new(backend: B, config: &LockConfig) -> Self {
        let slice_bytes = config.slice_bytes();
        info!(
            device_index = config.device_index,
            device = backend.device_name(),
            slice_mib = config.slice_mib,
            "starting session"
        );
        Self {
            backend,
            registry: Registry::new(slice_bytes),
            scratch: ScratchBuffers::new(slice_bytes),
            device_index: config.device_index,
            slice_mib: config.slice_mib,
            columns: config.map_columns,
            started: Instant::now(),
            last_status: "Starting...".to_string(),
            last_verdict: None,
            exhaustion: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.registry.is_finalized() { SessionState::FinalizedParked } else { SessionState::Running }
    }

    pub fn registry(&self) -> &Registry<B::Handle> {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn last_status(&self) -> &str {
        &self.last_status
    }

    /// Capture the current state for display.
    pub fn report(&self) -> Report {
        let map: Vec<SliceState> = self.registry.iter().map(|s| s.state()).collect();
        let in_progress = map.iter().filter(|&&s| s == SliceState::InProgress).count();
        Report {
            device_index: self.device_index,
            device_name: self.backend.device_name().to_string(),
            slice_mib: self.slice_mib,
            slice_bytes: self.registry.slice_bytes(),
            held: self.registry.held_count(),
            verified: self.registry.verified_count(),
            faulty: self.registry.faulty_count(),
            next_index: map.len() - in_progress,
            map,
            elapsed: self.started.elapsed(),
            last_status: self.last_status.clone(),
            last_verdict: self.last_verdict,
            finalized: self.registry.is_finalized(),
            columns: self.columns,
        }
    }

    /// Perform exactly one transition.
    ///
    /// `Running → Running` when a slice was allocated and verified,
    /// `Running → FinalizedParked` when allocation failed and the reclaimer ran.
    pub fn step(&mut self, screen: &mut impl Screen) -> Result<SessionState> {
        if self.registry.is_finalized() {
            return Err(LockError::invariant("step() on a finalized session"));
        }
        screen.draw(&self.report())?;

        let index = match self.registry.allocate_slice(&mut self.backend)? {
            Ok(index) => index,
            Err(fault) => {
                self.last_status = EXHAUSTED_STATUS.to_string();
                self.last_verdict = None;
                let exhaustion =
                    reclaim_on_exhaustion(&mut self.registry, &mut self.backend, fault)?;
                info!(
                    released = exhaustion.released,
                    kept = exhaustion.kept,
                    "exhaustion reached"
                );
                self.exhaustion = Some(exhaustion);
                screen.draw(&self.report())?;
                return Ok(SessionState::FinalizedParked);
            }
        };

        self.last_status = "Allocated slice; filling pattern...".to_string();
        self.last_verdict = None;
        screen.draw(&self.report())?;

        let handle = self.registry.handle(index)?;
        let verdict =
            verify_slice(&mut self.backend, handle, &mut self.scratch, self.registry.slice_bytes())?;
        self.registry.mark(index, verdict.outcome)?;
        self.last_verdict = Some(verdict);
        match verdict.outcome {
            Outcome::Verified => {
                self.last_status = "OK".to_string();
                info!(index, "slice verified");
            }
            Outcome::Faulty => {
                self.last_status =
                    "MISMATCH detected: locking faulty chunk and continuing...".to_string();
                warn!(index, differing_bytes = verdict.differing_bytes, "faulty slice locked");
            }
        }
        screen.draw(&self.report())?;
        Ok(SessionState::Running)
    }

    /// Step until the device is exhausted.
    pub fn run(mut self, screen: &mut impl Screen) -> Result<ParkedSession<B>> {
        while self.step(screen)? == SessionState::Running {}

        let exhaustion = self
            .exhaustion
            .take()
            .ok_or_else(|| LockError::invariant("session finalized without an exhaustion record"))?;
        screen.note("")?;
        screen.note(&exhaustion.to_string())?;
        Ok(ParkedSession { backend: self.backend, registry: self.registry, exhaustion })
    }
}

/// Terminal state: the registry is finalized and only faulty slices are held.
///
/// Dropping this value would hand the faulty memory back to the driver;
/// [`ParkedSession::park`] keeps it alive until the process is killed.
pub struct ParkedSession<B: DeviceMemory> {
    backend: B,
    registry: Registry<B::Handle>,
    exhaustion: Exhaustion,
}

impl<B: DeviceMemory> ParkedSession<B> {
    fn announce(&self, screen: &mut impl Screen) {
        // The faulty slices stay held whether or not the note reaches the screen.
        if let Err(e) = screen.note(PARKED_NOTE) {
            warn!(error = %e, "failed to write parked note");
        }
        info!(held = self.registry.held_count(), "parked");
    }

    pub fn registry(&self) -> &Registry<B::Handle> {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn exhaustion(&self) -> &Exhaustion {
        &self.exhaustion
    }

    /// Idle forever, holding the faulty allocations.
    pub fn park(self, screen: &mut impl Screen) -> ! {
        self.announce(screen);
        loop {
            std::thread::sleep(PARK_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::SimulatedMemory;
    use crate::screen::RecordingScreen;

    fn config() -> LockConfig {
        LockConfig { slice_mib: 1, map_columns: 8, ..LockConfig::default() }
    }

    #[test]
    fn step_draws_before_and_after() {
        let mut session = Session::new(SimulatedMemory::unbounded(), &config());
        let mut screen = RecordingScreen::new();
        assert_eq!(session.step(&mut screen).unwrap(), SessionState::Running);
        assert_eq!(screen.frames.len(), 3);
        assert_eq!(screen.frames[1].map, vec![SliceState::InProgress]);
        assert_eq!(screen.frames[1].last_status, "Allocated slice; filling pattern...");
        assert_eq!(screen.last().unwrap().map, vec![SliceState::Verified]);
        assert_eq!(session.last_status(), "OK");
    }

    #[test]
    fn exhaustion_finalizes_and_parks() {
        let mut session = Session::new(SimulatedMemory::new(2), &config());
        let mut screen = RecordingScreen::new();
        let parked = session_run(&mut session, &mut screen);
        assert_eq!(parked, 2);
        assert_eq!(session.state(), SessionState::FinalizedParked);
        assert_eq!(session.last_status(), EXHAUSTED_STATUS);
        assert!(session.step(&mut screen).is_err());
    }

    fn session_run(session: &mut Session<SimulatedMemory>, screen: &mut RecordingScreen) -> usize {
        let mut steps = 0;
        while session.step(screen).unwrap() == SessionState::Running {
            steps += 1;
        }
        steps
    }

    #[test]
    fn run_returns_parked_session_with_exhaustion_note() {
        let session = Session::new(SimulatedMemory::new(3).with_unstable(1), &config());
        let mut screen = RecordingScreen::new();
        let parked = session.run(&mut screen).unwrap();
        assert_eq!(parked.exhaustion().at_index, 3);
        assert_eq!(parked.registry().held_count(), 1);
        assert_eq!(parked.backend().live_count(), 1);
        assert!(screen.notes.iter().any(|n| n.starts_with("Allocation failed at slice #3")));
        assert!(screen.last().unwrap().finalized);
    }

    #[test]
    fn fatal_backend_error_aborts_step() {
        let mut session = Session::new(SimulatedMemory::unbounded().with_failing_fill(0), &config());
        let mut screen = RecordingScreen::new();
        let err = session.step(&mut screen).unwrap_err();
        assert!(matches!(err, LockError::Backend(_)));
        assert_eq!(session.registry().count(SliceState::InProgress), 1);
    }

    struct BrokenScreen;

    impl Screen for BrokenScreen {
        fn draw(&mut self, _: &Report) -> std::io::Result<()> {
            Ok(())
        }

        fn note(&mut self, _: &str) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout closed"))
        }
    }

    #[test]
    fn park_note_is_written() {
        let mut screen = RecordingScreen::new();
        let parked = Session::new(SimulatedMemory::new(1), &config()).run(&mut screen).unwrap();
        parked.announce(&mut screen);
        assert_eq!(screen.notes.last().map(String::as_str), Some(PARKED_NOTE));
    }

    #[test]
    fn park_note_failure_does_not_release_slices() {
        let mut screen = RecordingScreen::new();
        let device = SimulatedMemory::new(2).with_unstable(0);
        let parked = Session::new(device, &config()).run(&mut screen).unwrap();
        parked.announce(&mut BrokenScreen);
        assert_eq!(parked.registry().held_count(), 1);
        assert_eq!(parked.backend().live_count(), 1);
    }
}
