//! Runs one scenario on an external simulator. The session is always closed again, and failures
//! while stepping are contained in the returned [`RunOutcome`] instead of aborting the caller.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use tracing::{debug, warn};

pub mod traci;

/// Command line adjustments applied when starting a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimOverrides {
    /// Multiplier applied by the simulator to all demand.
    pub scale: Option<f64>,
}

#[derive(thiserror::Error, Debug)]
pub enum SimulationError {
    #[error("could not start simulator {binary:?}: {source}")]
    Spawn {
        binary: PathBuf,
        source: std::io::Error,
    },
    #[error("simulator did not accept a connection on port {port}: {source}")]
    Connect { port: u16, source: std::io::Error },
    #[error("simulator exited unexpectedly with {0}")]
    Exited(ExitStatus),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("command {command:#04x} failed with status {status:#04x}: {message}")]
    Command {
        command: u8,
        status: u8,
        message: String,
    },
    #[error("malformed simulator response: {0}")]
    Protocol(String),
}

pub trait SimulationBackend {
    type Session: SimulationSession;

    fn start(&self, config: &Path, overrides: &SimOverrides)
        -> Result<Self::Session, SimulationError>;
}

/// One running simulation. Only one session may be open at a time.
pub trait SimulationSession {
    fn step(&mut self) -> Result<(), SimulationError>;

    /// Ends the simulation. Calling it again after it succeeded has no effect.
    fn close(&mut self) -> Result<(), SimulationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub steps_completed: u64,
    /// Set if stepping or closing failed. Output written up to that point is still usable.
    pub failure: Option<String>,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Closes the wrapped session when dropped, so that a panicking step does not leak it.
struct SessionGuard<S: SimulationSession> {
    session: S,
    closed: bool,
}

impl<S: SimulationSession> SessionGuard<S> {
    fn close(&mut self) -> Result<(), SimulationError> {
        self.closed = true;
        self.session.close()
    }
}

impl<S: SimulationSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.session.close() {
                warn!("Failed to close simulation session: {e}");
            }
        }
    }
}

/// Starts a session for `config`, advances it `steps` times and closes it. Only a failing start
/// is returned as an error.
pub fn run<B: SimulationBackend>(
    backend: &B,
    config: &Path,
    overrides: &SimOverrides,
    steps: u64,
) -> Result<RunOutcome, SimulationError> {
    debug!("Starting simulation of {config:?} with {overrides:?} for {steps} steps");
    let mut guard = SessionGuard {
        session: backend.start(config, overrides)?,
        closed: false,
    };

    let mut outcome = RunOutcome {
        steps_completed: 0,
        failure: None,
    };
    while outcome.steps_completed < steps {
        if let Err(e) = guard.session.step() {
            warn!(
                "Simulation of {config:?} failed after {} steps: {e}",
                outcome.steps_completed
            );
            outcome.failure = Some(e.to_string());
            break;
        }
        outcome.steps_completed += 1;
    }

    if let Err(e) = guard.close() {
        warn!("Failed to close simulation of {config:?}: {e}");
        if outcome.failure.is_none() {
            outcome.failure = Some(e.to_string());
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::path::Path;
    use std::rc::Rc;

    use super::{run, SimOverrides, SimulationBackend, SimulationError, SimulationSession};

    #[derive(Default)]
    struct Log {
        steps: u64,
        closed: u32,
    }

    struct FakeBackend {
        fail_start: bool,
        fail_at: Option<u64>,
        panic_at: Option<u64>,
        log: Rc<RefCell<Log>>,
    }

    impl FakeBackend {
        fn new() -> Self {
            FakeBackend {
                fail_start: false,
                fail_at: None,
                panic_at: None,
                log: Rc::new(RefCell::new(Log::default())),
            }
        }
    }

    struct FakeSession {
        fail_at: Option<u64>,
        panic_at: Option<u64>,
        log: Rc<RefCell<Log>>,
    }

    impl SimulationBackend for FakeBackend {
        type Session = FakeSession;

        fn start(&self, _: &Path, _: &SimOverrides) -> Result<FakeSession, SimulationError> {
            if self.fail_start {
                return Err(SimulationError::Protocol("refused".to_string()));
            }
            Ok(FakeSession {
                fail_at: self.fail_at,
                panic_at: self.panic_at,
                log: self.log.clone(),
            })
        }
    }

    impl SimulationSession for FakeSession {
        fn step(&mut self) -> Result<(), SimulationError> {
            let step = self.log.borrow().steps;
            if Some(step) == self.panic_at {
                panic!("simulator crashed");
            }
            if Some(step) == self.fail_at {
                return Err(SimulationError::Command {
                    command: 0x02,
                    status: 0xff,
                    message: "teleport storm".to_string(),
                });
            }
            self.log.borrow_mut().steps += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<(), SimulationError> {
            self.log.borrow_mut().closed += 1;
            Ok(())
        }
    }

    #[test]
    fn runs_all_steps_and_closes() {
        let backend = FakeBackend::new();
        let outcome = run(&backend, Path::new("s.sumocfg"), &SimOverrides::default(), 50).unwrap();

        assert_eq!(50, outcome.steps_completed);
        assert!(outcome.is_complete());
        assert_eq!(50, backend.log.borrow().steps);
        assert_eq!(1, backend.log.borrow().closed);
    }

    #[test]
    fn step_failure_is_contained() {
        let mut backend = FakeBackend::new();
        backend.fail_at = Some(3);
        let outcome = run(&backend, Path::new("s.sumocfg"), &SimOverrides::default(), 10).unwrap();

        assert_eq!(3, outcome.steps_completed);
        assert!(outcome.failure.unwrap().contains("teleport storm"));
        assert_eq!(1, backend.log.borrow().closed);
    }

    #[test]
    fn start_failure_is_returned() {
        let mut backend = FakeBackend::new();
        backend.fail_start = true;
        let result = run(&backend, Path::new("s.sumocfg"), &SimOverrides::default(), 10);

        assert!(matches!(result, Err(SimulationError::Protocol(_))));
        assert_eq!(0, backend.log.borrow().closed);
    }

    #[test]
    fn panicking_step_still_closes() {
        let mut backend = FakeBackend::new();
        backend.panic_at = Some(2);

        let result = catch_unwind(AssertUnwindSafe(|| {
            run(&backend, Path::new("s.sumocfg"), &SimOverrides::default(), 10)
        }));

        assert!(result.is_err());
        assert_eq!(1, backend.log.borrow().closed);
    }
}
