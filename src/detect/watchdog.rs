//! Deadline enforcement for detector calls.
//!
//! `WatchdogBackend` moves the wrapped backend onto a dedicated worker
//! thread. Each `detect` ships a copy of the frame to the worker and waits for
//! the answer with a deadline. A backend error is passed through unchanged
//! (the pipeline may skip that frame); a missed deadline is reported as
//! `DetectorStalled`, which ends the run. A worker that dies (the backend
//! panicked) is reported as `DetectorLost`, which also ends the run. Both are
//! latched: every later call fails the same way.

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionParams};
use crate::frame::Frame;

/// A detector call did not finish before its deadline.
#[derive(Debug, Clone)]
pub struct DetectorStalled {
    pub backend: &'static str,
    pub deadline: Duration,
}

impl fmt::Display for DetectorStalled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "detector '{}' did not answer within {:.1}s",
            self.backend,
            self.deadline.as_secs_f64()
        )
    }
}

impl std::error::Error for DetectorStalled {}

/// The detector worker thread is gone and cannot answer any more frames.
#[derive(Debug, Clone)]
pub struct DetectorLost {
    pub backend: &'static str,
}

impl fmt::Display for DetectorLost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "detector '{}' worker terminated", self.backend)
    }
}

impl std::error::Error for DetectorLost {}

type Job = (Frame, DetectionParams);
type JobResult = Result<Vec<Detection>>;

pub struct WatchdogBackend {
    name: &'static str,
    deadline: Duration,
    jobs: Option<Sender<Job>>,
    results: Receiver<JobResult>,
    worker: Option<JoinHandle<()>>,
    stalled: bool,
    lost: bool,
}

impl WatchdogBackend {
    pub fn new<B: DetectorBackend + 'static>(mut backend: B, deadline: Duration) -> Result<Self> {
        let name = backend.name();
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (result_tx, result_rx) = mpsc::channel::<JobResult>();

        let worker = std::thread::Builder::new()
            .name(format!("detector-{}", name))
            .spawn(move || {
                while let Ok((frame, params)) = job_rx.recv() {
                    let result = backend.detect(&frame, &params);
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| anyhow!("failed to spawn detector worker: {}", e))?;

        Ok(Self {
            name,
            deadline,
            jobs: Some(job_tx),
            results: result_rx,
            worker: Some(worker),
            stalled: false,
            lost: false,
        })
    }

    fn stalled_error(&self) -> anyhow::Error {
        anyhow::Error::new(DetectorStalled {
            backend: self.name,
            deadline: self.deadline,
        })
    }

    fn lost_error(&mut self) -> anyhow::Error {
        if !self.lost {
            self.lost = true;
            log::error!("detector '{}' worker terminated", self.name);
        }
        anyhow::Error::new(DetectorLost { backend: self.name })
    }
}

impl DetectorBackend for WatchdogBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&mut self, frame: &Frame, params: &DetectionParams) -> Result<Vec<Detection>> {
        if self.stalled {
            return Err(self.stalled_error());
        }
        if self.lost {
            return Err(self.lost_error());
        }
        let sent = match self.jobs.as_ref() {
            Some(jobs) => jobs.send((frame.clone(), *params)).is_ok(),
            None => false,
        };
        if !sent {
            return Err(self.lost_error());
        }

        match self.results.recv_timeout(self.deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.stalled = true;
                log::error!(
                    "detector '{}' exceeded its {:?} deadline; abandoning worker",
                    self.name,
                    self.deadline
                );
                Err(self.stalled_error())
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.lost_error()),
        }
    }
}

impl Drop for WatchdogBackend {
    fn drop(&mut self) {
        // Closing the job channel lets an idle worker exit.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if !self.stalled {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, StubBackend};

    struct SleepyBackend {
        nap: Duration,
    }

    impl DetectorBackend for SleepyBackend {
        fn name(&self) -> &'static str {
            "sleepy"
        }

        fn detect(&mut self, _frame: &Frame, _params: &DetectionParams) -> Result<Vec<Detection>> {
            std::thread::sleep(self.nap);
            Ok(Vec::new())
        }
    }

    struct PanickingBackend;

    impl DetectorBackend for PanickingBackend {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn detect(&mut self, _frame: &Frame, _params: &DetectionParams) -> Result<Vec<Detection>> {
            panic!("model runtime crashed");
        }
    }

    #[test]
    fn passes_results_through() -> Result<()> {
        let stub = StubBackend::scripted(vec![vec![(BoundingBox::new(1, 2, 30, 40), 0.9)]]);
        let mut watchdog = WatchdogBackend::new(stub, Duration::from_secs(5))?;
        let frame = Frame::filled(64, 64, 0)?;
        let found = watchdog.detect(&frame, &DetectionParams::default())?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bbox, BoundingBox::new(1, 2, 30, 40));
        Ok(())
    }

    #[test]
    fn backend_errors_are_not_stalls() -> Result<()> {
        let stub = StubBackend::new().fail_on_call(0);
        let mut watchdog = WatchdogBackend::new(stub, Duration::from_secs(5))?;
        let frame = Frame::filled(8, 8, 0)?;
        let err = watchdog
            .detect(&frame, &DetectionParams::default())
            .expect_err("scripted failure");
        assert!(err.downcast_ref::<DetectorStalled>().is_none());
        assert!(watchdog.detect(&frame, &DetectionParams::default()).is_ok());
        Ok(())
    }

    #[test]
    fn missed_deadline_is_a_stall_and_sticks() -> Result<()> {
        let backend = SleepyBackend {
            nap: Duration::from_millis(500),
        };
        let mut watchdog = WatchdogBackend::new(backend, Duration::from_millis(50))?;
        let frame = Frame::filled(8, 8, 0)?;

        let err = watchdog
            .detect(&frame, &DetectionParams::default())
            .expect_err("deadline missed");
        assert!(err.downcast_ref::<DetectorStalled>().is_some());

        let again = watchdog
            .detect(&frame, &DetectionParams::default())
            .expect_err("still stalled");
        assert!(again.downcast_ref::<DetectorStalled>().is_some());
        Ok(())
    }

    #[test]
    fn dead_worker_is_lost_and_sticks() -> Result<()> {
        let mut watchdog = WatchdogBackend::new(PanickingBackend, Duration::from_secs(5))?;
        let frame = Frame::filled(8, 8, 0)?;

        let err = watchdog
            .detect(&frame, &DetectionParams::default())
            .expect_err("worker panicked");
        match err.downcast_ref::<DetectorLost>() {
            Some(lost) => assert_eq!(lost.backend, "panicking"),
            None => panic!("expected a lost detector, got {:#}", err),
        }
        assert!(err.downcast_ref::<DetectorStalled>().is_none());

        for _ in 0..3 {
            let again = watchdog
                .detect(&frame, &DetectionParams::default())
                .expect_err("still lost");
            assert!(again.downcast_ref::<DetectorLost>().is_some());
        }
        Ok(())
    }
}
