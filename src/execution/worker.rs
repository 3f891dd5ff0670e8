//! Message-driven host protocol.
//!
//! A [`WorkerHandle`] owns two threads. The dispatcher thread receives every [`Request`] and
//! applies pause, resume and cancel to the shared [`RunControl`] right away, so they take effect
//! at the next record boundary even while a run is busy. `START` and `CONTINUE` are queued to the
//! pipeline thread, which runs the [`ConversionEngine`] and streams its events back.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use doc_tabulate::execution::{ConversionEvent, ConversionWorker, Request};
//! use doc_tabulate::ingestion::BytesSource;
//!
//! let worker = ConversionWorker::spawn().unwrap();
//! worker.send(Request::Warmup).unwrap();
//! assert_eq!(worker.recv_timeout(Duration::from_secs(5)), Some(ConversionEvent::Ready));
//!
//! let source = Arc::new(BytesSource::new("mem", b"{\"a\":1}".to_vec()));
//! worker.send(Request::start(source, Default::default())).unwrap();
//! loop {
//!     match worker.recv_timeout(Duration::from_secs(5)) {
//!         Some(ConversionEvent::Done(summary)) => {
//!             assert_eq!(summary.stats.rows_written, 1);
//!             break;
//!         }
//!         Some(ConversionEvent::Failed { error }) => panic!("{error}"),
//!         Some(_) => {}
//!         None => panic!("worker went quiet"),
//!     }
//! }
//! worker.shutdown();
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{ConversionError, ConversionResult, Severity};
use crate::ingestion::InputSource;
use crate::options::ConversionOptions;

use super::{ConversionEngine, ConversionEvent, EventSink, LogEntry, PendingRun, Phase, RunControl, RunOutcome};

/// Messages a host sends to the worker.
pub enum Request {
    Start {
        source: Arc<dyn InputSource>,
        options: Box<ConversionOptions>,
    },
    /// Begin conversion of a run parked in `awaiting-schema`.
    Continue,
    Pause,
    Resume,
    Cancel,
    /// Readiness probe, answered with [`ConversionEvent::Ready`].
    Warmup,
}

impl Request {
    pub fn start(source: Arc<dyn InputSource>, options: ConversionOptions) -> Self {
        Request::Start {
            source,
            options: Box::new(options),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Start { source, .. } => f.debug_struct("Start").field("source", &source.name()).finish(),
            Request::Continue => f.write_str("Continue"),
            Request::Pause => f.write_str("Pause"),
            Request::Resume => f.write_str("Resume"),
            Request::Cancel => f.write_str("Cancel"),
            Request::Warmup => f.write_str("Warmup"),
        }
    }
}

/// Messages the worker sends back.
pub type Response = ConversionEvent;

enum Job {
    Start(Arc<dyn InputSource>, Box<ConversionOptions>),
    Continue,
    /// Drop a parked run that was cancelled while awaiting schema.
    Discard,
}

/// Forwards events into the response channel. A host that hung up just stops listening.
struct ChannelSink(Sender<Response>);

impl EventSink for ChannelSink {
    fn on_event(&self, event: ConversionEvent) {
        let _ = self.0.send(event);
    }
}

impl ChannelSink {
    fn warn(&self, message: String) {
        tracing::warn!("{message}");
        self.on_event(ConversionEvent::Log(LogEntry {
            level: Severity::Warning,
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }));
    }
}

/// Spawns conversion workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionWorker;

impl ConversionWorker {
    /// Start the dispatcher and pipeline threads.
    pub fn spawn() -> ConversionResult<WorkerHandle> {
        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (response_tx, response_rx) = mpsc::channel::<Response>();
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let control = Arc::new(RunControl::new());
        let busy = Arc::new(AtomicBool::new(false));

        let pipeline = {
            let engine = ConversionEngine::with_control(Arc::clone(&control));
            let busy = Arc::clone(&busy);
            let sink = ChannelSink(response_tx.clone());
            thread::Builder::new()
                .name("doc-tabulate-pipeline".to_string())
                .spawn(move || run_pipeline(job_rx, engine, busy, sink))?
        };
        let dispatcher = {
            let control = Arc::clone(&control);
            let sink = ChannelSink(response_tx);
            thread::Builder::new()
                .name("doc-tabulate-dispatch".to_string())
                .spawn(move || dispatch(request_rx, job_tx, control, busy, sink))?
        };

        Ok(WorkerHandle {
            requests: Some(request_tx),
            responses: response_rx,
            control,
            threads: vec![dispatcher, pipeline],
        })
    }
}

/// Host side of a running worker. Dropping it cancels any run in flight and joins the threads.
pub struct WorkerHandle {
    requests: Option<Sender<Request>>,
    responses: Receiver<Response>,
    control: Arc<RunControl>,
    threads: Vec<JoinHandle<()>>,
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("phase", &self.control.phase())
            .finish()
    }
}

impl WorkerHandle {
    pub fn send(&self, request: Request) -> ConversionResult<()> {
        self.requests
            .as_ref()
            .ok_or_else(|| ConversionError::internal("worker is shut down"))?
            .send(request)
            .map_err(|_| ConversionError::internal("worker dispatcher has exited"))
    }

    /// Block for the next event; `None` once the worker has exited.
    pub fn recv(&self) -> Option<Response> {
        self.responses.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Response> {
        match self.responses.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Events already queued, without blocking.
    pub fn drain(&self) -> Vec<Response> {
        self.responses.try_iter().collect()
    }

    /// Phase of the current (or last) run.
    pub fn phase(&self) -> Phase {
        self.control.phase()
    }

    /// Cancel whatever is running and wait for both threads to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the request channel makes the dispatcher cancel and close the job queue.
        self.requests = None;
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("conversion worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch(
    requests: Receiver<Request>,
    jobs: Sender<Job>,
    control: Arc<RunControl>,
    busy: Arc<AtomicBool>,
    sink: ChannelSink,
) {
    for request in requests {
        tracing::debug!(?request, "worker request");
        match request {
            Request::Warmup => sink.on_event(ConversionEvent::Ready),
            Request::Pause => match control.request_pause() {
                Ok(phase) => sink.on_event(ConversionEvent::Phase(phase)),
                Err(err) => sink.warn(format!("pause ignored: {err}")),
            },
            Request::Resume => match control.request_resume() {
                Ok(phase) => sink.on_event(ConversionEvent::Phase(phase)),
                Err(err) => sink.warn(format!("resume ignored: {err}")),
            },
            Request::Cancel => match control.request_cancel() {
                Ok(Phase::Cancelled) => {
                    sink.on_event(ConversionEvent::Phase(Phase::Cancelled));
                    let _ = jobs.send(Job::Discard);
                }
                // The record loop acknowledges at its next checkpoint.
                Ok(_) => {}
                Err(err) => sink.warn(format!("cancel ignored: {err}")),
            },
            Request::Start { source, options } => {
                // A run that already reported its terminal phase may still be unwinding.
                if busy.swap(true, Ordering::SeqCst) && !control.phase().is_terminal() {
                    sink.warn(format!(
                        "start of '{}' ignored: a conversion is already in progress",
                        source.name()
                    ));
                    continue;
                }
                if control.begin() {
                    sink.on_event(ConversionEvent::Phase(Phase::Discovery));
                }
                if jobs.send(Job::Start(source, options)).is_err() {
                    break;
                }
            }
            Request::Continue => {
                let phase = control.phase();
                if phase != Phase::AwaitingSchema {
                    sink.warn(format!("continue ignored in phase {phase}"));
                    continue;
                }
                if jobs.send(Job::Continue).is_err() {
                    break;
                }
            }
        }
    }
    let _ = control.request_cancel();
}

fn run_pipeline(jobs: Receiver<Job>, engine: ConversionEngine, busy: Arc<AtomicBool>, sink: ChannelSink) {
    let mut parked: Option<PendingRun> = None;
    for job in jobs {
        let outcome = match job {
            Job::Start(source, options) => {
                parked = None;
                engine.start(source, *options, &sink)
            }
            Job::Continue => match parked.take() {
                Some(run) => engine.continue_run(run, &sink),
                None => continue,
            },
            Job::Discard => {
                if parked.take().is_some() {
                    busy.store(false, Ordering::SeqCst);
                }
                continue;
            }
        };
        match outcome {
            RunOutcome::AwaitingSchema(run) => parked = Some(run),
            RunOutcome::Completed(_) | RunOutcome::Cancelled | RunOutcome::Failed(_) => {
                busy.store(false, Ordering::SeqCst)
            }
        }
    }
}
