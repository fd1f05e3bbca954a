//! The domain worker loop.

use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use isolate_core::error::TaskError;
use isolate_core::types::{FailureRecord, Frame};

use crate::context::DomainContext;
use crate::threads::ThreadDoom;
use crate::weaver::panic_record;

/// A unit of work run inside a domain.
///
/// Task values are copied into the domain before they run, so the value
/// `run` consumes is never the one the host submitted.
pub trait Task: Send + 'static {
    /// What the task produces.
    type Output: Send + 'static;

    /// Run the task on the domain worker.
    fn run(self, ctx: &DomainContext) -> Result<Self::Output, TaskError>;
}

type Job = Box<dyn FnOnce(&DomainContext) + Send>;
type DetachedJob = Box<dyn FnOnce(&DomainContext) -> Result<(), FailureRecord> + Send>;

/// What travels through a domain's work queue.
pub(crate) enum WorkUnit {
    /// Delivers its own result.
    Job(Job),

    /// Fire-and-forget; failures are only logged.
    Detached(DetachedJob),

    /// Does nothing. Its acceptance proves the previous unit finished.
    Noop,

    /// Ends the loop.
    Stop,
}

impl WorkUnit {
    fn kind(&self) -> &'static str {
        match self {
            Self::Job(_) => "job",
            Self::Detached(_) => "detached",
            Self::Noop => "noop",
            Self::Stop => "stop",
        }
    }
}

/// Run `task`, turning failures and panics into a record.
///
/// A doom unwind is passed through untouched.
pub(crate) fn execute<T: Task>(task: T, ctx: &DomainContext) -> Result<T::Output, FailureRecord> {
    let frame = Frame::new(std::any::type_name::<T>(), "run");
    match panic::catch_unwind(AssertUnwindSafe(|| task.run(ctx))) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(err.with_frame(frame).into_record()),
        Err(payload) if payload.is::<ThreadDoom>() => panic::resume_unwind(payload),
        Err(payload) => {
            let mut record = panic_record(payload.as_ref());
            record.frames.push(frame);
            Err(record)
        }
    }
}

/// Pull units from `queue` until told to stop.
pub(crate) fn run_loop(ctx: &DomainContext, queue: Receiver<WorkUnit>) {
    let domain = ctx.name();
    let poll = ctx.domain().config.result_poll();
    info!(domain = %domain, "Domain worker started");

    loop {
        let control = ctx.control();
        if control.stop_requested() || control.is_doomed() {
            debug!(domain = %domain, "Worker asked to stop");
            break;
        }

        let unit = match queue.recv_timeout(poll) {
            Ok(unit) => unit,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!(domain = %domain, "Work queue closed");
                break;
            }
        };
        debug!(domain = %domain, unit = unit.kind(), "Worker accepted unit");

        let outcome = match unit {
            WorkUnit::Stop => break,
            WorkUnit::Noop => continue,
            WorkUnit::Job(job) => panic::catch_unwind(AssertUnwindSafe(|| {
                job(ctx);
                Ok::<(), FailureRecord>(())
            })),
            WorkUnit::Detached(job) => panic::catch_unwind(AssertUnwindSafe(|| job(ctx))),
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(record)) => report_failure(ctx, &record),
            Err(payload) if payload.is::<ThreadDoom>() => {
                warn!(domain = %domain, "Worker doomed during teardown");
                break;
            }
            Err(payload) => report_failure(ctx, &panic_record(payload.as_ref())),
        }
    }

    info!(domain = %domain, "Domain worker finished");
}

fn report_failure(ctx: &DomainContext, record: &FailureRecord) {
    let domain = ctx.domain();
    error!(domain = %domain.name(), failure = %record, "Unit of work failed");
    domain.println(&format!("Exception in domain [{}]: {}", domain.name(), record));
    for frame in &record.frames {
        domain.println(&format!("    {}", frame));
    }
}
