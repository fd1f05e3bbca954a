//! Threads owned by a domain.
//!
//! Every thread a domain runs (its worker and anything spawned through
//! [`DomainContext::spawn`]) carries a [`ThreadControl`]. Teardown uses the
//! control blocks to interrupt, stop, doom and finally abandon threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};

use parking_lot::Mutex;
use tracing::{debug, error};

use isolate_core::error::Result;

use crate::context::{self, DomainContext};
use crate::domain::Domain;
use crate::weaver::panic_record;

/// Unwind payload used to force a doomed thread off its stack.
///
/// Raised with `resume_unwind`, so no panic message is printed. Every
/// layer that catches panics re-raises it.
#[derive(Debug)]
pub(crate) struct ThreadDoom;

/// Unwind the current thread if `control` has been doomed.
pub(crate) fn check_doom(control: &ThreadControl) {
    if control.is_doomed() {
        panic::resume_unwind(Box::new(ThreadDoom));
    }
}

/// Control block of one domain-owned thread.
#[derive(Debug)]
pub(crate) struct ThreadControl {
    /// Logical name; renamed along with the domain.
    name: Mutex<String>,

    /// Pending interruption, cleared when observed.
    interrupted: AtomicBool,

    /// Cooperative stop request; sticky.
    stop_requested: AtomicBool,

    /// Forced unwind at the next domain interaction.
    doomed: AtomicBool,

    /// Set when the thread body has returned or unwound.
    finished: AtomicBool,

    /// Handle used to unpark the thread.
    thread: OnceLock<Thread>,

    /// Label of the last checkpoint the thread passed.
    checkpoint: Mutex<Option<String>>,
}

impl ThreadControl {
    fn new(name: &str) -> Self {
        Self {
            name: Mutex::new(name.to_string()),
            interrupted: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            doomed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            thread: OnceLock::new(),
            checkpoint: Mutex::new(None),
        }
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn rename(&self, name: &str) {
        *self.name.lock() = name.to_string();
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.unpark();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Observe and clear a pending interruption.
    pub fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.unpark();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn doom(&self) {
        self.doomed.store(true, Ordering::SeqCst);
        self.unpark();
    }

    pub fn is_doomed(&self) -> bool {
        self.doomed.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn record_checkpoint(&self, label: &str) {
        *self.checkpoint.lock() = Some(label.to_string());
    }

    pub fn last_checkpoint(&self) -> Option<String> {
        self.checkpoint.lock().clone()
    }

    fn unpark(&self) {
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }
}

/// Marks the control block finished however the thread body exits.
struct FinishGuard(Arc<ThreadControl>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finished.store(true, Ordering::SeqCst);
    }
}

/// The set of threads owned by one domain.
#[derive(Debug, Default)]
pub(crate) struct ThreadGroup {
    threads: Mutex<Vec<Arc<ThreadControl>>>,
}

impl ThreadGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a thread owned by `domain`.
    ///
    /// The body runs with a [`DomainContext`] installed. Panics other than
    /// a doom unwind are reported to the domain's line sink.
    pub fn spawn<F>(&self, domain: &Arc<Domain>, name: String, body: F) -> Result<(Arc<ThreadControl>, JoinHandle<()>)>
    where
        F: FnOnce(&DomainContext) + Send + 'static,
    {
        let control = Arc::new(ThreadControl::new(&name));
        let thread_control = control.clone();
        let thread_domain = domain.clone();
        let thread_name = name.clone();

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let _finished = FinishGuard(thread_control.clone());
            let ctx = DomainContext::new(thread_domain, thread_control);
            let _installed = context::install(ctx.clone());

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| body(&ctx))) {
                if payload.is::<ThreadDoom>() {
                    debug!(thread = %thread_name, "Domain thread unwound after doom");
                } else {
                    let record = panic_record(payload.as_ref());
                    error!(domain = %ctx.name(), thread = %thread_name, failure = %record, "Uncaught panic in domain thread");
                    ctx.domain()
                        .println(&format!("Exception in thread \"{}\" {}", thread_name, record));
                }
            }
        });

        match spawned {
            Ok(handle) => {
                let _ = control.thread.set(handle.thread().clone());
                self.threads.lock().push(control.clone());
                debug!(thread = %name, "Spawned domain thread");
                Ok((control, handle))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Threads that have not finished yet.
    pub fn alive(&self) -> Vec<Arc<ThreadControl>> {
        self.threads
            .lock()
            .iter()
            .filter(|t| !t.is_finished())
            .cloned()
            .collect()
    }

    /// Forget finished threads.
    pub fn reap(&self) {
        self.threads.lock().retain(|t| !t.is_finished());
    }

    /// Give up on every remaining thread.
    ///
    /// # Returns
    ///
    /// The names of the threads left running.
    pub fn abandon(&self) -> Vec<String> {
        let mut threads = self.threads.lock();
        let names = threads.iter().filter(|t| !t.is_finished()).map(|t| t.name()).collect();
        threads.clear();
        names
    }
}
