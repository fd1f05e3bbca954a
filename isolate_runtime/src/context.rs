//! The view of a domain from code running inside it.

use std::cell::RefCell;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use isolate_core::error::Result;
use isolate_core::id::{DomainId, HookId};
use isolate_core::types::Code;

use crate::domain::Domain;
use crate::isolate::Isolate;
use crate::marshal::Marshaler;
use crate::namespace::NamespaceLoader;
use crate::threads::{check_doom, ThreadControl};

thread_local! {
    static CURRENT: RefCell<Option<DomainContext>> = const { RefCell::new(None) };
}

/// Install `ctx` as the current thread's domain until the guard drops.
pub(crate) fn install(ctx: DomainContext) -> InstallGuard {
    CURRENT.with(|current| *current.borrow_mut() = Some(ctx));
    InstallGuard(())
}

pub(crate) struct InstallGuard(());

impl Drop for InstallGuard {
    fn drop(&mut self) {
        let _ = CURRENT.try_with(|current| current.borrow_mut().take());
    }
}

/// A domain-owned thread was asked to stop what it is doing.
#[derive(Debug, Clone, Error)]
#[error("Thread [{thread}] in domain [{domain}] was interrupted")]
pub struct Interrupted {
    /// Domain name.
    pub domain: String,

    /// Thread name.
    pub thread: String,
}

/// Handle given to code running on a domain-owned thread.
///
/// Every interaction first checks whether the thread has been doomed by
/// teardown and, if so, unwinds it.
#[derive(Clone)]
pub struct DomainContext {
    domain: Arc<Domain>,
    control: Arc<ThreadControl>,
}

impl DomainContext {
    pub(crate) fn new(domain: Arc<Domain>, control: Arc<ThreadControl>) -> Self {
        Self { domain, control }
    }

    /// The context of the current thread, if it is owned by a domain.
    pub fn current() -> Option<DomainContext> {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub(crate) fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub(crate) fn control(&self) -> &Arc<ThreadControl> {
        &self.control
    }

    /// Name of the domain.
    pub fn name(&self) -> String {
        self.domain.name()
    }

    pub fn id(&self) -> DomainId {
        self.domain.id
    }

    /// Logical name of the current thread.
    pub fn thread_name(&self) -> String {
        self.control.name()
    }

    /// Supervisor handle of the domain.
    pub fn isolate(&self) -> Isolate {
        Isolate::from_domain(self.domain.clone())
    }

    /// Read a domain property.
    pub fn property(&self, key: &str) -> Option<String> {
        check_doom(&self.control);
        self.domain.properties.get(key)
    }

    /// Write a domain property.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        check_doom(&self.control);
        self.domain.properties.set(key, value);
    }

    /// Write a line to the domain's output.
    pub fn println(&self, line: impl AsRef<str>) {
        check_doom(&self.control);
        for line in line.as_ref().lines() {
            self.domain.println(line);
        }
    }

    /// A writer whose complete lines go to the domain's output.
    pub fn stdout(&self) -> DomainWriter {
        DomainWriter {
            ctx: self.clone(),
            pending: Vec::new(),
        }
    }

    /// Resolve a name in the domain namespace.
    pub fn resolve(&self, name: &str) -> Result<Arc<Code>> {
        check_doom(&self.control);
        self.domain.loader.resolve(name)
    }

    pub fn loader(&self) -> &Arc<NamespaceLoader> {
        &self.domain.loader
    }

    pub fn marshaler(&self) -> &Marshaler {
        &self.domain.marshaler
    }

    /// Mark progress and observe interruption.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Keep going.
    /// * `Err(Interrupted)` - The thread was interrupted or asked to stop.
    pub fn checkpoint(&self, label: &str) -> std::result::Result<(), Interrupted> {
        check_doom(&self.control);
        self.control.record_checkpoint(label);
        if self.control.take_interrupt() || self.control.stop_requested() {
            return Err(self.interrupted());
        }
        Ok(())
    }

    /// Whether an interruption is pending. Does not clear it.
    pub fn is_interrupted(&self) -> bool {
        self.control.is_interrupted()
    }

    /// Whether teardown asked this thread to stop.
    pub fn stop_requested(&self) -> bool {
        self.control.stop_requested()
    }

    /// Sleep for `duration` unless interrupted first.
    pub fn sleep(&self, duration: Duration) -> std::result::Result<(), Interrupted> {
        let deadline = Instant::now() + duration;
        loop {
            check_doom(&self.control);
            if self.control.take_interrupt() || self.control.stop_requested() {
                return Err(self.interrupted());
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::park_timeout(deadline - now);
        }
    }

    /// Spawn another thread owned by this domain.
    pub fn spawn<F>(&self, name: impl Into<String>, body: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(&DomainContext) + Send + 'static,
    {
        check_doom(&self.control);
        let (_, handle) = self.domain.threads.spawn(&self.domain, name.into(), body)?;
        Ok(handle)
    }

    /// Register a process-wide shutdown hook owned by this domain.
    ///
    /// Teardown revokes it; it only runs if the host runs its hooks while
    /// the domain is alive.
    pub fn add_shutdown_hook<F>(&self, name: impl Into<String>, action: F) -> HookId
    where
        F: FnOnce() + Send + 'static,
    {
        check_doom(&self.control);
        self.domain.hooks.register(name, Some(self.domain.id), action)
    }

    fn interrupted(&self) -> Interrupted {
        Interrupted {
            domain: self.domain.name(),
            thread: self.control.name(),
        }
    }
}

/// Line-buffered writer into the domain's output.
///
/// Complete lines are forwarded as they are written; a trailing partial
/// line is forwarded when the writer is dropped.
pub struct DomainWriter {
    ctx: DomainContext,
    pending: Vec<u8>,
}

impl DomainWriter {
    fn emit(&self, bytes: &[u8]) {
        let line = String::from_utf8_lossy(bytes);
        self.ctx.domain.println(line.trim_end_matches('\r'));
    }
}

impl io::Write for DomainWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        check_doom(&self.ctx.control);
        self.pending.extend_from_slice(buf);
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            self.emit(&line[..end]);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for DomainWriter {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.emit(&pending);
        }
    }
}
