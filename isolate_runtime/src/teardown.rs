//! Escalating teardown of a domain.
//!
//! After the stop marker is offered, teardown runs passes until the domain
//! owns no live threads and no registry entries. Each pass interrupts and
//! asks every surviving thread to stop; once `doom_after_retries` passes
//! have gone by, survivors are doomed and unwind at their next
//! interaction with the domain. Registries are revoked on every pass.
//! Threads that outlast `teardown_retry_limit` passes are abandoned and
//! the report says so.

use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use isolate_core::error::{LifecycleError, Result, TeardownIncomplete};
use isolate_core::types::DomainState;

use crate::isolate::Isolate;
use crate::worker::WorkUnit;

/// Outcome of [`Isolate::stop`].
#[derive(Clone, Debug, Serialize)]
pub struct TeardownReport {
    /// Domain name.
    pub domain: String,

    /// Passes performed.
    pub retries: u32,

    /// Threads that had to be doomed.
    pub doomed: Vec<String>,

    /// Registry entries revoked, as `registry: entry`.
    pub revoked: Vec<String>,

    /// Threads abandoned alive.
    pub remaining: Vec<String>,

    /// When teardown started.
    pub started_at: DateTime<Utc>,

    /// How long teardown took.
    pub elapsed: Duration,
}

impl TeardownReport {
    fn empty(domain: String) -> Self {
        Self {
            domain,
            retries: 0,
            doomed: Vec::new(),
            revoked: Vec::new(),
            remaining: Vec::new(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }

    /// Whether every domain thread ended.
    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }

    /// The report, or `TeardownIncomplete` if threads were abandoned.
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(TeardownIncomplete {
                domain: self.domain,
                retries: self.retries,
                remaining: self.remaining,
            }
            .into())
        }
    }
}

impl Isolate {
    /// Tear the domain down.
    ///
    /// Must not be called from a thread owned by the domain itself.
    ///
    /// # Returns
    ///
    /// * `Ok(TeardownReport)` - The domain is stopped. Check
    ///   [`TeardownReport::is_complete`] or use
    ///   [`TeardownReport::into_result`] to learn whether threads had to be
    ///   abandoned.
    /// * `Err(LifecycleError::NotRunning)` - If the domain is already
    ///   stopping or stopped.
    pub fn stop(&self) -> Result<TeardownReport> {
        let domain = self.domain();
        let name = domain.name();

        let queue = {
            let mut lifecycle = domain.lifecycle.lock();
            match lifecycle.state {
                DomainState::Running => {}
                DomainState::Created => {
                    lifecycle.state = DomainState::Stopped;
                    drop(lifecycle);
                    self.release();
                    info!(domain = %name, "Domain stopped before it was started");
                    return Ok(TeardownReport::empty(name));
                }
                DomainState::Stopping | DomainState::Stopped => {
                    return Err(LifecycleError::NotRunning(name).into());
                }
            }
            lifecycle.state = DomainState::Stopping;
            lifecycle.queue.take()
        };

        let config = domain.config.clone();
        let started_at = Utc::now();
        let started = Instant::now();
        info!(domain = %name, "Stopping domain");
        domain.println(&format!("Stopping {}", name));

        if let Some(queue) = queue {
            match queue.send_timeout(WorkUnit::Stop, config.stop_handoff_timeout()) {
                Ok(()) => debug!(domain = %name, "Worker accepted stop marker"),
                Err(_) => debug!(domain = %name, "Worker did not take stop marker, escalating"),
            }
        }

        let mut retries = domain.lifecycle.lock().shutdown_retry;
        let mut doomed = Vec::new();
        let mut revoked = Vec::new();

        let remaining = loop {
            domain.threads.reap();
            let alive = domain.threads.alive();
            let owned: usize = domain.registries.iter().map(|r| r.owned_count(domain.id)).sum();
            if alive.is_empty() && owned == 0 {
                break Vec::new();
            }

            if retries >= config.teardown_retry_limit {
                let abandoned = domain.threads.abandon();
                warn!(domain = %name, retries, threads = ?abandoned, "Clean up failed, abandoning threads");
                domain.println(&format!("Clean up failed after {} retries", retries));
                break abandoned;
            }

            retries += 1;
            for thread in &alive {
                thread.interrupt();
                thread.request_stop();
                if retries > config.doom_after_retries && !thread.is_doomed() {
                    warn!(domain = %name, thread = %thread.name(), "Dooming domain thread");
                    thread.doom();
                    doomed.push(thread.name());
                }
            }

            if should_dump(retries, config.doom_after_retries, config.stack_dump_every) {
                for thread in &alive {
                    let at = thread.last_checkpoint().unwrap_or_else(|| "<no checkpoint>".to_string());
                    domain.println(&format!("Thread \"{}\" is still alive, last seen at {}", thread.name(), at));
                }
            }

            for registry in &domain.registries {
                for entry in registry.revoke_owned(domain.id) {
                    domain.println(&format!("Removing {}: {}", registry.name(), entry));
                    revoked.push(format!("{}: {}", registry.name(), entry));
                }
            }

            thread::sleep(config.teardown_pause());
        };

        self.release();
        {
            let mut lifecycle = domain.lifecycle.lock();
            lifecycle.state = DomainState::Stopped;
            lifecycle.worker = None;
            lifecycle.shutdown_retry = retries;
        }

        let report = TeardownReport {
            domain: name.clone(),
            retries,
            doomed,
            revoked,
            remaining,
            started_at,
            elapsed: started.elapsed(),
        };
        if report.is_complete() {
            info!(domain = %name, retries, elapsed_ms = report.elapsed.as_millis() as u64, "Domain stopped");
            domain.println("Stopped");
        } else {
            warn!(domain = %name, remaining = ?report.remaining, "Domain stopped with threads left behind");
        }
        Ok(report)
    }

    /// Drop everything the domain holds.
    fn release(&self) {
        let domain = self.domain();
        domain.exports.clear();
        domain.loader.release();
        domain.properties.close();
    }
}

/// Whether to report stuck threads on pass `retry`.
fn should_dump(retry: u32, doom_after: u32, every: u32) -> bool {
    every != 0 && retry > doom_after && retry % every == every / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_dump_schedule() {
        let dumps: Vec<u32> = (1..=60).filter(|r| should_dump(*r, 24, 10)).collect();
        assert_eq!(dumps, vec![25, 35, 45, 55]);
        assert!(!should_dump(5, 0, 0));
    }

    #[test]
    fn test_report_into_result() {
        let mut report = TeardownReport::empty("alpha".to_string());
        assert!(report.clone().into_result().is_ok());

        report.remaining.push("isolate-alpha".to_string());
        report.retries = 11;
        let err = report.into_result().unwrap_err();
        assert!(matches!(err, isolate_core::Error::TeardownIncomplete(_)));
    }
}
