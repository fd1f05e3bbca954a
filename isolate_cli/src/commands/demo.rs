use std::sync::Arc;

use isolate_core::{IsolateConfig, LineSink, TaskError};
use isolate_runtime::{DomainContext, Exportable, Interface, Isolate, MethodTable, StderrSink, Task, TeardownReport};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CliError;

const TICKS: &str = "demo.ticks";

static LEDGER: Interface = Interface::new("Ledger", &["record", "total"], &[]);

/// Counts units per domain in a domain property.
#[derive(Serialize, Deserialize)]
struct Tick {
    unit: usize,
}

impl Task for Tick {
    type Output = (String, u64);

    fn run(self, ctx: &DomainContext) -> Result<Self::Output, TaskError> {
        let seen = ctx.property(TICKS).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0) + 1;
        ctx.set_property(TICKS, seen.to_string());
        ctx.println(format!("unit {} on {}", self.unit, ctx.thread_name()));
        Ok((ctx.name(), seen))
    }
}

struct Ledger {
    entries: Vec<u64>,
}

impl Exportable for Ledger {
    fn interfaces() -> Vec<&'static Interface> {
        vec![&LEDGER]
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::new()
            .method("record", |l: &mut Ledger, amount: u64| {
                l.entries.push(amount);
                Ok(l.entries.len())
            })
            .method("total", |l: &mut Ledger, _: ()| Ok(l.entries.iter().sum::<u64>()))
    }
}

#[derive(Serialize, Deserialize)]
struct OpenLedger;

impl Task for OpenLedger {
    type Output = Ledger;

    fn run(self, _ctx: &DomainContext) -> Result<Ledger, TaskError> {
        Ok(Ledger { entries: Vec::new() })
    }
}

/// Start `domains` domains, run `units` ticks and a ledger in each, then
/// stop them all.
pub fn run_demo(
    config: &IsolateConfig,
    domains: usize,
    units: usize,
    sink: Arc<dyn LineSink>,
) -> Result<Vec<TeardownReport>, CliError> {
    if domains == 0 {
        return Err(CliError::InvalidArguments("at least one domain is required".to_string()));
    }

    let mut isolates = Vec::with_capacity(domains);
    for n in 1..=domains {
        let isolate = Isolate::builder(format!("domain-{}", n))
            .config(config.clone())
            .sink(sink.clone())
            .build()?;
        isolate.start()?;
        isolates.push(isolate);
    }

    for isolate in &isolates {
        let ledger = isolate.export(OpenLedger)?;
        for unit in 1..=units {
            let (name, seen) = isolate.submit(Tick { unit })?;
            ledger.call::<u64, usize>("record", &(seen * 10))?;
            info!(domain = %name, unit, seen, "Unit finished");
        }
        let total: u64 = ledger.call("total", &())?;
        println!(
            "{}: {} unit(s), ledger total {}, {} = {}",
            isolate.name(),
            units,
            total,
            TICKS,
            isolate.property(TICKS).unwrap_or_default()
        );
    }

    let mut reports = Vec::with_capacity(isolates.len());
    for isolate in &isolates {
        reports.push(isolate.stop()?.into_result()?);
    }
    Ok(reports)
}

pub fn execute(config: &IsolateConfig, domains: usize, units: usize, json: bool) -> Result<(), CliError> {
    let reports = run_demo(config, domains, units, Arc::new(StderrSink))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!(
                "{} stopped after {} pass(es) in {:?}",
                report.domain, report.retries, report.elapsed
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolate_runtime::MemorySink;

    fn quick_config() -> IsolateConfig {
        IsolateConfig {
            handoff_poll_ms: 20,
            result_poll_ms: 20,
            stop_handoff_timeout_ms: 50,
            teardown_pause_ms: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_demo_runs_every_domain() {
        let sink = Arc::new(MemorySink::new());
        let reports = run_demo(&quick_config(), 2, 3, sink.clone()).unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.is_complete()));
        for domain in ["domain-1", "domain-2"] {
            let lines = sink.lines_for(domain);
            assert!(lines.contains(&format!("unit 3 on isolate-{}", domain)));
            assert_eq!(lines.last().map(String::as_str), Some("Stopped"));
        }
    }

    #[test]
    fn test_demo_needs_a_domain() {
        let err = run_demo(&quick_config(), 0, 1, Arc::new(MemorySink::new())).unwrap_err();
        assert!(matches!(err, CliError::InvalidArguments(_)));
    }
}
