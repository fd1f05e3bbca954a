//! Weaving domain failures into host-side stacks.
//!
//! The record raised inside the domain is kept as is. On top of its own
//! frames the woven stack carries an inner marker, the
//! `<domain-boundary>` frame naming the domain, and the host frames of the
//! call that crossed the boundary.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::Location;

use isolate_core::error::{BoundaryFailure, BoundarySite, BOUNDARY_OWNER};
use isolate_core::types::{FailureRecord, Frame};

/// Marker owner for failures raised by submitted work.
pub const EXEC_MARKER: &str = "isolate_runtime::Isolate";

/// Owner of the frame recording the host call site.
pub const HOST_CALLER: &str = "<host>";

/// Weave `cause` into a [`BoundaryFailure`].
///
/// # Arguments
///
/// * `cause` - The failure as raised inside the domain.
/// * `site` - Where it crossed: submitted work or a proxied call.
/// * `domain` - Name of the domain.
/// * `caller` - Host location of the call that crossed the boundary.
/// * `capture_backtrace` - Whether to append a host backtrace.
pub fn weave(
    cause: FailureRecord,
    site: BoundarySite,
    domain: &str,
    caller: &'static Location<'static>,
    capture_backtrace: bool,
) -> BoundaryFailure {
    let mut frames = cause.frames.clone();

    let marker = match &site {
        BoundarySite::Exec => EXEC_MARKER.to_string(),
        BoundarySite::Proxy { target } => target.clone(),
    };
    frames.push(Frame::new(marker, ""));
    frames.push(Frame::new(BOUNDARY_OWNER, site.label()).with_file(domain));
    frames.push(Frame::from_location(HOST_CALLER, caller));

    if capture_backtrace {
        frames.extend(host_backtrace());
    }

    BoundaryFailure::new(domain, site, cause, frames)
}

/// Record a panic payload as a failure.
pub fn panic_record(payload: &(dyn std::any::Any + Send)) -> FailureRecord {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    FailureRecord::new("panic", message)
}

fn host_backtrace() -> Vec<Frame> {
    let backtrace = Backtrace::force_capture();
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    backtrace
        .to_string()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("at "))
        .map(|line| {
            let symbol = line.split_once(": ").map_or(line, |(_, symbol)| symbol);
            Frame::new(symbol, "")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn here() -> &'static Location<'static> {
        Location::caller()
    }

    #[test]
    fn test_exec_weave_layout() {
        let mut cause = FailureRecord::new("app::Boom", "boom");
        cause.frames.push(Frame::new("app::Job", "run"));

        let failure = weave(cause.clone(), BoundarySite::Exec, "alpha", here(), false);
        let frames = failure.frames();

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], Frame::new("app::Job", "run"));
        assert_eq!(frames[1].owner, EXEC_MARKER);
        assert_eq!(frames[2], Frame::new(BOUNDARY_OWNER, "<exec>").with_file("alpha"));
        assert_eq!(frames[3].owner, HOST_CALLER);
        assert!(frames[3].file.as_deref().unwrap_or_default().ends_with("weaver.rs"));
        assert_eq!(failure.cause(), &cause);
    }

    #[test]
    fn test_proxy_weave_uses_target_marker() {
        let failure = weave(
            FailureRecord::new("app::Boom", "boom"),
            BoundarySite::Proxy {
                target: "app::Counter".to_string(),
            },
            "beta",
            here(),
            false,
        );
        assert_eq!(failure.frames()[0].owner, "app::Counter");
        assert_eq!(failure.boundary_frame().map(|f| f.function.as_str()), Some("<proxy>"));
    }

    #[test]
    fn test_panic_record() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bad state"));
        let record = panic_record(payload.as_ref());
        assert_eq!(record.type_name, "panic");
        assert_eq!(record.message, "bad state");
    }
}
