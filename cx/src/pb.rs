//! Run progress bars
//!
//! One main bar tracks jurisdictions processed; short-lived sub-bars
//! track per-document feature extraction. The bar group is a process-wide
//! scoped acquisition: the driver initializes it at run start and
//! finishes it at run end, and re-initialization inside a scope is an
//! error. All progress calls are no-ops when no run is active, so library
//! code can report progress unconditionally.

use std::sync::{Mutex, OnceLock};

use eyre::{Result, bail};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

struct RunProgress {
    group: MultiProgress,
    main: ProgressBar,
}

static PROGRESS: OnceLock<Mutex<Option<RunProgress>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<RunProgress>> {
    PROGRESS.get_or_init(Default::default)
}

fn main_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.dim} {msg} [{elapsed_precise}] {bar:40.cyan} {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn sub_style() -> ProgressStyle {
    ProgressStyle::with_template("    {msg} {bar:30.dim} {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Start the main progress bar for a run over `num_jurisdictions`.
pub fn start_main_task(num_jurisdictions: usize) -> Result<()> {
    let mut slot = slot().lock().unwrap_or_else(|e| e.into_inner());
    if slot.is_some() {
        bail!("main progress task has already been set");
    }
    let group = MultiProgress::new();
    let main = group.add(ProgressBar::new(num_jurisdictions as u64));
    main.set_style(main_style());
    let label = if num_jurisdictions == 1 {
        "Searching 1 Jurisdiction".to_string()
    } else {
        format!("Searching {num_jurisdictions} Jurisdictions")
    };
    main.set_message(label);
    *slot = Some(RunProgress { group, main });
    Ok(())
}

/// Mark one jurisdiction as complete. No-op outside a run scope.
pub fn advance_main_task() {
    let slot = slot().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(progress) = slot.as_ref() {
        progress.main.inc(1);
    }
}

/// Create a sub-bar for one jurisdiction's extraction work. Returns
/// `None` outside a run scope; callers treat the bar as optional.
pub fn jurisdiction_sub_bar(label: &str, total: usize) -> Option<ProgressBar> {
    let slot = slot().lock().unwrap_or_else(|e| e.into_inner());
    slot.as_ref().map(|progress| {
        let bar = progress.group.add(ProgressBar::new(total as u64));
        bar.set_style(sub_style());
        bar.set_message(label.to_string());
        bar
    })
}

/// Finish and tear down the run's progress bars.
pub fn finish() {
    let mut slot = slot().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(progress) = slot.take() {
        progress.main.finish();
        let _ = progress.group.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_scope_lifecycle() {
        finish(); // clean slate in case another test leaked
        start_main_task(3).expect("start");
        advance_main_task();
        let sub = jurisdiction_sub_bar("Test County", 5);
        assert!(sub.is_some());
        finish();
        // after teardown, sub-bars are unavailable and advance is a no-op
        assert!(jurisdiction_sub_bar("Test County", 5).is_none());
        advance_main_task();
    }

    #[test]
    #[serial]
    fn test_reinitialization_is_an_error() {
        finish();
        start_main_task(1).expect("start");
        assert!(start_main_task(1).is_err());
        finish();
    }
}
