use indicatif::{ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;
use xrfmaps::engine::progress::{Progress, ProgressCallback};

const SPINNER_TICK_MS: u64 = 80;

/// Renders engine progress events as a spinner per phase and a bar per pixel task.
#[derive(Clone)]
pub struct CliProgressHandler {
    bar: Arc<Mutex<ProgressBar>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// A handler drawing nowhere, for `--quiet` runs.
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::new(0)
            .with_style(Self::spinner_style())
            .with_message("Initializing...");
        bar.set_draw_target(target);
        bar.disable_steady_tick();
        bar.finish_and_clear();

        Self {
            bar: Arc::new(Mutex::new(bar)),
        }
    }

    pub fn callback(&self) -> ProgressCallback<'static> {
        let shared = self.bar.clone();

        Box::new(move |event: Progress| match shared.lock() {
            Ok(bar) => Self::apply(&bar, event),
            Err(_) => warn!("Progress bar lock poisoned; dropping event"),
        })
    }

    fn apply(bar: &ProgressBar, event: Progress) {
        match event {
            Progress::PhaseStart { name } => {
                bar.reset();
                bar.set_length(0);
                bar.set_style(Self::spinner_style());
                bar.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
                bar.set_message(name);
            }
            Progress::TaskStart { total_steps } => {
                bar.disable_steady_tick();
                bar.reset();
                bar.set_style(Self::bar_style());
                bar.set_length(total_steps);
                bar.set_position(0);
            }
            Progress::TaskIncrement { steps } => bar.inc(steps),
            Progress::TaskFinish => {
                // Tasks that fail before fitting skip their step.
                if let Some(length) = bar.length() {
                    bar.set_position(length.max(bar.position()));
                }
                bar.finish();
            }
            Progress::PhaseFinish => {
                bar.disable_steady_tick();
                bar.finish_with_message("✓ Done");
            }
            Progress::Message(text) if bar.is_finished() => bar.set_message(text),
            Progress::Message(text) => bar.println(format!("  {text}")),
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<12} [{bar:40.cyan/blue}] {pos}/{len} px ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .with_key(
                "eta",
                |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                    let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
                },
            )
            .progress_chars("##-")
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}
