use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use latticepick::engine::progress::{Progress, ProgressCallback};
use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const SPINNER_TICK_MS: u64 = 80;

/// The bar plus the name of the phase it is currently showing.
struct ProgressDisplay {
    pb: ProgressBar,
    phase: Cow<'static, str>,
}

/// Renders engine [`Progress`] events on stderr: a spinner per phase, a bar while a round's
/// aligner batches run, and one line per finished round.
#[derive(Clone)]
pub struct CliProgressHandler {
    display: Arc<Mutex<ProgressDisplay>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        let pb = ProgressBar::new(0)
            .with_style(Self::spinner_style())
            .with_message("Initializing...");
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.disable_steady_tick();
        pb.finish_and_clear();

        Self {
            display: Arc::new(Mutex::new(ProgressDisplay {
                pb,
                phase: Cow::Borrowed(""),
            })),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let shared = self.display.clone();

        Box::new(move |progress: Progress| {
            let Ok(mut display) = shared.lock() else {
                warn!("Progress display mutex was poisoned. Cannot update progress.");
                return;
            };

            match progress {
                Progress::PhaseStart { name } => {
                    let pb = &display.pb;
                    pb.reset();
                    pb.set_length(0);
                    pb.set_style(Self::spinner_style());
                    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
                    pb.set_message(name.clone());
                    display.phase = name;
                }
                Progress::PhaseFinish => {
                    display.pb.disable_steady_tick();
                    display.pb.finish_with_message(format!("✓ {}", display.phase));
                }
                Progress::TaskStart { total_steps } => {
                    let pb = &display.pb;
                    pb.disable_steady_tick();
                    pb.reset();
                    pb.set_length(total_steps);
                    pb.set_position(0);
                    pb.set_style(Self::bar_style());
                    pb.set_message(display.phase.clone());
                }
                Progress::TaskIncrement => {
                    display.pb.inc(1);
                }
                Progress::TaskFinish => {
                    let pb = &display.pb;
                    let total = pb.length().unwrap_or(0);
                    if pb.position() < total {
                        pb.set_position(total);
                    }
                    pb.finish();
                }
                Progress::RoundFinished { index, accepted } => {
                    display.pb.println(format!(
                        "  Round {}: {} particle(s) accepted",
                        index, accepted
                    ));
                }
            }
        })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .expect("Failed to create spinner style template")
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<20} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .expect("Failed to create bar style template")
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
