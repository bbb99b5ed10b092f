use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// How `zone_count` reports progress on stderr.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    /// Animate when both stdout and stderr are terminals.
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    animated: bool,
}

impl Ui {
    /// Piping the per-frame report elsewhere switches `auto` to plain lines.
    pub fn new(mode: UiMode, stderr_is_tty: bool, stdout_is_tty: bool) -> Self {
        let animated = stderr_is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => stdout_is_tty,
                UiMode::Plain => false,
            };
        Self { animated }
    }

    pub fn step(&self, label: &str) -> Step {
        let bar = self.animated.then(|| {
            let bar = ProgressBar::new_spinner();
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {msg} [{pos} frames]")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.set_message(label.to_string());
            bar
        });
        if bar.is_none() {
            eprintln!("-- {label}");
        }
        Step {
            label: label.to_string(),
            started: Instant::now(),
            frames: Arc::new(AtomicU64::new(0)),
            bar,
        }
    }
}

/// One named phase of a run; reports its duration (and frame count, if any) on drop.
pub struct Step {
    label: String,
    started: Instant,
    frames: Arc<AtomicU64>,
    bar: Option<ProgressBar>,
}

impl Step {
    /// Pipeline progress callback that records the processed-frame count.
    pub fn frame_counter(&self) -> impl Fn(u64) + Send + Sync + 'static {
        let frames = Arc::clone(&self.frames);
        let bar = self.bar.clone();
        move |processed| {
            frames.store(processed, Ordering::Relaxed);
            if let Some(bar) = &bar {
                bar.set_position(processed);
            }
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn summary(&self) -> String {
        let elapsed = HumanDuration(self.started.elapsed());
        match self.frames() {
            0 => format!("{} done in {}", self.label, elapsed),
            n => format!("{} done: {} frames in {}", self.label, n, elapsed),
        }
    }
}

impl Drop for Step {
    fn drop(&mut self) {
        let summary = self.summary();
        match &self.bar {
            Some(bar) => bar.finish_with_message(summary),
            None => eprintln!("{summary}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_animates_only_on_two_terminals() {
        assert!(Ui::new(UiMode::Auto, true, true).animated);
        assert!(!Ui::new(UiMode::Auto, true, false).animated);
        assert!(!Ui::new(UiMode::Auto, false, true).animated);
        assert!(Ui::new(UiMode::Pretty, true, false).animated);
        assert!(!Ui::new(UiMode::Pretty, false, false).animated);
        assert!(!Ui::new(UiMode::Plain, true, true).animated);
    }

    #[test]
    fn plain_step_tracks_frames() {
        let ui = Ui::new(UiMode::Plain, false, false);
        let step = ui.step("Count people");
        assert!(step.summary().starts_with("Count people done in"));
        let report = step.frame_counter();
        report(3);
        report(7);
        assert_eq!(step.frames(), 7);
        assert!(step.summary().starts_with("Count people done: 7 frames in"));
    }
}
