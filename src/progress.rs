//! Per-slot progress bars for download runs.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use artwork_downloader::events::{ProgressReporter, ProgressUpdate};

const BAR_TEMPLATE: &str = "{msg:32!} [{bar:30.cyan/blue}] {bytes}/{total_bytes}";
const ERROR_TEMPLATE: &str = "{msg:32!} [{bar:30.red/red}] {bytes}/{total_bytes} retrying";

/// Whether bars should be drawn at all.
pub(crate) fn should_show_progress(stderr_is_terminal: bool, quiet: bool, disabled: bool) -> bool {
    stderr_is_terminal && !quiet && !disabled
}

/// One progress bar per download slot.
pub(crate) struct IndicatifProgress {
    multi: MultiProgress,
    bars: Vec<ProgressBar>,
    normal: ProgressStyle,
    error: ProgressStyle,
}

impl IndicatifProgress {
    /// Creates `slots` bars drawn to stderr, or hidden bars when `visible`
    /// is false.
    pub(crate) fn new(slots: usize, visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let multi = MultiProgress::with_draw_target(target);
        let normal = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let error = ProgressStyle::with_template(ERROR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let bars = (0..slots)
            .map(|_| {
                let bar = multi.add(ProgressBar::new(0));
                bar.set_style(normal.clone());
                bar
            })
            .collect();
        Self {
            multi,
            bars,
            normal,
            error,
        }
    }

    /// Clears every bar.
    pub(crate) fn finish(&self) {
        for bar in &self.bars {
            bar.finish_and_clear();
        }
        let _ = self.multi.clear();
    }

    #[cfg(test)]
    fn bar(&self, slot: usize) -> &ProgressBar {
        &self.bars[slot]
    }
}

impl ProgressReporter for IndicatifProgress {
    fn set_progress(&self, slot: usize, update: ProgressUpdate) {
        let Some(bar) = self.bars.get(slot) else {
            return;
        };
        bar.set_length(update.total);
        bar.set_position(update.loaded);
        bar.set_message(update.name);
    }

    fn set_error(&self, slot: usize, erroring: bool) {
        if let Some(bar) = self.bars.get(slot) {
            let style = if erroring { &self.error } else { &self.normal };
            bar.set_style(style.clone());
        }
    }
}
