use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::ProgressStyle;
use parking_lot::Mutex;
use tracing::{Span, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

/// Receives one notification per segment that finished downloading.
///
/// Failed and abandoned segments are never reported.
pub trait ProgressObserver: Send + Sync {
    fn on_start(&self, _total: u64) {}

    fn on_segment_complete(&self, sequence: u64);

    fn on_finish(&self) {}
}

/// Progress bar counting completed segments.
///
/// The bar lives on a tracing span and is drawn by a
/// `tracing_indicatif::IndicatifLayer`; log lines written through that
/// layer's writer are printed above it. Without the layer installed nothing
/// is drawn.
pub struct ProgressBarObserver {
    span: Mutex<Option<Span>>,
    completed: AtomicU64,
}

impl ProgressBarObserver {
    pub fn new() -> Self {
        Self {
            span: Mutex::new(None),
            completed: AtomicU64::new(0),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{span_child_prefix}Downloading... [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
    }

    /// Whether a job is currently being tracked.
    pub fn is_active(&self) -> bool {
        self.span.lock().is_some()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

impl Default for ProgressBarObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ProgressBarObserver {
    fn on_start(&self, total: u64) {
        let span = info_span!("segments", total);
        span.pb_set_style(&Self::style());
        span.pb_set_length(total);
        // Entering shows the bar; it stays until the span closes.
        span.in_scope(|| {});
        self.completed.store(0, Ordering::Relaxed);
        *self.span.lock() = Some(span);
    }

    fn on_segment_complete(&self, _sequence: u64) {
        if let Some(span) = self.span.lock().as_ref() {
            let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
            span.pb_set_position(done);
        }
    }

    fn on_finish(&self) {
        // Dropping the span removes the bar.
        self.span.lock().take();
    }
}
