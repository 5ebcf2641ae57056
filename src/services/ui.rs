use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

/// A transient status line plus a 0-100 progress bar.
pub trait ProgressHandle: Send + Sync {
    fn set_status(&self, text: &str);
    fn set_percent(&self, percent: f64);
    /// Takes the surface off screen. Called exactly once per handle.
    fn remove(&self);
}

/// The user-facing side of a download: progress display and error alerts.
pub trait Surface: Send + Sync {
    fn attach_progress(&self) -> Arc<dyn ProgressHandle>;
    /// Blocking, user-visible error.
    fn alert(&self, message: &str);
}

/// Renders progress with `indicatif` and alerts on stderr.
#[derive(Default)]
pub struct TerminalSurface;

impl TerminalSurface {
    pub fn new() -> Self {
        Self
    }
}

impl Surface for TerminalSurface {
    fn attach_progress(&self) -> Arc<dyn ProgressHandle> {
        let pb = ProgressBar::new(100);
        match ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:<32} [{bar:40.cyan/blue}] {pos:>3}%")
        {
            Ok(style) => pb.set_style(style.progress_chars("#>-")),
            Err(e) => log::debug!("Falling back to default progress style: {}", e),
        }
        Arc::new(TerminalProgress { pb })
    }

    fn alert(&self, message: &str) {
        eprintln!("Error: {}", message);
    }
}

struct TerminalProgress {
    pb: ProgressBar,
}

impl ProgressHandle for TerminalProgress {
    fn set_status(&self, text: &str) {
        self.pb.set_message(text.to_string());
    }

    fn set_percent(&self, percent: f64) {
        self.pb.set_position(percent.clamp(0.0, 100.0).round() as u64);
    }

    fn remove(&self) {
        self.pb.finish_and_clear();
    }
}
