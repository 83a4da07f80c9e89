//! Upload progress rendering.

use geckoflash::TransferSession;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write as _};

enum Output {
    Hidden,
    Bar(ProgressBar),
    Text,
}

/// Renders XMODEM progress on stdout.
///
/// A progress bar on a terminal, a self-overwriting `Uploading... N%` line
/// otherwise. Redraws only happen when the percentage moved past zero and
/// changed since the last redraw.
pub struct UploadProgress {
    output: Output,
    last_percent: u8,
}

impl UploadProgress {
    /// Create a reporter; `fancy` selects the progress bar.
    pub fn new(quiet: bool, fancy: bool) -> Self {
        let output = if quiet {
            Output::Hidden
        } else if fancy {
            let pb = ProgressBar::new(100);
            #[allow(clippy::unwrap_used)] // Static template string
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb.set_draw_target(ProgressDrawTarget::stdout());
            pb.set_message("Uploading...");
            Output::Bar(pb)
        } else {
            Output::Text
        };

        Self {
            output,
            last_percent: 0,
        }
    }

    /// Reporter that tracks progress without drawing anything.
    #[cfg(test)]
    fn hidden() -> Self {
        Self::new(true, false)
    }

    /// Feed one block attempt. Returns the percentage if it was redrawn.
    pub fn update(&mut self, session: &TransferSession) -> Option<u8> {
        let percent = session.percent();
        if percent == 0 || percent == self.last_percent {
            return None;
        }
        self.last_percent = percent;

        match &self.output {
            Output::Hidden => {},
            Output::Bar(pb) => {
                if session.error_count > 0 {
                    pb.set_message(format!("Uploading... ({} retries)", session.error_count));
                }
                pb.set_position(u64::from(percent));
            },
            Output::Text => {
                let mut stdout = io::stdout().lock();
                let _ = write!(stdout, "{}", text_line(percent));
                let _ = stdout.flush();
            },
        }

        Some(percent)
    }

    /// Close the progress display after a successful upload.
    pub fn finish(&self) {
        match &self.output {
            Output::Hidden => {},
            Output::Bar(pb) => pb.finish_with_message("Complete"),
            Output::Text => println!(),
        }
    }

    /// Leave the progress display where it stopped after a failure.
    pub fn abandon(&self) {
        match &self.output {
            Output::Hidden => {},
            Output::Bar(pb) => pb.abandon_with_message("Failed"),
            Output::Text => {
                if self.last_percent > 0 {
                    println!();
                }
            },
        }
    }
}

/// Plain-text progress line for terminals without cursor control.
fn text_line(percent: u8) -> String {
    format!("\rUploading... {percent}%")
}
