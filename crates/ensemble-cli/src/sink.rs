//! Headless output: triggers go to the log instead of a synthesizer.

use ensemble_core::{Click, ClickAccent, Module, NoteSink, Trigger, VoiceControl};

/// Logs every trigger and keeps per-module counts.
#[derive(Debug, Default)]
pub struct LogSink {
    counts: [usize; 5],
    kills: usize,
    clicks: usize,
    /// Print triggers to stdout as well as logging them.
    echo: bool,
}

impl LogSink {
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            ..Self::default()
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn summary(&self) -> String {
        Module::ALL
            .iter()
            .map(|m| format!("{} {}", m, self.counts[m.index()]))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl NoteSink for LogSink {
    fn trigger(&mut self, trigger: Trigger) {
        self.counts[trigger.module.index()] += 1;
        let line = format!(
            "{:>6} {:>8.3}s {:<8} pitch {:>3} vel {:.2} dur {:.3}s",
            trigger.step,
            trigger.time,
            trigger.module.name(),
            trigger.pitch,
            trigger.velocity,
            trigger.duration_seconds
        );
        self.emit(&line);
    }

    fn click(&mut self, click: Click) {
        self.clicks += 1;
        let accent = match click.accent {
            ClickAccent::Downbeat => "ONE",
            ClickAccent::Group => "group",
            ClickAccent::Beat => "beat",
        };
        self.emit(&format!("{:>6} {:>8.3}s click    {} {}", "-", click.time, click.beat + 1, accent));
    }
}

impl LogSink {
    fn emit(&self, line: &str) {
        if self.echo {
            println!("{}", line);
        } else {
            log::debug!("[NOTE] {}", line);
        }
    }
}

impl VoiceControl for LogSink {
    fn kill(&mut self, module: Module) {
        self.kills += 1;
        log::trace!("[NOTE] kill {}", module);
    }
}
