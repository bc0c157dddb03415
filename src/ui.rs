//! Exibição de uma consulta no terminal.
//!
//! Mostra um spinner enquanto o job roda e, quando ele termina, o resultado
//! colorido seguido de um relatório em JSON.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use carscan::state_machine::{Job, JobReport, JobState};

/// Spinner que acompanha as mudanças de estado de um job.
pub struct LookupProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl LookupProgress {
    pub fn start(identifier: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("SUBMITTING: {identifier}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Redesenha a partir do snapshot mais recente.
    pub fn update(&self, job: &Job) {
        let mut line = format!("{}: {}", job.state, job.identifier);
        if job.state == JobState::Polling {
            line.push_str(&format!(" (poll {}/{})", job.poll_count, job.max_polls));
            if let Some(message) = &job.last_message {
                line.push_str(&format!(" - {message}"));
            }
            if let Some(err) = &job.last_poll_error {
                line.push_str(&format!(" {}", self.yellow.apply_to(format!("[{err}]"))));
            }
        }
        self.pb.set_message(line);
    }

    /// Para o spinner e imprime como o job terminou.
    pub fn complete(&self, job: &Job) {
        self.pb.finish_and_clear();
        match (&job.result, &job.error) {
            (Some(result), _) => {
                println!("  {} {result}", self.green.apply_to("✓"));
            }
            (None, Some(err)) => {
                println!("  {} Lookup failed ({}): {err}", self.red.apply_to("✗"), err.kind());
            }
            (None, None) if job.cancelled => {
                println!("  {} Lookup cancelled", self.yellow.apply_to("↺"));
            }
            (None, None) => {
                println!("  {} Lookup ended in {}", self.yellow.apply_to("?"), job.state);
            }
        }
    }

    pub fn print_report(&self, report: &JobReport) {
        let style = match report.state {
            JobState::Completed => &self.green,
            JobState::Failed => &self.red,
            _ => &self.yellow,
        };
        println!();
        println!("{}", style.apply_to("─── Lookup Report ───"));
        println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
    }
}
