use colored::Colorize;
use stepflow::ProgressCallback;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{num}/{total}]").blue().bold(), msg);
}

/// Pipeline progress rendered as numbered step lines
pub struct UiProgress {
    quiet: bool,
}

impl UiProgress {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ProgressCallback for UiProgress {
    fn on_pipeline_start(&mut self, name: &str, total: usize) {
        if !self.quiet {
            header(&format!("Running {name} ({total} steps)"));
        }
    }

    fn on_step_start(&mut self, index: usize, total: usize, label: &str) {
        if !self.quiet {
            step(index, total, &capitalize(label));
        }
    }

    fn on_step_complete(&mut self, _index: usize, label: &str) {
        log::debug!("{label}: done");
    }

    fn on_step_failed(&mut self, index: usize, label: &str, err: &anyhow::Error) {
        log::debug!("step {index} failed: {err:?}");
        error(&format!("Failed to {label}"));
    }

    fn on_pipeline_complete(&mut self, name: &str) {
        if !self.quiet {
            println!();
            success(&format!("{} complete", capitalize(name)));
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
