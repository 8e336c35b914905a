//! ターミナル向けログシンク

use colored::Colorize;
use dirfleet_core::{LogEntry, LogLevel, LogSink};

/// パイプラインのログストリームを色付きで標準出力へ流す
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink {
    verbose: bool,
}

impl ConsoleSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl LogSink for ConsoleSink {
    fn log(&self, entry: LogEntry) {
        let server = entry
            .server_id
            .map(|id| format!("[{}] ", id).dimmed().to_string())
            .unwrap_or_default();

        match entry.level {
            LogLevel::Debug => {
                if self.verbose {
                    println!("    {}{}", server, entry.message.dimmed());
                }
            }
            LogLevel::Info => {
                if let Some(banner) = step_banner(&entry.message) {
                    println!();
                    println!("{}", banner.yellow());
                } else {
                    println!("  {}{}", server, entry.message);
                }
            }
            LogLevel::Success => println!("  {}{} {}", server, "✓".green(), entry.message),
            LogLevel::Warning => println!("  {}{} {}", server, "⚠".yellow(), entry.message.yellow()),
            LogLevel::Error => println!("  {}{} {}", server, "✗".red(), entry.message.red()),
        }
    }
}

/// `Step 2/4: Install product package` → `【Step 2/4】Install product package`
fn step_banner(message: &str) -> Option<String> {
    let rest = message.strip_prefix("Step ")?;
    let (counter, name) = rest.split_once(": ")?;
    let (current, total) = counter.split_once('/')?;
    if current.parse::<usize>().is_err() || total.parse::<usize>().is_err() {
        return None;
    }
    Some(format!("【Step {}/{}】{}", current, total, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_banner() {
        assert_eq!(
            step_banner("Step 2/4: Install product package").as_deref(),
            Some("【Step 2/4】Install product package")
        );
        assert_eq!(step_banner("Steps taken: 3"), None);
        assert_eq!(step_banner("Step x/4: nope"), None);
    }
}
