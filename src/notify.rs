use tracing::info;

/// Where research progress and terminal summaries are delivered.
/// Progress is best-effort; every finished run produces exactly one summary.
pub trait Notifier: Send + Sync {
    fn progress(&self, message: &str);
    fn summary(&self, message: &str);
}

/// Writes progress to the log and summaries to stdout.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn progress(&self, message: &str) {
        info!("{}", message);
    }

    fn summary(&self, message: &str) {
        info!("{}", message);
        println!("{}", message);
    }
}
