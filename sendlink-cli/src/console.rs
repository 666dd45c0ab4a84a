//! Terminal side of a transfer: progress output and the Ctrl+C leave guard.

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use sendlink_core::progress::format_size;
use sendlink_core::{BlockerState, FileMetadata, NavigationBlocker, Progress, TransferStateMachine};
use sendlink_net::TransferEvents;
use tokio::time::Instant;

/// How long a "press Ctrl+C again" prompt stays armed.
pub const CONFIRM_WINDOW: Duration = Duration::from_secs(5);

/// Prints progress to stderr, at most once per whole percent.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    last_percent: Option<u64>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferEvents for ConsoleProgress {
    fn on_metadata(&mut self, metadata: &FileMetadata) {
        eprintln!(
            "Receiving {} ({}, {})",
            metadata.sanitized_name(),
            format_size(metadata.size, false),
            metadata.mime_type
        );
    }

    fn on_progress(&mut self, progress: Progress) {
        let percent = progress.percent().floor() as u64;
        if self.last_percent == Some(percent) && !progress.is_complete() {
            return;
        }
        self.last_percent = Some(percent);
        eprint!(
            "\r{} / {} ({percent}%)",
            format_size(progress.now, false),
            format_size(progress.max, false)
        );
        let _ = std::io::stderr().flush();
    }

    fn on_complete(&mut self) {
        eprintln!();
    }
}

/// How a guarded transfer ended.
pub enum Guarded<T> {
    Done(T),
    /// The user confirmed leaving; the transfer future was dropped.
    Left,
}

/// Run `transfer` while Ctrl+C goes through the navigation blocker.
///
/// The first Ctrl+C during a live transfer only prompts. A second one within
/// [`CONFIRM_WINDOW`] leaves; otherwise the prompt lapses and the transfer continues.
pub async fn guard<F>(machine: &TransferStateMachine, transfer: F) -> Guarded<F::Output>
where
    F: Future,
{
    guard_with(machine, transfer, || Box::pin(tokio::signal::ctrl_c())).await
}

async fn guard_with<F, I, S>(
    machine: &TransferStateMachine,
    transfer: F,
    mut interrupt: I,
) -> Guarded<F::Output>
where
    F: Future,
    I: FnMut() -> std::pin::Pin<Box<S>>,
    S: Future + ?Sized,
{
    let mut blocker = NavigationBlocker::new();
    let mut deadline: Option<Instant> = None;
    tokio::pin!(transfer);
    loop {
        let lapse = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));
        tokio::select! {
            out = &mut transfer => return Guarded::Done(out),
            _ = interrupt() => match blocker.request_leave(machine) {
                BlockerState::Blocked => {
                    eprintln!("\nTransfer in progress. Press Ctrl+C again within {}s to abort.", CONFIRM_WINDOW.as_secs());
                    deadline = Some(Instant::now() + CONFIRM_WINDOW);
                }
                BlockerState::Proceeding => {
                    blocker.leave();
                    return Guarded::Left;
                }
                BlockerState::Unblocked => {}
            },
            _ = lapse, if deadline.is_some() => {
                blocker.stay();
                deadline = None;
                eprintln!("Continuing.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;

    use super::*;

    /// Interrupt source that fires at the given offsets from start.
    fn scripted(at: Vec<Duration>) -> impl FnMut() -> Pin<Box<dyn Future<Output = ()>>> {
        let start = Instant::now();
        move || -> Pin<Box<dyn Future<Output = ()>>> {
            let now = Instant::now();
            match at.iter().map(|o| start + *o).find(|t| *t > now) {
                Some(t) => Box::pin(tokio::time::sleep_until(t)),
                None => Box::pin(std::future::pending()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn double_interrupt_leaves() {
        let mut m = TransferStateMachine::new();
        m.begin();
        let transfer = tokio::time::sleep(Duration::from_secs(60));
        let r = guard_with(
            &m,
            transfer,
            scripted(vec![Duration::from_secs(1), Duration::from_secs(2)]),
        )
        .await;
        assert!(matches!(r, Guarded::Left));
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_lapses_and_transfer_finishes() {
        let mut m = TransferStateMachine::new();
        m.begin();
        let transfer = async {
            tokio::time::sleep(Duration::from_secs(20)).await;
            7
        };
        // Second interrupt comes after the prompt lapsed, so it only prompts again.
        let r = guard_with(
            &m,
            transfer,
            scripted(vec![Duration::from_secs(1), Duration::from_secs(10)]),
        )
        .await;
        assert!(matches!(r, Guarded::Done(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_before_transfer_starts_leaves_at_once() {
        let m = TransferStateMachine::new();
        let r = guard_with(
            &m,
            std::future::pending::<()>(),
            scripted(vec![Duration::from_secs(1)]),
        )
        .await;
        assert!(matches!(r, Guarded::Left));
    }

    #[test]
    fn progress_prints_once_per_percent() {
        let mut c = ConsoleProgress::new();
        c.on_progress(Progress { now: 1, max: 1000 });
        assert_eq!(c.last_percent, Some(0));
        c.on_progress(Progress { now: 5, max: 1000 });
        assert_eq!(c.last_percent, Some(0));
        c.on_progress(Progress {
            now: 1000,
            max: 1000,
        });
        assert_eq!(c.last_percent, Some(100));
    }
}
