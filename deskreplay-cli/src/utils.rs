use anyhow::{bail, Context, Result};
use deskreplay::{ClientRect, PlaybackEvent, SessionEvent};
use std::env;
use tokio::sync::watch;
use tokio_stream::{Stream, StreamExt};
use tracing::Level;
use tracing_subscriber::EnvFilter;

pub fn init_logging() -> Result<()> {
    let log_level = env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    Ok(())
}

/// Parse `left,top,right,bottom` in screen pixels
pub fn parse_rect(value: &str) -> Result<ClientRect> {
    let parts = value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<i32>()
                .with_context(|| format!("'{}' is not a pixel coordinate", part.trim()))
        })
        .collect::<Result<Vec<_>>>()?;
    let &[left, top, right, bottom] = parts.as_slice() else {
        bail!("expected LEFT,TOP,RIGHT,BOTTOM, got '{}'", value);
    };
    let rect = ClientRect::new(left, top, right, bottom);
    if rect.is_degenerate() {
        bail!("rectangle {} has no area", value);
    }
    Ok(rect)
}

/// One console line per playback event
pub fn format_event(event: &SessionEvent) -> String {
    match &event.event {
        PlaybackEvent::StepCompleted {
            index,
            success,
            message,
        } => {
            let mark = if *success { "ok" } else { "FAILED" };
            format!("[run {}] step {} {}: {}", event.session, index, mark, message)
        }
        PlaybackEvent::Progress { percent } => format!("[run {}] {}%", event.session, percent),
        PlaybackEvent::Finished { message, .. } => format!("[run {}] {}", event.session, message),
    }
}

/// Print events until `done` is set, then flush the ones already buffered.
///
/// A session's events are all sent before its outcome is published, so
/// setting `done` after the last outcome loses nothing.
pub async fn forward_events<S, F>(mut events: S, mut done: watch::Receiver<bool>, mut emit: F)
where
    S: Stream<Item = SessionEvent> + Unpin,
    F: FnMut(String),
{
    loop {
        tokio::select! {
            biased;
            Some(event) = events.next() => emit(format_event(&event)),
            _ = done.wait_for(|done| *done) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskreplay::PlaybackOutcome;

    #[test]
    fn test_parse_rect() {
        assert_eq!(
            parse_rect("100, 100,500,300").unwrap(),
            ClientRect::new(100, 100, 500, 300)
        );
        assert!(parse_rect("1,2,3").is_err());
        assert!(parse_rect("a,b,c,d").is_err());
        assert!(parse_rect("10,10,10,50").is_err());
    }

    #[test]
    fn test_format_event() {
        let event = SessionEvent {
            session: 2,
            event: PlaybackEvent::StepCompleted {
                index: 3,
                success: false,
                message: "press rejected".into(),
            },
        };
        assert_eq!(format_event(&event), "[run 2] step 3 FAILED: press rejected");
    }

    #[tokio::test]
    async fn test_buffered_events_are_printed_after_done() {
        let events = vec![
            SessionEvent {
                session: 1,
                event: PlaybackEvent::Progress { percent: 100 },
            },
            SessionEvent {
                session: 1,
                event: PlaybackEvent::Finished {
                    success: true,
                    message: "playback completed (1 steps)".into(),
                    outcome: PlaybackOutcome::Completed,
                },
            },
        ];
        // Done is already set when the printer first runs
        let (_done_tx, done_rx) = watch::channel(true);
        let mut lines = Vec::new();
        forward_events(tokio_stream::iter(events), done_rx, |line| lines.push(line)).await;

        assert_eq!(
            lines,
            vec!["[run 1] 100%", "[run 1] playback completed (1 steps)"]
        );
    }

    #[tokio::test]
    async fn test_printer_waits_for_done() {
        let (done_tx, done_rx) = watch::channel(false);
        let printer = tokio::spawn(forward_events(tokio_stream::empty(), done_rx, |_| {}));
        tokio::task::yield_now().await;
        assert!(!printer.is_finished());

        done_tx.send_replace(true);
        tokio::time::timeout(std::time::Duration::from_secs(1), printer)
            .await
            .unwrap()
            .unwrap();
    }
}
