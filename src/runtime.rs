//! Event loop driving a [`NarrationSession`].
//!
//! All session state is touched from this one loop. Synthesis calls run on
//! the blocking pool and come back as outcomes; timers are a single sleep to
//! the session's next deadline.

use crate::audio::AudioOutput;
use crate::book::Coordinate;
use crate::error::PlaybackError;
use crate::narration::{
    Command, MetadataUpdate, NarrationSession, NarrationSnapshot, Notice, ProgressSink,
    SLEEP_TIMER_PRESETS, SessionEvent, SpeechAudio, SynthesisJob, SynthesisOutcome,
};
use crate::synthesis::SynthesisGateway;
use anyhow::{Context, Result, anyhow, bail};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Apply(Command),
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Event(SessionEvent),
    Rejected {
        action: &'static str,
        error: PlaybackError,
    },
    Notice(Notice),
    Status(NarrationSnapshot),
}

/// Parse one line of user input.
pub fn parse_request(line: &str) -> Result<Request> {
    let line = line.trim();
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map(|(word, rest)| (word, rest.trim()))
        .unwrap_or((line, ""));
    let command = match word.to_ascii_lowercase().as_str() {
        "play" => Command::Play,
        "pause" => Command::Pause,
        "toggle" => Command::TogglePlayPause,
        "stop" => Command::Stop,
        "next" => Command::SkipForward,
        "prev" => Command::SkipBackward,
        "seek" => {
            let mut parts = rest.split_whitespace();
            let chapter = parse_index(parts.next(), "chapter")?;
            let sentence = parse_index(parts.next(), "sentence")?;
            Command::Seek(Coordinate::new(chapter, sentence))
        }
        "voice" => {
            if rest.is_empty() {
                bail!("voice needs a voice id");
            }
            Command::SetVoice(rest.to_string())
        }
        "rate" => Command::SetPlaybackRate(parse_number(rest, "rate")?),
        "volume" => Command::SetVolume(parse_number(rest, "volume")?),
        "sleep" if rest.eq_ignore_ascii_case("off") => Command::ClearSleepTimer,
        "sleep" if rest.is_empty() => bail!(
            "sleep needs minutes (for example {}) or 'off'",
            SLEEP_TIMER_PRESETS.map(|minutes| minutes.to_string()).join(", ")
        ),
        "sleep" => Command::SetSleepTimer {
            minutes: rest
                .parse()
                .with_context(|| format!("sleep needs minutes or 'off', got '{rest}'"))?,
        },
        "cache" => Command::CacheChapter,
        "title" | "author" | "tags" if rest.is_empty() => bail!("{word} needs a value"),
        "title" => Command::UpdateMetadata(MetadataUpdate {
            title: Some(rest.to_string()),
            ..MetadataUpdate::default()
        }),
        "author" => Command::UpdateMetadata(MetadataUpdate {
            author: Some(rest.to_string()),
            ..MetadataUpdate::default()
        }),
        "tags" => Command::UpdateMetadata(MetadataUpdate {
            tags: Some(
                rest.split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            ..MetadataUpdate::default()
        }),
        "status" => return Ok(Request::Status),
        "quit" | "exit" => return Ok(Request::Quit),
        "" => bail!("empty command"),
        other => bail!("unknown command '{other}'"),
    };
    Ok(Request::Apply(command))
}

fn parse_index(value: Option<&str>, what: &str) -> Result<usize> {
    let value = value.ok_or_else(|| anyhow!("seek needs a {what} index"))?;
    value
        .parse()
        .with_context(|| format!("invalid {what} index '{value}'"))
}

fn parse_number(value: &str, what: &str) -> Result<f32> {
    value
        .parse()
        .with_context(|| format!("{what} needs a number, got '{value}'"))
}

/// Run until a quit request arrives or the request channel closes.
pub async fn run_session<A, P, G>(
    session: &mut NarrationSession<A, P>,
    gateway: Arc<G>,
    mut requests: UnboundedReceiver<Request>,
    mut report: impl FnMut(Report),
) where
    A: AudioOutput,
    P: ProgressSink,
    G: SynthesisGateway + ?Sized + 'static,
{
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<SynthesisOutcome>();
    info!("Narration loop started");

    loop {
        let deadline = session.next_deadline(Instant::now());
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else {
                    debug!("Request channel closed");
                    break;
                };
                match request {
                    Request::Quit => break,
                    Request::Status => report(Report::Status(session.snapshot(Instant::now()))),
                    Request::Apply(command) => {
                        let action = command.action();
                        match session.apply_command(command, Instant::now()) {
                            Ok(event) => report(Report::Event(event)),
                            Err(error) => report(Report::Rejected { action, error }),
                        }
                    }
                }
            }
            Some(outcome) = done_rx.recv() => {
                session.on_synthesis_complete(outcome, Instant::now());
            }
            _ = wait_until(deadline) => session.tick(Instant::now()),
        }

        for job in session.take_jobs() {
            spawn_synthesis(job, Arc::clone(&gateway), done_tx.clone());
        }
        for notice in session.take_notices() {
            report(Report::Notice(notice));
        }
    }
    info!("Narration loop stopped");
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

fn spawn_synthesis<G>(job: SynthesisJob, gateway: Arc<G>, done: UnboundedSender<SynthesisOutcome>)
where
    G: SynthesisGateway + ?Sized + 'static,
{
    debug!(
        at = %job.key.coordinate(),
        foreground = job.is_foreground(),
        "Dispatching synthesis"
    );
    tokio::spawn(async move {
        let result = run_synthesis(&job, gateway).await;
        // The loop may already be gone at shutdown.
        let _ = done.send(SynthesisOutcome { job, result });
    });
}

/// Call the gateway on the blocking pool. A panicking gateway is reported
/// as a failed job.
async fn run_synthesis<G>(job: &SynthesisJob, gateway: Arc<G>) -> Result<SpeechAudio, String>
where
    G: SynthesisGateway + ?Sized + 'static,
{
    let text = job.text.clone();
    let voice = job.key.voice.clone();
    let call = tokio::task::spawn_blocking(move || gateway.synthesize(&text, &voice));
    match call.await {
        Ok(result) => result
            .map(SpeechAudio::from)
            .map_err(|err| format!("{err:#}")),
        Err(err) => {
            warn!(at = %job.key.coordinate(), "Synthesis task died: {err}");
            Err(format!("synthesis task died: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RecordingAudio;
    use crate::book::book_from;
    use crate::narration::{LifecycleState, RecordingProgressSink, SessionSettings};
    use std::sync::Mutex;

    #[test]
    fn parses_playback_commands() {
        assert_eq!(parse_request("play").unwrap(), Request::Apply(Command::Play));
        assert_eq!(
            parse_request("  NEXT ").unwrap(),
            Request::Apply(Command::SkipForward)
        );
        assert_eq!(
            parse_request("seek 3 14").unwrap(),
            Request::Apply(Command::Seek(Coordinate::new(3, 14)))
        );
        assert_eq!(
            parse_request("rate 1.25").unwrap(),
            Request::Apply(Command::SetPlaybackRate(1.25))
        );
        assert_eq!(parse_request("quit").unwrap(), Request::Quit);
    }

    #[test]
    fn parses_sleep_and_metadata() {
        assert_eq!(
            parse_request("sleep 30").unwrap(),
            Request::Apply(Command::SetSleepTimer { minutes: 30 })
        );
        assert_eq!(
            parse_request("sleep off").unwrap(),
            Request::Apply(Command::ClearSleepTimer)
        );
        assert_eq!(
            parse_request("title The Left Hand of Darkness").unwrap(),
            Request::Apply(Command::UpdateMetadata(MetadataUpdate {
                title: Some("The Left Hand of Darkness".into()),
                ..MetadataUpdate::default()
            }))
        );
        assert_eq!(
            parse_request("tags sci-fi, classic,").unwrap(),
            Request::Apply(Command::UpdateMetadata(MetadataUpdate {
                tags: Some(vec!["sci-fi".into(), "classic".into()]),
                ..MetadataUpdate::default()
            }))
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_request("").is_err());
        assert!(parse_request("seek 1").is_err());
        assert!(parse_request("seek a b").is_err());
        assert!(parse_request("sleep soon").is_err());
        let err = parse_request("sleep").unwrap_err();
        assert!(err.to_string().contains("15, 30, 45, 60"));
        assert!(parse_request("title").is_err());
        assert!(parse_request("dance").is_err());
    }

    struct CannedGateway {
        calls: Mutex<Vec<String>>,
    }

    impl SynthesisGateway for CannedGateway {
        fn synthesize(&self, text: &str, _voice: &str) -> Result<Vec<u8>> {
            self.calls
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .push(text.to_string());
            Ok(vec![0xFF; 16])
        }
    }

    #[tokio::test]
    async fn play_request_reaches_playing_through_the_gateway() {
        let mut session = NarrationSession::open(
            Arc::new(book_from(&[&["One.", " Two."]])),
            SessionSettings::default(),
            None,
            RecordingAudio::default(),
            RecordingProgressSink::default(),
        );
        let gateway = Arc::new(CannedGateway {
            calls: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Request::Apply(Command::Play)).unwrap();
        tx.send(Request::Status).unwrap();

        let mut reports = Vec::new();
        let poll = tx.clone();
        run_session(&mut session, Arc::clone(&gateway), rx, |report| {
            if let Report::Status(snapshot) = &report {
                let next = if snapshot.state == LifecycleState::Playing {
                    Request::Quit
                } else {
                    Request::Status
                };
                poll.send(next).unwrap();
            }
            reports.push(report);
        })
        .await;

        assert_eq!(session.state(), LifecycleState::Playing);
        assert!(matches!(
            reports.first(),
            Some(Report::Event(SessionEvent { action: "narration_play", .. }))
        ));
        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.first().map(String::as_str), Some("One."));
    }

    struct PanickingGateway;

    impl SynthesisGateway for PanickingGateway {
        fn synthesize(&self, _text: &str, _voice: &str) -> Result<Vec<u8>> {
            panic!("gateway exploded");
        }
    }

    #[tokio::test]
    async fn panicking_gateway_fails_the_job() {
        let job = SynthesisJob {
            purpose: crate::narration::JobPurpose::Prefetch,
            key: crate::narration::CacheKey::new("nova", Coordinate::new(0, 1)),
            text: "Two.".into(),
        };
        let result = run_synthesis(&job, Arc::new(PanickingGateway)).await;
        assert!(result.unwrap_err().contains("synthesis task died"));
    }

    #[tokio::test]
    async fn panicking_gateway_returns_playback_to_idle() {
        let mut session = NarrationSession::open(
            Arc::new(book_from(&[&["One.", " Two."]])),
            SessionSettings::default(),
            None,
            RecordingAudio::default(),
            RecordingProgressSink::default(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Request::Apply(Command::Play)).unwrap();
        tx.send(Request::Status).unwrap();

        let mut reports = Vec::new();
        let poll = tx.clone();
        run_session(&mut session, Arc::new(PanickingGateway), rx, |report| {
            if let Report::Status(snapshot) = &report {
                let next = if snapshot.state == LifecycleState::Idle {
                    Request::Quit
                } else {
                    Request::Status
                };
                poll.send(next).unwrap();
            }
            reports.push(report);
        })
        .await;

        assert_eq!(session.state(), LifecycleState::Idle);
        assert_eq!(session.coordinate(), Coordinate::new(0, 0));
        assert!(reports.iter().any(|report| matches!(
            report,
            Report::Notice(Notice::Failure(PlaybackError::SynthesisFailure { .. }))
        )));
    }
}
