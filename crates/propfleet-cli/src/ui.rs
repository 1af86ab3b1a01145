use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use propfleet::engine::progress::{Progress, ProgressCallback};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::warn;

#[derive(Debug)]
pub enum UiEvent {
    Progress(Progress),
    Log(String),
}

/// Renders workflow progress on stderr. Runs as its own task and owns every
/// progress bar; workflows talk to it through [`CliProgressHandler`].
pub struct UiManager {
    mp: Arc<MultiProgress>,
    phase: PhaseBar,
    events: mpsc::Receiver<UiEvent>,
    shutdown: watch::Receiver<bool>,
    _sentinel_bar: ProgressBar,
}

#[derive(Default)]
struct PhaseBar {
    bar: Option<ProgressBar>,
    title: String,
}

impl PhaseBar {
    fn clear(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl UiManager {
    pub fn new() -> (Self, mpsc::Sender<UiEvent>, watch::Sender<bool>) {
        let (event_sender, events) = mpsc::channel(1024);
        let (shutdown_sender, shutdown) = watch::channel(false);
        let mp = Arc::new(MultiProgress::with_draw_target(
            ProgressDrawTarget::stderr_with_hz(8),
        ));
        let _sentinel_bar = mp.add(ProgressBar::hidden());
        let manager = Self {
            mp,
            phase: PhaseBar::default(),
            events,
            shutdown,
            _sentinel_bar,
        };
        (manager, event_sender, shutdown_sender)
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.handle_event(event),
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
        self.phase.clear();
        self._sentinel_bar.finish_and_clear();
    }

    fn handle_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Log(line) => {
                self.mp.println(line).ok();
            }
            UiEvent::Progress(progress) => self.handle_progress(progress),
        }
    }

    fn handle_progress(&mut self, progress: Progress) {
        match progress {
            Progress::PhaseStart { name } => {
                self.phase.clear();
                let spinner = self.mp.add(ProgressBar::new_spinner());
                spinner.set_style(Self::spinner_style());
                spinner.enable_steady_tick(Duration::from_millis(100));
                spinner.set_message(name);
                self.phase = PhaseBar {
                    bar: Some(spinner),
                    title: name.to_string(),
                };
            }
            Progress::PhaseFinish => {
                self.phase.clear();
                if !self.phase.title.is_empty() {
                    self.mp.println(format!("✓ {}", self.phase.title)).ok();
                }
                self.phase.title.clear();
            }
            Progress::TaskStart { total } => {
                if let Some(bar) = &self.phase.bar {
                    bar.disable_steady_tick();
                    bar.set_style(Self::task_style());
                    bar.set_length(total);
                    bar.reset();
                    bar.set_message(self.phase.title.clone());
                }
            }
            Progress::TaskIncrement { amount } => {
                if let Some(bar) = &self.phase.bar {
                    bar.inc(amount);
                }
            }
            Progress::TaskFinish => {
                if let Some(bar) = &self.phase.bar {
                    bar.finish();
                }
            }
            Progress::StatusUpdate { text } => {
                if let Some(bar) = &self.phase.bar {
                    bar.set_message(format!("{}: {}", self.phase.title, text));
                }
            }
            Progress::Message(line) => {
                self.mp.println(format!("  {}", line)).ok();
            }
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .expect("static spinner template")
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn task_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{msg:<32} [{bar:36.green/white}] {pos}/{len} tasks ({elapsed_hms}, {rate})",
        )
        .expect("static task template")
        .with_key("rate", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
            let _ = write!(w, "{:.2}/min", state.per_sec() * 60.0);
        })
        .progress_chars("=> ")
    }
}

/// Forwards workflow progress into the UI task without blocking the caller.
#[derive(Clone)]
pub struct CliProgressHandler {
    sender: mpsc::Sender<UiEvent>,
}

impl CliProgressHandler {
    pub fn new(sender: mpsc::Sender<UiEvent>) -> Self {
        Self { sender }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let sender = self.sender.clone();
        Box::new(move |progress: Progress| {
            if let Err(e) = sender.try_send(UiEvent::Progress(progress)) {
                warn!("Dropped a progress update: {}", e);
            }
        })
    }
}
