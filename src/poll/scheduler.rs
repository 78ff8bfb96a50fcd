//! Poll scheduler for out-of-band assistant replies.
//!
//! The reply to a sent message is computed by a backend worker and only shows
//! up in the thread history, so after each send the scheduler re-fetches the
//! history until a genuinely new assistant turn appears.
//!
//! ## Design
//!
//! One background task per armed poll, and at most one armed poll at a time:
//! 1. `start(thread_id, baseline)` cancels the previous poll, builds a fresh
//!    [`PollState`] and spawns the loop
//! 2. The loop waits `arm_delay`, then runs up to `max_cycles` cycles spaced
//!    by `interval`
//! 3. While the host is hidden a cycle skips the fetch but still counts and
//!    still schedules the next one
//! 4. On novelty the normalized snapshot replaces the thread's messages and
//!    the loop ends; on the cap, placeholders are stripped and the loop ends
//! 5. `cancel()` fires the single [`CancellationToken`] and waits for the
//!    task to end; the loop observes the token at every await point, so once
//!    `cancel()` (or the next `start()`) returns, the old poll can no longer
//!    write to the store

use super::state::{Observation, PollBaseline, PollOutcome, PollState, Visibility};
use crate::backend::ChatBackend;
use crate::chat::{ChatConfig, ChatMessage, ConversationStore};
use crate::events::{EventBus, SyncEvent};
use crate::normalizer::Normalizer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// The one armed poll
struct ActivePoll {
    thread_id: String,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<PollOutcome>>,
    task: JoinHandle<()>,
}

impl ActivePoll {
    fn is_running(&self) -> bool {
        self.outcome.borrow().is_none()
    }

    /// Cancel and wait for the task to finish any store write in progress.
    async fn stop(self) -> bool {
        let running = self.is_running();
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            debug!(thread_id = %self.thread_id, "Poll task ended abnormally: {}", e);
        }
        running
    }
}

/// Single-owner poll timer.
pub struct PollScheduler {
    backend: Arc<dyn ChatBackend>,
    store: Arc<ConversationStore>,
    normalizer: Arc<Normalizer>,
    events: EventBus,
    visibility: watch::Receiver<Visibility>,
    interval: Duration,
    max_cycles: u32,
    arm_delay: Duration,
    active: Mutex<Option<ActivePoll>>,
    live: Arc<AtomicUsize>,
}

impl PollScheduler {
    pub fn new(
        config: &ChatConfig,
        backend: Arc<dyn ChatBackend>,
        store: Arc<ConversationStore>,
        normalizer: Arc<Normalizer>,
        events: EventBus,
        visibility: watch::Receiver<Visibility>,
    ) -> Self {
        Self {
            backend,
            store,
            normalizer,
            events,
            visibility,
            interval: config.poll_interval,
            max_cycles: config.max_poll_cycles,
            arm_delay: config.poll_arm_delay,
            active: Mutex::new(None),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Arm a poll for `thread_id`, cancelling any poll already armed.
    pub async fn start(&self, thread_id: &str, baseline: PollBaseline) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.stop().await;
        }

        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let state = PollState::new(thread_id, baseline);

        info!(
            thread_id,
            last_message_count = state.last_message_count,
            has_assistant_content = state.last_assistant_content.is_some(),
            "Poll armed"
        );

        let task = PollTask {
            backend: self.backend.clone(),
            store: self.store.clone(),
            normalizer: self.normalizer.clone(),
            events: self.events.clone(),
            visibility: self.visibility.clone(),
            interval: self.interval,
            max_cycles: self.max_cycles,
            arm_delay: self.arm_delay,
            cancel: cancel.clone(),
            _live: LiveGuard::new(self.live.clone()),
        };
        let task = tokio::spawn(async move {
            let outcome = task.run(state).await;
            let _ = outcome_tx.send(Some(outcome));
        });

        *active = Some(ActivePoll {
            thread_id: thread_id.to_string(),
            cancel,
            outcome: outcome_rx,
            task,
        });
    }

    /// Cancel the armed poll and wait for its task to end. Returns whether
    /// one was still running.
    pub async fn cancel(&self) -> bool {
        let previous = self.active.lock().await.take();
        match previous {
            Some(previous) => previous.stop().await,
            None => false,
        }
    }

    /// Whether a poll is armed and still running
    pub async fn is_active(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(ActivePoll::is_running)
    }

    /// Thread of the running poll, if any
    pub async fn active_thread(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|a| a.is_running())
            .map(|a| a.thread_id.clone())
    }

    /// Wait for the currently armed poll to finish.
    ///
    /// Returns `None` when nothing is armed.
    pub async fn wait(&self) -> Option<PollOutcome> {
        let mut outcome = self.active.lock().await.as_ref()?.outcome.clone();
        let result = outcome.wait_for(Option::is_some).await;
        match result {
            Ok(done) => *done,
            // Sender dropped without an outcome: the task was aborted
            Err(_) => Some(PollOutcome::Superseded),
        }
    }

    /// Poll tasks currently alive (running or winding down)
    pub fn live_polls(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Counts a poll task as alive until dropped
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything the background loop owns
struct PollTask {
    backend: Arc<dyn ChatBackend>,
    store: Arc<ConversationStore>,
    normalizer: Arc<Normalizer>,
    events: EventBus,
    visibility: watch::Receiver<Visibility>,
    interval: Duration,
    max_cycles: u32,
    arm_delay: Duration,
    cancel: CancellationToken,
    _live: LiveGuard,
}

impl PollTask {
    async fn run(self, mut state: PollState) -> PollOutcome {
        if !self.pause(self.arm_delay).await {
            return self.superseded(&state);
        }

        let mut cycle: u32 = 0;
        while cycle < self.max_cycles {
            cycle += 1;

            let hidden = *self.visibility.borrow() == Visibility::Hidden;
            if hidden {
                debug!(thread_id = %state.thread_id, cycle, "Host hidden, skipping fetch");
            } else {
                let fetched = tokio::select! {
                    _ = self.cancel.cancelled() => return self.superseded(&state),
                    fetched = self.backend.fetch_messages(&state.thread_id) => fetched,
                };

                match fetched {
                    Ok(raw) => {
                        let snapshot = self.normalizer.normalize(&raw, Some(&state.thread_id));
                        match state.observe(&snapshot) {
                            Observation::Novel => {
                                if self.cancel.is_cancelled() {
                                    return self.superseded(&state);
                                }
                                return self.resolve(&state, snapshot, cycle).await;
                            }
                            Observation::CountOnly => {
                                debug!(
                                    thread_id = %state.thread_id,
                                    cycle,
                                    count = state.last_message_count,
                                    "History grew without a new reply"
                                );
                            }
                            Observation::Unchanged => {
                                trace!(thread_id = %state.thread_id, cycle, "No change");
                            }
                        }
                    }
                    Err(e) => {
                        debug!(thread_id = %state.thread_id, cycle, "Poll fetch failed: {}", e);
                    }
                }
            }

            if cycle < self.max_cycles && !self.pause(self.interval).await {
                return self.superseded(&state);
            }
        }

        self.store.strip_processing(Some(&state.thread_id)).await;
        info!(thread_id = %state.thread_id, cycles = cycle, "Poll timed out");
        self.events.emit(SyncEvent::PollTimedOut {
            thread_id: state.thread_id.clone(),
            cycles: cycle,
        });
        PollOutcome::TimedOut { cycles: cycle }
    }

    async fn resolve(
        &self,
        state: &PollState,
        snapshot: Vec<ChatMessage>,
        cycle: u32,
    ) -> PollOutcome {
        self.store
            .replace_authoritative(&state.thread_id, snapshot)
            .await;
        self.store.touch_thread(&state.thread_id).await;
        info!(thread_id = %state.thread_id, cycles = cycle, "Assistant reply reconciled");
        self.events.emit(SyncEvent::PollResolved {
            thread_id: state.thread_id.clone(),
            cycles: cycle,
        });
        PollOutcome::Resolved { cycles: cycle }
    }

    fn superseded(&self, state: &PollState) -> PollOutcome {
        debug!(thread_id = %state.thread_id, "Poll superseded");
        self.events.emit(SyncEvent::PollSuperseded {
            thread_id: state.thread_id.clone(),
        });
        PollOutcome::Superseded
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockChatBackend, MockFetch};
    use crate::test_helpers::{raw, test_chat_config};

    struct Harness {
        scheduler: PollScheduler,
        backend: Arc<MockChatBackend>,
        store: Arc<ConversationStore>,
        visibility: watch::Sender<Visibility>,
        events: EventBus,
    }

    fn harness() -> Harness {
        let events = EventBus::default();
        let backend = Arc::new(MockChatBackend::new());
        let store = Arc::new(ConversationStore::new(events.clone()));
        let (visibility, visibility_rx) = watch::channel(Visibility::Visible);
        let scheduler = PollScheduler::new(
            &test_chat_config(),
            backend.clone(),
            store.clone(),
            Arc::new(Normalizer::new()),
            events.clone(),
            visibility_rx,
        );
        Harness {
            scheduler,
            backend,
            store,
            visibility,
            events,
        }
    }

    fn echo_baseline() -> PollBaseline {
        PollBaseline {
            message_count: 1,
            last_assistant_content: None,
        }
    }

    async fn seed_optimistic(store: &ConversationStore, thread: &str) {
        store
            .append_optimistic(
                Some(thread),
                vec![
                    ChatMessage::user("Hello", Some(thread.into())),
                    ChatMessage::processing(Some(thread.into())),
                ],
            )
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_on_fifth_cycle() {
        let h = harness();
        seed_optimistic(&h.store, "t-1").await;

        let waiting = MockFetch::Messages(vec![raw("human", "Hello")]);
        h.backend
            .script_history(
                "t-1",
                vec![
                    waiting.clone(),
                    waiting.clone(),
                    waiting.clone(),
                    waiting,
                    MockFetch::Messages(vec![raw("human", "Hello"), raw("ai", "Hi there")]),
                ],
            )
            .await;

        h.scheduler.start("t-1", echo_baseline()).await;
        assert_eq!(
            h.scheduler.wait().await,
            Some(PollOutcome::Resolved { cycles: 5 })
        );

        let msgs = h.store.messages(Some("t-1")).await;
        assert_eq!(
            msgs,
            vec![
                ChatMessage::user("Hello", Some("t-1".into())),
                ChatMessage::assistant("Hi there", Some("t-1".into())),
            ]
        );
        assert_eq!(h.backend.fetch_count(), 5);
        assert!(!h.scheduler.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_growth_without_new_reply_keeps_polling() {
        let h = harness();
        h.store
            .replace_authoritative(
                "t-1",
                vec![
                    ChatMessage::user("q1", Some("t-1".into())),
                    ChatMessage::assistant("Old answer", Some("t-1".into())),
                ],
            )
            .await;
        h.backend
            .script_history(
                "t-1",
                vec![
                    MockFetch::Messages(vec![
                        raw("human", "q1"),
                        raw("ai", "Old answer"),
                        raw("human", "q2"),
                    ]),
                    MockFetch::Messages(vec![
                        raw("human", "q1"),
                        raw("ai", "Old answer"),
                        raw("human", "q2"),
                        raw("ai", "New answer"),
                    ]),
                ],
            )
            .await;

        // Baseline excludes the echo here, so cycle 1 grows the count only
        h.scheduler
            .start(
                "t-1",
                PollBaseline {
                    message_count: 2,
                    last_assistant_content: Some("Old answer".into()),
                },
            )
            .await;

        assert_eq!(
            h.scheduler.wait().await,
            Some(PollOutcome::Resolved { cycles: 2 })
        );
        let msgs = h.store.messages(Some("t-1")).await;
        assert_eq!(msgs.last().unwrap().content, "New answer");
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_cap_and_strips_placeholder() {
        let h = harness();
        seed_optimistic(&h.store, "t-1").await;
        h.backend
            .set_history("t-1", vec![raw("human", "Hello")])
            .await;

        h.scheduler.start("t-1", echo_baseline()).await;
        assert_eq!(
            h.scheduler.wait().await,
            Some(PollOutcome::TimedOut { cycles: 80 })
        );
        assert_eq!(h.backend.fetch_count(), 80);

        let msgs = h.store.messages(Some("t-1")).await;
        assert_eq!(msgs.len(), 1);
        assert!(msgs.iter().all(|m| !m.is_processing));

        // No further fetches once stopped
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.backend.fetch_count(), 80);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_errors_are_swallowed() {
        let h = harness();
        h.backend
            .script_history(
                "t-1",
                vec![
                    MockFetch::Fail,
                    MockFetch::Fail,
                    MockFetch::Messages(vec![raw("human", "Hello"), raw("ai", "Hi")]),
                ],
            )
            .await;

        h.scheduler.start("t-1", echo_baseline()).await;
        assert_eq!(
            h.scheduler.wait().await,
            Some(PollOutcome::Resolved { cycles: 3 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_supersedes_first() {
        let h = harness();
        let mut rx = h.events.subscribe();
        h.backend.set_history("t-1", vec![raw("human", "a")]).await;
        h.backend.set_history("t-2", vec![raw("human", "b")]).await;

        h.scheduler.start("t-1", echo_baseline()).await;
        h.scheduler.start("t-2", echo_baseline()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.scheduler.live_polls(), 1);
        assert_eq!(h.scheduler.active_thread().await.as_deref(), Some("t-2"));

        let mut superseded = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SyncEvent::PollSuperseded { thread_id } = event {
                superseded.push(thread_id);
            }
        }
        assert_eq!(superseded, vec!["t-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_fetching() {
        let h = harness();
        seed_optimistic(&h.store, "t-1").await;
        h.backend.set_history("t-1", vec![raw("human", "Hello")]).await;

        h.scheduler.start("t-1", echo_baseline()).await;
        // arm delay + 2 cycles
        tokio::time::sleep(Duration::from_millis(500 + 1500 + 100)).await;
        assert_eq!(h.backend.fetch_count(), 2);

        assert!(h.scheduler.cancel().await);
        assert!(!h.scheduler.cancel().await);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.backend.fetch_count(), 2);
        assert_eq!(h.scheduler.live_polls(), 0);

        // Cancellation is not a timeout: the placeholder stays
        assert!(h
            .store
            .messages(Some("t-1"))
            .await
            .iter()
            .any(|m| m.is_processing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_cycle_skips_fetch_but_reschedules() {
        let h = harness();
        h.backend.set_history("t-1", vec![raw("human", "Hello")]).await;
        h.scheduler.start("t-1", echo_baseline()).await;

        // Cycles run at 0.5s, 2.0s, 3.5s, 5.0s
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(h.backend.fetch_count(), 2);

        h.visibility.send(Visibility::Hidden).unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await; // cycle 3 at 3.5s
        assert_eq!(h.backend.fetch_count(), 2, "hidden cycle must not fetch");

        h.visibility.send(Visibility::Visible).unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await; // cycle 4 at 5.0s
        assert_eq!(h.backend.fetch_count(), 3, "next cycle fetches once visible");
        assert!(h.scheduler.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_after_task_ends() {
        let h = harness();
        h.backend.set_history("t-1", vec![raw("human", "Hello")]).await;
        h.scheduler.start("t-1", echo_baseline()).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(h.scheduler.live_polls(), 1);

        assert!(h.scheduler.cancel().await);
        // No grace period needed: the task is already gone
        assert_eq!(h.scheduler.live_polls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stale_poll_never_overwrites_newer_echo() {
        let events = EventBus::default();
        let backend = Arc::new(MockChatBackend::new());
        let store = Arc::new(ConversationStore::new(events.clone()));
        let (_visibility, visibility_rx) = watch::channel(Visibility::Visible);
        let config = ChatConfig {
            poll_interval: Duration::from_millis(1),
            poll_arm_delay: Duration::ZERO,
            ..test_chat_config()
        };
        let scheduler = PollScheduler::new(
            &config,
            backend.clone(),
            store.clone(),
            Arc::new(Normalizer::new()),
            events,
            visibility_rx,
        );
        backend
            .set_history("t-1", vec![raw("human", "Hello"), raw("ai", "Hi there")])
            .await;

        for round in 0..50 {
            seed_optimistic(&store, "t-1").await;
            scheduler.start("t-1", echo_baseline()).await;
            if round % 2 == 0 {
                tokio::task::yield_now().await;
            }

            // What a new send does: supersede, then echo
            scheduler.cancel().await;
            let echo = format!("follow-up {}", round);
            store
                .append_optimistic(Some("t-1"), vec![ChatMessage::user(&echo, Some("t-1".into()))])
                .await;

            tokio::time::sleep(Duration::from_millis(2)).await;
            let msgs = store.messages(Some("t-1")).await;
            assert_eq!(msgs.last().unwrap().content, echo, "round {}", round);
        }
    }

    #[tokio::test]
    async fn test_wait_without_poll() {
        let h = harness();
        assert_eq!(h.scheduler.wait().await, None);
        assert!(!h.scheduler.is_active().await);
    }
}
