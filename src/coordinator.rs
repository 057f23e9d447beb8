//! Single-flight scan coordination
//!
//! At most one evaluation session is live per process. Starting a session for
//! a different content ID cancels the current one; cancellation is
//! cooperative and only stops the pipeline at its next checkpoint.

use crate::content_id::ContentId;
use crate::error::ScanError;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Session {
    content_id: ContentId,
    token: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct State {
    current: Option<Session>,
    next_generation: u64,
}

/// Handle to one session, carried by every stage of its run
#[derive(Debug, Clone)]
pub struct ScanToken {
    content_id: ContentId,
    token: CancellationToken,
    generation: u64,
}

impl ScanToken {
    pub fn content_id(&self) -> &ContentId {
        &self.content_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with `Superseded` if the session has been interrupted
    pub fn checkpoint(&self) -> Result<(), ScanError> {
        if self.is_cancelled() {
            Err(ScanError::Superseded(self.content_id.clone()))
        } else {
            Ok(())
        }
    }

    /// Token for a detached continuation; cancelled together with this one
    pub fn child(&self) -> ScanToken {
        ScanToken {
            content_id: self.content_id.clone(),
            token: self.token.child_token(),
            generation: self.generation,
        }
    }
}

/// Owner of the process-wide session slot
#[derive(Default)]
pub struct ScanCoordinator {
    state: Mutex<State>,
}

impl ScanCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin (or rejoin) the session for `id`
    ///
    /// A live session for the same ID is returned as-is. A live session for
    /// any other ID is interrupted first.
    pub fn start_scan(&self, id: &ContentId) -> ScanToken {
        let mut state = self.state.lock();

        if let Some(current) = state.current.as_ref() {
            if &current.content_id == id && !current.token.is_cancelled() {
                debug!("rejoining live scan session for {}", id);
                return ScanToken {
                    content_id: current.content_id.clone(),
                    token: current.token.clone(),
                    generation: current.generation,
                };
            }
        }

        Self::replace(&mut state, id)
    }

    /// Start a new session for `id` unless one is already live for it
    ///
    /// Same supersede rules as [`start_scan`](Self::start_scan), but returns
    /// `None` instead of rejoining, so only one caller ever runs the work.
    pub fn claim(&self, id: &ContentId) -> Option<ScanToken> {
        let mut state = self.state.lock();
        let live_for_id = state
            .current
            .as_ref()
            .map(|s| &s.content_id == id && !s.token.is_cancelled())
            .unwrap_or(false);
        if live_for_id {
            return None;
        }
        Some(Self::replace(&mut state, id))
    }

    fn replace(state: &mut State, id: &ContentId) -> ScanToken {
        if let Some(previous) = state.current.take() {
            info!(
                "interrupting scan for {} - new content {} requested",
                previous.content_id, id
            );
            previous.token.cancel();
        }

        state.next_generation += 1;
        let session = Session {
            content_id: id.clone(),
            token: CancellationToken::new(),
            generation: state.next_generation,
        };
        let handle = ScanToken {
            content_id: session.content_id.clone(),
            token: session.token.clone(),
            generation: session.generation,
        };
        state.current = Some(session);
        info!("starting scan session {} for {}", handle.generation, id);
        handle
    }

    /// Cancel the live session, if any, and clear the slot
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        if let Some(previous) = state.current.take() {
            previous.token.cancel();
            info!("scan interrupted for {}", previous.content_id);
        }
    }

    /// Whether the live session belongs to `id`
    pub fn is_active(&self, id: &ContentId) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|s| &s.content_id == id)
            .unwrap_or(false)
    }

    /// Content ID of the live session
    pub fn current(&self) -> Option<ContentId> {
        self.state.lock().current.as_ref().map(|s| s.content_id.clone())
    }

    /// Clear the slot if it still belongs to `id`
    pub fn complete(&self, id: &ContentId) {
        let mut state = self.state.lock();
        if state.current.as_ref().map(|s| &s.content_id == id) == Some(true) {
            state.current = None;
            debug!("scan session completed for {}", id);
        }
    }

    /// Clear the slot only if it is still the session `token` was issued for
    ///
    /// Stricter than [`complete`](Self::complete): a finished run never clears
    /// a newer session for the same ID.
    pub fn finish(&self, token: &ScanToken) {
        let mut state = self.state.lock();
        let owns_slot = state
            .current
            .as_ref()
            .map(|s| s.generation == token.generation)
            .unwrap_or(false);
        if owns_slot {
            state.current = None;
            debug!(
                "scan session {} completed for {}",
                token.generation, token.content_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ContentId {
        ContentId::parse(raw).unwrap()
    }

    #[test]
    fn test_start_scan_tracks_current() {
        let coordinator = ScanCoordinator::new();
        let a = id("aaaaaaaaaaa");
        let token = coordinator.start_scan(&a);
        assert!(coordinator.is_active(&a));
        assert_eq!(coordinator.current(), Some(a.clone()));
        assert!(!token.is_cancelled());
        assert!(token.checkpoint().is_ok());
    }

    #[test]
    fn test_same_id_is_idempotent() {
        let coordinator = ScanCoordinator::new();
        let a = id("aaaaaaaaaaa");
        let first = coordinator.start_scan(&a);
        let second = coordinator.start_scan(&a);
        assert_eq!(first.generation(), second.generation());
        assert!(!first.is_cancelled());
    }

    #[test]
    fn test_different_id_interrupts() {
        let coordinator = ScanCoordinator::new();
        let a = id("aaaaaaaaaaa");
        let b = id("bbbbbbbbbbb");
        let token_a = coordinator.start_scan(&a);
        let child_a = token_a.child();
        let token_b = coordinator.start_scan(&b);

        assert!(token_a.is_cancelled());
        assert!(child_a.is_cancelled());
        assert!(!token_b.is_cancelled());
        assert!(!coordinator.is_active(&a));
        assert!(coordinator.is_active(&b));
        assert!(matches!(token_a.checkpoint(), Err(ScanError::Superseded(ref x)) if x == &a));
    }

    #[test]
    fn test_claim_refuses_live_session_for_same_id() {
        let coordinator = ScanCoordinator::new();
        let a = id("aaaaaaaaaaa");
        let b = id("bbbbbbbbbbb");

        let token_a = coordinator.claim(&a).unwrap();
        assert!(coordinator.claim(&a).is_none());
        assert!(!token_a.is_cancelled());

        let token_b = coordinator.claim(&b).unwrap();
        assert!(token_a.is_cancelled());
        assert!(coordinator.is_active(&b));

        coordinator.finish(&token_b);
        assert!(coordinator.claim(&b).is_some());
    }

    #[test]
    fn test_interrupt_clears_state() {
        let coordinator = ScanCoordinator::new();
        let a = id("aaaaaaaaaaa");
        let token = coordinator.start_scan(&a);
        coordinator.interrupt();
        assert!(token.is_cancelled());
        assert!(coordinator.current().is_none());
        coordinator.interrupt();
    }

    #[test]
    fn test_complete_ignores_other_ids() {
        let coordinator = ScanCoordinator::new();
        let a = id("aaaaaaaaaaa");
        let b = id("bbbbbbbbbbb");
        coordinator.start_scan(&a);
        coordinator.start_scan(&b);

        // A's late completion must not clear B's session
        coordinator.complete(&a);
        assert!(coordinator.is_active(&b));
        coordinator.complete(&b);
        assert!(coordinator.current().is_none());
    }

    #[test]
    fn test_finish_ignores_older_generation_of_same_id() {
        let coordinator = ScanCoordinator::new();
        let a = id("aaaaaaaaaaa");
        let b = id("bbbbbbbbbbb");
        let old_a = coordinator.start_scan(&a);
        coordinator.start_scan(&b);
        let new_a = coordinator.start_scan(&a);
        assert_ne!(old_a.generation(), new_a.generation());

        coordinator.finish(&old_a);
        assert!(coordinator.is_active(&a));
        coordinator.finish(&new_a);
        assert!(!coordinator.is_active(&a));
    }

    #[test]
    fn test_at_most_one_live_session() {
        let coordinator = ScanCoordinator::new();
        let ids = ["aaaaaaaaaaa", "bbbbbbbbbbb", "aaaaaaaaaaa", "ccccccccccc", "ccccccccccc"];
        let mut tokens = Vec::new();
        for raw in ids {
            tokens.push(coordinator.start_scan(&id(raw)));
            let live = tokens.iter().filter(|t| !t.is_cancelled()).count();
            let live_generations: std::collections::HashSet<u64> = tokens
                .iter()
                .filter(|t| !t.is_cancelled())
                .map(|t| t.generation())
                .collect();
            assert!(live >= 1);
            assert_eq!(live_generations.len(), 1);
        }
    }
}
