//! Call session coordinator
//!
//! Each `call` creates a session keyed by a fresh [`SessionId`] with one
//! cancellation timer. A session is live exactly while it is in the table:
//! every terminal transition (accept, reject, cancel, timeout) is a removal,
//! so whichever event removes it first wins and later events find nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use switchboard_core::{ParticipantId, SessionId};

use crate::messages::{CallRoute, ServerEvent, ServerMessage};
use crate::registry::ConnectionRegistry;

/// How a session ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    Accepted,
    Rejected,
    Canceled,
    TimedOut,
}

/// One in-flight call attempt
#[derive(Debug)]
pub struct CallSession {
    pub id: SessionId,
    pub caller: ParticipantId,
    pub callee: ParticipantId,
    pub created_at: Instant,
    /// Payload of the originating `call`, echoed back on timeout
    payload: Value,
    timer: Option<JoinHandle<()>>,
}

impl CallSession {
    fn matches(&self, route: &CallRoute) -> bool {
        self.caller == route.caller && self.callee == route.callee
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Owns the call-establishment handshake
#[derive(Clone)]
pub struct CallCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    registry: Arc<ConnectionRegistry>,
    sessions: DashMap<SessionId, CallSession>,
    next_session: AtomicU64,
    timeout: Duration,
}

impl CallCoordinator {
    pub fn new(registry: Arc<ConnectionRegistry>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                registry,
                sessions: DashMap::new(),
                next_session: AtomicU64::new(0),
                timeout,
            }),
        }
    }

    /// Start a call: notify the callee and arm the timeout
    ///
    /// Must be called from within a tokio runtime.
    pub fn call(&self, route: CallRoute, payload: Value) -> SessionId {
        let inner = &self.inner;
        let id = SessionId(inner.next_session.fetch_add(1, Ordering::Relaxed) + 1);

        inner.sessions.insert(
            id,
            CallSession {
                id,
                caller: route.caller.clone(),
                callee: route.callee.clone(),
                created_at: Instant::now(),
                payload: payload.clone(),
                timer: None,
            },
        );

        info!(
            session = %id,
            caller = %route.caller,
            callee = %route.callee,
            "Call initiated"
        );

        let incoming = ServerMessage::new(ServerEvent::IncomingCall, payload).with_session(id);
        if !inner.registry.send_to(route.callee.as_str(), incoming) {
            debug!(session = %id, callee = %route.callee, "Callee unreachable, incoming-call dropped");
        }

        // Armed only once incoming-call is queued, so its call-canceled never overtakes it
        let timer = spawn_timer(Arc::downgrade(inner), id, inner.timeout);
        match inner.sessions.get_mut(&id) {
            Some(mut session) => session.timer = Some(timer),
            // Already resolved by a racing event
            None => timer.abort(),
        }

        id
    }

    /// Callee picked up; tells the caller
    pub fn accept(&self, route: &CallRoute, session: Option<SessionId>, payload: Value) -> Option<SessionId> {
        let ended = self.finish(route, session, CallOutcome::Accepted)?;
        self.notify(&ended.caller, ServerEvent::CallAccepted, payload, ended.id);
        Some(ended.id)
    }

    /// Callee declined; tells the caller
    pub fn reject(&self, route: &CallRoute, session: Option<SessionId>, payload: Value) -> Option<SessionId> {
        let ended = self.finish(route, session, CallOutcome::Rejected)?;
        self.notify(&ended.caller, ServerEvent::CallRejected, payload, ended.id);
        Some(ended.id)
    }

    /// Caller hung up before an answer; tells the callee
    pub fn cancel(&self, route: &CallRoute, session: Option<SessionId>, payload: Value) -> Option<SessionId> {
        let ended = self.finish(route, session, CallOutcome::Canceled)?;
        self.notify(&ended.callee, ServerEvent::CallCanceled, payload, ended.id);
        Some(ended.id)
    }

    /// Time out `id` if it is still live; tells both sides
    pub fn expire(&self, id: SessionId) -> bool {
        self.inner.expire(id)
    }

    pub fn is_active(&self, id: SessionId) -> bool {
        self.inner.sessions.contains_key(&id)
    }

    pub fn active_calls(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Resolve and remove the live session an event refers to
    fn finish(&self, route: &CallRoute, session: Option<SessionId>, outcome: CallOutcome) -> Option<CallSession> {
        let sessions = &self.inner.sessions;

        // Without an explicit id, the newest live call between the pair
        let id = session.or_else(|| {
            sessions
                .iter()
                .filter(|entry| entry.matches(route))
                .map(|entry| entry.id)
                .max()
        });

        let removed = id.and_then(|id| sessions.remove_if(&id, |_, s| s.matches(route)));

        match removed {
            Some((_, ended)) => {
                if let Some(timer) = &ended.timer {
                    timer.abort();
                }
                info!(
                    session = %ended.id,
                    caller = %ended.caller,
                    callee = %ended.callee,
                    outcome = ?outcome,
                    "Call ended"
                );
                Some(ended)
            }
            None => {
                debug!(
                    session = ?session,
                    caller = %route.caller,
                    callee = %route.callee,
                    outcome = ?outcome,
                    "No live call session, event ignored"
                );
                None
            }
        }
    }

    fn notify(&self, to: &ParticipantId, event: ServerEvent, payload: Value, id: SessionId) {
        let msg = ServerMessage::new(event, payload).with_session(id);
        if !self.inner.registry.send_to(to.as_str(), msg) {
            debug!(session = %id, participant = %to, ?event, "Participant unreachable, dropped");
        }
    }
}

impl CoordinatorInner {
    fn expire(&self, id: SessionId) -> bool {
        let Some((_, ended)) = self.sessions.remove(&id) else {
            return false;
        };

        info!(
            session = %id,
            caller = %ended.caller,
            callee = %ended.callee,
            after = ?ended.age(),
            "Call timed out"
        );

        let canceled = ServerMessage::new(ServerEvent::CallCanceled, ended.payload).with_session(id);
        self.registry.send_to(ended.callee.as_str(), canceled.clone());
        self.registry.send_to(ended.caller.as_str(), canceled);
        true
    }
}

fn spawn_timer(inner: Weak<CoordinatorInner>, id: SessionId, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(inner) = inner.upgrade() {
            inner.expire(id);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use serde_json::json;
    use tokio::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(120);

    struct Fixture {
        calls: CallCoordinator,
        alice: mpsc::Receiver<ServerMessage>,
        bob: mpsc::Receiver<ServerMessage>,
    }

    fn pid(id: &str) -> ParticipantId {
        ParticipantId::new(id).unwrap()
    }

    fn route() -> CallRoute {
        CallRoute {
            caller: pid("alice"),
            callee: pid("bob"),
        }
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let (alice, alice_rx) = ConnectionHandle::channel(registry.next_connection_id());
        let (bob, bob_rx) = ConnectionHandle::channel(registry.next_connection_id());
        registry.register(pid("alice"), alice);
        registry.register(pid("bob"), bob);

        let mut fixture = Fixture {
            calls: CallCoordinator::new(registry, TIMEOUT),
            alice: alice_rx,
            bob: bob_rx,
        };
        drain(&mut fixture.alice);
        drain(&mut fixture.bob);
        fixture
    }

    /// Handshake messages only; presence updates are skipped
    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if msg.event != ServerEvent::OnlineUsers {
                out.push(msg);
            }
        }
        out
    }

    fn count(msgs: &[ServerMessage], event: ServerEvent) -> usize {
        msgs.iter().filter(|m| m.event == event).count()
    }

    #[tokio::test]
    async fn test_call_notifies_callee() {
        let mut f = fixture();
        let id = f.calls.call(route(), json!({ "callerId": "alice", "calleeId": "bob", "sdp": "x" }));

        let bob = drain(&mut f.bob);
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].event, ServerEvent::IncomingCall);
        assert_eq!(bob[0].session, Some(id));
        assert_eq!(bob[0].data["sdp"], "x");

        assert!(drain(&mut f.alice).is_empty());
        assert!(f.calls.is_active(id));
        assert_eq!(f.calls.active_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_cancels_timeout() {
        let mut f = fixture();
        let id = f.calls.call(route(), json!({}));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.calls.accept(&route(), None, json!({ "answer": 1 })), Some(id));

        let alice = drain(&mut f.alice);
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].event, ServerEvent::CallAccepted);
        assert_eq!(alice[0].data, json!({ "answer": 1 }));

        // Well past the original deadline: nothing else arrives
        tokio::time::sleep(TIMEOUT * 2).await;
        assert!(drain(&mut f.alice).is_empty());
        assert_eq!(count(&drain(&mut f.bob), ServerEvent::CallCanceled), 0);
        assert!(!f.calls.is_active(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_both_sides() {
        let mut f = fixture();
        let payload = json!({ "callerId": "alice", "calleeId": "bob" });
        let id = f.calls.call(route(), payload.clone());
        drain(&mut f.bob);

        tokio::time::sleep(TIMEOUT + Duration::from_secs(1)).await;

        let alice = drain(&mut f.alice);
        let bob = drain(&mut f.bob);
        assert_eq!(count(&alice, ServerEvent::CallCanceled), 1);
        assert_eq!(count(&bob, ServerEvent::CallCanceled), 1);
        assert_eq!(bob[0].data, payload);
        assert_eq!(bob[0].session, Some(id));

        // Late answer has no effect
        assert_eq!(f.calls.accept(&route(), Some(id), json!({})), None);
        assert_eq!(f.calls.accept(&route(), None, json!({})), None);
        assert!(drain(&mut f.alice).is_empty());
        assert_eq!(f.calls.active_calls(), 0);
    }

    #[tokio::test]
    async fn test_double_reject_delivers_once() {
        let mut f = fixture();
        f.calls.call(route(), json!({}));

        assert!(f.calls.reject(&route(), None, json!({})).is_some());
        assert!(f.calls.reject(&route(), None, json!({})).is_none());

        let alice = drain(&mut f.alice);
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].event, ServerEvent::CallRejected);
    }

    #[tokio::test]
    async fn test_explicit_cancel_notifies_callee_only() {
        let mut f = fixture();
        let id = f.calls.call(route(), json!({}));
        drain(&mut f.bob);

        assert_eq!(f.calls.cancel(&route(), Some(id), json!({ "why": "hung up" })), Some(id));

        let bob = drain(&mut f.bob);
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].event, ServerEvent::CallCanceled);
        assert_eq!(bob[0].data["why"], "hung up");
        assert!(drain(&mut f.alice).is_empty());
    }

    #[tokio::test]
    async fn test_events_for_unknown_session_ignored() {
        let mut f = fixture();

        assert!(f.calls.accept(&route(), None, json!({})).is_none());
        assert!(f.calls.cancel(&route(), Some(SessionId(99)), json!({})).is_none());
        assert!(!f.calls.expire(SessionId(99)));

        assert!(drain(&mut f.alice).is_empty());
        assert!(drain(&mut f.bob).is_empty());
    }

    #[tokio::test]
    async fn test_session_id_must_match_route() {
        let mut f = fixture();
        let id = f.calls.call(route(), json!({}));

        let other = CallRoute {
            caller: pid("mallory"),
            callee: pid("bob"),
        };
        assert!(f.calls.accept(&other, Some(id), json!({})).is_none());
        assert!(f.calls.is_active(id));
        assert!(drain(&mut f.alice).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_calls_are_independent() {
        let mut f = fixture();
        let first = f.calls.call(route(), json!({ "n": 1 }));
        tokio::time::sleep(Duration::from_secs(30)).await;
        let second = f.calls.call(route(), json!({ "n": 2 }));
        assert_ne!(first, second);
        assert_eq!(f.calls.active_calls(), 2);

        // No session id: the newest call is answered
        assert_eq!(f.calls.accept(&route(), None, json!({})), Some(second));
        assert!(f.calls.is_active(first));

        // The older call still times out on its own schedule
        tokio::time::sleep(TIMEOUT).await;
        let bob = drain(&mut f.bob);
        let canceled: Vec<_> = bob
            .iter()
            .filter(|m| m.event == ServerEvent::CallCanceled)
            .collect();
        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].session, Some(first));
        assert_eq!(canceled[0].data["n"], 1);
        assert_eq!(f.calls.active_calls(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_callee_still_times_out_later() {
        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallCoordinator::new(registry, TIMEOUT);

        let id = calls.call(route(), json!({}));
        assert!(calls.is_active(id));
        assert!(calls.expire(id));
        assert!(!calls.expire(id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_terminations_resolve_once() {
        let mut f = fixture();
        let id = f.calls.call(route(), json!({}));
        drain(&mut f.bob);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let calls = f.calls.clone();
            tasks.push(tokio::spawn(async move {
                let (outcome, won) = match i % 4 {
                    0 => (CallOutcome::Accepted, calls.accept(&route(), Some(id), json!({})).is_some()),
                    1 => (CallOutcome::Rejected, calls.reject(&route(), Some(id), json!({})).is_some()),
                    2 => (CallOutcome::Canceled, calls.cancel(&route(), Some(id), json!({})).is_some()),
                    _ => (CallOutcome::TimedOut, calls.expire(id)),
                };
                won.then_some(outcome)
            }));
        }

        let mut winners = Vec::new();
        for task in tasks {
            if let Some(outcome) = task.await.unwrap() {
                winners.push(outcome);
            }
        }
        assert_eq!(winners.len(), 1);
        assert!(!f.calls.is_active(id));

        let alice: Vec<_> = drain(&mut f.alice).into_iter().map(|m| m.event).collect();
        let bob: Vec<_> = drain(&mut f.bob).into_iter().map(|m| m.event).collect();
        match winners[0] {
            CallOutcome::Accepted => {
                assert_eq!(alice, vec![ServerEvent::CallAccepted]);
                assert!(bob.is_empty());
            }
            CallOutcome::Rejected => {
                assert_eq!(alice, vec![ServerEvent::CallRejected]);
                assert!(bob.is_empty());
            }
            CallOutcome::Canceled => {
                assert!(alice.is_empty());
                assert_eq!(bob, vec![ServerEvent::CallCanceled]);
            }
            CallOutcome::TimedOut => {
                assert_eq!(alice, vec![ServerEvent::CallCanceled]);
                assert_eq!(bob, vec![ServerEvent::CallCanceled]);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_incoming_call_precedes_immediate_timeout() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (bob, mut bob_rx) = ConnectionHandle::channel(registry.next_connection_id());
        registry.register(pid("bob"), bob);
        let calls = CallCoordinator::new(registry, Duration::ZERO);

        drain(&mut bob_rx);

        for _ in 0..50 {
            let id = calls.call(route(), json!({}));

            let mut events = Vec::new();
            while events.len() < 2 {
                let msg = tokio::time::timeout(Duration::from_secs(5), bob_rx.recv())
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(msg.session, Some(id));
                events.push(msg.event);
            }
            assert_eq!(events, vec![ServerEvent::IncomingCall, ServerEvent::CallCanceled]);
        }
    }
}
