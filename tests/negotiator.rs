mod common;

use common::FakeFactory;
use ssc_session::peer::ice::default_ice_servers;
use ssc_session::peer::{
    Candidate, ConnectionPhase, IceServerConfig, Message, PeerEvent, Role, SessionNegotiator,
};
use ssc_session::signaling::{ChannelEvent, MemoryChannel, SignalingChannel};
use ssc_session::{Reporter, SessionNotice, Severity};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

struct Harness {
    negotiator: SessionNegotiator,
    factory: FakeFactory,
    /// What the peer on the other side of the relay receives
    remote_rx: UnboundedReceiver<ChannelEvent>,
    notices: UnboundedReceiver<SessionNotice>,
    peer_rx: UnboundedReceiver<PeerEvent>,
    _remote: MemoryChannel,
}

impl Harness {
    async fn new(initiator: bool) -> Self {
        let (mut local, mut remote) = MemoryChannel::pair();
        let (local_tx, _local_rx) = mpsc::unbounded_channel();
        let (remote_tx, mut remote_rx) = mpsc::unbounded_channel();
        local.on_message(local_tx).unwrap();
        remote.on_message(remote_tx).unwrap();
        remote.connect().await.unwrap();
        local.connect().await.unwrap();
        assert_eq!(remote_rx.recv().await, Some(ChannelEvent::Opened));

        let factory = FakeFactory::new("O1", "A1");
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let negotiator = SessionNegotiator::new(
            Box::new(local),
            Arc::new(factory.clone()),
            default_ice_servers(),
            initiator,
            peer_tx,
            Reporter::new(notice_tx),
        );

        Self {
            negotiator,
            factory,
            remote_rx,
            notices,
            peer_rx,
            _remote: remote,
        }
    }

    fn sent(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(event) = self.remote_rx.try_recv() {
            if let ChannelEvent::Message(msg) = event {
                out.push(msg);
            }
        }
        out
    }

    fn notices(&mut self) -> Vec<SessionNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }

    fn failures(&mut self) -> Vec<Severity> {
        self.notices()
            .into_iter()
            .filter_map(|n| match n {
                SessionNotice::Failure { severity, .. } => Some(severity),
                _ => None,
            })
            .collect()
    }

    fn created(&self) -> usize {
        self.factory.script.created.load(Ordering::SeqCst)
    }

    /// Feeds the events the fake peer connection raised back in
    async fn pump_peer_events(&mut self) {
        while let Ok(event) = self.peer_rx.try_recv() {
            self.negotiator.on_peer_event(event).await;
        }
    }
}

fn cand(n: u32) -> Message {
    Message::candidate(0, format!("c{}", n))
}

#[tokio::test]
async fn opened_channel_announces_join() {
    let mut h = Harness::new(false).await;
    h.negotiator.handle_channel_event(ChannelEvent::Opened).await;
    assert_eq!(h.sent(), vec![Message::Join]);
    assert_eq!(h.negotiator.phase(), ConnectionPhase::Idle);
}

#[tokio::test]
async fn initiator_creates_one_peer_connection_for_repeated_triggers() {
    let mut h = Harness::new(true).await;

    assert!(!h.negotiator.maybe_start().await);
    for _ in 0..3 {
        h.negotiator.handle_inbound(Message::Join).await;
        h.negotiator.maybe_start().await;
    }

    assert_eq!(h.created(), 1);
    assert_eq!(h.negotiator.phase(), ConnectionPhase::Negotiating);
    assert_eq!(h.negotiator.role(), Some(Role::Initiator));
    assert_eq!(h.sent(), vec![Message::offer("O1")]);
    assert_eq!(
        h.factory.script.calls(),
        vec!["create_offer".to_string(), "local:O1".to_string()]
    );
}

#[tokio::test]
async fn responder_acknowledges_join_once() {
    let mut h = Harness::new(false).await;
    h.negotiator.handle_inbound(Message::Join).await;
    h.negotiator.handle_inbound(Message::Join).await;

    assert_eq!(h.sent(), vec![Message::Join]);
    assert_eq!(h.negotiator.phase(), ConnectionPhase::ChannelReady);
    assert_eq!(h.created(), 0);
}

#[tokio::test]
async fn candidates_before_offer_are_flushed_in_order() {
    let mut h = Harness::new(false).await;
    for n in 1..=3 {
        h.negotiator.handle_inbound(cand(n)).await;
    }
    assert_eq!(h.negotiator.pending_candidates(), 3);
    assert_eq!(h.created(), 0);

    h.negotiator.handle_inbound(Message::offer("O1")).await;

    assert_eq!(h.negotiator.pending_candidates(), 0);
    assert_eq!(h.negotiator.role(), Some(Role::Responder));
    assert_eq!(h.negotiator.phase(), ConnectionPhase::Negotiating);
    assert_eq!(
        h.factory.script.calls(),
        vec![
            "remote:O1",
            "candidate:c1",
            "candidate:c2",
            "candidate:c3",
            "create_answer",
            "local:A1"
        ]
    );
    assert_eq!(h.sent(), vec![Message::answer("A1")]);

    h.negotiator.handle_inbound(cand(4)).await;
    assert_eq!(h.factory.script.added_candidates(), vec!["c1", "c2", "c3", "c4"]);
}

#[tokio::test]
async fn initiator_queues_candidates_until_answer() {
    let mut h = Harness::new(true).await;
    h.negotiator.handle_inbound(Message::Join).await;
    h.negotiator.handle_inbound(cand(1)).await;
    h.negotiator.handle_inbound(cand(2)).await;
    assert_eq!(h.negotiator.pending_candidates(), 2);

    h.negotiator.handle_inbound(Message::answer("A1")).await;
    assert_eq!(h.factory.script.added_candidates(), vec!["c1", "c2"]);
    assert!(h.factory.script.calls().contains(&"remote:A1".to_string()));
}

#[tokio::test]
async fn stop_is_safe_twice_and_without_peer_connection() {
    let mut h = Harness::new(false).await;
    h.negotiator.stop().await;
    h.negotiator.stop().await;
    h.negotiator.hangup().await;

    assert_eq!(h.negotiator.phase(), ConnectionPhase::Closed);
    assert_eq!(h.factory.script.closed.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.notices(),
        vec![SessionNotice::PhaseChanged(ConnectionPhase::Closed)]
    );
}

#[tokio::test]
async fn answer_while_responder_is_ignored() {
    let mut h = Harness::new(false).await;
    h.negotiator.handle_inbound(Message::offer("O1")).await;
    h.notices();

    h.negotiator.handle_inbound(Message::answer("A9")).await;

    assert_eq!(h.negotiator.phase(), ConnectionPhase::Negotiating);
    assert!(!h.factory.script.calls().contains(&"remote:A9".to_string()));
    assert_eq!(h.failures(), vec![Severity::Anomaly]);
}

#[tokio::test]
async fn answer_before_start_is_ignored() {
    let mut h = Harness::new(true).await;
    h.negotiator.handle_inbound(Message::answer("A1")).await;
    assert_eq!(h.negotiator.phase(), ConnectionPhase::Idle);
    assert_eq!(h.created(), 0);
}

#[tokio::test]
async fn glare_keeps_local_offer() {
    let mut h = Harness::new(true).await;
    h.negotiator.handle_inbound(Message::Join).await;
    h.sent();
    h.notices();

    h.negotiator.handle_inbound(Message::offer("O2")).await;

    assert_eq!(h.negotiator.role(), Some(Role::Initiator));
    assert!(h.sent().is_empty());
    assert!(!h.factory.script.calls().contains(&"create_answer".to_string()));
    assert_eq!(h.failures(), vec![Severity::Anomaly]);
}

#[tokio::test]
async fn early_offer_turns_would_be_initiator_into_responder() {
    let mut h = Harness::new(true).await;
    h.negotiator.handle_inbound(Message::offer("O9")).await;

    assert_eq!(h.negotiator.role(), Some(Role::Responder));
    assert_eq!(h.created(), 1);
    assert_eq!(h.sent(), vec![Message::answer("A1")]);
}

#[tokio::test]
async fn second_offer_is_not_renegotiated() {
    let mut h = Harness::new(false).await;
    h.negotiator.handle_inbound(Message::offer("O1")).await;
    h.sent();
    h.negotiator.handle_inbound(Message::offer("O2")).await;

    assert!(h.sent().is_empty());
    assert_eq!(h.created(), 1);
}

#[tokio::test]
async fn bye_while_established_closes_and_later_candidates_are_dropped() {
    let mut h = Harness::new(false).await;
    h.negotiator.handle_inbound(Message::offer("O1")).await;
    h.factory.script.raise(PeerEvent::RemoteStreamAdded {
        track_id: "video0".into(),
        kind: "video".into(),
    });
    h.pump_peer_events().await;
    assert_eq!(h.negotiator.phase(), ConnectionPhase::Established);

    h.negotiator.handle_inbound(Message::Bye).await;
    assert_eq!(h.negotiator.phase(), ConnectionPhase::Closed);
    assert_eq!(h.negotiator.role(), None);
    assert!(!h.negotiator.has_peer_connection());
    assert_eq!(h.factory.script.closed.load(Ordering::SeqCst), 1);

    let calls_before = h.factory.script.calls().len();
    h.negotiator.handle_inbound(cand(7)).await;
    h.negotiator.handle_inbound(Message::offer("O3")).await;
    assert_eq!(h.factory.script.calls().len(), calls_before);
    assert_eq!(h.negotiator.pending_candidates(), 0);
    assert_eq!(h.created(), 1);
}

#[tokio::test]
async fn bye_before_negotiation_is_ignored() {
    let mut h = Harness::new(false).await;
    h.negotiator.handle_inbound(Message::Join).await;
    h.negotiator.handle_inbound(Message::Bye).await;
    assert_eq!(h.negotiator.phase(), ConnectionPhase::ChannelReady);
}

#[tokio::test]
async fn offer_failure_is_recoverable() {
    let mut h = Harness::new(true).await;
    h.factory.script.fail_offer.store(true, Ordering::SeqCst);
    h.negotiator.handle_inbound(Message::Join).await;

    assert_eq!(h.negotiator.phase(), ConnectionPhase::Negotiating);
    assert!(h.sent().is_empty());
    assert_eq!(h.failures(), vec![Severity::Recoverable]);

    h.factory.script.fail_offer.store(false, Ordering::SeqCst);
    h.negotiator.initiate_offer().await.unwrap();
    assert_eq!(h.sent(), vec![Message::offer("O1")]);
}

#[tokio::test]
async fn peer_connection_construction_failure_is_fatal() {
    let mut h = Harness::new(false).await;
    h.factory.script.fail_create.store(true, Ordering::SeqCst);
    h.negotiator.handle_inbound(Message::offer("O1")).await;

    assert_eq!(h.negotiator.phase(), ConnectionPhase::Closed);
    assert!(h.sent().is_empty());
    assert_eq!(h.failures(), vec![Severity::Fatal]);
}

#[tokio::test]
async fn transport_loss_stops_the_session() {
    let mut h = Harness::new(false).await;
    h.negotiator.handle_inbound(Message::offer("O1")).await;
    h.notices();

    h.negotiator
        .handle_channel_event(ChannelEvent::Error("connection reset".into()))
        .await;

    assert_eq!(h.negotiator.phase(), ConnectionPhase::Closed);
    assert_eq!(h.factory.script.closed.load(Ordering::SeqCst), 1);
    assert_eq!(h.failures(), vec![Severity::Fatal]);
}

#[tokio::test]
async fn malformed_frame_is_dropped() {
    let mut h = Harness::new(false).await;
    h.negotiator
        .handle_channel_event(ChannelEvent::Malformed("{type:join}".into()))
        .await;
    assert_eq!(h.negotiator.phase(), ConnectionPhase::Idle);
    assert_eq!(h.failures(), vec![Severity::Anomaly]);
}

#[tokio::test]
async fn local_candidates_are_forwarded() {
    let mut h = Harness::new(true).await;
    h.negotiator.handle_inbound(Message::Join).await;
    h.sent();

    h.factory
        .script
        .raise(PeerEvent::LocalCandidate(Candidate::new(0, "candidate:1 1 udp 1 10.0.0.2 5000 typ host")));
    h.factory.script.raise(PeerEvent::CandidatesComplete);
    h.pump_peer_events().await;

    assert_eq!(
        h.sent(),
        vec![Message::candidate(0, "candidate:1 1 udp 1 10.0.0.2 5000 typ host")]
    );
}

#[tokio::test]
async fn relays_only_join_the_pool_before_construction() {
    let mut h = Harness::new(true).await;
    let relay = IceServerConfig {
        url: "turn:turn.example.org:3478".into(),
        username: Some("u".into()),
        credential: Some("p".into()),
    };
    assert!(h.negotiator.provide_relays(vec![relay.clone()]));
    h.negotiator.handle_inbound(Message::Join).await;

    let servers = h.factory.script.servers.lock().unwrap().clone();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[1], relay);

    assert!(!h.negotiator.provide_relays(vec![relay]));
    assert_eq!(h.negotiator.ice_servers().len(), 2);
}

#[tokio::test]
async fn hangup_is_silent_but_leave_says_bye() {
    let mut h = Harness::new(true).await;
    h.negotiator.handle_inbound(Message::Join).await;
    h.sent();
    h.negotiator.hangup().await;
    assert!(h.sent().is_empty());
    assert_eq!(h.negotiator.phase(), ConnectionPhase::Closed);

    let mut h = Harness::new(true).await;
    h.negotiator.handle_inbound(Message::Join).await;
    h.sent();
    h.negotiator.leave().await;
    assert_eq!(h.sent(), vec![Message::Bye]);
    assert_eq!(h.negotiator.phase(), ConnectionPhase::Closed);
}

fn relay() -> IceServerConfig {
    IceServerConfig {
        url: "turn:turn.example.org:3478".into(),
        username: Some("u".into()),
        credential: Some("p".into()),
    }
}

#[tokio::test]
async fn initiator_waits_for_relays_before_offering() {
    let mut h = Harness::new(true).await;
    h.negotiator.await_relays();

    h.negotiator.handle_inbound(Message::Join).await;
    h.negotiator.handle_inbound(cand(1)).await;
    assert_eq!(h.created(), 0);
    assert_eq!(h.negotiator.phase(), ConnectionPhase::ChannelReady);
    assert_eq!(h.negotiator.pending_candidates(), 1);
    assert!(h.sent().is_empty());

    h.negotiator.finish_relay_discovery(Some(vec![relay()])).await;
    assert!(!h.negotiator.relays_pending());
    assert_eq!(h.created(), 1);
    assert_eq!(h.negotiator.phase(), ConnectionPhase::Negotiating);
    assert_eq!(h.sent(), vec![Message::offer("O1")]);

    let servers = h.factory.script.servers.lock().unwrap().clone();
    assert_eq!(servers, vec![default_ice_servers()[0].clone(), relay()]);
}

#[tokio::test]
async fn early_offer_is_held_until_relays_resolve() {
    let mut h = Harness::new(false).await;
    h.negotiator.await_relays();

    h.negotiator.handle_inbound(Message::offer("O9")).await;
    h.negotiator.handle_inbound(cand(1)).await;
    h.negotiator.handle_inbound(cand(2)).await;
    assert_eq!(h.created(), 0);
    assert_eq!(h.negotiator.pending_candidates(), 2);

    // discovery failed: defaults only
    h.negotiator.finish_relay_discovery(None).await;
    assert_eq!(h.created(), 1);
    assert_eq!(h.negotiator.role(), Some(Role::Responder));
    assert_eq!(
        h.factory.script.calls(),
        vec![
            "remote:O9".to_string(),
            "candidate:c1".to_string(),
            "candidate:c2".to_string(),
            "create_answer".to_string(),
            "local:A1".to_string(),
        ]
    );
    assert_eq!(*h.factory.script.servers.lock().unwrap(), default_ice_servers());
    assert_eq!(h.sent(), vec![Message::answer("A1")]);
}

#[tokio::test]
async fn relays_resolving_after_hangup_start_nothing() {
    let mut h = Harness::new(true).await;
    h.negotiator.await_relays();
    h.negotiator.handle_inbound(Message::Join).await;
    h.negotiator.hangup().await;

    h.negotiator.finish_relay_discovery(Some(vec![relay()])).await;
    assert_eq!(h.created(), 0);
    assert_eq!(h.negotiator.phase(), ConnectionPhase::Closed);
}
