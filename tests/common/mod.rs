#![allow(dead_code)]

use async_trait::async_trait;
use ssc_session::peer::{
    Candidate, IceServerConfig, PeerConnectionFactory, PeerConnectionHandle, PeerEvent, PeerEventSender,
    SessionDescription,
};
use ssc_session::{Result, SessionError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What the fake peer connection was asked to do, in order
#[derive(Debug, Default)]
pub struct Script {
    pub calls: Mutex<Vec<String>>,
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub servers: Mutex<Vec<IceServerConfig>>,
    pub events: Mutex<Option<PeerEventSender>>,
    pub fail_create: AtomicBool,
    pub fail_offer: AtomicBool,
}

impl Script {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn added_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("candidate:").map(str::to_string))
            .collect()
    }

    /// Raises a peer-connection event as the real stack would
    pub fn raise(&self, event: PeerEvent) {
        let events = self.events.lock().unwrap().clone();
        events.expect("no peer connection created").send(event).unwrap();
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[derive(Clone)]
pub struct FakeFactory {
    pub script: Arc<Script>,
    offer_body: &'static str,
    answer_body: &'static str,
}

impl FakeFactory {
    pub fn new(offer_body: &'static str, answer_body: &'static str) -> Self {
        Self {
            script: Arc::new(Script::default()),
            offer_body,
            answer_body,
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for FakeFactory {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerConnectionHandle>> {
        if self.script.fail_create.load(Ordering::SeqCst) {
            return Err(SessionError::Resource("no media engine".into()));
        }
        self.script.created.fetch_add(1, Ordering::SeqCst);
        *self.script.servers.lock().unwrap() = ice_servers.to_vec();
        *self.script.events.lock().unwrap() = Some(events);
        Ok(Box::new(FakeHandle {
            script: self.script.clone(),
            remote: Mutex::new(None),
            offer_body: self.offer_body,
            answer_body: self.answer_body,
        }))
    }
}

pub struct FakeHandle {
    script: Arc<Script>,
    remote: Mutex<Option<SessionDescription>>,
    offer_body: &'static str,
    answer_body: &'static str,
}

#[async_trait]
impl PeerConnectionHandle for FakeHandle {
    async fn create_offer(&self) -> Result<SessionDescription> {
        if self.script.fail_offer.load(Ordering::SeqCst) {
            return Err(SessionError::Negotiation("create_offer failed".into()));
        }
        self.script.record("create_offer".into());
        Ok(SessionDescription::offer(self.offer_body))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.script.record("create_answer".into());
        Ok(SessionDescription::answer(self.answer_body))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        self.script.record(format!("local:{}", desc.body));
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        self.script.record(format!("remote:{}", desc.body));
        *self.remote.lock().unwrap() = Some(desc.clone());
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.remote.lock().unwrap().is_some()
    }

    async fn add_candidate(&self, candidate: &Candidate) -> Result<()> {
        self.script.record(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.script.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
