//! In-process stand-ins for the chat network.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    chat::{ChatNetwork, ChatSession, Identity},
    error::ChatError,
};

/// Everything the fake network has seen, plus knobs to make it misbehave.
#[derive(Default)]
pub(crate) struct Ledger {
    pub opened: Vec<Identity>,
    pub live: usize,
    pub closed: usize,
    pub sent: Vec<String>,
    pub refused_credentials: Vec<String>,
    pub failing_messages: Vec<String>,
    pub connect_delay: Option<std::time::Duration>,
    /// Makes every open session report that its transport died.
    pub severed: bool,
}

#[derive(Clone, Default)]
pub(crate) struct FakeNetwork {
    ledger: Arc<Mutex<Ledger>>,
}

impl FakeNetwork {
    pub fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap()
    }
}

impl ChatNetwork for FakeNetwork {
    type Session = FakeSession;

    async fn open(&self, identity: &Identity) -> Result<FakeSession, ChatError> {
        let delay = self.ledger().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut ledger = self.ledger();
        if ledger.refused_credentials.contains(&identity.credential) {
            return Err(ChatError::auth("Login authentication failed"));
        }
        ledger.opened.push(identity.clone());
        ledger.live += 1;
        Ok(FakeSession {
            ledger: Arc::clone(&self.ledger),
            open: true,
        })
    }
}

pub(crate) struct FakeSession {
    ledger: Arc<Mutex<Ledger>>,
    open: bool,
}

impl ChatSession for FakeSession {
    async fn say(&mut self, message: &str) -> Result<(), ChatError> {
        let mut ledger = self.ledger.lock().unwrap();
        if ledger.failing_messages.iter().any(|failing| failing == message) {
            return Err(ChatError::network("message rejected"));
        }
        ledger.sent.push(message.to_owned());
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.ledger.lock().unwrap().severed
    }

    async fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            let mut ledger = self.ledger.lock().unwrap();
            ledger.live -= 1;
            ledger.closed += 1;
        }
    }
}
