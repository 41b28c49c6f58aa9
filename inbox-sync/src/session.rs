//! A signed-in user: one datastore plus the push socket feeding it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use inbox_core::{Datastore, DatastoreError, DatasetFilter, InboxApi, LoadOptions, Subscription};
use parking_lot::Mutex;

use crate::client::{ClientError, PushClient};
use crate::config::{ConfigError, SessionConfig};
use crate::connection::SocketEvent;
use crate::protocol::NORMAL_CLOSURE;
use crate::router::to_push_event;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Datastore(#[from] DatastoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Owned by the application; nothing here is global. Drop it (or call
/// [`sign_out`](Self::sign_out)) to end the session.
pub struct InboxSession {
    config: SessionConfig,
    datastore: Datastore,
    client: Mutex<Option<PushClient>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl InboxSession {
    /// Create a session. The push socket is not opened until the first
    /// [`load`](Self::load).
    pub fn sign_in(config: SessionConfig, api: Arc<dyn InboxApi>) -> Result<Self, SessionError> {
        config.connection.socket_url()?;
        log::info!("Signing in {}", config.connection.user_id);
        let datastore = Datastore::new(api, config.datastore.clone());
        Ok(Self {
            config,
            datastore,
            client: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.config.connection.user_id
    }

    pub fn datastore(&self) -> &Datastore {
        &self.datastore
    }

    pub fn client(&self) -> Option<PushClient> {
        self.client.lock().clone()
    }

    pub fn register_feeds<I, S>(&self, feeds: I)
    where
        I: IntoIterator<Item = (S, DatasetFilter)>,
        S: Into<String>,
    {
        self.datastore.register_feeds(feeds);
    }

    /// Load datasets, then open the push socket or reuse the existing one.
    pub async fn load(&self, options: LoadOptions) -> Result<(), SessionError> {
        self.datastore.load(options).await?;
        let client = self.ensure_client()?;
        client.connect()?;
        Ok(())
    }

    /// Close the socket with a normal closure, stop its task and drop every
    /// dataset.
    pub async fn sign_out(&self) {
        let client = self.client.lock().take();
        if let Some(client) = client {
            if let Err(e) = client.close(NORMAL_CLOSURE, "sign out") {
                log::debug!("{e}");
            }
            client.shutdown().await;
        }
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.dispose();
        }
        self.datastore.reset();
        log::info!("Signed out {}", self.config.connection.user_id);
    }

    fn ensure_client(&self) -> Result<PushClient, SessionError> {
        let mut slot = self.client.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = PushClient::spawn(self.config.connection.clone())?;
        let mut subscriptions = self.subscriptions.lock();

        let datastore = self.datastore.clone();
        subscriptions.push(client.on_message(move |event| match to_push_event(event) {
            Some(push) => datastore.apply_push(push),
            None => log::debug!("Ignoring {:?} event", event.event),
        }));

        // Anything pushed while the socket was down is missed, so every
        // reopen after the first re-fetches the datasets.
        let datastore = self.datastore.clone();
        let opened_before = AtomicBool::new(false);
        subscriptions.push(client.on_lifecycle(move |event| {
            if !matches!(event, SocketEvent::Opened) {
                return;
            }
            if !opened_before.swap(true, Ordering::SeqCst) {
                return;
            }
            let datastore = datastore.clone();
            tokio::spawn(async move {
                log::info!("Push socket reopened, reconciling datasets");
                if let Err(e) = datastore.load(LoadOptions::refresh()).await {
                    log::warn!("Reconcile after reconnect failed: {e}");
                }
            });
        }));

        *slot = Some(client.clone());
        Ok(client)
    }
}
