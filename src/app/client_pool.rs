//! Per-identity SECOM clients and the subscription lifecycle around them.
//!
//! Each service MRN maps to a lazily initialised cell. The first lookup builds the client and,
//! when the subscription has no confirmed id yet, runs the remote subscribe handshake; every
//! concurrent lookup for the same MRN waits on that single construction. A failed
//! construction leaves the cell empty so the next lookup retries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::ports::{SecomClient, SecomClientFactory, SubscriptionStore};
use crate::domain::{Subscription, SubscriptionEvent, SubscriptionRequest};
use crate::error::{ClientError, StoreError, SubscriptionError};
use crate::observability::metrics;

/// A constructed client together with the subscription id it was confirmed under.
pub struct PooledClient {
    pub client: Arc<dyn SecomClient>,
    pub subscription_id: Option<Uuid>,
}

type ClientCell = Arc<OnceCell<Arc<PooledClient>>>;

pub struct OutboundClientPool {
    store: Arc<dyn SubscriptionStore>,
    factory: Arc<dyn SecomClientFactory>,
    // Guards only the map lookup; construction happens outside the lock on the per-MRN cell.
    clients: Mutex<HashMap<String, ClientCell>>,
}

impl OutboundClientPool {
    pub fn new(store: Arc<dyn SubscriptionStore>, factory: Arc<dyn SecomClientFactory>) -> Self {
        Self {
            store,
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    fn cell(&self, service_mrn: &str) -> ClientCell {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients.entry(service_mrn.to_string()).or_default().clone()
    }

    fn evict(&self, service_mrn: &str) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service_mrn);
    }

    /// Whether a constructed client is cached for `service_mrn`.
    pub fn is_cached(&self, service_mrn: &str) -> bool {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service_mrn)
            .is_some_and(|cell| cell.initialized())
    }

    /// Returns the cached client for `subscription`, constructing it on first use.
    pub async fn client_for(&self, subscription: &Subscription) -> Result<Arc<PooledClient>, ClientError> {
        let cell = self.cell(&subscription.service_mrn);
        let pooled = cell.get_or_try_init(|| self.construct(subscription)).await?;
        Ok(pooled.clone())
    }

    async fn construct(&self, subscription: &Subscription) -> Result<Arc<PooledClient>, ClientError> {
        let client = self.factory.create(subscription)?;
        if subscription.subscription_id.is_some() {
            return Ok(Arc::new(PooledClient {
                client,
                subscription_id: subscription.subscription_id,
            }));
        }

        let request = SubscriptionRequest::try_from(subscription).map_err(ClientError::InvalidRequest)?;
        let response = client.subscribe(&request).await?;
        let subscription_id = response
            .subscription_identifier
            .ok_or(ClientError::MissingSubscriptionId)?;
        info!(
            service_mrn = %subscription.service_mrn,
            %subscription_id,
            "Remote subscription confirmed"
        );

        // A record persisted before its handshake completed picks up the confirmed id here.
        match self.store.get(&subscription.service_mrn) {
            Ok(Some(mut existing)) if existing.subscription_id.is_none() => {
                existing.subscription_id = Some(subscription_id);
                existing.updated_at = Some(Utc::now());
                if let Err(e) = self.store.upsert(&existing) {
                    warn!(service_mrn = %subscription.service_mrn, error = %e, "Could not record subscription id");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(service_mrn = %subscription.service_mrn, error = %e, "Registry lookup failed"),
        }

        Ok(Arc::new(PooledClient {
            client,
            subscription_id: Some(subscription_id),
        }))
    }

    /// Subscribes remotely and persists the record; nothing is stored unless the remote side confirms.
    pub async fn subscribe(&self, mut subscription: Subscription) -> Result<Subscription, SubscriptionError> {
        if self.store.get(&subscription.service_mrn)?.is_some() {
            metrics::subscriptions::error("subscribe");
            return Err(SubscriptionError::AlreadyExists(subscription.service_mrn));
        }

        subscription.id = None;
        subscription.subscription_id = None;
        // No record exists, so anything cached for this MRN belongs to a removed subscription.
        self.evict(&subscription.service_mrn);
        let pooled = self.client_for(&subscription).await.map_err(|e| {
            metrics::subscriptions::error("subscribe");
            error!(service_mrn = %subscription.service_mrn, error = %e, "Could not subscribe to SECOM service");
            SubscriptionError::ClientCreationFailed(e)
        })?;

        let now = Utc::now();
        subscription.subscription_id = pooled.subscription_id;
        subscription.created_at = Some(now);
        subscription.updated_at = Some(now);

        match self.store.insert(&subscription) {
            Ok(saved) => {
                metrics::subscriptions::created();
                info!(service_mrn = %saved.service_mrn, subscription_id = ?saved.subscription_id, "Subscription created");
                Ok(saved)
            }
            Err(StoreError::AlreadyExists(mrn)) => Err(SubscriptionError::AlreadyExists(mrn)),
            Err(e) => {
                self.evict(&subscription.service_mrn);
                metrics::subscriptions::error("subscribe");
                Err(e.into())
            }
        }
    }

    /// Removes the remote subscription, then the record and cached client.
    pub async fn unsubscribe(&self, service_mrn: &str) -> Result<Subscription, SubscriptionError> {
        let subscription = self
            .store
            .get(service_mrn)?
            .ok_or_else(|| SubscriptionError::NotFound(service_mrn.to_string()))?;
        let subscription_id = subscription
            .subscription_id
            .ok_or(SubscriptionError::UnsubscribeFailed(ClientError::MissingSubscriptionId))?;

        let result = async {
            let pooled = self.client_for(&subscription).await?;
            pooled.client.remove_subscription(subscription_id).await
        }
        .await;
        if let Err(e) = result {
            metrics::subscriptions::error("unsubscribe");
            error!(%service_mrn, error = %e, "Remote unsubscribe failed; subscription kept");
            return Err(SubscriptionError::UnsubscribeFailed(e));
        }

        self.store.delete(service_mrn)?;
        self.evict(service_mrn);
        metrics::subscriptions::removed("unsubscribe");
        info!(%service_mrn, %subscription_id, "Subscription removed");
        Ok(subscription)
    }

    pub async fn unsubscribe_by_id(&self, subscription_id: Uuid) -> Result<Subscription, SubscriptionError> {
        let subscription = self
            .store
            .get_by_subscription_id(subscription_id)?
            .ok_or_else(|| SubscriptionError::NotFound(subscription_id.to_string()))?;
        self.unsubscribe(&subscription.service_mrn).await
    }

    /// Applies a remote-initiated notification; a removal drops the local record without a remote call.
    pub fn handle_notification(
        &self,
        subscription_id: Option<Uuid>,
        event: SubscriptionEvent,
    ) -> Result<Option<Subscription>, SubscriptionError> {
        let (SubscriptionEvent::SubscriptionRemoved, Some(subscription_id)) = (event, subscription_id) else {
            return Ok(None);
        };
        let Some(subscription) = self.store.get_by_subscription_id(subscription_id)? else {
            warn!(%subscription_id, "Removal notification for an unknown subscription");
            return Ok(None);
        };

        self.store.delete(&subscription.service_mrn)?;
        self.evict(&subscription.service_mrn);
        metrics::subscriptions::removed("notification");
        info!(service_mrn = %subscription.service_mrn, %subscription_id, "Subscription removed by remote service");
        Ok(Some(subscription))
    }

    /// Best-effort removal of every subscription; failures are logged and skipped.
    pub async fn unsubscribe_all(&self) -> usize {
        let subscriptions = match self.store.list() {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!(error = %e, "Could not list subscriptions for removal");
                return 0;
            }
        };

        let mut removed = 0;
        for subscription in subscriptions {
            match self.unsubscribe(&subscription.service_mrn).await {
                Ok(_) => removed += 1,
                Err(e) => warn!(service_mrn = %subscription.service_mrn, error = %e, "Subscription not removed"),
            }
        }
        removed
    }
}
