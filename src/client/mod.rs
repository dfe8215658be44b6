//! Top-level client assembling the control-plane subsystems.

use std::sync::Arc;

use crate::backoff::BackoffConfig;
use crate::build_info::DEFAULT_CLIENT_ID;
use crate::cache::{PrefixResolutionCache, ResolutionCache};
use crate::file_transfer::FileTransferClient;
use crate::notification::{DeliveredNotification, NotificationClient, NotificationHandler, TrackerManager};
use crate::settings::Settings;
use crate::transport::Gateway;

/// Builder for [`Client`].
pub struct ClientBuilder {
    gateway: Arc<dyn Gateway>,
    client_id: Option<Arc<str>>,
    settings: Option<Arc<Settings>>,
    notification_handler: Option<NotificationHandler>,
    backoff_config: Arc<BackoffConfig>,
}

impl ClientBuilder {
    /// Create a new [`ClientBuilder`] on top of a connected gateway.
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            client_id: None,
            settings: None,
            notification_handler: None,
            backoff_config: Default::default(),
        }
    }

    /// Sets client ID.
    pub fn client_id(mut self, client_id: impl Into<Arc<str>>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Override the default [`Settings`].
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(Arc::new(settings));
        self
    }

    /// Receive every accepted service notification.
    pub fn notification_handler(mut self, handler: NotificationHandler) -> Self {
        self.notification_handler = Some(handler);
        self
    }

    /// Set up backoff configuration.
    pub fn backoff_config(mut self, backoff_config: BackoffConfig) -> Self {
        self.backoff_config = Arc::from(backoff_config);
        self
    }

    /// Build [`Client`].
    pub fn build(self) -> Client {
        let settings = self.settings.unwrap_or_default();
        let client_id = self
            .client_id
            .unwrap_or_else(|| Arc::from(DEFAULT_CLIENT_ID));

        let resolution_cache = Arc::new(ResolutionCache::new(Arc::clone(&self.gateway), &settings));
        let prefix_cache = Arc::new(PrefixResolutionCache::new(
            Arc::clone(&self.gateway),
            &settings,
        ));
        let handler: NotificationHandler = self
            .notification_handler
            .unwrap_or_else(|| Arc::new(|_: DeliveredNotification| {}));
        let notification_client = Arc::new(NotificationClient::new(
            Arc::clone(&self.gateway),
            Arc::clone(&settings),
            Arc::clone(&resolution_cache),
            client_id,
            handler,
        ));
        let tracker_manager = TrackerManager::new(
            Arc::clone(&self.gateway),
            Arc::clone(&settings),
            Arc::clone(&resolution_cache),
        );
        let file_transfer = FileTransferClient::new(Arc::clone(&self.gateway), Arc::clone(&settings));

        Client {
            settings,
            resolution_cache,
            prefix_cache,
            notification_client,
            tracker_manager,
            file_transfer,
            backoff_config: self.backoff_config,
        }
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder").finish_non_exhaustive()
    }
}

/// Top-level control-plane client.
///
/// Hands out the resolution caches, the notification client, the address
/// tracker manager and the file transfer client, all wired to one shared
/// gateway. The reliable concurrent queue is constructed standalone (it
/// rides the replicator, not the gateway); see [`crate::rcq`].
///
/// Must be constructed using [`ClientBuilder`].
#[derive(Debug)]
pub struct Client {
    settings: Arc<Settings>,
    resolution_cache: Arc<ResolutionCache>,
    prefix_cache: Arc<PrefixResolutionCache>,
    notification_client: Arc<NotificationClient>,
    tracker_manager: Arc<TrackerManager>,
    file_transfer: FileTransferClient,
    backoff_config: Arc<BackoffConfig>,
}

impl Client {
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn resolution_cache(&self) -> &Arc<ResolutionCache> {
        &self.resolution_cache
    }

    pub fn prefix_cache(&self) -> &Arc<PrefixResolutionCache> {
        &self.prefix_cache
    }

    pub fn notification_client(&self) -> &Arc<NotificationClient> {
        &self.notification_client
    }

    pub fn tracker_manager(&self) -> &Arc<TrackerManager> {
        &self.tracker_manager
    }

    pub fn file_transfer(&self) -> &FileTransferClient {
        &self.file_transfer
    }

    pub fn backoff_config(&self) -> &BackoffConfig {
        &self.backoff_config
    }
}
