//! Seam towards the connection manager.
//!
//! The actual wire transport (framing, connection pooling, auth) lives
//! outside this crate; the subsystems talk to whatever gateway the
//! connection manager currently has through this trait. Errors come back
//! as plain [`ErrorKind`]s, exactly as a reply would carry them.

use std::fmt::{Display, Formatter};

use async_trait::async_trait;

use crate::protocol::error::ErrorKind;
use crate::protocol::messages::{
    FileTransferMessage, GetServiceDescriptionReply, GetServiceDescriptionRequest,
    LocationChangePollReply, LocationChangePollRequest, NotificationConnectReply,
    NotificationConnectRequest, NotificationSyncReply, NotificationSyncRequest, PrefixResolveReply,
    ResolveServiceReply, ResolveServiceRequest,
};

/// Identity of one gateway instance.
///
/// Two connects to the same address can still land on different gateway
/// instances; the notification protocol compares these to detect that.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GatewayAddress(pub String);

impl Display for GatewayAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request/reply surface of a cluster gateway.
#[async_trait]
pub trait Gateway: Send + Sync + std::fmt::Debug {
    async fn get_service_description(
        &self,
        request: GetServiceDescriptionRequest,
    ) -> Result<GetServiceDescriptionReply, ErrorKind>;

    async fn resolve_service(
        &self,
        request: ResolveServiceRequest,
    ) -> Result<ResolveServiceReply, ErrorKind>;

    async fn prefix_resolve(
        &self,
        request: ResolveServiceRequest,
    ) -> Result<PrefixResolveReply, ErrorKind>;

    async fn notification_connect(
        &self,
        request: NotificationConnectRequest,
    ) -> Result<NotificationConnectReply, ErrorKind>;

    async fn notification_synchronize(
        &self,
        request: NotificationSyncRequest,
    ) -> Result<NotificationSyncReply, ErrorKind>;

    async fn poll_service_locations(
        &self,
        request: LocationChangePollRequest,
    ) -> Result<LocationChangePollReply, ErrorKind>;

    /// One-way send; replies and acks arrive through the file transfer
    /// client's event entry point.
    async fn send_file_message(&self, message: FileTransferMessage) -> Result<(), ErrorKind>;
}
