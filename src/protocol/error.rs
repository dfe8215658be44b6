//! Error kinds surfaced across the client/gateway boundary.

/// Error kind carried by every reply and surfaced by every public async
/// operation.
///
/// The numeric representation is the on-wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(i16)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error("Invalid argument")]
    InvalidArgument = 1,

    #[error("Operation timed out")]
    Timeout = 2,

    #[error("Name does not exist")]
    NameNotFound = 3,

    #[error("User service does not exist")]
    UserServiceNotFound = 4,

    #[error("Service partition does not exist")]
    PartitionNotFound = 5,

    #[error("Service is offline")]
    ServiceOffline = 6,

    #[error("Key does not map to a partition of the service")]
    InvalidServicePartition = 7,

    #[error("Name is not a valid service URI")]
    InvalidNameUri = 8,

    #[error("Access denied")]
    AccessDenied = 9,

    #[error("Notification filter already exists")]
    ServiceNotificationFilterAlreadyExists = 10,

    #[error("Notification filter does not exist")]
    ServiceNotificationFilterNotFound = 11,

    #[error("Transport send queue is full")]
    TransportSendQueueFull = 12,

    #[error("Peer is not ready")]
    NotReady = 13,

    #[error("Operations are still pending")]
    OperationsPending = 14,

    #[error("Gateway is unreachable")]
    GatewayUnreachable = 15,

    #[error("Connection confirmation wait expired")]
    ConnectionConfirmWaitExpired = 16,

    #[error("Operation was canceled")]
    OperationCanceled = 17,

    #[error("Send failed")]
    SendFailed = 18,

    #[error("Operation failed")]
    OperationFailed = 19,

    #[error("Message exceeds the maximum message size")]
    MessageTooLarge = 20,

    #[error("Entity does not exist")]
    NotFound = 21,

    #[error("Hosting service type is not registered")]
    HostingServiceTypeNotRegistered = 22,
}

impl ErrorKind {
    /// Decode an on-wire error code. `0` encodes success (`None`).
    pub fn new(code: i16) -> Option<Self> {
        use ErrorKind::*;
        match code {
            1 => Some(InvalidArgument),
            2 => Some(Timeout),
            3 => Some(NameNotFound),
            4 => Some(UserServiceNotFound),
            5 => Some(PartitionNotFound),
            6 => Some(ServiceOffline),
            7 => Some(InvalidServicePartition),
            8 => Some(InvalidNameUri),
            9 => Some(AccessDenied),
            10 => Some(ServiceNotificationFilterAlreadyExists),
            11 => Some(ServiceNotificationFilterNotFound),
            12 => Some(TransportSendQueueFull),
            13 => Some(NotReady),
            14 => Some(OperationsPending),
            15 => Some(GatewayUnreachable),
            16 => Some(ConnectionConfirmWaitExpired),
            17 => Some(OperationCanceled),
            18 => Some(SendFailed),
            19 => Some(OperationFailed),
            20 => Some(MessageTooLarge),
            21 => Some(NotFound),
            22 => Some(HostingServiceTypeNotRegistered),
            _ => None,
        }
    }

    /// On-wire code. Success is encoded as `0` by the absence of a kind.
    pub fn code(&self) -> i16 {
        *self as i16
    }

    /// The whole cache entry is invalid: fail every waiter and evict it.
    pub fn is_invalid_service(&self) -> bool {
        matches!(
            self,
            Self::NameNotFound | Self::UserServiceNotFound | Self::PartitionNotFound
        )
    }

    /// Only the addressed partition slot is invalid.
    pub fn is_invalid_partition(&self) -> bool {
        matches!(self, Self::ServiceOffline | Self::InvalidServicePartition)
    }

    /// Transient transport backpressure, retried locally and never surfaced
    /// unless the deadline expires.
    pub fn is_retryable_transport(&self) -> bool {
        matches!(
            self,
            Self::TransportSendQueueFull | Self::NotReady | Self::OperationsPending
        )
    }

    /// Commit failures of this class trigger a whole-file re-upload instead
    /// of failing the transfer.
    pub fn is_chunk_commit_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument
                | Self::NotFound
                | Self::HostingServiceTypeNotRegistered
                | Self::OperationCanceled
                | Self::GatewayUnreachable
        )
    }
}
