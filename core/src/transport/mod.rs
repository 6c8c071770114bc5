// Transport module — channel primitives, flood control and failover

pub mod abstraction;
pub mod failover;
pub mod flood;
pub mod spool;

pub use abstraction::{
    ChannelId, ExchangeTransport, MessageCategory, MessageId, SourceMessage, TransportError,
    UserInfo,
};
pub use failover::{ChannelMode, ExchangeChannels, FailoverState};
pub use flood::send_with_backoff;
pub use spool::{SpoolEntry, SpoolRecord, SpoolTransport};

#[cfg(test)]
pub use abstraction::MockExchangeTransport;
