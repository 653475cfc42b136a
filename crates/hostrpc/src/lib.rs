//! End-to-end RPC: the three-verb protocol (heartbeat/register/packet),
//! shared-memory capability negotiation, and the servicer/client state
//! machines built around it.

pub mod bind;
pub mod client;
pub mod servicer;
pub mod session;
pub mod wire;

pub use bind::{Address, BindDescriptor, TlsMaterial, parse_address};
pub use client::{Client, ClientState, DEFAULT_REQUEST_TIMEOUT};
pub use servicer::{Servicer, ServicerState, serve_connection};
pub use session::{Session, ShmNegotiation};
pub use wire::{
    HeartbeatA, HeartbeatQ, HostControl, HostControlClient, HostControlRequest,
    HostControlResponse, PacketA, PacketOutcome, PacketQ, RegisterA, RegisterQ,
};

use std::time::Duration;

/// Runs the Retry Loop against the servicer's own bound address right after
/// boot, using `Heartbeat` as the liveness predicate. A failed
/// self-verification is logged by the caller but never prevents serving.
pub async fn self_verify(address: &Address) -> bool {
    retrygate::try_connection(
        || async {
            let client = Client::open(address, Duration::from_secs(1))
                .await
                .map_err(|e| Box::new(e) as retrygate::BoxError)?;
            let ok = client
                .heartbeat(0.0)
                .await
                .map_err(|e| Box::new(e) as retrygate::BoxError)?;
            Ok(ok)
        },
        Some(Duration::from_millis(200)),
        Some(5),
        retrygate::Callbacks::default(),
        None,
    )
    .await
}
