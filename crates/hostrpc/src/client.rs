//! The client side: drives `open -> heartbeat* -> register -> request*`
//! against a running servicer.

use std::time::Duration;

use contentpack::{Codec, MsgpackZlib, Packer, SharedMemoryPool, ShmPool, unpack, write_named_segment};
use hostproto::{RouteResponse, Value};
use hosterr::HostError;
use rapace::Connection;
use tokio::net::{TcpStream, UnixStream};

use crate::bind::Address;
use crate::session::{Session, ShmNegotiation};
use crate::wire::{HeartbeatQ, HostControl, HostControlClient, PacketOutcome, PacketQ, RegisterQ};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Created,
    Connected,
    Registered,
    Closed,
}

/// Default per-call timeout for `request()` when none is set explicitly.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Client {
    inner: HostControlClient,
    session: Session,
    state: ClientState,
    negotiation: ShmNegotiation,
    pool: ShmPool,
    request_timeout: Duration,
}

impl Client {
    /// `Created -> Connected`. Establishes the transport against `address`
    /// and awaits readiness within `timeout`; on timeout tears down and
    /// reports a `Transport` failure.
    pub async fn open(address: &Address, timeout: Duration) -> Result<Self, HostError> {
        let conn = tokio::time::timeout(timeout, connect(address))
            .await
            .map_err(|_| HostError::Transport(format!("channel not ready within {timeout:?}")))?
            .map_err(|e| HostError::Transport(e.to_string()))?;

        Ok(Self {
            inner: HostControlClient::new(conn),
            session: Session::new(),
            state: ClientState::Connected,
            negotiation: ShmNegotiation::default(),
            pool: ShmPool,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Overrides the per-call timeout used by `request()`. Takes effect on
    /// the next call.
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = timeout;
    }

    /// Forces `negotiation().is_active()` to `false` regardless of what
    /// `register()` negotiated, the way the original `DaemonClient`'s
    /// `disable_shared_memory` constructor flag does. Every `request()` after
    /// this packs inline only.
    pub fn set_disable_shared_memory(&mut self, disable: bool) {
        self.negotiation.disable_shared_memory = disable;
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn negotiation(&self) -> ShmNegotiation {
        self.negotiation
    }

    /// May be issued from `Connected` or later.
    pub async fn heartbeat(&self, delay: f64) -> Result<bool, HostError> {
        if self.state == ClientState::Created || self.state == ClientState::Closed {
            return Err(HostError::ProtocolOrder(
                "heartbeat() called before open() or after close()".to_string(),
            ));
        }
        let ack = self
            .inner
            .heartbeat(HeartbeatQ { delay })
            .await
            .map_err(|e| HostError::Transport(e.to_string()))?;
        Ok(ack.ok)
    }

    /// `Connected -> Registered`. Writes a random probe pair into a rented
    /// shared-memory slot so the servicer can validate shared memory is
    /// viable across this peer pair, then invokes the plugin's `on_register`.
    pub async fn register(
        &mut self,
        args: Vec<String>,
        kwargs: Vec<(String, String)>,
    ) -> Result<(), HostError> {
        if self.state != ClientState::Connected {
            return Err(HostError::ProtocolOrder(
                "register() called outside Connected state".to_string(),
            ));
        }

        let probe = b"hostrpc-shm-probe".to_vec();
        let lease = self.pool.rent(1, probe.len())?;
        let test_sm_name = lease.names()[0].clone();
        write_named_segment(&test_sm_name, &probe)?;

        let response = self
            .inner
            .register(RegisterQ {
                session: self.session.to_string(),
                args,
                kwargs,
                test_sm_name,
                test_sm_pass: probe,
            })
            .await
            .map_err(|e| HostError::Transport(e.to_string()))?;
        drop(lease);

        self.negotiation
            .absorb(response.is_sm, response.min_sm_size, response.min_sm_byte);
        self.state = ClientState::Registered;
        Ok(())
    }

    /// `request()`: transmits a `PacketQ` and awaits a `PacketA`. Uses the
    /// shared-memory path only when `possible_shared_memory &&
    /// !disable_shared_memory`.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<RouteResponse, HostError> {
        if self.state != ClientState::Registered {
            return Err(HostError::ProtocolOrder(
                "request() called before register()".to_string(),
            ));
        }

        let codec = MsgpackZlib;
        let large_count = if self.negotiation.is_active() {
            args.iter()
                .chain(kwargs.iter().map(|(_, v)| v))
                .filter(|v| {
                    let (elems, bytes) = v.size_hint();
                    matches!(v, Value::NdArray { .. })
                        && elems >= self.negotiation.min_sm_size as u64
                        && bytes >= self.negotiation.min_sm_byte as u64
                })
                .count()
        } else {
            0
        };
        let max_bytes = args
            .iter()
            .chain(kwargs.iter().map(|(_, v)| v))
            .map(|v| v.size_hint().1 as usize)
            .max()
            .unwrap_or(0);
        let mut lease = if large_count > 0 {
            Some(self.pool.rent(large_count, max_bytes.max(1))?)
        } else {
            None
        };

        let (min_sm_size, min_sm_byte) = if self.negotiation.is_active() {
            (
                self.negotiation.min_sm_size as u64,
                self.negotiation.min_sm_byte as u64,
            )
        } else {
            (u64::MAX, u64::MAX)
        };
        let mut packer = Packer::new(&codec, 6, min_sm_size, min_sm_byte, lease.as_ref());
        let packed_args = args
            .iter()
            .map(|v| packer.pack(v))
            .collect::<Result<Vec<_>, _>>()?;
        let packed_kwargs = kwargs
            .iter()
            .map(|(k, v)| packer.pack(v).map(|c| (k.clone(), c)))
            .collect::<Result<Vec<_>, _>>()?;
        let sm_names = packer.used_slot_names();

        let outcome = tokio::time::timeout(
            self.request_timeout,
            self.inner.packet(PacketQ {
                session: self.session.to_string(),
                method: method.to_string(),
                path: path.to_string(),
                coding: codec.id() as i64,
                args: packed_args,
                kwargs: packed_kwargs,
                sm_names,
            }),
        )
        .await
        .map_err(|_| {
            drop(lease.take());
            HostError::Transport(format!(
                "request {method} {path} did not complete within {:?}",
                self.request_timeout
            ))
        })?
        .map_err(|e| HostError::Transport(e.to_string()))?;

        let packet_a = match outcome {
            PacketOutcome::Ok(a) => a,
            PacketOutcome::Err(cause) => {
                drop(lease);
                return Err(HostError::CallbackRuntimeError {
                    module: "<remote>".to_string(),
                    callback: format!("{method} {path}"),
                    cause,
                });
            }
        };

        // `lease` stays mapped through unpacking: a response `Content` can
        // only ever reference a slot this client itself rented (the server
        // never owns one visible to the client), so the rented segments must
        // still be live for `unpack` to read before they're released below.
        let mut response_args = Vec::with_capacity(packet_a.args.len());
        for content in &packet_a.args {
            response_args.push(unpack(content, &codec)?);
        }
        let mut response_kwargs = Vec::with_capacity(packet_a.kwargs.len());
        for (name, content) in &packet_a.kwargs {
            response_kwargs.push((name.clone(), unpack(content, &codec)?));
        }
        drop(lease);

        Ok(RouteResponse {
            args: response_args,
            kwargs: response_kwargs,
        })
    }

    /// Drops the channel. A fresh `open()` after this mints a new session.
    pub fn close(mut self) {
        self.state = ClientState::Closed;
    }
}

async fn connect(address: &Address) -> std::io::Result<Connection> {
    match address {
        Address::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            let (read, write) = stream.into_split();
            let (conn, _incoming) = rapace::socket::run(read, write).await?;
            Ok(conn)
        }
        Address::Unix { path } => {
            let stream = UnixStream::connect(path).await?;
            let (read, write) = stream.into_split();
            let (conn, _incoming) = rapace::socket::run(read, write).await?;
            Ok(conn)
        }
        Address::UnixAbstract { name } => Err(std::io::Error::other(format!(
            "abstract unix sockets are not yet supported (requested '{name}')"
        ))),
    }
}
