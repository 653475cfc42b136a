//! The servicer side: owns the loaded plugin, answers the three RPC verbs.

use std::sync::Arc;
use std::time::Duration;

use contentpack::{Codec, Packer, SharedMemoryPool, ShmPool, codec_by_id, unpack};
use hostproto::{RegisterRequest, RouteRequest, Value};
use hosterr::HostError;
use plughost::PluginHandle;
use rapace::Connection;
use tokio::sync::{RwLock, mpsc};

use crate::wire::{
    HeartbeatA, HeartbeatQ, HostControl, PacketA, PacketOutcome, PacketQ, RegisterA, RegisterQ,
    dispatch_host_control,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicerState {
    Created,
    Opened,
    Serving,
    Closed,
}

/// Owns one loaded plugin and answers `Heartbeat`/`Register`/`Packet` for
/// every connected client. `open()`/`close()` happen once each, serially,
/// around the serving window; concurrent RPC dispatch only ever takes a
/// read lock on the plugin except during `register`.
pub struct Servicer {
    plugin: RwLock<PluginHandle>,
    pool: ShmPool,
    compression_level: u32,
    min_sm_size: u64,
    min_sm_byte: u64,
    state: RwLock<ServicerState>,
}

impl Servicer {
    pub fn new(plugin: PluginHandle) -> Arc<Self> {
        Arc::new(Self {
            plugin: RwLock::new(plugin),
            pool: ShmPool,
            compression_level: 6,
            min_sm_size: 1024,
            min_sm_byte: 64 * 1024,
            state: RwLock::new(ServicerState::Created),
        })
    }

    pub async fn state(&self) -> ServicerState {
        *self.state.read().await
    }

    /// Created -> Opened: runs the plugin's `on_open` and builds its route
    /// table from `on_routes`.
    pub async fn open(&self) -> Result<(), HostError> {
        {
            let mut state = self.state.write().await;
            if *state != ServicerState::Created {
                return Err(HostError::ProtocolOrder(
                    "open() called outside Created state".to_string(),
                ));
            }
            *state = ServicerState::Opened;
        }
        self.plugin.write().await.open()?;
        tracing::info!(module = %self.plugin.read().await.module_name(), "plugin opened");
        Ok(())
    }

    /// Opened -> Serving: marks the servicer ready to answer RPCs. The
    /// transport itself is bound by the caller; this only flips the state.
    pub async fn start_serving(&self) -> Result<(), HostError> {
        let mut state = self.state.write().await;
        if *state != ServicerState::Opened {
            return Err(HostError::ProtocolOrder(
                "start_serving() called outside Opened state".to_string(),
            ));
        }
        *state = ServicerState::Serving;
        Ok(())
    }

    /// Any state -> Closed: runs the plugin's `on_close`.
    pub async fn stop(&self) -> Result<(), HostError> {
        self.plugin.write().await.close()?;
        *self.state.write().await = ServicerState::Closed;
        Ok(())
    }

    fn codec_for(&self, coding: i64) -> Result<Box<dyn Codec>, HostError> {
        codec_by_id(coding as u8)
    }
}

impl HostControl for Servicer {
    async fn heartbeat(&self, q: HeartbeatQ) -> HeartbeatA {
        tracing::debug!(delay = q.delay, "heartbeat");
        if q.delay > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(q.delay)).await;
        }
        HeartbeatA { ok: true }
    }

    async fn register(&self, q: RegisterQ) -> RegisterA {
        tracing::info!(session = %q.session, "register");
        let is_sm = if q.test_sm_name.is_empty() {
            false
        } else {
            self.pool.validate(&q.test_sm_name, &q.test_sm_pass)
        };

        let request = RegisterRequest {
            args: q.args.iter().cloned().map(Value::Str).collect(),
            kwargs: q
                .kwargs
                .iter()
                .map(|(k, v)| (k.clone(), Value::Str(v.clone())))
                .collect(),
        };

        match self.plugin.write().await.on_register(request) {
            Ok(outcome) => RegisterA {
                code: RegisterA::SUCCESS,
                is_sm,
                min_sm_size: outcome.min_sm_size,
                min_sm_byte: outcome.min_sm_byte,
            },
            Err(HostError::CallbackNotFound { .. }) => RegisterA {
                code: RegisterA::NOT_FOUND_REGISTER_FUNCTION,
                is_sm,
                min_sm_size: 0,
                min_sm_byte: 0,
            },
            Err(e) => {
                tracing::warn!(error = %e, "on_register failed");
                RegisterA {
                    code: RegisterA::UNKNOWN,
                    is_sm,
                    min_sm_size: 0,
                    min_sm_byte: 0,
                }
            }
        }
    }

    async fn packet(&self, q: PacketQ) -> PacketOutcome {
        tracing::info!(session = %q.session, method = %q.method, path = %q.path, "packet");
        match self.handle_packet(q).await {
            Ok(a) => PacketOutcome::Ok(a),
            Err(e) => {
                tracing::warn!(error = %e, "packet handler failed");
                PacketOutcome::Err(e.to_string())
            }
        }
    }
}

impl Servicer {
    async fn handle_packet(&self, q: PacketQ) -> Result<PacketA, HostError> {
        let codec = self.codec_for(q.coding)?;

        let mut args = Vec::with_capacity(q.args.len());
        for content in &q.args {
            args.push(unpack(content, codec.as_ref())?);
        }
        let mut kwargs = Vec::with_capacity(q.kwargs.len());
        for (name, content) in &q.kwargs {
            kwargs.push((name.clone(), unpack(content, codec.as_ref())?));
        }

        let plugin = self.plugin.read().await;
        let (route, vars) = plugin.get_route(&q.method, &q.path)?;
        let handler = route.handler.clone();
        let request = RouteRequest {
            args,
            kwargs,
            vars: vars.into_iter().collect(),
        };
        let response = plugin.call_handler(&handler, request)?;
        drop(plugin);

        // Shared-memory slots are rented by the client and only ever live for
        // the duration of its own request (§3 Content, glossary "shared-memory
        // slot"); the servicer has no client-owned slot to write a response
        // into, so a handler's return value always travels inline. Renting and
        // unlinking a server-owned segment here would unlink it before the
        // reply is even sent, racing the client's read.
        let mut packer = Packer::new(
            codec.as_ref(),
            self.compression_level,
            self.min_sm_size,
            self.min_sm_byte,
            None,
        );
        let packed_args = response
            .args
            .iter()
            .map(|v| packer.pack(v))
            .collect::<Result<Vec<_>, _>>()?;
        let packed_kwargs = response
            .kwargs
            .iter()
            .map(|(k, v)| packer.pack(v).map(|c| (k.clone(), c)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PacketA {
            args: packed_args,
            kwargs: packed_kwargs,
        })
    }
}

/// Drains one accepted connection's inbound requests and answers each with
/// `Servicer`'s `HostControl` impl, one concurrent task per request.
pub async fn serve_connection(
    servicer: Arc<Servicer>,
    conn: Connection,
    mut incoming: mpsc::Receiver<(u64, Vec<u8>)>,
) {
    while let Some((id, payload)) = incoming.recv().await {
        let servicer = servicer.clone();
        let conn = conn.clone();
        tokio::spawn(async move {
            match dispatch_host_control(servicer.as_ref(), &payload).await {
                Ok(response) => {
                    let _ = conn.respond(id, response).await;
                }
                Err(e) => tracing::warn!(error = %e, "failed to dispatch request"),
            }
        });
    }
}
