//! The three RPC verbs and their message shapes, plus the typed service
//! generated from them via `rapace::service!`.

use contentpack::Content;
use facet::Facet;

#[derive(Facet, Debug, Clone)]
pub struct HeartbeatQ {
    pub delay: f64,
}

#[derive(Facet, Debug, Clone)]
pub struct HeartbeatA {
    pub ok: bool,
}

#[derive(Facet, Debug, Clone)]
pub struct RegisterQ {
    pub session: String,
    pub args: Vec<String>,
    pub kwargs: Vec<(String, String)>,
    pub test_sm_name: String,
    pub test_sm_pass: Vec<u8>,
}

/// `code`: `0` = success, `1` = plugin has no `on_register`, `2` = the
/// callback ran but raised.
#[derive(Facet, Debug, Clone)]
pub struct RegisterA {
    pub code: i64,
    pub is_sm: bool,
    pub min_sm_size: i64,
    pub min_sm_byte: i64,
}

impl RegisterA {
    pub const SUCCESS: i64 = 0;
    pub const NOT_FOUND_REGISTER_FUNCTION: i64 = 1;
    pub const UNKNOWN: i64 = 2;
}

#[derive(Facet, Debug, Clone)]
pub struct PacketQ {
    pub session: String,
    pub method: String,
    pub path: String,
    pub coding: i64,
    pub args: Vec<Content>,
    pub kwargs: Vec<(String, Content)>,
    pub sm_names: Vec<String>,
}

#[derive(Facet, Debug, Clone)]
pub struct PacketA {
    pub args: Vec<Content>,
    pub kwargs: Vec<(String, Content)>,
}

/// `rapace`'s service dispatch has no generic error frame, so a failed
/// handler call is folded into the typed return value rather than the
/// transport. `Packet` is the only verb that can fail this way (a plugin
/// handler can raise); `Heartbeat` and `Register` never do.
#[derive(Facet, Debug, Clone)]
pub enum PacketOutcome {
    Ok(PacketA),
    Err(String),
}

rapace::service! {
    pub trait HostControl {
        async fn heartbeat(q: HeartbeatQ) -> HeartbeatA;
        async fn register(q: RegisterQ) -> RegisterA;
        async fn packet(q: PacketQ) -> PacketOutcome;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// A `HostControl` impl that doesn't need a loaded plugin, so the wire
    /// round-trip (codec, dispatch, the `PacketOutcome` error-folding) can
    /// be exercised without a dylib.
    struct EchoControl;

    impl HostControl for EchoControl {
        async fn heartbeat(&self, q: HeartbeatQ) -> HeartbeatA {
            HeartbeatA { ok: q.delay >= 0.0 }
        }

        async fn register(&self, q: RegisterQ) -> RegisterA {
            RegisterA {
                code: RegisterA::SUCCESS,
                is_sm: !q.test_sm_name.is_empty(),
                min_sm_size: 1024,
                min_sm_byte: 64 * 1024,
            }
        }

        async fn packet(&self, q: PacketQ) -> PacketOutcome {
            if q.path == "/boom" {
                return PacketOutcome::Err("handler raised".to_string());
            }
            PacketOutcome::Ok(PacketA {
                args: q.args,
                kwargs: q.kwargs,
            })
        }
    }

    async fn wire_up() -> (HostControlClient, tokio::task::JoinHandle<()>) {
        let (client_stream, server_stream) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_stream);
        let (server_read, server_write) = tokio::io::split(server_stream);

        let (client_conn, _client_incoming) = rapace::socket::run(client_read, client_write)
            .await
            .unwrap();
        let (server_conn, mut server_incoming) = rapace::socket::run(server_read, server_write)
            .await
            .unwrap();

        let server = tokio::spawn(async move {
            let control = EchoControl;
            while let Some((id, payload)) = server_incoming.recv().await {
                let response = dispatch_host_control(&control, &payload).await.unwrap();
                let _ = server_conn.respond(id, response).await;
            }
        });

        (HostControlClient::new(client_conn), server)
    }

    #[tokio::test]
    async fn heartbeat_round_trips_over_duplex() {
        let (client, _server) = wire_up().await;
        let ack = client.heartbeat(HeartbeatQ { delay: 0.0 }).await.unwrap();
        assert!(ack.ok);
    }

    #[tokio::test]
    async fn register_round_trips_and_reports_thresholds() {
        let (client, _server) = wire_up().await;
        let ack = client
            .register(RegisterQ {
                session: "s1".to_string(),
                args: vec!["a".to_string()],
                kwargs: vec![],
                test_sm_name: "probe".to_string(),
                test_sm_pass: vec![1, 2, 3],
            })
            .await
            .unwrap();
        assert_eq!(ack.code, RegisterA::SUCCESS);
        assert!(ack.is_sm);
        assert_eq!(ack.min_sm_size, 1024);
    }

    #[tokio::test]
    async fn packet_failure_surfaces_as_outcome_err() {
        let (client, _server) = wire_up().await;
        let outcome = client
            .packet(PacketQ {
                session: "s1".to_string(),
                method: "GET".to_string(),
                path: "/boom".to_string(),
                coding: 0,
                args: vec![],
                kwargs: vec![],
                sm_names: vec![],
            })
            .await
            .unwrap();
        match outcome {
            PacketOutcome::Err(cause) => assert_eq!(cause, "handler raised"),
            PacketOutcome::Ok(_) => panic!("expected an error outcome"),
        }
    }
}
