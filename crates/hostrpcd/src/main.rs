//! Entry point for the three operator-facing subcommands: `server`,
//! `client`, `modules`.

mod args;
mod config;

use std::time::Duration;

use args::{ClientVerb, Command};
use hostproto::Value;
use hostrpc::{Address, Client, Servicer, self_verify, serve_connection};
use plughost::PluginHandle;
use tokio::net::{TcpListener, UnixListener};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let command = args::parse().map_err(|e| eyre::eyre!(e))?;
    match command {
        Command::Server(a) => run_server(a).await,
        Command::Client(a) => run_client(a).await,
        Command::Modules(a) => run_modules(a).await,
    }
}

async fn run_server(a: args::ServerArgs) -> eyre::Result<()> {
    let file = config::load_file_config(a.config.as_deref())?;
    let resolved = config::resolve_server_config(file, a.bind, a.module_name, a.module_path)?;

    tracing::info!(module = %resolved.bind.module_name, path = %resolved.module_path, "loading plugin");
    let plugin = unsafe { PluginHandle::load(resolved.bind.module_name.clone(), &resolved.module_path) }
        .map_err(|e| eyre::eyre!(e.to_string()))?;
    let servicer = Servicer::new(plugin);
    servicer.open().await.map_err(|e| eyre::eyre!(e.to_string()))?;

    match &resolved.bind.address {
        Address::Tcp { host, port } => {
            let listener = TcpListener::bind((host.as_str(), *port)).await?;
            tracing::info!(host, port, "listening");
            spawn_accept_loop_tcp(listener, servicer.clone());
        }
        Address::Unix { path } => {
            let _ = std::fs::remove_file(path);
            let listener = UnixListener::bind(path)?;
            tracing::info!(path, "listening");
            spawn_accept_loop_unix(listener, servicer.clone());
        }
        Address::UnixAbstract { name } => {
            return Err(eyre::eyre!(
                "abstract unix sockets are not yet supported (requested '{name}')"
            ));
        }
    }

    servicer.start_serving().await.map_err(|e| eyre::eyre!(e.to_string()))?;

    let address = resolved.bind.address.clone();
    tokio::spawn(async move {
        if !self_verify(&address).await {
            tracing::warn!("boot self-verification failed; continuing to serve anyway");
        } else {
            tracing::info!("boot self-verification succeeded");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    servicer.stop().await.map_err(|e| eyre::eyre!(e.to_string()))?;
    Ok(())
}

fn spawn_accept_loop_tcp(listener: TcpListener, servicer: std::sync::Arc<Servicer>) {
    tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let servicer = servicer.clone();
            tokio::spawn(async move {
                let (read, write) = stream.into_split();
                match rapace::socket::run(read, write).await {
                    Ok((conn, incoming)) => {
                        tracing::debug!(%peer, "connection accepted");
                        serve_connection(servicer, conn, incoming).await;
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to set up connection"),
                }
            });
        }
    });
}

fn spawn_accept_loop_unix(listener: UnixListener, servicer: std::sync::Arc<Servicer>) {
    tokio::spawn(async move {
        loop {
            let (stream, _addr) = match listener.accept().await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let servicer = servicer.clone();
            tokio::spawn(async move {
                let (read, write) = stream.into_split();
                match rapace::socket::run(read, write).await {
                    Ok((conn, incoming)) => serve_connection(servicer, conn, incoming).await,
                    Err(e) => tracing::warn!(error = %e, "failed to set up connection"),
                }
            });
        }
    });
}

async fn run_client(a: args::ClientArgs) -> eyre::Result<()> {
    let address = hostrpc::parse_address(&a.bind).map_err(|e| eyre::eyre!(e.to_string()))?;
    let mut client = Client::open(&address, Duration::from_secs(5))
        .await
        .map_err(|e| eyre::eyre!(e.to_string()))?;

    match a.verb {
        ClientVerb::Heartbeat(h) => {
            let ok = client.heartbeat(h.delay).await.map_err(|e| eyre::eyre!(e.to_string()))?;
            println!("heartbeat ok={ok}");
        }
        ClientVerb::Register(r) => {
            let (positional, kwargs) = args::split_tokens(&r.tokens);
            client
                .register(positional, kwargs)
                .await
                .map_err(|e| eyre::eyre!(e.to_string()))?;
            let negotiation = client.negotiation();
            println!(
                "registered session={} shared_memory_active={} min_sm_size={} min_sm_byte={}",
                client.session(),
                negotiation.is_active(),
                negotiation.min_sm_size,
                negotiation.min_sm_byte
            );
        }
        ClientVerb::Request(r) => {
            let (positional, string_kwargs) = args::split_tokens(&r.tokens);
            client
                .register(Vec::new(), Vec::new())
                .await
                .map_err(|e| eyre::eyre!(e.to_string()))?;
            let args: Vec<Value> = positional.into_iter().map(Value::Str).collect();
            let kwargs: Vec<(String, Value)> = string_kwargs
                .into_iter()
                .map(|(k, v)| (k, Value::Str(v)))
                .collect();
            let response = client
                .request(&r.method, &r.path, args, kwargs)
                .await
                .map_err(|e| eyre::eyre!(e.to_string()))?;
            println!("{response:?}");
        }
    }

    client.close();
    Ok(())
}

async fn run_modules(a: args::ModulesArgs) -> eyre::Result<()> {
    let module_name = a.module_name.unwrap_or_else(|| "plugin".to_string());
    let mut plugin = unsafe { PluginHandle::load(module_name, &a.module_path) }
        .map_err(|e| eyre::eyre!(e.to_string()))?;
    let caps = plugin.capabilities();

    println!("module: {}", plugin.module_name());
    println!("version: {}", plugin.version().unwrap_or_else(|| "<none>".to_string()));
    println!("doc: {}", plugin.doc().unwrap_or_else(|| "<none>".to_string()));
    println!("capabilities:");
    println!("  on_open:     {}", caps.has_on_open);
    println!("  on_close:    {}", caps.has_on_close);
    println!("  on_register: {}", caps.has_on_register);
    println!("  on_routes:   {}", caps.has_on_routes);

    // Running `open()` is the only way to pull the route table out of a
    // plugin (it's built from `on_routes` at open time); this inspector
    // pays that cost and closes again immediately rather than serving.
    if caps.has_on_routes {
        plugin.open().map_err(|e| eyre::eyre!(e.to_string()))?;
        println!("routes:");
        for route in plugin.routes() {
            println!("  {} {} -> {}", route.method, route.path, route.handler);
        }
        plugin.close().map_err(|e| eyre::eyre!(e.to_string()))?;
    }

    Ok(())
}
