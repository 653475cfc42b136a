//! A minimal plugin: one route, `GET /ping` -> `"pong"`, plus every
//! optional lifecycle hook so it can double as a smoke test for capability
//! reflection.

use hostproto::{RegisterRequest, RegisterResponse, RouteDecl, RouteRequest, RouteResponse, Value};
use plugcard::plugcard;

#[plugcard]
pub fn on_open() {}

#[plugcard]
pub fn on_close() {}

#[plugcard]
pub fn on_register(req: RegisterRequest) -> RegisterResponse {
    let _ = req;
    RegisterResponse {
        min_sm_size: 1024,
        min_sm_byte: 64 * 1024,
    }
}

#[plugcard]
pub fn on_routes() -> Vec<RouteDecl> {
    vec![RouteDecl {
        method: "GET".to_string(),
        path: "/ping".to_string(),
        handler: "ping".to_string(),
    }]
}

#[plugcard]
pub fn ping(req: RouteRequest) -> RouteResponse {
    let _ = req;
    RouteResponse {
        args: vec![Value::Str("pong".to_string())],
        kwargs: vec![],
    }
}

#[plugcard]
pub fn __version__() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[plugcard]
pub fn __doc__() -> String {
    "echoes pong on GET /ping".to_string()
}

plugcard::export_plugin!();
