//! Value and lifecycle payload types shared across the plugin FFI boundary.
//!
//! A plugin crosses an FFI boundary via `plugcard`, so every type here derives
//! `serde`/`postcard_schema` rather than anything host-process-only. Plugin
//! authors write route handlers in terms of `Value`, never in terms of the
//! wire `Content` representation (which lives in `contentpack` and is decoded
//! into `Value` before a handler ever runs).

use serde::{Deserialize, Serialize};

/// A loosely typed argument or return value.
///
/// Mirrors what a dynamically typed language hands a plugin: numbers, text,
/// bytes, nested collections, and raw N-dimensional buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, postcard_schema::Schema)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(String, Value)>),
    /// A raw N-dimensional buffer, as spilled through shared memory or inlined
    /// with its shape preserved. `data` is the row-major bytes of the array.
    NdArray {
        shape: Vec<u64>,
        dtype: String,
        strides: Vec<i64>,
        data: Vec<u8>,
    },
}

impl Value {
    /// Element count and raw byte length, used to decide shared-memory spill
    /// thresholds. Scalars and strings/bytes report their own byte length as
    /// both dimensions; only `NdArray` has a meaningful element count.
    pub fn size_hint(&self) -> (u64, u64) {
        match self {
            Value::NdArray { shape, data, .. } => {
                let elems = shape.iter().product::<u64>().max(1);
                (elems, data.len() as u64)
            }
            Value::Bytes(b) => (b.len() as u64, b.len() as u64),
            Value::Str(s) => (s.len() as u64, s.len() as u64),
            _ => (0, 0),
        }
    }
}

/// One route declared by a plugin's `on_routes` hook: method, path template,
/// and the name of the plugcard method that implements it.
#[derive(Debug, Clone, Serialize, Deserialize, postcard_schema::Schema)]
pub struct RouteDecl {
    pub method: String,
    pub path: String,
    pub handler: String,
}

/// Argument envelope passed into a route handler: unpacked args/kwargs plus
/// the path template's captured variables, merged in as extra keyword args.
#[derive(Debug, Clone, Default, Serialize, Deserialize, postcard_schema::Schema)]
pub struct RouteRequest {
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
    pub vars: Vec<(String, String)>,
}

/// Return envelope from a route handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, postcard_schema::Schema)]
pub struct RouteResponse {
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

/// Argument envelope passed to `on_register`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, postcard_schema::Schema)]
pub struct RegisterRequest {
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

/// What `on_register` hands back. A plugin that only cares about being
/// notified returns the unit/zero shape; one that wants to raise the
/// shared-memory thresholds fills in `min_sm_size`/`min_sm_byte`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, postcard_schema::Schema)]
pub struct RegisterResponse {
    pub min_sm_size: i64,
    pub min_sm_byte: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_hint_scalar_is_zero() {
        assert_eq!(Value::Int(5).size_hint(), (0, 0));
    }

    #[test]
    fn size_hint_ndarray_counts_elements() {
        let v = Value::NdArray {
            shape: vec![2, 3],
            dtype: "f32".into(),
            strides: vec![12, 4],
            data: vec![0u8; 24],
        };
        assert_eq!(v.size_hint(), (6, 24));
    }
}
