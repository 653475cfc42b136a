//! Packs argument `Value`s into wire `Content`, transparently spilling
//! large/arrayed values into shared-memory slots; and the inverse.

use std::io::{Read, Write};

use facet::Facet;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use hosterr::HostError;
use hostproto::Value;
use rapace::shm::SharedMemory;

/// Array shape/dtype/stride metadata carried alongside a `Content`, so the
/// peer can reconstruct an `NdArray` without re-inspecting the payload.
#[derive(Debug, Clone, PartialEq, Facet)]
pub struct ArrayMeta {
    pub shape: Vec<u64>,
    pub dtype: String,
    pub strides: Vec<i64>,
}

/// The wire primitive for one argument value: either inline bytes or a
/// shared-memory reference (`sm_name` non-empty), optionally with array
/// metadata. Matches the flat shape on the wire (`§6`).
#[derive(Debug, Clone, Facet)]
pub struct Content {
    pub data: Vec<u8>,
    pub sm_name: String,
    pub size: u64,
    pub array: Option<ArrayMeta>,
}

impl Content {
    pub fn is_shm(&self) -> bool {
        !self.sm_name.is_empty()
    }
}

/// A pluggable argument-value codec.
pub trait Codec: Send + Sync {
    /// Wire identifier sent in `PacketQ.coding` so the peer picks the same
    /// codec to decode with.
    fn id(&self) -> u8;
    fn encode(&self, value: &Value, level: u32) -> Result<Vec<u8>, HostError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, HostError>;
}

/// The default codec: msgpack for shape, zlib for size.
pub struct MsgpackZlib;

impl Codec for MsgpackZlib {
    fn id(&self) -> u8 {
        0
    }

    fn encode(&self, value: &Value, level: u32) -> Result<Vec<u8>, HostError> {
        let packed = rmp_serde::to_vec(value)
            .map_err(|e| HostError::Transport(format!("msgpack encode failed: {e}")))?;
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
        enc.write_all(&packed)
            .map_err(|e| HostError::Transport(format!("zlib compress failed: {e}")))?;
        enc.finish()
            .map_err(|e| HostError::Transport(format!("zlib compress failed: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, HostError> {
        let mut dec = ZlibDecoder::new(bytes);
        let mut raw = Vec::new();
        dec.read_to_end(&mut raw)
            .map_err(|e| HostError::Transport(format!("zlib decompress failed: {e}")))?;
        rmp_serde::from_slice(&raw)
            .map_err(|e| HostError::Transport(format!("msgpack decode failed: {e}")))
    }
}

/// The identity codec, used for the register handshake's raw probe bytes.
pub struct Raw;

impl Codec for Raw {
    fn id(&self) -> u8 {
        1
    }

    fn encode(&self, value: &Value, _level: u32) -> Result<Vec<u8>, HostError> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Str(s) => Ok(s.clone().into_bytes()),
            other => rmp_serde::to_vec(other)
                .map_err(|e| HostError::Transport(format!("raw-codec fallback encode: {e}"))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, HostError> {
        Ok(Value::Bytes(bytes.to_vec()))
    }
}

pub fn codec_by_id(id: u8) -> Result<Box<dyn Codec>, HostError> {
    match id {
        0 => Ok(Box::new(MsgpackZlib)),
        1 => Ok(Box::new(Raw)),
        other => Err(HostError::Transport(format!("unknown codec id {other}"))),
    }
}

/// A scoped set of shared-memory slots rented for exactly one request; all
/// slots are released (unmapped/unlinked) when this is dropped.
pub struct SlotLease {
    slots: Vec<(String, SharedMemory)>,
}

impl SlotLease {
    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(|(name, _)| name.clone()).collect()
    }

    fn write(&self, index: usize, data: &[u8]) -> Result<(), HostError> {
        let (name, mem) = &self.slots[index];
        if data.len() > mem.size() {
            return Err(HostError::ShmProtocol(format!(
                "slot {name} is {} bytes, payload is {}",
                mem.size(),
                data.len()
            )));
        }
        mem.bytes_mut()[..data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// `SharedMemoryPool` collaborator: rents scoped slot handles and validates
/// the register handshake's shared-memory probe pair.
pub trait SharedMemoryPool: Send + Sync {
    fn rent(&self, count: usize, bytes_each: usize) -> Result<SlotLease, HostError>;
    fn validate(&self, name: &str, expected: &[u8]) -> bool;
}

/// Rents plain named POSIX shared-memory segments (`rapace::shm::SharedMemory`)
/// sized for the caller's worst case.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShmPool;

impl SharedMemoryPool for ShmPool {
    fn rent(&self, count: usize, bytes_each: usize) -> Result<SlotLease, HostError> {
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            let mem = SharedMemory::create(bytes_each)
                .map_err(|e| HostError::Transport(format!("shm rent failed: {e}")))?;
            let name = mem.name().to_string();
            slots.push((name, mem));
        }
        Ok(SlotLease { slots })
    }

    fn validate(&self, name: &str, expected: &[u8]) -> bool {
        match read_named_segment(name, expected.len()) {
            Ok(bytes) => bytes == expected,
            Err(_) => false,
        }
    }
}

/// Opens an existing named shared-memory segment (created by the peer) and
/// reads back `size` bytes. Does not take ownership: unlinking remains the
/// creating process's responsibility (`SharedMemory`'s `Drop` only unlinks
/// segments whose name carries its own pid prefix).
pub fn read_named_segment(name: &str, size: usize) -> Result<Vec<u8>, HostError> {
    let mem = SharedMemory::open(name, size)
        .map_err(|e| HostError::ShmProtocol(format!("failed to open slot {name}: {e}")))?;
    Ok(mem.bytes()[..size].to_vec())
}

/// Writes `data` into an existing named segment created by the peer (used by
/// the register handshake, and by a servicer writing a response value into a
/// slot the client already rented for this exchange).
pub fn write_named_segment(name: &str, data: &[u8]) -> Result<(), HostError> {
    let mem = SharedMemory::open(name, data.len())
        .map_err(|e| HostError::ShmProtocol(format!("failed to open slot {name}: {e}")))?;
    mem.bytes_mut()[..data.len()].copy_from_slice(data);
    Ok(())
}

/// Converts `(args, kwargs)` values into wire `Content`, deciding per value
/// whether to inline or spill into a rented shared-memory slot.
pub struct Packer<'a> {
    codec: &'a dyn Codec,
    level: u32,
    min_sm_size: u64,
    min_sm_byte: u64,
    lease: Option<&'a SlotLease>,
    next_slot: usize,
}

impl<'a> Packer<'a> {
    pub fn new(
        codec: &'a dyn Codec,
        level: u32,
        min_sm_size: u64,
        min_sm_byte: u64,
        lease: Option<&'a SlotLease>,
    ) -> Self {
        Self {
            codec,
            level,
            min_sm_size,
            min_sm_byte,
            lease,
            next_slot: 0,
        }
    }

    /// Packs one value, spilling to the next free rented slot if it is an
    /// array over threshold and a lease with remaining capacity is present.
    pub fn pack(&mut self, value: &Value) -> Result<Content, HostError> {
        if let Value::NdArray {
            shape,
            dtype,
            strides,
            data,
        } = value
        {
            let (elems, bytes) = value.size_hint();
            let over_threshold = elems >= self.min_sm_size && bytes >= self.min_sm_byte;
            if over_threshold {
                if let Some(lease) = self.lease {
                    if self.next_slot < lease.len() {
                        let index = self.next_slot;
                        self.next_slot += 1;
                        lease.write(index, data)?;
                        let name = lease.names()[index].clone();
                        return Ok(Content {
                            data: Vec::new(),
                            sm_name: name,
                            size: data.len() as u64,
                            array: Some(ArrayMeta {
                                shape: shape.clone(),
                                dtype: dtype.clone(),
                                strides: strides.clone(),
                            }),
                        });
                    }
                }
            }
        }

        let array = match value {
            Value::NdArray {
                shape,
                dtype,
                strides,
                ..
            } => Some(ArrayMeta {
                shape: shape.clone(),
                dtype: dtype.clone(),
                strides: strides.clone(),
            }),
            _ => None,
        };
        let data = self.codec.encode(value, self.level)?;
        Ok(Content {
            data,
            sm_name: String::new(),
            size: 0,
            array,
        })
    }

    /// Slot names this packer actually used, in rental order. The caller
    /// must set `sm_names` on the wire message to exactly this set.
    pub fn used_slot_names(&self) -> Vec<String> {
        self.lease
            .map(|lease| lease.names()[..self.next_slot].to_vec())
            .unwrap_or_default()
    }
}

/// The inverse of `Packer`: decodes a `Content` back into a `Value`.
pub fn unpack(content: &Content, codec: &dyn Codec) -> Result<Value, HostError> {
    if content.is_shm() {
        let bytes = read_named_segment(&content.sm_name, content.size as usize)?;
        return Ok(match &content.array {
            Some(meta) => Value::NdArray {
                shape: meta.shape.clone(),
                dtype: meta.dtype.clone(),
                strides: meta.strides.clone(),
                data: bytes,
            },
            None => Value::Bytes(bytes),
        });
    }
    codec.decode(&content.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msgpack_zlib_round_trips_scalars() {
        let codec = MsgpackZlib;
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Int(-7),
            Value::Str("pong".into()),
        ] {
            let encoded = codec.encode(&v, 6).unwrap();
            assert_eq!(codec.decode(&encoded).unwrap(), v);
        }
    }

    #[test]
    fn pack_inline_without_lease_round_trips() {
        let codec = MsgpackZlib;
        let mut packer = Packer::new(&codec, 6, 1024, 65536, None);
        let content = packer.pack(&Value::Str("hello".into())).unwrap();
        assert!(!content.is_shm());
        assert_eq!(unpack(&content, &codec).unwrap(), Value::Str("hello".into()));
        assert!(packer.used_slot_names().is_empty());
    }

    #[test]
    fn pack_small_array_stays_inline() {
        let codec = MsgpackZlib;
        let pool = ShmPool;
        let lease = pool.rent(2, 4096).unwrap();
        let mut packer = Packer::new(&codec, 6, 1024, 65536, Some(&lease));
        let small = Value::NdArray {
            shape: vec![2],
            dtype: "f32".into(),
            strides: vec![4],
            data: vec![0u8; 8],
        };
        let content = packer.pack(&small).unwrap();
        assert!(!content.is_shm());
        assert!(packer.used_slot_names().is_empty());
    }

    #[test]
    fn pack_large_array_spills_to_shm_and_round_trips() {
        let codec = MsgpackZlib;
        let pool = ShmPool;
        let lease = pool.rent(1, 1 << 20).unwrap();
        let mut packer = Packer::new(&codec, 6, 4, 100, Some(&lease));
        let big = Value::NdArray {
            shape: vec![4, 4],
            dtype: "f64".into(),
            strides: vec![32, 8],
            data: vec![7u8; 128],
        };
        let content = packer.pack(&big).unwrap();
        assert!(content.is_shm());
        assert_eq!(packer.used_slot_names(), lease.names());
        let decoded = unpack(&content, &codec).unwrap();
        assert_eq!(decoded, big);
    }

    #[test]
    fn register_probe_validates_round_trip() {
        let pool = ShmPool;
        let lease = pool.rent(1, 64).unwrap();
        let name = &lease.names()[0];
        write_named_segment(name, b"probe-bytes").unwrap();
        assert!(pool.validate(name, b"probe-bytes"));
        assert!(!pool.validate(name, b"wrong-bytes"));
    }
}
