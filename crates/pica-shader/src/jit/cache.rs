//! Content-keyed cache of compiled entrypoints.
//!
//! A program's identity is its code words, its operand-descriptor table,
//! and its entry offset; uniforms are runtime inputs and deliberately not
//! part of the key.

use std::collections::HashMap;

use crate::setup::ShaderSetup;

use super::EntryPoint;

fn hash64(bytes: &[u8]) -> u64 {
    let hash = blake3::hash(bytes);
    u64::from_le_bytes(
        hash.as_bytes()[..8]
            .try_into()
            .expect("blake3 hashes are 32 bytes"),
    )
}

/// 64-bit fingerprint of everything that affects compilation. XOR
/// composition is sound here because each half is already
/// collision-resistant over an emulator session.
pub fn program_fingerprint(setup: &ShaderSetup) -> u64 {
    hash64(bytemuck::cast_slice(&setup.program_code))
        ^ hash64(bytemuck::cast_slice(&setup.swizzle_data))
        ^ u64::from(setup.entry_point)
}

/// Fingerprint-to-entrypoint map. Entries are immutable once inserted and
/// stay valid until [`ShaderCache::clear`], which the owner pairs with a
/// code-region reset.
#[derive(Debug, Default)]
pub struct ShaderCache {
    map: HashMap<u64, EntryPoint>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: u64) -> Option<EntryPoint> {
        self.map.get(&fingerprint).copied()
    }

    pub fn insert(&mut self, fingerprint: u64, entry: EntryPoint) {
        self.map.insert(fingerprint, entry);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
