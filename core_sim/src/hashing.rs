use std::hash::Hasher;

/// A deterministic FNV-1a 64-bit hasher.
///
/// `DefaultHasher` is randomized per process; seeds derived from names and
/// ids must be identical across runs.
#[derive(Debug)]
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}

/// Mix the world seed with a stream label and a salt (entity id, tick).
pub fn stable_seed(world_seed: u64, stream: &str, salt: u64) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write_u64(world_seed);
    hasher.write(stream.as_bytes());
    hasher.write_u64(salt);
    hasher.finish()
}
