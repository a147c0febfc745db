use rand::RngCore;

const ZERO_STATE_REPLACEMENT: u32 = 0x9E37_79B9;

/// Marsaglia 32-bit xorshift (13, 17, 5).
///
/// Placement and loot rolls only need a fast, reproducible stream per salt, so this is
/// deliberately not a cryptographic generator. Implements [`RngCore`] so callers get the
/// `rand::Rng` helpers (`gen_range`, `gen_bool`, ...) on top of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    /// A zero seed would lock the generator at zero forever; it is remapped to a fixed
    /// non-zero state.
    pub fn new(seed: u32) -> Self {
        let state = if seed == 0 {
            ZERO_STATE_REPLACEMENT
        } else {
            seed
        };
        Self { state }
    }

    /// Stream for one component: `world_seed XOR salt`.
    pub fn salted(world_seed: u32, salt: u32) -> Self {
        Self::new(world_seed ^ salt)
    }

    pub fn state(&self) -> u32 {
        self.state
    }

    pub fn next_state(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform float in `[0, 1)` built from the top 24 bits.
    pub fn next_unit_f32(&mut self) -> f32 {
        (self.next_state() >> 8) as f32 / (1u32 << 24) as f32
    }
}

impl RngCore for XorShift32 {
    fn next_u32(&mut self) -> u32 {
        self.next_state()
    }

    fn next_u64(&mut self) -> u64 {
        let high = self.next_state() as u64;
        let low = self.next_state() as u64;
        (high << 32) | low
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_state().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
