//! The three independent session keys.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Directional + control keys for one established session.
///
/// Derived once per handshake, never reused across handshakes, and zeroized
/// both on explicit session teardown and on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// client → agent frames
    pub k_c2a: [u8; 32],
    /// agent → client frames
    pub k_a2c: [u8; 32],
    /// reserved for control-plane AEAD
    pub k_control: [u8; 32],
}

impl SessionKeys {
    pub fn is_zeroed(&self) -> bool {
        let mut acc = 0u8;
        for b in self
            .k_c2a
            .iter()
            .chain(self.k_a2c.iter())
            .chain(self.k_control.iter())
        {
            acc |= b;
        }
        acc == 0
    }
}
