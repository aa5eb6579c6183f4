//! Player input frames sent by clients every tick.

use crate::network::protocol::codec::{Decode, DecodeError, Encode};

/// Sequence number of an input frame. Wraps around.
pub type InputIndex = u8;

/// One frame of player input.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerInputs {
    /// Sequence number, echoed back in state updates for reconciliation.
    pub index: InputIndex,
    /// Movement flags, see the associated constants.
    pub flags: u8,
    /// Camera pitch in degrees.
    pub pitch: f32,
    /// Camera yaw in degrees.
    pub yaw: f32,
}

impl PlayerInputs {
    /// Walk forward.
    pub const MOVE_FORWARD: u8 = 1 << 0;
    /// Walk backward.
    pub const MOVE_BACKWARD: u8 = 1 << 1;
    /// Strafe left.
    pub const MOVE_LEFT: u8 = 1 << 2;
    /// Strafe right.
    pub const MOVE_RIGHT: u8 = 1 << 3;
    /// Jump.
    pub const JUMP: u8 = 1 << 4;
    /// Crouch.
    pub const CROUCH: u8 = 1 << 5;
    /// Sprint while walking.
    pub const SPRINT: u8 = 1 << 6;

    const ALL_FLAGS: u8 = 0x7F;

    /// Returns `true` if every bit of `flag` is set.
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }

    /// Sets or clears `flag`.
    pub fn set(&mut self, flag: u8, enabled: bool) {
        if enabled {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }
}

impl Encode for PlayerInputs {
    fn encode(&self, out: &mut Vec<u8>) {
        self.index.encode(out);
        self.flags.encode(out);
        self.pitch.encode(out);
        self.yaw.encode(out);
    }
}

impl Decode for PlayerInputs {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        let index = u8::decode(inp)?;
        let flags = u8::decode(inp)?;
        if flags & !Self::ALL_FLAGS != 0 {
            return Err(DecodeError::InvalidValue {
                field: "PlayerInputs::flags",
                value: u32::from(flags),
            });
        }
        Ok(Self {
            index,
            flags,
            pitch: f32::decode(inp)?,
            yaw: f32::decode(inp)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::codec::{decode_exact, encode_to_vec};

    #[test]
    fn unknown_flags_are_rejected() {
        let mut inputs = PlayerInputs::default();
        inputs.set(PlayerInputs::MOVE_FORWARD, true);
        inputs.set(PlayerInputs::SPRINT, true);
        let mut bytes = encode_to_vec(&inputs);
        assert_eq!(decode_exact::<PlayerInputs>(&bytes), Ok(inputs));

        bytes[1] |= 0x80;
        assert!(matches!(
            decode_exact::<PlayerInputs>(&bytes),
            Err(DecodeError::InvalidValue { .. })
        ));
    }
}
