//! World entities.
//!
//! Entities are plain data stored in a per-environment [`HandleMap`](crate::core::HandleMap).
//! Anything holding an [`EntityHandle`] must expect it to stop resolving once the
//! entity was destroyed.

use cgmath::{Deg, InnerSpace, Quaternion, Rotation, Rotation3, Vector3, Zero};

use crate::core::Handle;

use super::players::{player_inputs::PlayerInputs, PlayerIndex};

/// Handle to an entity of an environment.
pub type EntityHandle = Handle;

/// Walking speed of a player character, in units per second.
pub const CHARACTER_WALK_SPEED: f32 = 4.0;

/// Speed multiplier applied while sprinting.
pub const CHARACTER_SPRINT_FACTOR: f32 = 2.0;

/// Something that exists in an environment.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldEntity {
    /// Position in environment space.
    pub position: Vector3<f32>,
    /// Orientation.
    pub rotation: Quaternion<f32>,
    /// Velocity, applied every tick while `is_moving` is set.
    pub velocity: Vector3<f32>,
    /// Moving entities are integrated every tick and included in state updates.
    pub is_moving: bool,
    /// Player controlling the entity, if any.
    pub controlling_player: Option<PlayerIndex>,
    /// Camera pitch of a controlled character, in degrees.
    pub camera_pitch: f32,
    /// Camera yaw of a controlled character, in degrees.
    pub camera_yaw: f32,
    /// Whether sessions are told about the entity.
    pub replicated: bool,
}

impl WorldEntity {
    /// A static, replicated entity.
    pub fn new(position: Vector3<f32>, rotation: Quaternion<f32>) -> Self {
        Self {
            position,
            rotation,
            velocity: Vector3::zero(),
            is_moving: false,
            controlling_player: None,
            camera_pitch: 0.0,
            camera_yaw: 0.0,
            replicated: true,
        }
    }

    /// A moving character controlled by `player`.
    pub fn character(position: Vector3<f32>, rotation: Quaternion<f32>, player: PlayerIndex) -> Self {
        Self {
            is_moving: true,
            controlling_player: Some(player),
            ..Self::new(position, rotation)
        }
    }

    /// An entity never sent to clients, such as an environment root.
    pub fn hidden(position: Vector3<f32>) -> Self {
        Self {
            replicated: false,
            ..Self::new(position, Quaternion::new(1.0, 0.0, 0.0, 0.0))
        }
    }

    /// Advances the entity by `dt` seconds.
    pub fn integrate(&mut self, dt: f32) {
        if self.is_moving {
            self.position += self.velocity * dt;
        }
    }

    /// Applies one frame of player input.
    ///
    /// The character turns to the input yaw; movement flags are taken relative to
    /// that heading, with jump and crouch moving it up and down.
    pub fn apply_inputs(&mut self, inputs: &PlayerInputs) {
        self.camera_pitch = inputs.pitch.clamp(-89.0, 89.0);
        self.camera_yaw = inputs.yaw;
        self.rotation = Quaternion::from_angle_y(Deg(inputs.yaw));

        let mut direction = Vector3::zero();
        if inputs.has(PlayerInputs::MOVE_FORWARD) {
            direction.z -= 1.0;
        }
        if inputs.has(PlayerInputs::MOVE_BACKWARD) {
            direction.z += 1.0;
        }
        if inputs.has(PlayerInputs::MOVE_LEFT) {
            direction.x -= 1.0;
        }
        if inputs.has(PlayerInputs::MOVE_RIGHT) {
            direction.x += 1.0;
        }
        if inputs.has(PlayerInputs::JUMP) {
            direction.y += 1.0;
        }
        if inputs.has(PlayerInputs::CROUCH) {
            direction.y -= 1.0;
        }

        if direction.magnitude2() == 0.0 {
            self.velocity = Vector3::zero();
            return;
        }

        let mut speed = CHARACTER_WALK_SPEED;
        if inputs.has(PlayerInputs::SPRINT) {
            speed *= CHARACTER_SPRINT_FACTOR;
        }
        self.velocity = self.rotation.rotate_vector(direction.normalize()) * speed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(flags: u8, yaw: f32) -> PlayerInputs {
        PlayerInputs {
            index: 0,
            flags,
            pitch: 0.0,
            yaw,
        }
    }

    fn close(a: Vector3<f32>, b: Vector3<f32>) -> bool {
        (a - b).magnitude() < 1e-4
    }

    #[test]
    fn forward_follows_yaw() {
        let mut entity = WorldEntity::character(Vector3::zero(), Quaternion::new(1.0, 0.0, 0.0, 0.0), 0);
        entity.apply_inputs(&inputs(PlayerInputs::MOVE_FORWARD, 0.0));
        assert!(close(entity.velocity, Vector3::new(0.0, 0.0, -CHARACTER_WALK_SPEED)));

        entity.apply_inputs(&inputs(PlayerInputs::MOVE_FORWARD, 90.0));
        assert!(close(entity.velocity, Vector3::new(-CHARACTER_WALK_SPEED, 0.0, 0.0)));
        assert_eq!(entity.camera_yaw, 90.0);
    }

    #[test]
    fn sprint_doubles_speed_and_no_input_stops() {
        let mut entity = WorldEntity::character(Vector3::zero(), Quaternion::new(1.0, 0.0, 0.0, 0.0), 0);
        entity.apply_inputs(&inputs(PlayerInputs::MOVE_RIGHT | PlayerInputs::SPRINT, 0.0));
        assert!(close(
            entity.velocity,
            Vector3::new(CHARACTER_WALK_SPEED * CHARACTER_SPRINT_FACTOR, 0.0, 0.0)
        ));

        entity.integrate(0.5);
        assert!(close(entity.position, Vector3::new(4.0, 0.0, 0.0)));

        entity.apply_inputs(&inputs(0, 0.0));
        assert_eq!(entity.velocity, Vector3::zero());
    }

    #[test]
    fn static_entities_do_not_move() {
        let mut entity = WorldEntity::new(Vector3::zero(), Quaternion::new(1.0, 0.0, 0.0, 0.0));
        entity.velocity = Vector3::new(1.0, 0.0, 0.0);
        entity.integrate(1.0);
        assert_eq!(entity.position, Vector3::zero());
    }
}
