//! Movement input sanitation and server-side validation.
//!
//! The network stage only authenticates; everything that can change game
//! state happens here, on the tick thread. Bad candidates produce a
//! PositionCorrection with a machine-readable reason and no state change.

use flyagain_protocol::messages::MovementInput;

use crate::entity::{InputState, PlayerEntity};

pub const WALK_SPEED: f32 = 5.0;
pub const FLY_SPEED: f32 = 8.0;
pub const DEX_SPEED_BONUS: f32 = 0.05;

pub const WORLD_MIN_XZ: f32 = -100.0;
pub const WORLD_MAX_XZ: f32 = 10_100.0;
pub const WORLD_MIN_Y: f32 = -10.0;
pub const WORLD_MAX_Y: f32 = 500.0;
/// Inclusive ceiling for players on foot.
pub const WALK_MAX_Y: f32 = 1.0;

const SPEED_TOLERANCE: f32 = 1.5;
const MIN_CHECKED_DISTANCE: f32 = 0.1;
const UNIT_TOLERANCE: f32 = 1.0e-4;

/// Reason codes carried in PositionCorrection frames.
pub mod reason {
    pub const NOT_FINITE: &str = "not_finite";
    pub const OUT_OF_BOUNDS: &str = "out_of_bounds";
    pub const NO_FLY: &str = "no_fly";
    pub const TOO_FAST: &str = "too_fast";
}

/// Sanitize a raw movement frame into the entity's input state.
/// Over-unit direction vectors are renormalized; non-finite input is
/// rejected outright.
pub fn sanitize_input(input: &MovementInput) -> Result<InputState, &'static str> {
    let components = [input.dx, input.dy, input.dz, input.rotation];
    if components.iter().any(|c| !c.is_finite()) {
        return Err(reason::NOT_FINITE);
    }

    let (mut dx, mut dy, mut dz) = (input.dx, input.dy, input.dz);
    let len = (dx * dx + dy * dy + dz * dz).sqrt();
    if len > 1.0 + UNIT_TOLERANCE {
        dx /= len;
        dy /= len;
        dz /= len;
    }

    Ok(InputState {
        dx,
        dy,
        dz,
        moving: input.moving,
        flying: input.flying,
    })
}

/// Record sanitized input on the entity. A flight transition dirties the
/// entity so the next snapshot captures it.
pub fn apply_input(player: &mut PlayerEntity, input: InputState, rotation: f32) {
    if player.input.flying != input.flying {
        player.dirty = true;
    }
    player.input = input;
    player.rotation = rotation;
}

pub fn max_speed(player: &PlayerEntity) -> f32 {
    let base = if player.input.flying {
        FLY_SPEED
    } else {
        WALK_SPEED
    };
    base + player.dexterity as f32 * DEX_SPEED_BONUS
}

pub enum MoveOutcome {
    /// Committed; old position returned for the grid update.
    Moved { old_x: f32, old_z: f32 },
    /// Candidate refused; entity untouched.
    Rejected(&'static str),
    Idle,
}

/// Advance one entity by one tick worth of its current input.
pub fn apply_movement(player: &mut PlayerEntity, dt_ms: u64) -> MoveOutcome {
    if !player.input.moving || !player.alive() {
        return MoveOutcome::Idle;
    }

    let dt = dt_ms as f32 / 1_000.0;
    let speed = max_speed(player);
    let candidate = (
        player.x + player.input.dx * speed * dt,
        player.y + player.input.dy * speed * dt,
        player.z + player.input.dz * speed * dt,
    );

    if let Err(why) = validate_candidate(player, candidate, speed, dt) {
        return MoveOutcome::Rejected(why);
    }

    let (old_x, old_z) = (player.x, player.z);
    player.x = candidate.0;
    player.y = candidate.1;
    player.z = candidate.2;
    player.dirty = true;
    MoveOutcome::Moved { old_x, old_z }
}

fn validate_candidate(
    player: &PlayerEntity,
    candidate: (f32, f32, f32),
    speed: f32,
    dt: f32,
) -> Result<(), &'static str> {
    let (x, y, z) = candidate;
    if !x.is_finite() || !y.is_finite() || !z.is_finite() {
        return Err(reason::NOT_FINITE);
    }
    if !(WORLD_MIN_XZ..=WORLD_MAX_XZ).contains(&x) || !(WORLD_MIN_XZ..=WORLD_MAX_XZ).contains(&z) {
        return Err(reason::OUT_OF_BOUNDS);
    }
    if !(WORLD_MIN_Y..=WORLD_MAX_Y).contains(&y) {
        return Err(reason::OUT_OF_BOUNDS);
    }
    if !player.input.flying && y > WALK_MAX_Y {
        return Err(reason::NO_FLY);
    }

    let travelled = player.distance_to(x, y, z);
    if travelled > MIN_CHECKED_DISTANCE && travelled > speed * dt * SPEED_TOLERANCE {
        return Err(reason::TOO_FAST);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flyagain_protocol::messages::CharacterRecord;

    use crate::connection::ConnectionHandle;

    fn player_at(x: f32, y: f32, z: f32) -> PlayerEntity {
        let record = CharacterRecord {
            id: 1,
            account_id: 1,
            level: 1,
            hp: 100,
            max_hp: 100,
            x,
            y,
            z,
            // Dexterity 0 keeps walk speed at exactly 5 units/s.
            ..Default::default()
        };
        let (conn, _rx) = ConnectionHandle::new_for_test();
        PlayerEntity::from_record(1, &record, "sid".into(), 0, conn, 0)
    }

    fn input(dx: f32, dy: f32, dz: f32, moving: bool, flying: bool) -> MovementInput {
        MovementInput {
            dx,
            dy,
            dz,
            rotation: 0.0,
            moving,
            flying,
        }
    }

    #[test]
    fn test_one_tick_straight_walk() {
        let mut player = player_at(500.0, 0.0, 500.0);
        apply_input(
            &mut player,
            sanitize_input(&input(1.0, 0.0, 0.0, true, false)).unwrap(),
            0.0,
        );
        match apply_movement(&mut player, 50) {
            MoveOutcome::Moved { .. } => {}
            _ => panic!("expected movement"),
        }
        // 5 units/s over 50 ms.
        assert!((player.x - 500.25).abs() < 1e-4);
        assert_eq!(player.y, 0.0);
        assert_eq!(player.z, 500.0);
        assert!(player.dirty);
    }

    #[test]
    fn test_oversized_direction_renormalized() {
        let state = sanitize_input(&input(1_000.0, 0.0, 0.0, true, false)).unwrap();
        assert!((state.dx - 1.0).abs() < 1e-5);

        let mut player = player_at(500.0, 0.0, 500.0);
        apply_input(&mut player, state, 0.0);
        apply_movement(&mut player, 50);
        // Advances at speed, not at 1000x.
        assert!((player.x - 500.25).abs() < 1e-4);
    }

    #[test]
    fn test_unit_direction_untouched() {
        let state = sanitize_input(&input(0.6, 0.0, 0.8, true, false)).unwrap();
        assert_eq!((state.dx, state.dz), (0.6, 0.8));
    }

    #[test]
    fn test_non_finite_input_rejected() {
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            assert!(sanitize_input(&input(bad, 0.0, 0.0, true, false)).is_err());
        }
        let mut nan_rotation = input(1.0, 0.0, 0.0, true, false);
        nan_rotation.rotation = f32::NAN;
        assert!(sanitize_input(&nan_rotation).is_err());
    }

    #[test]
    fn test_walker_cannot_rise_above_ceiling() {
        let mut player = player_at(500.0, 0.9, 500.0);
        apply_input(
            &mut player,
            sanitize_input(&input(0.0, 1.0, 0.0, true, false)).unwrap(),
            0.0,
        );
        match apply_movement(&mut player, 50) {
            MoveOutcome::Rejected(why) => assert_eq!(why, reason::NO_FLY),
            _ => panic!("expected rejection"),
        }
        // Position unchanged on failure.
        assert_eq!(player.y, 0.9);
    }

    #[test]
    fn test_walker_may_stand_exactly_at_ceiling() {
        // 0.75 + 0.25 lands exactly on the inclusive ceiling.
        let mut player = player_at(500.0, 0.75, 500.0);
        apply_input(
            &mut player,
            sanitize_input(&input(0.0, 1.0, 0.0, true, false)).unwrap(),
            0.0,
        );
        assert!(matches!(
            apply_movement(&mut player, 50),
            MoveOutcome::Moved { .. }
        ));
        assert!((player.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_flying_may_climb() {
        let mut player = player_at(500.0, 0.0, 500.0);
        apply_input(
            &mut player,
            sanitize_input(&input(0.0, 1.0, 0.0, true, true)).unwrap(),
            0.0,
        );
        assert!(matches!(
            apply_movement(&mut player, 50),
            MoveOutcome::Moved { .. }
        ));
        // 8 units/s flying.
        assert!((player.y - 0.4).abs() < 1e-4);
    }

    #[test]
    fn test_world_bounds_enforced() {
        let mut player = player_at(WORLD_MAX_XZ - 0.1, 0.0, 500.0);
        apply_input(
            &mut player,
            sanitize_input(&input(1.0, 0.0, 0.0, true, false)).unwrap(),
            0.0,
        );
        match apply_movement(&mut player, 50) {
            MoveOutcome::Rejected(why) => assert_eq!(why, reason::OUT_OF_BOUNDS),
            _ => panic!("expected rejection"),
        }
        assert!((player.x - (WORLD_MAX_XZ - 0.1)).abs() < 1e-3);
    }

    #[test]
    fn test_flight_transition_marks_dirty() {
        let mut player = player_at(500.0, 0.0, 500.0);
        assert!(!player.dirty);
        apply_input(
            &mut player,
            sanitize_input(&input(0.0, 0.0, 0.0, false, true)).unwrap(),
            0.0,
        );
        assert!(player.dirty);
    }

    #[test]
    fn test_dexterity_speed_bonus() {
        let mut player = player_at(0.0, 0.0, 0.0);
        player.dexterity = 20;
        assert!((max_speed(&player) - 6.0).abs() < 1e-5);
        player.input.flying = true;
        assert!((max_speed(&player) - 9.0).abs() < 1e-5);
    }

    #[test]
    fn test_idle_or_dead_players_do_not_move() {
        let mut player = player_at(500.0, 0.0, 500.0);
        assert!(matches!(apply_movement(&mut player, 50), MoveOutcome::Idle));

        apply_input(
            &mut player,
            sanitize_input(&input(1.0, 0.0, 0.0, true, false)).unwrap(),
            0.0,
        );
        player.hp = 0;
        assert!(matches!(apply_movement(&mut player, 50), MoveOutcome::Idle));
    }
}
