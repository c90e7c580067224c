//! Analog stick mapping tables.
//!
//! Raw stick coordinates map many-to-one onto the (yaw, magnitude) pairs the
//! simulation actually acts on: a dead zone, a magnitude cap, and a squared
//! response curve. The tables here invert that mapping so movement-choice
//! code can ask for the raw input closest to an intended yaw and magnitude.
//! Built once at startup and shared read-only across threads.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Angle bias when searching outward from an intended yaw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Search both directions, nearest first
    None,
    /// Only accept yaws at or clockwise of the intended one
    Clockwise,
    /// Only accept yaws at or counterclockwise of the intended one
    CounterClockwise,
}

/// Ordered key wrapper for intended magnitudes
#[derive(Debug, Clone, Copy, PartialEq)]
struct MagKey(f32);

impl Eq for MagKey {}

impl PartialOrd for MagKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MagKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Angle in 1/65536ths of a turn
fn atan2s(y: f32, x: f32) -> i16 {
    let turns = f64::from(y).atan2(f64::from(x)) / std::f64::consts::TAU;
    (turns * 65536.0).round() as i64 as i16
}

/// Whether two angles fall in the same sixteenth-unit bucket (HAU)
#[must_use]
pub fn hau_equals(a: i16, b: i16) -> bool {
    a.wrapping_sub(a & 15) == b.wrapping_sub(b & 15)
}

/// Bidirectional stick mapping tables
#[derive(Debug)]
pub struct StickMap {
    by_yaw: HashMap<i16, BTreeMap<MagKey, (i8, i8)>>,
    by_input: HashMap<(i8, i8), (i16, f32)>,
}

/// The process-wide stick map, built on first use
#[must_use]
pub fn stick_map() -> &'static StickMap {
    static MAP: OnceLock<StickMap> = OnceLock::new();
    MAP.get_or_init(StickMap::build)
}

impl StickMap {
    fn build() -> Self {
        let mut by_yaw: HashMap<i16, BTreeMap<MagKey, (i8, i8)>> = HashMap::new();
        let mut by_input = HashMap::with_capacity(256 * 256);

        for sx in i16::from(i8::MIN)..=i16::from(i8::MAX) {
            for sy in i16::from(i8::MIN)..=i16::from(i8::MAX) {
                let mut ax = 0.0f32;
                let mut ay = 0.0f32;

                // Dead zone of +-8 raw units, pulled in by 6
                if sx <= -8 {
                    ax = f32::from(sx) + 6.0;
                } else if sx >= 8 {
                    ax = f32::from(sx) - 6.0;
                }
                if sy <= -8 {
                    ay = f32::from(sy) + 6.0;
                } else if sy >= 8 {
                    ay = f32::from(sy) - 6.0;
                }

                let mut mag = (ax * ax + ay * ay).sqrt();
                if mag > 64.0 {
                    ax *= 64.0 / mag;
                    ay *= 64.0 / mag;
                    mag = 64.0;
                }

                // Squared response curve, halved
                let intended_mag = (mag / 64.0) * (mag / 64.0) * 64.0 / 2.0;

                let mut base_yaw = 0i16;
                if intended_mag > 0.0 {
                    base_yaw = atan2s(-ay, ax);
                    by_yaw
                        .entry(base_yaw)
                        .or_default()
                        .entry(MagKey(intended_mag))
                        .or_insert((sx as i8, sy as i8));
                }

                by_input.insert((sx as i8, sy as i8), (base_yaw, intended_mag));
            }
        }

        Self { by_yaw, by_input }
    }

    /// Intended (yaw, magnitude) produced by a raw stick position
    #[must_use]
    pub fn yaw_mag(&self, stick_x: i8, stick_y: i8, camera_yaw: i16) -> (i16, f32) {
        match self.by_input.get(&(stick_x, stick_y)) {
            Some(&(base_yaw, mag)) => (base_yaw.wrapping_add(camera_yaw), mag),
            None => (camera_yaw, 0.0),
        }
    }

    /// Raw stick position closest to an intended yaw bucket and magnitude
    ///
    /// Searches the intended yaw's HAU bucket first, then widens one bucket
    /// at a time in the direction(s) `bias` allows, and within matching
    /// buckets picks the input whose intended magnitude is nearest.
    #[must_use]
    pub fn closest_by_hau(
        &self,
        intended_yaw: i16,
        intended_mag: f32,
        camera_yaw: i16,
        bias: Rotation,
    ) -> (i8, i8) {
        if intended_mag == 0.0 {
            return (0, 0);
        }

        let min_intended = intended_yaw.wrapping_sub(intended_yaw & 15);
        let min_base = min_intended.wrapping_sub(camera_yaw);

        let mut closest = (0, 0);
        let mut closest_distance = f32::INFINITY;
        let mut found_bucket = false;
        let mut offset = 0i32;

        // One full circle of buckets is the hard stop; past that there is
        // nothing left to find.
        while offset.unsigned_abs() <= 4096 {
            let bucket_base = min_base.wrapping_add((offset as i16).wrapping_mul(16));
            for step in 0..16i16 {
                let yaw = bucket_base.wrapping_add(step);
                let Some(mags) = self.by_yaw.get(&yaw) else {
                    continue;
                };
                found_bucket = true;
                if let Some(exact) = mags.get(&MagKey(intended_mag)) {
                    return *exact;
                }
                let above = mags.range(MagKey(intended_mag)..).next();
                let below = mags.range(..MagKey(intended_mag)).next_back();
                for candidate in [above, below].into_iter().flatten() {
                    let distance = (candidate.0.0 - intended_mag).abs();
                    if distance < closest_distance {
                        closest_distance = distance;
                        closest = *candidate.1;
                    }
                }
            }

            match bias {
                Rotation::None => {
                    // Mirror outward; once a bucket matched, finish checking
                    // its mirror and stop.
                    if offset == 0 {
                        if found_bucket {
                            break;
                        }
                        offset = 1;
                    } else if offset > 0 {
                        offset = -offset;
                    } else if found_bucket {
                        break;
                    } else {
                        offset = -offset + 1;
                    }
                }
                Rotation::CounterClockwise => {
                    if found_bucket {
                        break;
                    }
                    offset += 1;
                }
                Rotation::Clockwise => {
                    if found_bucket {
                        break;
                    }
                    offset -= 1;
                }
            }
        }

        closest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_zone_is_neutral() {
        let map = stick_map();
        for x in -7..=7i8 {
            for y in -7..=7i8 {
                let (_, mag) = map.yaw_mag(x, y, 0);
                assert_eq!(mag, 0.0, "({}, {}) should be dead", x, y);
            }
        }
    }

    #[test]
    fn test_full_deflection_caps_at_half_max() {
        let map = stick_map();
        let (_, mag) = map.yaw_mag(127, 0, 0);
        assert_eq!(mag, 32.0);
    }

    #[test]
    fn test_yaw_mag_round_trips_through_closest() {
        let map = stick_map();
        for (x, y) in [(127i8, 0i8), (0, 127), (-128, 0), (64, 64), (23, -91)] {
            let (yaw, mag) = map.yaw_mag(x, y, 0);
            if mag == 0.0 {
                continue;
            }
            let (cx, cy) = map.closest_by_hau(yaw, mag, 0, Rotation::None);
            let (cyaw, cmag) = map.yaw_mag(cx, cy, 0);
            assert!(hau_equals(yaw, cyaw), "yaw {} vs {}", yaw, cyaw);
            assert_eq!(mag, cmag);
        }
    }

    #[test]
    fn test_camera_yaw_offsets_intent() {
        let map = stick_map();
        let (yaw_a, mag_a) = map.yaw_mag(100, 0, 0);
        let (yaw_b, mag_b) = map.yaw_mag(100, 0, 0x4000);
        assert_eq!(mag_a, mag_b);
        assert_eq!(yaw_b, yaw_a.wrapping_add(0x4000));
    }

    #[test]
    fn test_zero_mag_request_is_neutral() {
        let map = stick_map();
        assert_eq!(map.closest_by_hau(1234, 0.0, 0, Rotation::None), (0, 0));
    }

    #[test]
    fn test_hau_equals() {
        assert!(hau_equals(0, 15));
        assert!(!hau_equals(15, 16));
        assert!(hau_equals(-16, -1));
    }
}
