//! Weighted choice tables for input generation.

use rand::RngCore;
use rand_chacha::ChaCha8Rng;
use ricochet_core::{Input, Rotation, stick_map};

/// Discrete weighted option set.
///
/// Weights are normalized to a 16-bit range at draw time so the same roll
/// lands in the same bucket regardless of the raw weight scale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightedSet<T> {
    entries: Vec<(T, u32)>,
    total: u64,
}

const NORMALIZED_RANGE: u64 = 65_536;

impl<T> WeightedSet<T> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self { entries: Vec::new(), total: 0 }
    }

    /// Adds an option. Zero-weight options are kept but never drawn.
    #[must_use]
    pub fn with_option(mut self, option: T, weight: u32) -> Self {
        self.push(option, weight);
        self
    }

    /// Adds an option in place.
    pub fn push(&mut self, option: T, weight: u32) {
        self.entries.push((option, weight));
        self.total += u64::from(weight);
    }

    /// Number of options, zero-weight ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set holds no options.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Picks the option whose normalized weight bucket contains `roll`.
    pub fn draw(&self, roll: u64) -> Option<&T> {
        if self.total == 0 {
            return None;
        }
        let roll = roll % NORMALIZED_RANGE;
        let mut acc = 0u64;
        let mut last = None;
        for (option, weight) in &self.entries {
            if *weight == 0 {
                continue;
            }
            acc += u64::from(*weight) * NORMALIZED_RANGE / self.total;
            last = Some(option);
            if roll < acc {
                return Some(option);
            }
        }
        // Normalization rounds down, so the tail of the range falls through
        // to the last drawable option.
        last
    }

    /// Draws with a roll taken from `rng`.
    pub fn draw_with(&self, rng: &mut ChaCha8Rng) -> Option<&T> {
        self.draw(rng.next_u64())
    }
}

/// Stick and button distributions for one movement style.
#[derive(Debug, Clone, Default)]
pub struct InputOptions {
    /// Intended stick magnitudes (0.0 to 32.0).
    pub magnitudes: WeightedSet<f32>,
    /// Intended facing yaws in angle units.
    pub yaws: WeightedSet<i16>,
    /// Button combinations; empty means no buttons.
    pub buttons: WeightedSet<u16>,
}

impl InputOptions {
    /// Creates empty distributions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws one frame of input under the current camera yaw.
    ///
    /// The drawn yaw and magnitude are mapped back to the coarsest raw stick
    /// coordinates that reproduce them, keeping the choice space aligned with
    /// states the simulation can actually distinguish.
    pub fn draw_input(&self, rng: &mut ChaCha8Rng, camera_yaw: i16) -> Input {
        let magnitude = self.magnitudes.draw_with(rng).copied().unwrap_or(0.0);
        let yaw = self.yaws.draw_with(rng).copied().unwrap_or(0);
        let buttons = self.buttons.draw_with(rng).copied().unwrap_or(0);
        let (x, y) = if magnitude > 0.0 {
            stick_map().closest_by_hau(yaw, magnitude, camera_yaw, Rotation::None)
        } else {
            (0, 0)
        };
        Input::new(buttons, x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use ricochet_core::buttons;

    #[test]
    fn test_empty_set_draws_nothing() {
        let set: WeightedSet<u16> = WeightedSet::new();
        assert_eq!(set.draw(123), None);
    }

    #[test]
    fn test_single_option_always_drawn() {
        let set = WeightedSet::new().with_option("only", 1);
        for roll in [0u64, 1, 65_535, u64::MAX] {
            assert_eq!(set.draw(roll), Some(&"only"));
        }
    }

    #[test]
    fn test_zero_weight_never_drawn() {
        let set = WeightedSet::new().with_option("never", 0).with_option("always", 5);
        for roll in 0..100 {
            assert_eq!(set.draw(roll * 701), Some(&"always"));
        }
    }

    #[test]
    fn test_buckets_respect_weights() {
        let set = WeightedSet::new().with_option("a", 3).with_option("b", 1);
        // 3:1 split of the normalized range.
        assert_eq!(set.draw(0), Some(&"a"));
        assert_eq!(set.draw(49_151), Some(&"a"));
        assert_eq!(set.draw(49_152), Some(&"b"));
        assert_eq!(set.draw(65_535), Some(&"b"));
    }

    #[test]
    fn test_rounding_tail_falls_to_last_option() {
        // Three equal weights do not divide 65536 evenly; the final sliver of
        // the range must still draw something.
        let set = WeightedSet::new()
            .with_option(0u8, 1)
            .with_option(1u8, 1)
            .with_option(2u8, 1);
        assert_eq!(set.draw(65_535), Some(&2));
    }

    #[test]
    fn test_draw_input_is_deterministic() {
        let options = InputOptions {
            magnitudes: WeightedSet::new().with_option(32.0, 1).with_option(16.0, 1),
            yaws: WeightedSet::new().with_option(0, 1).with_option(0x4000, 1),
            buttons: WeightedSet::new().with_option(0, 3).with_option(buttons::A, 1),
        };
        let mut a = ChaCha8Rng::seed_from_u64(7);
        let mut b = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..20 {
            assert_eq!(options.draw_input(&mut a, 0), options.draw_input(&mut b, 0));
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_nonempty_set_always_draws(
            weights in proptest::collection::vec(1u32..1000, 1..20),
            roll in proptest::prelude::any::<u64>(),
        ) {
            let mut set = WeightedSet::new();
            for (i, w) in weights.iter().enumerate() {
                set.push(i, *w);
            }
            let drawn = set.draw(roll);
            proptest::prop_assert!(drawn.is_some_and(|i| *i < weights.len()));
        }
    }

    #[test]
    fn test_zero_magnitude_centers_stick() {
        let options = InputOptions {
            magnitudes: WeightedSet::new().with_option(0.0, 1),
            yaws: WeightedSet::new().with_option(0x2000, 1),
            buttons: WeightedSet::new(),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let input = options.draw_input(&mut rng, 0);
        assert_eq!((input.stick_x, input.stick_y), (0, 0));
    }
}
