// Amplitude ramp for smooth gait speed changes
//
// A ramp walks an integer amplitude from `from` to `to` over a number of
// fixed-length ticks. The unit steps needed to cover the distance are
// spread evenly across the ticks, so the last tick always lands on `to`.

/// Interpolation plan from one amplitude to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ramp {
    from: i32,
    to: i32,
    ticks: u32,
}

impl Ramp {
    /// Plan a ramp lasting `duration_ms`, one value per `tick_ms`
    ///
    /// The tick count is `duration_ms / tick_ms`. A ramp shorter than one
    /// tick still produces a single value that snaps to `to`.
    pub fn new(from: i32, to: i32, duration_ms: u32, tick_ms: u32) -> Self {
        let ticks = if from == to {
            0
        } else {
            (duration_ms / tick_ms.max(1)).max(1)
        };

        Self { from, to, ticks }
    }

    pub fn from(&self) -> i32 {
        self.from
    }

    pub fn to(&self) -> i32 {
        self.to
    }

    /// Number of values the ramp yields (zero when `from == to`)
    pub fn len(&self) -> usize {
        self.ticks as usize
    }

    pub fn is_empty(&self) -> bool {
        self.ticks == 0
    }

    /// Iterate the per-tick amplitudes. Can be called any number of times.
    pub fn iter(&self) -> RampIter {
        RampIter {
            ramp: *self,
            tick: 0,
        }
    }

    /// Amplitude after `tick` ticks (1-based, `tick <= ticks`)
    fn value_at(&self, tick: u32) -> i32 {
        let distance = i64::from(self.to) - i64::from(self.from);
        let covered = distance * i64::from(tick) / i64::from(self.ticks);
        // |covered| <= |distance|, so the sum stays between from and to
        (i64::from(self.from) + covered) as i32
    }
}

impl IntoIterator for Ramp {
    type Item = i32;
    type IntoIter = RampIter;

    fn into_iter(self) -> RampIter {
        self.iter()
    }
}

impl IntoIterator for &Ramp {
    type Item = i32;
    type IntoIter = RampIter;

    fn into_iter(self) -> RampIter {
        self.iter()
    }
}

/// Lazy iterator over a ramp's amplitudes
#[derive(Debug, Clone)]
pub struct RampIter {
    ramp: Ramp,
    tick: u32,
}

impl Iterator for RampIter {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        if self.tick >= self.ramp.ticks {
            return None;
        }
        self.tick += 1;
        Some(self.ramp.value_at(self.tick))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.ramp.ticks - self.tick) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RampIter {}
