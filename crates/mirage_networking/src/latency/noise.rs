//! # Jitter Noise
//!
//! Smooth, deterministic noise for latency jitter.
//!
//! Uniform random jitter makes consecutive messages disagree wildly about how
//! congested the link is. Real links drift: latency rises and falls over
//! hundreds of milliseconds. Sampling 2D simplex noise along the diagonal
//! `(t, t)` gives exactly that drift.
//!
//! ## Output Range
//!
//! [`JitterNoise::sample`] returns values in `[0, 1)`, so the jitter term it
//! feeds is never negative and never reaches its configured amplitude.

/// Pre-computed permutation table.
struct PermutationTable {
    /// 256 entries, doubled to avoid index wrapping.
    perm: [u8; 512],
}

impl PermutationTable {
    /// 12 gradient vectors for 2D simplex.
    const GRADIENTS: [[i8; 2]; 12] = [
        [1, 0], [1, 1], [0, 1], [-1, 1],
        [-1, 0], [-1, -1], [0, -1], [1, -1],
        [1, 0], [0, 1], [-1, 0], [0, -1],
    ];

    fn new(seed: u64) -> Self {
        let mut perm = [0u8; 512];
        for (i, slot) in perm.iter_mut().take(256).enumerate() {
            *slot = i as u8;
        }

        // Fisher-Yates with xorshift64; a zero state would never move.
        let mut state = seed | 1;
        for i in (1..256).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;

            let j = (state % (i as u64 + 1)) as usize;
            perm.swap(i, j);
        }

        let (low, high) = perm.split_at_mut(256);
        high.copy_from_slice(low);

        Self { perm }
    }

    #[inline]
    fn get(&self, index: usize) -> u8 {
        self.perm[index & 511]
    }

    #[inline]
    fn gradient(hash: u8) -> [i8; 2] {
        Self::GRADIENTS[(hash % 12) as usize]
    }
}

/// Smooth noise source for latency jitter.
pub struct JitterNoise {
    table: PermutationTable,
}

impl JitterNoise {
    /// Skewing factor for the 2D simplex grid: (sqrt(3) - 1) / 2.
    const F2: f64 = 0.366_025_403_784_439;
    /// Unskewing factor: (3 - sqrt(3)) / 6.
    const G2: f64 = 0.211_324_865_405_187;
    /// Sample times wrap at this value to keep sub-cell precision.
    const PERIOD: f64 = 65_536.0;

    /// Creates a noise source. Same seed, same signal.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            table: PermutationTable::new(seed),
        }
    }

    /// Samples the jitter signal at time `t`, in `[0, 1)`.
    #[must_use]
    pub fn sample(&self, t: f64) -> f64 {
        let t = if t.is_finite() { t.rem_euclid(Self::PERIOD) } else { 0.0 };
        let raw = (self.simplex(t, t) + 1.0) * 0.5;
        raw.clamp(0.0, 1.0 - f64::EPSILON)
    }

    /// Raw 2D simplex noise, roughly in `[-1, 1]`.
    #[must_use]
    pub fn simplex(&self, x: f64, y: f64) -> f64 {
        let skew = (x + y) * Self::F2;
        // Lattice coordinates stay in f64; only their index into the
        // 256-periodic table is taken as an integer.
        let i = (x + skew).floor();
        let j = (y + skew).floor();

        let unskew = (i + j) * Self::G2;
        let x0 = x - (i - unskew);
        let y0 = y - (j - unskew);

        let (i1, j1) = if x0 > y0 { (1, 0) } else { (0, 1) };

        let x1 = x0 - f64::from(i1) + Self::G2;
        let y1 = y0 - f64::from(j1) + Self::G2;
        let x2 = x0 - 1.0 + 2.0 * Self::G2;
        let y2 = y0 - 1.0 + 2.0 * Self::G2;

        let ii = lattice_index(i);
        let jj = lattice_index(j);
        let i1 = i1 as usize;
        let j1 = j1 as usize;

        let gi0 = self.table.get(ii + self.table.get(jj) as usize);
        let gi1 = self.table.get(ii + i1 + self.table.get(jj + j1) as usize);
        let gi2 = self.table.get(ii + 1 + self.table.get(jj + 1) as usize);

        // 70.0 normalizes the summed corner contributions to [-1, 1].
        70.0 * (corner(x0, y0, gi0) + corner(x1, y1, gi1) + corner(x2, y2, gi2))
    }
}

impl Default for JitterNoise {
    fn default() -> Self {
        Self::new(0xDEAD_BEEF_CAFE_BABE)
    }
}

/// Contribution of one simplex corner.
#[inline]
fn corner(x: f64, y: f64, hash: u8) -> f64 {
    let t = 0.5 - x * x - y * y;
    if t < 0.0 {
        0.0
    } else {
        let grad = PermutationTable::gradient(hash);
        let t2 = t * t;
        t2 * t2 * (x * f64::from(grad[0]) + y * f64::from(grad[1]))
    }
}

/// Table index of a lattice coordinate. Non-finite input maps to 0.
#[inline]
fn lattice_index(coordinate: f64) -> usize {
    if coordinate.is_finite() {
        coordinate.rem_euclid(256.0) as usize & 255
    } else {
        0
    }
}
