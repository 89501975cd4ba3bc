use std::f64::consts::PI;

/// Source of uniform samples in `(0, 1)` feeding the Box–Muller sampler.
///
/// Each trial builds and owns its source, so nothing is shared between
/// worker threads.
pub trait UniformSource {
    fn next_f64(&mut self) -> f64;
}

/// Seeded xorshift64* generator.
#[derive(Debug, Clone)]
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }
}

impl UniformSource for Rng {
    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }
}

/// Independent stream seed for one trial.
pub fn derive_seed(base_seed: u64, trial_index: u32) -> u64 {
    splitmix64(base_seed ^ ((trial_index as u64) << 17) ^ trial_index as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// One normal draw via Box–Muller, consuming two uniforms.
///
/// Only the cosine branch is used; the sine partner is discarded so each
/// sample costs exactly two uniforms.
pub fn sample_normal<R: UniformSource + ?Sized>(mean: f64, std_dev: f64, source: &mut R) -> f64 {
    let u1 = source.next_f64().max(1e-12);
    let u2 = source.next_f64();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    mean + z * std_dev
}
