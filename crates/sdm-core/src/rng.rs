use rand::rngs::StdRng;
use rand::SeedableRng;

/// Seeded `StdRng`, or one drawn from OS entropy when no seed is given.
pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}
