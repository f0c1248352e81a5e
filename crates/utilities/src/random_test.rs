use log::info;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Runs the given test function the requested number of times, each time
/// with a freshly seeded random number generator.
///
/// The seed of every iteration is logged so that a failing run can be
/// reproduced by setting the `PRESTO_TEST_SEED` environment variable, which
/// pins the seed for all iterations.
pub fn random_test<F>(iterations: usize, test: F)
where
    F: Fn(&mut StdRng),
{
    let fixed_seed = std::env::var("PRESTO_TEST_SEED")
        .ok()
        .map(|value| value.parse::<u64>().expect("PRESTO_TEST_SEED must be an integer"));

    for iteration in 0..iterations {
        let seed = fixed_seed.unwrap_or_else(|| rand::rng().random());
        info!("random_test iteration {iteration} with seed {seed}");

        let mut rng = StdRng::seed_from_u64(seed);
        test(&mut rng);
    }
}
