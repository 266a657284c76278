use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// What the simulated channel does with one received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    Drop,
    Corrupt,
}

/// Client-side fault injection: independent Bernoulli draws for loss and
/// corruption, applied once per received datagram.
#[derive(Debug)]
pub struct LossyChannel {
    loss_probability: f64,
    corrupt_probability: f64,
    rng: StdRng,
}

impl LossyChannel {
    /// Probabilities are fractions in `[0, 1]`. With a seed the draw
    /// sequence is reproducible.
    pub fn new(loss_probability: f64, corrupt_probability: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            loss_probability,
            corrupt_probability,
            rng,
        }
    }

    /// A channel that delivers everything.
    pub fn perfect() -> Self {
        Self::new(0.0, 0.0, Some(0))
    }

    pub fn should_drop(&mut self) -> bool {
        self.rng.random::<f64>() < self.loss_probability
    }

    pub fn should_corrupt(&mut self) -> bool {
        self.rng.random::<f64>() < self.corrupt_probability
    }

    /// Loss is drawn first; corruption only for datagrams that survive it.
    pub fn judge(&mut self) -> Verdict {
        if self.should_drop() {
            Verdict::Drop
        } else if self.should_corrupt() {
            Verdict::Corrupt
        } else {
            Verdict::Deliver
        }
    }
}
