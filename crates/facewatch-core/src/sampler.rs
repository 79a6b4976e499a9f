/// Counter-gated frame sampling: only every `interval`-th frame is analyzed.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    interval: u64,
    counter: u64,
}

impl FrameSampler {
    /// An interval of 0 or 1 analyzes every frame.
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            counter: 0,
        }
    }

    /// Count a new frame and report whether it should be analyzed.
    pub fn tick(&mut self) -> bool {
        self.counter += 1;
        self.counter % self.interval == 0
    }

    /// Frames seen so far.
    pub fn frames(&self) -> u64 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_third_frame() {
        let mut sampler = FrameSampler::new(3);
        let analyzed: Vec<u64> = (1..=9).filter(|_| sampler.tick()).collect();
        assert_eq!(analyzed, vec![3, 6, 9]);
        assert_eq!(sampler.frames(), 9);
    }

    #[test]
    fn test_zero_interval_analyzes_all() {
        let mut sampler = FrameSampler::new(0);
        assert!((0..5).all(|_| sampler.tick()));
    }
}
