use std::time::Duration;

/// Dequeue timeout that shrinks while items keep arriving and grows while the
/// queue stays empty, bounded by `[floor, ceiling]`.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveTimeout {
    current: Duration,
    floor: Duration,
    ceiling: Duration,
}

impl AdaptiveTimeout {
    const DECAY: f64 = 0.8;
    const GROWTH: f64 = 1.2;

    pub fn new(initial: Duration, floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            current: initial.clamp(floor, ceiling),
            floor,
            ceiling,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn on_item(&mut self) {
        self.current = self.current.mul_f64(Self::DECAY).max(self.floor);
    }

    pub fn on_empty(&mut self) {
        self.current = self.current.mul_f64(Self::GROWTH).min(self.ceiling);
    }
}

impl Default for AdaptiveTimeout {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(5),
            Duration::from_secs(1),
            Duration::from_secs(20),
        )
    }
}
