/// Transition observed by an [`EdgeLatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Steady,
}

/// Two-state latch that reacts to transitions rather than levels
#[derive(Debug, Default, Clone)]
pub struct EdgeLatch {
    active: bool,
    rising_edges: u64,
}

impl EdgeLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// How many times the latch has gone from inactive to active
    pub fn rising_edges(&self) -> u64 {
        self.rising_edges
    }

    /// Record the current level. `on_rising_edge` runs only when the latch
    /// switches from inactive to active.
    pub fn observe<F: FnOnce()>(&mut self, active: bool, on_rising_edge: F) -> Edge {
        let edge = match (self.active, active) {
            (false, true) => Edge::Rising,
            (true, false) => Edge::Falling,
            _ => Edge::Steady,
        };
        self.active = active;
        if edge == Edge::Rising {
            self.rising_edges += 1;
            on_rising_edge();
        }
        edge
    }
}
