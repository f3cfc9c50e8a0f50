//! 时间轴自动扩展策略

/// The visible/schedulable step range. Grows in whole increments, never shrinks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutoGrow {
    range: u32,
    increment: u32,
}

impl AutoGrow {
    pub fn new(default_steps: u32, increment: u32) -> Self {
        Self {
            range: default_steps,
            increment: increment.max(1),
        }
    }

    pub fn range(&self) -> u32 {
        self.range
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }

    /// Makes room for a note ending at `end_step`. The new bound is the next
    /// multiple of the increment above `end_step` plus one increment of headroom.
    /// Returns the new range when it grew.
    pub fn ensure(&mut self, end_step: u32) -> Option<u32> {
        if end_step <= self.range {
            return None;
        }
        let blocks = end_step.div_ceil(self.increment).saturating_add(1);
        let grown = blocks.saturating_mul(self.increment).max(self.range);
        self.range = grown;
        Some(grown)
    }

    /// Called with the last visible step while scrolling. Within one increment
    /// of the far edge the range grows by one increment.
    pub fn viewport(&mut self, last_visible_step: u32) -> Option<u32> {
        if last_visible_step.saturating_add(self.increment) < self.range {
            return None;
        }
        let target = last_visible_step.max(self.range);
        let blocks = target.div_ceil(self.increment).saturating_add(1);
        self.range = blocks.saturating_mul(self.increment).max(self.range);
        Some(self.range)
    }
}

impl Default for AutoGrow {
    fn default() -> Self {
        Self::new(64, 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_inside_range_does_not_grow() {
        let mut grow = AutoGrow::new(64, 16);
        assert_eq!(grow.ensure(64), None);
        assert_eq!(grow.range(), 64);
    }

    #[test]
    fn grows_to_next_multiple_plus_headroom() {
        let mut grow = AutoGrow::new(64, 16);
        assert_eq!(grow.ensure(65), Some(96));
        assert_eq!(grow.ensure(100), Some(128));
        // an exact multiple still gets a full increment of headroom
        assert_eq!(grow.ensure(144), Some(160));
    }

    #[test]
    fn never_shrinks() {
        let mut grow = AutoGrow::new(64, 16);
        grow.ensure(200);
        let range = grow.range();
        assert_eq!(grow.ensure(10), None);
        assert_eq!(grow.range(), range);
    }

    #[test]
    fn viewport_near_edge_grows_one_increment() {
        let mut grow = AutoGrow::new(64, 16);
        assert_eq!(grow.viewport(40), None);
        assert_eq!(grow.viewport(50), Some(80));
        assert_eq!(grow.range(), 80);
    }
}
