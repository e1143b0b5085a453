#[derive(Default, Debug, Clone, PartialEq)]
pub struct SimulationMetrics {
    pub tick: u64,
    pub live_entities: usize,
    pub actions_applied: u64,
    pub actions_rejected: u64,
    pub autopilot_steps: u64,
    pub snapshot_bytes: u64,
}

impl SimulationMetrics {
    pub fn record_action(&mut self, success: bool) {
        if success {
            self.actions_applied += 1;
        } else {
            self.actions_rejected += 1;
        }
    }

    pub fn record_tick(
        &mut self,
        tick: u64,
        live_entities: usize,
        snapshot_bytes: usize,
        autopilot_steps: usize,
    ) {
        self.tick = tick;
        self.live_entities = live_entities;
        self.snapshot_bytes += snapshot_bytes as u64;
        self.autopilot_steps += autopilot_steps as u64;
    }

    pub fn rejection_rate(&self) -> f64 {
        let total = self.actions_applied + self.actions_rejected;
        if total == 0 {
            0.0
        } else {
            self.actions_rejected as f64 / total as f64
        }
    }
}
