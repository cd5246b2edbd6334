/// Weighted multi-phase progress.
///
/// Each phase has a positive weight; the absolute percentage is the weighted
/// share of finished phases plus the current phase's own percentage. Phases
/// are only ever entered in order.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    weights: Vec<u32>,
    phase: usize,
    percent_in_phase: u32,
}

impl PhaseTracker {
    /// Returns `None` if `weights` is empty or any weight is zero.
    pub fn new(weights: &[u32]) -> Option<Self> {
        if weights.is_empty() || weights.contains(&0) {
            return None;
        }
        Some(PhaseTracker {
            weights: weights.to_vec(),
            phase: 0,
            percent_in_phase: 0,
        })
    }

    /// Move to the next phase with 0% done in it. Advancing from the last
    /// phase leaves the tracker where it is.
    pub fn advance(&mut self) {
        if self.phase + 1 < self.weights.len() {
            self.phase += 1;
            self.percent_in_phase = 0;
        } else {
            tracing::debug!("progress: advance past last phase {} ignored", self.phase);
        }
    }

    pub fn set_percent_in_phase(&mut self, percent: i64) {
        self.percent_in_phase = percent.clamp(0, 100) as u32;
    }

    pub fn phase(&self) -> usize {
        self.phase
    }

    pub fn percent_in_phase(&self) -> u32 {
        self.percent_in_phase
    }

    pub fn absolute_percent(&self) -> u32 {
        let mut total: u64 = 0;
        let mut maximum: u64 = 0;

        for (i, &w) in self.weights.iter().enumerate() {
            let w = u64::from(w);
            maximum += w * 100;
            if i < self.phase {
                total += w * 100;
            } else if i == self.phase {
                total += w * u64::from(self.percent_in_phase);
            }
        }

        ((total * 100) / maximum) as u32
    }
}

impl std::fmt::Display for PhaseTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "phase:{} absoluteperc:{}",
            self.phase,
            self.absolute_percent()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_or_zero_weights() {
        assert!(PhaseTracker::new(&[]).is_none());
        assert!(PhaseTracker::new(&[5, 0, 3]).is_none());
        assert!(PhaseTracker::new(&[1]).is_some());
    }

    #[test]
    fn test_single_phase_matches_percent_in_phase() {
        let mut p = PhaseTracker::new(&[1]).unwrap();
        for pct in [0, 50, 100] {
            p.set_percent_in_phase(pct);
            assert_eq!(p.absolute_percent(), pct as u32);
        }
    }

    #[test]
    fn test_percent_in_phase_is_clamped() {
        let mut p = PhaseTracker::new(&[1]).unwrap();
        p.set_percent_in_phase(-20);
        assert_eq!(p.percent_in_phase(), 0);
        p.set_percent_in_phase(250);
        assert_eq!(p.percent_in_phase(), 100);
    }

    #[test]
    fn test_weighted_sum_truncates() {
        // same weights the engine uses
        let mut p = PhaseTracker::new(&[5, 45, 5, 5, 40]).unwrap();
        assert_eq!(p.absolute_percent(), 0);
        p.advance();
        assert_eq!(p.absolute_percent(), 5);
        p.set_percent_in_phase(33);
        // 5*100 + 45*33 = 1985 -> 19.85 -> 19
        assert_eq!(p.absolute_percent(), 19);
        p.advance();
        assert_eq!(p.absolute_percent(), 50);
    }

    #[test]
    fn test_advance_past_last_phase_clamps() {
        let mut p = PhaseTracker::new(&[1, 1]).unwrap();
        p.advance();
        p.set_percent_in_phase(40);
        p.advance();
        p.advance();
        assert_eq!(p.phase(), 1);
        assert_eq!(p.percent_in_phase(), 40);
        assert_eq!(p.absolute_percent(), 70);
    }

    #[test]
    fn test_monotonic_under_advance_and_rising_percent() {
        let weight_sets: [&[u32]; 4] = [&[1], &[3, 1], &[5, 45, 5, 5, 40], &[7, 1, 13, 2]];
        for weights in weight_sets {
            let mut p = PhaseTracker::new(weights).unwrap();
            let mut last = p.absolute_percent();
            for _ in 0..weights.len() {
                for pct in (0..=100).step_by(7).chain(std::iter::once(100)) {
                    p.set_percent_in_phase(pct);
                    let now = p.absolute_percent();
                    assert!(now >= last, "{:?}: {} dropped to {}", weights, last, now);
                    assert!(now <= 100);
                    last = now;
                }
                p.advance();
                let now = p.absolute_percent();
                assert!(now >= last, "{:?}: advance dropped {} to {}", weights, last, now);
                last = now;
            }
            assert_eq!(last, 100);
        }
    }
}
