use crate::utils::controllers::config::PidGains;

/// Discrete PID on heading error, evaluated once per control cycle.
///
/// The gains are per-cycle (no `dt` scaling). The integral is anti-windup
/// limited: each cycle's contribution to the accumulator is clamped to
/// `±step_limit` before being added.
#[derive(Debug, Clone)]
pub struct HeadingPid {
    gains: PidGains,
    step_limit: f32,
    last_error: f32,
    error_sum: f32,
}

impl HeadingPid {
    pub fn new(
        gains: PidGains,
        step_limit: f32,
    ) -> Self {
        Self {
            gains,
            step_limit: libm::fabsf(step_limit),
            last_error: 0.0,
            error_sum: 0.0,
        }
    }

    /// Compute the steering correction for the current heading error.
    pub fn update(
        &mut self,
        error: f32,
    ) -> f32 {
        let error_change = error - self.last_error;
        self.last_error = error;
        self.error_sum += self.integral_step(error);
        self.gains.kp * error + self.gains.ki * self.error_sum + self.gains.kd * error_change
    }

    /// The amount `error` would add to the accumulator this cycle.
    pub fn integral_step(
        &self,
        error: f32,
    ) -> f32 {
        error.clamp(-self.step_limit, self.step_limit)
    }

    /// Reset integrator and derivative history.
    pub fn reset(&mut self) {
        self.last_error = 0.0;
        self.error_sum = 0.0;
    }

    pub fn error_sum(&self) -> f32 {
        self.error_sum
    }

    pub fn last_error(&self) -> f32 {
        self.last_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains(
        kp: f32,
        ki: f32,
        kd: f32,
    ) -> PidGains {
        PidGains { kp, ki, kd }
    }

    #[test]
    fn proportional_only() {
        let mut pid = HeadingPid::new(gains(10.0, 0.0, 0.0), 10.0);
        assert_eq!(pid.update(2.0), 20.0);
        assert_eq!(pid.update(-1.5), -15.0);
    }

    #[test]
    fn integral_contribution_is_capped_per_cycle() {
        let mut pid = HeadingPid::new(gains(0.0, 1.0, 0.0), 10.0);
        for error in [170.0, -179.0, 55.5, 3.0, -0.5] {
            let before = pid.error_sum();
            pid.update(error);
            let step = pid.error_sum() - before;
            assert!((-10.0..=10.0).contains(&step), "step {} for error {}", step, error);
        }
        // 10 - 10 + 10 + 3 - 0.5
        assert!(libm::fabsf(pid.error_sum() - 12.5) < 1e-6);
    }

    #[test]
    fn derivative_uses_previous_error() {
        let mut pid = HeadingPid::new(gains(0.0, 0.0, 0.5), 10.0);
        assert_eq!(pid.update(4.0), 2.0);
        assert_eq!(pid.update(4.0), 0.0);
        assert_eq!(pid.update(1.0), -1.5);
        assert_eq!(pid.last_error(), 1.0);
    }

    #[test]
    fn default_gains_first_cycle() {
        let mut pid = HeadingPid::new(PidGains::default(), 10.0);
        // 10*5 + 0.1*5 + 0.5*5
        assert!(libm::fabsf(pid.update(5.0) - 53.0) < 1e-4);
    }

    #[test]
    fn reset_clears_history() {
        let mut pid = HeadingPid::new(PidGains::default(), 10.0);
        pid.update(30.0);
        pid.reset();
        assert_eq!(pid.error_sum(), 0.0);
        assert_eq!(pid.last_error(), 0.0);
    }
}
