/// Outcome counters of one backup run.
///
/// `considered` always equals the sum of the three outcome counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub considered: usize,
    pub backed_up_now: usize,
    pub already_present: usize,
    pub failed: usize,
}

impl RunStats {
    pub fn add_backed_up(&mut self) {
        self.considered += 1;
        self.backed_up_now += 1;
    }

    pub fn add_already_present(&mut self) {
        self.considered += 1;
        self.already_present += 1;
    }

    pub fn add_failed(&mut self) {
        self.considered += 1;
        self.failed += 1;
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}
