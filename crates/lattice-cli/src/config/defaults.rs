pub struct DefaultsConfig {
    pub pixel_size: f64,
    pub angular_range_round0: [f64; 3],
    pub angular_step_round0: [f64; 3],
    pub translation_range_round0: [f64; 3],
    pub angular_range_later: [f64; 3],
    pub angular_step_later: [f64; 3],
    pub translation_range_later: [f64; 3],
    pub min_accept_count: usize,
    pub max_rounds: usize,
    pub refine_reference: bool,
    pub max_seed_count: usize,
    pub batch_size: usize,
    pub min_patch_size: usize,
    pub timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            pixel_size: 1.0,
            angular_range_round0: [30.0, 30.0, 30.0],
            angular_step_round0: [10.0, 10.0, 10.0],
            translation_range_round0: [10.0, 10.0, 10.0],
            angular_range_later: [6.0, 6.0, 6.0],
            angular_step_later: [2.0, 2.0, 2.0],
            translation_range_later: [4.0, 4.0, 4.0],
            min_accept_count: 0,
            max_rounds: 20,
            refine_reference: false,
            max_seed_count: 1000,
            batch_size: 64,
            min_patch_size: 3,
            timeout_secs: 3600,
        }
    }
}
