/// Constants shared across the realtime modules. Grouped into one struct
/// (rather than free consts) so a host can size its queues and arenas from a
/// single value it controls, built in code rather than loaded from a file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreConfig {
    pub beats_per_measure: f64,
    pub default_sample_rate: u32,
    pub max_num_slots_per_arp: usize,
    pub max_num_voices_in_ncsm: usize,
    pub max_num_sections: usize,
    pub max_num_buffers_per_stream_sort: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            beats_per_measure: grove_score::REFERENCE_BEATS_PER_MEASURE,
            default_sample_rate: 44_100,
            max_num_slots_per_arp: 16,
            max_num_voices_in_ncsm: 32,
            max_num_sections: 8,
            max_num_buffers_per_stream_sort: 64,
        }
    }
}
