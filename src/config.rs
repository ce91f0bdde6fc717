/// Engine settings, resolved from the command line by the binary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Largest job body accepted by `put`, in bytes.
    pub max_job_size: u32,
    /// Reported as `binlog-max-size` in server stats.
    pub binlog_max_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_job_size: 65535,
            binlog_max_size: 10 << 20,
        }
    }
}
