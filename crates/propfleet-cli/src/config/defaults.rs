use std::time::Duration;

pub struct DefaultsConfig {
    pub input_path: &'static str,
    pub options_path: &'static str,
    pub output_directory: &'static str,
    pub working_directory: &'static str,
    pub script_directory_name: &'static str,
    pub replicate: u32,
    pub num_workers: usize,
    pub port: u16,
    pub polling_interval: Duration,
    pub queue_name: &'static str,
    pub number_of_threads: u32,
    pub number_of_gpus: u32,
    pub gpu_toolkit: &'static str,
    pub memory_limit: &'static str,
    pub wallclock_limit: &'static str,
    pub minimum_number_of_workers: usize,
    pub maximum_number_of_workers: usize,
    pub adaptive_interval: Duration,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            input_path: "training-properties-with-water.json",
            options_path: "request-options.json",
            output_directory: "output",
            working_directory: "working-directory",
            script_directory_name: "queue-scripts",
            replicate: 1,
            num_workers: 3,
            port: 8100,
            polling_interval: Duration::from_secs(30),
            queue_name: "gpu",
            number_of_threads: 1,
            number_of_gpus: 1,
            gpu_toolkit: "cuda",
            memory_limit: "4GB",
            wallclock_limit: "12:00:00",
            minimum_number_of_workers: 1,
            maximum_number_of_workers: 1,
            adaptive_interval: Duration::from_millis(1000),
        }
    }
}
