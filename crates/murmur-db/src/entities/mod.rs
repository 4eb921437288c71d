pub mod client_execution_states;
pub mod client_metrics;
pub mod clients;
pub mod experiments;
pub mod log_file_offsets;
pub mod server_metrics;
