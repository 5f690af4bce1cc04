use clap::Parser;

/// job-dispatch broker: matches client evaluation requests to capable
/// workers, tracks liveness, and reports outcomes to a frontend.
#[derive(Debug, Clone, Parser)]
#[command(name = "broker", version, about = "Job-dispatch broker")]
pub struct Cli {
    /// Path to the YAML configuration document.
    #[arg(short = 'c', long = "config", default_value = "config.yml")]
    pub config: std::path::PathBuf,
}
