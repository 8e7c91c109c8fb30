pub use clap::Parser;

use crate::client::DEFAULT_API_BASE;
use crate::profile::DEFAULT_PROFILE_PATH;

pub const DEFAULT_LOG_FILE: &str = "granite-shell.log";

#[derive(Parser, Debug)]
#[command(name = "granite-shell", version, about, long_about = None)]
pub struct CommandLineArgs {
    #[clap(
        short = 'p',
        long,
        default_value = DEFAULT_PROFILE_PATH,
        help = "profile JSON file path"
    )]
    profile: String,
    #[clap(
        short = 'a',
        long,
        default_value = DEFAULT_API_BASE,
        help = "Replicate API base URL"
    )]
    api_base: String,
    #[clap(
        short = 'l',
        long,
        default_value = DEFAULT_LOG_FILE,
        help = "file receiving the log output"
    )]
    log_file: String,
    #[clap(
        short = 'v',
        long,
        help = "Log debug messages",
        default_value = "false"
    )]
    verbose: bool,
}

impl CommandLineArgs {
    pub fn get() -> Self {
        CommandLineArgs::parse()
    }

    pub fn profile(&self) -> String {
        self.profile.clone()
    }

    pub fn api_base(&self) -> String {
        self.api_base.clone()
    }

    pub fn log_file(&self) -> String {
        shellexpand::tilde(&self.log_file).to_string()
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }
}
