use std::process::ExitCode;

use photocopy::cli::{self, Args, CliResponse};
use photocopy::{PhotocopyService, ServiceConfig, Status};
use photocopy_vlm::moondream::HubLoader;

fn main() -> ExitCode {
    // stdout is reserved for the JSON answer
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();

    let response = match HubLoader::new() {
        Ok(loader) => {
            let config = ServiceConfig::load(args.config.as_deref());
            let mut service = PhotocopyService::new(config, loader);
            cli::run(&args, &mut service, std::io::stdin().lock())
        }
        Err(e) => CliResponse::error(
            Status::ImportError,
            format!("Failed to import required libraries: {e}"),
        ),
    };

    println!("{}", response.render(args.mode.is_some()));

    ExitCode::from(response.exit_code)
}
