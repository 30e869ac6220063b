//! `stanza-ctl` entry point

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let matches = stanza_ctl::cli().get_matches();
    stanza_ctl::init_tracing(matches.get_flag("log-json"));

    match stanza_ctl::dispatch(&matches).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "stanza-ctl failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
