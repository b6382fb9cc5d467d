use log::{error, info, warn};
use novel_parser::browser::ChromeLauncher;
use novel_parser::{spawn_extract, Extractor, ParseRequest, ServiceConfig};
use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;

/// Request JSON from the file named by the first argument, or from stdin
fn read_request() -> Result<ParseRequest, String> {
    let raw = match std::env::args().nth(1) {
        Some(path) if path != "-" => std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read request file {}: {}", path, e))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read request from stdin: {}", e))?;
            buf
        }
    };
    serde_json::from_str(&raw).map_err(|e| format!("invalid request: {}", e))
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = log4rs::init_file("log4rs.yml", Default::default()) {
        eprintln!("log4rs.yml not loaded ({}), logging disabled", e);
    }

    let service = ServiceConfig::load();

    let mut request = match read_request() {
        Ok(request) => request,
        Err(e) => {
            error!("{}", e);
            eprintln!("bad_request");
            return ExitCode::from(2);
        }
    };
    request.config.headless &= service.headless;
    if !request.config.headless {
        warn!("running with a visible browser window");
    }

    info!(
        "novel-extractor url={} storage_dir={}",
        request.url,
        service.storage_dir.display()
    );
    let extractor = Arc::new(Extractor::new(ChromeLauncher, service.storage_dir.clone()));

    match spawn_extract(extractor, request).await {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("failed to serialize result: {}", e);
                eprintln!("serialize");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!("extraction failed: {}", e);
            eprintln!("{}", e.kind());
            ExitCode::FAILURE
        }
    }
}
