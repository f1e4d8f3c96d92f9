use std::time::Duration;

use hlsdl_engine::{HlsDlConfig, RetryPolicy};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};

/// Parse a header string in format "Name: Value".
fn parse_header(header_str: &str) -> Result<(HeaderName, HeaderValue)> {
    let Some((name, value)) = header_str.split_once(':') else {
        return Err(AppError::InvalidInput(format!(
            "invalid header '{header_str}', expected 'Name: Value'"
        )));
    };
    let name = name.trim();
    let value = value.trim();

    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| AppError::InvalidInput(format!("invalid header name '{name}'")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| AppError::InvalidInput(format!("invalid header value for '{name}'")))?;
    Ok((header_name, header_value))
}

pub fn parse_headers(header_strings: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for header_str in header_strings {
        let (name, value) = parse_header(header_str)?;
        debug!("Adding header: {}", name);
        headers.append(name, value);
    }
    Ok(headers)
}

/// Map command line arguments onto the engine configuration.
pub fn build_config(args: &Args) -> Result<HlsDlConfig> {
    let mut config = HlsDlConfig {
        output_dir: args.output_dir.clone(),
        workers: args.workers,
        progress: !args.no_progress && !args.quiet,
        retry: RetryPolicy::new(args.retries, Duration::from_millis(args.retry_delay_ms)),
        ..HlsDlConfig::default()
    };

    config.fetcher.request_timeout = Duration::from_secs(args.timeout);
    config.fetcher.headers = parse_headers(&args.headers)?;
    if let Some(user_agent) = &args.user_agent {
        config.fetcher.user_agent = user_agent.clone();
    }

    config.remux.enabled = !args.no_remux;
    if let Some(ffmpeg) = &args.ffmpeg_path {
        config.remux.ffmpeg_path = ffmpeg.clone();
    }

    config.validate()?;
    Ok(config)
}
