use std::fs;
use std::io::Write;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::style;

use crate::core::{CoverageConfig, FetchErrorPolicy};
use crate::coverage::{Color, CoverageSummary, parse_summary};
use crate::error::BadgeError;
use crate::io::as_overhead;

/// How a badge run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BadgeOutcome {
    /// The badge was written to the path.
    Written(Utf8PathBuf, CoverageSummary),
    /// The service could not be reached and the policy said to carry on.
    Skipped(CoverageSummary),
}

/// URL of a rendered badge. `%` is a reserved character in the path, so the
/// percentage sign is escaped.
pub fn badge_url(service: &str, percentage: &str, color: Color) -> String {
    format!(
        "{}/badge/coverage-{}-{color}.svg",
        service.trim_end_matches('/'),
        percentage.replace('%', "%25"),
    )
}

/// Reads the coverage report, fetches the matching badge and writes it.
pub fn generate(root: &Utf8Path, config: &CoverageConfig) -> Result<BadgeOutcome, BadgeError> {
    let s = Instant::now();
    let report = root.join(&config.report);
    let target = root.join(&config.badge);

    let text = fs::read_to_string(&report).map_err(|e| BadgeError::Report(report.clone(), e))?;
    let summary = parse_summary(&text, config.threshold)?;
    tracing::info!("Coverage is {} ({})", summary.percentage, summary.color);

    let url = badge_url(&config.service, &summary.percentage, summary.color);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match runtime.block_on(fetch(&url, &target)) {
        Ok(size) => {
            tracing::info!(
                url = %style(&url).yellow(),
                "Wrote {size} byte badge to {target} {}",
                as_overhead(s)
            );
            Ok(BadgeOutcome::Written(target, summary))
        }
        Err(e @ (BadgeError::Fetch(..) | BadgeError::Status(..))) => match config.on_fetch_error {
            FetchErrorPolicy::Ignore => {
                tracing::error!("{e}");
                Ok(BadgeOutcome::Skipped(summary))
            }
            FetchErrorPolicy::Fail => Err(e),
        },
        Err(e) => Err(e),
    }
}

/// One GET, with the body streamed to `target`. Returns the bytes written.
async fn fetch(url: &str, target: &Utf8Path) -> Result<usize, BadgeError> {
    let mut builder =
        reqwest::Client::builder().user_agent(concat!("tasuki/", env!("CARGO_PKG_VERSION")));

    // Proxies are never consulted for a service on this machine.
    if is_loopback(url) {
        builder = builder.no_proxy();
    }

    let client = builder
        .build()
        .map_err(|e| BadgeError::Fetch(url.to_string(), e))?;

    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| BadgeError::Fetch(url.to_string(), e))?;

    // Unlike a plain download, an error page is never saved as the badge.
    let status = response.status();
    if !status.is_success() {
        return Err(BadgeError::Status(url.to_string(), status));
    }

    if let Some(parent) = target.parent()
        && !parent.as_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| BadgeError::Write(target.to_path_buf(), e))?;
    }

    let mut file =
        fs::File::create(target).map_err(|e| BadgeError::Write(target.to_path_buf(), e))?;
    let mut size = 0;

    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(target);
                return Err(BadgeError::Fetch(url.to_string(), e));
            }
        };

        file.write_all(&chunk)
            .map_err(|e| BadgeError::Write(target.to_path_buf(), e))?;
        size += chunk.len();
    }

    file.flush()
        .map_err(|e| BadgeError::Write(target.to_path_buf(), e))?;

    Ok(size)
}

fn is_loopback(url: &str) -> bool {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .is_some_and(|host| {
            host == "localhost"
                || host
                    .trim_matches(['[', ']'])
                    .parse::<std::net::IpAddr>()
                    .is_ok_and(|ip| ip.is_loopback())
        })
}
