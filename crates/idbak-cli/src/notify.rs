use std::time::Duration;

use eyre::{Context, Result};
use idbak_core::config::AgentConfig;
use idbak_core::report::RunReport;

/// Form fields of the notification request.
pub fn form_fields<'a>(
    config: &'a AgentConfig,
    subject: &'a str,
    summary: &'a str,
) -> [(&'static str, &'a str); 5] {
    [
        ("username", config.username.as_str()),
        ("password", config.password.expose()),
        ("to_email", config.notify_email.as_str()),
        ("subject", subject),
        ("content", summary),
    ]
}

/// Mail the run summary through the account's notification endpoint.
///
/// A transport failure is an error; a rejected request only warns.
pub fn send_summary(config: &AgentConfig, report: &RunReport) -> Result<()> {
    let subject = report.subject();
    let summary = report.summary();

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("failed to build HTTP client")?;

    let response = client
        .post(&config.notify_url)
        .form(&form_fields(config, &subject, &summary))
        .send()
        .with_context(|| format!("failed to contact {}", config.notify_url))?;

    if !response.status().is_success() {
        eprintln!(
            "[warn] could not send summary via electronic mail: {}",
            response.status()
        );
    }

    Ok(())
}
