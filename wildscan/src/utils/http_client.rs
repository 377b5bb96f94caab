use std::{sync::OnceLock, time::Duration};

use tracing::debug;

use crate::Result;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate may have installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the HTTP client used to reach the analysis service.
///
/// `timeout = None` leaves requests unbounded.
pub fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    install_rustls_provider();
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("wildscan/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}
