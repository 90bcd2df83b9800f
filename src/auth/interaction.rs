//! The user-facing half of the interactive flows.
//!
//! Everything that blocks on a person (showing a device code, opening a
//! browser, reading a pasted code) goes through [`Interaction`].

use std::io::{self, BufRead, Write};

use tracing::{info, warn};
use url::Url;

use super::callback_server::{self, CALLBACK_TIMEOUT};
use super::device::DeviceCode;
use crate::error::AuthError;

pub trait Interaction {
    /// Show the device code to the user. Polling starts once this returns.
    fn present_device_code(&self, code: &DeviceCode) -> Result<(), AuthError>;

    /// Send the user to `auth_url` and return what the identity provider
    /// redirected back: either the full redirect URL or a bare code.
    fn authorize_in_browser(&self, auth_url: &Url, redirect_uri: &str)
        -> Result<String, AuthError>;
}

/// Interaction through the controlling terminal and the default browser.
#[derive(Debug, Default)]
pub struct TerminalInteraction {
    /// Skip launching the browser; only print the URL.
    pub no_browser: bool,
}

impl TerminalInteraction {
    fn open_browser(&self, url: &str) {
        if self.no_browser {
            return;
        }
        if let Err(e) = open::that(url) {
            warn!("Failed to open browser: {}", e);
        }
    }
}

impl Interaction for TerminalInteraction {
    fn present_device_code(&self, code: &DeviceCode) -> Result<(), AuthError> {
        eprintln!("{}", code.instructions());
        eprintln!("user code: {}", code.user_code);
        self.open_browser(&code.verification_uri);
        Ok(())
    }

    fn authorize_in_browser(
        &self,
        auth_url: &Url,
        redirect_uri: &str,
    ) -> Result<String, AuthError> {
        eprintln!("Sign in at:\n  {}", auth_url);

        if let Some((port, path)) = callback_server::loopback_target(redirect_uri) {
            let handle = std::thread::spawn(move || {
                callback_server::wait_for_callback(port, &path, CALLBACK_TIMEOUT)
            });
            self.open_browser(auth_url.as_str());
            info!("Waiting for the browser redirect on port {}", port);
            return handle
                .join()
                .map_err(|_| AuthError::Interaction("callback server thread panicked".into()))?;
        }

        self.open_browser(auth_url.as_str());
        prompt_line("Enter the authorization code (or paste the redirected URL): ")
    }
}

fn prompt_line(prompt: &str) -> Result<String, AuthError> {
    eprint!("{}", prompt);
    io::stderr()
        .flush()
        .map_err(|e| AuthError::Interaction(e.to_string()))?;

    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| AuthError::Interaction(e.to_string()))?;
    if read == 0 {
        return Err(AuthError::UserCancelled);
    }
    Ok(line.trim().to_string())
}
