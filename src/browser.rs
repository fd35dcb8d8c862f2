//! Best-effort browser launching for forwarded web services.

/// Opens URLs for the user. Tests substitute a recorder.
pub trait UrlOpener: Send + Sync {
    /// Returns whether a launcher reported success.
    fn open(&self, url: &str) -> bool;
}

/// Platform default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl UrlOpener for SystemBrowser {
    fn open(&self, url: &str) -> bool {
        let opened = try_open_browser(url);
        if !opened {
            tracing::debug!(%url, "no browser launcher succeeded");
        }
        opened
    }
}

/// Opener used when browser launching is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBrowser;

impl UrlOpener for NoBrowser {
    fn open(&self, _url: &str) -> bool {
        false
    }
}

/// Best-effort browser opener.
pub fn try_open_browser(url: &str) -> bool {
    #[cfg(target_os = "macos")]
    {
        return std::process::Command::new("open")
            .arg(url)
            .status()
            .is_ok_and(|status| status.success());
    }
    #[cfg(target_os = "windows")]
    {
        return std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .status()
            .is_ok_and(|status| status.success());
    }
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        return std::process::Command::new("xdg-open")
            .arg(url)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok_and(|status| status.success());
    }
    #[allow(unreachable_code)]
    false
}
