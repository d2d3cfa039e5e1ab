//! Interceptor injection into tab page contexts

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::envelope::TabId;
use crate::error::CaptureError;
use crate::host::TabHost;

/// Injects the interceptor into a tab's page context
#[async_trait]
pub trait Injector: Send + Sync {
    /// Attempt an injection; returns whether wrapping was performed
    async fn inject(&self, tab_id: TabId) -> Result<bool, CaptureError>;
}

/// Whether a URL uses a scheme whose pages are eligible for injection
pub fn is_web_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Injector operating on a [`TabHost`]'s page contexts
pub struct PageInjector {
    host: Arc<TabHost>,
}

impl PageInjector {
    pub fn new(host: Arc<TabHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Injector for PageInjector {
    async fn inject(&self, tab_id: TabId) -> Result<bool, CaptureError> {
        let Some(tab) = self.host.tab(tab_id) else {
            return Err(CaptureError::TabNotFound(tab_id));
        };
        let url = tab.url();
        if !is_web_url(&url) {
            debug!(tab = %tab_id, url, "tab not eligible for injection");
            return Ok(false);
        }
        Ok(tab.install_interceptor().wrapped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CapabilityFactory;
    use crate::loopback::LoopbackCapability;
    use crate::HidCapability;

    fn loopback_factory() -> CapabilityFactory {
        Arc::new(|| Some(Arc::new(LoopbackCapability::new()) as Arc<dyn HidCapability>))
    }

    #[test]
    fn test_web_url_eligibility() {
        assert!(is_web_url("http://example.com/"));
        assert!(is_web_url("https://example.com/page"));
        assert!(!is_web_url("about:blank"));
        assert!(!is_web_url("chrome://extensions"));
        assert!(!is_web_url("file:///tmp/page.html"));
    }

    #[tokio::test]
    async fn test_inject_skips_non_web_tabs() {
        let host = Arc::new(TabHost::new(loopback_factory()));
        let injector = PageInjector::new(host.clone());

        let (web_tab, _rx1) = host.open_tab("https://example.com/");
        let (internal_tab, _rx2) = host.open_tab("about:blank");

        assert!(injector.inject(web_tab.id()).await.unwrap());
        // Idempotent second attempt reports false without error
        assert!(!injector.inject(web_tab.id()).await.unwrap());

        assert!(!injector.inject(internal_tab.id()).await.unwrap());
        assert!(!internal_tab.is_instrumented());

        assert!(matches!(
            injector.inject(TabId(999)).await,
            Err(CaptureError::TabNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_inject_without_capability_reports_false() {
        let host = Arc::new(TabHost::new(Arc::new(|| None)));
        let injector = PageInjector::new(host.clone());
        let (tab, _rx) = host.open_tab("https://example.com/");
        assert!(!injector.inject(tab.id()).await.unwrap());
    }
}
