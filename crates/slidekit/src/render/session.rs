//! Per-slide rendering through a long-lived engine session.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info_span, warn};

use crate::error::RenderError;
use crate::retry::RetryPolicy;

use super::bridge::{BridgeConnector, BridgeError, BridgeSession};
use super::{slide_file_name, RenderStrategy};

pub struct SessionRenderer {
    connector: Arc<dyn BridgeConnector>,
    /// Shared connection; holding the lock means owning the engine for one document.
    session: Mutex<Option<Box<dyn BridgeSession>>>,
    connect_retry: RetryPolicy,
    slide_retry: RetryPolicy,
}

impl SessionRenderer {
    pub fn new(
        connector: Arc<dyn BridgeConnector>,
        connect_retry: RetryPolicy,
        slide_retry: RetryPolicy,
    ) -> Self {
        Self {
            connector,
            session: Mutex::new(None),
            connect_retry,
            slide_retry,
        }
    }

    fn connect(&self) -> Result<Box<dyn BridgeSession>, BridgeError> {
        self.connect_retry.run(
            "bridge connect",
            |_| self.connector.connect(),
            |e| matches!(e, BridgeError::Connect { .. } | BridgeError::Timeout),
        )
    }

    /// Returns a live session, reusing the cached one when it still answers.
    fn ensure_session<'a>(
        &self,
        slot: &'a mut Option<Box<dyn BridgeSession>>,
    ) -> Result<&'a mut Box<dyn BridgeSession>, BridgeError> {
        if let Some(session) = slot.as_mut() {
            if let Err(e) = session.ping() {
                debug!("Cached bridge session unusable ({}), reconnecting", e);
                *slot = None;
            }
        }
        if slot.is_none() {
            *slot = Some(self.connect()?);
        }
        slot.as_mut().ok_or(BridgeError::Disconnected)
    }

    fn render_slides(
        &self,
        session: &mut Box<dyn BridgeSession>,
        source: &Path,
        slide_count: usize,
        out_dir: &Path,
    ) -> Result<BTreeMap<u32, PathBuf>, BridgeError> {
        session.open(source)?;

        let mut images = BTreeMap::new();
        for slide_number in 1..=slide_count as u32 {
            let output = out_dir.join(slide_file_name(slide_number));
            let label = format!("slide {}", slide_number);
            let rendered = self.slide_retry.run(
                &label,
                |_| {
                    session.render_slide(slide_number, &output)?;
                    if output.is_file() {
                        Ok(())
                    } else {
                        Err(BridgeError::Remote(format!(
                            "no output written for slide {}",
                            slide_number
                        )))
                    }
                },
                |e| !e.is_fatal(),
            );

            match rendered {
                Ok(()) => {
                    images.insert(slide_number, output);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Slide {} not rendered: {}", slide_number, e),
            }
        }

        if let Err(e) = session.close() {
            if e.is_fatal() {
                return Err(e);
            }
            warn!("Closing document on bridge failed: {}", e);
        }
        Ok(images)
    }
}

impl RenderStrategy for SessionRenderer {
    fn name(&self) -> &'static str {
        "session"
    }

    fn render(
        &self,
        source: &Path,
        slide_count: usize,
        out_dir: &Path,
    ) -> Result<BTreeMap<u32, PathBuf>, RenderError> {
        let _span = info_span!("render.session", slides = slide_count).entered();

        let mut slot = self.session.lock().unwrap_or_else(|poisoned| {
            warn!("Bridge session lock poisoned, recovering");
            poisoned.into_inner()
        });

        let session = self.ensure_session(&mut slot)?;
        match self.render_slides(session, source, slide_count, out_dir) {
            Ok(images) => Ok(images),
            Err(e) => {
                if e.is_fatal() {
                    warn!("Bridge session dropped: {}", e);
                    *slot = None;
                }
                Err(RenderError::Session(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Session that fails the listed slides a number of times before succeeding.
    struct ScriptedSession {
        failures: BTreeMap<u32, usize>,
        drop_on: Option<u32>,
        stall_on: Option<u32>,
        renders: Arc<AtomicUsize>,
    }

    impl BridgeSession for ScriptedSession {
        fn open(&mut self, _document: &Path) -> Result<(), BridgeError> {
            Ok(())
        }

        fn render_slide(&mut self, slide: u32, output: &Path) -> Result<(), BridgeError> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            if self.stall_on == Some(slide) {
                return Err(BridgeError::Timeout);
            }
            if let Some(left) = self.failures.get_mut(&slide) {
                if *left > 0 {
                    *left -= 1;
                    return Err(BridgeError::Remote("render failed".into()));
                }
                if self.drop_on == Some(slide) {
                    return Err(BridgeError::Disconnected);
                }
            }
            std::fs::write(output, "<svg/>").map_err(BridgeError::Io)
        }

        fn close(&mut self) -> Result<(), BridgeError> {
            Ok(())
        }

        fn ping(&mut self) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    struct ScriptedConnector {
        refusals: AtomicUsize,
        connects: AtomicUsize,
        failures: BTreeMap<u32, usize>,
        drop_on: Option<u32>,
        stall_on: Option<u32>,
        renders: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn new(refusals: usize, failures: &[(u32, usize)], drop_on: Option<u32>) -> Self {
            Self {
                refusals: AtomicUsize::new(refusals),
                connects: AtomicUsize::new(0),
                failures: failures.iter().copied().collect(),
                drop_on,
                stall_on: None,
                renders: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn stalling_on(mut self, slide: u32) -> Self {
            self.stall_on = Some(slide);
            self
        }
    }

    impl BridgeConnector for ScriptedConnector {
        fn connect(&self) -> Result<Box<dyn BridgeSession>, BridgeError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let left = self.refusals.load(Ordering::SeqCst);
            if left > 0 {
                self.refusals.store(left - 1, Ordering::SeqCst);
                return Err(BridgeError::Connect {
                    address: "test".into(),
                    message: "refused".into(),
                });
            }
            Ok(Box::new(ScriptedSession {
                failures: self.failures.clone(),
                drop_on: self.drop_on,
                stall_on: self.stall_on,
                renders: self.renders.clone(),
            }))
        }
    }

    fn renderer(connector: Arc<ScriptedConnector>) -> SessionRenderer {
        SessionRenderer::new(
            connector,
            RetryPolicy::new(3, Duration::from_millis(1)),
            RetryPolicy::new(3, Duration::from_millis(1)),
        )
    }

    #[test]
    fn test_renders_every_slide() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(0, &[], None));
        let images = renderer(connector.clone())
            .render(Path::new("/tmp/deck.pptx"), 3, dir.path())
            .unwrap();
        assert_eq!(images.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(connector.renders.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_connection_refusals_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(2, &[], None));
        let images = renderer(connector.clone())
            .render(Path::new("/tmp/deck.pptx"), 1, dir.path())
            .unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_transient_slide_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(0, &[(2, 2)], None));
        let images = renderer(connector.clone())
            .render(Path::new("/tmp/deck.pptx"), 3, dir.path())
            .unwrap();
        assert_eq!(images.len(), 3);
        assert_eq!(connector.renders.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_exhausted_slide_is_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(0, &[(2, 10)], None));
        let images = renderer(connector)
            .render(Path::new("/tmp/deck.pptx"), 3, dir.path())
            .unwrap();
        assert_eq!(images.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_dropped_session_aborts_and_reconnects_next_time() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(0, &[(2, 2)], Some(2)));
        let renderer = renderer(connector.clone());

        let result = renderer.render(Path::new("/tmp/deck.pptx"), 3, dir.path());
        assert!(matches!(
            result,
            Err(RenderError::Session(BridgeError::Disconnected))
        ));

        let _ = renderer.render(Path::new("/tmp/deck.pptx"), 1, dir.path());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_timeout_is_not_retried_on_the_same_session() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(0, &[], None).stalling_on(1));
        let renderer = renderer(connector.clone());

        let result = renderer.render(Path::new("/tmp/deck.pptx"), 2, dir.path());
        assert!(matches!(result, Err(RenderError::Session(BridgeError::Timeout))));
        assert_eq!(connector.renders.load(Ordering::SeqCst), 1);

        let _ = renderer.render(Path::new("/tmp/deck.pptx"), 1, dir.path());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }
}
