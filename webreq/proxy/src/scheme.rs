//! Loads that never reach the proxy's pipeline: registered custom schemes and `file:` urls.

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use webreq_protocol::loader::LoaderStart;

/// Kind of response a custom scheme handler produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    Buffer,
    String,
    File,
    Http,
    Stream,
    Free,
}

/// Serves every load of a registered scheme.
pub trait SchemeHandler: Send + Sync {
    /// Takes over the load. The handler owns `start.client` from now on.
    fn start(&self, protocol: ProtocolType, start: LoaderStart);
}

/// Serves `file:` loads, including paths pointing inside packed archives.
pub trait ArchiveLoader: Send + Sync {
    fn start(&self, start: LoaderStart);
}

#[derive(Clone)]
pub struct InterceptedHandler {
    pub protocol: ProtocolType,
    pub handler: Arc<dyn SchemeHandler>,
}

impl InterceptedHandler {
    pub fn handle(&self, start: LoaderStart) {
        self.handler.start(self.protocol, start)
    }
}

impl fmt::Debug for InterceptedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptedHandler")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Registry of custom scheme handlers, keyed by lowercase scheme.
#[derive(Debug, Clone, Default)]
pub struct InterceptedHandlers(HashMap<String, InterceptedHandler>);

impl InterceptedHandlers {
    /// Registers a handler for `scheme`, returning the one it replaced.
    pub fn register(
        &mut self,
        scheme: &str,
        protocol: ProtocolType,
        handler: Arc<dyn SchemeHandler>,
    ) -> Option<InterceptedHandler> {
        self.0.insert(
            scheme.to_ascii_lowercase(),
            InterceptedHandler { protocol, handler },
        )
    }

    pub fn unregister(&mut self, scheme: &str) -> Option<InterceptedHandler> {
        self.0.remove(&scheme.to_ascii_lowercase())
    }

    pub fn get(&self, scheme: &str) -> Option<&InterceptedHandler> {
        self.0.get(scheme)
    }

    pub fn is_registered(&self, scheme: &str) -> bool {
        self.0.contains_key(&scheme.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use webreq_protocol::{LoadOptions, ResourceRequest};

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(ProtocolType, String)>>);

    impl SchemeHandler for Recorder {
        fn start(&self, protocol: ProtocolType, start: LoaderStart) {
            self.0
                .lock()
                .unwrap()
                .push((protocol, start.request.url.to_string()));
        }
    }

    #[test]
    fn dispatches_by_lowercase_scheme() {
        let recorder = Arc::new(Recorder::default());
        let mut handlers = InterceptedHandlers::default();
        assert!(handlers
            .register("App", ProtocolType::Buffer, recorder.clone())
            .is_none());
        assert!(handlers.is_registered("APP"));

        let request = ResourceRequest::get("app://bundle/index.html".parse().unwrap());
        let (start, _, _) = LoaderStart::new(request, None, LoadOptions::NONE);
        handlers.get(start.request.url.scheme()).unwrap().handle(start);

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![(ProtocolType::Buffer, "app://bundle/index.html".to_owned())]
        );

        assert!(handlers.unregister("app").is_some());
        assert!(handlers.get("app").is_none());
    }
}
