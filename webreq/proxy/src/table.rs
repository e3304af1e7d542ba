use std::collections::{hash_map::Entry, HashMap};

use webreq_protocol::{NetworkRequestId, WebRequestId};

/// Requests in flight, keyed by [`WebRequestId`], with a secondary index by the
/// [`NetworkRequestId`] the network stack knows them by.
///
/// Network ids are not guaranteed to be unique. The index keeps the first request registered
/// under a network id, and removing a request only clears index entries that point at it.
#[derive(Debug)]
pub(crate) struct RequestTable<R> {
    requests: HashMap<WebRequestId, R>,
    by_network_id: HashMap<NetworkRequestId, WebRequestId>,
}

impl<R> Default for RequestTable<R> {
    fn default() -> Self {
        Self {
            requests: Default::default(),
            by_network_id: Default::default(),
        }
    }
}

impl<R> RequestTable<R> {
    /// Registers a new request.
    ///
    /// Returns the request back if `id` is already taken.
    pub fn insert(
        &mut self,
        id: WebRequestId,
        network_id: Option<NetworkRequestId>,
        request: R,
    ) -> Result<(), R> {
        let Entry::Vacant(entry) = self.requests.entry(id) else {
            return Err(request);
        };
        entry.insert(request);

        if let Some(network_id) = network_id {
            self.by_network_id.entry(network_id).or_insert(id);
        }

        Ok(())
    }

    pub fn get_mut(&mut self, id: WebRequestId) -> Option<&mut R> {
        self.requests.get_mut(&id)
    }

    pub fn contains(&self, id: WebRequestId) -> bool {
        self.requests.contains_key(&id)
    }

    /// Removes a request together with its network id mapping.
    pub fn remove(
        &mut self,
        id: WebRequestId,
        network_id: Option<NetworkRequestId>,
    ) -> Option<R> {
        let request = self.requests.remove(&id)?;

        if let Some(network_id) = network_id {
            if self.by_network_id.get(&network_id) == Some(&id) {
                self.by_network_id.remove(&network_id);
            }
        }

        Some(request)
    }

    pub fn find_by_network_id(&self, network_id: NetworkRequestId) -> Option<WebRequestId> {
        self.by_network_id.get(&network_id).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = WebRequestId> + '_ {
        self.requests.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Number of entries in the network id index.
    #[cfg(test)]
    pub fn indexed(&self) -> usize {
        self.by_network_id.len()
    }
}
