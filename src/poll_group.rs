//! Poll groups: drive many endpoints with one multiplex call.
//!
//! A [`PollGroup`] owns a membership map (endpoint → caller tag) and three
//! derived readiness sets: `acceptable`, `readable`, and `errored`. One
//! [`PollGroup::wait`] call computes every member's desired poll events,
//! sleeps in a single multi-fd `poll(2)`, and dispatches the results back
//! into each endpoint's state machine. Callers then drain by alternating
//! the set accessors with `accept`/`recv`/`close` on the tagged endpoint.
//!
//! The tag type `T` is chosen by the caller; passing a clone of the
//! [`Endpoint`] handle itself gives the common "tag is the endpoint"
//! arrangement.
//!
//! Membership is symmetric: an endpoint belongs to at most one group at a
//! time and holds a back-reference to it, kept in sync by `add`, `remove`,
//! endpoint close, and group drop (which releases members without closing
//! them).

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::rc::{Rc, Weak};
use std::time::Instant;

use crate::endpoint::{handle_revents, poll_events, Endpoint};
use crate::error::{MsglinkError, Result};
use crate::transport::poll;

/// Membership and readiness state shared with member endpoints.
///
/// Endpoints hold a `Weak` reference to this and mutate the readiness sets
/// from inside revents dispatch, death, recv, and accept. The generic tag
/// map stays out of it so the back-reference type is fixed.
#[derive(Default)]
pub(crate) struct GroupCore {
    pub(crate) members: HashSet<u64>,
    pub(crate) acceptable: HashSet<u64>,
    pub(crate) readable: HashSet<u64>,
    pub(crate) errored: HashSet<u64>,
}

/// A set of endpoints driven together by one multiplex call.
pub struct PollGroup<T> {
    core: Rc<RefCell<GroupCore>>,
    endpoints: HashMap<u64, Endpoint>,
    tags: HashMap<u64, T>,
}

impl<T> PollGroup<T> {
    /// Create an empty group.
    pub fn new() -> Self {
        Self {
            core: Rc::new(RefCell::new(GroupCore::default())),
            endpoints: HashMap::new(),
            tags: HashMap::new(),
        }
    }

    /// Number of member endpoints.
    pub fn len(&self) -> usize {
        self.core.borrow().members.len()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register an endpoint with a caller-chosen tag.
    ///
    /// # Errors
    ///
    /// [`MsglinkError::AlreadyMember`] (EEXIST) if the endpoint is already
    /// in this group; [`MsglinkError::ForeignMember`] (EINVAL) if it is in
    /// another one. Neither changes any state.
    pub fn add(&mut self, endpoint: &Endpoint, tag: T) -> Result<()> {
        let mut inner = endpoint.inner.borrow_mut();
        if let Some(existing) = inner.group.as_ref().and_then(Weak::upgrade) {
            if Rc::ptr_eq(&existing, &self.core) {
                return Err(MsglinkError::AlreadyMember);
            }
            return Err(MsglinkError::ForeignMember);
        }

        inner.group = Some(Rc::downgrade(&self.core));
        self.core.borrow_mut().members.insert(inner.id);
        self.endpoints.insert(inner.id, endpoint.clone());
        self.tags.insert(inner.id, tag);
        Ok(())
    }

    /// Deregister an endpoint, dropping it from every readiness set.
    ///
    /// # Errors
    ///
    /// [`MsglinkError::NotAMember`] (ENOENT) if the endpoint is not in this
    /// group.
    pub fn remove(&mut self, endpoint: &Endpoint) -> Result<()> {
        let mut inner = endpoint.inner.borrow_mut();
        let belongs = inner
            .group
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|core| Rc::ptr_eq(&core, &self.core));
        if !belongs {
            return Err(MsglinkError::NotAMember);
        }

        inner.group = None;
        let mut core = self.core.borrow_mut();
        core.members.remove(&inner.id);
        core.acceptable.remove(&inner.id);
        core.readable.remove(&inner.id);
        core.errored.remove(&inner.id);
        self.endpoints.remove(&inner.id);
        self.tags.remove(&inner.id);
        Ok(())
    }

    /// Tag of some member with a pending accepted connection, or `None`.
    pub fn acceptable(&self) -> Option<&T> {
        let id = {
            let core = self.core.borrow();
            core.acceptable.iter().next().copied()?
        };
        self.tags.get(&id)
    }

    /// Tag of some member with a completed inbound message, or `None`.
    pub fn readable(&self) -> Option<&T> {
        let id = {
            let core = self.core.borrow();
            core.readable.iter().next().copied()?
        };
        self.tags.get(&id)
    }

    /// Tag of some member that has died, or `None`.
    pub fn errored(&self) -> Option<&T> {
        let id = {
            let core = self.core.borrow();
            core.errored.iter().next().copied()?
        };
        self.tags.get(&id)
    }

    /// Drive every member until some readiness set is non-empty or the
    /// deadline passes.
    ///
    /// Returns the summed size of the three readiness sets (an endpoint in
    /// several sets counts once per set), `Ok(0)` on deadline expiry or
    /// signal interruption, and `Err` if a member's dispatch or the poll
    /// itself failed.
    ///
    /// Dispatch happens only at the top of each iteration, with the
    /// revents of the previous sleep; waking from the poll loops straight
    /// back there, keeping the dispatch path unique.
    pub fn wait(&mut self, deadline: Instant) -> Result<usize> {
        self.prune();
        let members: Vec<Endpoint> = self.endpoints.values().cloned().collect();
        let mut pfds: Vec<libc::pollfd> = members
            .iter()
            .map(|ep| libc::pollfd {
                fd: ep.fd(),
                events: 0,
                revents: 0,
            })
            .collect();

        loop {
            for (ep, pfd) in members.iter().zip(pfds.iter_mut()) {
                let mut inner = ep.inner.borrow_mut();
                pfd.events = poll_events(&inner);
                // NB: dispatching the revents of the *previous* iteration.
                handle_revents(&mut inner, pfd.revents)?;
            }

            let pending = {
                let core = self.core.borrow();
                core.acceptable.len() + core.readable.len() + core.errored.len()
            };
            if pending > 0 {
                return Ok(pending);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            match poll::wait_many(&mut pfds, deadline - now) {
                Ok(0) => return Ok(0),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(0),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drop map entries for endpoints that closed while registered;
    /// closing already removed them from the core membership.
    fn prune(&mut self) {
        let core = self.core.borrow();
        self.endpoints.retain(|id, _| core.members.contains(id));
        self.tags.retain(|id, _| core.members.contains(id));
    }
}

impl<T> Default for PollGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for PollGroup<T> {
    /// Release members without closing them: each endpoint's
    /// back-reference is cleared so it can join another group.
    fn drop(&mut self) {
        for ep in self.endpoints.values() {
            let mut inner = ep.inner.borrow_mut();
            let points_here = inner
                .group
                .as_ref()
                .and_then(Weak::upgrade)
                .is_some_and(|core| Rc::ptr_eq(&core, &self.core));
            if points_here {
                inner.group = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn listener() -> Endpoint {
        Endpoint::serve("127.0.0.1:0").unwrap()
    }

    #[test]
    fn test_add_and_remove() {
        let ep = listener();
        let mut group = PollGroup::new();
        group.add(&ep, "tag").unwrap();
        assert_eq!(group.len(), 1);

        group.remove(&ep).unwrap();
        assert!(group.is_empty());
    }

    #[test]
    fn test_double_add_fails() {
        let ep = listener();
        let mut group = PollGroup::new();
        group.add(&ep, 1u32).unwrap();
        assert!(matches!(
            group.add(&ep, 2u32),
            Err(MsglinkError::AlreadyMember)
        ));
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_cross_group_add_fails() {
        let ep = listener();
        let mut first = PollGroup::new();
        let mut second = PollGroup::new();
        first.add(&ep, 1u32).unwrap();
        assert!(matches!(
            second.add(&ep, 2u32),
            Err(MsglinkError::ForeignMember)
        ));
        assert!(second.is_empty());
    }

    #[test]
    fn test_remove_nonmember_fails() {
        let ep = listener();
        let mut group: PollGroup<u32> = PollGroup::new();
        assert!(matches!(group.remove(&ep), Err(MsglinkError::NotAMember)));
    }

    #[test]
    fn test_remove_then_rejoin() {
        let ep = listener();
        let mut group = PollGroup::new();
        group.add(&ep, 1u32).unwrap();
        group.remove(&ep).unwrap();
        group.add(&ep, 2u32).unwrap();
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_group_drop_releases_members() {
        let ep = listener();
        {
            let mut group = PollGroup::new();
            group.add(&ep, 1u32).unwrap();
        }
        // The dropped group cleared the back-reference; the endpoint is
        // free to join another group, and was not closed.
        assert_eq!(ep.geterror(), 0);
        let mut group = PollGroup::new();
        group.add(&ep, 2u32).unwrap();
    }

    #[test]
    fn test_close_deregisters_member() {
        let ep = listener();
        let mut group = PollGroup::new();
        group.add(&ep, 1u32).unwrap();
        ep.close();
        assert!(group.is_empty());
        assert!(group.acceptable().is_none());
        assert!(group.readable().is_none());
        assert!(group.errored().is_none());
    }

    #[test]
    fn test_wait_empty_group_times_out() {
        let mut group: PollGroup<u32> = PollGroup::new();
        let start = Instant::now();
        let n = group.wait(start + Duration::from_millis(20)).unwrap();
        assert_eq!(n, 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_reports_dead_member() {
        // An endpoint that dies inside the wait shows up in errored.
        let probe = listener();
        let addr = probe.local_addr().unwrap();
        probe.close();

        let client = Endpoint::connect(addr).unwrap();
        let mut group = PollGroup::new();
        group.add(&client, 7u32).unwrap();

        let n = group
            .wait(Instant::now() + Duration::from_secs(2))
            .unwrap();
        assert!(n >= 1);
        assert_eq!(group.errored(), Some(&7u32));
        assert_ne!(client.geterror(), 0);
    }
}
