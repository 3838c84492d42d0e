//! Synthetic addresses for hostnames.
//!
//! When the application resolves `example.com`, the layer hands the resolver `198.18.0.1`
//! instead. The application connects to that address, and the connect intercept turns it back
//! into `example.com`, so the proxy (not the local resolver) gets to resolve the name.

use std::{
    collections::HashMap,
    net::Ipv4Addr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use ipnet::Ipv4Net;

use crate::error::FakeIpError;

/// `198.18.0.0`, start of the benchmarking range (RFC 2544) we borrow addresses from.
pub const FAKE_IP_BASE: u32 = 0xC612_0000;

/// `/16` mask of [`FAKE_IP_BASE`].
pub const FAKE_IP_MASK: u32 = 0xFFFF_0000;

const FIRST_FAKE_IP: u32 = FAKE_IP_BASE + 1;
const LAST_FAKE_IP: u32 = FAKE_IP_BASE | !FAKE_IP_MASK;

/// The whole fake range, `198.18.0.0/16`.
pub fn fake_ip_network() -> Ipv4Net {
    let base = Ipv4Addr::from(FAKE_IP_BASE);
    Ipv4Net::new(base, 16).unwrap_or_else(|_| Ipv4Net::from(base))
}

#[derive(Debug)]
struct FakeIpState {
    by_address: HashMap<u32, String>,
    by_host: HashMap<String, u32>,
    next: u32,
}

/// Bidirectional hostname <-> fake address table.
///
/// Both directions live behind one lock so they never disagree. The lock is only held for the
/// map lookups, never across I/O.
///
/// Allocation never wraps: once the range is used up, new hostnames get
/// [`FakeIpError::Exhausted`] while the existing mappings keep resolving.
#[derive(Debug)]
pub struct FakeIpTable {
    state: Mutex<FakeIpState>,
    last: u32,
}

impl Default for FakeIpTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeIpTable {
    pub fn new() -> Self {
        Self::with_last(LAST_FAKE_IP)
    }

    pub(crate) fn with_last(last: u32) -> Self {
        Self {
            state: Mutex::new(FakeIpState {
                by_address: HashMap::new(),
                by_host: HashMap::new(),
                next: FIRST_FAKE_IP,
            }),
            last,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeIpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of hostnames the table can hold.
    pub fn capacity(&self) -> u32 {
        self.last - FIRST_FAKE_IP + 1
    }

    /// Returns the fake address for `host`, allocating the next free one on first sight.
    ///
    /// Hostnames are keyed exactly as given.
    pub fn allocate(&self, host: &str) -> Result<Ipv4Addr, FakeIpError> {
        let mut state = self.lock();

        if let Some(&address) = state.by_host.get(host) {
            return Ok(Ipv4Addr::from(address));
        }

        if state.next > self.last {
            return Err(FakeIpError::Exhausted {
                capacity: self.capacity(),
            });
        }

        let address = state.next;
        state.next += 1;
        state.by_address.insert(address, host.to_string());
        state.by_host.insert(host.to_string(), address);

        let address = Ipv4Addr::from(address);
        tracing::debug!(host, %address, "allocated fake address");

        Ok(address)
    }

    /// Hostname behind a fake address, `None` when the address was never handed out.
    pub fn resolve(&self, address: Ipv4Addr) -> Option<String> {
        if !Self::is_fake(address) {
            return None;
        }

        self.lock().by_address.get(&u32::from(address)).cloned()
    }

    /// Whether `address` falls inside `198.18.0.0/16`. Doesn't look at the table.
    pub fn is_fake(address: Ipv4Addr) -> bool {
        u32::from(address) & FAKE_IP_MASK == FAKE_IP_BASE
    }

    pub fn len(&self) -> usize {
        self.lock().by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every mapping and rewinds the cursor.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.by_address.clear();
        state.by_host.clear();
        state.next = FIRST_FAKE_IP;
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn first_address() {
        let table = FakeIpTable::new();

        assert_eq!(
            table.allocate("example.com").unwrap(),
            Ipv4Addr::new(198, 18, 0, 1)
        );
        assert_eq!(
            table.allocate("example.org").unwrap(),
            Ipv4Addr::new(198, 18, 0, 2)
        );
        assert_eq!(table.capacity(), 65535);
    }

    #[rstest]
    fn allocation_is_idempotent() {
        let table = FakeIpTable::new();

        let first = table.allocate("example.com").unwrap();
        let second = table.allocate("example.com").unwrap();

        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve(first).as_deref(), Some("example.com"));
    }

    #[rstest]
    fn hostnames_are_case_sensitive_keys() {
        let table = FakeIpTable::new();

        let lower = table.allocate("example.com").unwrap();
        let upper = table.allocate("EXAMPLE.com").unwrap();

        assert_ne!(lower, upper);
    }

    #[rstest]
    #[case(Ipv4Addr::new(198, 18, 0, 0), true)]
    #[case(Ipv4Addr::new(198, 18, 255, 255), true)]
    #[case(Ipv4Addr::new(198, 19, 0, 1), false)]
    #[case(Ipv4Addr::new(198, 17, 255, 255), false)]
    #[case(Ipv4Addr::new(93, 184, 216, 34), false)]
    fn is_fake(#[case] address: Ipv4Addr, #[case] expected: bool) {
        assert_eq!(FakeIpTable::is_fake(address), expected);
        assert_eq!(fake_ip_network().contains(&address), expected);
    }

    #[rstest]
    fn unknown_addresses_do_not_resolve() {
        let table = FakeIpTable::new();
        table.allocate("example.com").unwrap();

        assert!(table.resolve(Ipv4Addr::new(198, 18, 0, 2)).is_none());
        assert!(table.resolve(Ipv4Addr::new(10, 0, 0, 1)).is_none());
    }

    #[rstest]
    fn exhaustion_rejects_new_hosts_only() {
        let table = FakeIpTable::with_last(FIRST_FAKE_IP + 1);

        let a = table.allocate("a.test").unwrap();
        let b = table.allocate("b.test").unwrap();

        assert!(matches!(
            table.allocate("c.test"),
            Err(FakeIpError::Exhausted { capacity: 2 })
        ));
        assert_eq!(table.allocate("a.test").unwrap(), a);
        assert_eq!(table.resolve(b).as_deref(), Some("b.test"));
    }

    #[rstest]
    fn clear_rewinds() {
        let table = FakeIpTable::new();
        table.allocate("a.test").unwrap();
        table.allocate("b.test").unwrap();

        table.clear();

        assert!(table.is_empty());
        assert_eq!(
            table.allocate("b.test").unwrap(),
            Ipv4Addr::new(198, 18, 0, 1)
        );
    }

    #[rstest]
    fn concurrent_allocation_keeps_maps_consistent() {
        let table = Arc::new(FakeIpTable::new());

        let handles = (0..8)
            .map(|worker| {
                let table = table.clone();
                thread::spawn(move || {
                    (0..200)
                        .map(|host| {
                            // Every worker races on the same 100 names.
                            let name = format!("host{}.test", (host + worker) % 100);
                            (name.clone(), table.allocate(&name).unwrap())
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            for (name, address) in handle.join().unwrap() {
                assert_eq!(table.resolve(address), Some(name));
            }
        }

        assert_eq!(table.len(), 100);
    }
}
