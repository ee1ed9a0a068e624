//! Host port reservation.
//!
//! A free port is found by binding a listener to port 0 and reading back the
//! port the OS picked. The listener is closed before the container engine
//! binds the port, so an unrelated process can still grab it in between;
//! callers that cannot tolerate that should use
//! [`PortChoice::Fixed`](crate::resolve::PortChoice::Fixed) on a port they
//! control. Within this process, a port is never handed to two overlapping
//! leases.

use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use crate::error::PortError;
use crate::resolve::PortChoice;

const ATTEMPTS_PER_PORT: u32 = 64;

/// Ports leased by any allocator in this process, keyed by probed interface.
static PROCESS_LEASES: LazyLock<Mutex<HashSet<(IpAddr, u16)>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Leases held through one allocator and its clones.
struct LeaseTable {
    host: IpAddr,
    held: Mutex<HashSet<u16>>,
}

impl LeaseTable {
    fn try_lease(&self, port: u16) -> bool {
        if !lock(&PROCESS_LEASES).insert((self.host, port)) {
            return false;
        }
        lock(&self.held).insert(port);
        true
    }

    fn release(&self, port: u16) {
        lock(&self.held).remove(&port);
        lock(&PROCESS_LEASES).remove(&(self.host, port));
    }
}

/// Hands out free host ports to concurrent callers.
///
/// Every allocator in the process checks one shared lease set, so separate
/// provisioners never hand out the same port to overlapping leases.
/// [`is_leased`](Self::is_leased) and [`active_leases`](Self::active_leases)
/// only count leases taken through this allocator and its clones.
#[derive(Clone)]
pub struct PortAllocator {
    table: Arc<LeaseTable>,
}

impl PortAllocator {
    /// Allocator probing on the loopback interface.
    pub fn new() -> Self {
        Self::with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    pub fn with_host(host: IpAddr) -> Self {
        Self {
            table: Arc::new(LeaseTable {
                host,
                held: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Reserve one free port.
    pub fn allocate(&self) -> Result<PortLease, PortError> {
        self.allocate_n(1)?
            .pop()
            .ok_or(PortError::Exhausted { attempts: 0 })
    }

    /// Reserve `n` distinct free ports.
    ///
    /// All probing listeners stay open until the whole batch is chosen, so the
    /// OS cannot hand the same port back twice within one call.
    pub fn allocate_n(&self, n: usize) -> Result<Vec<PortLease>, PortError> {
        let max_attempts = attempt_budget(n);
        let mut listeners = Vec::new();
        let mut leases = Vec::new();
        let mut attempts = 0;

        while leases.len() < n {
            if attempts >= max_attempts {
                return Err(PortError::Exhausted { attempts });
            }
            attempts += 1;

            let listener = TcpListener::bind((self.table.host, 0))?;
            let port = listener.local_addr()?.port();
            if self.table.try_lease(port) {
                leases.push(PortLease {
                    port,
                    table: Arc::clone(&self.table),
                });
                listeners.push(listener);
            } else {
                tracing::trace!(port, "port still leased in-process, probing again");
            }
        }

        drop(listeners);
        Ok(leases)
    }

    /// Turn per-port choices into concrete host ports.
    ///
    /// `Allocate` entries get a fresh lease, `Fixed` entries are used as-is
    /// and `Unpublished` entries are left out.
    pub fn plan(&self, choices: &[(u16, PortChoice)]) -> Result<PortPlan, PortError> {
        let wanted = choices
            .iter()
            .filter(|(_, choice)| *choice == PortChoice::Allocate)
            .count();
        let mut leases = self.allocate_n(wanted)?.into_iter();

        let mut ports = BTreeMap::new();
        let mut held = Vec::with_capacity(wanted);
        for (container_port, choice) in choices {
            match choice {
                PortChoice::Allocate => {
                    if let Some(lease) = leases.next() {
                        ports.insert(*container_port, lease.port());
                        held.push(lease);
                    }
                }
                PortChoice::Fixed(host_port) => {
                    ports.insert(*container_port, *host_port);
                }
                PortChoice::Unpublished => {}
            }
        }

        Ok(PortPlan {
            ports: HostPorts(ports),
            leases: held,
        })
    }

    pub fn is_leased(&self, port: u16) -> bool {
        lock(&self.table.held).contains(&port)
    }

    /// Number of ports currently reserved.
    pub fn active_leases(&self) -> usize {
        lock(&self.table.held).len()
    }
}

/// Bind attempts allowed for a batch of `n` ports.
fn attempt_budget(n: usize) -> u32 {
    let n = u32::try_from(n.max(1)).unwrap_or(u32::MAX);
    ATTEMPTS_PER_PORT.saturating_mul(n)
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("host", &self.table.host)
            .field("active_leases", &self.active_leases())
            .finish()
    }
}

/// A reserved port. The reservation ends when the lease is dropped.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    table: Arc<LeaseTable>,
}

impl std::fmt::Debug for LeaseTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseTable").field("host", &self.host).finish()
    }
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.table.release(self.port);
    }
}

/// Container port to host port, after allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostPorts(BTreeMap<u16, u16>);

impl HostPorts {
    pub fn get(&self, container_port: u16) -> Option<u16> {
        self.0.get(&container_port).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.0.iter().map(|(c, h)| (*c, *h))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(u16, u16)> for HostPorts {
    fn from_iter<I: IntoIterator<Item = (u16, u16)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Concrete host ports plus the leases that keep them reserved.
#[derive(Debug)]
pub struct PortPlan {
    ports: HostPorts,
    leases: Vec<PortLease>,
}

impl PortPlan {
    pub fn ports(&self) -> &HostPorts {
        &self.ports
    }

    pub fn into_leases(self) -> Vec<PortLease> {
        self.leases
    }
}
