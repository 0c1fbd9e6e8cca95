//! Ping session: one raw socket, many hosts, one reactor task
//!
//! A [`Session`] owns the host registry, the per-host timers and the
//! transport. A single task spawned on the caller's runtime waits on the
//! socket, the timer queue and the shutdown token and dispatches whatever
//! becomes ready, one event at a time.
//!
//! All session state sits behind one re-entrant lock. The reactor holds it
//! while it dispatches an event and while the driver callback runs, so a
//! callback may call back into the session (through a [`SessionHandle`])
//! without deadlocking, and administrative calls from other threads
//! interleave with the reactor between events.

use crate::config::SessionConfig;
use crate::dns::{resolve_host, NameResolver, SystemResolver};
use crate::error::PingError;
use crate::packet::RECV_BUFFER_SIZE;
use crate::probe::{PingCallback, PingReply};
use crate::registry::Host;
use crate::scheduler::{Completion, Engine, HostPhase, ProbeSettings, TimerEvent};
use crate::socket::EchoTransport;
use crate::stats::{HostReport, HostStatistics, SessionCounters};
use futures::future::poll_fn;
use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};


/// Read-only view of a registered host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSnapshot {
    /// Correlation index
    pub index: u32,
    /// Name as given at registration
    pub name: String,
    /// Display name
    pub fqdn: String,
    /// Resolved address
    pub address: Ipv4Addr,
    /// Sequence number of the next or outstanding probe
    pub sequence: u8,
    /// Which timer currently drives the host
    pub phase: HostPhase,
    /// Accumulated counters
    pub stats: HostStatistics,
}

impl HostSnapshot {
    fn of(host: &Host) -> Self {
        Self {
            index: host.index(),
            name: host.name().to_string(),
            fqdn: host.fqdn().to_string(),
            address: host.address(),
            sequence: host.sequence(),
            phase: host.phase(),
            stats: host.stats().clone(),
        }
    }
}

struct SessionState {
    engine: Engine,
    closed: bool,
}

struct Shared {
    state: ReentrantMutex<RefCell<SessionState>>,
    resolver: Arc<dyn NameResolver>,
    config: SessionConfig,
    runtime: Handle,
    wakeup: Notify,
    shutdown: CancellationToken,
    reactor: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn with_state<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let guard = self.state.lock();
        let state = guard.borrow();
        f(&state)
    }

    fn with_state_mut<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Run one engine transition and hand its outcome to the driver
    ///
    /// The callback runs with the lock held but the state released.
    fn dispatch(&self, f: impl FnOnce(&mut Engine) -> Option<Completion>) {
        let guard = self.state.lock();
        let completion = {
            let mut state = guard.borrow_mut();
            if state.closed {
                return;
            }
            f(&mut state.engine)
        };
        if let Some((callback, reply)) = completion {
            callback(&reply);
        }
    }

    fn poll_timer(&self, cx: &mut Context<'_>) -> Poll<TimerEvent> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.closed {
            return Poll::Pending;
        }
        state.engine.timers.poll_expired(cx)
    }

    fn count_hosts(&self) -> usize {
        self.with_state(|state| state.engine.registry.iter().count())
    }

    fn statistics(&self) -> Vec<HostReport> {
        self.with_state(|state| {
            state
                .engine
                .registry
                .iter()
                .map(|host| host.stats().report(host.fqdn()))
                .collect()
        })
    }

    fn counters(&self) -> SessionCounters {
        self.with_state(|state| state.engine.counters)
    }

    fn shutdown(&self, fail_requests: bool) {
        let _runtime = self.runtime.enter();
        let guard = self.state.lock();
        let completions = {
            let mut state = guard.borrow_mut();
            if state.closed {
                return;
            }
            state.closed = true;
            debug!(timers = state.engine.timers.len(), "cancelling host timers");
            state.engine.teardown(fail_requests)
        };
        for (callback, reply) in completions {
            callback(&reply);
        }
        drop(guard);

        self.shutdown.cancel();
        info!(fail_requests, "ping session shut down");
    }
}

/// An ICMP echo session monitoring any number of IPv4 hosts
///
/// # Examples
///
/// ```no_run
/// use pingmux::{PingStatus, Session, SessionConfig};
///
/// # async fn example() -> Result<(), pingmux::PingError> {
/// let session = Session::new(&tokio::runtime::Handle::current(), SessionConfig::default())?;
/// session.add_host("example.com").await?;
/// session.add_host("192.0.2.1").await?;
///
/// session.start_pinging(|reply| match reply.status {
///     PingStatus::Success => println!("{} answered in {:?}", reply.fqdn, reply.elapsed),
///     _ => println!("{}: {}", reply.fqdn, reply.status),
/// })?;
///
/// tokio::time::sleep(std::time::Duration::from_secs(5)).await;
/// session.print_statistics();
/// session.close(false).await;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Open a raw ICMP socket and start the reactor on `runtime`
    ///
    /// Fails with [`PingError::InsufficientPermissions`] when the process
    /// may not open raw sockets.
    pub fn new(runtime: &Handle, config: SessionConfig) -> Result<Self, PingError> {
        config.validate().map_err(PingError::ConfigError)?;
        let _runtime = runtime.enter();
        let transport = open_transport()?;
        Self::with_transport(
            runtime,
            config,
            transport,
            Arc::new(SystemResolver::new()),
        )
    }

    /// Start a session over an existing transport and resolver
    pub fn with_transport(
        runtime: &Handle,
        config: SessionConfig,
        transport: Arc<dyn EchoTransport>,
        resolver: Arc<dyn NameResolver>,
    ) -> Result<Self, PingError> {
        config.validate().map_err(PingError::ConfigError)?;
        let _runtime = runtime.enter();

        let settings = ProbeSettings::from_config(&config, Instant::now());
        let identifier = settings.identifier;
        let shared = Arc::new(Shared {
            state: ReentrantMutex::new(RefCell::new(SessionState {
                engine: Engine::new(settings),
                closed: false,
            })),
            resolver,
            config,
            runtime: runtime.clone(),
            wakeup: Notify::new(),
            shutdown: CancellationToken::new(),
            reactor: Mutex::new(None),
        });

        let reactor = runtime.spawn(run_reactor(Arc::clone(&shared), transport));
        *shared.reactor.lock() = Some(reactor);

        info!(identifier, "ping session created");
        Ok(Self { shared })
    }

    /// Resolve `name` and register it, returning its correlation index
    ///
    /// The host stays idle until the next [`start_pinging`](Self::start_pinging).
    pub async fn add_host(&self, name: &str) -> Result<u32, PingError> {
        self.ensure_open()?;
        let resolved = resolve_host(
            self.shared.resolver.as_ref(),
            name,
            self.shared.config.enable_rdns,
        )
        .await?;

        self.shared.with_state_mut(|state| {
            if state.closed {
                return Err(PingError::SessionClosed);
            }
            let fqdn = resolved.fqdn.clone();
            let address = resolved.address;
            let index = state.engine.registry.insert(resolved);
            debug!(index, %fqdn, %address, "host registered");
            Ok(index)
        })
    }

    /// Number of registered hosts
    pub fn count_hosts(&self) -> usize {
        self.shared.count_hosts()
    }

    /// Deliver results to `callback` and probe every idle host right away
    ///
    /// Returns how many hosts were started. Calling it again replaces the
    /// callback everywhere and starts hosts registered in the meantime.
    pub fn start_pinging<F>(&self, callback: F) -> Result<usize, PingError>
    where
        F: Fn(&PingReply) + Send + Sync + 'static,
    {
        let callback: PingCallback = Arc::new(callback);
        let _runtime = self.shared.runtime.enter();
        let kicked = self.shared.with_state_mut(|state| {
            if state.closed {
                return Err(PingError::SessionClosed);
            }
            if state.engine.registry.is_empty() {
                debug!("no hosts registered yet");
            }
            Ok(state.engine.start(&callback))
        })?;
        self.shared.wakeup.notify_one();
        info!(hosts = kicked, "pinging started");
        Ok(kicked)
    }

    /// Statistics report of every host, in registration order
    pub fn statistics(&self) -> Vec<HostReport> {
        self.shared.statistics()
    }

    /// All reports rendered as text, each followed by a blank line
    pub fn statistics_text(&self) -> String {
        self.statistics()
            .iter()
            .map(|report| format!("{}\n\n", report))
            .collect()
    }

    /// Print every report to stdout
    pub fn print_statistics(&self) {
        print!("{}", self.statistics_text());
    }

    /// Session-wide packet counters
    pub fn counters(&self) -> SessionCounters {
        self.shared.counters()
    }

    /// Snapshot of one host
    pub fn host(&self, index: u32) -> Option<HostSnapshot> {
        self.shared
            .with_state(|state| state.engine.registry.get(index).map(HostSnapshot::of))
    }

    /// Snapshots of every host, in registration order
    pub fn hosts(&self) -> Vec<HostSnapshot> {
        self.shared
            .with_state(|state| state.engine.registry.iter().map(HostSnapshot::of).collect())
    }

    /// ICMP identifier stamped on every request
    pub fn identifier(&self) -> u16 {
        self.shared
            .with_state(|state| state.engine.settings.identifier)
    }

    /// Configuration the session was created with
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Weak handle usable from inside the callback
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Whether the session has been torn down
    pub fn is_closed(&self) -> bool {
        self.shared.with_state(|state| state.closed)
    }

    /// Tear the session down without waiting for the reactor
    ///
    /// Every host timer is cancelled immediately. With `fail_requests` every
    /// probe still waiting for its reply is reported as a timeout first.
    /// Repeated calls do nothing.
    pub fn shutdown(&self, fail_requests: bool) {
        self.shared.shutdown(fail_requests);
    }

    /// Tear the session down and release its resources
    pub fn destroy(self, fail_requests: bool) {
        self.shutdown(fail_requests);
    }

    /// Tear the session down and wait until the socket is closed
    pub async fn close(self, fail_requests: bool) {
        self.shutdown(fail_requests);
        let reactor = self.shared.reactor.lock().take();
        if let Some(reactor) = reactor {
            if let Err(e) = reactor.await {
                debug!(error = %e, "reactor task ended abnormally");
            }
        }
    }

    fn ensure_open(&self) -> Result<(), PingError> {
        if self.is_closed() {
            Err(PingError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.shutdown(false);
    }
}

/// Non-owning access to a session
///
/// Holding a handle does not keep the session alive; once it is gone every
/// query reports an empty session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Weak<Shared>,
}

impl SessionHandle {
    /// Number of registered hosts
    pub fn count_hosts(&self) -> usize {
        self.shared.upgrade().map_or(0, |shared| shared.count_hosts())
    }

    /// Statistics report of every host
    pub fn statistics(&self) -> Vec<HostReport> {
        self.shared
            .upgrade()
            .map(|shared| shared.statistics())
            .unwrap_or_default()
    }

    /// Session-wide packet counters
    pub fn counters(&self) -> SessionCounters {
        self.shared
            .upgrade()
            .map(|shared| shared.counters())
            .unwrap_or_default()
    }

    /// Tear the session down, see [`Session::shutdown`]
    pub fn shutdown(&self, fail_requests: bool) {
        if let Some(shared) = self.shared.upgrade() {
            shared.shutdown(fail_requests);
        }
    }
}

#[cfg(unix)]
fn open_transport() -> Result<Arc<dyn EchoTransport>, PingError> {
    Ok(Arc::new(crate::socket::RawIcmpSocket::open()?))
}

#[cfg(not(unix))]
fn open_transport() -> Result<Arc<dyn EchoTransport>, PingError> {
    Err(PingError::ProtocolUnavailable(
        "raw ICMP sockets are only supported on Unix".to_string(),
    ))
}

/// Dispatch socket, timer and wakeup events until shutdown
///
/// Owns the transport, so the socket closes when the loop ends.
async fn run_reactor(shared: Arc<Shared>, transport: Arc<dyn EchoTransport>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        tokio::select! {
            biased;

            () = shared.shutdown.cancelled() => break,

            event = poll_fn(|cx| shared.poll_timer(cx)) => {
                shared.dispatch(|engine| engine.on_timer(transport.as_ref(), event));
            }

            received = transport.recv(&mut buf) => match received {
                Ok(len) => shared.dispatch(|engine| engine.on_datagram(&buf[..len])),
                Err(e) => shared.dispatch(|engine| {
                    engine.on_receive_error(&e);
                    None
                }),
            },

            // Timers armed from another task
            () = shared.wakeup.notified() => {}
        }
    }

    debug!("reactor stopped");
}
