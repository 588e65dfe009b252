//! Background event loop driving all socket I/O and completion callbacks
//!
//! A [`Reactor`] owns one thread running a poll(2) loop over registered file
//! descriptors plus a queue of posted jobs. Every transport callback in this
//! crate runs on that thread. The process-wide instance returned by
//! [`Reactor::global`] is started on first use and never stopped.

use bitflags::bitflags;
use log::{debug, error, trace};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

bitflags! {
    /// Readiness reported for a registered descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Readiness: u8 {
        const READABLE = 0x01;
        const WRITABLE = 0x02;
        const HANGUP = 0x04;
        const ERROR = 0x08;
    }
}

/// What a registered source wants to be woken for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

impl Interest {
    fn poll_events(self) -> libc::c_short {
        match self {
            Interest::Readable => libc::POLLIN | libc::POLLRDHUP,
            Interest::Writable => libc::POLLOUT,
        }
    }
}

/// Handle for a registered descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

/// A unit of work posted to the reactor thread
pub type Job = Box<dyn FnOnce() + Send>;

/// Called with the readiness of its descriptor. Returning `None` removes
/// the source; `Some(interest)` keeps it registered with that interest.
pub type SourceHandler = Box<dyn FnMut(Readiness) -> Option<Interest> + Send>;

struct Source {
    fd: RawFd,
    interest: Interest,
    // Taken out while the handler runs so no lock is held during the call
    handler: Option<SourceHandler>,
}

#[derive(Default)]
struct State {
    jobs: VecDeque<Job>,
    sources: HashMap<SourceId, Source>,
    next_source: u64,
    thread: Option<ThreadId>,
    running: bool,
}

/// Self-pipe used to interrupt poll(2)
struct Waker {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Waker {
    fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    fn wake(&self) {
        let byte = 1u8;
        // A full pipe already guarantees a wakeup
        unsafe {
            libc::write(self.write_fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(
                    self.read_fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

struct Inner {
    state: Mutex<State>,
    started: Condvar,
    waker: Waker,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A poll(2) event loop running on its own thread
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<Inner>,
}

static GLOBAL: OnceLock<Reactor> = OnceLock::new();
static GLOBAL_INIT: Mutex<()> = Mutex::new(());

impl Reactor {
    /// Create a reactor. Nothing runs until [`start`](Self::start).
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                started: Condvar::new(),
                waker: Waker::new()?,
            }),
        })
    }

    /// The process-wide reactor, started on first use
    pub fn global() -> io::Result<Reactor> {
        if let Some(reactor) = GLOBAL.get() {
            return Ok(reactor.clone());
        }

        let _guard = GLOBAL_INIT.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(reactor) = GLOBAL.get() {
            return Ok(reactor.clone());
        }

        let reactor = Reactor::new()?;
        reactor.start()?;
        let _ = GLOBAL.set(reactor.clone());
        Ok(reactor)
    }

    /// Spawn the loop thread. Calling this again is a no-op.
    pub fn start(&self) -> io::Result<()> {
        let mut state = self.inner.lock();
        if state.thread.is_some() {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("rustygatt-reactor".into())
            .spawn(move || run_loop(inner))?;

        state.thread = Some(handle.thread().id());
        debug!("Reactor thread started");
        Ok(())
    }

    /// Block until the loop thread is running. Returns false on timeout.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        while !state.running {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .inner
                .started
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// True when called from this reactor's loop thread
    pub fn is_reactor_thread(&self) -> bool {
        self.inner.lock().thread == Some(thread::current().id())
    }

    /// Run `job` on the loop thread
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.lock().jobs.push_back(Box::new(job));
        self.inner.waker.wake();
    }

    /// Watch `fd` for `interest`. The descriptor stays owned by the caller
    /// and must outlive the registration.
    pub fn register<F>(&self, fd: RawFd, interest: Interest, handler: F) -> SourceId
    where
        F: FnMut(Readiness) -> Option<Interest> + Send + 'static,
    {
        let id = {
            let mut state = self.inner.lock();
            state.next_source += 1;
            let id = SourceId(state.next_source);
            state.sources.insert(
                id,
                Source {
                    fd,
                    interest,
                    handler: Some(Box::new(handler)),
                },
            );
            id
        };

        trace!("Registered fd {} as {:?} for {:?}", fd, id, interest);
        self.inner.waker.wake();
        id
    }

    /// Stop watching a source. Returns false if it was already gone.
    pub fn deregister(&self, id: SourceId) -> bool {
        let removed = self.inner.lock().sources.remove(&id);
        match removed {
            Some(source) => {
                trace!("Deregistered fd {} ({:?})", source.fd, id);
                // Handler is dropped here, outside the state lock
                drop(source);
                self.inner.waker.wake();
                true
            }
            None => false,
        }
    }
}

fn revents_to_readiness(revents: libc::c_short) -> Readiness {
    let mut readiness = Readiness::empty();
    if revents & libc::POLLIN != 0 {
        readiness |= Readiness::READABLE;
    }
    if revents & libc::POLLOUT != 0 {
        readiness |= Readiness::WRITABLE;
    }
    if revents & (libc::POLLHUP | libc::POLLRDHUP) != 0 {
        readiness |= Readiness::HANGUP;
    }
    if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        readiness |= Readiness::ERROR;
    }
    readiness
}

fn run_loop(inner: Arc<Inner>) {
    {
        let mut state = inner.lock();
        state.running = true;
        inner.started.notify_all();
    }

    let mut pollfds: Vec<libc::pollfd> = Vec::new();
    let mut ids: Vec<SourceId> = Vec::new();

    loop {
        // Posted jobs first
        let jobs: Vec<Job> = inner.lock().jobs.drain(..).collect();
        for job in jobs {
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!("Reactor job panicked");
            }
        }

        pollfds.clear();
        ids.clear();
        pollfds.push(libc::pollfd {
            fd: inner.waker.read_fd,
            events: libc::POLLIN,
            revents: 0,
        });
        {
            let state = inner.lock();
            if !state.jobs.is_empty() {
                continue;
            }
            for (id, source) in state.sources.iter() {
                if source.handler.is_some() {
                    pollfds.push(libc::pollfd {
                        fd: source.fd,
                        events: source.interest.poll_events(),
                        revents: 0,
                    });
                    ids.push(*id);
                }
            }
        }

        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                error!("Reactor poll failed: {}", err);
                thread::sleep(Duration::from_millis(10));
            }
            continue;
        }

        if pollfds[0].revents != 0 {
            inner.waker.drain();
        }

        for (pfd, id) in pollfds[1..].iter().zip(ids.iter()) {
            if pfd.revents == 0 {
                continue;
            }
            dispatch(&inner, *id, pfd.revents);
        }
    }
}

fn dispatch(inner: &Inner, id: SourceId, revents: libc::c_short) {
    // Take the handler out; the source may have been removed meanwhile
    let mut handler = match inner.lock().sources.get_mut(&id) {
        Some(source) => match source.handler.take() {
            Some(handler) => handler,
            None => return,
        },
        None => return,
    };

    let readiness = revents_to_readiness(revents);
    let next = match panic::catch_unwind(AssertUnwindSafe(|| handler(readiness))) {
        Ok(next) => next,
        Err(_) => {
            error!("Reactor handler for {:?} panicked, removing it", id);
            None
        }
    };

    // An invalid descriptor would otherwise spin the loop
    let next = if revents & libc::POLLNVAL != 0 { None } else { next };

    let mut state = inner.lock();
    match next {
        Some(interest) => {
            if let Some(source) = state.sources.get_mut(&id) {
                source.interest = interest;
                source.handler = Some(handler);
                return;
            }
        }
        None => {
            state.sources.remove(&id);
        }
    }
    drop(state);
    drop(handler);
}
