//! Thread placement and scheduling control.
//!
//! Pinning, real-time priority, thread naming and isolated-CPU discovery,
//! straight over the OS interfaces. Everything here is best-effort
//! configuration of an already-running thread: a failed call is reported
//! through its `Result` (and traced), never fatal, and the worker keeps
//! running with whatever the scheduler gave it.
//!
//! [`ConfiguredThread`] bundles the usual sequence — spawn, pin, name,
//! elevate — and guarantees the join on scope exit, including unwind
//! paths through the owning scope.

#[cfg(target_os = "linux")]
use std::fs;
use std::io;
use std::thread::{self, JoinHandle};

use thiserror::Error;

#[cfg(unix)]
use std::os::unix::thread::JoinHandleExt;

/// Path the kernel exposes the `isolcpus=` set under.
#[cfg(target_os = "linux")]
const ISOLATED_CPUS_PATH: &str = "/sys/devices/system/cpu/isolated";

/// Longest thread name the kernel keeps, excluding the terminator.
#[cfg(target_os = "linux")]
const MAX_THREAD_NAME: usize = 15;

/// Why a thread-control operation did not take effect.
#[derive(Debug, Error)]
pub enum ThreadCtlError {
    #[error("cpu {0} is out of range ({1} cpus online)")]
    InvalidCpu(usize, usize),
    #[error("realtime priority {0} is outside [1, 99]")]
    InvalidPriority(i32),
    #[error("not supported on this platform")]
    NotSupported,
    #[error("os call failed: {0}")]
    Os(#[from] io::Error),
}

pub type Result<T = ()> = std::result::Result<T, ThreadCtlError>;

/// Number of CPUs the scheduler can place threads on.
pub fn num_cpus() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 {
        n as usize
    } else {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }
}

/// Pins the calling thread to a single CPU.
pub fn pin_current_to(cpu: usize) -> Result {
    pin_pthread(unsafe { libc::pthread_self() }, cpu)
}

/// Pins another thread to a single CPU through its join handle.
pub fn pin<T>(handle: &JoinHandle<T>, cpu: usize) -> Result {
    pin_pthread(handle.as_pthread_t(), cpu)
}

#[cfg(target_os = "linux")]
fn pin_pthread(thread: libc::pthread_t, cpu: usize) -> Result {
    let online = num_cpus();
    if cpu >= online {
        return Err(ThreadCtlError::InvalidCpu(cpu, online));
    }

    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);

        let rc = libc::pthread_setaffinity_np(thread, size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc).into());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn pin_pthread(_thread: libc::pthread_t, _cpu: usize) -> Result {
    Err(ThreadCtlError::NotSupported)
}

/// Switches the calling thread to SCHED_FIFO at the given priority
/// (1..=99). Usually needs elevated privileges.
pub fn set_current_realtime(priority: i32) -> Result {
    set_realtime_pthread(unsafe { libc::pthread_self() }, priority)
}

/// Switches another thread to SCHED_FIFO through its join handle.
pub fn set_realtime<T>(handle: &JoinHandle<T>, priority: i32) -> Result {
    set_realtime_pthread(handle.as_pthread_t(), priority)
}

fn set_realtime_pthread(thread: libc::pthread_t, priority: i32) -> Result {
    if !(1..=99).contains(&priority) {
        return Err(ThreadCtlError::InvalidPriority(priority));
    }

    let param = libc::sched_param {
        sched_priority: priority,
    };
    let rc = unsafe { libc::pthread_setschedparam(thread, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc).into());
    }
    Ok(())
}

/// Whether the calling thread is currently scheduled SCHED_FIFO.
pub fn has_realtime() -> bool {
    let mut policy: libc::c_int = 0;
    let mut param = libc::sched_param { sched_priority: 0 };
    let rc = unsafe { libc::pthread_getschedparam(libc::pthread_self(), &mut policy, &mut param) };
    rc == 0 && policy == libc::SCHED_FIFO
}

/// Names the calling thread, truncating to the kernel limit.
pub fn set_current_name(name: &str) -> Result {
    set_name_pthread(unsafe { libc::pthread_self() }, name)
}

/// Names another thread through its join handle.
pub fn set_name<T>(handle: &JoinHandle<T>, name: &str) -> Result {
    set_name_pthread(handle.as_pthread_t(), name)
}

#[cfg(target_os = "linux")]
fn set_name_pthread(thread: libc::pthread_t, name: &str) -> Result {
    let truncated: String = name.chars().filter(|&c| c != '\0').take(MAX_THREAD_NAME).collect();
    let cname = std::ffi::CString::new(truncated).expect("nul bytes were stripped");

    let rc = unsafe { libc::pthread_setname_np(thread, cname.as_ptr()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc).into());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_name_pthread(_thread: libc::pthread_t, _name: &str) -> Result {
    Err(ThreadCtlError::NotSupported)
}

/// CPUs the kernel was booted to keep free of general scheduling
/// (`isolcpus=`). Empty when none are configured or the file is absent.
#[cfg(target_os = "linux")]
pub fn isolated_cpus() -> Vec<usize> {
    match fs::read_to_string(ISOLATED_CPUS_PATH) {
        Ok(contents) => parse_cpu_list(&contents),
        Err(_) => Vec::new(),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn isolated_cpus() -> Vec<usize> {
    Vec::new()
}

/// Parses the kernel's CPU list syntax: comma-separated integers and
/// inclusive `a-b` ranges. Malformed fragments are skipped; well-formed
/// ones around them still count.
pub fn parse_cpu_list(list: &str) -> Vec<usize> {
    let mut cpus = Vec::new();

    for token in list.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        match token.split_once('-') {
            Some((start, end)) => {
                if let (Ok(start), Ok(end)) = (start.trim().parse::<usize>(), end.trim().parse::<usize>()) {
                    if start <= end {
                        cpus.extend(start..=end);
                    }
                }
            }
            None => {
                if let Ok(cpu) = token.parse::<usize>() {
                    cpus.push(cpu);
                }
            }
        }
    }
    cpus
}

/// Gives the CPU away to the scheduler.
#[inline]
pub fn yield_now() {
    thread::yield_now();
}

/// Issues `iters` CPU pause hints; the busy-wait building block.
#[inline]
pub fn spin_wait(iters: u32) {
    for _ in 0..iters {
        std::hint::spin_loop();
    }
}

/// Placement and scheduling wishes for a [`ConfiguredThread`].
#[derive(Debug, Clone, Default)]
pub struct ThreadConfig {
    pub name: String,
    pub cpu: Option<usize>,
    pub realtime_priority: Option<i32>,
}

impl ThreadConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cpu: None,
            realtime_priority: None,
        }
    }

    pub fn pinned(mut self, cpu: usize) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn realtime(mut self, priority: i32) -> Self {
        self.realtime_priority = Some(priority);
        self
    }
}

/// A worker thread with its configuration applied and its join
/// guaranteed.
///
/// Configuration (pin, then name, then priority) is best-effort: the
/// thread runs regardless, and whatever failed is kept in
/// [`config_errors`](Self::config_errors). Dropping the handle joins the
/// worker, whichever way the owning scope exits.
pub struct ConfiguredThread {
    handle: Option<JoinHandle<()>>,
    errors: Vec<ThreadCtlError>,
}

impl ConfiguredThread {
    /// Launches `f` on a new thread and applies `config` to it.
    pub fn spawn<F>(config: ThreadConfig, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(config.name.clone())
            .spawn(f)
            .expect("failed to spawn worker thread");

        let mut errors = Vec::new();

        if let Some(cpu) = config.cpu {
            if let Err(e) = pin(&handle, cpu) {
                tracing::warn!(thread = %config.name, cpu, error = %e, "cpu pinning failed");
                errors.push(e);
            }
        }
        if let Err(e) = set_name(&handle, &config.name) {
            tracing::debug!(thread = %config.name, error = %e, "thread naming failed");
            errors.push(e);
        }
        if let Some(priority) = config.realtime_priority {
            if let Err(e) = set_realtime(&handle, priority) {
                tracing::warn!(thread = %config.name, priority, error = %e, "realtime priority failed");
                errors.push(e);
            }
        }

        Self {
            handle: Some(handle),
            errors,
        }
    }

    /// Configuration steps that did not take effect, in application
    /// order.
    pub fn config_errors(&self) -> &[ThreadCtlError] {
        &self.errors
    }

    /// Waits for the worker to finish.
    pub fn join(mut self) {
        self.join_inner();
    }

    fn join_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("configured worker thread panicked");
            }
        }
    }
}

impl Drop for ConfiguredThread {
    fn drop(&mut self) {
        self.join_inner();
    }
}
