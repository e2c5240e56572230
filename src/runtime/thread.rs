//! A dedicated thread running its own message loop.
//!
//! `LoopThread` spawns a thread, constructs a [`MessageLoop`] on it, and
//! runs the loop until shutdown. Other threads talk to it through the
//! published [`LoopHandle`].

use std::sync::mpsc;
use std::thread::JoinHandle;

use super::config::{ConfigError, LoopConfig};
use super::{LoopHandle, MessageLoop};

/// A thread whose sole job is running a message loop.
pub struct LoopThread {
    handle: LoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl LoopThread {
    /// Spawns a loop thread with the default configuration.
    #[must_use]
    pub fn spawn() -> Self {
        match Self::spawn_with_config(LoopConfig::default()) {
            Ok(loop_thread) => loop_thread,
            Err(err) => unreachable!("default loop config rejected: {err}"),
        }
    }

    /// Spawns a loop thread with the given configuration.
    pub fn spawn_with_config(config: LoopConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (publish, subscribe) = mpsc::channel();
        let thread = std::thread::spawn(move || {
            let message_loop = match MessageLoop::with_config(config) {
                Ok(message_loop) => message_loop,
                Err(err) => unreachable!("validated loop config rejected: {err}"),
            };
            let _ = publish.send(message_loop.handle());
            message_loop.run();
        });
        let handle = subscribe
            .recv()
            .expect("loop thread exited before publishing its handle");
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// The cross-thread handle to the loop.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Requests shutdown without waiting for the thread to exit.
    pub fn shutdown(&self) {
        self.handle.shutdown();
    }

    /// Requests shutdown and waits for the thread to exit.
    pub fn join(mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
