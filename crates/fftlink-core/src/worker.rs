//! Named worker threads with panic logging

use std::thread::JoinHandle;

/// Handle to a long-lived worker thread
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the worker thread is still alive
    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Wait for the worker to exit
    pub fn join(&mut self) {
        if let Some(h) = self.thread.take() {
            if h.join().is_err() {
                tracing::error!(worker = %self.name, "Worker thread could not be joined");
            }
        }
    }
}

/// Spawn `body` on a named thread
///
/// A panic inside `body` is caught and logged so that the thread still
/// exits cleanly and can be joined.
pub fn spawn_worker<F>(name: &str, body: F) -> std::io::Result<WorkerHandle>
where
    F: FnOnce() + Send + 'static,
{
    let thread_name = name.to_string();
    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body));
            match result {
                Ok(()) => tracing::info!(worker = %thread_name, "Worker thread exited normally"),
                Err(panic_info) => {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic".to_string()
                    };
                    tracing::error!(worker = %thread_name, panic = %msg, "Worker thread PANICKED");
                }
            }
        })?;

    Ok(WorkerHandle {
        name: name.to_string(),
        thread: Some(thread),
    })
}
