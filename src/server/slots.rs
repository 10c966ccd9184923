use crate::server::{LaunchId, LogBuffer, LogSink, ProcessHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runtime state of one server: the live handle and captured output.
///
/// `ops` serializes the background halves of start, stop and exit handling
/// for this server. The reconciler only `try_lock`s it and skips busy slots.
#[derive(Debug)]
pub(crate) struct ServerSlot {
    ops: tokio::sync::Mutex<()>,
    handle: Mutex<Option<ProcessHandle>>,
    sink: Mutex<Option<Arc<LogSink>>>,
    buffer: Arc<LogBuffer>,
    last_error: Mutex<Option<String>>,
}

impl ServerSlot {
    fn new(buffer_capacity: usize) -> Self {
        Self {
            ops: tokio::sync::Mutex::new(()),
            handle: Mutex::new(None),
            sink: Mutex::new(None),
            buffer: Arc::new(LogBuffer::new(buffer_capacity)),
            last_error: Mutex::new(None),
        }
    }

    pub(crate) async fn lock_ops(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.ops.lock().await
    }

    pub(crate) fn try_lock_ops(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.ops.try_lock().ok()
    }

    pub(crate) fn handle(&self) -> Option<ProcessHandle> {
        guard(&self.handle).clone()
    }

    pub(crate) fn set_handle(&self, handle: Option<ProcessHandle>) {
        *guard(&self.handle) = handle;
    }

    /// Clear the handle only if it still belongs to `launch_id`.
    pub(crate) fn release_handle(&self, launch_id: LaunchId) -> bool {
        let mut handle = guard(&self.handle);
        if handle.as_ref().is_some_and(|h| h.launch_id == launch_id) {
            *handle = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn sink(&self) -> Option<Arc<LogSink>> {
        guard(&self.sink).clone()
    }

    pub(crate) fn set_sink(&self, sink: Option<Arc<LogSink>>) {
        *guard(&self.sink) = sink;
    }

    pub(crate) fn buffer(&self) -> Arc<LogBuffer> {
        Arc::clone(&self.buffer)
    }

    pub(crate) fn record_error(&self, message: impl Into<String>) {
        *guard(&self.last_error) = Some(message.into());
    }

    pub(crate) fn clear_error(&self) {
        *guard(&self.last_error) = None;
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        guard(&self.last_error).clone()
    }
}

/// Slots keyed by server name.
#[derive(Debug)]
pub(crate) struct SlotTable {
    buffer_capacity: usize,
    slots: Mutex<HashMap<String, Arc<ServerSlot>>>,
}

impl SlotTable {
    pub(crate) fn new(buffer_capacity: usize) -> Self {
        Self {
            buffer_capacity,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get_or_create(&self, name: &str) -> Arc<ServerSlot> {
        let mut slots = guard(&self.slots);
        Arc::clone(
            slots
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ServerSlot::new(self.buffer_capacity))),
        )
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<ServerSlot>> {
        guard(&self.slots).get(name).cloned()
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<ServerSlot>> {
        guard(&self.slots).remove(name)
    }

    /// Move a slot, with its captured output, to a new name.
    pub(crate) fn rename(&self, from: &str, to: &str) {
        let mut slots = guard(&self.slots);
        if let Some(slot) = slots.remove(from) {
            slots.insert(to.to_string(), slot);
        }
    }
}
