//! Dispatch loop
//!
//! A single worker thread owns a current-thread tokio runtime and all
//! network I/O. Callback threads only push jobs onto an unbounded queue, so
//! they never wait on a socket. Jobs are sent one after another.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use crate::constants::DISPATCH_THREAD_NAME;
use crate::error::DispatchError;
use crate::network::transmitter::{TransmitJob, TransmitStats, Transmitter};

/// Background worker performing every transmission
pub struct DispatchLoop {
    transmitter: Arc<Transmitter>,
    /// Queue into the worker; `None` while stopped
    queue: RwLock<Option<mpsc::UnboundedSender<TransmitJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchLoop {
    pub fn new(transmitter: Transmitter) -> Self {
        Self {
            transmitter: Arc::new(transmitter),
            queue: RwLock::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Launch the worker; a no-op if it is already running
    pub fn start(&self) -> Result<(), DispatchError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .map_err(DispatchError::Spawn)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let transmitter = self.transmitter.clone();
        let handle = thread::Builder::new()
            .name(DISPATCH_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(run(transmitter, rx)))
            .map_err(DispatchError::Spawn)?;

        *self.queue.write() = Some(tx);
        *worker = Some(handle);
        tracing::debug!("dispatch loop started");
        Ok(())
    }

    /// Close the queue, let queued jobs finish, and join the worker
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        // Dropping the sender ends the worker once the queue is empty
        self.queue.write().take();

        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                tracing::error!("dispatch worker panicked");
            }
            tracing::debug!("dispatch loop stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.queue.read().is_some()
    }

    /// Queue a job for transmission
    ///
    /// When the loop is not running the job is dropped here, which releases
    /// its session.
    pub fn submit(&self, job: TransmitJob) -> Result<(), DispatchError> {
        match self.queue.read().as_ref() {
            Some(tx) => tx.send(job).map_err(|_| DispatchError::NotRunning),
            None => Err(DispatchError::NotRunning),
        }
    }

    pub fn stats(&self) -> TransmitStats {
        self.transmitter.stats()
    }
}

impl Drop for DispatchLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(transmitter: Arc<Transmitter>, mut rx: mpsc::UnboundedReceiver<TransmitJob>) {
    while let Some(job) = rx.recv().await {
        transmitter.send(job).await;
    }
    tracing::debug!("dispatch queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use crate::streams::{CallId, SessionStore, Subscription};
    use std::io::Read;
    use std::net::{SocketAddr, TcpListener};

    fn store_for(destination: SocketAddr) -> Arc<SessionStore> {
        Arc::new(SessionStore::new(Arc::new(Subscription::new(0, "", destination))))
    }

    fn job(store: &Arc<SessionStore>, call_num: i64) -> TransmitJob {
        let id = CallId::from_call_num(call_num);
        store.insert_if_absent(id.clone()).unwrap();
        TransmitJob::new(store.clone(), id, Frame::new("{}".to_string(), &[1, 2, 3, 4]).unwrap())
    }

    #[test]
    fn test_submit_requires_running_loop() {
        let dispatch = DispatchLoop::new(Transmitter::new());
        let store = store_for("127.0.0.1:9".parse().unwrap());

        let err = dispatch.submit(job(&store, 1)).unwrap_err();
        assert!(matches!(err, DispatchError::NotRunning));
        // The rejected job took its session with it
        assert!(store.is_empty());
    }

    #[test]
    fn test_start_stop_idempotent() {
        let dispatch = DispatchLoop::new(Transmitter::new());
        dispatch.start().unwrap();
        dispatch.start().unwrap();
        assert!(dispatch.is_running());
        dispatch.stop();
        dispatch.stop();
        assert!(!dispatch.is_running());
    }

    #[test]
    fn test_queued_jobs_drain_on_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let mut received = Vec::new();
            for _ in 0..3 {
                let (mut conn, _) = listener.accept().unwrap();
                let mut bytes = Vec::new();
                conn.read_to_end(&mut bytes).unwrap();
                received.push(bytes.len());
            }
            received
        });

        let store = store_for(addr);
        let dispatch = DispatchLoop::new(Transmitter::new());
        dispatch.start().unwrap();

        let expected = Frame::new("{}".to_string(), &[1, 2, 3, 4]).unwrap().total_len();
        for call_num in 0..3 {
            dispatch.submit(job(&store, call_num)).unwrap();
        }
        dispatch.stop();

        assert!(store.is_empty());
        assert_eq!(server.join().unwrap(), vec![expected; 3]);
        assert_eq!(dispatch.stats().calls_sent, 3);
    }
}
