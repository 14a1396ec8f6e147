//! 带超时的线程 join

use std::io;
use std::sync::mpsc;
use std::thread::{JoinHandle, spawn};
use std::time::Duration;

/// 带超时的线程 join
///
/// 超时后目标线程被分离，由辅助线程继续等待其结束。
pub trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = mpsc::channel();
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(io::Error::new(
                io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}
