//! 转发线程
//!
//! PTY 和终端的读写都是阻塞的，各自放在独立线程里，通过通道把事件交给
//! 协调循环。协调循环是会话缓冲区唯一的写者。

use portable_pty::Child;
use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8192;

/// 转发线程发给协调循环的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEvent {
    /// 子进程输出（已回显到终端）
    Output(Vec<u8>),
    OutputClosed,
    /// 用户输入（尚未转发）
    Input(Vec<u8>),
    InputClosed,
    /// 子进程退出码
    Exited(i32),
}

/// PTY 输出 → 终端回显 → 协调循环
///
/// 回显在这里完成，协调循环再慢也不会拖慢屏幕输出。
pub fn spawn_output_pump(
    mut reader: Box<dyn Read + Send>,
    mut echo: Box<dyn Write + Send>,
    events: mpsc::UnboundedSender<ProxyEvent>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("empusa-output".to_string())
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = &buf[..n];
                        if let Err(e) = echo.write_all(chunk).and_then(|_| echo.flush()) {
                            debug!(error = %e, "Terminal echo failed");
                        }
                        if events.send(ProxyEvent::Output(chunk.to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    // Linux 上子进程退出后读 master 会得到 EIO
                    Err(e) => {
                        debug!(error = %e, "PTY output closed");
                        break;
                    }
                }
            }
            let _ = events.send(ProxyEvent::OutputClosed);
        })
}

/// 终端输入 → 协调循环
pub fn spawn_input_pump(
    mut input: Box<dyn Read + Send>,
    events: mpsc::UnboundedSender<ProxyEvent>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("empusa-input".to_string())
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match input.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if events.send(ProxyEvent::Input(buf[..n].to_vec())).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(error = %e, "Terminal input closed");
                        break;
                    }
                }
            }
            let _ = events.send(ProxyEvent::InputClosed);
        })
}

/// 协调循环 → PTY 写端
///
/// 发送端关闭或写入失败时退出。
pub fn spawn_input_forwarder(
    mut writer: Box<dyn Write + Send>,
    chunks: std_mpsc::Receiver<Vec<u8>>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("empusa-forward".to_string())
        .spawn(move || {
            for chunk in chunks {
                if let Err(e) = writer.write_all(&chunk).and_then(|_| writer.flush()) {
                    warn!(error = %e, bytes = chunk.len(), "Forwarding input to child failed");
                    break;
                }
            }
        })
}

/// 等待子进程退出
pub fn spawn_exit_watcher(
    mut child: Box<dyn Child + Send + Sync>,
    events: mpsc::UnboundedSender<ProxyEvent>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("empusa-wait".to_string())
        .spawn(move || {
            let code = match child.wait() {
                // 被信号杀死时 portable-pty 报告 1，只给出信号名，没有编号
                Ok(status) => status.exit_code() as i32,
                Err(e) => {
                    warn!(error = %e, "Waiting for child failed");
                    1
                }
            };
            let _ = events.send(ProxyEvent::Exited(code));
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_output_pump_echoes_then_reports() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = SharedSink::default();

        let handle = spawn_output_pump(
            Box::new(Cursor::new(b"\x1b[1mhi\x1b[0m".to_vec())),
            Box::new(sink.clone()),
            tx,
        )
        .unwrap();
        handle.join().unwrap();

        assert_eq!(rx.try_recv().unwrap(), ProxyEvent::Output(b"\x1b[1mhi\x1b[0m".to_vec()));
        assert_eq!(rx.try_recv().unwrap(), ProxyEvent::OutputClosed);
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"\x1b[1mhi\x1b[0m");
    }

    #[test]
    fn test_input_pump_reports_eof() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_input_pump(Box::new(Cursor::new(b"y\r".to_vec())), tx)
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), ProxyEvent::Input(b"y\r".to_vec()));
        assert_eq!(rx.try_recv().unwrap(), ProxyEvent::InputClosed);
    }

    #[test]
    fn test_forwarder_writes_in_order() {
        let sink = SharedSink::default();
        let (tx, rx) = std_mpsc::channel();
        let handle = spawn_input_forwarder(Box::new(sink.clone()), rx).unwrap();

        for chunk in [&b"one "[..], b"two ", b"three"] {
            tx.send(chunk.to_vec()).unwrap();
        }
        drop(tx);
        handle.join().unwrap();

        assert_eq!(sink.0.lock().unwrap().as_slice(), b"one two three");
    }
}
