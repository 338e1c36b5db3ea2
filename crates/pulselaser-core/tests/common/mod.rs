#![allow(dead_code)]

use pulselaser_core::protocol::{CommunicationChannel, PortOpener, ProtocolError};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Shared state of a mock serial port
#[derive(Default)]
pub struct MockState {
    pub inbound: VecDeque<u8>,
    pub written: Vec<u8>,
    pub closed: bool,
    pub fail_writes: bool,
    pub fail_reads: bool,
    /// Exact request frame -> bytes the device answers with
    pub responses: HashMap<Vec<u8>, Vec<u8>>,
}

/// Test-side handle on a mock port; the channel itself goes to the code under test
#[derive(Clone, Default)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self) -> Box<dyn CommunicationChannel> {
        Box::new(MockChannel {
            state: Arc::clone(&self.0),
        })
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        self.0.lock().unwrap().inbound.extend(bytes.iter().copied());
    }

    pub fn respond_to(&self, request: Vec<u8>, reply: Vec<u8>) {
        self.0.lock().unwrap().responses.insert(request, reply);
    }

    pub fn written(&self) -> Vec<u8> {
        self.0.lock().unwrap().written.clone()
    }

    /// Written frames, terminator included
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        self.written()
            .split_inclusive(|b| *b == b'\r')
            .map(|f| f.to_vec())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.0.lock().unwrap().closed
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.0.lock().unwrap().fail_writes = fail;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.0.lock().unwrap().fail_reads = fail;
    }
}

pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
}

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        state.written.extend_from_slice(buf);
        if let Some(reply) = state.responses.get(buf).cloned() {
            state.inbound.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for MockChannel {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::Other, "mock read failure"));
        }
        Ok(state.inbound.len() as u32)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().inbound.clear();
        Ok(())
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
    }
}

/// Opens mock ports by name; unknown names fail to open
#[derive(Default)]
pub struct MockOpener {
    pub ports: HashMap<String, MockHandle>,
    pub opened: Vec<String>,
}

impl MockOpener {
    pub fn with_port(mut self, name: &str, handle: MockHandle) -> Self {
        self.ports.insert(name.to_string(), handle);
        self
    }
}

impl PortOpener for MockOpener {
    fn open(&mut self, name: &str) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        self.opened.push(name.to_string());
        match self.ports.get(name) {
            Some(handle) => Ok(handle.channel()),
            None => Err(ProtocolError::PortOpenFailed {
                port: name.to_string(),
                reason: "no such port".to_string(),
            }),
        }
    }
}

/// Poll `condition` until it holds or `timeout` expires
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
