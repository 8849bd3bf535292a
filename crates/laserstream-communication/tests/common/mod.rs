#![allow(dead_code)]

use laserstream_communication::{
    Device, DeviceCatalog, DeviceEnumerator, LinkOpener, SerialLink, SerialPortInfo,
    StreamController, StreamingSession,
};
use laserstream_core::{Error, Result};
use laserstream_settings::{Config, FlowControlMode, MatchStrategy, StreamingSettings};
use parking_lot::Mutex;
use std::sync::Arc;

/// State behind a mock link, inspectable from the test
#[derive(Debug, Default)]
pub struct LinkState {
    pub written: Vec<u8>,
    pub incoming: Vec<u8>,
    pub fail_writes: bool,
    pub open: bool,
    pub input_flushes: usize,
    pub output_flushes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LinkHandle(pub Arc<Mutex<LinkState>>);

impl LinkHandle {
    pub fn open() -> Self {
        let handle = Self::default();
        handle.0.lock().open = true;
        handle
    }

    pub fn feed(&self, bytes: &[u8]) {
        self.0.lock().incoming.extend_from_slice(bytes);
    }

    pub fn written(&self) -> Vec<u8> {
        self.0.lock().written.clone()
    }

    /// Written line commands, realtime bytes removed
    pub fn commands(&self) -> Vec<String> {
        let bytes: Vec<u8> = self
            .written()
            .into_iter()
            .filter(|b| *b != b'?' && *b != 0x18)
            .collect();
        String::from_utf8_lossy(&bytes)
            .split_terminator('\n')
            .map(str::to_string)
            .collect()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.0.lock().fail_writes = fail;
    }

    pub fn is_open(&self) -> bool {
        self.0.lock().open
    }
}

pub struct MockLink {
    name: String,
    handle: LinkHandle,
}

impl MockLink {
    pub fn new(name: &str, handle: LinkHandle) -> Self {
        Self {
            name: name.to_string(),
            handle,
        }
    }
}

impl SerialLink for MockLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.handle.0.lock();
        if !state.open || state.fail_writes {
            return Err(Error::io(&self.name, "device unplugged"));
        }
        state.written.extend_from_slice(data);
        Ok(data.len())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let mut state = self.handle.0.lock();
        if !state.open {
            return Err(Error::io(&self.name, "link is closed"));
        }
        Ok(std::mem::take(&mut state.incoming))
    }

    fn flush_input(&mut self) -> Result<()> {
        let mut state = self.handle.0.lock();
        state.incoming.clear();
        state.input_flushes += 1;
        Ok(())
    }

    fn flush_output(&mut self) -> Result<()> {
        self.handle.0.lock().output_flushes += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.handle.0.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.handle.0.lock().open
    }
}

/// Opener that hands out mock links and remembers them
#[derive(Clone, Default)]
pub struct MockOpener {
    pub opened: Arc<Mutex<Vec<(String, LinkHandle)>>>,
    pub refuse: Arc<Mutex<bool>>,
}

impl MockOpener {
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn last(&self) -> LinkHandle {
        self.opened
            .lock()
            .last()
            .map(|(_, handle)| handle.clone())
            .expect("no link opened")
    }

    pub fn last_path(&self) -> String {
        self.opened
            .lock()
            .last()
            .map(|(path, _)| path.clone())
            .expect("no link opened")
    }
}

impl LinkOpener for MockOpener {
    fn open(&self, device: &Device) -> Result<Box<dyn SerialLink>> {
        if *self.refuse.lock() {
            return Err(Error::io(&device.path, "permission denied"));
        }
        let handle = LinkHandle::open();
        self.opened
            .lock()
            .push((device.path.clone(), handle.clone()));
        Ok(Box::new(MockLink::new(&device.path, handle)))
    }
}

/// Fixed list of ports, replaceable mid-test
#[derive(Clone, Default)]
pub struct FixedPorts(pub Arc<Mutex<Vec<SerialPortInfo>>>);

impl FixedPorts {
    pub fn with(ports: Vec<SerialPortInfo>) -> Self {
        Self(Arc::new(Mutex::new(ports)))
    }

    pub fn replace(&self, ports: Vec<SerialPortInfo>) {
        *self.0.lock() = ports;
    }
}

impl DeviceEnumerator for FixedPorts {
    fn enumerate(&self) -> Result<Vec<SerialPortInfo>> {
        Ok(self.0.lock().clone())
    }
}

pub fn arduino(path: &str) -> SerialPortInfo {
    SerialPortInfo::new(path, "Arduino Uno").with_usb_ids(0x2341, 0x0043)
}

pub fn streaming(capacity: usize, flow_control: FlowControlMode) -> StreamingSettings {
    StreamingSettings {
        rx_buffer_capacity: capacity,
        flow_control,
        status_poll_ms: None,
        skip_blank_lines: true,
    }
}

pub fn controller(capacity: usize, flow_control: FlowControlMode) -> StreamController {
    StreamController::new(&streaming(capacity, flow_control))
}

pub fn test_config(flow_control: FlowControlMode) -> Config {
    let mut config = Config::default();
    config.connection.port = None;
    config.connection.match_pattern = "2341".to_string();
    config.connection.match_strategy = MatchStrategy::HardwareId;
    config.connection.settle_ms = 0;
    config.streaming = streaming(128, flow_control);
    config
}

pub fn session_with(
    config: &Config,
    ports: FixedPorts,
) -> (StreamingSession, MockOpener) {
    let opener = MockOpener::default();
    let catalog = DeviceCatalog::new(Box::new(ports), config.connection.match_strategy);
    let session = StreamingSession::with_backend(config, catalog, Box::new(opener.clone()))
        .expect("valid config");
    (session, opener)
}

/// `<Run|MPos:0,0,0|Bf:15,free>`
pub fn report_free(free: usize) -> Vec<u8> {
    format!("<Run|MPos:0.000,0.000,0.000|Bf:15,{}>\r\n", free).into_bytes()
}
