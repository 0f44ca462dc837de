//! Minimal TraCI client. Only the commands needed to advance and end a simulation are
//! implemented. All integers are big-endian.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use bytes::{Buf, BufMut};
use tracing::debug;

use crate::capacity::driver::{SimOverrides, SimulationBackend, SimulationError, SimulationSession};

pub const CMD_SIMSTEP: u8 = 0x02;
pub const CMD_CLOSE: u8 = 0x7F;
const STATUS_OK: u8 = 0x00;

const CONNECT_ATTEMPTS: u32 = 120;
const CONNECT_DELAY: Duration = Duration::from_millis(250);

/// Starts `sumo` as a child process and controls it through its remote port.
#[derive(Debug, Clone)]
pub struct SumoBackend {
    binary: PathBuf,
}

impl SumoBackend {
    pub fn new(binary: PathBuf) -> Self {
        SumoBackend { binary }
    }

    pub fn args(config: &Path, port: u16, overrides: &SimOverrides) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-c".into(),
            config.into(),
            "--remote-port".into(),
            port.to_string().into(),
            "--no-step-log".into(),
            "true".into(),
        ];
        if let Some(scale) = overrides.scale {
            args.push("--scale".into());
            args.push(scale.to_string().into());
        }
        args
    }
}

impl SimulationBackend for SumoBackend {
    type Session = TraciSession;

    fn start(
        &self,
        config: &Path,
        overrides: &SimOverrides,
    ) -> Result<TraciSession, SimulationError> {
        let port = free_port()?;
        let args = SumoBackend::args(config, port, overrides);
        debug!("Calling {:?} with {:?}", self.binary, args);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| SimulationError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        match connect(&mut child, port) {
            Ok(stream) => Ok(TraciSession {
                child,
                stream,
                closed: false,
            }),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }
}

fn free_port() -> Result<u16, SimulationError> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// The simulator opens its port only after loading the scenario, so connecting is retried until
/// it succeeds or the process dies.
fn connect(child: &mut Child, port: u16) -> Result<TcpStream, SimulationError> {
    let mut last_error = None;
    for _ in 0..CONNECT_ATTEMPTS {
        if let Some(status) = child.try_wait()? {
            return Err(SimulationError::Exited(status));
        }
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
        thread::sleep(CONNECT_DELAY);
    }
    Err(SimulationError::Connect {
        port,
        source: last_error
            .unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::TimedOut)),
    })
}

pub struct TraciSession {
    child: Child,
    stream: TcpStream,
    closed: bool,
}

impl TraciSession {
    fn exchange(&mut self, id: u8, content: &[u8]) -> Result<(), SimulationError> {
        let message = encode_message(&[encode_command(id, content)]);
        self.stream.write_all(&message)?;
        let body = read_message(&mut self.stream)?;
        check_status(&body, id)
    }
}

impl SimulationSession for TraciSession {
    fn step(&mut self) -> Result<(), SimulationError> {
        // target time 0 advances by exactly one step
        let mut target = Vec::with_capacity(8);
        target.put_f64(0.);
        self.exchange(CMD_SIMSTEP, &target)
    }

    fn close(&mut self) -> Result<(), SimulationError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.exchange(CMD_CLOSE, &[]);
        if result.is_err() {
            let _ = self.child.kill();
        }
        let status = self.child.wait()?;
        debug!("Simulator exited with {status}");
        result
    }
}

impl Drop for TraciSession {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Length-prefixed command. Commands longer than 255 bytes use a zero byte followed by a 32 bit
/// length.
pub fn encode_command(id: u8, content: &[u8]) -> Vec<u8> {
    let short_length = content.len() + 2;
    let mut command = Vec::with_capacity(short_length + 4);
    if short_length <= u8::MAX as usize {
        command.put_u8(short_length as u8);
    } else {
        command.put_u8(0);
        command.put_u32((short_length + 4) as u32);
    }
    command.put_u8(id);
    command.put_slice(content);
    command
}

/// Prefixes the concatenated commands with the total message length, including the prefix.
pub fn encode_message(commands: &[Vec<u8>]) -> Vec<u8> {
    let total = 4 + commands.iter().map(Vec::len).sum::<usize>();
    let mut message = Vec::with_capacity(total);
    message.put_u32(total as u32);
    for command in commands {
        message.put_slice(command);
    }
    message
}

/// Reads one length-prefixed message and returns its body. The buffer only grows with the bytes
/// actually received, so a corrupt length prefix cannot force a large allocation.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Vec<u8>, SimulationError> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let total = (&header[..]).get_u32() as usize;
    if total < header.len() {
        return Err(SimulationError::Protocol(format!(
            "message length {total}"
        )));
    }

    let expected = total - header.len();
    let mut body = Vec::new();
    reader.take(expected as u64).read_to_end(&mut body)?;
    if body.len() < expected {
        return Err(SimulationError::Protocol(format!(
            "message announced {expected} bytes, received {}",
            body.len()
        )));
    }
    Ok(body)
}

/// Checks the status response at the start of a message body. Anything following it, such as
/// subscription results, is ignored.
pub fn check_status(body: &[u8], expected: u8) -> Result<(), SimulationError> {
    let truncated = || SimulationError::Protocol("truncated status response".to_string());
    let mut body = body;

    if !body.has_remaining() {
        return Err(truncated());
    }
    if body.get_u8() == 0 {
        if body.remaining() < 4 {
            return Err(truncated());
        }
        body.advance(4);
    }

    if body.remaining() < 6 {
        return Err(truncated());
    }
    let command = body.get_u8();
    let status = body.get_u8();
    let length = body.get_u32() as usize;
    if body.remaining() < length {
        return Err(truncated());
    }
    let description = &body.chunk()[..length];

    if command != expected {
        return Err(SimulationError::Protocol(format!(
            "expected status of command {expected:#04x}, got {command:#04x}"
        )));
    }
    if status != STATUS_OK {
        return Err(SimulationError::Command {
            command,
            status,
            message: String::from_utf8_lossy(description).to_string(),
        });
    }
    Ok(())
}
