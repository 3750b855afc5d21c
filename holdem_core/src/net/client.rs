//! A low-level blocking line client.
//!
//! This client is synchronous and so is primarily a testing utility
//! rather than an actual poker client: tests drive the server loop by
//! hand and read replies line by line.

use anyhow::{Context, Error, bail};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use uuid::Uuid;

use crate::game::entities::ClientId;
use crate::protocol::SERVER_VERSION;

/// Default timeout for reading a reply from the server.
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Default timeout for writes to the server.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Client {
    /// The client id this session introduced itself with.
    pub cid: ClientId,
    /// Session uuid, fresh by default; reuse one to reconnect.
    pub uuid: String,
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    /// Open a connection without any protocol exchange.
    pub fn dial(addr: SocketAddr) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr).context("couldn't connect")?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            cid: -1,
            uuid: Uuid::new_v4().to_string(),
            stream,
            reader,
        })
    }

    /// Send the `PCLIENT` handshake line. The reply arrives once the
    /// server loop has run; read it with [`Client::read_line`].
    pub fn introduce(&mut self, cid: ClientId) -> Result<(), Error> {
        self.cid = cid;
        let uuid = self.uuid.clone();
        self.send_line(&format!("PCLIENT {SERVER_VERSION} {uuid} {cid}"))
    }

    /// Send `PCLIENT` with an explicit version, for compatibility
    /// testing.
    pub fn introduce_with_version(&mut self, version: u32, cid: ClientId) -> Result<(), Error> {
        self.cid = cid;
        let uuid = self.uuid.clone();
        self.send_line(&format!("PCLIENT {version} {uuid} {cid}"))
    }

    pub fn send_info(&mut self, name: &str) -> Result<(), Error> {
        self.send_line(&format!("INFO \"name:{name}\""))
    }

    pub fn send_line(&mut self, line: &str) -> Result<(), Error> {
        self.stream
            .write_all(format!("{line}\n").as_bytes())
            .context("couldn't send line")
    }

    /// Read the next reply line, blocking up to the read timeout.
    pub fn read_line(&mut self) -> Result<String, Error> {
        match self.try_read_line()? {
            Some(line) => Ok(line),
            None => bail!("no line from server within the read timeout"),
        }
    }

    /// Read the next reply line if one is available in time.
    pub fn try_read_line(&mut self) -> Result<Option<String>, Error> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => bail!("server closed the connection"),
            Ok(_) => {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Ok(Some(line))
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drain replies until one starts with `prefix`, or fail when the
    /// stream runs dry.
    pub fn read_line_starting(&mut self, prefix: &str) -> Result<String, Error> {
        while let Some(line) = self.try_read_line()? {
            if line.starts_with(prefix) {
                return Ok(line);
            }
        }
        bail!("no line starting with {prefix:?} from server")
    }

    /// Drain and discard everything currently queued.
    pub fn drain(&mut self) -> Result<(), Error> {
        while self.try_read_line()?.is_some() {}
        Ok(())
    }
}
