use crate::config::BridgeConfig;
use crate::utils::dyn_future::DynFutureStatic;
use crate::Error;
use log::info;
use std::fmt;
use std::io;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub trait BridgeStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T> BridgeStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Something that can open a byte stream to a bridge
pub trait BridgeTransport: Send + Sync {
    fn connect(&self) -> DynFutureStatic<io::Result<Box<dyn BridgeStream>>>;
    fn description(&self) -> String;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Serial byte format, written as `<baud>,<bits>,<parity>,<stopbits>`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ByteFormat {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for ByteFormat {
    fn default() -> Self {
        ByteFormat {
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl FromStr for ByteFormat {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |what: &str| Error::Config(format!("Invalid {} in byte format '{}'", what, s));
        let mut format = ByteFormat::default();
        let mut fields = s.split(',').map(str::trim);
        if let Some(baud) = fields.next().filter(|f| !f.is_empty()) {
            format.baud_rate = u32::from_str(baud).map_err(|_| bad("baud rate"))?;
        }
        if let Some(bits) = fields.next() {
            format.data_bits = match bits {
                "5" => 5,
                "6" => 6,
                "7" => 7,
                "8" => 8,
                _ => return Err(bad("data bits")),
            };
        }
        if let Some(parity) = fields.next() {
            format.parity = match parity {
                "N" | "n" => Parity::None,
                "E" | "e" => Parity::Even,
                "O" | "o" => Parity::Odd,
                _ => return Err(bad("parity")),
            };
        }
        if let Some(stop) = fields.next() {
            format.stop_bits = match stop {
                "1" => 1,
                "2" => 2,
                _ => return Err(bad("stop bits")),
            };
        }
        if fields.next().is_some() {
            return Err(bad("field count"));
        }
        Ok(format)
    }
}

impl fmt::Display for ByteFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        write!(
            f,
            "{},{},{},{}",
            self.baud_rate, self.data_bits, parity, self.stop_bits
        )
    }
}

#[cfg(feature = "serial")]
pub struct SerialTransport {
    port: String,
    format: ByteFormat,
}

#[cfg(feature = "serial")]
impl SerialTransport {
    pub fn new(port: &str, format: ByteFormat) -> SerialTransport {
        SerialTransport {
            port: port.to_string(),
            format,
        }
    }

    fn builder(&self) -> tokio_serial::SerialPortBuilder {
        use tokio_serial::{DataBits, StopBits};
        let data_bits = match self.format.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let parity = match self.format.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };
        let stop_bits = if self.format.stop_bits == 2 {
            StopBits::Two
        } else {
            StopBits::One
        };
        tokio_serial::new(&self.port, self.format.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
    }
}

#[cfg(feature = "serial")]
impl BridgeTransport for SerialTransport {
    fn connect(&self) -> DynFutureStatic<io::Result<Box<dyn BridgeStream>>> {
        let res = tokio_serial::SerialStream::open(&self.builder())
            .map(|s| Box::new(s) as Box<dyn BridgeStream>)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Box::pin(std::future::ready(res))
    }

    fn description(&self) -> String {
        format!("{} ({})", self.port, self.format)
    }
}

pub struct TcpTransport {
    addr: String,
    allow_non_local: bool,
}

impl TcpTransport {
    pub fn new(addr: &str, allow_non_local: bool) -> TcpTransport {
        TcpTransport {
            addr: addr.to_string(),
            allow_non_local,
        }
    }
}

impl BridgeTransport for TcpTransport {
    fn connect(&self) -> DynFutureStatic<io::Result<Box<dyn BridgeStream>>> {
        let addr = self.addr.clone();
        let allow_non_local = self.allow_non_local;
        Box::pin(async move {
            let stream = TcpStream::connect(&addr).await?;
            let peer = stream.peer_addr()?;
            if !allow_non_local && !peer.ip().is_loopback() {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("Non-local bridge {} not allowed", peer),
                ));
            }
            stream.set_nodelay(true)?;
            info!("Connected to bridge at {}", peer);
            Ok(Box::new(stream) as Box<dyn BridgeStream>)
        })
    }

    fn description(&self) -> String {
        self.addr.clone()
    }
}

/// Select the transport for the configured target
pub fn open(config: &BridgeConfig) -> Result<Box<dyn BridgeTransport>, Error> {
    if config.is_tcp() {
        return Ok(Box::new(TcpTransport::new(
            &config.target,
            config.allow_non_local,
        )));
    }
    #[cfg(feature = "serial")]
    {
        let format = ByteFormat::from_str(&config.byte_format)?;
        Ok(Box::new(SerialTransport::new(&config.target, format)))
    }
    #[cfg(not(feature = "serial"))]
    {
        Err(Error::Config(format!(
            "{} looks like a serial device but serial support isn't built in",
            config.target
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn byte_formats() {
        assert_eq!(ByteFormat::from_str("9600,8,N,1").unwrap(), ByteFormat::default());
        let f = ByteFormat::from_str("19200,7,e,2").unwrap();
        assert_eq!(f.baud_rate, 19200);
        assert_eq!(f.data_bits, 7);
        assert_eq!(f.parity, Parity::Even);
        assert_eq!(f.stop_bits, 2);
        assert_eq!(f.to_string(), "19200,7,E,2");
        assert_eq!(ByteFormat::from_str("38400").unwrap().data_bits, 8);
        assert!(ByteFormat::from_str("fast").is_err());
        assert!(ByteFormat::from_str("9600,9,N,1").is_err());
        assert!(ByteFormat::from_str("9600,8,X,1").is_err());
        assert!(ByteFormat::from_str("9600,8,N,1,1").is_err());
    }

    #[tokio::test]
    async fn accept_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let transport = TcpTransport::new(&addr.to_string(), false);
        let (conn, accepted) = tokio::join!(transport.connect(), listener.accept());
        assert!(conn.is_ok());
        assert!(accepted.is_ok());
    }
}
