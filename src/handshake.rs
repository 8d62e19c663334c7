use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// TLS record content type for handshake messages.
pub const RECORD_TYPE_HANDSHAKE: u8 = 22;
/// Handshake message type for ClientHello.
pub const MSG_TYPE_CLIENT_HELLO: u8 = 1;

const EXT_SERVER_NAME: u16 = 0;
const NAME_TYPE_HOST: u8 = 0;

/// What the sniff phase learns about a connection before any byte is relayed.
#[derive(Debug)]
pub struct ClientHello {
    /// Hostname from the server_name extension. Empty when the client sent none.
    pub hostname: String,
    /// TLS minor version from the first record header (0 = SSL3.0, 3 = TLS1.2).
    pub tls_minor: u8,
}

#[derive(Debug)]
pub enum SniffError {
    /// First byte of a record header was not the handshake content type.
    NotHandshake(u8),
    /// The handshake message is not a ClientHello.
    NotClientHello(u8),
    /// A declared field length points past the end of the message body.
    Truncated,
    Io(io::Error),
}

impl std::fmt::Display for SniffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SniffError::NotHandshake(t) => {
                write!(f, "record content type {t} is not a TLS handshake")
            }
            SniffError::NotClientHello(t) => {
                write!(f, "handshake message type {t} is not a ClientHello")
            }
            SniffError::Truncated => write!(f, "ClientHello field lengths exceed the message body"),
            SniffError::Io(cause) => write!(f, "read failed: {cause}"),
        }
    }
}

impl std::error::Error for SniffError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SniffError::Io(cause) => Some(cause),
            _ => None,
        }
    }
}

impl From<io::Error> for SniffError {
    fn from(cause: io::Error) -> SniffError {
        SniffError::Io(cause)
    }
}

/// Read TLS records from `src` until a complete ClientHello is buffered, then
/// walk it to the server_name extension. Only reads; the caller is expected
/// to capture the consumed bytes (see `RecordingReader`) for replay.
pub async fn extract_sni<R: AsyncRead + Unpin>(src: &mut R) -> Result<ClientHello, SniffError> {
    let mut header = [0u8; 5];
    src.read_exact(&mut header).await?;
    if header[0] != RECORD_TYPE_HANDSHAKE {
        return Err(SniffError::NotHandshake(header[0]));
    }
    let tls_minor = header[2];

    let mut message = Vec::new();
    read_record_body(src, &header, &mut message).await?;

    // A ClientHello may span multiple records. Keep pulling records until the
    // 4-byte message header and then the declared body are fully buffered.
    while message.len() < 4 {
        read_record(src, &mut message).await?;
    }
    if message[0] != MSG_TYPE_CLIENT_HELLO {
        return Err(SniffError::NotClientHello(message[0]));
    }
    let body_len =
        ((message[1] as usize) << 16) | ((message[2] as usize) << 8) | message[3] as usize;
    while message.len() < 4 + body_len {
        read_record(src, &mut message).await?;
    }

    let hostname = parse_hello_body(&message[4..4 + body_len])?;
    Ok(ClientHello { hostname, tls_minor })
}

async fn read_record<R: AsyncRead + Unpin>(
    src: &mut R,
    into: &mut Vec<u8>,
) -> Result<(), SniffError> {
    let mut header = [0u8; 5];
    src.read_exact(&mut header).await?;
    if header[0] != RECORD_TYPE_HANDSHAKE {
        return Err(SniffError::NotHandshake(header[0]));
    }
    read_record_body(src, &header, into).await
}

async fn read_record_body<R: AsyncRead + Unpin>(
    src: &mut R,
    header: &[u8; 5],
    into: &mut Vec<u8>,
) -> Result<(), SniffError> {
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    let start = into.len();
    into.resize(start + len, 0);
    src.read_exact(&mut into[start..]).await?;
    Ok(())
}

// Cursor over the reassembled message body. Every read is bounds checked
// against the declared length.
struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8]) -> Fields<'a> {
        Fields { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SniffError> {
        let end = self.pos.checked_add(n).ok_or(SniffError::Truncated)?;
        if end > self.buf.len() {
            return Err(SniffError::Truncated);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, SniffError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SniffError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
}

fn parse_hello_body(body: &[u8]) -> Result<String, SniffError> {
    let mut f = Fields::new(body);
    f.take(2 + 32)?; // client version, random
    let n = f.u8()? as usize;
    f.take(n)?; // session id
    let n = f.u16()? as usize;
    f.take(n)?; // cipher suites
    let n = f.u8()? as usize;
    f.take(n)?; // compression methods

    if f.is_empty() {
        // Legacy hello without an extensions block.
        return Ok(String::new());
    }
    let ext_len = f.u16()? as usize;
    let mut exts = Fields::new(f.take(ext_len)?);
    while !exts.is_empty() {
        let ext_type = exts.u16()?;
        let len = exts.u16()? as usize;
        let data = exts.take(len)?;
        if ext_type != EXT_SERVER_NAME {
            continue;
        }
        let mut names = Fields::new(data);
        let list_len = names.u16()? as usize;
        let mut list = Fields::new(names.take(list_len)?);
        while !list.is_empty() {
            let name_type = list.u8()?;
            let name_len = list.u16()? as usize;
            let name = list.take(name_len)?;
            if name_type == NAME_TYPE_HOST {
                return Ok(String::from_utf8_lossy(name).into_owned());
            }
        }
    }
    Ok(String::new())
}
