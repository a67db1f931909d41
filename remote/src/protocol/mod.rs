//! Legacy remote-copy control protocol
//!
//! A file is announced by a single ASCII control record:
//!
//! ```text
//! C<mode> <size> <name>\n        e.g. "C0644 1024 report.txt\n"
//! ```
//!
//! followed by exactly `size` data bytes and a single `0x00` terminator. Each phase is confirmed
//! with a one-byte acknowledgement: `0x00` success, `0x01` warning, `0x02` fatal. The last two
//! carry a free-text message terminated by `\n`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{Error, Result};

/// Permission mode announced for every pushed file.
pub const DEFAULT_MODE: &str = "0644";

/// Readiness signal, payload terminator and positive acknowledgement share the same byte.
pub const NUL: u8 = 0x00;

const ACK_OK: u8 = 0x00;
const ACK_WARNING: u8 = 0x01;
const ACK_FATAL: u8 = 0x02;

// a control line longer than this is garbage, not a record
const MAX_LINE_LEN: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub mode: String,
    pub size: u64,
    pub name: String,
}

fn is_octal_mode(mode: &str) -> bool {
    !mode.is_empty() && mode.bytes().all(|b| (b'0'..=b'7').contains(&b))
}

impl ControlRecord {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            mode: DEFAULT_MODE.to_string(),
            size,
            name: name.into(),
        }
    }

    /// Serializes the record as `C<mode> <size> <name>\n`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.name.is_empty() {
            return Err(Error::encoding("file name is empty"));
        }
        if self.name.contains(|c| c == '\n' || c == '\0') {
            return Err(Error::encoding(format!(
                "file name {:?} contains a newline or NUL",
                self.name
            )));
        }
        if self.mode.len() != 4 || !is_octal_mode(&self.mode) {
            return Err(Error::encoding(format!(
                "mode {:?} is not a 4-digit octal permission string",
                self.mode
            )));
        }
        Ok(format!("C{} {} {}\n", self.mode, self.size, self.name).into_bytes())
    }

    /// Parses one control line, with or without its trailing newline.
    pub fn decode(line: &[u8]) -> Result<Self> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let Some(body) = line.strip_prefix(b"C") else {
            return Err(Error::protocol(format!(
                "expected control record starting with 'C', got {:?}",
                String::from_utf8_lossy(line)
            )));
        };
        let body = std::str::from_utf8(body)
            .map_err(|_| Error::protocol("control record is not valid UTF-8"))?;
        // the name is the remainder of the line and may contain spaces
        let mut fields = body.splitn(3, ' ');
        let (Some(mode), Some(size), Some(name)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(Error::protocol(format!(
                "control record {body:?} has fewer than three fields"
            )));
        };
        if !is_octal_mode(mode) {
            return Err(Error::protocol(format!("invalid mode {mode:?}")));
        }
        let size = size
            .parse::<u64>()
            .map_err(|_| Error::protocol(format!("invalid size {size:?}")))?;
        if name.is_empty() || name.contains('\0') {
            return Err(Error::protocol(format!("invalid file name {name:?}")));
        }
        Ok(Self {
            mode: mode.to_string(),
            size,
            name: name.to_string(),
        })
    }
}

impl std::fmt::Display for ControlRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{} {} {}", self.mode, self.size, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Ok,
    /// Informational, the transfer continues.
    Warning(String),
    /// The transfer is aborted.
    Fatal(String),
}

impl Ack {
    pub fn encode(&self) -> Vec<u8> {
        let (code, message) = match self {
            Ack::Ok => return vec![ACK_OK],
            Ack::Warning(message) => (ACK_WARNING, message),
            Ack::Fatal(message) => (ACK_FATAL, message),
        };
        let mut bytes = Vec::with_capacity(message.len() + 2);
        bytes.push(code);
        bytes.extend(message.bytes().filter(|b| *b != b'\n'));
        bytes.push(b'\n');
        bytes
    }

    /// Interprets a status byte whose message line (if any) was already read.
    fn from_parts(code: u8, message: &[u8]) -> Result<Self> {
        let message = String::from_utf8_lossy(message.strip_suffix(b"\n").unwrap_or(message))
            .into_owned();
        match code {
            ACK_OK => Ok(Ack::Ok),
            ACK_WARNING => Ok(Ack::Warning(message)),
            ACK_FATAL => Ok(Ack::Fatal(message)),
            other => Err(Error::protocol(format!(
                "unexpected acknowledgement byte {other:#04x}"
            ))),
        }
    }

    /// Reads exactly one acknowledgement.
    ///
    /// Fails with a protocol error when the stream ends before the status byte.
    pub async fn read<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Self> {
        Self::read_next(reader).await?.ok_or_else(|| {
            Error::protocol("stream ended before acknowledgement was received")
        })
    }

    /// Like [`Ack::read`] but a stream that ends cleanly before the status byte yields `None`.
    pub async fn read_next<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Self>> {
        let mut code = [0u8; 1];
        match reader.read_exact(&mut code).await {
            Ok(_) => {}
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(error) => return Err(Error::pipe("failed reading acknowledgement", error)),
        }
        let mut message = Vec::new();
        if code[0] == ACK_WARNING || code[0] == ACK_FATAL {
            read_line(reader, &mut message).await?;
            if !message.ends_with(b"\n") {
                return Err(Error::protocol(format!(
                    "stream ended inside acknowledgement message {:?}",
                    String::from_utf8_lossy(&message)
                )));
            }
        }
        Self::from_parts(code[0], &message).map(Some)
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, line: &mut Vec<u8>) -> Result<usize> {
    let mut limited = reader.take(MAX_LINE_LEN);
    limited
        .read_until(b'\n', line)
        .await
        .map_err(|error| Error::pipe("failed reading control line", error))
}

/// What the sending side put where a control record belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Record(ControlRecord),
    /// Informational line, a record or another line may still follow.
    Warning(String),
    /// The sender gave up on the file.
    Fatal(String),
}

/// Reads the next control line from a sending peer.
///
/// Returns `None` when the stream ends cleanly before the line starts. A sender that cannot
/// provide the file answers with a warning or fatal line instead of a record, and usually
/// closes the stream right after.
pub async fn read_announcement<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Announcement>> {
    let mut line = Vec::new();
    let read = read_line(reader, &mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with(b"\n") {
        return Err(Error::protocol(format!(
            "control line {:?} is not newline terminated",
            String::from_utf8_lossy(&line)
        )));
    }
    let message = || String::from_utf8_lossy(&line[1..line.len() - 1]).into_owned();
    let announcement = match line[0] {
        ACK_WARNING => Announcement::Warning(message()),
        ACK_FATAL => Announcement::Fatal(message()),
        _ => Announcement::Record(ControlRecord::decode(&line)?),
    };
    Ok(Some(announcement))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_exact_line() {
        let record = ControlRecord::new("report.txt", 1024);
        assert_eq!(record.encode().unwrap(), b"C0644 1024 report.txt\n");
        assert_eq!(
            ControlRecord::new("empty", 0).encode().unwrap(),
            b"C0644 0 empty\n"
        );
    }

    #[test]
    fn encode_rejects_newline_in_name() {
        let record = ControlRecord::new("bad\nname", 1);
        assert!(matches!(record.encode(), Err(Error::Encoding(_))));
        let record = ControlRecord::new("bad\0name", 1);
        assert!(matches!(record.encode(), Err(Error::Encoding(_))));
    }

    #[test]
    fn encode_rejects_bad_mode() {
        let mut record = ControlRecord::new("file", 1);
        record.mode = "644".to_string();
        assert!(matches!(record.encode(), Err(Error::Encoding(_))));
        record.mode = "0948".to_string();
        assert!(matches!(record.encode(), Err(Error::Encoding(_))));
    }

    #[test]
    fn decode_keeps_spaces_in_name() {
        let record = ControlRecord::decode(b"C0755 12 my file name.txt\n").unwrap();
        assert_eq!(record.mode, "0755");
        assert_eq!(record.size, 12);
        assert_eq!(record.name, "my file name.txt");
    }

    #[test]
    fn decode_errors() {
        for line in [
            &b"D0755 0 dir\n"[..],
            b"garbage\n",
            b"",
            b"C0644 12\n",
            b"C0644\n",
            b"C0644 -1 file\n",
            b"C0644 ten file\n",
            b"Cxyz 1 file\n",
        ] {
            let result = ControlRecord::decode(line);
            assert!(
                matches!(result, Err(Error::Protocol(_))),
                "line {:?} gave {:?}",
                String::from_utf8_lossy(line),
                result
            );
        }
    }

    #[tokio::test]
    async fn read_ack_variants() {
        let mut input = &b"\x00\x01disk almost full\n\x02permission denied\n"[..];
        assert_eq!(Ack::read(&mut input).await.unwrap(), Ack::Ok);
        assert_eq!(
            Ack::read(&mut input).await.unwrap(),
            Ack::Warning("disk almost full".to_string())
        );
        assert_eq!(
            Ack::read(&mut input).await.unwrap(),
            Ack::Fatal("permission denied".to_string())
        );
        assert!(matches!(
            Ack::read(&mut input).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn read_ack_rejects_unknown_byte() {
        let mut input = &b"C0644 1 x\n"[..];
        assert!(matches!(
            Ack::read(&mut input).await,
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn ack_encoding() {
        assert_eq!(Ack::Ok.encode(), vec![0]);
        assert_eq!(Ack::Fatal("short read".to_string()).encode(), b"\x02short read\n");
        assert_eq!(Ack::Warning("a\nb".to_string()).encode(), b"\x01ab\n");
    }

    #[tokio::test]
    async fn announcement_of_error() {
        let mut input = &b"\x01scp: /nope: No such file or directory\n"[..];
        assert_eq!(
            read_announcement(&mut input).await.unwrap(),
            Some(Announcement::Warning(
                "scp: /nope: No such file or directory".to_string()
            ))
        );
        assert_eq!(read_announcement(&mut input).await.unwrap(), None);
    }

    #[tokio::test]
    async fn announcement_after_warning() {
        let mut input = &b"\x01note: something\nC0644 5 hello.txt\n\x02gone\n"[..];
        assert_eq!(
            read_announcement(&mut input).await.unwrap(),
            Some(Announcement::Warning("note: something".to_string()))
        );
        assert_eq!(
            read_announcement(&mut input).await.unwrap(),
            Some(Announcement::Record(ControlRecord::new("hello.txt", 5)))
        );
        assert_eq!(
            read_announcement(&mut input).await.unwrap(),
            Some(Announcement::Fatal("gone".to_string()))
        );
    }

    #[tokio::test]
    async fn ack_message_cut_short() {
        let mut input = &b"\x01disk almo"[..];
        assert!(matches!(
            Ack::read(&mut input).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn announcement_needs_full_line() {
        let mut input = &b"C0644 10 trunc"[..];
        assert!(matches!(
            read_announcement(&mut input).await,
            Err(Error::Protocol(_))
        ));
        let mut input = &b"\x02no newline"[..];
        assert!(matches!(
            read_announcement(&mut input).await,
            Err(Error::Protocol(_))
        ));
        let mut input = &b""[..];
        assert_eq!(read_announcement(&mut input).await.unwrap(), None);
    }

    proptest! {
        #[test]
        fn record_round_trip(
            mode in "[0-7]{4}",
            size in any::<u64>(),
            name in r"[^\n\x00]{1,64}",
        ) {
            let record = ControlRecord { mode, size, name };
            let decoded = ControlRecord::decode(&record.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, record);
        }
    }
}
